// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT connection shared by message-bus power devices.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tokio::sync::oneshot;

use super::{ConnectionHandler, MessageBus, MessageHandler};
use crate::error::TransportError;

/// Counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Pause before polling the event loop again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
struct MqttBusConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connection_timeout: Duration,
}

impl Default for MqttBusConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

struct Subscription {
    qos: QoS,
    handlers: Vec<MessageHandler>,
}

/// An MQTT broker connection implementing [`MessageBus`].
///
/// Messages are routed by exact topic to the handlers registered with
/// [`subscribe`](MessageBus::subscribe). Subscriptions are renewed whenever
/// the connection is re-established. Cloning shares the connection.
///
/// # Examples
///
/// ```no_run
/// use powerhub_lib::protocol::{MessageBus, MqttBus};
///
/// # async fn example() -> Result<(), powerhub_lib::error::TransportError> {
/// let bus = MqttBus::builder()
///     .host("192.168.1.50")
///     .credentials("user", "password")
///     .build()
///     .await?;
///
/// bus.publish("cmnd/plug/POWER", b"ON", 0, false).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MqttBus {
    inner: Arc<MqttBusInner>,
}

struct MqttBusInner {
    client: AsyncClient,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    connection_handlers: RwLock<Vec<ConnectionHandler>>,
    config: MqttBusConfig,
    connected: AtomicBool,
}

impl MqttBus {
    /// Creates a new builder for the connection.
    #[must_use]
    pub fn builder() -> MqttBusBuilder {
        MqttBusBuilder::default()
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Returns the number of subscribed topics.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    /// Disconnects from the broker.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be queued.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );
        self.inner.subscriptions.write().clear();
        self.inner.client.disconnect().await?;
        self.set_connected(false);
        Ok(())
    }

    /// Updates the connection flag; handlers only hear about real changes.
    fn set_connected(&self, connected: bool) -> bool {
        let changed = self.inner.connected.swap(connected, Ordering::AcqRel) != connected;
        if changed {
            let handlers = self.inner.connection_handlers.read().clone();
            for handler in handlers {
                handler(connected);
            }
        }
        changed
    }

    fn route_message(&self, topic: &str, payload: &[u8]) {
        let handlers: Vec<MessageHandler> = match self.inner.subscriptions.read().get(topic) {
            Some(sub) => sub.handlers.clone(),
            None => return,
        };
        for handler in handlers {
            handler(payload);
        }
    }

    fn resubscribe(&self) {
        let subscriptions = self.inner.subscriptions.read();
        for (topic, sub) in subscriptions.iter() {
            if let Err(e) = self.inner.client.try_subscribe(topic.as_str(), sub.qos) {
                tracing::warn!(topic = %topic, error = %e, "Failed to renew MQTT subscription");
            }
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    fn on_connection_change(&self, handler: ConnectionHandler) {
        self.inner.connection_handlers.write().push(handler);
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<(), TransportError> {
        tracing::debug!(topic = %topic, "Publishing MQTT message");
        self.inner
            .client
            .publish(topic, qos_from(qos), retain, payload.to_vec())
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: u8,
        handler: MessageHandler,
    ) -> Result<(), TransportError> {
        let qos = qos_from(qos);
        let is_new = {
            let mut subscriptions = self.inner.subscriptions.write();
            match subscriptions.get_mut(topic) {
                Some(sub) => {
                    sub.handlers.push(handler);
                    false
                }
                None => {
                    subscriptions.insert(
                        topic.to_string(),
                        Subscription {
                            qos,
                            handlers: vec![handler],
                        },
                    );
                    true
                }
            }
        };
        if is_new {
            self.inner.client.subscribe(topic, qos).await?;
            tracing::debug!(topic = %topic, "Subscribed to MQTT topic");
        }
        Ok(())
    }
}

impl std::fmt::Debug for MqttBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBus")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn qos_from(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Builder for [`MqttBus`].
#[derive(Debug, Default)]
pub struct MqttBusBuilder {
    config: MqttBusConfig,
}

impl MqttBusBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets how long `build` waits for the broker (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Connects to the broker.
    ///
    /// # Errors
    ///
    /// Returns error if the host is not set or the broker does not
    /// acknowledge the connection in time.
    pub async fn build(self) -> Result<MqttBus, TransportError> {
        if self.config.host.is_empty() {
            return Err(TransportError::ConnectionFailed(
                "MQTT broker host is required".to_string(),
            ));
        }

        let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let client_id = format!("powerhub_{}_{}", std::process::id(), counter);

        let mut options = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        if let Some((ref username, ref password)) = self.config.credentials {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 10);
        let bus = MqttBus {
            inner: Arc::new(MqttBusInner {
                client,
                subscriptions: RwLock::new(HashMap::new()),
                connection_handlers: RwLock::new(Vec::new()),
                config: self.config.clone(),
                connected: AtomicBool::new(false),
            }),
        };

        let (connack_tx, connack_rx) = oneshot::channel();
        tokio::spawn(handle_bus_events(event_loop, bus.clone(), connack_tx));

        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %self.config.host,
                    port = %self.config.port,
                    "Connected to MQTT broker"
                );
                Ok(bus)
            }
            Ok(Err(_)) => Err(TransportError::ConnectionFailed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )),
            Err(_) => Err(TransportError::ConnectionFailed(format!(
                "MQTT connection timeout after {}s",
                timeout.as_secs()
            ))),
        }
    }
}

/// Drives the connection, routing publishes and renewing subscriptions.
async fn handle_bus_events(mut event_loop: EventLoop, bus: MqttBus, connack_tx: oneshot::Sender<()>) {
    use rumqttc::{Event, Packet};

    let mut connack_tx = Some(connack_tx);
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                bus.set_connected(true);
                match connack_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(());
                    }
                    None => bus.resubscribe(),
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(topic = %publish.topic, "MQTT message received");
                bus.route_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker disconnected");
                bus.set_connected(false);
            }
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                bus.set_connected(false);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if bus.set_connected(false) {
                    tracing::error!(error = %e, "MQTT connection lost");
                } else {
                    tracing::debug!(error = %e, "MQTT connection attempt failed");
                }
                // Dropping the sender fails `build` when the first attempt fails
                if connack_tx.take().is_some() {
                    break;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_default_values() {
        let builder = MqttBusBuilder::default();
        assert_eq!(builder.config.port, 1883);
        assert!(builder.config.host.is_empty());
        assert!(builder.config.credentials.is_none());
        assert_eq!(builder.config.keep_alive, Duration::from_secs(30));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(10));
    }

    #[test]
    fn builder_chain() {
        let builder = MqttBusBuilder::default()
            .host("192.168.1.50")
            .port(8883)
            .credentials("admin", "secret")
            .keep_alive(Duration::from_secs(45))
            .connection_timeout(Duration::from_secs(15));

        assert_eq!(builder.config.host, "192.168.1.50");
        assert_eq!(builder.config.port, 8883);
        assert!(builder.config.credentials.is_some());
        assert_eq!(builder.config.keep_alive, Duration::from_secs(45));
    }

    #[tokio::test]
    async fn missing_host_fails() {
        let result = MqttBusBuilder::default().build().await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[test]
    fn qos_levels() {
        assert_eq!(qos_from(0), QoS::AtMostOnce);
        assert_eq!(qos_from(1), QoS::AtLeastOnce);
        assert_eq!(qos_from(2), QoS::ExactlyOnce);
    }
}
