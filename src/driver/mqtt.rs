// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Relays controlled through a message bus.
//!
//! The driver publishes fixed on/off payloads to a command topic and learns
//! the relay state from a state topic. A state message that arrives while a
//! request is waiting answers that request; any other state message is
//! reported to the device as an external change.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use super::{Driver, Initialization, StateReporter, parse_options};
use crate::device::DeviceConfig;
use crate::error::{Error, TransportError};
use crate::protocol::{ConnectionHandler, MessageBus, MessageHandler, ResponseCell, Waiter};
use crate::types::PowerState;

#[derive(Debug, Clone, Deserialize)]
struct MqttOptions {
    command_topic: String,
    state_topic: String,
    #[serde(default = "default_payload_on")]
    payload_on: String,
    #[serde(default = "default_payload_off")]
    payload_off: String,
    #[serde(default)]
    retain_command_state: bool,
    #[serde(default)]
    query_topic: Option<String>,
    #[serde(default)]
    query_payload: Option<String>,
    #[serde(default)]
    query_after_command: bool,
    #[serde(default = "default_state_timeout")]
    state_timeout: f64,
    #[serde(default)]
    qos: Option<u8>,
}

fn default_payload_on() -> String {
    "ON".to_string()
}

fn default_payload_off() -> String {
    "OFF".to_string()
}

const fn default_state_timeout() -> f64 {
    2.0
}

/// State shared with the bus subscription handler.
struct Shared {
    payload_on: String,
    payload_off: String,
    pending: ResponseCell<PowerState>,
    reporter: Mutex<Option<StateReporter>>,
    name: String,
}

impl Shared {
    fn parse(&self, payload: &[u8]) -> Result<PowerState, TransportError> {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();
        if text.eq_ignore_ascii_case(&self.payload_on) {
            Ok(PowerState::On)
        } else if text.eq_ignore_ascii_case(&self.payload_off) {
            Ok(PowerState::Off)
        } else {
            Err(TransportError::InvalidResponse(format!(
                "invalid state received, raw payload: '{text}'"
            )))
        }
    }

    fn on_state_message(&self, payload: &[u8]) {
        let result = self.parse(payload);
        if let Err(e) = &result {
            tracing::info!(device = %self.name, error = %e, "Invalid MQTT state message");
        }
        if self.pending.is_pending() {
            self.pending.resolve(result);
            return;
        }
        self.report(result.unwrap_or(PowerState::Error));
    }

    /// Fails the pending request and puts the device in the error state.
    fn on_disconnected(&self) {
        if self.pending.resolve(Err(TransportError::Disconnected)) {
            tracing::debug!(device = %self.name, "Pending MQTT request failed on disconnect");
        }
        self.report(PowerState::Error);
    }

    fn report(&self, state: PowerState) {
        if let Some(reporter) = self.reporter.lock().as_ref() {
            reporter.report(state);
        }
    }
}

/// Driver for a relay behind a [`MessageBus`].
///
/// Options: `command_topic` and `state_topic` (required), `payload_on`
/// (`ON`), `payload_off` (`OFF`), `retain_command_state`, `query_topic`,
/// `query_payload`, `query_after_command`, `state_timeout` (2 s) and `qos`.
/// Without a query topic the state topic should be retained, so the current
/// state arrives right after subscribing.
pub struct MqttDriver {
    bus: Arc<dyn MessageBus>,
    shared: Arc<Shared>,
    command_topic: String,
    state_topic: String,
    retain_command_state: bool,
    query_topic: Option<String>,
    query_payload: Option<String>,
    must_query: bool,
    state_timeout: Duration,
    qos: u8,
    subscribed: bool,
}

impl MqttDriver {
    /// Builds the driver from the device's options.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a topic is missing, `qos` is not
    /// 0, 1 or 2, or `state_timeout` is not positive.
    pub fn from_config(config: &DeviceConfig, bus: Arc<dyn MessageBus>) -> Result<Self, Error> {
        let options: MqttOptions = parse_options(config)?;
        let qos = match options.qos {
            None => 0,
            Some(level @ 0..=2) => level,
            Some(other) => {
                return Err(Error::Configuration(format!(
                    "option 'qos' of device '{}' must be 0, 1 or 2, got {other}",
                    config.name
                )));
            }
        };
        if !options.state_timeout.is_finite() || options.state_timeout <= 0.0 {
            return Err(Error::Configuration(format!(
                "option 'state_timeout' of device '{}' must be above 0.0",
                config.name
            )));
        }
        let state_timeout = Duration::try_from_secs_f64(options.state_timeout).map_err(|e| {
            Error::Configuration(format!(
                "option 'state_timeout' of device '{}' is out of range: {e}",
                config.name
            ))
        })?;
        let must_query = options.query_after_command && options.query_topic.is_some();
        let shared = Arc::new(Shared {
            payload_on: options.payload_on,
            payload_off: options.payload_off,
            pending: ResponseCell::new(),
            reporter: Mutex::new(None),
            name: config.name.clone(),
        });
        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let on_change: ConnectionHandler = Arc::new(move |connected: bool| {
            if !connected && let Some(shared) = weak.upgrade() {
                shared.on_disconnected();
            }
        });
        bus.on_connection_change(on_change);
        Ok(Self {
            bus,
            shared,
            command_topic: options.command_topic,
            state_topic: options.state_topic,
            retain_command_state: options.retain_command_state,
            query_topic: options.query_topic,
            query_payload: options.query_payload,
            must_query,
            state_timeout,
            qos,
            subscribed: false,
        })
    }

    async fn ensure_subscribed(&mut self) -> Result<(), TransportError> {
        if self.subscribed {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handler: MessageHandler = Arc::new(move |payload: &[u8]| shared.on_state_message(payload));
        self.bus.subscribe(&self.state_topic, self.qos, handler).await?;
        self.subscribed = true;
        Ok(())
    }

    async fn publish_query(&self) -> Result<(), TransportError> {
        let Some(topic) = &self.query_topic else {
            return Ok(());
        };
        let payload = self.query_payload.as_deref().unwrap_or_default();
        self.bus.publish(topic, payload.as_bytes(), self.qos, false).await
    }

    /// Arms the response cell, publishes, and waits for the next state
    /// message.
    async fn round_trip(&mut self, command: Option<String>, query: bool) -> Result<PowerState, TransportError> {
        let waiter = self.shared.pending.arm();
        let seq = waiter.seq();
        let result = self.publish_and_wait(waiter, command, query).await;
        self.shared.pending.clear(seq);
        result
    }

    async fn publish_and_wait(
        &mut self,
        waiter: Waiter<PowerState>,
        command: Option<String>,
        query: bool,
    ) -> Result<PowerState, TransportError> {
        self.ensure_subscribed().await?;
        if let Some(payload) = command {
            self.bus
                .publish(&self.command_topic, payload.as_bytes(), self.qos, self.retain_command_state)
                .await?;
        }
        if query {
            self.publish_query().await?;
        }
        waiter.wait(self.state_timeout).await
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.bus.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Driver for MqttDriver {
    async fn refresh_status(&mut self, current: PowerState) -> Result<PowerState, TransportError> {
        let query = self.query_topic.is_some() && (self.must_query || !current.is_known());
        if !query && self.subscribed {
            return Ok(current);
        }
        self.ensure_connected()?;
        self.round_trip(None, query).await
    }

    async fn set_power(&mut self, state: PowerState) -> Result<PowerState, TransportError> {
        self.ensure_connected()?;
        let payload = if state == PowerState::On {
            self.shared.payload_on.clone()
        } else {
            self.shared.payload_off.clone()
        };
        self.round_trip(Some(payload), self.must_query).await
    }

    fn initialization(&self) -> Initialization {
        Initialization::RefreshOnce
    }

    fn supports_polling(&self) -> bool {
        false
    }

    fn attach(&mut self, reporter: StateReporter) {
        *self.shared.reporter.lock() = Some(reporter);
    }
}

impl std::fmt::Debug for MqttDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttDriver")
            .field("command_topic", &self.command_topic)
            .field("state_topic", &self.state_topic)
            .field("subscribed", &self.subscribed)
            .finish_non_exhaustive()
    }
}
