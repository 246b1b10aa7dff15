// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transports used by the built-in drivers.
//!
//! - [`HttpClient`]: JSON over HTTP with a bounded retry policy
//! - [`MessageBus`]: the publish/subscribe capability message-bus drivers
//!   depend on, implemented by [`MqttBus`]

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "mqtt")]
mod mqtt;
mod response_cell;

#[cfg(feature = "http")]
pub use http::{HttpClient, HttpClientBuilder};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBus, MqttBusBuilder};

pub(crate) use response_cell::{ResponseCell, Waiter};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;

/// Callback receiving the payload of a message on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Callback told when the bus connects (`true`) or loses its connection
/// (`false`).
pub type ConnectionHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// A publish/subscribe message bus.
///
/// QoS levels are 0, 1 and 2 as in MQTT.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Returns true while the bus is connected.
    fn is_connected(&self) -> bool;

    /// Registers `handler` for connection state changes.
    fn on_connection_change(&self, handler: ConnectionHandler);

    /// Publishes a message.
    ///
    /// # Errors
    ///
    /// Returns error if the message cannot be queued for delivery.
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Calls `handler` for every message published on exactly `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription cannot be registered.
    async fn subscribe(
        &self,
        topic: &str,
        qos: u8,
        handler: MessageHandler,
    ) -> Result<(), TransportError>;
}
