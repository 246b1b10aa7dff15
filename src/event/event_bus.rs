// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus for broadcasting power notifications.

use tokio::sync::broadcast;

use super::PowerEvent;

/// Default channel capacity for the event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcasts [`PowerEvent`]s to every subscriber.
///
/// The bus has a fixed capacity (default 256). A subscriber that falls behind
/// loses the oldest events and receives `RecvError::Lagged`.
///
/// # Examples
///
/// ```
/// use powerhub_lib::event::EventBus;
///
/// let bus = EventBus::new();
/// let _rx = bus.subscribe();
/// let _rx2 = bus.clone().subscribe();
/// assert_eq!(bus.subscriber_count(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PowerEvent>,
}

impl EventBus {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to power notifications published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PowerEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event to all subscribers.
    ///
    /// Without subscribers the event is discarded.
    pub fn publish(&self, event: PowerEvent) {
        tracing::trace!(event = event.name(), device = %event.device(), "Publishing event");
        // No receivers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
