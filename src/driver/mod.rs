// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device drivers.
//!
//! A [`Driver`] is the transport-specific half of a power device: it knows
//! how to read the current state and how to switch power, nothing else.
//! Request serialization, retries during bring-up, polling, timers and side
//! effects all live in [`PowerDevice`](crate::device::PowerDevice), which owns
//! exactly one driver and only calls it while holding the device's request
//! lock.
//!
//! # Implementing a driver
//!
//! ```
//! use async_trait::async_trait;
//! use powerhub_lib::driver::Driver;
//! use powerhub_lib::error::TransportError;
//! use powerhub_lib::types::PowerState;
//!
//! struct Relay {
//!     closed: bool,
//! }
//!
//! #[async_trait]
//! impl Driver for Relay {
//!     async fn refresh_status(&mut self, _current: PowerState) -> Result<PowerState, TransportError> {
//!         Ok(PowerState::from(self.closed))
//!     }
//!
//!     async fn set_power(&mut self, state: PowerState) -> Result<PowerState, TransportError> {
//!         self.closed = state == PowerState::On;
//!         Ok(state)
//!     }
//! }
//! ```

mod factory;
pub mod mqtt;
#[cfg(feature = "http")]
pub mod tasmota;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::types::PowerState;

pub use factory::{DriverBuilder, DriverFactory, parse_options};

/// How a device brings its state up after being registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Initialization {
    /// Refresh on a fixed backoff until the device reports on or off, then
    /// apply the initial state, notify and start polling.
    #[default]
    RetryUntilReady,
    /// Refresh once, apply the initial state and start polling.
    RefreshOnce,
    /// Switch power to the configured initial state (off if unset).
    ApplyInitial,
    /// No initializer; the state arrives through the [`StateReporter`].
    External,
}

/// The capability every device type implements.
///
/// Both operations are only called while the owning device holds its request
/// lock. They must not retry indefinitely.
#[async_trait]
pub trait Driver: Send + 'static {
    /// Reads the current power state.
    ///
    /// `current` is the state the device last recorded; drivers without a
    /// way to read back the hardware return it unchanged.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` if the device cannot be reached or answers
    /// with something unusable.
    async fn refresh_status(&mut self, current: PowerState) -> Result<PowerState, TransportError>;

    /// Switches power and returns the state the device reports afterwards.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` if the command cannot be delivered or the
    /// device rejects it.
    async fn set_power(&mut self, state: PowerState) -> Result<PowerState, TransportError>;

    /// Returns the bring-up strategy for this driver.
    fn initialization(&self) -> Initialization {
        Initialization::RetryUntilReady
    }

    /// Returns false if the device must never be polled.
    fn supports_polling(&self) -> bool {
        true
    }

    /// Receives the handle used to report unsolicited state changes.
    fn attach(&mut self, _reporter: StateReporter) {}
}

/// Handle through which a driver reports state it observed on its own.
///
/// Reported states reach the owning device asynchronously. Extra fields set
/// here are appended to the device's [`DeviceInfo`](crate::types::DeviceInfo).
#[derive(Debug, Clone)]
pub struct StateReporter {
    tx: mpsc::UnboundedSender<PowerState>,
    extra: Arc<Mutex<Map<String, Value>>>,
}

impl StateReporter {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<PowerState>,
        extra: Arc<Mutex<Map<String, Value>>>,
    ) -> Self {
        Self { tx, extra }
    }

    /// Reports a state observed outside of any request.
    pub fn report(&self, state: PowerState) {
        // The device may already be closed
        let _ = self.tx.send(state);
    }

    /// Sets a driver-specific field reported with the device info.
    pub fn set_info(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.lock().insert(key.into(), value.into());
    }
}
