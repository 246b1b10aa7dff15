// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver construction keyed by device type.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::Driver;
use super::mqtt::MqttDriver;
use crate::device::DeviceConfig;
use crate::error::Error;
use crate::protocol::MessageBus;

/// Builds a driver from a device configuration.
pub type DriverBuilder = Arc<dyn Fn(&DeviceConfig) -> Result<Box<dyn Driver>, Error> + Send + Sync>;

/// Registry of driver builders keyed by the configuration `type` tag.
///
/// # Examples
///
/// ```
/// use powerhub_lib::device::DeviceConfig;
/// use powerhub_lib::driver::DriverFactory;
///
/// let factory = DriverFactory::new();
/// let result = factory.build(&DeviceConfig::new("plug", "zigbee"));
/// assert!(result.is_err());
/// ```
#[derive(Clone, Default)]
pub struct DriverFactory {
    builders: BTreeMap<String, DriverBuilder>,
}

impl DriverFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory with the built-in drivers enabled by crate features.
    #[must_use]
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut factory = Self::new();
        #[cfg(feature = "http")]
        factory.register("tasmota", |config| {
            Ok(Box::new(super::tasmota::TasmotaDriver::from_config(config)?) as Box<dyn Driver>)
        });
        factory
    }

    /// Enables the `mqtt` device type, sending through `bus`.
    #[must_use]
    pub fn with_message_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.register("mqtt", move |config| {
            Ok(Box::new(MqttDriver::from_config(config, Arc::clone(&bus))?) as Box<dyn Driver>)
        });
        self
    }

    /// Registers a builder for `device_type`, replacing any previous one.
    pub fn register<F>(&mut self, device_type: impl Into<String>, builder: F)
    where
        F: Fn(&DeviceConfig) -> Result<Box<dyn Driver>, Error> + Send + Sync + 'static,
    {
        self.builders.insert(device_type.into(), Arc::new(builder));
    }

    /// Returns true if a builder is registered for `device_type`.
    #[must_use]
    pub fn supports(&self, device_type: &str) -> bool {
        self.builders.contains_key(device_type)
    }

    /// Builds the driver for `config`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the type is unknown or the builder
    /// rejects the options.
    pub fn build(&self, config: &DeviceConfig) -> Result<Box<dyn Driver>, Error> {
        let builder = self.builders.get(&config.device_type).ok_or_else(|| {
            Error::Configuration(format!("Unsupported Device Type: {}", config.device_type))
        })?;
        builder(config)
    }
}

impl fmt::Debug for DriverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverFactory")
            .field("types", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Deserializes the driver options of `config` into `T`.
///
/// # Errors
///
/// Returns `Error::Configuration` naming the device if an option is missing
/// or has the wrong type.
pub fn parse_options<T: DeserializeOwned>(config: &DeviceConfig) -> Result<T, Error> {
    serde_json::from_value(Value::Object(config.options.clone())).map_err(|e| {
        Error::Configuration(format!("invalid options for device '{}': {e}", config.name))
    })
}
