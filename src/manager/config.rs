// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manager configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::device::DeviceConfig;
use crate::error::Error;

/// Configuration of all power devices.
///
/// # Examples
///
/// ```
/// use powerhub_lib::manager::PowerConfig;
///
/// let config = PowerConfig::from_json_str(r#"{
///     "verbose": true,
///     "devices": {
///         "printer": { "type": "tasmota", "address": "192.168.1.20" }
///     }
/// }"#).unwrap();
///
/// assert!(config.verbose);
/// assert_eq!(config.devices["printer"].name, "printer");
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowerConfig {
    /// Log refresh failures of background polls too.
    #[serde(default)]
    pub verbose: bool,
    /// Device configurations keyed by device name.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
}

impl PowerConfig {
    /// Parses a JSON configuration.
    ///
    /// Device names are taken from the map keys.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let mut config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid power configuration: {e}")))?;
        for (name, device) in &mut config.devices {
            device.name.clone_from(name);
        }
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }
}
