// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device summary reported by listings and change notifications.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::PowerState;

/// Snapshot of a device as reported to clients.
///
/// Serializes as `{device, status, locked_while_printing, type}` followed by
/// any fields the driver appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// The device name.
    pub device: String,
    /// The current power state.
    pub status: PowerState,
    /// Whether power changes are refused while printing.
    pub locked_while_printing: bool,
    /// The driver type tag.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Driver-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
