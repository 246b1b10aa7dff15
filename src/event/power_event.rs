// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound power notifications.

use serde::Serialize;

use crate::types::{DeviceInfo, PowerState};

/// Notifications emitted by power devices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "params")]
pub enum PowerEvent {
    /// A device's power state changed, or was observed to have changed.
    #[serde(rename = "power:power_changed")]
    PowerChanged(DeviceInfo),
}

impl PowerEvent {
    /// Returns the notification name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PowerChanged(_) => "power:power_changed",
        }
    }

    /// Returns the name of the device the event refers to.
    #[must_use]
    pub fn device(&self) -> &str {
        match self {
            Self::PowerChanged(info) => &info.device,
        }
    }

    /// Returns the device state carried by the event.
    #[must_use]
    pub fn status(&self) -> PowerState {
        match self {
            Self::PowerChanged(info) => info.status,
        }
    }
}
