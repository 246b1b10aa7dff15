// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fire-and-forget power requests.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::device::PowerDevice;
use crate::types::PowerValue;

pub(crate) type DeviceMap = RwLock<BTreeMap<String, Arc<PowerDevice>>>;

/// Schedules power requests without waiting for them.
///
/// Devices use the setter for their timers (auto-off, shutdown power-off).
/// It only holds a weak reference to the manager's registry, so devices never
/// keep the registry alive.
#[derive(Debug, Clone, Default)]
pub struct PowerSetter {
    devices: Weak<DeviceMap>,
}

impl PowerSetter {
    pub(crate) fn new(devices: &Arc<DeviceMap>) -> Self {
        Self {
            devices: Arc::downgrade(devices),
        }
    }

    /// Creates a setter that is not attached to any registry.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Requests `state` for `device` in the background.
    ///
    /// Accepts `true`/`false` and the case-insensitive strings `on`, `off`,
    /// `toggle`, `true` and `false`. Invalid input and unknown devices are
    /// logged and dropped. Must be called from within a tokio runtime.
    pub fn set_device_power(&self, device: &str, state: impl Into<PowerValue>, force: bool) {
        let state = state.into();
        let action = match state.to_action() {
            Ok(action) => action,
            Err(e) => {
                tracing::info!(device = %device, error = %e, "Invalid state received");
                return;
            }
        };
        let Some(target) = self
            .devices
            .upgrade()
            .and_then(|devices| devices.read().get(device).cloned())
        else {
            tracing::info!(device = %device, "No device found");
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = target.process_request(action, force).await {
                tracing::warn!(
                    device = %target.name(),
                    action = %action,
                    error = %e,
                    "Scheduled power request failed"
                );
            }
        });
    }
}
