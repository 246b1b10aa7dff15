// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event system for power notifications and host events.
//!
//! Outbound notifications ([`PowerEvent`]) are published on an [`EventBus`]
//! backed by tokio's broadcast channel. Inbound host events ([`HostEvent`])
//! describe what the supervised hardware and the job queue report; the
//! manager consumes them.
//!
//! # Examples
//!
//! ```
//! use powerhub_lib::event::{EventBus, PowerEvent};
//! use powerhub_lib::types::{DeviceInfo, PowerState};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(PowerEvent::PowerChanged(DeviceInfo {
//!     device: "printer".to_string(),
//!     status: PowerState::On,
//!     locked_while_printing: false,
//!     device_type: "tasmota".to_string(),
//!     extra: Default::default(),
//! }));
//! ```

mod event_bus;
mod host_event;
mod power_event;

pub use event_bus::EventBus;
pub use host_event::{HostEvent, JobQueueEvent, QueuedJob};
pub use power_event::PowerEvent;
