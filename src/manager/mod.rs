// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of power devices.
//!
//! The [`PowerManager`] owns every [`PowerDevice`](crate::device::PowerDevice)
//! by name. It builds devices from a [`PowerConfig`], serves the request
//! surface (list, batch, single and fire-and-forget requests) and fans host
//! events out to the devices.
//!
//! # Examples
//!
//! ## Reacting to host events
//!
//! ```no_run
//! use powerhub_lib::event::{HostEvent, JobQueueEvent};
//! use powerhub_lib::manager::PowerManager;
//! use tokio::sync::broadcast;
//!
//! # fn example(manager: PowerManager) {
//! let (host_tx, host_rx) = broadcast::channel(16);
//! let _listener = manager.spawn_event_listener(host_rx);
//!
//! host_tx
//!     .send(HostEvent::JobQueueChanged(JobQueueEvent::jobs_added(["benchy.gcode"])))
//!     .ok();
//! # }
//! ```
//!
//! ## Watching power changes
//!
//! ```no_run
//! use powerhub_lib::event::PowerEvent;
//! use powerhub_lib::manager::PowerManager;
//!
//! # fn example(manager: PowerManager) {
//! let mut events = manager.events().subscribe();
//! tokio::spawn(async move {
//!     while let Ok(PowerEvent::PowerChanged(info)) = events.recv().await {
//!         println!("{} is now {}", info.device, info.status);
//!     }
//! });
//! # }
//! ```

mod config;
mod power_manager;
mod power_setter;

pub use config::PowerConfig;
pub use power_manager::{DEVICE_NOT_FOUND, PowerManager};
pub use power_setter::PowerSetter;
