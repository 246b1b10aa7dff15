// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `PowerHub` Lib - power control for the outlets around a printer host.
//!
//! This library manages a set of named power devices (smart plugs, relays,
//! message-bus switches) on behalf of a host that supervises printer
//! hardware. Each device serializes its requests, keeps its last known
//! state, and reacts to host events: powering off after a firmware
//! shutdown, powering on when a job is queued, restarting the firmware
//! connection once power returns.
//!
//! # Architecture
//!
//! - [`driver`]: the per-vendor [`Driver`](driver::Driver) capability and
//!   the built-in Tasmota and MQTT drivers
//! - [`device`]: [`PowerDevice`], the state machine wrapped around one driver
//! - [`manager`]: [`PowerManager`], the registry routing requests and events
//! - [`api`]: the endpoint-style request surface
//! - [`host`]: what the library needs from its host (hardware state,
//!   service control)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use powerhub_lib::driver::DriverFactory;
//! use powerhub_lib::event::{EventBus, PowerEvent};
//! use powerhub_lib::host::{ServiceManager, SupervisedHardware};
//! use powerhub_lib::{PowerConfig, PowerManager};
//!
//! # async fn example(
//! #     hardware: Arc<dyn SupervisedHardware>,
//! #     services: Arc<dyn ServiceManager>,
//! # ) -> powerhub_lib::Result<()> {
//! let config = PowerConfig::from_json_str(r#"{
//!     "devices": {
//!         "printer": {
//!             "type": "tasmota",
//!             "address": "192.168.1.20",
//!             "off_when_shutdown": true,
//!             "locked_while_printing": true
//!         }
//!     }
//! }"#)?;
//!
//! let manager = PowerManager::new(hardware, services, EventBus::new());
//! let mut changes = manager.events().subscribe();
//! manager.load(&config, &DriverFactory::with_defaults()).await;
//!
//! tokio::spawn(async move {
//!     while let Ok(PowerEvent::PowerChanged(info)) = changes.recv().await {
//!         println!("{} is now {}", info.device, info.status);
//!     }
//! });
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `http` (default): the Tasmota driver and [`HttpClient`](protocol::HttpClient)
//! - `mqtt` (default): [`MqttBus`](protocol::MqttBus), a broker connection
//!   for the MQTT driver

pub mod api;
pub mod device;
pub mod driver;
pub mod error;
pub mod event;
pub mod host;
pub mod manager;
pub mod protocol;
pub mod timer;
pub mod types;

pub use device::{DeviceConfig, PowerDevice};
pub use driver::{Driver, DriverFactory, Initialization, StateReporter};
pub use error::{Error, Result, TransportError, ValueError};
pub use event::{EventBus, HostEvent, PowerEvent};
pub use manager::{PowerConfig, PowerManager, PowerSetter};
pub use types::{DeviceInfo, PowerAction, PowerState, PowerValue};
