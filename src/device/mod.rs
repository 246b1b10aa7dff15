// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-device power engine.
//!
//! A [`PowerDevice`] wraps one [`Driver`] and is the only place that changes
//! a device's [`PowerState`]. Every request runs under the device's request
//! lock: refresh first, then decide whether a transition is needed, apply it,
//! and run the side effects (notification, bound services, firmware restart
//! scheduling, auto-off). Operations on the same device are totally ordered;
//! different devices are independent.
//!
//! The lock and the driver are the same object, a `tokio::sync::Mutex`
//! owning the boxed driver, so a driver can only be reached by the holder of
//! the lock.
//!
//! # Initializing devices
//!
//! Requests arriving while a device is still in [`PowerState::Init`] and its
//! initializer holds the lock return `init` immediately instead of waiting.
//! Bring-up of an unreachable device may retry for a long time and callers
//! must not block behind it.

mod config;
mod effects;
mod lifecycle;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::driver::{Driver, Initialization, StateReporter};
use crate::error::Error;
use crate::host::HostContext;
use crate::timer::TimerSlot;
use crate::types::{DeviceInfo, PowerAction, PowerState};

pub use config::{DeviceConfig, DeviceSettings};

/// Where a request came from; background polls log refresh failures only
/// in verbose mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Client,
    Poll,
}

#[derive(Debug, Default)]
struct Status {
    state: PowerState,
    last_update: Option<Instant>,
}

#[derive(Debug, Default)]
struct PollState {
    interval: Option<Duration>,
    task: Option<JoinHandle<()>>,
}

/// A configured power device.
///
/// Created with [`PowerDevice::new`] and brought up with
/// [`initialize`](Self::initialize). Usually owned by a
/// [`PowerManager`](crate::manager::PowerManager).
pub struct PowerDevice {
    name: String,
    device_type: String,
    settings: DeviceSettings,
    initialization: Initialization,
    driver: tokio::sync::Mutex<Box<dyn Driver>>,
    status: Mutex<Status>,
    extra: Arc<Mutex<Map<String, Value>>>,
    need_scheduled_restart: AtomicBool,
    poll: Mutex<PollState>,
    init_task: Mutex<Option<JoinHandle<()>>>,
    reports: Mutex<Option<mpsc::UnboundedReceiver<PowerState>>>,
    report_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_timer: TimerSlot,
    auto_off_timer: TimerSlot,
    restart_timer: TimerSlot,
    ctx: HostContext,
}

impl PowerDevice {
    /// Creates a device from its configuration and driver.
    ///
    /// The poll interval is dropped for drivers that do not support polling.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid.
    pub fn new(
        config: &DeviceConfig,
        mut driver: Box<dyn Driver>,
        ctx: HostContext,
    ) -> Result<Arc<Self>, Error> {
        let mut settings = config.settings()?;
        if !driver.supports_polling() {
            settings.poll_interval = None;
        }

        let extra = Arc::new(Mutex::new(Map::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        driver.attach(StateReporter::new(tx, Arc::clone(&extra)));

        Ok(Arc::new(Self {
            name: config.name.clone(),
            device_type: config.device_type.clone(),
            initialization: driver.initialization(),
            driver: tokio::sync::Mutex::new(driver),
            status: Mutex::default(),
            extra,
            need_scheduled_restart: AtomicBool::new(false),
            poll: Mutex::new(PollState {
                interval: settings.poll_interval,
                task: None,
            }),
            init_task: Mutex::new(None),
            reports: Mutex::new(Some(rx)),
            report_task: Mutex::new(None),
            shutdown_timer: TimerSlot::new(),
            auto_off_timer: TimerSlot::new(),
            restart_timer: TimerSlot::new(),
            settings,
            ctx,
        }))
    }

    /// Returns the device name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the driver type tag.
    #[must_use]
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Returns the validated policy options.
    #[must_use]
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Returns the current power state.
    #[must_use]
    pub fn state(&self) -> PowerState {
        self.status.lock().state
    }

    /// Returns when the state was last determined, if ever.
    #[must_use]
    pub fn last_update(&self) -> Option<Instant> {
        self.status.lock().last_update
    }

    /// Returns true while a request holds the device lock.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.driver.try_lock().is_err()
    }

    /// Returns true if the device powers on when jobs are queued.
    #[must_use]
    pub fn should_turn_on_when_queued(&self) -> bool {
        self.settings.on_when_queued
    }

    /// Returns the device info reported to clients and notifications.
    #[must_use]
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            device: self.name.clone(),
            status: self.state(),
            locked_while_printing: self.settings.locked_while_printing,
            device_type: self.device_type.clone(),
            extra: self.extra.lock().clone(),
        }
    }

    /// Runs a power request and returns the resulting state.
    ///
    /// `Status` refreshes only. `On`, `Off` and `Toggle` refresh first and
    /// switch power only if the refreshed state differs from the target;
    /// `Toggle` resolves against the refreshed state.
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` if the device is locked while
    /// printing and `force` is false, or `Error::Transport` if switching
    /// power failed. Refresh failures are not errors; they leave the device
    /// in [`PowerState::Error`].
    pub async fn process_request(&self, action: PowerAction, force: bool) -> Result<PowerState, Error> {
        self.run_request(action, force, Origin::Client).await
    }

    async fn run_request(
        &self,
        action: PowerAction,
        force: bool,
        origin: Origin,
    ) -> Result<PowerState, Error> {
        let mut driver = if self.state() == PowerState::Init {
            match self.driver.try_lock() {
                Ok(driver) => driver,
                Err(_) => return Ok(self.state()),
            }
        } else {
            self.driver.lock().await
        };
        let _stamp = StampOnDrop(self);

        let base = self.state();
        let current = self.refresh(driver.as_mut(), origin).await;

        let target = match action {
            PowerAction::Status => None,
            PowerAction::Toggle => Some(current.toggled()),
            PowerAction::On | PowerAction::Off => action.target(),
        };

        match target {
            Some(target) if target != current => {
                if !force && self.settings.locked_while_printing && self.ctx.hardware.is_printing() {
                    return Err(Error::PermissionDenied(format!(
                        "Unable to change power for {} while printing",
                        self.name
                    )));
                }
                let state = self.apply_power(driver.as_mut(), target).await?;
                self.process_power_changed().await;
                Ok(state)
            }
            _ => {
                if base != current {
                    self.observed_change().await;
                }
                Ok(current)
            }
        }
    }

    async fn refresh(&self, driver: &mut dyn Driver, origin: Origin) -> PowerState {
        let current = self.state();
        let state = match driver.refresh_status(current).await {
            Ok(state) => state,
            Err(e) => {
                if origin == Origin::Client || self.ctx.verbose {
                    tracing::error!(device = %self.name, error = %e, "Error refreshing device status");
                }
                PowerState::Error
            }
        };
        self.set_state(state);
        state
    }

    /// Switches power; the caller holds the request lock.
    async fn apply_power(&self, driver: &mut dyn Driver, target: PowerState) -> Result<PowerState, Error> {
        self.auto_off_timer.cancel();
        match driver.set_power(target).await {
            Ok(state) => {
                self.set_state(state);
                self.check_auto_off(state);
                Ok(state)
            }
            Err(e) => {
                self.set_state(PowerState::Error);
                tracing::error!(
                    device = %self.name,
                    target = %target,
                    error = %e,
                    "Error setting device power"
                );
                Err(e.into())
            }
        }
    }

    fn set_state(&self, state: PowerState) {
        self.status.lock().state = state;
    }

    fn stamp(&self) {
        self.status.lock().last_update = Some(Instant::now());
    }
}

impl std::fmt::Debug for PowerDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerDevice")
            .field("name", &self.name)
            .field("type", &self.device_type)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Records the update time when a request ends, on every exit path.
struct StampOnDrop<'a>(&'a PowerDevice);

impl Drop for StampOnDrop<'_> {
    fn drop(&mut self) {
        self.0.stamp();
    }
}
