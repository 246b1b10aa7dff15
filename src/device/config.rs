// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Power device configuration.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Error;
use crate::types::PowerState;

const DEFAULT_RESTART_DELAY: f64 = 1.0;
const MIN_POLL_INTERVAL: f64 = 1.0;
const MIN_DELAY: f64 = 0.000_001;

/// Configuration of one power device, as written by the user.
///
/// Durations are given in seconds. Keys that are not device policy options
/// are collected in [`options`](Self::options) and handed to the driver.
///
/// # Examples
///
/// ```
/// use powerhub_lib::device::DeviceConfig;
///
/// let config = DeviceConfig::new("printer", "tasmota")
///     .with_option("address", "192.168.1.20")
///     .with_locked_while_printing(true)
///     .with_bound_services(["klipper"]);
///
/// let settings = config.settings().unwrap();
/// assert!(settings.locked_while_printing);
/// assert_eq!(settings.bound_services, vec!["klipper".to_string()]);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// The device name; filled from the configuration key when loading.
    #[serde(default)]
    pub name: String,
    /// The driver type tag.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Refuse non-forced power changes while a job is printing.
    #[serde(default)]
    pub locked_while_printing: bool,
    /// Power off when the supervised hardware shuts down.
    #[serde(default)]
    pub off_when_shutdown: bool,
    /// Delay before the shutdown power-off.
    #[serde(default)]
    pub off_when_shutdown_delay: f64,
    /// Restart the supervised hardware firmware after powering on.
    #[serde(default, alias = "restart_when_powered")]
    pub restart_klipper_when_powered: bool,
    /// Delay before the firmware restart.
    #[serde(default = "default_restart_delay")]
    pub restart_delay: f64,
    /// Services started and stopped together with the device.
    #[serde(default)]
    pub bound_services: Vec<String>,
    /// Single bound service (deprecated form of `bound_services`).
    #[serde(default)]
    pub bound_service: Option<String>,
    /// Power on when jobs are added to the queue.
    #[serde(default, alias = "on_when_upload_queued")]
    pub on_when_job_queued: bool,
    /// State applied once the device has been brought up.
    #[serde(default)]
    pub initial_state: Option<bool>,
    /// Only notify, without side effects, when an external change is observed.
    #[serde(default = "default_true")]
    pub restrict_action_processing: bool,
    /// Interval between background status checks.
    #[serde(default)]
    pub poll_interval: Option<f64>,
    /// Turn the device off this long after it was switched on.
    #[serde(default)]
    pub auto_off: Option<f64>,
    /// Driver-specific options.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

fn default_restart_delay() -> f64 {
    DEFAULT_RESTART_DELAY
}

fn default_true() -> bool {
    true
}

impl DeviceConfig {
    /// Creates a configuration with default policy options.
    #[must_use]
    pub fn new(name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_type: device_type.into(),
            locked_while_printing: false,
            off_when_shutdown: false,
            off_when_shutdown_delay: 0.0,
            restart_klipper_when_powered: false,
            restart_delay: DEFAULT_RESTART_DELAY,
            bound_services: Vec::new(),
            bound_service: None,
            on_when_job_queued: false,
            initial_state: None,
            restrict_action_processing: true,
            poll_interval: None,
            auto_off: None,
            options: Map::new(),
        }
    }

    /// Sets a driver option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Sets whether power changes are refused while printing.
    #[must_use]
    pub fn with_locked_while_printing(mut self, locked: bool) -> Self {
        self.locked_while_printing = locked;
        self
    }

    /// Enables the shutdown power-off after `delay` seconds.
    #[must_use]
    pub fn with_off_when_shutdown(mut self, delay: f64) -> Self {
        self.off_when_shutdown = true;
        self.off_when_shutdown_delay = delay;
        self
    }

    /// Enables the firmware restart after `delay` seconds once powered on.
    #[must_use]
    pub fn with_restart_when_powered(mut self, delay: f64) -> Self {
        self.restart_klipper_when_powered = true;
        self.restart_delay = delay;
        self
    }

    /// Sets the bound services.
    #[must_use]
    pub fn with_bound_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bound_services = services.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether the device turns on when jobs are queued.
    #[must_use]
    pub fn with_on_when_job_queued(mut self, enabled: bool) -> Self {
        self.on_when_job_queued = enabled;
        self
    }

    /// Sets the initial state.
    #[must_use]
    pub fn with_initial_state(mut self, on: bool) -> Self {
        self.initial_state = Some(on);
        self
    }

    /// Sets whether external changes only notify.
    #[must_use]
    pub fn with_restrict_actions(mut self, restrict: bool) -> Self {
        self.restrict_action_processing = restrict;
        self
    }

    /// Sets the poll interval in seconds.
    #[must_use]
    pub fn with_poll_interval(mut self, seconds: f64) -> Self {
        self.poll_interval = Some(seconds);
        self
    }

    /// Sets the auto-off delay in seconds.
    #[must_use]
    pub fn with_auto_off(mut self, seconds: f64) -> Self {
        self.auto_off = Some(seconds);
        self
    }

    /// Validates the policy options and resolves them into [`DeviceSettings`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the name is empty or a duration is
    /// out of range.
    pub fn settings(&self) -> Result<DeviceSettings, Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("device name must not be empty".into()));
        }

        let off_when_shutdown_delay = if self.off_when_shutdown {
            self.seconds("off_when_shutdown_delay", self.off_when_shutdown_delay, 0.0)?
        } else {
            Duration::ZERO
        };

        let restart_delay = if self.restart_klipper_when_powered {
            self.seconds_above("restart_delay", self.restart_delay)?
        } else {
            Duration::from_secs_f64(DEFAULT_RESTART_DELAY)
        };

        let poll_interval = self
            .poll_interval
            .map(|secs| self.seconds("poll_interval", secs, MIN_POLL_INTERVAL))
            .transpose()?;

        let auto_off = self
            .auto_off
            .map(|secs| self.seconds_above("auto_off", secs))
            .transpose()?;

        Ok(DeviceSettings {
            locked_while_printing: self.locked_while_printing,
            off_when_shutdown: self.off_when_shutdown,
            off_when_shutdown_delay,
            restart_when_powered: self.restart_klipper_when_powered,
            restart_delay,
            bound_services: self.normalized_services(),
            on_when_queued: self.on_when_job_queued,
            initial_state: self.initial_state.map(PowerState::from),
            restrict_actions: self.restrict_action_processing,
            poll_interval,
            auto_off,
        })
    }

    fn normalized_services(&self) -> Vec<String> {
        let mut services: Vec<String> = Vec::new();
        for svc in self.bound_services.iter().chain(self.bound_service.iter()) {
            let svc = svc.trim();
            let svc = svc.strip_suffix(".service").unwrap_or(svc);
            if svc.is_empty() || services.iter().any(|s| s == svc) {
                continue;
            }
            services.push(svc.to_string());
        }
        services
    }

    fn seconds(&self, option: &str, value: f64, min: f64) -> Result<Duration, Error> {
        if !value.is_finite() || value < min {
            return Err(Error::Configuration(format!(
                "option '{option}' of device '{}' must be at least {min}, got {value}",
                self.name
            )));
        }
        self.duration(option, value)
    }

    fn seconds_above(&self, option: &str, value: f64) -> Result<Duration, Error> {
        if !value.is_finite() || value < MIN_DELAY {
            return Err(Error::Configuration(format!(
                "option '{option}' of device '{}' must be above 0.0, got {value}",
                self.name
            )));
        }
        self.duration(option, value)
    }

    fn duration(&self, option: &str, value: f64) -> Result<Duration, Error> {
        Duration::try_from_secs_f64(value).map_err(|e| {
            Error::Configuration(format!(
                "option '{option}' of device '{}' is out of range: {e}",
                self.name
            ))
        })
    }
}

/// Validated policy options of a power device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    /// Refuse non-forced power changes while printing.
    pub locked_while_printing: bool,
    /// Power off when the supervised hardware shuts down.
    pub off_when_shutdown: bool,
    /// Delay before the shutdown power-off; zero means immediately.
    pub off_when_shutdown_delay: Duration,
    /// Restart the supervised hardware firmware after powering on.
    pub restart_when_powered: bool,
    /// Delay before the firmware restart.
    pub restart_delay: Duration,
    /// Bound services, normalized and deduplicated, in configuration order.
    pub bound_services: Vec<String>,
    /// Power on when jobs are queued.
    pub on_when_queued: bool,
    /// Desired state after bring-up.
    pub initial_state: Option<PowerState>,
    /// Only notify on externally observed changes.
    pub restrict_actions: bool,
    /// Interval between background status checks.
    pub poll_interval: Option<Duration>,
    /// Auto-off delay.
    pub auto_off: Option<Duration>,
}
