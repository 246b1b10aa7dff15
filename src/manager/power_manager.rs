// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of power devices.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use crate::device::{DeviceConfig, PowerDevice};
use crate::driver::{Driver, DriverFactory};
use crate::error::Error;
use crate::event::{EventBus, HostEvent, JobQueueEvent};
use crate::host::{HardwareState, HostContext, ServiceManager, SupervisedHardware};
use crate::types::{DeviceInfo, PowerAction, PowerState, PowerValue};

use super::config::PowerConfig;
use super::power_setter::{DeviceMap, PowerSetter};

/// Result value reported for names that match no device.
pub const DEVICE_NOT_FOUND: &str = "device_not_found";

/// Owns every power device and routes requests and host events to them.
///
/// The manager is cheap to clone; clones share the same registry.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use powerhub_lib::driver::DriverFactory;
/// use powerhub_lib::event::EventBus;
/// use powerhub_lib::host::{ServiceManager, SupervisedHardware};
/// use powerhub_lib::manager::{PowerConfig, PowerManager};
/// use powerhub_lib::types::PowerAction;
///
/// # async fn example(
/// #     hardware: Arc<dyn SupervisedHardware>,
/// #     services: Arc<dyn ServiceManager>,
/// # ) -> powerhub_lib::Result<()> {
/// let config = PowerConfig::from_file("power.json")?;
/// let manager = PowerManager::new(hardware, services, EventBus::new())
///     .with_verbose(config.verbose);
/// manager.load(&config, &DriverFactory::with_defaults()).await;
///
/// let state = manager.single_request("printer", PowerAction::On).await?;
/// println!("printer is {state}");
///
/// manager.close_all().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PowerManager {
    devices: Arc<DeviceMap>,
    ctx: HostContext,
}

impl PowerManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(
        hardware: Arc<dyn SupervisedHardware>,
        services: Arc<dyn ServiceManager>,
        events: EventBus,
    ) -> Self {
        let devices = Arc::new(RwLock::new(BTreeMap::new()));
        let ctx = HostContext {
            hardware,
            services,
            events,
            setter: PowerSetter::new(&devices),
            verbose: false,
        };
        Self { devices, ctx }
    }

    /// Enables logging of refresh failures from background polls.
    ///
    /// Applies to devices created after this call.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.ctx.verbose = verbose;
        self
    }

    /// Returns the context handed to devices created by this manager.
    #[must_use]
    pub fn context(&self) -> &HostContext {
        &self.ctx
    }

    /// Returns the notification bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    /// Returns a fire-and-forget setter bound to this manager.
    #[must_use]
    pub fn setter(&self) -> PowerSetter {
        self.ctx.setter.clone()
    }

    // =========================================================================
    // Device Management
    // =========================================================================

    /// Creates a device bound to this manager without registering it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid.
    pub fn create_device(
        &self,
        config: &DeviceConfig,
        driver: Box<dyn Driver>,
    ) -> Result<Arc<PowerDevice>, Error> {
        PowerDevice::new(config, driver, self.ctx.clone())
    }

    /// Initializes and registers a device under its name.
    ///
    /// A device whose initialization reports failure is logged and not
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyExists` if the name is taken, or
    /// `Error::Configuration` if the device's bound services are invalid.
    pub async fn add_device(&self, device: Arc<PowerDevice>) -> Result<(), Error> {
        let name = device.name().to_string();
        if self.devices.read().contains_key(&name) {
            return Err(Error::AlreadyExists(format!("Device [{name}] already configured")));
        }
        if !device.initialize()? {
            tracing::warn!(device = %name, "Power device failed to initialize");
            device.close().await;
            return Ok(());
        }
        let rejected = match self.devices.write().entry(name.clone()) {
            Entry::Occupied(_) => Some(device),
            Entry::Vacant(slot) => {
                slot.insert(device);
                None
            }
        };
        if let Some(device) = rejected {
            device.close().await;
            return Err(Error::AlreadyExists(format!("Device [{name}] already configured")));
        }
        tracing::debug!(device = %name, "Power device registered");
        Ok(())
    }

    /// Builds, initializes and registers every configured device.
    ///
    /// A device that fails to build or has invalid bound services is logged
    /// and skipped; the others still load. Returns the number of devices
    /// registered.
    pub async fn load(&self, config: &PowerConfig, factory: &DriverFactory) -> usize {
        let mut loaded = 0;
        for (name, device_config) in &config.devices {
            let mut device_config = device_config.clone();
            device_config.name.clone_from(name);

            let device = match factory
                .build(&device_config)
                .and_then(|driver| self.create_device(&device_config, driver))
            {
                Ok(device) => device,
                Err(e) => {
                    tracing::warn!(device = %name, error = %e, "Failed to load power device");
                    continue;
                }
            };

            match device.initialize() {
                Ok(true) => {}
                Ok(false) => tracing::warn!(device = %name, "Power device failed to initialize"),
                Err(e) => {
                    tracing::warn!(device = %name, error = %e, "Failed to load power device");
                    device.close().await;
                    continue;
                }
            }
            let previous = self.devices.write().insert(name.clone(), device);
            if let Some(previous) = previous {
                tracing::warn!(device = %name, "Replacing already registered power device");
                previous.close().await;
            }
            loaded += 1;
        }
        tracing::info!(count = loaded, "Power devices loaded");
        loaded
    }

    /// Returns the device registered under `name`.
    #[must_use]
    pub fn device(&self, name: &str) -> Option<Arc<PowerDevice>> {
        self.devices.read().get(name).cloned()
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    /// Closes every device concurrently.
    ///
    /// Returns the names of devices whose teardown did not complete.
    pub async fn close_all(&self) -> Vec<String> {
        let devices: Vec<Arc<PowerDevice>> = self.devices.read().values().cloned().collect();
        let mut tasks = JoinSet::new();
        for device in devices {
            tasks.spawn(async move {
                device.close().await;
                device.name().to_string()
            });
        }
        let mut closed = Vec::new();
        let mut failed = 0usize;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(name) => closed.push(name),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(error = %e, "Error closing power device");
                }
            }
        }
        if failed == 0 {
            return Vec::new();
        }
        self.devices
            .read()
            .keys()
            .filter(|name| !closed.contains(name))
            .cloned()
            .collect()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Returns the info of every device, ordered by name.
    #[must_use]
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.devices.read().values().map(|device| device.info()).collect()
    }

    /// Runs `action` on every named device in turn.
    ///
    /// Unknown names map to `device_not_found`; a request that fails maps to
    /// its error message.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if no names were given.
    pub async fn batch_request<I, S>(
        &self,
        names: I,
        action: PowerAction,
    ) -> Result<BTreeMap<String, String>, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(Error::InvalidArgument("No arguments provided".to_string()));
        }
        let mut results = BTreeMap::new();
        for name in names {
            let result = match self.device(&name) {
                Some(device) => match device.process_request(action, false).await {
                    Ok(state) => state.as_str().to_string(),
                    Err(e) => {
                        tracing::debug!(device = %name, error = %e, "Batch power request failed");
                        e.to_string()
                    }
                },
                None => DEVICE_NOT_FOUND.to_string(),
            };
            results.insert(name, result);
        }
        Ok(results)
    }

    /// Runs `action` on one device.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no device has that name, or the error of
    /// the request itself.
    pub async fn single_request(&self, name: &str, action: PowerAction) -> Result<PowerState, Error> {
        let device = self
            .device(name)
            .ok_or_else(|| Error::NotFound(format!("No valid device named {name}")))?;
        device.process_request(action, false).await
    }

    /// Requests power for a device in the background.
    ///
    /// See [`PowerSetter::set_device_power`].
    pub fn set_device_power(&self, device: &str, state: impl Into<PowerValue>, force: bool) {
        self.ctx.setter.set_device_power(device, state, force);
    }

    // =========================================================================
    // Host Events
    // =========================================================================

    /// Forwards a supervised-hardware shutdown to every device.
    pub fn handle_shutdown(&self) {
        for device in self.snapshot() {
            device.process_shutdown();
        }
    }

    /// Forwards the supervised-hardware started event to every device.
    pub fn handle_hardware_started(&self, state: HardwareState) {
        for device in self.snapshot() {
            device.handle_hardware_started(state);
        }
    }

    // Devices may call back into the registry, so the read guard must be
    // released before dispatching.
    fn snapshot(&self) -> Vec<Arc<PowerDevice>> {
        self.devices.read().values().cloned().collect()
    }

    /// Powers on every device configured to follow the job queue.
    ///
    /// Only `jobs_added` changes have an effect.
    pub async fn handle_job_queue_changed(&self, event: &JobQueueEvent) {
        if !event.is_jobs_added() {
            return;
        }
        let devices: Vec<Arc<PowerDevice>> = self
            .devices
            .read()
            .values()
            .filter(|device| device.should_turn_on_when_queued())
            .cloned()
            .collect();
        for device in devices {
            tracing::info!(
                device = %device.name(),
                job = %event.first_job_name(),
                "Job queued, powering on"
            );
            if let Err(e) = device.process_request(PowerAction::On, false).await {
                tracing::warn!(device = %device.name(), error = %e, "Failed to power on for queued job");
            }
        }
    }

    /// Dispatches one host event.
    pub async fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::Shutdown => self.handle_shutdown(),
            HostEvent::Started(state) => self.handle_hardware_started(state),
            HostEvent::JobQueueChanged(queue) => self.handle_job_queue_changed(&queue).await,
        }
    }

    /// Dispatches host events from `events` until the channel closes.
    pub fn spawn_event_listener(&self, mut events: broadcast::Receiver<HostEvent>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => manager.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Host event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Host event listener stopped");
        })
    }
}
