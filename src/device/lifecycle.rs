// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bring-up, polling, external state reports and teardown.

use std::sync::{Arc, Weak};
use std::time::Duration;

use super::{Origin, PowerDevice, StampOnDrop};
use crate::driver::{Driver, Initialization};
use crate::error::Error;
use crate::types::{PowerAction, PowerState};

/// Pause between bring-up attempts of an unreachable device.
const INIT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// How long `stop_polling` waits for an in-flight poll to finish.
const POLL_STOP_GRACE: Duration = Duration::from_secs(1);

impl PowerDevice {
    /// Validates bound services and schedules the driver's bring-up.
    ///
    /// Returns whether the device is not in the error state at the time the
    /// bring-up was scheduled. The bring-up itself may still be running.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a bound service is unknown to the
    /// host or is the host's own service.
    pub fn initialize(self: &Arc<Self>) -> Result<bool, Error> {
        self.validate_bound_services()?;
        self.spawn_report_listener();

        if self.initialization != Initialization::External {
            let device = Arc::clone(self);
            let strategy = self.initialization;
            let task = tokio::spawn(async move { device.run_initializer(strategy).await });
            if let Some(previous) = self.init_task.lock().replace(task) {
                previous.abort();
            }
        }
        Ok(self.state() != PowerState::Error)
    }

    fn validate_bound_services(&self) -> Result<(), Error> {
        let services = &self.settings.bound_services;
        if services.is_empty() {
            return Ok(());
        }
        let available = self.ctx.services.available_services();
        let own = self.ctx.services.own_unit_name();
        for service in services {
            if own.as_deref() == Some(service.as_str()) {
                return Err(Error::Configuration(format!(
                    "Power Device {}: Cannot bind to host service {service}",
                    self.name
                )));
            }
            if !available.contains(service) {
                return Err(Error::Configuration(format!(
                    "Bound Service {service} is not available"
                )));
            }
        }
        tracing::info!(device = %self.name, services = %services.join(", "), "Device bound to services");
        Ok(())
    }

    async fn run_initializer(self: Arc<Self>, strategy: Initialization) {
        let mut driver = self.driver.lock().await;
        match strategy {
            Initialization::RetryUntilReady => {
                self.await_ready(driver.as_mut()).await;
                self.set_initial_state(driver.as_mut()).await;
                self.notify_power_changed();
                self.stamp();
                self.start_polling();
            }
            Initialization::RefreshOnce => {
                self.refresh(driver.as_mut(), Origin::Client).await;
                self.set_initial_state(driver.as_mut()).await;
                self.notify_power_changed();
                self.stamp();
                self.start_polling();
            }
            Initialization::ApplyInitial => {
                let _stamp = StampOnDrop(&self);
                let target = self.settings.initial_state.unwrap_or(PowerState::Off);
                if self.apply_power(driver.as_mut(), target).await.is_ok()
                    && self.settings.initial_state.is_some()
                {
                    self.process_bound_services().await;
                }
            }
            Initialization::External => {}
        }
    }

    /// Refreshes until the device reports on or off.
    ///
    /// A failure is logged only when its kind or message differs from the
    /// previous one.
    async fn await_ready(&self, driver: &mut dyn Driver) {
        let mut last_error: Option<(&'static str, String)> = None;
        loop {
            match driver.refresh_status(self.state()).await {
                Ok(state) if state.is_known() => {
                    self.set_state(state);
                    return;
                }
                Ok(state) => {
                    let key = ("not_ready", state.to_string());
                    if last_error.as_ref() != Some(&key) {
                        tracing::warn!(device = %self.name, state = %state, "Device not ready");
                        last_error = Some(key);
                    }
                }
                Err(e) => {
                    let key = (e.kind(), e.to_string());
                    if last_error.as_ref() != Some(&key) {
                        tracing::warn!(device = %self.name, error = %e, "Device init error");
                        last_error = Some(key);
                    }
                }
            }
            tokio::time::sleep(INIT_RETRY_INTERVAL).await;
        }
    }

    async fn set_initial_state(&self, driver: &mut dyn Driver) {
        let state = self.state();
        let Some(initial) = self.settings.initial_state else {
            return;
        };
        if !state.is_known() {
            return;
        }
        if initial != state {
            tracing::info!(device = %self.name, state = %initial, "Setting initial state");
            if self.apply_power(driver, initial).await.is_err() {
                tracing::info!(device = %self.name, "Error setting initial state");
                return;
            }
        }
        self.process_bound_services().await;
    }

    fn spawn_report_listener(self: &Arc<Self>) {
        let Some(mut reports) = self.reports.lock().take() else {
            return;
        };
        let device = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(state) = reports.recv().await {
                let Some(device) = device.upgrade() else {
                    break;
                };
                device.apply_reported_state(state);
            }
        });
        *self.report_task.lock() = Some(task);
    }

    fn apply_reported_state(self: &Arc<Self>, state: PowerState) {
        let in_request = self.is_busy();
        let last = {
            let mut status = self.status.lock();
            let last = status.state;
            status.state = state;
            status.last_update = Some(tokio::time::Instant::now());
            last
        };
        if in_request || last == state || last == PowerState::Init {
            return;
        }
        tracing::info!(device = %self.name, state = %state, "External power event detected");
        let device = Arc::clone(self);
        tokio::spawn(async move { device.notify_external_change().await });
    }

    /// Runs the observed-change rule for a state reported by the driver.
    pub async fn notify_external_change(&self) {
        let _driver = self.driver.lock().await;
        let _stamp = StampOnDrop(self);
        self.observed_change().await;
    }

    /// Starts the background status poller.
    ///
    /// Returns false if no poll interval is configured or a poller is
    /// already running.
    pub fn start_polling(self: &Arc<Self>) -> bool {
        let mut poll = self.poll.lock();
        if poll.interval.is_none() || poll.task.is_some() {
            return false;
        }
        poll.task = Some(tokio::spawn(poll_device(Arc::downgrade(self))));
        true
    }

    /// Returns true while the background poller is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poll
            .lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stops the background poller.
    ///
    /// An in-flight poll request may finish first; it is given a short grace
    /// period before the poller is aborted.
    pub async fn stop_polling(&self) {
        let task = {
            let mut poll = self.poll.lock();
            let Some(task) = poll.task.take() else {
                return;
            };
            if !self.is_busy() {
                task.abort();
                return;
            }
            poll.interval = None;
            task
        };
        let abort = task.abort_handle();
        if tokio::time::timeout(POLL_STOP_GRACE, task).await.is_err() {
            tracing::debug!(device = %self.name, "Poller did not stop in time, aborting");
            abort.abort();
        }
    }

    /// Tears the device down: aborts the bring-up, cancels timers and stops
    /// polling.
    pub async fn close(&self) {
        if let Some(task) = self.init_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.report_task.lock().take() {
            task.abort();
        }
        self.auto_off_timer.cancel();
        self.shutdown_timer.cancel();
        self.restart_timer.cancel();
        self.stop_polling().await;
        tracing::debug!(device = %self.name, "Device closed");
    }

    fn poll_interval(&self) -> Option<Duration> {
        self.poll.lock().interval
    }
}

async fn poll_device(device: Weak<PowerDevice>) {
    loop {
        let wait = {
            let Some(device) = device.upgrade() else {
                return;
            };
            let Some(interval) = device.poll_interval() else {
                return;
            };
            let elapsed = device.last_update().map(|at| at.elapsed());
            match elapsed {
                Some(elapsed) if elapsed < interval => interval - elapsed,
                _ => {
                    // Failures are recorded in the device state
                    let _ = device
                        .run_request(PowerAction::Status, false, Origin::Poll)
                        .await;
                    match device.poll_interval() {
                        Some(interval) => interval,
                        None => return,
                    }
                }
            }
        };
        tokio::time::sleep(wait).await;
    }
}
