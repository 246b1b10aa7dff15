// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Side effects of power changes and host events.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::PowerDevice;
use crate::event::PowerEvent;
use crate::host::{HardwareState, HostContext, ServiceAction};
use crate::types::PowerState;

impl PowerDevice {
    /// Publishes `power:power_changed` with the current device info.
    pub fn notify_power_changed(&self) {
        self.ctx.events.publish(PowerEvent::PowerChanged(self.info()));
    }

    /// Handles a state change that was observed rather than requested.
    pub(super) async fn observed_change(&self) {
        if self.settings.restrict_actions {
            self.notify_power_changed();
        } else {
            self.process_power_changed().await;
        }
    }

    /// Runs the full side effects of a power change.
    pub(super) async fn process_power_changed(&self) {
        self.notify_power_changed();
        if !self.settings.bound_services.is_empty() {
            self.process_bound_services().await;
        }
        if self.state() == PowerState::On && self.settings.restart_when_powered {
            self.need_scheduled_restart.store(true, Ordering::Release);
            let hardware = self.ctx.hardware.state();
            // Before startup completes the restart waits for the started event
            if !hardware.startup_complete() {
                return;
            }
            self.schedule_firmware_restart(hardware);
        }
    }

    /// Starts or stops every bound service to match the current state.
    ///
    /// Failures are logged and the remaining services are still processed.
    pub(super) async fn process_bound_services(&self) {
        let state = self.state();
        if self.settings.bound_services.is_empty() || !state.is_known() {
            return;
        }
        let action = if state == PowerState::On {
            ServiceAction::Start
        } else {
            ServiceAction::Stop
        };
        for service in &self.settings.bound_services {
            tracing::info!(
                device = %self.name,
                service = %service,
                action = %action,
                "Performing action on bound service"
            );
            if let Err(e) = self.ctx.services.service_action(action, service).await {
                tracing::error!(
                    device = %self.name,
                    service = %service,
                    action = %action,
                    error = %e,
                    "Error processing bound service action"
                );
            }
        }
    }

    /// Forwards the supervised hardware's started event.
    pub fn handle_hardware_started(&self, state: HardwareState) {
        if self.settings.restart_when_powered {
            self.schedule_firmware_restart(state);
        }
    }

    fn schedule_firmware_restart(&self, state: HardwareState) {
        if !self.need_scheduled_restart.swap(false, Ordering::AcqRel) {
            return;
        }
        if state == HardwareState::Ready {
            tracing::info!(device = %self.name, "Hardware reports ready, aborting firmware restart");
            return;
        }
        tracing::info!(
            device = %self.name,
            delay_secs = self.settings.restart_delay.as_secs_f64(),
            "Scheduling firmware restart"
        );
        let hardware = Arc::clone(&self.ctx.hardware);
        let name = self.name.clone();
        self.restart_timer.arm(self.settings.restart_delay, async move {
            if let Err(e) = hardware.firmware_restart().await {
                tracing::error!(device = %name, error = %e, "Firmware restart failed");
            }
        });
    }

    /// Reacts to the supervised hardware entering its shutdown condition.
    ///
    /// With a delay configured, a newer shutdown event re-arms the timer.
    /// The power-off is skipped if the hardware recovered in the meantime.
    pub fn process_shutdown(&self) {
        if !self.settings.off_when_shutdown {
            return;
        }
        let delay = self.settings.off_when_shutdown_delay;
        if delay.is_zero() {
            power_off_on_shutdown(&self.name, &self.ctx);
            return;
        }
        let name = self.name.clone();
        let ctx = self.ctx.clone();
        self.shutdown_timer.arm(delay, async move {
            power_off_on_shutdown(&name, &ctx);
        });
    }

    /// Arms the auto-off timer after power landed on `state`.
    pub(super) fn check_auto_off(&self, state: PowerState) {
        let Some(delay) = self.settings.auto_off else {
            return;
        };
        if state != PowerState::On {
            return;
        }
        let name = self.name.clone();
        let setter = self.ctx.setter.clone();
        self.auto_off_timer.arm(delay, async move {
            tracing::debug!(device = %name, "Auto-off timer fired");
            setter.set_device_power(&name, "off", false);
        });
    }
}

fn power_off_on_shutdown(name: &str, ctx: &HostContext) {
    let state = ctx.hardware.state();
    if state != HardwareState::Shutdown {
        tracing::debug!(device = %name, hardware = %state, "Hardware recovered, skipping shutdown power off");
        return;
    }
    tracing::info!(device = %name, "Powering off device due to hardware shutdown");
    ctx.setter.set_device_power(name, "off", false);
}
