// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host collaborators used by power devices.
//!
//! The supervised hardware connection and the OS service manager are owned by
//! the embedding application. Devices only see them through the
//! [`SupervisedHardware`] and [`ServiceManager`] traits, bundled with the
//! notification bus in a [`HostContext`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::event::EventBus;
use crate::manager::PowerSetter;

/// Connection state of the supervised hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HardwareState {
    /// No connection to the hardware.
    #[default]
    Disconnected,
    /// Connected, startup in progress.
    Startup,
    /// Ready to accept work.
    Ready,
    /// Startup finished with an error.
    Error,
    /// The hardware entered its shutdown condition.
    Shutdown,
}

impl HardwareState {
    /// Returns true once the connection has moved past startup.
    #[must_use]
    pub const fn startup_complete(&self) -> bool {
        !matches!(self, Self::Disconnected | Self::Startup)
    }
}

impl fmt::Display for HardwareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Startup => "startup",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Shutdown => "shutdown",
        })
    }
}

/// The supervised hardware (printer firmware connection).
#[async_trait]
pub trait SupervisedHardware: Send + Sync + 'static {
    /// Returns the current connection state.
    fn state(&self) -> HardwareState;

    /// Returns true while a job is actively running.
    fn is_printing(&self) -> bool;

    /// Issues a firmware restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the restart request fails.
    async fn firmware_restart(&self) -> Result<(), Error>;
}

/// Action applied to a bound service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceAction {
    /// Start the service.
    Start,
    /// Stop the service.
    Stop,
}

impl ServiceAction {
    /// Returns the action name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The host's OS service manager.
#[async_trait]
pub trait ServiceManager: Send + Sync + 'static {
    /// Returns the names of services that may be controlled.
    fn available_services(&self) -> Vec<String>;

    /// Returns the unit name of the automation host itself, if known.
    fn own_unit_name(&self) -> Option<String>;

    /// Starts or stops a service.
    ///
    /// # Errors
    ///
    /// Returns an error if the service manager rejects the action.
    async fn service_action(&self, action: ServiceAction, service: &str) -> Result<(), Error>;
}

/// Shared environment handed to every power device.
#[derive(Clone)]
pub struct HostContext {
    pub(crate) hardware: Arc<dyn SupervisedHardware>,
    pub(crate) services: Arc<dyn ServiceManager>,
    pub(crate) events: EventBus,
    pub(crate) setter: PowerSetter,
    pub(crate) verbose: bool,
}

impl HostContext {
    /// Creates a context that is not attached to any manager.
    ///
    /// Timers of devices built with a detached context have no manager to
    /// route their power requests to and only log them.
    #[must_use]
    pub fn detached(
        hardware: Arc<dyn SupervisedHardware>,
        services: Arc<dyn ServiceManager>,
        events: EventBus,
    ) -> Self {
        Self {
            hardware,
            services,
            events,
            setter: PowerSetter::detached(),
            verbose: false,
        }
    }

    /// Enables logging of every refresh failure, including background polls.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Returns the notification bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns the supervised hardware.
    #[must_use]
    pub fn hardware(&self) -> &Arc<dyn SupervisedHardware> {
        &self.hardware
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("hardware_state", &self.hardware.state())
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}
