// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Power-related types.
//!
//! [`PowerState`] is the observable state of a device, [`PowerAction`] is what
//! a caller asks for, and [`PowerValue`] is the loosely typed input accepted by
//! the fire-and-forget setter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Represents the power state of a device.
///
/// `Init` is the only valid starting value. `Error` is sticky until a
/// successful refresh or set.
///
/// # Examples
///
/// ```
/// use powerhub_lib::types::PowerState;
///
/// assert_eq!(PowerState::On.as_str(), "on");
/// assert_eq!("OFF".parse::<PowerState>().unwrap(), PowerState::Off);
/// assert!(PowerState::Off.is_known());
/// assert!(!PowerState::Init.is_known());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    /// The device has not reported a state yet.
    #[default]
    Init,
    /// Power is on.
    On,
    /// Power is off.
    Off,
    /// The last refresh or set failed.
    Error,
}

impl PowerState {
    /// Returns the lowercase string used on the request surface.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::On => "on",
            Self::Off => "off",
            Self::Error => "error",
        }
    }

    /// Returns true for `On` and `Off`.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        matches!(self, Self::On | Self::Off)
    }

    /// Returns the opposite power state; anything that is not `Off` toggles to `Off`.
    #[must_use]
    pub const fn toggled(&self) -> Self {
        match self {
            Self::Off => Self::On,
            _ => Self::Off,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "init" => Ok(Self::Init),
            "error" => Ok(Self::Error),
            _ => Err(ValueError::InvalidPowerState(s.to_string())),
        }
    }
}

impl From<bool> for PowerState {
    fn from(value: bool) -> Self {
        if value { Self::On } else { Self::Off }
    }
}

/// A power request against a device.
///
/// # Examples
///
/// ```
/// use powerhub_lib::types::PowerAction;
///
/// assert_eq!("toggle".parse::<PowerAction>().unwrap(), PowerAction::Toggle);
/// assert!(PowerAction::Status.is_read_only());
/// assert!("blink".parse::<PowerAction>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerAction {
    /// Refresh and report the current state.
    Status,
    /// Turn the device on.
    On,
    /// Turn the device off.
    Off,
    /// Invert the freshly refreshed state.
    Toggle,
}

impl PowerAction {
    /// Returns the lowercase request name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::On => "on",
            Self::Off => "off",
            Self::Toggle => "toggle",
        }
    }

    /// Returns true if the action never changes power.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        matches!(self, Self::Status)
    }

    /// Returns the target state for `On`/`Off`.
    #[must_use]
    pub const fn target(&self) -> Option<PowerState> {
        match self {
            Self::On => Some(PowerState::On),
            Self::Off => Some(PowerState::Off),
            Self::Status | Self::Toggle => None,
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerAction {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "status" => Ok(Self::Status),
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "toggle" => Ok(Self::Toggle),
            _ => Err(ValueError::InvalidAction(s.to_string())),
        }
    }
}

impl From<PowerState> for PowerAction {
    /// Maps `On` to `On` and everything else to `Off`.
    fn from(state: PowerState) -> Self {
        if state == PowerState::On {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// Input accepted by the fire-and-forget power setter.
///
/// Booleans map to on/off. Strings are case-insensitive and accept
/// `on`, `off`, `toggle`, `true` and `false`.
///
/// # Examples
///
/// ```
/// use powerhub_lib::types::{PowerAction, PowerValue};
///
/// assert_eq!(PowerValue::from(true).to_action(), Ok(PowerAction::On));
/// assert_eq!(PowerValue::from("TRUE").to_action(), Ok(PowerAction::On));
/// assert_eq!(PowerValue::from("Toggle").to_action(), Ok(PowerAction::Toggle));
/// assert!(PowerValue::from("status").to_action().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PowerValue {
    /// A boolean on/off value.
    Bool(bool),
    /// A textual request.
    Text(String),
}

impl PowerValue {
    /// Resolves the value into a write action.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidPowerState` for anything other than
    /// on/off/toggle/true/false.
    pub fn to_action(&self) -> Result<PowerAction, ValueError> {
        match self {
            Self::Bool(value) => Ok(PowerAction::from(PowerState::from(*value))),
            Self::Text(text) => match text.to_lowercase().as_str() {
                "on" | "true" => Ok(PowerAction::On),
                "off" | "false" => Ok(PowerAction::Off),
                "toggle" => Ok(PowerAction::Toggle),
                _ => Err(ValueError::InvalidPowerState(text.clone())),
            },
        }
    }
}

impl From<bool> for PowerValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for PowerValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PowerValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<PowerAction> for PowerValue {
    fn from(action: PowerAction) -> Self {
        Self::Text(action.as_str().to_string())
    }
}
