// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `PowerHub` library.
//!
//! [`Error`] is what callers of the manager and the request surface see.
//! [`TransportError`] is what drivers return; the device engine converts it
//! into the `error` power state and, for explicit power changes, into
//! [`Error::Transport`].

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A device could not be built from its configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The named device does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A request argument was missing or invalid.
    #[error("{0}")]
    InvalidArgument(String),

    /// The request was refused by a safety policy.
    #[error("{0}")]
    PermissionDenied(String),

    /// A device with the same name is already registered.
    #[error("{0}")]
    AlreadyExists(String),

    /// Error occurred while talking to a device.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error occurred during value parsing.
    #[error("value error: {0}")]
    Value(#[from] ValueError),
}

impl Error {
    /// Returns the status code reported by the request surface.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidArgument(_) | Self::Value(_) => 400,
            Self::PermissionDenied(_) => 403,
            Self::NotFound(_) => 404,
            Self::AlreadyExists(_) => 409,
            Self::Configuration(_) => 500,
            Self::Transport(TransportError::NotConnected | TransportError::Disconnected) => 503,
            Self::Transport(_) => 500,
        }
    }
}

/// Errors related to value parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// An invalid power state string was provided.
    #[error("invalid power state: {0}")]
    InvalidPowerState(String),

    /// An unsupported power request was provided.
    #[error("unsupported power request: {0}")]
    InvalidAction(String),
}

/// Errors reported by device drivers and transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// MQTT client operation failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the device failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Waiting for the device timed out.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// The transport disconnected while a request was pending.
    #[error("disconnected")]
    Disconnected,

    /// The device answered with something that cannot be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The device rejected the command.
    #[error("command failed: {0}")]
    Command(String),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl TransportError {
    /// Returns a short name for the error kind, used to deduplicate logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            #[cfg(feature = "http")]
            Self::Http(_) => "http",
            #[cfg(feature = "mqtt")]
            Self::Mqtt(_) => "mqtt",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::Timeout(_) => "timeout",
            Self::NotConnected => "not_connected",
            Self::Disconnected => "disconnected",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Command(_) => "command",
            Self::ChannelClosed(_) => "channel_closed",
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
