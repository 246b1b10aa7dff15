// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tasmota smart plugs over HTTP.
//!
//! Commands go to the device's web API endpoint `/cm?cmnd=<command>`:
//! `Power<id>` reads the relay, `Power<id> on|off` switches it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Driver, parse_options};
use crate::device::DeviceConfig;
use crate::error::{Error, TransportError};
use crate::protocol::HttpClient;
use crate::types::PowerState;

/// A scalar option that may be written as a number or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(serde_json::Number),
    Text(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TasmotaOptions {
    address: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default = "default_protocol")]
    protocol: String,
    #[serde(default = "default_user")]
    user: String,
    #[serde(default)]
    password: String,
    #[serde(default = "default_output_id")]
    output_id: u32,
    #[serde(default)]
    timer: Option<Scalar>,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_user() -> String {
    "admin".to_string()
}

const fn default_output_id() -> u32 {
    1
}

/// Driver for a Tasmota relay output.
///
/// Options: `address` (required), `port`, `protocol` (`http`), `user`
/// (`admin`), `password` (empty), `output_id` (1) and `timer`. With `timer`
/// set, "off" is sent as `Backlog Delay <timer>0; Power<id> off` and the
/// device is assumed off without reading its answer.
#[derive(Debug)]
pub struct TasmotaDriver {
    client: HttpClient,
    base_url: String,
    user: String,
    password: String,
    output_id: u32,
    timer: Option<String>,
}

impl TasmotaDriver {
    /// Builds the driver from the device's options.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if `address` is missing or an option
    /// has the wrong type.
    pub fn from_config(config: &DeviceConfig) -> Result<Self, Error> {
        let options: TasmotaOptions = parse_options(config)?;
        let client = HttpClient::new()
            .map_err(|e| Error::Configuration(format!("cannot create HTTP client: {e}")))?;
        Ok(Self::with_client(options, client))
    }

    fn with_client(options: TasmotaOptions, client: HttpClient) -> Self {
        let address = options
            .address
            .trim_matches('/')
            .split('/')
            .map(|part| urlencoding::encode(part).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let base_url = match options.port {
            Some(port) => format!("{}://{address}:{port}", options.protocol),
            None => format!("{}://{address}", options.protocol),
        };
        Self {
            client,
            base_url,
            user: options.user,
            password: options.password,
            output_id: options.output_id,
            timer: options.timer.map(Scalar::into_string).filter(|t| !t.is_empty()),
        }
    }

    /// Returns the URL prefix commands are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn command_url(&self, command: &str) -> String {
        format!(
            "{}/cm?user={}&password={}&cmnd={}",
            self.base_url,
            urlencoding::encode(&self.user),
            urlencoding::encode(&self.password),
            urlencoding::encode(command)
        )
    }

    fn power_command(&self, state: PowerState) -> String {
        let command = format!("Power{} {}", self.output_id, state.as_str());
        match &self.timer {
            Some(timer) if state == PowerState::Off => format!("Backlog Delay {timer}0; {command}"),
            _ => command,
        }
    }

    async fn send(&self, command: &str) -> Result<Value, TransportError> {
        tracing::debug!(command = %command, "Sending Tasmota command");
        self.client.get_json(&self.command_url(command)).await
    }

    /// Reads `POWER<id>`, falling back to `POWER` for the first output.
    fn parse_state(&self, body: &Value) -> Result<PowerState, TransportError> {
        let key = format!("POWER{}", self.output_id);
        let value = body
            .get(&key)
            .or_else(|| (self.output_id == 1).then(|| body.get("POWER")).flatten())
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::InvalidResponse(format!("missing {key} in {body}")))?;
        match value.to_lowercase().as_str() {
            "on" => Ok(PowerState::On),
            "off" => Ok(PowerState::Off),
            other => Err(TransportError::InvalidResponse(format!(
                "unexpected power value '{other}'"
            ))),
        }
    }
}

#[async_trait]
impl Driver for TasmotaDriver {
    async fn refresh_status(&mut self, _current: PowerState) -> Result<PowerState, TransportError> {
        let body = self.send(&format!("Power{}", self.output_id)).await?;
        self.parse_state(&body)
    }

    async fn set_power(&mut self, state: PowerState) -> Result<PowerState, TransportError> {
        let body = self.send(&self.power_command(state)).await?;
        if self.timer.is_some() && state == PowerState::Off {
            return Ok(PowerState::Off);
        }
        self.parse_state(&body)
    }
}
