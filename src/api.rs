// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request surface of the power manager.
//!
//! Routes endpoint requests to a [`PowerManager`] and returns JSON results.
//! The hosting server decides how requests arrive; the handlers only see a
//! method, an endpoint and the request arguments.
//!
//! | Method     | Endpoint                              | Result                      |
//! |------------|---------------------------------------|-----------------------------|
//! | GET        | `/machine/device_power/devices`       | `{"devices": [DeviceInfo]}` |
//! | GET        | `/machine/device_power/status`        | `{name: state}`             |
//! | POST       | `/machine/device_power/on`            | `{name: state}`             |
//! | POST       | `/machine/device_power/off`           | `{name: state}`             |
//! | GET, POST  | `/machine/device_power/device`        | `{name: state}`             |

use serde_json::{Map, Value, json};

use crate::error::Error;
use crate::manager::PowerManager;
use crate::types::{PowerAction, PowerValue};

const PREFIX: &str = "/machine/device_power/";

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Read request.
    Get,
    /// Write request.
    Post,
}

/// A request addressed to one of the power endpoints.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// The request method.
    pub method: Method,
    /// The full endpoint path.
    pub endpoint: String,
    /// Query or body arguments.
    pub args: Map<String, Value>,
}

impl ApiRequest {
    /// Creates a GET request without arguments.
    #[must_use]
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            endpoint: endpoint.into(),
            args: Map::new(),
        }
    }

    /// Creates a POST request without arguments.
    #[must_use]
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            endpoint: endpoint.into(),
            args: Map::new(),
        }
    }

    /// Adds an argument.
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    fn str_arg(&self, key: &str) -> Result<String, Error> {
        match self.args.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Null) | None => Err(Error::InvalidArgument(format!(
                "No data for argument: {key}"
            ))),
            Some(other) => Ok(other.to_string()),
        }
    }
}

/// Handles a request to one of the power endpoints.
///
/// # Errors
///
/// Returns `Error::NotFound` for an unknown endpoint, method or device,
/// `Error::InvalidArgument` for missing or invalid arguments, or the
/// error of the device request.
pub async fn handle(manager: &PowerManager, request: &ApiRequest) -> Result<Value, Error> {
    let route = request
        .endpoint
        .strip_prefix(PREFIX)
        .ok_or_else(|| unknown_route(request))?;
    tracing::debug!(endpoint = %request.endpoint, method = ?request.method, "Power request");

    match (request.method, route) {
        (Method::Get, "devices") => Ok(json!({ "devices": manager.list_devices() })),
        (Method::Get, "status") => batch(manager, request, PowerAction::Status).await,
        (Method::Post, "on") => batch(manager, request, PowerAction::On).await,
        (Method::Post, "off") => batch(manager, request, PowerAction::Off).await,
        (_, "device") => single(manager, request).await,
        _ => Err(unknown_route(request)),
    }
}

async fn batch(manager: &PowerManager, request: &ApiRequest, action: PowerAction) -> Result<Value, Error> {
    let results = manager.batch_request(request.args.keys().cloned(), action).await?;
    Ok(Value::Object(
        results.into_iter().map(|(name, state)| (name, Value::String(state))).collect(),
    ))
}

async fn single(manager: &PowerManager, request: &ApiRequest) -> Result<Value, Error> {
    let name = request.str_arg("device")?;
    if manager.device(&name).is_none() {
        return Err(Error::NotFound(format!("No valid device named {name}")));
    }
    let action = match request.method {
        Method::Get => PowerAction::Status,
        Method::Post => {
            let requested = request.str_arg("action")?.to_lowercase();
            match requested.parse::<PowerAction>() {
                Ok(action) if !action.is_read_only() => action,
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "Invalid requested action '{requested}'"
                    )));
                }
            }
        }
    };
    let state = manager.single_request(&name, action).await?;
    let mut result = Map::new();
    result.insert(name, Value::String(state.as_str().to_string()));
    Ok(Value::Object(result))
}

fn unknown_route(request: &ApiRequest) -> Error {
    Error::NotFound(format!(
        "No handler for {:?} {}",
        request.method, request.endpoint
    ))
}

/// Handles a remote method call from the supervised hardware.
///
/// Only `set_device_power` is registered. Its arguments are `device`,
/// `state` (bool or string) and an optional `force` flag. The request runs
/// in the background; invalid input is logged and dropped.
///
/// # Errors
///
/// Returns `Error::NotFound` for an unknown method.
pub fn remote_method(manager: &PowerManager, method: &str, args: &Map<String, Value>) -> Result<(), Error> {
    if method != "set_device_power" {
        return Err(Error::NotFound(format!("Unknown remote method: {method}")));
    }
    let Some(device) = args.get("device").and_then(Value::as_str) else {
        tracing::info!("Remote power request without device");
        return Ok(());
    };
    let state = match args.get("state") {
        Some(Value::Bool(on)) => PowerValue::Bool(*on),
        Some(Value::String(text)) => PowerValue::Text(text.clone()),
        other => {
            tracing::info!(device = %device, state = ?other, "Invalid state received");
            return Ok(());
        }
    };
    let force = args.get("force").and_then(Value::as_bool).unwrap_or(false);
    manager.set_device_power(device, state, force);
    Ok(())
}
