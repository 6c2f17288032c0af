// Wire types for the PlantSip REST API.
//
// These mirror the JSON exactly (snake_case, loose numeric types).
// Normalization into domain types happens in plantsip-core.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Body of `POST /v1/auth/api-keys`.
#[derive(Debug, Serialize)]
pub struct ApiKeyRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    /// Label the server shows next to the issued key.
    pub name: &'a str,
}

/// Response of `POST /v1/auth/api-keys`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyResponse {
    #[serde(default)]
    pub api_key: String,
}

/// One entry of `GET /v1/devices`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceInfo {
    /// Server-assigned id used in every `/v1/device/{device_id}/...` path.
    #[serde(deserialize_with = "string_or_number")]
    pub device_id: String,
    #[serde(default)]
    pub name: String,
}

/// Response of `GET /v1/device/{device_id}/status/latest`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub water_level: f64,
    pub battery_voltage: f64,
    pub battery_level: f64,
    pub power_supply_connected: bool,
    pub battery_charging: bool,
    pub firmware_version: String,
    /// Keyed by the decimal channel number (`"1"`, `"2"`, ...).
    #[serde(default)]
    pub channels: HashMap<String, ChannelStatus>,
}

/// Per-channel entry in [`StatusResponse::channels`].
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelStatus {
    pub moisture_level: f64,
    /// ISO-8601, with or without offset (naive values are UTC).
    pub last_watered: Option<String>,
    pub last_watering_amount: Option<f64>,
    pub manual_water_amount: Option<f64>,
    pub automatic_water_amount: Option<f64>,
}

/// Body of `POST /v1/device/{device_id}/channel/{channel_id}/water`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WateringRequest {
    pub water_amount: u32,
}

/// Body of `PATCH /v1/device/{device_id}/channel/{channel_id}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_water_amount: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_water_amount: Option<u32>,
}

/// Error body shape returned by the API on non-2xx responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

// Some server builds send numeric ids.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number device_id, got {other}"
        ))),
    }
}
