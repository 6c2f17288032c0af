// ── API-to-domain type conversions ──
//
// Bridges raw `plantsip_api::models` responses into `crate::model`
// snapshots: clamps percentages, rounds millilitre amounts, orders
// channels and parses the loosely-formatted timestamps.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use plantsip_api::models::{ChannelStatus, DeviceInfo, StatusResponse};

use crate::model::{ChannelReading, DeviceStatus, RemoteDevice};

// ── Helpers ────────────────────────────────────────────────────────

fn clamp_pct(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Round to whole millilitres; negative or non-finite amounts are dropped.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
fn to_ml(value: Option<f64>) -> Option<u32> {
    value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round().min(f64::from(u32::MAX)) as u32)
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

// ── Devices ───────────────────────────────────────────────────────

impl From<DeviceInfo> for RemoteDevice {
    fn from(info: DeviceInfo) -> Self {
        Self {
            device_id: info.device_id.trim().to_owned(),
            name: info.name.trim().to_owned(),
        }
    }
}

// ── Channels ───────────────────────────────────────────────────────

fn channel_reading(channel_id: u32, raw: &ChannelStatus) -> ChannelReading {
    ChannelReading {
        channel_id,
        moisture_pct: clamp_pct(raw.moisture_level),
        last_watered: raw.last_watered.as_deref().and_then(|s| {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                debug!(channel = channel_id, value = s, "unparseable last_watered");
            }
            parsed
        }),
        last_watering_amount_ml: to_ml(raw.last_watering_amount),
        manual_water_amount_ml: to_ml(raw.manual_water_amount),
        automatic_water_amount_ml: to_ml(raw.automatic_water_amount),
        stale: false,
    }
}

// ── Status ─────────────────────────────────────────────────────────

impl From<StatusResponse> for DeviceStatus {
    fn from(raw: StatusResponse) -> Self {
        let mut channels: Vec<ChannelReading> = raw
            .channels
            .iter()
            .filter_map(|(key, ch)| match key.trim().parse::<u32>() {
                Ok(id) => Some(channel_reading(id, ch)),
                Err(_) => {
                    debug!(key = %key, "ignoring non-numeric channel key");
                    None
                }
            })
            .collect();
        channels.sort_by_key(|c| c.channel_id);

        DeviceStatus {
            water_level_pct: clamp_pct(raw.water_level),
            battery_voltage_v: if raw.battery_voltage.is_finite() {
                raw.battery_voltage.max(0.0)
            } else {
                0.0
            },
            battery_level_pct: clamp_pct(raw.battery_level),
            power_supply_connected: raw.power_supply_connected,
            battery_charging: raw.battery_charging,
            firmware_version: raw.firmware_version,
            channels,
            fetched_at: Utc::now(),
            stale: false,
        }
    }
}
