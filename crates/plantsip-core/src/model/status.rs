// ── Device status snapshots ──
//
// Immutable values. The store replaces a whole snapshot on every commit
// or stale mark; nothing mutates one in place once published.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Latest known state of one appliance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub water_level_pct: f64,
    pub battery_voltage_v: f64,
    pub battery_level_pct: f64,
    pub power_supply_connected: bool,
    pub battery_charging: bool,
    pub firmware_version: String,
    /// Ordered by `channel_id`.
    pub channels: Vec<ChannelReading>,
    pub fetched_at: DateTime<Utc>,
    /// The last refresh failed and this is a cached value.
    pub stale: bool,
}

/// One watering channel within a [`DeviceStatus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelReading {
    pub channel_id: u32,
    pub moisture_pct: f64,
    pub last_watered: Option<DateTime<Utc>>,
    pub last_watering_amount_ml: Option<u32>,
    pub manual_water_amount_ml: Option<u32>,
    pub automatic_water_amount_ml: Option<u32>,
    /// A command touched this channel since the snapshot was fetched.
    pub stale: bool,
}

impl DeviceStatus {
    pub fn channel(&self, channel_id: u32) -> Option<&ChannelReading> {
        self.channels.iter().find(|c| c.channel_id == channel_id)
    }

    /// Copy of this snapshot with the device-level stale flag set.
    pub fn marked_stale(&self) -> Self {
        Self {
            stale: true,
            ..self.clone()
        }
    }

    /// Copy of this snapshot with one channel flagged stale.
    ///
    /// Returns `None` if the channel is not part of the snapshot.
    pub fn with_channel_stale(&self, channel_id: u32) -> Option<Self> {
        self.channel(channel_id)?;
        let mut next = self.clone();
        for channel in &mut next.channels {
            if channel.channel_id == channel_id {
                channel.stale = true;
            }
        }
        Some(next)
    }

    /// True if the device or any channel is flagged stale.
    pub fn any_stale(&self) -> bool {
        self.stale || self.channels.iter().any(|c| c.stale)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample() -> DeviceStatus {
        DeviceStatus {
            water_level_pct: 55.0,
            battery_voltage_v: 3.9,
            battery_level_pct: 80.0,
            power_supply_connected: true,
            battery_charging: false,
            firmware_version: "2.1.0".into(),
            channels: vec![
                ChannelReading {
                    channel_id: 1,
                    moisture_pct: 40.0,
                    last_watered: None,
                    last_watering_amount_ml: Some(100),
                    manual_water_amount_ml: Some(150),
                    automatic_water_amount_ml: None,
                    stale: false,
                },
                ChannelReading {
                    channel_id: 2,
                    moisture_pct: 22.5,
                    last_watered: None,
                    last_watering_amount_ml: None,
                    manual_water_amount_ml: None,
                    automatic_water_amount_ml: None,
                    stale: false,
                },
            ],
            fetched_at: Utc::now(),
            stale: false,
        }
    }

    #[test]
    fn channel_stale_copy_leaves_original_untouched() {
        let status = sample();
        let marked = status.with_channel_stale(2).unwrap();

        assert!(!status.any_stale());
        assert!(marked.channel(2).unwrap().stale);
        assert!(!marked.channel(1).unwrap().stale);
        assert!(!marked.stale);
    }

    #[test]
    fn unknown_channel_yields_none() {
        assert!(sample().with_channel_stale(7).is_none());
    }

    #[test]
    fn marked_stale_sets_device_flag() {
        let marked = sample().marked_stale();
        assert!(marked.stale);
        assert!(marked.any_stale());
    }
}
