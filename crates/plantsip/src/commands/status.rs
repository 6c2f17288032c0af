//! `status`: one refresh cycle across the selected devices, then print.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;

use plantsip_core::{ChannelReading, DeviceStatus};

use crate::cli::{GlobalOpts, OutputFormat, StatusArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct StatusEntry {
    device_id: String,
    name: String,
    host: String,
    status: Option<Arc<DeviceStatus>>,
    error: Option<String>,
}

#[derive(Tabled)]
struct ChannelRow {
    #[tabled(rename = "Channel")]
    channel: u32,
    #[tabled(rename = "Moisture")]
    moisture: String,
    #[tabled(rename = "Last watered")]
    last_watered: String,
    #[tabled(rename = "Last amount")]
    last_amount: String,
    #[tabled(rename = "Manual")]
    manual: String,
    #[tabled(rename = "Automatic")]
    automatic: String,
}

fn ml(v: Option<u32>) -> String {
    v.map_or_else(|| "-".into(), |v| format!("{v} ml"))
}

impl From<&ChannelReading> for ChannelRow {
    fn from(c: &ChannelReading) -> Self {
        let moisture = format!("{:.0}%", c.moisture_pct);
        Self {
            channel: c.channel_id,
            moisture: if c.stale { format!("{moisture} (stale)") } else { moisture },
            last_watered: c.last_watered.map_or_else(
                || "-".into(),
                |t| t.format("%Y-%m-%d %H:%M").to_string(),
            ),
            last_amount: ml(c.last_watering_amount_ml),
            manual: ml(c.manual_water_amount_ml),
            automatic: ml(c.automatic_water_amount_ml),
        }
    }
}

fn detail(entry: &StatusEntry) -> String {
    let mut out = format!(
        "Device:   {} ({})\nHost:     {}\n",
        entry.name, entry.device_id, entry.host
    );
    match (&entry.status, &entry.error) {
        (Some(s), _) => {
            let _ = writeln!(out, "Firmware: {}", s.firmware_version);
            let _ = writeln!(out, "Water:    {:.0}%", s.water_level_pct);
            let _ = writeln!(
                out,
                "Battery:  {:.0}% ({:.2} V){}",
                s.battery_level_pct,
                s.battery_voltage_v,
                if s.battery_charging { ", charging" } else { "" }
            );
            let _ = writeln!(
                out,
                "Power:    {}",
                if s.power_supply_connected { "connected" } else { "battery" }
            );
            let _ = writeln!(
                out,
                "Updated:  {}{}",
                s.fetched_at.format("%Y-%m-%d %H:%M:%S UTC"),
                if s.stale { " (stale)" } else { "" }
            );
            let rows: Vec<ChannelRow> = s.channels.iter().map(|c| ChannelRow::from(c)).collect();
            out.push_str(&output::render_table(&rows));
        }
        (None, Some(e)) => {
            let _ = write!(out, "Error:    {e}");
        }
        (None, None) => out.push_str("No data"),
    }
    out
}

pub async fn handle(args: StatusArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let loaded = util::load(global)?;
    let devices = match args.device.as_deref() {
        Some(needle) => vec![loaded.device(needle)?],
        None => loaded.all_devices()?,
    };
    let timeout_secs = loaded.core.request_timeout.as_secs();
    let coordinator = loaded.coordinator(&devices)?;

    let outcomes = coordinator.refresh_all().await;

    let mut first_error = None;
    let entries: Vec<StatusEntry> = devices
        .iter()
        .map(|device| {
            let host = device.host().to_string();
            let failure = outcomes
                .iter()
                .find(|o| o.device_id == device.id())
                .and_then(|o| o.error)
                .map(|kind| CliError::from_poll(kind, &host, timeout_secs));
            let error = failure.as_ref().map(ToString::to_string);
            if first_error.is_none() {
                first_error = failure;
            }
            StatusEntry {
                device_id: device.id().to_string(),
                name: device.name().to_owned(),
                status: coordinator.status(&device.id()),
                host,
                error,
            }
        })
        .collect();

    let format = if args.json { OutputFormat::Json } else { global.output };
    let out = match format {
        OutputFormat::Table => entries.iter().map(detail).collect::<Vec<_>>().join("\n\n"),
        OutputFormat::Json => serde_json::to_string_pretty(&entries)?,
        OutputFormat::JsonCompact => serde_json::to_string(&entries)?,
        OutputFormat::Plain => entries
            .iter()
            .map(|e| format!("{} {}", e.device_id, if e.status.is_some() { "ok" } else { "error" }))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    output::print_output(&out, global.quiet);

    // Nothing to show at all: surface the failure as the exit status.
    if entries.iter().all(|e| e.status.is_none()) {
        if let Some(err) = first_error {
            return Err(err);
        }
    }
    Ok(())
}
