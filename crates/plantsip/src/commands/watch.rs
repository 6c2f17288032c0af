//! `watch`: run the coordinator until Ctrl-C.

use std::collections::HashMap;
use std::time::Duration;

use owo_colors::OwoColorize;
use secrecy::ExposeSecret;
use tokio::sync::broadcast::error::RecvError;

use plantsip_core::{CoordinatorEvent, Device, DeviceId, PollingCoordinator};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

/// How often the config file is re-read for keys replaced by `reauth`.
const KEY_RELOAD_INTERVAL: Duration = Duration::from_secs(10);

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut loaded = util::load(global)?;
    if let Some(interval) = args.interval {
        let interval: Duration = interval.into();
        if interval.is_zero() {
            return Err(CliError::Validation {
                field: "interval".into(),
                reason: "must be greater than zero".into(),
            });
        }
        loaded.core.poll_interval = interval;
    }
    let devices = loaded.all_devices()?;
    let coordinator = loaded.coordinator(&devices)?;
    let color = output::should_color(global.color);
    let mut watched: HashMap<DeviceId, Device> =
        devices.iter().map(|d| (d.id(), d.clone())).collect();
    let mut key_reload = tokio::time::interval(KEY_RELOAD_INTERVAL);
    key_reload.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut events = coordinator.events();
    coordinator.start();
    if !global.quiet {
        eprintln!(
            "Watching {} device(s) every {}. Press Ctrl-C to stop.",
            devices.len(),
            humantime::format_duration(loaded.core.poll_interval)
        );
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = key_reload.tick() => {
                for id in pick_up_new_keys(global, &coordinator, &mut watched) {
                    let line = format!("{} picked up a new API key", id.short());
                    output::print_output(&line, global.quiet);
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let line = describe(&coordinator, &event, color);
                    output::print_output(&line, global.quiet);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

/// Hand replaced keys to devices stuck on a rejected one.
///
/// Returns the devices that got a new key. A config that no longer loads
/// is logged and retried on the next tick.
fn pick_up_new_keys(
    global: &GlobalOpts,
    coordinator: &PollingCoordinator,
    watched: &mut HashMap<DeviceId, Device>,
) -> Vec<DeviceId> {
    let waiting: Vec<DeviceId> = coordinator
        .device_ids()
        .into_iter()
        .filter(|id| coordinator.health(id).is_some_and(|h| h.needs_reauth))
        .collect();
    if waiting.is_empty() {
        return Vec::new();
    }

    let reloaded = util::load(global)
        .and_then(|loaded| loaded.config.resolve_devices().map_err(CliError::from));
    let devices = match reloaded {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!(error = %e, "could not reload config for new API keys");
            return Vec::new();
        }
    };

    let mut updated = Vec::new();
    for fresh in devices.iter().filter(|d| waiting.contains(&d.id())) {
        let id = fresh.id();
        let Some(current) = watched.get_mut(&id) else {
            continue;
        };
        if current.api_key().expose_secret() == fresh.api_key().expose_secret() {
            continue;
        }
        match coordinator.reauthenticate(&id, fresh.api_key()) {
            Ok(()) => {
                current.replace_api_key(fresh.api_key().clone());
                updated.push(id);
            }
            Err(e) => tracing::warn!(device = %id, error = %e, "new API key not applied"),
        }
    }
    updated
}

fn describe(coordinator: &PollingCoordinator, event: &CoordinatorEvent, color: bool) -> String {
    let id = event.device_id().short();
    let now = chrono::Local::now().format("%H:%M:%S");
    let (tag, text) = match event {
        CoordinatorEvent::StatusUpdated { device_id } => {
            let summary = coordinator.status(device_id).map_or_else(
                || "updated".into(),
                |s| {
                    let channels = s
                        .channels
                        .iter()
                        .map(|c| format!("ch{} {:.0}%", c.channel_id, c.moisture_pct))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!(
                        "water {:.0}%, battery {:.0}%, {channels}",
                        s.water_level_pct, s.battery_level_pct
                    )
                },
            );
            ("ok", summary)
        }
        CoordinatorEvent::Recovered { after_failures, .. } => {
            ("ok", format!("reachable again after {after_failures} failed polls"))
        }
        CoordinatorEvent::Unreachable {
            consecutive_failures,
            ..
        } => (
            "warn",
            format!("unreachable ({consecutive_failures} failed polls)"),
        ),
        CoordinatorEvent::ReauthRequired { .. } => (
            "auth",
            format!("API key rejected; run `plantsip reauth {id}`"),
        ),
        CoordinatorEvent::DataUnavailable { message, .. } => ("warn", message.clone()),
    };

    if !color {
        return format!("{now} {id} [{tag}] {text}");
    }
    let tag = match tag {
        "ok" => tag.green().to_string(),
        "auth" => tag.red().to_string(),
        _ => tag.yellow().to_string(),
    };
    format!("{now} {id} [{tag}] {text}")
}
