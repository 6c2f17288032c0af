//! Device command handlers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use plantsip_config::ConfigRegistry;

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct DeviceEntry {
    id: String,
    name: Option<String>,
    remote_id: String,
    host: String,
    key_source: &'static str,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Server ID")]
    remote_id: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Key")]
    key_source: &'static str,
    #[tabled(rename = "Added")]
    created_at: String,
}

impl From<&DeviceEntry> for DeviceRow {
    fn from(d: &DeviceEntry) -> Self {
        Self {
            id: d.id.clone(),
            name: d.name.clone().unwrap_or_else(|| "-".into()),
            remote_id: d.remote_id.clone(),
            host: d.host.clone(),
            key_source: d.key_source,
            created_at: d
                .created_at
                .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M").to_string()),
        }
    }
}

pub fn handle(args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let loaded = util::load(global)?;

    match args.command {
        DevicesCommand::List => {
            let entries: Vec<DeviceEntry> = loaded
                .config
                .devices
                .iter()
                .map(|(id, profile)| DeviceEntry {
                    id: id.clone(),
                    name: profile.name.clone(),
                    remote_id: profile.remote_id.clone(),
                    host: profile.host.clone(),
                    key_source: if profile.api_key_env.is_some() {
                        "env"
                    } else if profile.api_key.is_some() {
                        "config"
                    } else {
                        "keyring"
                    },
                    created_at: profile.created_at,
                })
                .collect();

            let out = output::render_list(
                global.output,
                &entries,
                |d| DeviceRow::from(d),
                |d| d.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Remove { device } => {
            let (id, profile) = loaded.config.find_device(&device)?;
            if !util::confirm(&format!("Remove device {id} ({})?", profile.host), global.yes)? {
                return Ok(());
            }

            let registry = ConfigRegistry::new(loaded.path.clone(), loaded.config.defaults.use_keyring);
            if registry.remove(&id)? {
                tracing::info!(device = %id, "device removed");
                if !global.quiet {
                    eprintln!("Removed device {id}");
                }
            }
            Ok(())
        }
    }
}
