//! Shared helpers for command handlers.

use std::path::PathBuf;

use plantsip_config::{Config, load_config_from};
use plantsip_core::{CoreConfig, Device, PollingCoordinator};

use crate::cli::GlobalOpts;
use crate::error::{CliError, prompt_err};

/// Config file selected by `--config` / `PLANTSIP_CONFIG`, else the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(plantsip_config::config_path)
}

pub struct Loaded {
    pub path: PathBuf,
    pub config: Config,
    pub core: CoreConfig,
}

pub fn load(global: &GlobalOpts) -> Result<Loaded, CliError> {
    let path = config_path(global);
    let config = load_config_from(&path)?;
    let core = config.to_core_config()?;
    Ok(Loaded { path, config, core })
}

impl Loaded {
    /// Resolve one device by id or unique prefix.
    pub fn device(&self, needle: &str) -> Result<Device, CliError> {
        let (id, profile) = self.config.find_device(needle)?;
        Ok(self.config.resolve_device(&id.to_string(), profile)?)
    }

    /// Every configured device; an empty config is an error.
    pub fn all_devices(&self) -> Result<Vec<Device>, CliError> {
        let devices = self.config.resolve_devices()?;
        if devices.is_empty() {
            return Err(CliError::NoDevices {
                path: self.path.display().to_string(),
            });
        }
        Ok(devices)
    }

    /// A coordinator tracking `devices`, not yet started.
    pub fn coordinator(&self, devices: &[Device]) -> Result<PollingCoordinator, CliError> {
        let coordinator = PollingCoordinator::new(self.core.clone());
        for device in devices {
            coordinator.add_device(device)?;
        }
        Ok(coordinator)
    }
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(prompt_err)
}
