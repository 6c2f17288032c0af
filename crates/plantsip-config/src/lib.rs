//! Shared configuration for PlantSip tools.
//!
//! TOML config file, API key resolution (env + keyring + plaintext),
//! translation to `plantsip_core::CoreConfig`, and a file-backed
//! [`DeviceRegistry`] used by onboarding.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use plantsip_core::{
    CoreConfig, CoreError, Device, DeviceId, DeviceRegistry, RemoteDevice, TlsMode,
};

const KEYRING_SERVICE: &str = "plantsip";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no configured device matches '{identifier}'")]
    UnknownDevice { identifier: String },

    #[error("no API key configured for device '{device}'")]
    NoCredentials { device: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        CoreError::Config {
            message: err.to_string(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Configured devices, keyed by device id.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceProfile>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Seconds between regular polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// First retry delay after a failed poll, in seconds. Defaults to the
    /// poll interval.
    #[serde(default = "default_retry_base")]
    pub retry_base: u64,

    #[serde(default = "default_retry_max")]
    pub retry_max: u64,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_max_water_amount")]
    pub max_water_amount: u32,

    #[serde(default = "default_server")]
    pub default_server: String,

    /// Name the server shows for keys created by `setup`.
    #[serde(default = "default_api_key_name")]
    pub api_key_name: String,

    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,

    /// Store new API keys in the system keyring instead of this file.
    #[serde(default = "default_use_keyring")]
    pub use_keyring: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            poll_interval: default_poll_interval(),
            retry_base: default_retry_base(),
            retry_max: default_retry_max(),
            failure_threshold: default_failure_threshold(),
            max_water_amount: default_max_water_amount(),
            default_server: default_server(),
            api_key_name: default_api_key_name(),
            insecure: false,
            ca_cert: None,
            use_keyring: default_use_keyring(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_poll_interval() -> u64 {
    120
}
fn default_retry_base() -> u64 {
    default_poll_interval()
}
fn default_retry_max() -> u64 {
    30 * 60
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_max_water_amount() -> u32 {
    plantsip_core::DEFAULT_MAX_WATER_AMOUNT_ML
}
fn default_server() -> String {
    plantsip_core::DEFAULT_SERVER_URL.into()
}
fn default_api_key_name() -> String {
    plantsip_core::DEFAULT_API_KEY_NAME.into()
}
fn default_use_keyring() -> bool {
    true
}

/// One configured appliance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceProfile {
    /// API host (e.g., "https://api.plantsip.de").
    pub host: String,

    /// Server-assigned appliance id, as listed by `GET /v1/devices`.
    #[serde(default)]
    pub remote_id: String,

    /// Display name reported by the server at setup time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// API key (plaintext, prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    pub created_at: Option<DateTime<Utc>>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "plantsip", "plantsip").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("plantsip");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the default path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path` (missing file = defaults), then apply
/// `PLANTSIP_`-prefixed environment overrides.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PLANTSIP_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to core types ───────────────────────────────────────

impl Config {
    /// Build the runtime `CoreConfig` from `[defaults]`.
    pub fn to_core_config(&self) -> Result<CoreConfig, ConfigError> {
        let d = &self.defaults;

        let default_host = Url::parse(&d.default_server).map_err(|e| ConfigError::Validation {
            field: "defaults.default_server".into(),
            reason: format!("{e}: {}", d.default_server),
        })?;
        if d.timeout == 0 {
            return Err(invalid("defaults.timeout", "must be at least 1 second"));
        }
        if d.poll_interval == 0 {
            return Err(invalid("defaults.poll_interval", "must be at least 1 second"));
        }
        if d.failure_threshold == 0 {
            return Err(invalid("defaults.failure_threshold", "must be at least 1"));
        }
        if d.max_water_amount == 0 {
            return Err(invalid("defaults.max_water_amount", "must be at least 1 ml"));
        }

        let tls = if d.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = d.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else {
            TlsMode::System
        };

        Ok(CoreConfig {
            default_host,
            request_timeout: Duration::from_secs(d.timeout),
            connect_timeout: Duration::from_secs(d.connect_timeout.max(1)),
            tls,
            poll_interval: Duration::from_secs(d.poll_interval),
            retry_base: Duration::from_secs(d.retry_base.max(1)),
            retry_max: Duration::from_secs(d.retry_max.max(d.retry_base).max(1)),
            failure_threshold: d.failure_threshold,
            max_water_amount_ml: d.max_water_amount,
            api_key_name: d.api_key_name.clone(),
        })
    }

    /// Find a device by full id or unique id prefix.
    pub fn find_device(&self, needle: &str) -> Result<(DeviceId, &DeviceProfile), ConfigError> {
        let needle = needle.trim().to_lowercase();
        let mut matches = self
            .devices
            .iter()
            .filter(|(id, _)| id.to_lowercase().starts_with(&needle));

        match (matches.next(), matches.next()) {
            (Some((id, profile)), None) => Ok((parse_device_id(id)?, profile)),
            (None, _) => Err(ConfigError::UnknownDevice {
                identifier: needle.clone(),
            }),
            (Some(_), Some(_)) => Err(invalid(
                "device",
                format!("'{needle}' matches more than one configured device"),
            )),
        }
    }

    /// All configured devices with resolved API keys.
    pub fn resolve_devices(&self) -> Result<Vec<Device>, ConfigError> {
        self.devices
            .iter()
            .map(|(id, profile)| self.resolve_device(id, profile))
            .collect()
    }

    pub fn resolve_device(&self, id: &str, profile: &DeviceProfile) -> Result<Device, ConfigError> {
        let device_id = parse_device_id(id)?;
        let host = Url::parse(&profile.host).map_err(|e| ConfigError::Validation {
            field: format!("devices.{id}.host"),
            reason: format!("{e}: {}", profile.host),
        })?;
        if profile.remote_id.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: format!("devices.{id}.remote_id"),
                reason: "missing; remove the device and run setup again".into(),
            });
        }
        let api_key = resolve_api_key(profile, id, self.defaults.use_keyring)?;
        Ok(Device::restore(
            device_id,
            host,
            RemoteDevice {
                device_id: profile.remote_id.clone(),
                name: profile.name.clone().unwrap_or_default(),
            },
            api_key,
            profile.created_at.unwrap_or_else(Utc::now),
        ))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

fn parse_device_id(id: &str) -> Result<DeviceId, ConfigError> {
    id.parse().map_err(|_| ConfigError::Validation {
        field: "devices".into(),
        reason: format!("'{id}' is not a device id"),
    })
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(device_id: &str) -> Option<keyring::Entry> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{device_id}/api-key")).ok()
}

/// Resolve a device's API key: env var → system keyring → plaintext.
///
/// The keyring is skipped entirely when `use_keyring` is off.
pub fn resolve_api_key(
    profile: &DeviceProfile,
    device_id: &str,
    use_keyring: bool,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's api_key_env → env var lookup
    if let Some(ref env_name) = profile.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Some(entry) = use_keyring.then(|| keyring_entry(device_id)).flatten() {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref key) = profile.api_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        device: device_id.into(),
    })
}

// ── File-backed device registry ─────────────────────────────────────

/// [`DeviceRegistry`] over a config file.
///
/// Every call re-reads the file so concurrent edits are picked up.
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    path: PathBuf,
    use_keyring: bool,
}

impl ConfigRegistry {
    pub fn new(path: PathBuf, use_keyring: bool) -> Self {
        Self { path, use_keyring }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forget a device. Returns `false` if it was not configured.
    pub fn remove(&self, id: &DeviceId) -> Result<bool, ConfigError> {
        let mut cfg = load_config_from(&self.path)?;
        let key = id.to_string();
        if cfg.devices.remove(&key).is_none() {
            return Ok(false);
        }
        save_config_to(&cfg, &self.path)?;

        if self.use_keyring {
            if let Some(entry) = keyring_entry(&key) {
                if let Err(e) = entry.delete_credential() {
                    debug!(device = %key, error = %e, "no keyring entry removed");
                }
            }
        }
        Ok(true)
    }

    /// Store a replacement key for an existing device. The device id,
    /// host and server id are kept.
    pub fn update_api_key(&self, id: &DeviceId, api_key: &SecretString) -> Result<(), ConfigError> {
        let mut cfg = load_config_from(&self.path)?;
        let key = id.to_string();
        let Some(profile) = cfg.devices.get_mut(&key) else {
            return Err(ConfigError::UnknownDevice { identifier: key });
        };
        if let Some(env_name) = profile.api_key_env.take() {
            warn!(device = %key, env = %env_name, "dropping api_key_env so the new key takes effect");
        }
        profile.api_key = self.store_key(&key, api_key);
        save_config_to(&cfg, &self.path)?;
        debug!(device = %key, path = %self.path.display(), "API key replaced");
        Ok(())
    }

    /// Keyring first; returns the plaintext value to write when that fails.
    fn store_key(&self, device_id: &str, api_key: &SecretString) -> Option<String> {
        if self.use_keyring {
            match keyring_entry(device_id).map(|e| e.set_password(api_key.expose_secret())) {
                Some(Ok(())) => return None,
                Some(Err(e)) => {
                    warn!(device = %device_id, error = %e, "keyring unavailable, storing key in config file");
                }
                None => warn!(device = %device_id, "keyring unavailable, storing key in config file"),
            }
        }
        Some(api_key.expose_secret().to_owned())
    }
}

impl DeviceRegistry for ConfigRegistry {
    fn contains(&self, id: &DeviceId) -> Result<bool, CoreError> {
        let cfg = load_config_from(&self.path)?;
        Ok(cfg.devices.contains_key(&id.to_string()))
    }

    fn persist(&self, device: &Device) -> Result<(), CoreError> {
        let mut cfg = load_config_from(&self.path)?;
        let key = device.id().to_string();
        if cfg.devices.contains_key(&key) {
            return Err(CoreError::AlreadyConfigured { device_id: key });
        }

        let api_key = self.store_key(&key, device.api_key());
        cfg.devices.insert(
            key,
            DeviceProfile {
                host: device.host().to_string(),
                remote_id: device.remote_id().to_owned(),
                name: Some(device.name().to_owned()),
                api_key,
                api_key_env: None,
                created_at: Some(device.created_at()),
            },
        );
        save_config_to(&cfg, &self.path)?;
        debug!(device = %device.id(), path = %self.path.display(), "device saved");
        Ok(())
    }
}
