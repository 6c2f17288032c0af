// ── Onboarding state machine ──
//
// Flow: SelectHost → SelectAuthMethod → EnterCredentials | EnterApiKey
//       → Validating (list appliances) → [SelectDevice] → Validating
//       → Complete | Aborted
//
// `transition` is pure: it never touches the network or the registry.
// Anything that needs I/O is returned as an `Effect`; the driver runs it
// and feeds the outcome back in as an `Event`.

use secrecy::{ExposeSecret, SecretString};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;
use url::Url;

use crate::error::{CoreError, ErrorKind};
use crate::model::{Credentials, Device, DeviceId, RemoteDevice};

// ── Inputs ──────────────────────────────────────────────────────────

/// How the user wants to authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AuthMethod {
    Credentials,
    ApiKey,
}

/// Values the user submits, one variant per step.
#[derive(Debug)]
pub enum Input {
    Host {
        use_default_server: bool,
        host: Option<String>,
    },
    AuthMethod(AuthMethod),
    Credentials {
        username: String,
        password: SecretString,
    },
    ApiKey(SecretString),
    /// Server device id or name of one of the listed appliances.
    Device(String),
}

/// What the user entered on the host step, kept across re-entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostForm {
    pub use_default_server: bool,
    pub host: String,
}

impl Default for HostForm {
    fn default() -> Self {
        Self {
            use_default_server: true,
            host: String::new(),
        }
    }
}

// ── Errors shown to the user ────────────────────────────────────────

/// Error attached to a step. `code()` is the stable key a host maps to
/// localized text; `Display` is a plain English fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum FlowError {
    #[error("A host is required when not using the default server")]
    CustomHostRequired,
    #[error("The host is not a valid http(s) URL")]
    InvalidHost,
    #[error("Cannot connect to the host")]
    CannotConnectHost,
    #[error("Timed out connecting to the host")]
    TimeoutConnectHost,
    #[error("Username and password are required")]
    EmptyCredentials,
    #[error("Invalid username or password")]
    InvalidAuthCredentials,
    #[error("Cannot connect to the server")]
    CannotConnect,
    #[error("The server failed to issue an API key")]
    ApiErrorCredentials,
    #[error("An API key is required")]
    EmptyApiKey,
    #[error("The API key was rejected")]
    InvalidApiKey,
    #[error("The server failed to check the API key")]
    ApiErrorKeyTest,
    #[error("No appliances are registered to this account")]
    NoDevices,
    #[error("No listed appliance matches the selection")]
    UnknownDevice,
    #[error("This device is already configured")]
    AlreadyConfigured,
    #[error("Unexpected error")]
    Unknown,
}

impl FlowError {
    pub fn code(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AbortReason {
    AlreadyConfigured,
    Cancelled,
}

// ── States ──────────────────────────────────────────────────────────

/// The interactive step a key came from; `Validating` falls back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Credentials,
    ApiKey,
}

#[derive(Debug, Clone)]
pub enum OnboardingState {
    SelectHost {
        form: HostForm,
        error: Option<FlowError>,
    },
    SelectAuthMethod {
        host: Url,
        error: Option<FlowError>,
    },
    EnterCredentials {
        host: Url,
        error: Option<FlowError>,
    },
    EnterApiKey {
        host: Url,
        error: Option<FlowError>,
    },
    SelectDevice {
        host: Url,
        api_key: SecretString,
        source: KeySource,
        devices: Vec<RemoteDevice>,
        error: Option<FlowError>,
    },
    /// Listing appliances (`selected` is `None`), then checking and
    /// persisting the chosen one.
    Validating {
        host: Url,
        api_key: SecretString,
        source: KeySource,
        selected: Option<RemoteDevice>,
    },
    Complete {
        device: Device,
    },
    Aborted {
        reason: AbortReason,
    },
}

impl Default for OnboardingState {
    fn default() -> Self {
        Self::SelectHost {
            form: HostForm::default(),
            error: None,
        }
    }
}

impl OnboardingState {
    pub fn error(&self) -> Option<FlowError> {
        match self {
            Self::SelectHost { error, .. }
            | Self::SelectAuthMethod { error, .. }
            | Self::EnterCredentials { error, .. }
            | Self::EnterApiKey { error, .. }
            | Self::SelectDevice { error, .. } => *error,
            Self::Aborted {
                reason: AbortReason::AlreadyConfigured,
            } => Some(FlowError::AlreadyConfigured),
            Self::Validating { .. } | Self::Complete { .. } | Self::Aborted { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Aborted { .. })
    }

    /// Short step name for logs and prompts.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectHost { .. } => "select_host",
            Self::SelectAuthMethod { .. } => "select_auth_method",
            Self::EnterCredentials { .. } => "enter_credentials",
            Self::EnterApiKey { .. } => "enter_api_key",
            Self::SelectDevice { .. } => "select_device",
            Self::Validating { .. } => "validating",
            Self::Complete { .. } => "complete",
            Self::Aborted { .. } => "aborted",
        }
    }
}

// ── Events and effects ──────────────────────────────────────────────

#[derive(Debug)]
pub enum Event {
    User(Input),
    Cancel,
    HostProbed {
        host: Url,
        result: Result<(), CoreError>,
    },
    CredentialsExchanged(Result<SecretString, CoreError>),
    ApiKeyProbed {
        api_key: SecretString,
        result: Result<(), CoreError>,
    },
    DevicesListed(Result<Vec<RemoteDevice>, CoreError>),
    ExistingChecked(Result<bool, CoreError>),
    Persisted(Result<Device, CoreError>),
}

#[derive(Debug)]
pub enum Effect {
    ProbeHost {
        host: Url,
    },
    ExchangeCredentials {
        host: Url,
        credentials: Credentials,
    },
    ProbeApiKey {
        host: Url,
        api_key: SecretString,
    },
    ListDevices {
        host: Url,
        api_key: SecretString,
    },
    CheckExisting {
        device_id: DeviceId,
    },
    Persist {
        host: Url,
        api_key: SecretString,
        device: RemoteDevice,
    },
}

/// Static inputs to the transition function.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub default_host: Url,
}

// ── Transition ──────────────────────────────────────────────────────

/// Compute the next state for `event`, plus the effect to run (if any).
///
/// Events that do not belong to the current state leave it unchanged.
#[allow(clippy::too_many_lines)]
pub fn transition(
    state: OnboardingState,
    event: Event,
    settings: &FlowSettings,
) -> (OnboardingState, Option<Effect>) {
    use OnboardingState as S;

    if state.is_terminal() {
        return (state, None);
    }

    match (state, event) {
        (_, Event::Cancel) => (
            S::Aborted {
                reason: AbortReason::Cancelled,
            },
            None,
        ),

        // ── SelectHost ───────────────────────────────────────────────
        (
            S::SelectHost { .. },
            Event::User(Input::Host {
                use_default_server,
                host,
            }),
        ) => submit_host(use_default_server, host.unwrap_or_default(), settings),

        (S::SelectHost { form, .. }, Event::HostProbed { host, result }) => match result {
            Ok(()) => (S::SelectAuthMethod { host, error: None }, None),
            Err(e) => {
                let error = match e.kind() {
                    ErrorKind::Connection | ErrorKind::Api => FlowError::CannotConnectHost,
                    ErrorKind::Timeout => FlowError::TimeoutConnectHost,
                    ErrorKind::Validation => FlowError::InvalidHost,
                    ErrorKind::InvalidCredentials | ErrorKind::Auth | ErrorKind::Unknown => {
                        FlowError::Unknown
                    }
                };
                (
                    S::SelectHost {
                        form,
                        error: Some(error),
                    },
                    None,
                )
            }
        },

        // ── SelectAuthMethod ─────────────────────────────────────────
        (S::SelectAuthMethod { host, .. }, Event::User(Input::AuthMethod(method))) => {
            let next = match method {
                AuthMethod::Credentials => S::EnterCredentials { host, error: None },
                AuthMethod::ApiKey => S::EnterApiKey { host, error: None },
            };
            (next, None)
        }

        // ── EnterCredentials ─────────────────────────────────────────
        (S::EnterCredentials { host, .. }, Event::User(Input::Credentials { username, password })) => {
            if username.trim().is_empty() || password.expose_secret().is_empty() {
                return (
                    S::EnterCredentials {
                        host,
                        error: Some(FlowError::EmptyCredentials),
                    },
                    None,
                );
            }
            let effect = Effect::ExchangeCredentials {
                host: host.clone(),
                credentials: Credentials::new(username, password),
            };
            (S::EnterCredentials { host, error: None }, Some(effect))
        }

        (S::EnterCredentials { host, .. }, Event::CredentialsExchanged(result)) => match result {
            Ok(api_key) => validate(host, api_key, KeySource::Credentials),
            Err(e) => {
                let error = match e.kind() {
                    ErrorKind::InvalidCredentials | ErrorKind::Auth => {
                        FlowError::InvalidAuthCredentials
                    }
                    ErrorKind::Connection | ErrorKind::Timeout => FlowError::CannotConnect,
                    ErrorKind::Api => FlowError::ApiErrorCredentials,
                    ErrorKind::Validation => FlowError::EmptyCredentials,
                    ErrorKind::Unknown => FlowError::Unknown,
                };
                (
                    S::EnterCredentials {
                        host,
                        error: Some(error),
                    },
                    None,
                )
            }
        },

        // ── EnterApiKey ──────────────────────────────────────────────
        (S::EnterApiKey { host, .. }, Event::User(Input::ApiKey(api_key))) => {
            let trimmed = api_key.expose_secret().trim();
            if trimmed.is_empty() {
                return (
                    S::EnterApiKey {
                        host,
                        error: Some(FlowError::EmptyApiKey),
                    },
                    None,
                );
            }
            let effect = Effect::ProbeApiKey {
                host: host.clone(),
                api_key: SecretString::from(trimmed.to_owned()),
            };
            (S::EnterApiKey { host, error: None }, Some(effect))
        }

        (S::EnterApiKey { host, .. }, Event::ApiKeyProbed { api_key, result }) => match result {
            Ok(()) => validate(host, api_key, KeySource::ApiKey),
            Err(e) => {
                let error = match e.kind() {
                    ErrorKind::Auth => FlowError::InvalidApiKey,
                    ErrorKind::Connection | ErrorKind::Timeout => FlowError::CannotConnect,
                    ErrorKind::Api => FlowError::ApiErrorKeyTest,
                    ErrorKind::Validation | ErrorKind::InvalidCredentials | ErrorKind::Unknown => {
                        FlowError::Unknown
                    }
                };
                (
                    S::EnterApiKey {
                        host,
                        error: Some(error),
                    },
                    None,
                )
            }
        },

        // ── Validating: appliance listing ────────────────────────────
        (
            S::Validating {
                host,
                api_key,
                source,
                selected: None,
            },
            Event::DevicesListed(result),
        ) => match result {
            Ok(mut devices) => match devices.len() {
                0 => (back_to(source, host, FlowError::NoDevices), None),
                1 => select(host, api_key, source, devices.remove(0)),
                _ => (
                    S::SelectDevice {
                        host,
                        api_key,
                        source,
                        devices,
                        error: None,
                    },
                    None,
                ),
            },
            Err(e) => (back_to(source, host, listing_error(source, e.kind())), None),
        },

        // ── SelectDevice ─────────────────────────────────────────────
        (
            S::SelectDevice {
                host,
                api_key,
                source,
                devices,
                ..
            },
            Event::User(Input::Device(needle)),
        ) => match find_device(&devices, &needle).cloned() {
            Some(device) => select(host, api_key, source, device),
            None => (
                S::SelectDevice {
                    host,
                    api_key,
                    source,
                    devices,
                    error: Some(FlowError::UnknownDevice),
                },
                None,
            ),
        },

        // ── Validating: identity check and persist ───────────────────
        (
            S::Validating {
                host,
                api_key,
                source,
                selected: Some(device),
            },
            Event::ExistingChecked(result),
        ) => match result {
            Ok(true) => (
                S::Aborted {
                    reason: AbortReason::AlreadyConfigured,
                },
                None,
            ),
            Ok(false) => {
                let effect = Effect::Persist {
                    host: host.clone(),
                    api_key: api_key.clone(),
                    device: device.clone(),
                };
                (
                    S::Validating {
                        host,
                        api_key,
                        source,
                        selected: Some(device),
                    },
                    Some(effect),
                )
            }
            Err(_) => (back_to(source, host, FlowError::Unknown), None),
        },

        (S::Validating { host, source, .. }, Event::Persisted(result)) => match result {
            Ok(device) => (S::Complete { device }, None),
            Err(CoreError::AlreadyConfigured { .. }) => (
                S::Aborted {
                    reason: AbortReason::AlreadyConfigured,
                },
                None,
            ),
            Err(_) => (back_to(source, host, FlowError::Unknown), None),
        },

        // ── Anything else is ignored ─────────────────────────────────
        (state, _) => (state, None),
    }
}

fn submit_host(
    use_default_server: bool,
    host: String,
    settings: &FlowSettings,
) -> (OnboardingState, Option<Effect>) {
    let form = HostForm {
        use_default_server,
        host,
    };
    let raw = if form.use_default_server {
        settings.default_host.as_str()
    } else if form.host.trim().is_empty() {
        return (
            OnboardingState::SelectHost {
                form,
                error: Some(FlowError::CustomHostRequired),
            },
            None,
        );
    } else {
        form.host.as_str()
    };

    match plantsip_api::normalize_host(raw) {
        Ok(host) => (
            OnboardingState::SelectHost { form, error: None },
            Some(Effect::ProbeHost { host }),
        ),
        Err(_) => (
            OnboardingState::SelectHost {
                form,
                error: Some(FlowError::InvalidHost),
            },
            None,
        ),
    }
}

fn validate(
    host: Url,
    api_key: SecretString,
    source: KeySource,
) -> (OnboardingState, Option<Effect>) {
    let effect = Effect::ListDevices {
        host: host.clone(),
        api_key: api_key.clone(),
    };
    (
        OnboardingState::Validating {
            host,
            api_key,
            source,
            selected: None,
        },
        Some(effect),
    )
}

fn select(
    host: Url,
    api_key: SecretString,
    source: KeySource,
    device: RemoteDevice,
) -> (OnboardingState, Option<Effect>) {
    let device_id = DeviceId::derive(&host, &device.device_id);
    (
        OnboardingState::Validating {
            host,
            api_key,
            source,
            selected: Some(device),
        },
        Some(Effect::CheckExisting { device_id }),
    )
}

/// Exact server id first, then a case-insensitive name that matches once.
fn find_device<'a>(devices: &'a [RemoteDevice], needle: &str) -> Option<&'a RemoteDevice> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    if let Some(device) = devices.iter().find(|d| d.device_id == needle) {
        return Some(device);
    }
    let mut named = devices
        .iter()
        .filter(|d| d.name.trim().eq_ignore_ascii_case(needle));
    match (named.next(), named.next()) {
        (Some(device), None) => Some(device),
        _ => None,
    }
}

/// A failed listing is reported on the step the key came from.
fn listing_error(source: KeySource, kind: ErrorKind) -> FlowError {
    match (kind, source) {
        (ErrorKind::Auth | ErrorKind::InvalidCredentials, KeySource::Credentials) => {
            FlowError::InvalidAuthCredentials
        }
        (ErrorKind::Auth | ErrorKind::InvalidCredentials, KeySource::ApiKey) => {
            FlowError::InvalidApiKey
        }
        (ErrorKind::Connection | ErrorKind::Timeout, _) => FlowError::CannotConnect,
        (ErrorKind::Api, KeySource::Credentials) => FlowError::ApiErrorCredentials,
        (ErrorKind::Api, KeySource::ApiKey) => FlowError::ApiErrorKeyTest,
        (ErrorKind::Validation | ErrorKind::Unknown, _) => FlowError::Unknown,
    }
}

fn back_to(source: KeySource, host: Url, error: FlowError) -> OnboardingState {
    match source {
        KeySource::Credentials => OnboardingState::EnterCredentials {
            host,
            error: Some(error),
        },
        KeySource::ApiKey => OnboardingState::EnterApiKey {
            host,
            error: Some(error),
        },
    }
}
