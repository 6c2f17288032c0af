// plantsip-core: Onboarding, polling and command dispatch on top of plantsip-api.

pub mod backoff;
pub mod config;
pub mod convert;
pub mod coordinator;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod onboarding;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{CoreConfig, DEFAULT_API_KEY_NAME, DEFAULT_MAX_WATER_AMOUNT_ML, DEFAULT_SERVER_URL};
pub use coordinator::{CoordinatorEvent, DeviceHealth, PollOutcome, PollingCoordinator};
pub use credentials::CredentialExchanger;
pub use dispatcher::{Command, CommandDispatcher, WaterAmountMode, WateringCommand};
pub use error::{CoreError, ErrorKind};
pub use onboarding::{
    AbortReason, AuthMethod, DeviceRegistry, FlowError, HostForm, Input, OnboardingFlow,
    OnboardingState,
};
pub use store::{StatusReceiver, StatusStore};

pub use model::{ChannelReading, Credentials, Device, DeviceId, DeviceStatus, RemoteDevice};

// Transport settings callers may need when building a `CoreConfig`.
pub use plantsip_api::TlsMode;
