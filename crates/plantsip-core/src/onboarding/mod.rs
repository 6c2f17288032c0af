// ── Onboarding ──
//
// Guided setup of a new device: pick a host, authenticate with
// credentials or an API key, validate, persist.

pub mod flow;
pub mod machine;

pub use flow::{DeviceRegistry, OnboardingFlow};
pub use machine::{
    AbortReason, AuthMethod, Effect, Event, FlowError, FlowSettings, HostForm, Input, KeySource,
    OnboardingState, transition,
};
