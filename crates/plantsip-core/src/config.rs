// ── Runtime configuration ──
//
// Tuning knobs for onboarding, polling and dispatch. The CLI builds a
// `CoreConfig` (usually from plantsip-config) and hands it in; the core
// never reads files.

use std::time::Duration;

use url::Url;

use plantsip_api::{TlsMode, TransportConfig};

/// Public PlantSip server used when the user does not pick a custom host.
pub const DEFAULT_SERVER_URL: &str = "https://api.plantsip.de";

/// Label the server stores next to keys issued by credential exchange.
pub const DEFAULT_API_KEY_NAME: &str = "PlantSip Controller";

/// Largest watering amount the appliance accepts, in millilitres.
pub const DEFAULT_MAX_WATER_AMOUNT_ML: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Host offered as "use the default server" during onboarding.
    pub default_host: Url,
    /// Total bound for one request (connect + response).
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub tls: TlsMode,
    /// Regular refresh cadence per device.
    pub poll_interval: Duration,
    /// First retry delay after a failed poll; doubles per failure.
    /// Defaults to the poll interval so a failing device is never polled
    /// more often than a healthy one.
    pub retry_base: Duration,
    /// Upper bound for the retry delay.
    pub retry_max: Duration,
    /// Consecutive connection failures before a device is reported unreachable.
    pub failure_threshold: u32,
    pub max_water_amount_ml: u32,
    pub api_key_name: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_host: Url::parse(DEFAULT_SERVER_URL).expect("default server URL is valid"),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            tls: TlsMode::System,
            poll_interval: Duration::from_secs(120),
            retry_base: Duration::from_secs(120),
            retry_max: Duration::from_secs(30 * 60),
            failure_threshold: 3,
            max_water_amount_ml: DEFAULT_MAX_WATER_AMOUNT_ML,
            api_key_name: DEFAULT_API_KEY_NAME.into(),
        }
    }
}

impl CoreConfig {
    /// Transport settings for every client the core creates.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self.tls.clone(),
            timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_appliance_limits() {
        let config = CoreConfig::default();
        assert_eq!(config.default_host.as_str(), "https://api.plantsip.de/");
        assert_eq!(config.poll_interval, Duration::from_secs(120));
        assert_eq!(config.max_water_amount_ml, 10_000);
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.transport().timeout, Duration::from_secs(30));
    }

    #[test]
    fn first_retry_is_never_sooner_than_a_regular_poll() {
        let config = CoreConfig::default();
        assert!(config.retry_base >= config.poll_interval);
        assert!(config.retry_max >= config.retry_base);
    }
}
