// ── Onboarding driver ──
//
// Owns the current state, feeds user input through `machine::transition`
// and executes the resulting effects until the machine is idle again.

use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, info};
use url::Url;

use plantsip_api::{PlantSipClient, TransportConfig};

use super::machine::{self, Effect, Event, FlowSettings, Input, OnboardingState};
use crate::config::CoreConfig;
use crate::credentials::CredentialExchanger;
use crate::error::CoreError;
use crate::model::{Device, DeviceId, RemoteDevice};

/// Upper bound for the host reachability check.
const HOST_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where completed devices are recorded.
///
/// Implemented by the configuration layer; the flow only needs an
/// existence check and a write.
pub trait DeviceRegistry: Send + Sync {
    fn contains(&self, id: &DeviceId) -> Result<bool, CoreError>;

    fn persist(&self, device: &Device) -> Result<(), CoreError>;
}

impl<R: DeviceRegistry + ?Sized> DeviceRegistry for &R {
    fn contains(&self, id: &DeviceId) -> Result<bool, CoreError> {
        (**self).contains(id)
    }

    fn persist(&self, device: &Device) -> Result<(), CoreError> {
        (**self).persist(device)
    }
}

pub struct OnboardingFlow<R> {
    state: OnboardingState,
    settings: FlowSettings,
    transport: TransportConfig,
    exchanger: CredentialExchanger,
    registry: R,
}

impl<R: DeviceRegistry> OnboardingFlow<R> {
    pub fn new(config: &CoreConfig, registry: R) -> Self {
        Self {
            state: OnboardingState::default(),
            settings: FlowSettings {
                default_host: config.default_host.clone(),
            },
            transport: config.transport(),
            exchanger: CredentialExchanger::new(config),
            registry,
        }
    }

    pub fn state(&self) -> &OnboardingState {
        &self.state
    }

    pub fn default_host(&self) -> &Url {
        &self.settings.default_host
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Submit input for the current step and run it to the next resting state.
    pub async fn submit(&mut self, input: Input) -> &OnboardingState {
        self.run(Event::User(input)).await;
        &self.state
    }

    pub fn cancel(&mut self) -> &OnboardingState {
        let (next, _) = machine::transition(
            std::mem::take(&mut self.state),
            Event::Cancel,
            &self.settings,
        );
        self.state = next;
        info!("onboarding cancelled");
        &self.state
    }

    /// Consume the flow, returning the device if onboarding completed.
    pub fn into_device(self) -> Option<Device> {
        match self.state {
            OnboardingState::Complete { device } => Some(device),
            _ => None,
        }
    }

    async fn run(&mut self, event: Event) {
        let mut event = event;
        loop {
            let from = self.state.name();
            let (next, effect) =
                machine::transition(std::mem::take(&mut self.state), event, &self.settings);
            self.state = next;
            debug!(from, to = self.state.name(), error = ?self.state.error(), "onboarding step");

            let Some(effect) = effect else { break };
            event = self.execute(effect).await;
        }

        match &self.state {
            OnboardingState::Complete { device } => {
                info!(
                    device = %device.id(),
                    remote_id = device.remote_id(),
                    host = %device.host(),
                    "onboarding complete"
                );
            }
            OnboardingState::Aborted { reason } => info!(%reason, "onboarding aborted"),
            _ => {}
        }
    }

    async fn execute(&self, effect: Effect) -> Event {
        match effect {
            Effect::ProbeHost { host } => {
                let result = self.probe_host(&host).await;
                Event::HostProbed { host, result }
            }
            Effect::ExchangeCredentials { host, credentials } => {
                Event::CredentialsExchanged(self.exchanger.exchange(&host, credentials).await)
            }
            Effect::ProbeApiKey { host, api_key } => {
                let result = self.probe_api_key(&host, &api_key).await;
                Event::ApiKeyProbed { api_key, result }
            }
            Effect::ListDevices { host, api_key } => {
                Event::DevicesListed(self.list_devices(&host, &api_key).await)
            }
            Effect::CheckExisting { device_id } => {
                Event::ExistingChecked(self.registry.contains(&device_id))
            }
            Effect::Persist {
                host,
                api_key,
                device,
            } => {
                let device = Device::new(host, device, api_key);
                Event::Persisted(self.registry.persist(&device).map(|()| device))
            }
        }
    }

    async fn probe_host(&self, host: &Url) -> Result<(), CoreError> {
        let transport = self
            .transport
            .clone()
            .with_timeout(self.transport.timeout.min(HOST_PROBE_TIMEOUT));
        let client = PlantSipClient::anonymous(host.as_str(), &transport)?;
        client.probe().await?;
        Ok(())
    }

    async fn probe_api_key(&self, host: &Url, api_key: &SecretString) -> Result<(), CoreError> {
        let client = PlantSipClient::with_api_key(host.as_str(), api_key, &self.transport)?;
        client.verify_api_key().await?;
        Ok(())
    }

    async fn list_devices(
        &self,
        host: &Url,
        api_key: &SecretString,
    ) -> Result<Vec<RemoteDevice>, CoreError> {
        let client = PlantSipClient::with_api_key(host.as_str(), api_key, &self.transport)?;
        let devices: Vec<RemoteDevice> = client
            .devices()
            .await?
            .into_iter()
            .map(RemoteDevice::from)
            .filter(|d| !d.device_id.is_empty())
            .collect();
        debug!(host = %host, count = devices.len(), "appliances listed");
        Ok(devices)
    }
}
