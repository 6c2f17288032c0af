// ── Credential exchange ──
//
// One-shot username/password -> API key trade. No retries; the caller
// decides what to do with a failure.

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};
use url::Url;

use plantsip_api::{PlantSipClient, TransportConfig};

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::model::{Credentials, Device};

#[derive(Debug, Clone)]
pub struct CredentialExchanger {
    transport: TransportConfig,
    key_name: String,
}

impl CredentialExchanger {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            transport: config.transport(),
            key_name: config.api_key_name.clone(),
        }
    }

    /// Trade `credentials` for a long-lived API key on `host`.
    ///
    /// Empty fields fail with [`CoreError::Validation`] before any request.
    /// A 401/403 is [`CoreError::InvalidCredentials`]; a success response
    /// without a usable key is [`CoreError::Api`].
    pub async fn exchange(
        &self,
        host: &Url,
        credentials: Credentials,
    ) -> Result<SecretString, CoreError> {
        let username = credentials.username().trim();
        if username.is_empty() {
            return Err(CoreError::validation("username", "must not be empty"));
        }
        if credentials.password().expose_secret().is_empty() {
            return Err(CoreError::validation("password", "must not be empty"));
        }

        let client = PlantSipClient::anonymous(host.as_str(), &self.transport)?;
        debug!(host = %host, username, "exchanging credentials for API key");

        let response = client
            .exchange_credentials(username, credentials.password(), &self.key_name)
            .await
            .map_err(|e| {
                if e.is_auth() {
                    CoreError::InvalidCredentials
                } else {
                    CoreError::from(e)
                }
            })?;
        drop(credentials);

        let key = response.api_key.trim();
        if key.is_empty() {
            warn!(host = %host, "credential exchange succeeded without an API key");
            return Err(CoreError::Api {
                message: "server returned an empty API key".into(),
                status: None,
            });
        }

        Ok(SecretString::from(key.to_owned()))
    }

    /// Check that `api_key` still reaches `device` before it replaces the
    /// stored key.
    ///
    /// A rejected key is [`CoreError::AuthenticationFailed`]; an account that
    /// no longer lists the appliance is [`CoreError::DeviceNotFound`].
    pub async fn confirm_access(
        &self,
        device: &Device,
        api_key: &SecretString,
    ) -> Result<(), CoreError> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(CoreError::validation("api_key", "must not be empty"));
        }
        let client = PlantSipClient::with_api_key(device.host().as_str(), api_key, &self.transport)?;
        let listed = client.devices().await?;
        if listed.iter().any(|d| d.device_id.trim() == device.remote_id()) {
            debug!(device = %device.id(), "new API key reaches the appliance");
            return Ok(());
        }
        warn!(
            device = %device.id(),
            remote_id = device.remote_id(),
            listed = listed.len(),
            "API key does not reach the configured appliance"
        );
        Err(CoreError::DeviceNotFound {
            identifier: format!("{} on {}", device.remote_id(), device.host()),
        })
    }
}
