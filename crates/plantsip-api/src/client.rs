// Async HTTP client for the PlantSip REST API.
//
// Base path: <host>/v1/
// Auth: `Authorization: Bearer <api key>` (installed as a default header)
//
// The client never retries. Callers own retry policy: onboarding surfaces
// the first failure, the polling coordinator backs off.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{
    ApiKeyRequest, ApiKeyResponse, ChannelConfigUpdate, DeviceInfo, ErrorResponse,
    StatusResponse, WateringRequest,
};
use crate::transport::TransportConfig;

/// Validate and normalize a user-supplied host string.
///
/// The result always has an `http`/`https` scheme, a host, no query or
/// fragment, and a path ending in `/` so relative API paths join beneath it.
pub fn normalize_host(raw: &str) -> Result<Url, Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidHost {
            host: String::new(),
            reason: "host is empty".into(),
        });
    }

    let mut url = Url::parse(trimmed)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidHost {
            host: trimmed.to_owned(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidHost {
            host: trimmed.to_owned(),
            reason: "missing host name".into(),
        });
    }

    let path = url.path().trim_end_matches('/').to_owned();
    url.set_path(&format!("{path}/"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for one PlantSip API host.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct PlantSipClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl PlantSipClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Client without credentials, for host probing and key exchange.
    pub fn anonymous(host: &str, transport: &TransportConfig) -> Result<Self, Error> {
        let base_url = normalize_host(host)?;
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            timeout: transport.timeout,
        })
    }

    /// Client that sends `Authorization: Bearer <key>` on every request.
    pub fn with_api_key(
        host: &str,
        api_key: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let base_url = normalize_host(host)?;

        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
            .map_err(|_| Error::InvalidApiKey)?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        let http = transport.build_client_with_headers(headers)?;
        Ok(Self {
            http,
            base_url,
            timeout: transport.timeout,
        })
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(host: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = normalize_host(host)?;
        Ok(Self {
            http,
            base_url,
            timeout: TransportConfig::default().timeout,
        })
    }

    /// The normalized host URL (always ends with `/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Check that the host answers HTTP at all.
    ///
    /// 401/403/404 still prove a live server; 5xx and other 4xx do not.
    pub async fn probe(&self) -> Result<(), Error> {
        let url = self.base_url.clone();
        debug!("GET {url} (probe)");

        let resp = self.send(self.http.get(url)).await?;
        let status = resp.status();
        let acceptable = matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        );
        if status.is_server_error() || (status.is_client_error() && !acceptable) {
            return Err(Error::Api {
                status: status.as_u16(),
                message: format!("host check failed with {status}"),
            });
        }

        debug!(%status, "host responded");
        Ok(())
    }

    /// Trade a username/password for a long-lived API key.
    ///
    /// 401/403 map to [`Error::Authentication`]; the returned key is not
    /// checked for emptiness here.
    pub async fn exchange_credentials(
        &self,
        username: &str,
        password: &SecretString,
        key_name: &str,
    ) -> Result<ApiKeyResponse, Error> {
        let url = self.url("v1/auth/api-keys")?;
        debug!("POST {url}");

        let body = ApiKeyRequest {
            username,
            password: password.expose_secret(),
            name: key_name,
        };
        let resp = self.send(self.http.post(url).json(&body)).await?;

        let status = resp.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            let raw = self.text(resp).await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("credential exchange refused (HTTP {status}): {raw}"),
            });
        }
        self.handle_response(resp).await
    }

    /// Cheap authenticated call proving the configured key is accepted.
    pub async fn verify_api_key(&self) -> Result<(), Error> {
        let url = self.url("v1/auth/verify")?;
        debug!("GET {url}");

        let resp = self.send(self.http.get(url)).await?;
        self.handle_empty(resp).await
    }

    /// Every appliance the key has access to.
    pub async fn devices(&self) -> Result<Vec<DeviceInfo>, Error> {
        self.get("v1/devices").await
    }

    /// Latest status report of one appliance.
    pub async fn device_status(&self, device_id: &str) -> Result<StatusResponse, Error> {
        let url = self.device_url(device_id, &["status", "latest"])?;
        debug!("GET {url}");

        let resp = self.send(self.http.get(url)).await?;
        self.handle_response(resp).await
    }

    /// Start a manual watering run on one channel.
    pub async fn trigger_watering(
        &self,
        device_id: &str,
        channel_id: u32,
        amount_ml: u32,
    ) -> Result<(), Error> {
        let url = self.device_url(device_id, &["channel", &channel_id.to_string(), "water"])?;
        let body = WateringRequest {
            water_amount: amount_ml,
        };
        self.send_empty(Method::POST, url, &body).await
    }

    /// Update the configured manual/automatic amounts of one channel.
    pub async fn update_channel(
        &self,
        device_id: &str,
        channel_id: u32,
        update: &ChannelConfigUpdate,
    ) -> Result<(), Error> {
        let url = self.device_url(device_id, &["channel", &channel_id.to_string()])?;
        self.send_empty(Method::PATCH, url, update).await
    }

    /// Generic authenticated request against a path under the host.
    ///
    /// Returns the decoded JSON payload, or `None` for an empty body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Option<serde_json::Value>, Error> {
        let url = self.url(path)?;
        debug!("{method} {url}");

        let mut builder = self.http.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let resp = self.send(builder).await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(self.parse_error(status, resp).await);
        }
        let raw = self.text(resp).await?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| deserialization_error(&e, raw))
    }

    // ── HTTP helpers ─────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// `<host>/v1/device/{device_id}/{tail...}` with every segment escaped.
    fn device_url(&self, device_id: &str, tail: &[&str]) -> Result<Url, Error> {
        let mut url = self.url("v1/device/")?;
        url.path_segments_mut()
            .map_err(|()| Error::InvalidHost {
                host: self.base_url.to_string(),
                reason: "host cannot carry a path".into(),
            })?
            .pop_if_empty()
            .push(device_id)
            .extend(tail);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url}");

        let resp = self.send(self.http.get(url)).await?;
        self.handle_response(resp).await
    }

    async fn send_empty<B: Serialize + Sync>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<(), Error> {
        debug!("{method} {url}");

        let resp = self.send(self.http.request(method, url).json(body)).await?;
        self.handle_empty(resp).await
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        builder.send().await.map_err(|e| self.transport_error(e))
    }

    async fn text(&self, resp: reqwest::Response) -> Result<String, Error> {
        resp.text().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            Error::Transport(err)
        }
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = self.text(resp).await?;
            serde_json::from_str(&body).map_err(|e| deserialization_error(&e, body))
        } else {
            Err(self.parse_error(status, resp).await)
        }
    }

    async fn handle_empty(&self, resp: reqwest::Response) -> Result<(), Error> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.parse_error(status, resp).await)
        }
    }

    async fn parse_error(&self, status: StatusCode, resp: reqwest::Response) -> Error {
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Error::InvalidApiKey;
        }

        let raw = self.text(resp).await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&raw)
            .ok()
            .and_then(|e| e.message.or(e.detail))
            .unwrap_or_else(|| {
                if raw.is_empty() {
                    status.to_string()
                } else {
                    raw
                }
            });

        Error::Api {
            status: status.as_u16(),
            message,
        }
    }
}

fn deserialization_error(err: &serde_json::Error, body: String) -> Error {
    let preview: String = body.chars().take(200).collect();
    Error::Deserialization {
        message: format!("{err} (body preview: {preview:?})"),
        body,
    }
}
