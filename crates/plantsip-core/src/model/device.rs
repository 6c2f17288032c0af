// ── Device identity and records ──
//
// A `Device` only ever carries an API key. Username/password live in
// `Credentials`, which is consumed by the credential exchanger and never
// reaches a `Device`.
//
// One API key may reach several appliances; each configured `Device` is
// one of them, addressed by its server-assigned id.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

// ── DeviceId ────────────────────────────────────────────────────────

/// Stable identifier of a configured appliance.
///
/// UUIDv5 of the normalized host and the server's device id. The API key
/// plays no part, so re-authenticating keeps the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn derive(host: &Url, remote_id: &str) -> Self {
        let name = format!("{host}#{}", remote_id.trim());
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First eight hex digits, for compact display.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_owned()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for DeviceId {
    fn from(u: Uuid) -> Self {
        Self(u)
    }
}

// ── RemoteDevice ────────────────────────────────────────────────────

/// An appliance as listed by the server for one API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDevice {
    pub device_id: String,
    pub name: String,
}

impl RemoteDevice {
    /// The name, or the server id when the appliance is unnamed.
    pub fn label(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.device_id
        } else {
            &self.name
        }
    }
}

// ── Device ──────────────────────────────────────────────────────────

/// One configured appliance: where it lives, which of the key's
/// appliances it is, and the key that reaches it.
#[derive(Debug, Clone)]
pub struct Device {
    id: DeviceId,
    host: Url,
    remote: RemoteDevice,
    api_key: SecretString,
    created_at: DateTime<Utc>,
}

impl Device {
    /// New record for a freshly validated host/key pair.
    pub fn new(host: Url, remote: RemoteDevice, api_key: SecretString) -> Self {
        Self {
            id: DeviceId::derive(&host, &remote.device_id),
            host,
            remote,
            api_key,
            created_at: Utc::now(),
        }
    }

    /// Rebuild a record loaded from persistent storage.
    pub fn restore(
        id: DeviceId,
        host: Url,
        remote: RemoteDevice,
        api_key: SecretString,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            host,
            remote,
            api_key,
            created_at,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn host(&self) -> &Url {
        &self.host
    }

    /// Server-assigned id used in API paths.
    pub fn remote_id(&self) -> &str {
        &self.remote.device_id
    }

    pub fn name(&self) -> &str {
        self.remote.label()
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Swap in a new key after re-authentication. The id is kept.
    pub fn replace_api_key(&mut self, api_key: SecretString) {
        self.api_key = api_key;
    }
}

// ── Credentials ─────────────────────────────────────────────────────

/// Username/password pair, alive only for a single exchange.
///
/// Deliberately not `Clone`: the exchanger takes it by value.
pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}
