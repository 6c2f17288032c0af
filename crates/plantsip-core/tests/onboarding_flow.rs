// End-to-end onboarding tests against a wiremock server.
#![allow(clippy::unwrap_used)]

use std::sync::Mutex;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;
use wiremock::matchers::{any, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use plantsip_core::{
    AbortReason, AuthMethod, CoreConfig, CoreError, Device, DeviceId, DeviceRegistry, FlowError,
    HostForm, Input, OnboardingFlow, OnboardingState, RemoteDevice,
};

// ── Helpers ─────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryRegistry {
    devices: Mutex<Vec<Device>>,
}

impl MemoryRegistry {
    fn with(device: Device) -> Self {
        Self {
            devices: Mutex::new(vec![device]),
        }
    }

    fn len(&self) -> usize {
        self.devices.lock().unwrap().len()
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn contains(&self, id: &DeviceId) -> Result<bool, CoreError> {
        Ok(self.devices.lock().unwrap().iter().any(|d| d.id() == *id))
    }

    fn persist(&self, device: &Device) -> Result<(), CoreError> {
        self.devices.lock().unwrap().push(device.clone());
        Ok(())
    }
}

struct FailingRegistry;

impl DeviceRegistry for FailingRegistry {
    fn contains(&self, _id: &DeviceId) -> Result<bool, CoreError> {
        Ok(false)
    }

    fn persist(&self, _device: &Device) -> Result<(), CoreError> {
        Err(CoreError::Config {
            message: "read-only file system".into(),
        })
    }
}

fn config_for(server: &MockServer) -> CoreConfig {
    CoreConfig {
        default_host: Url::parse(&server.uri()).unwrap(),
        request_timeout: Duration::from_secs(2),
        ..CoreConfig::default()
    }
}

fn secret(s: &str) -> SecretString {
    SecretString::from(s.to_owned())
}

fn use_default() -> Input {
    Input::Host {
        use_default_server: true,
        host: None,
    }
}

async fn mount_root(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

async fn mount_devices(server: &MockServer, devices: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(devices))
        .mount(server)
        .await;
}

async fn mount_balcony(server: &MockServer) {
    mount_devices(server, json!([{ "device_id": "d-1", "name": "Balcony" }])).await;
}

async fn mount_key_check(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/auth/verify"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

fn balcony() -> RemoteDevice {
    RemoteDevice {
        device_id: "d-1".into(),
        name: "Balcony".into(),
    }
}

/// Address of a server that reads each request and hangs up unanswered.
fn hang_up_server() -> std::net::SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut buf = [0u8; 1024];
            let _ = std::io::Read::read(&mut stream, &mut buf);
        }
    });
    addr
}

/// Drive a fresh flow up to the given auth method step.
async fn flow_at<R: DeviceRegistry>(
    server: &MockServer,
    registry: R,
    auth: AuthMethod,
) -> OnboardingFlow<R> {
    let mut flow = OnboardingFlow::new(&config_for(server), registry);
    flow.submit(use_default()).await;
    assert!(
        matches!(flow.state(), OnboardingState::SelectAuthMethod { error: None, .. }),
        "host step failed: {:?}",
        flow.state()
    );
    flow.submit(Input::AuthMethod(auth)).await;
    flow
}

// ── Host step ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_credentials_flow_completes() {
    let server = MockServer::start().await;
    mount_root(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/api-keys"))
        .and(body_json(json!({
            "username": "alice",
            "password": "secret",
            "name": "PlantSip Controller"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "api_key": "abc123" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .and(header("authorization", "Bearer abc123"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "device_id": "d-1", "name": "Balcony" }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let registry = MemoryRegistry::default();
    let mut flow = OnboardingFlow::new(&config_for(&server), &registry);

    let state = flow.submit(use_default()).await;
    assert!(matches!(state, OnboardingState::SelectAuthMethod { .. }));

    let state = flow.submit(Input::AuthMethod(AuthMethod::Credentials)).await;
    assert!(matches!(state, OnboardingState::EnterCredentials { .. }));

    flow.submit(Input::Credentials {
        username: "alice".into(),
        password: secret("secret"),
    })
    .await;

    let device = flow.into_device().expect("flow should complete");
    let default_host = Url::parse(&server.uri()).unwrap();
    assert_eq!(device.host(), &default_host);
    assert_eq!(device.api_key().expose_secret(), "abc123");
    assert_eq!(device.remote_id(), "d-1");
    assert_eq!(device.name(), "Balcony");
    assert_eq!(device.id(), DeviceId::derive(&default_host, "d-1"));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_custom_host_required() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut flow = OnboardingFlow::new(&config_for(&server), MemoryRegistry::default());
    let state = flow
        .submit(Input::Host {
            use_default_server: false,
            host: Some(String::new()),
        })
        .await;

    assert_eq!(state.error(), Some(FlowError::CustomHostRequired));
}

#[tokio::test]
async fn test_unreachable_host_keeps_form() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = CoreConfig {
        request_timeout: Duration::from_secs(2),
        ..CoreConfig::default()
    };
    let mut flow = OnboardingFlow::new(&config, MemoryRegistry::default());
    let host = format!("http://{addr}");

    let state = flow
        .submit(Input::Host {
            use_default_server: false,
            host: Some(host.clone()),
        })
        .await;

    match state {
        OnboardingState::SelectHost { form, error } => {
            assert_eq!(*error, Some(FlowError::CannotConnectHost));
            assert_eq!(
                *form,
                HostForm {
                    use_default_server: false,
                    host,
                }
            );
        }
        other => panic!("unexpected state {other:?}"),
    }
}

#[tokio::test]
async fn test_host_hanging_up_is_cannot_connect() {
    let addr = hang_up_server();
    let mut flow = OnboardingFlow::new(&CoreConfig::default(), MemoryRegistry::default());

    let state = flow
        .submit(Input::Host {
            use_default_server: false,
            host: Some(format!("http://{addr}")),
        })
        .await;

    assert!(matches!(state, OnboardingState::SelectHost { .. }));
    assert_eq!(state.error(), Some(FlowError::CannotConnectHost));
}

#[tokio::test]
async fn test_host_server_error_is_cannot_connect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut flow = OnboardingFlow::new(&config_for(&server), MemoryRegistry::default());
    let state = flow.submit(use_default()).await;

    assert!(matches!(state, OnboardingState::SelectHost { .. }));
    assert_eq!(state.error(), Some(FlowError::CannotConnectHost));
}

#[tokio::test]
async fn test_slow_host_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let config = CoreConfig {
        request_timeout: Duration::from_millis(300),
        ..config_for(&server)
    };
    let mut flow = OnboardingFlow::new(&config, MemoryRegistry::default());
    let state = flow.submit(use_default()).await;

    assert_eq!(state.error(), Some(FlowError::TimeoutConnectHost));
}

// ── Credentials step ────────────────────────────────────────────────

#[tokio::test]
async fn test_empty_credentials_send_nothing() {
    let server = MockServer::start().await;
    mount_root(&server).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut flow = flow_at(&server, MemoryRegistry::default(), AuthMethod::Credentials).await;

    for (username, password) in [("", "secret"), ("alice", ""), ("", "")] {
        let state = flow
            .submit(Input::Credentials {
                username: username.into(),
                password: secret(password),
            })
            .await;
        assert!(matches!(state, OnboardingState::EnterCredentials { .. }));
        assert_eq!(state.error(), Some(FlowError::EmptyCredentials));
    }
}

#[tokio::test]
async fn test_wrong_password() {
    let server = MockServer::start().await;
    mount_root(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/api-keys"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut flow = flow_at(&server, MemoryRegistry::default(), AuthMethod::Credentials).await;
    let state = flow
        .submit(Input::Credentials {
            username: "alice".into(),
            password: secret("wrong"),
        })
        .await;

    assert_eq!(state.error(), Some(FlowError::InvalidAuthCredentials));
}

#[tokio::test]
async fn test_exchange_without_key_is_api_error() {
    let server = MockServer::start().await;
    mount_root(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/api-keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "api_key": "" })))
        .mount(&server)
        .await;

    let registry = MemoryRegistry::default();
    let mut flow = flow_at(&server, &registry, AuthMethod::Credentials).await;
    let state = flow
        .submit(Input::Credentials {
            username: "alice".into(),
            password: secret("secret"),
        })
        .await;

    assert_eq!(state.error(), Some(FlowError::ApiErrorCredentials));
    assert_eq!(registry.len(), 0);
}

// ── API key step ────────────────────────────────────────────────────

#[tokio::test]
async fn test_blank_api_key_sends_nothing() {
    let server = MockServer::start().await;
    mount_root(&server).await;
    Mock::given(path("/v1/auth/verify"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut flow = flow_at(&server, MemoryRegistry::default(), AuthMethod::ApiKey).await;
    let state = flow.submit(Input::ApiKey(secret("   "))).await;

    assert_eq!(state.error(), Some(FlowError::EmptyApiKey));
}

#[tokio::test]
async fn test_api_key_retry_is_idempotent() {
    let server = MockServer::start().await;
    mount_root(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/verify"))
        .and(header("authorization", "Bearer wrong"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/verify"))
        .and(header("authorization", "Bearer K"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    mount_balcony(&server).await;

    // Fresh flow with the good key.
    let mut fresh = flow_at(&server, MemoryRegistry::default(), AuthMethod::ApiKey).await;
    fresh.submit(Input::ApiKey(secret("K"))).await;
    let expected = fresh.into_device().expect("fresh flow completes");

    // Same key after a rejected attempt, submitted twice.
    let mut flow = flow_at(&server, MemoryRegistry::default(), AuthMethod::ApiKey).await;
    let state = flow.submit(Input::ApiKey(secret("wrong"))).await;
    assert_eq!(state.error(), Some(FlowError::InvalidApiKey));

    flow.submit(Input::ApiKey(secret("K"))).await;
    let state = flow.submit(Input::ApiKey(secret("K"))).await;
    assert!(matches!(state, OnboardingState::Complete { .. }));

    let device = flow.into_device().expect("retried flow completes");
    assert_eq!(device.id(), expected.id());
    assert_eq!(device.host(), expected.host());
}

#[tokio::test]
async fn test_key_check_server_error() {
    let server = MockServer::start().await;
    mount_root(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/verify"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut flow = flow_at(&server, MemoryRegistry::default(), AuthMethod::ApiKey).await;
    let state = flow.submit(Input::ApiKey(secret("K"))).await;

    assert_eq!(state.error(), Some(FlowError::ApiErrorKeyTest));
}

// ── Validation step ─────────────────────────────────────────────────

#[tokio::test]
async fn test_already_configured_aborts() {
    let server = MockServer::start().await;
    mount_root(&server).await;
    mount_key_check(&server).await;
    mount_balcony(&server).await;

    // Same appliance, onboarded earlier with a different key.
    let host = Url::parse(&server.uri()).unwrap();
    let registry = MemoryRegistry::with(Device::new(host, balcony(), secret("old-key")));

    let mut flow = flow_at(&server, &registry, AuthMethod::ApiKey).await;
    let state = flow.submit(Input::ApiKey(secret("K"))).await;

    assert!(matches!(
        state,
        OnboardingState::Aborted {
            reason: AbortReason::AlreadyConfigured
        }
    ));
    assert_eq!(state.error().map(FlowError::code), Some("already_configured"));
    assert_eq!(registry.len(), 1);

    // Terminal: further input is ignored.
    let state = flow.submit(Input::ApiKey(secret("other"))).await;
    assert!(state.is_terminal());
}

#[tokio::test]
async fn test_persist_failure_returns_to_key_step() {
    let server = MockServer::start().await;
    mount_root(&server).await;
    mount_key_check(&server).await;
    mount_balcony(&server).await;

    let mut flow = flow_at(&server, FailingRegistry, AuthMethod::ApiKey).await;
    let state = flow.submit(Input::ApiKey(secret("K"))).await;

    assert!(matches!(state, OnboardingState::EnterApiKey { .. }));
    assert_eq!(state.error(), Some(FlowError::Unknown));
}

#[tokio::test]
async fn test_choice_between_several_appliances() {
    let server = MockServer::start().await;
    mount_root(&server).await;
    mount_key_check(&server).await;
    mount_devices(
        &server,
        json!([
            { "device_id": "d-1", "name": "Balcony" },
            { "device_id": 42, "name": "Kitchen" }
        ]),
    )
    .await;

    let registry = MemoryRegistry::default();
    let mut flow = flow_at(&server, &registry, AuthMethod::ApiKey).await;
    let state = flow.submit(Input::ApiKey(secret("K"))).await;
    match state {
        OnboardingState::SelectDevice { devices, error, .. } => {
            assert_eq!(devices.len(), 2);
            assert!(error.is_none());
        }
        other => panic!("expected SelectDevice, got {other:?}"),
    }

    let state = flow.submit(Input::Device("garage".into())).await;
    assert_eq!(state.error(), Some(FlowError::UnknownDevice));

    flow.submit(Input::Device("Kitchen".into())).await;
    let device = flow.into_device().expect("flow should complete");
    assert_eq!(device.remote_id(), "42");
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_account_without_appliances() {
    let server = MockServer::start().await;
    mount_root(&server).await;
    mount_key_check(&server).await;
    mount_devices(&server, json!([])).await;

    let registry = MemoryRegistry::default();
    let mut flow = flow_at(&server, &registry, AuthMethod::ApiKey).await;
    let state = flow.submit(Input::ApiKey(secret("K"))).await;

    assert!(matches!(state, OnboardingState::EnterApiKey { .. }));
    assert_eq!(state.error(), Some(FlowError::NoDevices));
    assert_eq!(registry.len(), 0);
}

#[tokio::test]
async fn test_cancel_aborts() {
    let server = MockServer::start().await;
    mount_root(&server).await;

    let mut flow = flow_at(&server, MemoryRegistry::default(), AuthMethod::ApiKey).await;
    let state = flow.cancel();

    assert!(matches!(
        state,
        OnboardingState::Aborted {
            reason: AbortReason::Cancelled
        }
    ));
    assert!(flow.into_device().is_none());
}
