// Polling coordinator and command dispatcher tests against wiremock servers.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_test::assert_ok;
use url::Url;
use wiremock::matchers::{any, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use plantsip_core::{
    Command, CoordinatorEvent, CoreConfig, CoreError, Device, ErrorKind, PollingCoordinator,
    RemoteDevice, WaterAmountMode, WateringCommand,
};

// ── Helpers ─────────────────────────────────────────────────────────

const STATUS_PATH: &str = "/v1/device/d-1/status/latest";

fn status_body(last_amount: u32) -> serde_json::Value {
    json!({
        "water_level": 72.0,
        "battery_voltage": 3.95,
        "battery_level": 88.0,
        "power_supply_connected": true,
        "battery_charging": false,
        "firmware_version": "2.1.0",
        "channels": {
            "1": {
                "moisture_level": 35.0,
                "last_watered": "2026-05-01T08:30:00",
                "last_watering_amount": last_amount
            },
            "2": { "moisture_level": 61.0 }
        }
    })
}

async fn mount_status(server: &MockServer, last_amount: u32) {
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body(last_amount)))
        .mount(server)
        .await;
}

fn test_config() -> CoreConfig {
    CoreConfig {
        request_timeout: Duration::from_millis(500),
        retry_base: Duration::from_secs(1),
        retry_max: Duration::from_secs(4),
        ..CoreConfig::default()
    }
}

fn device_for(uri: &str, key: &str) -> Device {
    Device::new(
        Url::parse(uri).unwrap(),
        RemoteDevice {
            device_id: "d-1".into(),
            name: "Balcony".into(),
        },
        SecretString::from(key.to_owned()),
    )
}

fn closed_port_uri() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// A server that reads each request and closes the socket unanswered.
fn hang_up_uri() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut buf = [0u8; 1024];
            let _ = std::io::Read::read(&mut stream, &mut buf);
        }
    });
    format!("http://{addr}")
}

fn drain(rx: &mut broadcast::Receiver<CoordinatorEvent>) -> Vec<CoordinatorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ── Polling ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_slow_device_does_not_block_others() {
    let slow = MockServer::start().await;
    let fast = MockServer::start().await;
    mount_status(&slow, 100).await;
    mount_status(&fast, 100).await;

    let coordinator = PollingCoordinator::new(test_config());
    let a = device_for(&slow.uri(), "key-a");
    let b = device_for(&fast.uri(), "key-b");
    coordinator.add_device(&a).unwrap();
    coordinator.add_device(&b).unwrap();

    let outcomes = coordinator.refresh_all().await;
    assert!(outcomes.iter().all(|o| o.is_success()));

    // Device A now hangs past the request timeout.
    slow.reset().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(status_body(100))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&slow)
        .await;

    let before_b = coordinator.status(&b.id()).unwrap().fetched_at;
    let outcomes = coordinator.refresh_all().await;
    assert_eq!(outcomes.len(), 2);

    let outcome_a = outcomes.iter().find(|o| o.device_id == a.id()).unwrap();
    assert_eq!(outcome_a.error, Some(ErrorKind::Timeout));
    assert_eq!(outcome_a.consecutive_failures, 1);

    let status_a = coordinator.status(&a.id()).unwrap();
    assert!(status_a.stale, "failed device keeps cached status marked stale");

    let status_b = coordinator.status(&b.id()).unwrap();
    assert!(!status_b.stale);
    assert!(status_b.fetched_at >= before_b);
    assert_eq!(coordinator.health(&b.id()).unwrap().consecutive_failures, 0);
}

#[tokio::test]
async fn test_backoff_grows_then_resets() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = test_config();
    let poll_interval = config.poll_interval;
    let coordinator = PollingCoordinator::new(config);
    let device = device_for(&server.uri(), "key");
    coordinator.add_device(&device).unwrap();
    let mut events = coordinator.events();

    let mut delays = Vec::new();
    for _ in 0..4 {
        let outcome = coordinator.poll_device(&device.id()).await.unwrap();
        assert_eq!(outcome.error, Some(ErrorKind::Api));
        delays.push(outcome.next_delay.as_secs());
    }
    assert_eq!(delays, vec![1, 2, 4, 4]);

    let unavailable = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, CoordinatorEvent::DataUnavailable { .. }))
        .count();
    assert_eq!(unavailable, 4);

    server.reset().await;
    mount_status(&server, 100).await;

    let outcome = coordinator.poll_device(&device.id()).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.next_delay, poll_interval);
    assert_eq!(outcome.consecutive_failures, 0);

    let events = drain(&mut events);
    assert!(events.contains(&CoordinatorEvent::Recovered {
        device_id: device.id(),
        after_failures: 4,
    }));
    assert!(events.contains(&CoordinatorEvent::StatusUpdated {
        device_id: device.id(),
    }));
}

#[tokio::test]
async fn test_unreachable_reported_once_at_threshold() {
    let coordinator = PollingCoordinator::new(test_config());
    let device = device_for(&closed_port_uri(), "key");
    coordinator.add_device(&device).unwrap();
    let mut events = coordinator.events();

    for attempt in 1..=2 {
        let outcome = coordinator.poll_device(&device.id()).await.unwrap();
        assert_eq!(outcome.error, Some(ErrorKind::Connection));
        assert_eq!(outcome.consecutive_failures, attempt);
    }
    assert!(drain(&mut events).is_empty());

    coordinator.poll_device(&device.id()).await.unwrap();
    coordinator.poll_device(&device.id()).await.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![CoordinatorEvent::Unreachable {
            device_id: device.id(),
            consecutive_failures: 3,
        }]
    );
}

#[tokio::test]
async fn test_peer_hanging_up_counts_as_connection_failure() {
    let coordinator = PollingCoordinator::new(test_config());
    let device = device_for(&hang_up_uri(), "key");
    coordinator.add_device(&device).unwrap();
    let mut events = coordinator.events();

    for attempt in 1..=3 {
        let outcome = coordinator.poll_device(&device.id()).await.unwrap();
        assert_eq!(outcome.error, Some(ErrorKind::Connection), "attempt {attempt}");
    }

    let events = drain(&mut events);
    assert_eq!(
        events,
        vec![CoordinatorEvent::Unreachable {
            device_id: device.id(),
            consecutive_failures: 3,
        }]
    );
    assert_eq!(
        coordinator.health(&device.id()).unwrap().last_error,
        Some(ErrorKind::Connection)
    );
}

#[tokio::test]
async fn test_revoked_key_requests_reauth_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .and(header("authorization", "Bearer revoked"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body(100)))
        .mount(&server)
        .await;

    let coordinator = PollingCoordinator::new(test_config());
    let device = device_for(&server.uri(), "revoked");
    coordinator.add_device(&device).unwrap();
    let mut events = coordinator.events();

    for _ in 0..3 {
        let outcome = coordinator.poll_device(&device.id()).await.unwrap();
        assert_eq!(outcome.error, Some(ErrorKind::Auth));
    }
    assert_eq!(
        drain(&mut events),
        vec![CoordinatorEvent::ReauthRequired {
            device_id: device.id()
        }]
    );
    assert!(coordinator.health(&device.id()).unwrap().needs_reauth);

    coordinator
        .reauthenticate(&device.id(), &SecretString::from("fresh".to_owned()))
        .unwrap();
    let health = coordinator.health(&device.id()).unwrap();
    assert!(!health.needs_reauth);
    assert_eq!(health.consecutive_failures, 0);

    let outcome = coordinator.poll_device(&device.id()).await.unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_workers_poll_until_shutdown() {
    let server = MockServer::start().await;
    mount_status(&server, 100).await;

    let coordinator = PollingCoordinator::new(test_config());
    let device = device_for(&server.uri(), "key");
    coordinator.add_device(&device).unwrap();
    let mut rx = coordinator.subscribe(&device.id()).unwrap();

    coordinator.start();
    assert!(coordinator.is_running());

    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .expect("worker should publish a status")
        .unwrap();
    let status = rx.borrow().clone().unwrap();
    assert_eq!(status.channels.len(), 2);

    coordinator.shutdown().await;
    assert!(!coordinator.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backing_off_device_keeps_other_schedules() {
    let stuck = MockServer::start().await;
    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(status_body(100))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&stuck)
        .await;
    mount_status(&healthy, 100).await;

    let config = CoreConfig {
        poll_interval: Duration::from_millis(100),
        request_timeout: Duration::from_millis(300),
        retry_base: Duration::from_millis(200),
        retry_max: Duration::from_secs(5),
        ..CoreConfig::default()
    };
    let coordinator = PollingCoordinator::new(config);
    let a = device_for(&stuck.uri(), "key-a");
    let b = device_for(&healthy.uri(), "key-b");
    coordinator.add_device(&a).unwrap();
    coordinator.add_device(&b).unwrap();
    let mut events = coordinator.events();

    coordinator.start();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    coordinator.shutdown().await;

    let events = drain(&mut events);
    let updates_b = events
        .iter()
        .filter(|e| **e == CoordinatorEvent::StatusUpdated { device_id: b.id() })
        .count();
    // B polls every 100 ms regardless of A timing out and backing off.
    assert!(updates_b >= 6, "healthy device updated only {updates_b} times");
    assert!(!coordinator.status(&b.id()).unwrap().stale);

    // A: polls at ~0, ~0.5 s and ~1.2 s (300 ms timeout + 200/400 ms backoff).
    let polls_a = stuck.received_requests().await.unwrap().len();
    assert!(polls_a <= 3, "stuck device polled {polls_a} times");
    let health_a = coordinator.health(&a.id()).unwrap();
    assert!(health_a.consecutive_failures >= 1);
    assert_eq!(health_a.last_error, Some(ErrorKind::Timeout));
    assert!(
        !events.contains(&CoordinatorEvent::StatusUpdated { device_id: a.id() }),
        "stuck device must not report fresh status"
    );
}

#[tokio::test]
async fn test_device_management() {
    let server = MockServer::start().await;
    let coordinator = PollingCoordinator::new(test_config());
    let device = device_for(&server.uri(), "key");

    coordinator.add_device(&device).unwrap();
    let err = coordinator.add_device(&device).unwrap_err();
    assert!(matches!(err, CoreError::AlreadyConfigured { .. }));
    assert_eq!(coordinator.device_ids(), vec![device.id()]);

    assert!(coordinator.remove_device(&device.id()));
    assert!(!coordinator.remove_device(&device.id()));
    assert!(coordinator.status(&device.id()).is_none());

    let err = coordinator.poll_device(&device.id()).await.unwrap_err();
    assert!(matches!(err, CoreError::DeviceNotFound { .. }));
}

// ── Dispatch ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_watering_marks_channel_stale_until_next_poll() {
    let server = MockServer::start().await;
    mount_status(&server, 100).await;

    let coordinator = PollingCoordinator::new(test_config());
    let device = device_for(&server.uri(), "abc123");
    coordinator.add_device(&device).unwrap();
    coordinator.poll_device(&device.id()).await.unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/device/d-1/channel/1/water"))
        .and(body_json(json!({ "water_amount": 250 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    assert_ok!(
        coordinator
            .dispatcher()
            .dispatch(&device.id(), WateringCommand::new(1, 250))
            .await
    );

    let status = coordinator.status(&device.id()).unwrap();
    assert!(status.channel(1).unwrap().stale);
    assert!(!status.channel(2).unwrap().stale);
    assert_eq!(status.channel(1).unwrap().last_watering_amount_ml, Some(100));

    server.reset().await;
    mount_status(&server, 250).await;
    coordinator.poll_device(&device.id()).await.unwrap();

    let status = coordinator.status(&device.id()).unwrap();
    let channel = status.channel(1).unwrap();
    assert_eq!(channel.last_watering_amount_ml, Some(250));
    assert!(!channel.stale);
    assert!(!status.any_stale());
}

#[tokio::test]
async fn test_out_of_range_amounts_send_nothing() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = test_config();
    let max = config.max_water_amount_ml;
    let coordinator = PollingCoordinator::new(config);
    let device = device_for(&server.uri(), "abc123");
    coordinator.add_device(&device).unwrap();
    let dispatcher = coordinator.dispatcher();

    for amount in [0, max + 1] {
        let err = dispatcher
            .dispatch(&device.id(), WateringCommand::new(1, amount))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "amount {amount}");
    }

    let err = dispatcher
        .execute(
            &device.id(),
            Command::SetWaterAmount {
                channel_id: 1,
                mode: WaterAmountMode::Manual,
                amount_ml: 0,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_set_water_amount() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/v1/device/d-1/channel/2"))
        .and(body_json(json!({ "automatic_water_amount": 300 })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = PollingCoordinator::new(test_config());
    let device = device_for(&server.uri(), "abc123");
    coordinator.add_device(&device).unwrap();

    coordinator
        .dispatcher()
        .execute(
            &device.id(),
            Command::SetWaterAmount {
                channel_id: 2,
                mode: WaterAmountMode::Automatic,
                amount_ml: 300,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_dispatch_to_unknown_device() {
    let coordinator = PollingCoordinator::new(test_config());
    let stranger = device_for("https://api.plantsip.de", "nobody");

    let err = coordinator
        .dispatcher()
        .dispatch(&stranger.id(), WateringCommand::new(1, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DeviceNotFound { .. }));
}
