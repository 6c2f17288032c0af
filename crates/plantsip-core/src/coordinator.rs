// ── Polling coordinator ──
//
// One worker task per device, each on its own schedule: poll, sleep for
// the poll interval (or the backoff delay after a failure), repeat.
// Failures stay local to their device; the shared pieces are the status
// store and the event channel, both keyed by device id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use secrecy::SecretString;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use plantsip_api::{PlantSipClient, TransportConfig};

use crate::backoff::Backoff;
use crate::config::CoreConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::{CoreError, ErrorKind};
use crate::model::{Device, DeviceId, DeviceStatus};
use crate::store::{StatusReceiver, StatusStore};

const EVENT_CHANNEL_SIZE: usize = 256;

// ── Events ───────────────────────────────────────────────────────────

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// A fresh snapshot was committed.
    StatusUpdated { device_id: DeviceId },
    /// First success after a failure streak.
    Recovered {
        device_id: DeviceId,
        after_failures: u32,
    },
    /// Connection/timeout failures reached the threshold. Once per streak.
    Unreachable {
        device_id: DeviceId,
        consecutive_failures: u32,
    },
    /// The API key was rejected. Once per streak.
    ReauthRequired { device_id: DeviceId },
    /// The server answered with an error; data is temporarily unavailable.
    DataUnavailable { device_id: DeviceId, message: String },
}

impl CoordinatorEvent {
    pub fn device_id(&self) -> DeviceId {
        match self {
            Self::StatusUpdated { device_id }
            | Self::Recovered { device_id, .. }
            | Self::Unreachable { device_id, .. }
            | Self::ReauthRequired { device_id }
            | Self::DataUnavailable { device_id, .. } => *device_id,
        }
    }
}

// ── Poll results ─────────────────────────────────────────────────────

/// Result of one poll of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub device_id: DeviceId,
    /// `None` on success.
    pub error: Option<ErrorKind>,
    pub consecutive_failures: u32,
    /// How long the device's worker waits before polling again.
    pub next_delay: Duration,
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Failure bookkeeping for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHealth {
    pub device_id: DeviceId,
    pub host: Url,
    pub consecutive_failures: u32,
    pub last_error: Option<ErrorKind>,
    pub needs_reauth: bool,
}

// ── Per-device slot ──────────────────────────────────────────────────

struct PollState {
    backoff: Backoff,
    failures: u32,
    last_error: Option<ErrorKind>,
    reauth_reported: bool,
    unreachable_reported: bool,
}

pub(crate) struct DeviceSlot {
    device_id: DeviceId,
    host: Url,
    remote_id: String,
    client: RwLock<PlantSipClient>,
    /// Held for the duration of a poll; polls of one device never overlap.
    poll_lock: tokio::sync::Mutex<()>,
    state: Mutex<PollState>,
    wake: Notify,
    cancel: CancellationToken,
}

impl DeviceSlot {
    pub(crate) fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub(crate) fn client(&self) -> PlantSipClient {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) type SlotMap = DashMap<DeviceId, Arc<DeviceSlot>>;

// ── Coordinator ──────────────────────────────────────────────────────

/// Shared by the coordinator handle and every worker task.
struct Shared {
    config: CoreConfig,
    store: Arc<StatusStore>,
    events: broadcast::Sender<CoordinatorEvent>,
}

struct Inner {
    shared: Arc<Shared>,
    transport: TransportConfig,
    slots: Arc<SlotMap>,
    cancel: CancellationToken,
    workers: Mutex<HashMap<DeviceId, JoinHandle<()>>>,
    running: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Owns the refresh schedule and cached status of every device.
///
/// Cheaply cloneable; clones share the same workers and store.
#[derive(Clone)]
pub struct PollingCoordinator {
    inner: Arc<Inner>,
}

impl PollingCoordinator {
    pub fn new(config: CoreConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let transport = config.transport();
        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared {
                    config,
                    store: Arc::new(StatusStore::new()),
                    events,
                }),
                transport,
                slots: Arc::new(DashMap::new()),
                cancel: CancellationToken::new(),
                workers: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.shared.config
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.inner.shared.store
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.inner.shared.store.device_ids()
    }

    // ── Device management ────────────────────────────────────────────

    /// Start tracking `device`. Spawns its worker if the coordinator runs.
    pub fn add_device(&self, device: &Device) -> Result<(), CoreError> {
        let id = device.id();
        if self.inner.slots.contains_key(&id) {
            return Err(CoreError::AlreadyConfigured {
                device_id: id.to_string(),
            });
        }

        let client = PlantSipClient::with_api_key(
            device.host().as_str(),
            device.api_key(),
            &self.inner.transport,
        )?;
        let config = &self.inner.shared.config;
        let slot = Arc::new(DeviceSlot {
            device_id: id,
            host: device.host().clone(),
            remote_id: device.remote_id().to_owned(),
            client: RwLock::new(client),
            poll_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(PollState {
                backoff: Backoff::new(config.retry_base, config.retry_max),
                failures: 0,
                last_error: None,
                reauth_reported: false,
                unreachable_reported: false,
            }),
            wake: Notify::new(),
            cancel: self.inner.cancel.child_token(),
        });

        self.inner.shared.store.register(id);
        self.inner.slots.insert(id, Arc::clone(&slot));
        debug!(device = %id, remote_id = device.remote_id(), host = %device.host(), "device added");

        if self.inner.running.load(Ordering::SeqCst) {
            self.spawn_worker(slot);
        }
        Ok(())
    }

    /// Stop polling `id` and drop its cached status.
    pub fn remove_device(&self, id: &DeviceId) -> bool {
        let Some((_, slot)) = self.inner.slots.remove(id) else {
            return false;
        };
        slot.cancel.cancel();
        self.workers().remove(id);
        self.inner.shared.store.remove(id);
        debug!(device = %id, "device removed");
        true
    }

    /// Replace a device's API key after the user re-authenticated.
    ///
    /// Clears the failure streak and wakes the worker for an immediate poll.
    pub fn reauthenticate(&self, id: &DeviceId, api_key: &SecretString) -> Result<(), CoreError> {
        let slot = self.slot(id)?;
        let client =
            PlantSipClient::with_api_key(slot.host.as_str(), api_key, &self.inner.transport)?;
        *slot.client.write().unwrap_or_else(PoisonError::into_inner) = client;

        {
            let mut state = slot.state();
            state.backoff.reset();
            state.failures = 0;
            state.last_error = None;
            state.reauth_reported = false;
            state.unreachable_reported = false;
        }
        slot.wake.notify_one();
        info!(device = %id, "API key replaced");
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn one worker per device. Each polls immediately, then on schedule.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let slots: Vec<Arc<DeviceSlot>> = self
            .inner
            .slots
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        for slot in slots {
            self.spawn_worker(slot);
        }
        info!(
            devices = self.inner.slots.len(),
            interval = ?self.inner.shared.config.poll_interval,
            "coordinator started"
        );
    }

    /// Stop scheduling and wait for every worker to finish.
    ///
    /// A poll already in flight completes (or times out) first.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.running.store(false, Ordering::SeqCst);

        let handles: Vec<JoinHandle<()>> = self.workers().drain().map(|(_, h)| h).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("coordinator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst) && !self.inner.cancel.is_cancelled()
    }

    // ── Polling ──────────────────────────────────────────────────────

    /// Poll every device once, concurrently, and wait for all of them.
    pub async fn refresh_all(&self) -> Vec<PollOutcome> {
        let slots: Vec<Arc<DeviceSlot>> = self
            .inner
            .slots
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        let shared = &self.inner.shared;
        join_all(slots.iter().map(|slot| poll_slot(shared, slot))).await
    }

    /// Poll a single device now.
    pub async fn poll_device(&self, id: &DeviceId) -> Result<PollOutcome, CoreError> {
        let slot = self.slot(id)?;
        Ok(poll_slot(&self.inner.shared, &slot).await)
    }

    // ── Readers ──────────────────────────────────────────────────────

    pub fn status(&self, id: &DeviceId) -> Option<Arc<DeviceStatus>> {
        self.inner.shared.store.snapshot(id)
    }

    pub fn subscribe(&self, id: &DeviceId) -> Option<StatusReceiver> {
        self.inner.shared.store.subscribe(id)
    }

    pub fn events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.shared.events.subscribe()
    }

    pub fn health(&self, id: &DeviceId) -> Option<DeviceHealth> {
        let slot = self.inner.slots.get(id).map(|r| Arc::clone(r.value()))?;
        let state = slot.state();
        Some(DeviceHealth {
            device_id: slot.device_id,
            host: slot.host.clone(),
            consecutive_failures: state.failures,
            last_error: state.last_error,
            needs_reauth: state.reauth_reported,
        })
    }

    /// Command dispatcher sharing this coordinator's clients and store.
    pub fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(
            Arc::clone(&self.inner.slots),
            Arc::clone(&self.inner.shared.store),
            self.inner.shared.config.max_water_amount_ml,
        )
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn slot(&self, id: &DeviceId) -> Result<Arc<DeviceSlot>, CoreError> {
        self.inner
            .slots
            .get(id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: id.to_string(),
            })
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, HashMap<DeviceId, JoinHandle<()>>> {
        self.inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_worker(&self, slot: Arc<DeviceSlot>) {
        let id = slot.device_id;
        let handle = tokio::spawn(device_worker(Arc::clone(&self.inner.shared), slot));
        if let Some(previous) = self.workers().insert(id, handle) {
            previous.abort();
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Poll one device forever, sleeping `next_delay` between polls.
async fn device_worker(shared: Arc<Shared>, slot: Arc<DeviceSlot>) {
    let mut delay = Duration::ZERO;
    loop {
        tokio::select! {
            biased;
            () = slot.cancel.cancelled() => break,
            () = slot.wake.notified() => {}
            () = tokio::time::sleep(delay) => {}
        }
        delay = poll_slot(&shared, &slot).await.next_delay;
    }
    debug!(device = %slot.device_id, "worker stopped");
}

async fn poll_slot(shared: &Shared, slot: &DeviceSlot) -> PollOutcome {
    let _guard = slot.poll_lock.lock().await;
    let id = slot.device_id;
    let client = slot.client();
    let timeout = shared.config.request_timeout;

    let fetch_seq = shared.store.begin_fetch();
    let result = match tokio::time::timeout(timeout, client.device_status(&slot.remote_id)).await {
        Ok(result) => result.map_err(CoreError::from),
        Err(_) => Err(CoreError::Timeout {
            timeout_secs: timeout.as_secs(),
        }),
    };

    match result {
        Ok(raw) => {
            shared
                .store
                .commit(&id, DeviceStatus::from(raw), fetch_seq);
            let previous_failures = {
                let mut state = slot.state();
                let previous = state.failures;
                state.backoff.reset();
                state.failures = 0;
                state.last_error = None;
                state.reauth_reported = false;
                state.unreachable_reported = false;
                previous
            };

            if previous_failures > 0 {
                info!(device = %id, after_failures = previous_failures, "device recovered");
                let _ = shared.events.send(CoordinatorEvent::Recovered {
                    device_id: id,
                    after_failures: previous_failures,
                });
            }
            let _ = shared
                .events
                .send(CoordinatorEvent::StatusUpdated { device_id: id });

            PollOutcome {
                device_id: id,
                error: None,
                consecutive_failures: 0,
                next_delay: shared.config.poll_interval,
            }
        }
        Err(e) => {
            shared.store.mark_stale(&id);
            let kind = e.kind();
            let (failures, next_delay, event) = {
                let mut state = slot.state();
                state.failures = state.failures.saturating_add(1);
                state.last_error = Some(kind);
                let delay = state.backoff.on_failure();
                let event = classify_failure(shared, &mut state, id, &e);
                (state.failures, delay, event)
            };
            if let Some(event) = event {
                let _ = shared.events.send(event);
            }

            PollOutcome {
                device_id: id,
                error: Some(kind),
                consecutive_failures: failures,
                next_delay,
            }
        }
    }
}

/// Log a failed poll and decide which event (if any) it raises.
fn classify_failure(
    shared: &Shared,
    state: &mut PollState,
    id: DeviceId,
    err: &CoreError,
) -> Option<CoordinatorEvent> {
    let failures = state.failures;
    if err.is_recoverable() {
        if failures >= shared.config.failure_threshold && !state.unreachable_reported {
            state.unreachable_reported = true;
            warn!(device = %id, failures, error = %err, "device unreachable");
            return Some(CoordinatorEvent::Unreachable {
                device_id: id,
                consecutive_failures: failures,
            });
        }
        debug!(device = %id, failures, error = %err, "status poll failed, will retry");
        return None;
    }

    if matches!(err.kind(), ErrorKind::Auth | ErrorKind::InvalidCredentials) {
        if state.reauth_reported {
            debug!(device = %id, failures, "API key still rejected");
            return None;
        }
        state.reauth_reported = true;
        warn!(device = %id, error = %err, "API key rejected, re-authentication required");
        return Some(CoordinatorEvent::ReauthRequired { device_id: id });
    }

    warn!(device = %id, failures, error = %err, "status unavailable");
    Some(CoordinatorEvent::DataUnavailable {
        device_id: id,
        message: err.to_string(),
    })
}
