// ── Status snapshot store ──
//
// One `watch` channel per device. Every write publishes a brand-new
// `Arc<DeviceStatus>`, so readers see either the previous or the next
// snapshot and never wait on a poll in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{DeviceId, DeviceStatus};

pub type StatusReceiver = watch::Receiver<Option<Arc<DeviceStatus>>>;

struct Entry {
    snapshot: watch::Sender<Option<Arc<DeviceStatus>>>,
    /// channel -> sequence number of the command that made it stale.
    pending: Mutex<HashMap<u32, u64>>,
}

impl Entry {
    fn new() -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            snapshot,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

/// Latest [`DeviceStatus`] per device.
pub struct StatusStore {
    entries: DashMap<DeviceId, Arc<Entry>>,
    /// Orders fetches against stale marks.
    sequence: AtomicU64,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Current snapshot, or `None` before the first successful poll.
    pub fn snapshot(&self, id: &DeviceId) -> Option<Arc<DeviceStatus>> {
        self.entry(id)?.snapshot.borrow().clone()
    }

    pub fn subscribe(&self, id: &DeviceId) -> Option<StatusReceiver> {
        self.entry(id).map(|e| e.snapshot.subscribe())
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.entries.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    // ── Writers (coordinator / dispatcher only) ──────────────────────

    pub(crate) fn register(&self, id: DeviceId) {
        self.entries
            .entry(id)
            .or_insert_with(|| Arc::new(Entry::new()));
    }

    pub(crate) fn remove(&self, id: &DeviceId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Sequence number to pass to [`commit`](Self::commit) for a fetch
    /// that is about to be issued.
    pub(crate) fn begin_fetch(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publish a freshly fetched status.
    ///
    /// Channels marked stale after `fetch_seq` was taken stay stale.
    pub(crate) fn commit(
        &self,
        id: &DeviceId,
        mut status: DeviceStatus,
        fetch_seq: u64,
    ) -> Option<Arc<DeviceStatus>> {
        let entry = self.entry(id)?;
        let mut pending = entry.pending.lock().unwrap_or_else(PoisonError::into_inner);

        pending.retain(|_, marked_at| *marked_at > fetch_seq);
        status.stale = false;
        for channel in &mut status.channels {
            channel.stale = pending.contains_key(&channel.channel_id);
        }

        let status = Arc::new(status);
        entry.snapshot.send_replace(Some(Arc::clone(&status)));
        Some(status)
    }

    /// Flag the cached snapshot as stale after a failed fetch.
    pub(crate) fn mark_stale(&self, id: &DeviceId) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        entry.snapshot.send_if_modified(|current| {
            let next = match current.as_deref() {
                Some(status) if !status.stale => status.marked_stale(),
                _ => return false,
            };
            *current = Some(Arc::new(next));
            true
        })
    }

    /// Flag one channel as outdated after a command touched it.
    pub(crate) fn mark_channel_stale(&self, id: &DeviceId, channel_id: u32) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let mut pending = entry.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.insert(channel_id, self.begin_fetch());

        entry.snapshot.send_if_modified(|current| {
            let next = current
                .as_ref()
                .and_then(|status| status.with_channel_stale(channel_id));
            match next {
                Some(next) => {
                    *current = Some(Arc::new(next));
                    true
                }
                None => false,
            }
        })
    }

    fn entry(&self, id: &DeviceId) -> Option<Arc<Entry>> {
        self.entries.get(id).map(|r| Arc::clone(r.value()))
    }
}
