//! Origin-scoped key-value storage shared by every tab.
//!
//! Mirrors browser local storage: synchronous reads and writes, and change
//! notifications delivered to every handle except the one that wrote.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// A change made to the shared storage by another handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
    source: u64,
}

impl StorageEvent {
    /// Event as delivered from a foreign writer. Used to feed
    /// [`SessionManager::handle_storage_event`](crate::SessionManager::handle_storage_event)
    /// from platform glue.
    #[must_use]
    pub fn external(key: impl Into<String>, new_value: Option<String>) -> Self {
        Self {
            key: key.into(),
            new_value,
            source: 0,
        }
    }
}

/// Receiver for changes made by other handles.
pub struct StorageEvents {
    rx: broadcast::Receiver<StorageEvent>,
    own: u64,
}

impl StorageEvents {
    /// Next foreign change, or `None` once the storage is gone.
    ///
    /// Lagged events are skipped: listeners re-read storage rather than
    /// relying on payloads.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.source == self.own => {}
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "storage listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Shared key-value storage.
///
/// `set_many` and `remove_many` apply all entries atomically: no reader
/// observes half of a batch.
pub trait Storage: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;

    fn set_many(&self, entries: &[(&str, &str)]);

    fn remove_many(&self, keys: &[&str]);

    /// Subscribe to changes made through other handles.
    fn subscribe(&self) -> StorageEvents;

    fn set(&self, key: &str, value: &str) {
        self.set_many(&[(key, value)]);
    }

    fn remove(&self, key: &str) {
        self.remove_many(&[key]);
    }
}

struct Shared {
    entries: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    next_handle: AtomicU64,
}

/// In-process [`Storage`]. Each handle behaves as one tab of the same origin.
pub struct MemoryStorage {
    shared: Arc<Shared>,
    handle: u64,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            entries: RwLock::new(HashMap::new()),
            events,
            // 0 is reserved for `StorageEvent::external`.
            next_handle: AtomicU64::new(1),
        });
        Self::attach(shared)
    }

    /// Another handle on the same contents, as if opened in a new tab.
    #[must_use]
    pub fn open_tab(&self) -> Self {
        Self::attach(self.shared.clone())
    }

    /// Copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.shared.entries.read().clone()
    }

    fn attach(shared: Arc<Shared>) -> Self {
        let handle = shared.next_handle.fetch_add(1, Ordering::Relaxed);
        Self { shared, handle }
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        // No receivers is fine.
        let _ = self.shared.events.send(StorageEvent {
            key: key.to_owned(),
            new_value,
            source: self.handle,
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.shared.entries.read().get(key).cloned()
    }

    fn set_many(&self, entries: &[(&str, &str)]) {
        let mut changed = Vec::with_capacity(entries.len());
        {
            let mut map = self.shared.entries.write();
            for (key, value) in entries {
                let previous = map.insert((*key).to_owned(), (*value).to_owned());
                if previous.as_deref() != Some(*value) {
                    changed.push((*key, *value));
                }
            }
        }
        for (key, value) in changed {
            self.notify(key, Some(value.to_owned()));
        }
    }

    fn remove_many(&self, keys: &[&str]) {
        let mut removed = Vec::with_capacity(keys.len());
        {
            let mut map = self.shared.entries.write();
            for key in keys {
                if map.remove(*key).is_some() {
                    removed.push(*key);
                }
            }
        }
        for key in removed {
            self.notify(key, None);
        }
    }

    fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            rx: self.shared.events.subscribe(),
            own: self.handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tabs_share_contents() {
        let a = MemoryStorage::new();
        let b = a.open_tab();
        a.set("k", "v");
        assert_eq!(b.get("k").as_deref(), Some("v"));
        b.remove("k");
        assert_eq!(a.get("k"), None);
    }

    #[tokio::test]
    async fn events_skip_the_writer() {
        let a = MemoryStorage::new();
        let b = a.open_tab();
        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();

        a.set_many(&[("x", "1"), ("y", "2")]);
        b.remove("x");

        let first = b_events.recv().await.unwrap();
        assert_eq!((first.key.as_str(), first.new_value.as_deref()), ("x", Some("1")));
        let second = b_events.recv().await.unwrap();
        assert_eq!(second.key, "y");

        let seen_by_a = a_events.recv().await.unwrap();
        assert_eq!(seen_by_a.key, "x");
        assert_eq!(seen_by_a.new_value, None);
    }

    #[tokio::test]
    async fn unchanged_writes_are_silent() {
        let a = MemoryStorage::new();
        let b = a.open_tab();
        a.set("k", "v");
        let mut b_events = b.subscribe();
        a.set("k", "v");
        a.remove("missing");
        a.set("k", "w");
        let event = b_events.recv().await.unwrap();
        assert_eq!(event.new_value.as_deref(), Some("w"));
    }
}
