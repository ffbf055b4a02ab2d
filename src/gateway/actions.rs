//! Device action catalog
//!
//! Caches each device's configured actions so acknowledgements can carry a
//! human label (`"Lights On"`) instead of the raw command id. Entries expire
//! after a TTL; at capacity the oldest insert is evicted.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::client::{ActionSource, DeviceAction, RegistrationError};

struct CacheEntry {
    actions: Vec<DeviceAction>,
    inserted_at: Instant,
}

/// TTL cache in front of an [`ActionSource`]
///
/// Reads and refreshes go through `peek`, so recency in the LRU is insertion
/// order and the least recently used entry is the oldest insert.
pub struct ActionCatalog {
    source: Arc<dyn ActionSource>,
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl ActionCatalog {
    pub fn new(source: Arc<dyn ActionSource>, ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Cached actions for a device, if present and fresh
    pub async fn cached(&self, device_id: &str) -> Option<Vec<DeviceAction>> {
        let mut entries = self.entries.lock().await;
        let entry = entries.peek(device_id)?;

        if entry.inserted_at.elapsed() > self.ttl {
            entries.pop(device_id);
            None
        } else {
            Some(entry.actions.clone())
        }
    }

    pub async fn insert(&self, device_id: &str, actions: Vec<DeviceAction>) {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.peek_mut(device_id) {
            entry.actions = actions;
            entry.inserted_at = Instant::now();
            return;
        }

        let entry = CacheEntry {
            actions,
            inserted_at: Instant::now(),
        };
        if let Some((evicted, _)) = entries.push(device_id.to_string(), entry) {
            debug!(device_id = %evicted, "Evicted action catalog entry");
        }
    }

    /// Actions for a device, fetched from the source on a cache miss
    pub async fn actions(&self, device_id: &str) -> Result<Vec<DeviceAction>, RegistrationError> {
        if let Some(actions) = self.cached(device_id).await {
            return Ok(actions);
        }

        let actions = self.source.device_actions(device_id).await?;
        self.insert(device_id, actions.clone()).await;
        Ok(actions)
    }

    /// Friendly name of a command on a device
    ///
    /// `None` when the device has no such action, the action has no name, or
    /// the lookup failed.
    pub async fn label_for(&self, device_id: &str, command: &str) -> Option<String> {
        match self.actions(device_id).await {
            Ok(actions) => actions
                .into_iter()
                .find(|action| action.action_id == command)
                .and_then(|action| action.friendly_name)
                .filter(|name| !name.is_empty()),
            Err(e) => {
                warn!(device_id = %device_id, command = %command, error = %e, "Could not fetch action label");
                None
            }
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let ttl = self.ttl;

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() > ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            entries.pop(id);
        }

        if !expired.is_empty() {
            info!(
                removed = expired.len(),
                remaining = entries.len(),
                "Action catalog cleanup"
            );
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Purge expired entries periodically until the catalog is dropped
    pub fn spawn_purge(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let catalog: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(catalog) = catalog.upgrade() else {
                    break;
                };
                catalog.purge_expired().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl StaticSource {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl ActionSource for StaticSource {
        async fn device_actions(&self, _device_id: &str) -> Result<Vec<DeviceAction>, RegistrationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RegistrationError::Unavailable);
            }
            Ok(vec![
                DeviceAction {
                    action_id: "power_on".to_string(),
                    friendly_name: Some("Lights On".to_string()),
                },
                DeviceAction {
                    action_id: "reset".to_string(),
                    friendly_name: None,
                },
            ])
        }
    }

    fn action(id: &str) -> Vec<DeviceAction> {
        vec![DeviceAction {
            action_id: id.to_string(),
            friendly_name: None,
        }]
    }

    #[tokio::test]
    async fn test_label_lookup_is_cached() {
        let source = StaticSource::new(false);
        let catalog = ActionCatalog::new(source.clone(), Duration::from_secs(60), 10);

        assert_eq!(catalog.label_for("d", "power_on").await.as_deref(), Some("Lights On"));
        assert_eq!(catalog.label_for("d", "reset").await, None);
        assert_eq!(catalog.label_for("d", "unknown").await, None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_not_cached() {
        let source = StaticSource::new(true);
        let catalog = ActionCatalog::new(source.clone(), Duration::from_secs(60), 10);

        assert_eq!(catalog.label_for("d", "power_on").await, None);
        assert_eq!(catalog.label_for("d", "power_on").await, None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(catalog.is_empty().await);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_insert() {
        let catalog = ActionCatalog::new(StaticSource::new(false), Duration::from_secs(60), 2);

        catalog.insert("a", action("x")).await;
        catalog.insert("b", action("x")).await;
        // Refreshing keeps the original position
        catalog.insert("a", action("y")).await;
        catalog.insert("c", action("x")).await;

        assert_eq!(catalog.len().await, 2);
        assert!(catalog.cached("a").await.is_none());
        assert!(catalog.cached("b").await.is_some());
        assert!(catalog.cached("c").await.is_some());
    }

    #[tokio::test]
    async fn test_reads_do_not_change_eviction_order() {
        let catalog = ActionCatalog::new(StaticSource::new(false), Duration::from_secs(60), 2);

        catalog.insert("a", action("x")).await;
        catalog.insert("b", action("x")).await;
        assert!(catalog.cached("a").await.is_some());
        catalog.insert("c", action("x")).await;

        assert!(catalog.cached("a").await.is_none());
        assert!(catalog.cached("b").await.is_some());
    }

    #[tokio::test]
    async fn test_zero_capacity_holds_one_entry() {
        let catalog = ActionCatalog::new(StaticSource::new(false), Duration::from_secs(60), 0);

        catalog.insert("a", action("x")).await;
        catalog.insert("b", action("x")).await;

        assert_eq!(catalog.len().await, 1);
        assert!(catalog.cached("b").await.is_some());
    }

    #[tokio::test]
    async fn test_expiry() {
        let catalog = ActionCatalog::new(StaticSource::new(false), Duration::from_millis(20), 10);

        catalog.insert("a", action("x")).await;
        catalog.insert("b", action("x")).await;
        assert!(catalog.cached("a").await.is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(catalog.cached("a").await.is_none());
        assert_eq!(catalog.purge_expired().await, 1);
        assert!(catalog.is_empty().await);
    }
}
