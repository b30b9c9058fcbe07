use crate::entities::{prelude::*, upload_links};
use crate::services::error::UploadError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Disabled,
}

impl SessionStatus {
    pub fn from_code(code: &str) -> Self {
        if code == upload_links::STATUS_ACTIVE {
            SessionStatus::Active
        } else {
            SessionStatus::Disabled
        }
    }
}

/// Read-only view of one upload link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub token: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub destination_path: String,
    pub status: SessionStatus,
}

impl SessionRecord {
    /// Both bounds are inclusive.
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_from && now <= self.valid_until
    }
}

impl From<upload_links::Model> for SessionRecord {
    fn from(model: upload_links::Model) -> Self {
        Self {
            status: SessionStatus::from_code(&model.status),
            token: model.token,
            valid_from: model.valid_from,
            valid_until: model.valid_until,
            destination_path: model.destination_path,
        }
    }
}

/// Durable table of upload links, owned by the link admin.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// All records whose status is active.
    async fn list_active(&self) -> Result<Vec<SessionRecord>>;
    async fn ping(&self) -> Result<()>;
}

pub struct SeaOrmSessionStore {
    db: DatabaseConnection,
}

impl SeaOrmSessionStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for SeaOrmSessionStore {
    async fn list_active(&self) -> Result<Vec<SessionRecord>> {
        let rows = UploadLinks::find()
            .filter(upload_links::Column::Status.eq(upload_links::STATUS_ACTIVE))
            .all(&self.db)
            .await?;

        Ok(rows.into_iter().map(SessionRecord::from).collect())
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping().await?;
        Ok(())
    }
}

pub type SessionSnapshot = HashMap<String, SessionRecord>;

/// Process-local token → session map.
///
/// The map is never edited in place: every reload builds a new snapshot and
/// swaps the `Arc`, so a reader holds either the previous map or the new one.
/// Reloads that finish out of order cannot roll the cache back, because each
/// reload takes a ticket before querying and only a newer ticket may publish.
pub struct SessionCache {
    store: Arc<dyn SessionStore>,
    snapshot: RwLock<Arc<SessionSnapshot>>,
    next_ticket: AtomicU64,
    published: AtomicU64,
}

impl SessionCache {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            next_ticket: AtomicU64::new(1),
            published: AtomicU64::new(0),
        }
    }

    /// Replace the whole map with the store's active records.
    pub async fn reload(&self) -> Result<usize, UploadError> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);

        let records = self.store.list_active().await.map_err(|e| {
            tracing::error!("Error loading sessions into cache: {}", e);
            UploadError::SessionStore(e.to_string())
        })?;

        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            if record.status != SessionStatus::Active {
                continue;
            }
            if map.contains_key(&record.token) {
                tracing::warn!("Duplicate session token in store, keeping first: {}", record.token);
                continue;
            }
            map.insert(record.token.clone(), record);
        }
        let count = map.len();

        let mut guard = self.snapshot.write().await;
        if ticket > self.published.load(Ordering::SeqCst) {
            *guard = Arc::new(map);
            self.published.store(ticket, Ordering::SeqCst);
            tracing::debug!("Session cache reloaded with {} active sessions", count);
        } else {
            tracing::debug!("Discarding stale session cache reload (ticket {})", ticket);
        }

        Ok(count)
    }

    pub async fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.read().await.clone()
    }

    pub async fn get(&self, token: &str) -> Option<SessionRecord> {
        self.snapshot.read().await.get(token).cloned()
    }

    /// False until the first successful reload.
    pub fn is_loaded(&self) -> bool {
        self.published.load(Ordering::SeqCst) > 0
    }

    pub async fn ping_store(&self) -> Result<()> {
        self.store.ping().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Mutex;

    /// In-memory store the tests can mutate between reloads.
    #[derive(Default)]
    pub struct MemorySessionStore {
        pub records: Mutex<Vec<SessionRecord>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl MemorySessionStore {
        pub fn with(records: Vec<SessionRecord>) -> Self {
            Self {
                records: Mutex::new(records),
                fail: Default::default(),
            }
        }

        pub fn set_status(&self, token: &str, status: SessionStatus) {
            for record in self.records.lock().unwrap().iter_mut() {
                if record.token == token {
                    record.status = status;
                }
            }
        }
    }

    #[async_trait]
    impl SessionStore for MemorySessionStore {
        async fn list_active(&self) -> Result<Vec<SessionRecord>> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("store offline");
            }
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.status == SessionStatus::Active)
                .cloned()
                .collect())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    pub fn record(token: &str, destination: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            token: token.to_string(),
            valid_from: now - Duration::hours(1),
            valid_until: now + Duration::hours(1),
            destination_path: destination.to_string(),
            status: SessionStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_cache_empty_until_reload() {
        let store = Arc::new(MemorySessionStore::with(vec![record("tok1", "a")]));
        let cache = SessionCache::new(store);

        assert!(!cache.is_loaded());
        assert!(cache.get("tok1").await.is_none());

        assert_eq!(cache.reload().await.unwrap(), 1);
        assert!(cache.is_loaded());
        assert_eq!(cache.get("tok1").await.unwrap().destination_path, "a");
    }

    #[tokio::test]
    async fn test_reload_replaces_wholesale() {
        let store = Arc::new(MemorySessionStore::with(vec![
            record("tok1", "a"),
            record("tok2", "b"),
        ]));
        let cache = SessionCache::new(store.clone());
        cache.reload().await.unwrap();

        let before = cache.snapshot().await;
        store.set_status("tok1", SessionStatus::Disabled);
        cache.reload().await.unwrap();

        // A snapshot taken earlier is unaffected by the swap
        assert!(before.contains_key("tok1"));
        assert!(cache.get("tok1").await.is_none());
        assert!(cache.get("tok2").await.is_some());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_snapshot() {
        let store = Arc::new(MemorySessionStore::with(vec![record("tok1", "a")]));
        let cache = SessionCache::new(store.clone());
        cache.reload().await.unwrap();

        store.fail.store(true, Ordering::SeqCst);
        let err = cache.reload().await.unwrap_err();
        assert!(matches!(err, UploadError::SessionStore(_)));
        assert!(cache.get("tok1").await.is_some());
    }

    #[test]
    fn test_window_bounds_inclusive() {
        let r = record("tok", "a");
        assert!(r.is_within_window(r.valid_from));
        assert!(r.is_within_window(r.valid_until));
        assert!(!r.is_within_window(r.valid_until + Duration::milliseconds(1)));
        assert!(!r.is_within_window(r.valid_from - Duration::milliseconds(1)));
    }
}
