use crate::services::error::UploadError;
use crate::services::session_cache::{SessionCache, SessionRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Process-wide "stop admitting uploads" switch.
///
/// Raised either manually by an operator or for the duration of a
/// [`MaintenanceHold`] (the staging janitor takes one while it sweeps).
#[derive(Debug, Default)]
pub struct MaintenanceFlag {
    manual: AtomicBool,
    holds: AtomicUsize,
}

impl MaintenanceFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_manual(&self, enabled: bool) {
        self.manual.store(enabled, Ordering::SeqCst);
    }

    pub fn is_manual(&self) -> bool {
        self.manual.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.is_manual() || self.holds.load(Ordering::SeqCst) > 0
    }

    pub fn hold(self: &Arc<Self>) -> MaintenanceHold {
        self.holds.fetch_add(1, Ordering::SeqCst);
        MaintenanceHold { flag: self.clone() }
    }
}

pub struct MaintenanceHold {
    flag: Arc<MaintenanceFlag>,
}

impl Drop for MaintenanceHold {
    fn drop(&mut self) {
        self.flag.holds.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct AccessGate {
    cache: Arc<SessionCache>,
    maintenance: Arc<MaintenanceFlag>,
    reload_per_request: bool,
}

impl AccessGate {
    pub fn new(
        cache: Arc<SessionCache>,
        maintenance: Arc<MaintenanceFlag>,
        reload_per_request: bool,
    ) -> Self {
        Self {
            cache,
            maintenance,
            reload_per_request,
        }
    }

    /// Grant or reject `token` at `now`. On success the caller gets the
    /// session, including the destination path uploads must land in.
    pub async fn check_access(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, UploadError> {
        if self.maintenance.is_active() {
            tracing::info!("Maintenance in progress, stopping request for URL: {}", token);
            return Err(UploadError::MaintenanceInProgress);
        }

        if self.reload_per_request || !self.cache.is_loaded() {
            self.cache.reload().await?;
        }

        let session = match self.cache.get(token).await {
            Some(session) => session,
            None => {
                tracing::info!("Received forbidden access with URL: {}", token);
                return Err(UploadError::InvalidToken);
            }
        };

        if !session.is_within_window(now) {
            tracing::info!("Expired or not yet active access for URL: {}", token);
            return Err(UploadError::SessionExpired);
        }

        Ok(session)
    }

    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    pub fn maintenance(&self) -> &Arc<MaintenanceFlag> {
        &self.maintenance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session_cache::SessionStatus;
    use crate::services::session_cache::tests::{MemorySessionStore, record};
    use chrono::Duration;

    fn gate_with(store: Arc<MemorySessionStore>, reload_per_request: bool) -> AccessGate {
        AccessGate::new(
            Arc::new(SessionCache::new(store)),
            Arc::new(MaintenanceFlag::new()),
            reload_per_request,
        )
    }

    #[tokio::test]
    async fn test_grants_valid_token() {
        let store = Arc::new(MemorySessionStore::with(vec![record("tok", "projects")]));
        let gate = gate_with(store, true);

        let session = gate.check_access("tok", Utc::now()).await.unwrap();
        assert_eq!(session.destination_path, "projects");
    }

    #[tokio::test]
    async fn test_rejects_unknown_token() {
        let store = Arc::new(MemorySessionStore::with(vec![record("tok", "projects")]));
        let gate = gate_with(store, true);

        let err = gate.check_access("nope", Utc::now()).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidToken));
    }

    #[tokio::test]
    async fn test_expired_then_disabled() {
        let store = Arc::new(MemorySessionStore::with(vec![record("tok", "projects")]));
        let gate = gate_with(store.clone(), true);

        let later = Utc::now() + Duration::hours(2);
        let err = gate.check_access("tok", later).await.unwrap_err();
        assert!(matches!(err, UploadError::SessionExpired));
        assert!(gate.cache().get("tok").await.is_some());

        store.set_status("tok", SessionStatus::Disabled);
        let err = gate.check_access("tok", Utc::now()).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidToken));
    }

    #[tokio::test]
    async fn test_not_yet_active() {
        let store = Arc::new(MemorySessionStore::with(vec![record("tok", "projects")]));
        let gate = gate_with(store, true);

        let earlier = Utc::now() - Duration::hours(2);
        let err = gate.check_access("tok", earlier).await.unwrap_err();
        assert!(matches!(err, UploadError::SessionExpired));
    }

    #[tokio::test]
    async fn test_maintenance_rejects_before_lookup() {
        let store = Arc::new(MemorySessionStore::with(vec![record("tok", "projects")]));
        let gate = gate_with(store, true);

        gate.maintenance().set_manual(true);
        let err = gate.check_access("tok", Utc::now()).await.unwrap_err();
        assert!(matches!(err, UploadError::MaintenanceInProgress));
        // Fails fast without touching the store
        assert!(!gate.cache().is_loaded());

        gate.maintenance().set_manual(false);
        assert!(gate.check_access("tok", Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_maintenance_hold_is_scoped() {
        let flag = Arc::new(MaintenanceFlag::new());
        {
            let _hold = flag.hold();
            assert!(flag.is_active());
        }
        assert!(!flag.is_active());
    }

    #[tokio::test]
    async fn test_without_per_request_reload_needs_explicit_signal() {
        let store = Arc::new(MemorySessionStore::with(vec![record("tok", "projects")]));
        let gate = gate_with(store.clone(), false);

        // First check populates the empty cache
        assert!(gate.check_access("tok", Utc::now()).await.is_ok());

        store.set_status("tok", SessionStatus::Disabled);
        assert!(gate.check_access("tok", Utc::now()).await.is_ok());

        gate.cache().reload().await.unwrap();
        let err = gate.check_access("tok", Utc::now()).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidToken));
    }
}
