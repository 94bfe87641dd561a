//! Single-active-session enforcement.
//!
//! Each identity carries one mutable session marker (`last_login_at`).
//! Login and logout both advance it to "now"; a token is current only while
//! its issuance instant is not older than the marker. No per-token state is
//! kept on the server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::clock::Clock;
use crate::error::{SessionError, SessionResult, StoreError, StoreResult};

/// What the credential store knows about an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub identity: String,
    pub last_login_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Persistence boundary for identities and their session markers.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns `None` when the identity does not exist.
    async fn load(&self, identity: &str) -> StoreResult<Option<CredentialRecord>>;

    /// Writes the session marker and returns the value now stored, or `None`
    /// when the identity does not exist. The stored value must be later than
    /// any previous marker for the identity.
    async fn set_last_login(
        &self,
        identity: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>>;
}

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: DashMap<String, CredentialRecord>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an identity with no session marker yet.
    pub fn insert(&self, identity: &str, active: bool) {
        self.records.insert(
            identity.to_string(),
            CredentialRecord {
                identity: identity.to_string(),
                last_login_at: None,
                active,
            },
        );
    }

    #[cfg(any(test, feature = "test-seams"))]
    pub fn set_active(&self, identity: &str, active: bool) -> bool {
        match self.records.get_mut(identity) {
            Some(mut record) => {
                record.active = active;
                true
            }
            None => false,
        }
    }

    #[cfg(any(test, feature = "test-seams"))]
    pub fn remove(&self, identity: &str) {
        self.records.remove(identity);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, identity: &str) -> StoreResult<Option<CredentialRecord>> {
        Ok(self.records.get(identity).map(|r| r.clone()))
    }

    async fn set_last_login(
        &self,
        identity: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let Some(mut record) = self.records.get_mut(identity) else {
            return Ok(None);
        };
        // Strictly advance so tokens stamped with the previous marker stop
        // being current, even if the clock stalled or stepped back.
        let marker = match record.last_login_at {
            Some(previous) if previous >= at => previous + chrono::Duration::milliseconds(1),
            _ => at,
        };
        record.last_login_at = Some(marker);
        Ok(Some(marker))
    }
}

/// Decides whether a verified token is still the newest session for its
/// identity, and advances the marker on login and logout.
pub struct SessionGuard {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl SessionGuard {
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    /// `true` when the token is at least as new as the marker. Equality is
    /// the token minted by the login that wrote the marker. A missing marker
    /// accepts any token.
    pub fn is_current(issued_at: DateTime<Utc>, last_login_at: Option<DateTime<Utc>>) -> bool {
        match last_login_at {
            Some(marker) => issued_at >= marker,
            None => true,
        }
    }

    /// Loads the identity and checks the token's issuance against its marker.
    ///
    /// Store failures and timeouts surface as [`SessionError::Store`]; the
    /// caller rejects the request.
    pub async fn validate(&self, identity: &str, issued_at: DateTime<Utc>) -> SessionResult<()> {
        let record = self
            .bounded(self.store.load(identity))
            .await?
            .ok_or_else(|| SessionError::IdentityNotFound(identity.to_string()))?;

        if !record.active {
            return Err(SessionError::IdentityInactive(identity.to_string()));
        }

        if !Self::is_current(issued_at, record.last_login_at) {
            tracing::debug!(
                identity,
                issued_at = %issued_at,
                last_login_at = ?record.last_login_at,
                "token predates session marker"
            );
            return Err(SessionError::Superseded);
        }

        Ok(())
    }

    /// Advances the session marker to now. Shared by login and logout; every
    /// token issued before the returned instant stops being current.
    pub async fn record_login(&self, identity: &str) -> SessionResult<DateTime<Utc>> {
        let now = self.clock.now();
        let marker = self
            .bounded(self.store.set_last_login(identity, now))
            .await?
            .ok_or_else(|| SessionError::IdentityNotFound(identity.to_string()))?;

        tracing::debug!(identity, marker = %marker, "session marker advanced");
        Ok(marker)
    }

    async fn bounded<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn guard_with(identity: &str, clock_secs: i64) -> (SessionGuard, Arc<MemoryCredentialStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert(identity, true);
        let clock = Arc::new(ManualClock::at_unix(clock_secs));
        let guard = SessionGuard::new(store.clone(), clock.clone(), Duration::from_millis(500));
        (guard, store, clock)
    }

    struct StalledStore;

    #[async_trait]
    impl CredentialStore for StalledStore {
        async fn load(&self, _identity: &str) -> StoreResult<Option<CredentialRecord>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn set_last_login(
            &self,
            _identity: &str,
            _at: DateTime<Utc>,
        ) -> StoreResult<Option<DateTime<Utc>>> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
    }

    #[test]
    fn equal_instants_are_current() {
        assert!(SessionGuard::is_current(at(1_000), Some(at(1_000))));
    }

    #[test]
    fn older_token_is_not_current() {
        assert!(!SessionGuard::is_current(at(999), Some(at(1_000))));
        assert!(SessionGuard::is_current(at(1_001), Some(at(1_000))));
    }

    #[test]
    fn missing_marker_accepts_any_token() {
        assert!(SessionGuard::is_current(at(0), None));
    }

    #[tokio::test]
    async fn later_login_supersedes_earlier_token() {
        let (guard, _store, clock) = guard_with("u1", 1_000);

        let t1 = guard.record_login("u1").await.unwrap();
        assert!(guard.validate("u1", t1).await.is_ok());

        clock.set(at(2_000));
        let t2 = guard.record_login("u1").await.unwrap();

        assert_eq!(guard.validate("u1", t1).await, Err(SessionError::Superseded));
        assert!(guard.validate("u1", t2).await.is_ok());
    }

    #[tokio::test]
    async fn logout_invalidates_current_token() {
        let (guard, _store, clock) = guard_with("u1", 1_000);
        let issued = guard.record_login("u1").await.unwrap();

        clock.advance(chrono::Duration::milliseconds(1));
        guard.record_login("u1").await.unwrap();

        assert_eq!(guard.validate("u1", issued).await, Err(SessionError::Superseded));
    }

    #[tokio::test]
    async fn bootstrap_identity_accepts_token() {
        let (guard, _store, _clock) = guard_with("u1", 1_000);
        assert!(guard.validate("u1", at(10)).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_identity_fails_closed() {
        let (guard, _store, _clock) = guard_with("u1", 1_000);
        assert_eq!(
            guard.validate("ghost", at(1_000)).await,
            Err(SessionError::IdentityNotFound("ghost".to_string()))
        );
        assert_eq!(
            guard.record_login("ghost").await,
            Err(SessionError::IdentityNotFound("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn deactivated_identity_is_rejected() {
        let (guard, store, _clock) = guard_with("u1", 1_000);
        let issued = guard.record_login("u1").await.unwrap();
        assert!(store.set_active("u1", false));

        assert_eq!(
            guard.validate("u1", issued).await,
            Err(SessionError::IdentityInactive("u1".to_string()))
        );
    }

    #[tokio::test]
    async fn removed_identity_is_rejected() {
        let (guard, store, _clock) = guard_with("u1", 1_000);
        let issued = guard.record_login("u1").await.unwrap();
        store.remove("u1");

        assert!(matches!(
            guard.validate("u1", issued).await,
            Err(SessionError::IdentityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn marker_never_moves_backwards() {
        let store = MemoryCredentialStore::new();
        store.insert("u1", true);
        let just_after = at(2_000) + chrono::Duration::milliseconds(1);

        assert_eq!(store.set_last_login("u1", at(2_000)).await.unwrap(), Some(at(2_000)));
        assert_eq!(store.set_last_login("u1", at(1_500)).await.unwrap(), Some(just_after));

        let record = store.load("u1").await.unwrap().unwrap();
        assert_eq!(record.last_login_at, Some(just_after));
    }

    #[tokio::test]
    async fn logout_in_same_instant_still_supersedes() {
        let (guard, _store, _clock) = guard_with("u1", 1_000);
        let issued = guard.record_login("u1").await.unwrap();
        let marker = guard.record_login("u1").await.unwrap();

        assert!(marker > issued);
        assert_eq!(guard.validate("u1", issued).await, Err(SessionError::Superseded));
        assert!(guard.validate("u1", marker).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_times_out() {
        let clock = Arc::new(ManualClock::at_unix(1_000));
        let guard = SessionGuard::new(Arc::new(StalledStore), clock, Duration::from_millis(200));

        assert_eq!(
            guard.validate("u1", at(1_000)).await,
            Err(SessionError::Store(StoreError::Timeout))
        );
    }

    #[tokio::test]
    async fn store_error_propagates_from_record_login() {
        let clock = Arc::new(ManualClock::at_unix(1_000));
        let guard = SessionGuard::new(Arc::new(StalledStore), clock, Duration::from_millis(200));

        assert!(matches!(
            guard.record_login("u1").await,
            Err(SessionError::Store(StoreError::Unavailable(_)))
        ));
    }
}
