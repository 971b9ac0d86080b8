//! Role-aware view over a [`CredentialStore`].
//!
//! This is the only place that maps roles onto store keys.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Error, StoreError};
use crate::role::Role;
use crate::store::CredentialStore;

/// Access/refresh credential pair for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expiry: DateTime<Utc>,
    /// Lifetime of the refresh token as reported by the backend, if any.
    #[serde(default)]
    pub refresh_expiry: Option<DateTime<Utc>>,
}

/// Token payload returned by a login endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Refresh token lifetime in seconds.
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
}

impl LoginResponse {
    /// Turn the response into a pair, falling back to the given lifetimes
    /// when the backend omits them.
    ///
    /// Fails when a reported lifetime does not fit a `DateTime<Utc>`.
    pub fn into_pair(
        self,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<CredentialPair, Error> {
        let now = Utc::now();
        let access_ttl = lifetime("expires_in", self.expires_in)?.unwrap_or(access_ttl);
        let refresh_ttl =
            lifetime("refresh_expires_in", self.refresh_expires_in)?.unwrap_or(refresh_ttl);

        let access_expiry = checked_expiry(now, access_ttl)
            .ok_or_else(|| Error::InvalidLifetime(format!("access lifetime {access_ttl}")))?;
        let refresh_expiry = checked_expiry(now, refresh_ttl)
            .ok_or_else(|| Error::InvalidLifetime(format!("refresh lifetime {refresh_ttl}")))?;

        Ok(CredentialPair {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            access_expiry,
            refresh_expiry: Some(refresh_expiry),
        })
    }
}

fn lifetime(field: &str, secs: Option<i64>) -> Result<Option<Duration>, Error> {
    secs.map(|secs| {
        Duration::try_seconds(secs)
            .ok_or_else(|| Error::InvalidLifetime(format!("{field} = {secs} is out of range")))
    })
    .transpose()
}

fn checked_expiry(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    now.checked_add_signed(ttl)
}

/// `now + ttl`, saturating at the latest representable instant.
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    checked_expiry(now, ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Role-scoped credential operations.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn CredentialStore>,
    refresh_ttl: Duration,
}

impl Session {
    pub fn new(store: Arc<dyn CredentialStore>, refresh_ttl: Duration) -> Self {
        Self { store, refresh_ttl }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Current access token of `role`, if stored and unexpired.
    pub async fn access_token(&self, role: Role) -> Result<Option<String>, StoreError> {
        self.store.get(role.credential_key()).await
    }

    /// Current refresh token of `role`, if stored and unexpired.
    pub async fn refresh_token(&self, role: Role) -> Result<Option<String>, StoreError> {
        self.store.get(&role.refresh_key()).await
    }

    /// Persist a freshly issued pair for `role`.
    #[instrument(skip(self, pair), fields(role = %role))]
    pub async fn store_pair(&self, role: Role, pair: &CredentialPair) -> Result<(), StoreError> {
        let refresh_expiry = pair
            .refresh_expiry
            .unwrap_or_else(|| expiry_after(Utc::now(), self.refresh_ttl));

        self.store
            .set(role.credential_key(), &pair.access_token, pair.access_expiry)
            .await?;
        self.store
            .set(&role.refresh_key(), &pair.refresh_token, refresh_expiry)
            .await?;

        info!(access_expiry = %pair.access_expiry, "Stored credentials");
        Ok(())
    }

    /// Replace the access token of `role`, leaving the refresh token untouched.
    pub async fn update_access(
        &self,
        role: Role,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.store
            .set(role.credential_key(), access_token, expires_at)
            .await
    }

    /// Remove both credentials of `role`.
    #[instrument(skip(self), fields(role = %role))]
    pub async fn clear(&self, role: Role) -> Result<(), StoreError> {
        self.store.remove(role.credential_key()).await?;
        self.store.remove(&role.refresh_key()).await?;
        debug!("Cleared credentials");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCredentialStore;

    fn session() -> Session {
        Session::new(Arc::new(MemoryCredentialStore::new()), Duration::days(7))
    }

    fn pair(access: &str, refresh: &str) -> CredentialPair {
        CredentialPair {
            access_token: access.into(),
            refresh_token: refresh.into(),
            access_expiry: Utc::now() + Duration::minutes(15),
            refresh_expiry: None,
        }
    }

    #[tokio::test]
    async fn test_store_pair_and_clear_are_role_scoped() {
        let session = session();
        session
            .store_pair(Role::Staff, &pair("t-access", "t-refresh"))
            .await
            .unwrap();
        session
            .store_pair(Role::Member, &pair("s-access", "s-refresh"))
            .await
            .unwrap();

        assert_eq!(
            session.access_token(Role::Staff).await.unwrap().as_deref(),
            Some("t-access")
        );
        assert_eq!(
            session.refresh_token(Role::Staff).await.unwrap().as_deref(),
            Some("t-refresh")
        );

        session.clear(Role::Staff).await.unwrap();
        assert_eq!(session.access_token(Role::Staff).await.unwrap(), None);
        assert_eq!(session.refresh_token(Role::Staff).await.unwrap(), None);

        assert_eq!(
            session.access_token(Role::Member).await.unwrap().as_deref(),
            Some("s-access")
        );
    }

    #[tokio::test]
    async fn test_update_access_keeps_refresh_token() {
        let session = session();
        session
            .store_pair(Role::OrgAdmin, &pair("old", "refresh"))
            .await
            .unwrap();

        session
            .update_access(Role::OrgAdmin, "new", Utc::now() + Duration::minutes(15))
            .await
            .unwrap();

        assert_eq!(
            session.access_token(Role::OrgAdmin).await.unwrap().as_deref(),
            Some("new")
        );
        assert_eq!(
            session.refresh_token(Role::OrgAdmin).await.unwrap().as_deref(),
            Some("refresh")
        );
    }

    #[test]
    fn test_login_response_lifetimes() {
        let response: LoginResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":60,"user":{"id":1}}"#,
        )
        .unwrap();

        let before = Utc::now();
        let pair = response
            .into_pair(Duration::minutes(15), Duration::days(7))
            .unwrap();

        assert_eq!(pair.access_token, "a");
        assert!(pair.access_expiry <= before + Duration::seconds(61));
        let refresh_expiry = pair.refresh_expiry.unwrap();
        assert!(refresh_expiry >= before + Duration::days(7));
    }

    #[test]
    fn test_login_response_rejects_unrepresentable_lifetimes() {
        let huge = LoginResponse {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: Some(100_000_000_000_000_000),
            refresh_expires_in: None,
        };
        assert!(matches!(
            huge.into_pair(Duration::minutes(15), Duration::days(7)),
            Err(Error::InvalidLifetime(_))
        ));

        let overflowing = LoginResponse {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: None,
            refresh_expires_in: Some(i64::MAX / 1000),
        };
        assert!(matches!(
            overflowing.into_pair(Duration::minutes(15), Duration::days(7)),
            Err(Error::InvalidLifetime(_))
        ));
    }

    #[test]
    fn test_expiry_after_saturates() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(expiry_after(now, Duration::minutes(1)), now + Duration::minutes(1));
    }
}
