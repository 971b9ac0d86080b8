//! Outbound credential attachment.

use reqwest::Request;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tracing::{trace, warn};

use crate::role::Role;
use crate::session::Session;

/// Attaches the role's access credential to outbound requests.
///
/// Never fails a request: whenever no credential can be resolved the
/// `Authorization` header is removed instead of being left stale.
#[derive(Clone)]
pub struct RequestAuthenticator {
    session: Session,
}

impl RequestAuthenticator {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Set or clear the bearer credential on `request` for `role`.
    ///
    /// Returns `true` when a credential was attached.
    pub async fn authenticate(&self, request: &mut Request, role: Option<Role>) -> bool {
        let Some(role) = role else {
            trace!(url = %request.url(), "No active role; sending without credential");
            request.headers_mut().remove(AUTHORIZATION);
            return false;
        };

        let token = match self.session.access_token(role).await {
            Ok(token) => token,
            Err(e) => {
                warn!(role = %role, error = %e, "Failed to read access token");
                None
            }
        };

        match token.as_deref().and_then(bearer_value) {
            Some(value) => {
                request.headers_mut().insert(AUTHORIZATION, value);
                true
            }
            None => {
                request.headers_mut().remove(AUTHORIZATION);
                false
            }
        }
    }
}

/// Build a `Bearer` header value, rejecting empty or non-visible-ASCII tokens.
pub(crate) fn bearer_value(token: &str) -> Option<HeaderValue> {
    if token.trim().is_empty() {
        return None;
    }
    let mut value = HeaderValue::from_str(&format!("Bearer {token}")).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// Overwrite the bearer credential with `token`.
pub(crate) fn set_bearer(request: &mut Request, token: &str) {
    match bearer_value(token) {
        Some(value) => {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        None => {
            request.headers_mut().remove(AUTHORIZATION);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use reqwest::Method;

    use super::*;
    use crate::session::CredentialPair;
    use crate::store::MemoryCredentialStore;

    fn request() -> Request {
        Request::new(Method::GET, "http://localhost/api/classes".parse().unwrap())
    }

    async fn session_with_all_roles() -> Session {
        let session = Session::new(Arc::new(MemoryCredentialStore::new()), Duration::days(7));
        for role in Role::ALL {
            let pair = CredentialPair {
                access_token: format!("{}-access", role.credential_key()),
                refresh_token: format!("{}-refresh", role.credential_key()),
                access_expiry: Utc::now() + Duration::minutes(15),
                refresh_expiry: None,
            };
            session.store_pair(role, &pair).await.unwrap();
        }
        session
    }

    fn auth_header(request: &Request) -> Option<&str> {
        request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn test_attaches_only_active_role_credential() {
        let auth = RequestAuthenticator::new(session_with_all_roles().await);
        let mut req = request();

        assert!(auth.authenticate(&mut req, Some(Role::Staff)).await);
        assert_eq!(auth_header(&req), Some("Bearer teacherToken-access"));
    }

    #[tokio::test]
    async fn test_no_role_clears_stale_header() {
        let auth = RequestAuthenticator::new(session_with_all_roles().await);
        let mut req = request();
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));

        assert!(!auth.authenticate(&mut req, None).await);
        assert_eq!(auth_header(&req), None);
    }

    #[tokio::test]
    async fn test_missing_token_clears_header() {
        let session = Session::new(Arc::new(MemoryCredentialStore::new()), Duration::days(7));
        let auth = RequestAuthenticator::new(session);
        let mut req = request();
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));

        assert!(!auth.authenticate(&mut req, Some(Role::Member)).await);
        assert_eq!(auth_header(&req), None);
    }

    #[test]
    fn test_bearer_value_rejects_malformed_tokens() {
        assert!(bearer_value("").is_none());
        assert!(bearer_value("   ").is_none());
        assert!(bearer_value("bad\ntoken").is_none());
        assert!(bearer_value("abc.def").unwrap().is_sensitive());
    }
}
