//! The authenticated request pipeline.
//!
//! ```text
//! send ─► authenticate ─► execute ─► 401? ─► refresh (single-flight) ─► replay once
//!                                     │                  │
//!                                     └─ returned as-is  └─ failure: clear + navigate to login
//! ```

use std::sync::Arc;

use reqwest::{Method, Request, Response};
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use crate::authenticator::{RequestAuthenticator, set_bearer};
use crate::config::PortalConfig;
use crate::error::{Error, Result};
use crate::http::build_http_client;
use crate::location::{Detached, Location};
use crate::recovery::{RecoveryDecision, RecoveryPolicy, RetryMarker};
use crate::refresh::{HttpRefreshTransport, RefreshCoordinator, RefreshTransport};
use crate::role::Role;
use crate::session::{CredentialPair, LoginResponse, Session};
use crate::store::{CredentialStore, MemoryCredentialStore};

/// HTTP client that attaches role-scoped credentials and recovers from
/// expired access tokens.
///
/// Cheap to clone; clones share the credential store and refresh flights.
#[derive(Clone)]
pub struct PortalClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: PortalConfig,
    http: reqwest::Client,
    session: Session,
    authenticator: RequestAuthenticator,
    policy: RecoveryPolicy,
    coordinator: RefreshCoordinator,
    location: Arc<dyn Location>,
}

/// Builder for [`PortalClient`].
pub struct PortalClientBuilder {
    config: PortalConfig,
    store: Option<Arc<dyn CredentialStore>>,
    location: Option<Arc<dyn Location>>,
    transport: Option<Arc<dyn RefreshTransport>>,
    http: Option<reqwest::Client>,
}

impl PortalClientBuilder {
    /// Credential store; defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Navigation context; defaults to [`Detached`].
    pub fn location(mut self, location: Arc<dyn Location>) -> Self {
        self.location = Some(location);
        self
    }

    /// Refresh transport; defaults to `POST` against the configured endpoint.
    pub fn transport(mut self, transport: Arc<dyn RefreshTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<PortalClient> {
        self.config.validate()?;

        let http = match self.http {
            Some(http) => http,
            None => build_http_client(&self.config)?,
        };
        let transport: Arc<dyn RefreshTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpRefreshTransport::new(
                http.clone(),
                self.config.refresh_endpoint()?,
            )),
        };
        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryCredentialStore::new()),
        };
        let location: Arc<dyn Location> = match self.location {
            Some(location) => location,
            None => Arc::new(Detached),
        };

        let session = Session::new(store, self.config.refresh_ttl());
        let coordinator =
            RefreshCoordinator::new(session.clone(), transport, self.config.access_ttl())
                .with_timeout(self.config.refresh_timeout());

        debug!(
            base_url = %self.config.base_url,
            routes = self.config.routes.entries().len(),
            "Built portal client"
        );

        Ok(PortalClient {
            inner: Arc::new(ClientInner {
                authenticator: RequestAuthenticator::new(session.clone()),
                policy: RecoveryPolicy::new(self.config.bypass.clone()),
                config: self.config,
                http,
                session,
                coordinator,
                location,
            }),
        })
    }
}

impl PortalClient {
    pub fn builder(config: PortalConfig) -> PortalClientBuilder {
        PortalClientBuilder {
            config,
            store: None,
            location: None,
            transport: None,
            http: None,
        }
    }

    pub fn config(&self) -> &PortalConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    pub fn location(&self) -> &Arc<dyn Location> {
        &self.inner.location
    }

    /// Role of the current location, resolved through the route table.
    ///
    /// `None` for unknown paths and detached contexts; a previously active
    /// role is never reused.
    pub fn active_role(&self) -> Option<Role> {
        let path = self.inner.location.current_path()?;
        self.inner.config.routes.resolve(&path)
    }

    /// Build a request for `path` relative to the configured base URL.
    pub fn request(&self, method: Method, path: &str) -> Result<Request> {
        let url = self.inner.config.endpoint(path)?;
        Ok(Request::new(method, url))
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        let request = self.request(Method::GET, path)?;
        self.send(request).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response> {
        let request = self
            .inner
            .http
            .post(self.inner.config.endpoint(path)?)
            .json(body)
            .build()?;
        self.send(request).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response> {
        let request = self.request(Method::DELETE, path)?;
        self.send(request).await
    }

    /// Send `request` as the role of the current location.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let role = self.active_role();
        self.send_as(request, role).await
    }

    /// Send `request` as `role`, recovering once from an expired access token.
    #[instrument(
        skip(self, request),
        fields(method = %request.method(), path = %request.url().path())
    )]
    pub async fn send_as(&self, mut request: Request, role: Option<Role>) -> Result<Response> {
        let inner = &self.inner;
        let path = request.url().path().to_string();

        inner.authenticator.authenticate(&mut request, role).await;
        let replay = request.try_clone();
        let response = inner.http.execute(request).await?;

        let mut marker = RetryMarker::default();
        if let RecoveryDecision::NotEligible(reason) =
            inner.policy.decide(response.status(), &path, marker)
        {
            trace!(status = %response.status(), ?reason, "Response returned as-is");
            return Ok(response);
        }

        let Some(mut replay) = replay else {
            warn!("401 on a request whose body cannot be replayed; returning it unchanged");
            return Ok(response);
        };
        marker.set();

        let outcome = inner.coordinator.refresh_with_outcome(role).await;
        let token = match outcome.result {
            Ok(token) => token,
            Err(e) => {
                // The coordinator has already cleared the role's credentials.
                if outcome.owner && inner.location.redirect(&inner.config.login_path) {
                    info!(
                        to = %inner.config.login_path,
                        error = %e,
                        "Session expired; redirected to login"
                    );
                }
                return Err(Error::Refresh(e));
            }
        };

        set_bearer(&mut replay, &token);
        let replayed = inner.http.execute(replay).await?;
        if let RecoveryDecision::NotEligible(reason) =
            inner.policy.decide(replayed.status(), &path, marker)
        {
            trace!(status = %replayed.status(), ?reason, "Replay finished");
        }
        Ok(replayed)
    }

    /// Exchange `body` at the login `endpoint` for a credential pair and
    /// store it for `role`.
    #[instrument(skip(self, body), fields(role = %role))]
    pub async fn login<T: Serialize + ?Sized>(
        &self,
        role: Role,
        body: &T,
        endpoint: &str,
    ) -> Result<CredentialPair> {
        let inner = &self.inner;
        let response = inner
            .http
            .post(inner.config.endpoint(endpoint)?)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, "Login rejected");
            return Err(Error::Login {
                status: status.as_u16(),
                detail,
            });
        }

        let pair = response
            .json::<LoginResponse>()
            .await?
            .into_pair(inner.config.access_ttl(), inner.config.refresh_ttl())?;
        inner.session.store_pair(role, &pair).await?;
        info!("Logged in");
        Ok(pair)
    }

    /// Forget both credentials of `role`.
    pub async fn logout(&self, role: Role) -> Result<()> {
        self.inner.session.clear(role).await?;
        info!(role = %role, "Logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::RefreshError;
    use crate::location::SharedLocation;
    use crate::refresh::RefreshResponse;

    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RefreshTransport for CountingTransport {
        async fn refresh(
            &self,
            _refresh_token: &str,
        ) -> std::result::Result<RefreshResponse, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RefreshResponse::with_token("fresh"))
        }
    }

    fn client(location: SharedLocation) -> PortalClient {
        PortalClient::builder(PortalConfig::default())
            .location(Arc::new(location))
            .transport(Arc::new(CountingTransport {
                calls: AtomicUsize::new(0),
            }))
            .build()
            .unwrap()
    }

    #[test]
    fn test_active_role_follows_location() {
        let location = SharedLocation::new("/admin/classes");
        let client = client(location.clone());
        assert_eq!(client.active_role(), Some(Role::OrgAdmin));

        location.set_path("/unknown/x");
        assert_eq!(client.active_role(), None);

        location.clear();
        assert_eq!(client.active_role(), None);
    }

    #[test]
    fn test_request_joins_base_url() {
        let client = client(SharedLocation::default());
        let request = client.request(Method::GET, "/api/classes").unwrap();
        assert_eq!(request.url().as_str(), "http://127.0.0.1:3000/api/classes");
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = PortalConfig::default().with_login_path("login");
        assert!(matches!(
            PortalClient::builder(config).build(),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_logout_clears_role() {
        let client = client(SharedLocation::default());
        let pair = LoginResponse {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: None,
            refresh_expires_in: None,
        }
        .into_pair(chrono::Duration::minutes(15), chrono::Duration::days(7))
        .unwrap();
        client.session().store_pair(Role::Member, &pair).await.unwrap();

        client.logout(Role::Member).await.unwrap();
        assert_eq!(client.session().access_token(Role::Member).await.unwrap(), None);
        assert_eq!(client.session().refresh_token(Role::Member).await.unwrap(), None);
    }
}
