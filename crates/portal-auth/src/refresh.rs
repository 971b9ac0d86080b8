//! Single-flight access token refresh.
//!
//! At most one refresh call per role is outstanding at any time. Callers
//! arriving while a call is in flight queue up behind it and receive a clone
//! of its outcome, in the order they arrived.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{Instrument, debug, error, info, instrument, warn};
use url::Url;

use crate::error::RefreshError;
use crate::role::Role;
use crate::session::{Session, expiry_after};

/// Body sent to the refresh endpoint.
#[derive(Debug, Clone, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Body returned by the refresh endpoint. Only the access token is read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshResponse {
    #[serde(default)]
    pub access_token: Option<String>,
}

impl RefreshResponse {
    pub fn with_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
        }
    }
}

/// The network exchange of a refresh token for a new access token.
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshError>;
}

/// `POST <endpoint>` with `{ "refresh_token": ... }`.
pub struct HttpRefreshTransport {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpRefreshTransport {
    pub fn new(http: reqwest::Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::request_failed(None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::request_failed(Some(status.as_u16()), body));
        }

        response.json::<RefreshResponse>().await.map_err(|e| {
            warn!(error = %e, "Undecodable refresh response");
            RefreshError::MalformedRefreshResponse
        })
    }
}

type Waiter = oneshot::Sender<RefreshOutcome>;

/// Result of a refresh together with whether this caller owns its side effects.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub result: Result<String, RefreshError>,
    /// `true` for exactly one live caller of a settled flight. Side effects
    /// that must happen once per flight are keyed on this.
    pub owner: bool,
}

/// Coordinates refresh calls so that concurrent callers share one flight.
///
/// Each flight runs on its own task, so cancelling any caller (including
/// the one that started it) never affects the others. Clones share flights.
#[derive(Clone)]
pub struct RefreshCoordinator {
    session: Session,
    transport: Arc<dyn RefreshTransport>,
    access_ttl: chrono::Duration,
    timeout: Option<Duration>,
    state: Arc<FlightState>,
}

#[derive(Default)]
struct FlightState {
    /// A role is in flight exactly while it has an entry here.
    flights: Mutex<HashMap<Role, Vec<Waiter>>>,
    calls: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        session: Session,
        transport: Arc<dyn RefreshTransport>,
        access_ttl: chrono::Duration,
    ) -> Self {
        Self {
            session,
            transport,
            access_ttl,
            timeout: None,
            state: Arc::default(),
        }
    }

    /// Bound every refresh call; `None` waits for the transport indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of refresh calls issued to the transport.
    pub fn calls(&self) -> u64 {
        self.state.calls.load(Ordering::Relaxed)
    }

    pub fn is_in_flight(&self, role: Role) -> bool {
        self.state.flights.lock().contains_key(&role)
    }

    /// Number of callers awaiting the in-flight call for `role`.
    pub fn waiters(&self, role: Role) -> usize {
        self.state.flights.lock().get(&role).map_or(0, Vec::len)
    }

    /// Obtain a new access token for `role`.
    pub async fn refresh(&self, role: Option<Role>) -> Result<String, RefreshError> {
        self.refresh_with_outcome(role).await.result
    }

    /// Like [`refresh`](Self::refresh), also reporting flight ownership.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn refresh_with_outcome(&self, role: Option<Role>) -> RefreshOutcome {
        let Some(role) = role else {
            debug!("Refresh requested without an active role");
            return RefreshOutcome {
                result: Err(RefreshError::NoRefreshToken),
                owner: true,
            };
        };

        let (tx, rx) = oneshot::channel();
        // Check-and-set in one critical section.
        let starts_flight = {
            let mut flights = self.state.flights.lock();
            match flights.get_mut(&role) {
                Some(waiters) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    flights.insert(role, vec![tx]);
                    true
                }
            }
        };

        if starts_flight {
            let flight = Flight {
                state: self.state.clone(),
                role,
                settled: false,
            };
            let coordinator = self.clone();
            tokio::spawn(
                async move {
                    let result = coordinator.perform_refresh(role).await;
                    flight.settle(&result);
                }
                .in_current_span(),
            );
        } else {
            debug!(role = %role, "Joining in-flight refresh");
        }

        rx.await.unwrap_or(RefreshOutcome {
            result: Err(RefreshError::Cancelled),
            owner: false,
        })
    }

    #[instrument(skip(self), fields(role = %role))]
    async fn perform_refresh(&self, role: Role) -> Result<String, RefreshError> {
        let result = self.exchange(role).await;

        match &result {
            Ok(_) => info!("Access token refreshed"),
            Err(e) => {
                error!(error = %e, "Token refresh failed; clearing credentials");
                if let Err(store_err) = self.session.clear(role).await {
                    warn!(error = %store_err, "Failed to clear credentials after refresh failure");
                }
            }
        }

        result
    }

    async fn exchange(&self, role: Role) -> Result<String, RefreshError> {
        let Some(refresh_token) = self.session.refresh_token(role).await? else {
            warn!("Missing refresh token - cannot refresh");
            return Err(RefreshError::NoRefreshToken);
        };

        self.state.calls.fetch_add(1, Ordering::Relaxed);
        let call = self.transport.refresh(&refresh_token);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| RefreshError::TimedOut(limit))??,
            None => call.await?,
        };

        let access_token = response
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(RefreshError::MalformedRefreshResponse)?;

        let expires_at = expiry_after(Utc::now(), self.access_ttl);
        self.session
            .update_access(role, &access_token, expires_at)
            .await?;

        Ok(access_token)
    }
}

/// Handle of an in-flight refresh, owned by the task performing it.
///
/// Dropping it without settling (the task was aborted or panicked) tears
/// the flight down and fails every caller with [`RefreshError::Cancelled`].
struct Flight {
    state: Arc<FlightState>,
    role: Role,
    settled: bool,
}

impl Flight {
    fn settle(mut self, result: &Result<String, RefreshError>) {
        self.settled = true;
        self.fan_out(result, true);
    }

    /// Hand `result` to every caller in arrival order. With `assign_owner`,
    /// the first caller still listening becomes the owner.
    fn fan_out(&self, result: &Result<String, RefreshError>, assign_owner: bool) {
        // Removing the entry and draining its queue happen under one lock.
        let waiters = self
            .state
            .flights
            .lock()
            .remove(&self.role)
            .unwrap_or_default();

        debug!(role = %self.role, waiters = waiters.len(), "Settling refresh callers");
        let mut owner = assign_owner;
        for waiter in waiters {
            let outcome = RefreshOutcome {
                result: result.clone(),
                owner,
            };
            // A caller that went away is skipped and cannot own the flight.
            if waiter.send(outcome).is_ok() {
                owner = false;
            }
        }
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        if !self.settled {
            warn!(role = %self.role, "Refresh task dropped before settling");
            self.fan_out(&Err(RefreshError::Cancelled), false);
        }
    }
}
