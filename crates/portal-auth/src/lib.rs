//! Role-scoped authenticated HTTP pipeline.
//!
//! Every outbound request carries the access credential of exactly one
//! [`Role`], resolved from the current location. An expired access token
//! (HTTP 401) is recovered transparently: concurrent failures share a single
//! refresh call per role, and each failed request is replayed once with the
//! new token. When the refresh itself fails, the role's credentials are
//! cleared and the location is sent back to the login page.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use portal_auth::{PortalClient, PortalConfig, SharedLocation};
//!
//! # async fn run() -> portal_auth::Result<()> {
//! let location = SharedLocation::new("/teacher/planner");
//! let client = PortalClient::builder(PortalConfig::default())
//!     .location(Arc::new(location))
//!     .build()?;
//!
//! let response = client.get("/api/classes").await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

pub mod authenticator;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod location;
pub mod recovery;
pub mod refresh;
pub mod role;
pub mod session;
pub mod store;

pub use authenticator::RequestAuthenticator;
pub use client::{PortalClient, PortalClientBuilder};
pub use config::PortalConfig;
pub use error::{Error, RefreshError, Result, StoreError};
pub use location::{Detached, Location, SharedLocation};
pub use recovery::{NotEligibleReason, RecoveryDecision, RecoveryPolicy, RetryMarker};
pub use refresh::{
    HttpRefreshTransport, RefreshCoordinator, RefreshOutcome, RefreshResponse, RefreshTransport,
};
pub use role::{Role, RouteEntry, RouteTable};
pub use session::{CredentialPair, LoginResponse, Session};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
