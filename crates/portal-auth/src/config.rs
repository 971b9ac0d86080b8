//! Pipeline configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::recovery::DEFAULT_BYPASS;
use crate::role::RouteTable;

/// Default access token lifetime applied on every refresh (15 minutes).
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;

/// Default refresh token lifetime when the backend does not report one.
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Upper bound for configured credential lifetimes (ten years).
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Configuration of a [`PortalClient`](crate::PortalClient).
///
/// Every field has a default, so a config file only needs to name what it
/// changes. Durations of `0` disable the corresponding bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Backend base URL; request paths are resolved against it.
    pub base_url: Url,
    /// Unauthenticated entry point navigated to after a failed refresh.
    pub login_path: String,
    /// Refresh endpoint path.
    pub refresh_path: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub refresh_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Path fragments exempt from refresh-and-replay.
    pub bypass: Vec<String>,
    pub routes: RouteTable,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://127.0.0.1:3000/").expect("valid default URL"),
            login_path: "/login".into(),
            refresh_path: "/auth/refresh".into(),
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
            refresh_timeout_secs: 30,
            request_timeout_secs: 30,
            bypass: DEFAULT_BYPASS.iter().map(|s| s.to_string()).collect(),
            routes: RouteTable::default(),
        }
    }
}

impl PortalConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            ..Self::default()
        }
    }

    /// Parse a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| Error::config(e.to_string()))
    }

    /// Read a TOML config file, apply environment overrides and validate.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&source)?.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PORTAL_*` environment overrides.
    ///
    /// - `PORTAL_BASE_URL`
    /// - `PORTAL_LOGIN_PATH`
    /// - `PORTAL_REFRESH_PATH`
    /// - `PORTAL_ACCESS_TTL_SECS`
    /// - `PORTAL_REFRESH_TIMEOUT_SECS`
    /// - `PORTAL_REQUEST_TIMEOUT_SECS`
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if let Some(url) = lookup("PORTAL_BASE_URL") {
            self.base_url = Url::parse(&url).map_err(|e| Error::InvalidUrl {
                input: url.clone(),
                reason: e.to_string(),
            })?;
        }
        if let Some(path) = lookup("PORTAL_LOGIN_PATH") {
            self.login_path = path;
        }
        if let Some(path) = lookup("PORTAL_REFRESH_PATH") {
            self.refresh_path = path;
        }
        if let Some(secs) = lookup("PORTAL_ACCESS_TTL_SECS") {
            self.access_ttl_secs = parse_secs("PORTAL_ACCESS_TTL_SECS", &secs)?;
        }
        if let Some(secs) = lookup("PORTAL_REFRESH_TIMEOUT_SECS") {
            self.refresh_timeout_secs = parse_secs("PORTAL_REFRESH_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("PORTAL_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_secs("PORTAL_REQUEST_TIMEOUT_SECS", &secs)?;
        }
        Ok(self)
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl_secs = ttl.as_secs();
        self
    }

    #[must_use]
    pub fn with_refresh_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.refresh_timeout_secs = timeout.map_or(0, |t| t.as_secs());
        self
    }

    #[must_use]
    pub fn with_bypass(mut self, bypass: Vec<String>) -> Self {
        self.bypass = bypass;
        self
    }

    #[must_use]
    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "base_url must be http(s), got `{}`",
                self.base_url
            )));
        }
        if !(1..=MAX_TTL_SECS).contains(&self.access_ttl_secs) {
            return Err(Error::config(format!(
                "access_ttl_secs must be between 1 and {MAX_TTL_SECS}"
            )));
        }
        if !(1..=MAX_TTL_SECS).contains(&self.refresh_ttl_secs) {
            return Err(Error::config(format!(
                "refresh_ttl_secs must be between 1 and {MAX_TTL_SECS}"
            )));
        }
        if !self.login_path.starts_with('/') {
            return Err(Error::config("login_path must start with `/`"));
        }
        Ok(())
    }

    /// Access token lifetime, capped at [`MAX_TTL_SECS`].
    pub fn access_ttl(&self) -> chrono::Duration {
        capped_ttl(self.access_ttl_secs)
    }

    /// Refresh token lifetime, capped at [`MAX_TTL_SECS`].
    pub fn refresh_ttl(&self) -> chrono::Duration {
        capped_ttl(self.refresh_ttl_secs)
    }

    pub fn refresh_timeout(&self) -> Option<Duration> {
        (self.refresh_timeout_secs > 0).then(|| Duration::from_secs(self.refresh_timeout_secs))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Resolve `path` against `base_url`, keeping any path prefix of the base.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| Error::InvalidUrl {
                input: path.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn refresh_endpoint(&self) -> Result<Url> {
        self.endpoint(&self.refresh_path)
    }
}

fn capped_ttl(secs: u64) -> chrono::Duration {
    let secs = secs.min(MAX_TTL_SECS);
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

fn parse_secs(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("{name}: {e}")))
}
