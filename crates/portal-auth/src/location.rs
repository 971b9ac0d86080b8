//! Ambient navigation context.
//!
//! The pipeline reads the active location exactly once per request (through
//! [`crate::client::PortalClient::active_role`]) and navigates away on an
//! unrecoverable refresh failure. Everything else takes the role explicitly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info};

pub trait Location: Send + Sync {
    /// Path of the currently active page, or `None` when there is no
    /// addressable location (background work, detached tasks).
    fn current_path(&self) -> Option<String>;

    /// Hard navigation to `path`.
    fn navigate(&self, path: &str);

    /// Navigate to `path` unless it is already the current location.
    /// Returns whether a navigation happened.
    fn redirect(&self, path: &str) -> bool {
        if self.current_path().as_deref() == Some(path) {
            return false;
        }
        self.navigate(path);
        true
    }
}

/// Interactive location shared between the UI layer and the pipeline.
#[derive(Debug, Clone, Default)]
pub struct SharedLocation {
    inner: Arc<SharedLocationInner>,
}

#[derive(Debug, Default)]
struct SharedLocationInner {
    path: RwLock<Option<String>>,
    navigations: AtomicU64,
}

impl SharedLocation {
    pub fn new(path: impl Into<String>) -> Self {
        let location = Self::default();
        location.set_path(path);
        location
    }

    /// Update the active page without counting it as a hard navigation.
    pub fn set_path(&self, path: impl Into<String>) {
        *self.inner.path.write() = Some(path.into());
    }

    /// Drop the active page, turning this into a detached context.
    pub fn clear(&self) {
        *self.inner.path.write() = None;
    }

    /// Number of hard navigations performed so far.
    pub fn navigations(&self) -> u64 {
        self.inner.navigations.load(Ordering::Acquire)
    }
}

impl Location for SharedLocation {
    fn current_path(&self) -> Option<String> {
        self.inner.path.read().clone()
    }

    fn navigate(&self, path: &str) {
        info!(to = %path, "Navigating");
        *self.inner.path.write() = Some(path.to_string());
        self.inner.navigations.fetch_add(1, Ordering::AcqRel);
    }

    fn redirect(&self, path: &str) -> bool {
        let mut current = self.inner.path.write();
        if current.as_deref() == Some(path) {
            return false;
        }
        info!(to = %path, "Navigating");
        *current = Some(path.to_string());
        self.inner.navigations.fetch_add(1, Ordering::AcqRel);
        true
    }
}

/// Context without an addressable location.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl Location for Detached {
    fn current_path(&self) -> Option<String> {
        None
    }

    fn navigate(&self, path: &str) {
        debug!(to = %path, "Navigation requested in detached context; ignoring");
    }

    fn redirect(&self, path: &str) -> bool {
        self.navigate(path);
        false
    }
}
