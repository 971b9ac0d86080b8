//! Operator roles and route-based role resolution.
//!
//! Each part of the dashboard belongs to exactly one role, and each role owns
//! an isolated pair of credential keys. Resolution is prefix based: the first
//! registered prefix that the current path starts with wins.

use serde::{Deserialize, Serialize};

/// Operator category served by the dashboard.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Role {
    /// Platform-wide operator.
    #[strum(serialize = "super-admin")]
    #[serde(rename = "super-admin")]
    PlatformAdmin,
    /// Administrator of a single school.
    #[strum(serialize = "school-admin")]
    #[serde(rename = "school-admin")]
    OrgAdmin,
    #[strum(serialize = "teacher")]
    #[serde(rename = "teacher")]
    Staff,
    #[strum(serialize = "student")]
    #[serde(rename = "student")]
    Member,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::PlatformAdmin, Role::OrgAdmin, Role::Staff, Role::Member];

    /// Storage key of this role's access credential.
    #[inline]
    pub fn credential_key(self) -> &'static str {
        match self {
            Self::PlatformAdmin => "superAdminToken",
            Self::OrgAdmin => "schoolAdminToken",
            Self::Staff => "teacherToken",
            Self::Member => "studentToken",
        }
    }

    /// Storage key of this role's refresh credential.
    #[inline]
    pub fn refresh_key(self) -> String {
        format!("{}Refresh", self.credential_key())
    }
}

/// A single `prefix -> role` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub prefix: String,
    pub role: Role,
}

impl RouteEntry {
    pub fn new(prefix: impl Into<String>, role: Role) -> Self {
        Self {
            prefix: prefix.into(),
            role,
        }
    }
}

/// Ordered route-to-role table.
///
/// Order is significant: more specific prefixes must be registered before
/// broader ones that would also match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(vec![
            RouteEntry::new("/super-admin", Role::PlatformAdmin),
            RouteEntry::new("/admin", Role::OrgAdmin),
            RouteEntry::new("/teacher", Role::Staff),
            RouteEntry::new("/student", Role::Member),
        ])
    }
}

impl RouteTable {
    pub fn new(entries: Vec<RouteEntry>) -> Self {
        Self { entries }
    }

    /// Resolve the role owning `path`, or `None` for unauthenticated pages.
    pub fn resolve(&self, path: &str) -> Option<Role> {
        self.entries
            .iter()
            .find(|entry| path.starts_with(entry.prefix.as_str()))
            .map(|entry| entry.role)
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
