use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A persisted copy of one page's rendered markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub markup: String,
    pub fingerprint: String,
    pub captured_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// Concrete selectors for the three login roles, derived from one snapshot.
///
/// Not `Clone`: a map is consumed by exactly one login attempt.
#[derive(Debug, PartialEq, Eq)]
pub struct SelectorMap {
    pub username_field: String,
    pub password_field: String,
    pub submit_control: String,
    /// Fingerprint of the snapshot the selectors were resolved against.
    pub source_fingerprint: Option<String>,
}

/// What gets written after a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub url: String,
    pub username: String,
    pub password: String,
    pub actual_base_url: String,
}

/// Credentials handed to the orchestrator.
#[derive(Clone)]
pub struct LoginRequest {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub const CACHE_FILE_SUFFIX: &str = "_cached.html";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_STABLE_CHECKS: u32 = 4;
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 120_000;
