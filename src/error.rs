//! Error taxonomy for the login pipeline.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoginError {
    /// A surface operation was attempted before the browser was started.
    #[error("Rendering surface not ready: call start() first")]
    SurfaceNotReady,

    /// The query service answer could not be turned into a selector map.
    #[error("Selector resolution failed: {0}")]
    Resolution(String),

    /// Never fatal; surfaced only through reports and logs.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Navigation timed out after {timeout_ms}ms")]
    NavigationTimeout { timeout_ms: u64 },

    #[error("Timed out after {timeout_ms}ms waiting for selector {selector}")]
    SelectorTimeout { selector: String, timeout_ms: u64 },

    #[error("Page did not stabilize within {timeout_ms}ms")]
    StabilityTimeout { timeout_ms: u64 },

    #[error("Failed to write cache file {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid arguments for action {action}: {reason}")]
    ActionArgument { action: String, reason: String },

    #[error("Failed to persist credentials to {path}: {reason}")]
    Credential { path: PathBuf, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LoginError {
    pub fn resolution(reason: impl Into<String>) -> Self {
        LoginError::Resolution(reason.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            LoginError::NavigationTimeout { .. }
                | LoginError::SelectorTimeout { .. }
                | LoginError::StabilityTimeout { .. }
        )
    }
}

pub type Result<T, E = LoginError> = std::result::Result<T, E>;

/// Steps of one login attempt, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    NotStarted,
    NavigatedToLogin,
    ContentStable,
    Cached,
    SelectorsResolved,
    CredentialsSubmitted,
    LoggedIn,
    Failed,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginState::NotStarted => "not started",
            LoginState::NavigatedToLogin => "navigated to login",
            LoginState::ContentStable => "content stable",
            LoginState::Cached => "cached",
            LoginState::SelectorsResolved => "selectors resolved",
            LoginState::CredentialsSubmitted => "credentials submitted",
            LoginState::LoggedIn => "logged in",
            LoginState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A failed login: the last state reached plus what stopped it.
#[derive(Debug, Error)]
#[error("Login failed after reaching '{state}': {cause}")]
pub struct LoginFailure {
    pub state: LoginState,
    #[source]
    pub cause: LoginError,
}

impl LoginFailure {
    pub fn new(state: LoginState, cause: LoginError) -> Self {
        Self { state, cause }
    }
}
