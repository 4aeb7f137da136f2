//! The rendering surface the pipeline drives.
//!
//! Every method is a suspension point. Callers never issue two operations
//! against the same surface concurrently.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// Load milestones understood by `wait_for_load_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    DomContentLoaded,
    Load,
    NetworkIdle,
}

/// What `wait_for_selector` waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Attached,
    Visible,
}

#[async_trait]
pub trait Surface: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    /// Full rendered markup of the current page.
    async fn content(&self) -> Result<String>;

    /// URL the surface is currently on.
    async fn url(&self) -> Result<String>;

    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    async fn wait_for_load_state(&self, state: LoadState, timeout_ms: u64) -> Result<()>;

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout_ms: u64,
    ) -> Result<()>;

    async fn screenshot(&self, path: &Path) -> Result<()>;

    async fn pdf(&self, path: &Path) -> Result<()>;
}
