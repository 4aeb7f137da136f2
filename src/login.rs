//! End-to-end login: stabilize, cache, resolve, submit, persist.

use std::future::Future;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::PageCache;
use crate::error::{LoginError, LoginFailure, LoginState, Result};
use crate::resolver::{ResolveSource, SelectorResolver};
use crate::stability::{await_stability, await_stability_within};
use crate::surface::{LoadState, Surface};
use crate::types::{
    CredentialRecord, DEFAULT_POLL_INTERVAL_MS, DEFAULT_STABLE_CHECKS, DEFAULT_TIMEOUT_MS,
    LoginRequest,
};

/// What the selector question is grounded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum QueryMode {
    /// Only the login page snapshot.
    #[default]
    Document,
    /// Every page in the cache directory.
    Index,
}

#[derive(Debug, Clone)]
pub struct LoginOptions {
    pub poll_interval_ms: u64,
    pub stable_checks: u32,
    /// `None` polls until the page settles, however long that takes.
    pub stability_timeout_ms: Option<u64>,
    pub post_submit_timeout_ms: u64,
    pub query_mode: QueryMode,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            stable_checks: DEFAULT_STABLE_CHECKS,
            stability_timeout_ms: None,
            post_submit_timeout_ms: DEFAULT_TIMEOUT_MS,
            query_mode: QueryMode::Document,
        }
    }
}

/// Single-record credential file. Every save replaces the previous record.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes to a sibling temp file and renames it into place, so readers
    /// never see a half-written record.
    pub fn save(&self, record: &CredentialRecord) -> Result<()> {
        let fail = |reason: String| LoginError::Credential {
            path: self.path.clone(),
            reason,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }
        let body = serde_json::to_vec(record).map_err(|e| fail(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body).map_err(|e| fail(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| fail(e.to_string()))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<CredentialRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| LoginError::Credential {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }
}

/// Drives one login run. Owns the cache root and the credential file for
/// its whole lifetime.
pub struct LoginOrchestrator {
    cache: PageCache,
    resolver: SelectorResolver,
    credentials: CredentialStore,
    options: LoginOptions,
    state: LoginState,
}

impl LoginOrchestrator {
    /// Takes ownership of `cache_root` and wipes it. Do not share a cache root
    /// between concurrent runs.
    pub fn initialize(
        cache_root: impl Into<PathBuf>,
        credentials_path: impl Into<PathBuf>,
        resolver: SelectorResolver,
        options: LoginOptions,
    ) -> Result<Self> {
        let mut cache = PageCache::new(cache_root);
        cache.initialize()?;
        Ok(Self {
            cache,
            resolver,
            credentials: CredentialStore::new(credentials_path),
            options,
            state: LoginState::NotStarted,
        })
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub async fn login(
        &mut self,
        surface: &dyn Surface,
        request: &LoginRequest,
    ) -> std::result::Result<CredentialRecord, LoginFailure> {
        self.login_with_cancel(surface, request, &CancellationToken::new())
            .await
    }

    /// Like [`login`](Self::login), but stops at the next suspension point
    /// once `cancel` fires. A cancelled run never writes a credential record
    /// and issues no further surface calls.
    ///
    /// A surface call already in flight is abandoned, not interrupted: with
    /// [`ChromeSurface`](crate::hands::ChromeSurface) the blocking CDP work
    /// (typing a value, a click) still runs to completion in the background.
    pub async fn login_with_cancel(
        &mut self,
        surface: &dyn Surface,
        request: &LoginRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<CredentialRecord, LoginFailure> {
        self.state = LoginState::NotStarted;
        match self.run(surface, request, cancel).await {
            Ok(record) => {
                info!(url = %record.actual_base_url, "login complete");
                Ok(record)
            }
            Err(cause) => {
                let failure = LoginFailure::new(self.state, cause);
                error!("{failure}");
                self.state = LoginState::Failed;
                Err(failure)
            }
        }
    }

    async fn run(
        &mut self,
        surface: &dyn Surface,
        request: &LoginRequest,
        cancel: &CancellationToken,
    ) -> Result<CredentialRecord> {
        info!(url = %request.url, "starting login");
        guarded(cancel, surface.goto(&request.url)).await?;
        self.state = LoginState::NavigatedToLogin;

        let stable = match self.options.stability_timeout_ms {
            Some(timeout_ms) => {
                let within = std::time::Duration::from_millis(timeout_ms);
                let stable = guarded(
                    cancel,
                    await_stability_within(
                        surface,
                        self.options.poll_interval_ms,
                        self.options.stable_checks,
                        within,
                    ),
                )
                .await?;
                if !stable {
                    return Err(LoginError::StabilityTimeout { timeout_ms });
                }
                stable
            }
            None => {
                guarded(
                    cancel,
                    await_stability(
                        surface,
                        self.options.poll_interval_ms,
                        self.options.stable_checks,
                    ),
                )
                .await?
            }
        };
        debug!(stable, "stability check finished");
        let page_url = guarded(cancel, surface.url()).await?;
        self.cache.confirm_stable(&page_url);
        self.state = LoginState::ContentStable;

        let snapshot = guarded(cancel, self.cache.capture_current(surface)).await?;
        self.state = LoginState::Cached;

        let source = match self.options.query_mode {
            QueryMode::Document => ResolveSource::Snapshot(&snapshot),
            QueryMode::Index => ResolveSource::CacheDir(self.cache.root().to_path_buf()),
        };
        let selectors = guarded(cancel, self.resolver.resolve(source)).await?;
        self.state = LoginState::SelectorsResolved;

        guarded(
            cancel,
            surface.fill(&selectors.username_field, &request.username),
        )
        .await?;
        guarded(
            cancel,
            surface.fill(&selectors.password_field, &request.password),
        )
        .await?;
        guarded(cancel, surface.click(&selectors.submit_control)).await?;
        self.state = LoginState::CredentialsSubmitted;

        guarded(
            cancel,
            surface.wait_for_load_state(LoadState::Load, self.options.post_submit_timeout_ms),
        )
        .await?;
        let actual_base_url = guarded(cancel, surface.url()).await?;

        if cancel.is_cancelled() {
            return Err(LoginError::Cancelled);
        }
        let record = CredentialRecord {
            url: request.url.clone(),
            username: request.username.clone(),
            password: request.password.clone(),
            actual_base_url,
        };
        self.credentials.save(&record)?;
        self.state = LoginState::LoggedIn;
        Ok(record)
    }
}

async fn guarded<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LoginError::Cancelled),
        result = fut => result,
    }
}
