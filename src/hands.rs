//! Chrome-backed rendering surface.
//!
//! `headless_chrome` is blocking, so every CDP call runs on the blocking pool
//! with a clone of the active tab.

use anyhow::Context;
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::util::Timeout;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{LoginError, Result};
use crate::surface::{LoadState, SelectorState, Surface};
use crate::types::DEFAULT_TIMEOUT_MS;

const POLL_STEP: Duration = Duration::from_millis(100);
/// How long a click gets to start a navigation before it counts as in-page.
const NAVIGATION_START_GRACE: Duration = Duration::from_millis(1000);

/// Tags the current document so a later check can tell whether it was
/// replaced, is being unloaded, or is still the same page.
const MARK_DOCUMENT_SCRIPT: &str = "(() => { \
    const mark = { leaving: false }; \
    window.__loginPilotMark = mark; \
    window.addEventListener('beforeunload', () => { mark.leaving = true; }); \
    window.addEventListener('pagehide', () => { mark.leaving = true; }); \
})()";

const DOCUMENT_PHASE_SCRIPT: &str = "(() => { \
    const mark = window.__loginPilotMark; \
    const phase = !mark ? 'new' : (mark.leaving ? 'leaving' : 'same'); \
    return phase + ':' + document.readyState; \
})()";

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    /// Attach to an already running Chrome instead of launching one.
    pub debug_url: Option<String>,
    pub chrome_path: Option<PathBuf>,
    pub profile_dir: Option<PathBuf>,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            debug_url: None,
            chrome_path: None,
            profile_dir: None,
        }
    }
}

struct Session {
    _browser: Browser,
    tab: Arc<Tab>,
}

/// Browser session. Not usable until `start` succeeds.
pub struct ChromeSurface {
    options: ChromeOptions,
    session: Option<Session>,
    /// Set by `click`; the next load-state wait then waits for the
    /// navigation the click may have started.
    clicked: AtomicBool,
}

impl ChromeSurface {
    pub fn new(options: ChromeOptions) -> Self {
        Self {
            options,
            session: None,
            clicked: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let options = self.options.clone();
        let session = tokio::task::spawn_blocking(move || launch(&options))
            .await
            .map_err(|e| anyhow::anyhow!("Browser launch panicked: {}", e))??;
        self.session = Some(session);
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.session.take().is_some() {
            info!("browser session closed");
        }
    }

    fn tab(&self) -> Result<Arc<Tab>> {
        self.session
            .as_ref()
            .map(|s| s.tab.clone())
            .ok_or(LoginError::SurfaceNotReady)
    }

    async fn on_tab<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
    {
        let tab = self.tab()?;
        tokio::task::spawn_blocking(move || op(tab.as_ref()))
            .await
            .map_err(|e| LoginError::Surface(format!("browser task panicked: {e}")))?
    }
}

fn launch(options: &ChromeOptions) -> anyhow::Result<Session> {
    if let Some(url) = &options.debug_url {
        info!(%url, "attaching to existing Chrome");
        match Browser::connect(url.clone()) {
            Ok(browser) => {
                let existing = {
                    let tabs = browser.get_tabs();
                    let tabs = tabs
                        .lock()
                        .map_err(|_| anyhow::anyhow!("tab list lock poisoned"))?;
                    tabs.first().cloned()
                };
                let tab = match existing {
                    Some(tab) => tab,
                    None => browser.new_tab()?,
                };
                tab.set_default_timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS));
                return Ok(Session {
                    _browser: browser,
                    tab,
                });
            }
            Err(e) => warn!("could not attach ({e:#}), launching a new browser"),
        }
    }

    let profile_dir = match &options.profile_dir {
        Some(dir) => dir.clone(),
        None => default_profile_dir()?,
    };
    std::fs::create_dir_all(&profile_dir)
        .with_context(|| format!("creating browser profile at {}", profile_dir.display()))?;

    let launch_options = LaunchOptions {
        headless: options.headless,
        path: options.chrome_path.clone(),
        user_data_dir: Some(profile_dir),
        args: vec![
            std::ffi::OsStr::new("--no-first-run"),
            std::ffi::OsStr::new("--no-default-browser-check"),
            std::ffi::OsStr::new("--password-store=basic"),
        ],
        idle_browser_timeout: Duration::from_secs(300),
        ..Default::default()
    };

    debug!(headless = options.headless, "launching Chrome");
    let browser = Browser::new(launch_options).context("browser launch failed")?;
    let tab = browser.new_tab()?;
    tab.set_default_timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS));
    tab.navigate_to("about:blank")?;
    info!("Chrome ready");

    Ok(Session {
        _browser: browser,
        tab,
    })
}

fn default_profile_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("no user cache directory"))?;
    Ok(base.join("login-pilot").join("chrome-profile"))
}

fn cdp(err: anyhow::Error) -> LoginError {
    LoginError::Surface(format!("{err:#}"))
}

/// `headless_chrome` reports expired waits as [`Timeout`]; everything else is
/// a plain surface error.
fn timeout_or_cdp(err: anyhow::Error, on_timeout: impl FnOnce() -> LoginError) -> LoginError {
    if err.is::<Timeout>() {
        on_timeout()
    } else {
        cdp(err)
    }
}

fn selector_timeout(selector: &str, timeout_ms: u64) -> impl FnOnce() -> LoginError {
    let selector = selector.to_string();
    move || LoginError::SelectorTimeout {
        selector,
        timeout_ms,
    }
}

fn eval_string(tab: &Tab, script: &str) -> Result<String> {
    let result = tab.evaluate(script, false).map_err(cdp)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default())
}

fn eval_bool(tab: &Tab, script: &str) -> Result<bool> {
    let result = tab.evaluate(script, false).map_err(cdp)?;
    Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
}

fn js_literal(selector: &str) -> String {
    // A JSON string is a valid JS string literal.
    serde_json::Value::String(selector.to_string()).to_string()
}

fn ready_state_reached(state: LoadState, ready: &str) -> bool {
    match state {
        LoadState::DomContentLoaded => ready == "interactive" || ready == "complete",
        LoadState::Load | LoadState::NetworkIdle => ready == "complete",
    }
}

fn poll_until<F>(timeout_ms: u64, mut check: F) -> Result<bool>
where
    F: FnMut() -> Result<bool>,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if check()? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        std::thread::sleep(POLL_STEP);
    }
}

/// Whether a post-click document phase means the wait is over.
///
/// A replaced document must reach `state`. The original document counts only
/// once it has not started unloading within the grace period, i.e. the click
/// did not navigate.
fn click_settled(state: LoadState, observed: &str, since_click: Duration) -> bool {
    let (phase, ready) = observed.split_once(':').unwrap_or(("same", observed));
    match phase {
        "new" => ready_state_reached(state, ready),
        "leaving" => false,
        _ => since_click >= NAVIGATION_START_GRACE && ready_state_reached(state, ready),
    }
}

fn wait_for_ready_state(tab: &Tab, state: LoadState, timeout_ms: u64) -> Result<()> {
    let reached = poll_until(timeout_ms, || {
        let ready = eval_string(tab, "document.readyState")?;
        Ok(ready_state_reached(state, &ready))
    })?;
    if !reached {
        return Err(LoginError::NavigationTimeout { timeout_ms });
    }
    settle_network(state);
    Ok(())
}

fn wait_after_click(tab: &Tab, state: LoadState, timeout_ms: u64) -> Result<()> {
    let clicked_at = Instant::now();
    let reached = poll_until(timeout_ms, || {
        // Evaluation fails while the old document is torn down; keep polling.
        match eval_string(tab, DOCUMENT_PHASE_SCRIPT) {
            Ok(phase) => Ok(click_settled(state, &phase, clicked_at.elapsed())),
            Err(e) => {
                debug!("document phase unavailable: {e}");
                Ok(false)
            }
        }
    })?;
    if !reached {
        return Err(LoginError::NavigationTimeout { timeout_ms });
    }
    settle_network(state);
    Ok(())
}

fn settle_network(state: LoadState) {
    if state == LoadState::NetworkIdle {
        // CDP has no direct idle signal here; give late XHRs a beat to land.
        std::thread::sleep(Duration::from_millis(500));
    }
}

#[async_trait]
impl Surface for ChromeSurface {
    async fn goto(&self, url: &str) -> Result<()> {
        self.clicked.store(false, Ordering::SeqCst);
        let url = url.to_string();
        self.on_tab(move |tab| {
            debug!(%url, "navigating");
            tab.navigate_to(&url).map_err(cdp)?;
            tab.wait_until_navigated().map_err(|e| {
                timeout_or_cdp(e, || LoginError::NavigationTimeout {
                    timeout_ms: DEFAULT_TIMEOUT_MS,
                })
            })?;
            wait_for_ready_state(tab, LoadState::DomContentLoaded, DEFAULT_TIMEOUT_MS)
        })
        .await
    }

    async fn content(&self) -> Result<String> {
        self.on_tab(|tab| tab.get_content().map_err(cdp)).await
    }

    async fn url(&self) -> Result<String> {
        self.on_tab(|tab| Ok(tab.get_url())).await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let selector = selector.to_string();
        let value = value.to_string();
        self.on_tab(move |tab| {
            let el = tab
                .wait_for_element_with_custom_timeout(
                    &selector,
                    Duration::from_millis(DEFAULT_TIMEOUT_MS),
                )
                .map_err(|e| timeout_or_cdp(e, selector_timeout(&selector, DEFAULT_TIMEOUT_MS)))?;
            el.click().map_err(cdp)?;
            tab.evaluate(
                &format!(
                    "(document.querySelector({}) || {{}}).value = ''",
                    js_literal(&selector)
                ),
                false,
            )
            .map_err(cdp)?;
            tab.type_str(&value).map_err(cdp)?;
            Ok(())
        })
        .await
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let selector = selector.to_string();
        self.on_tab(move |tab| {
            let el = tab
                .wait_for_element_with_custom_timeout(
                    &selector,
                    Duration::from_millis(DEFAULT_TIMEOUT_MS),
                )
                .map_err(|e| timeout_or_cdp(e, selector_timeout(&selector, DEFAULT_TIMEOUT_MS)))?;
            tab.evaluate(MARK_DOCUMENT_SCRIPT, false).map_err(cdp)?;
            el.click().map_err(cdp)?;
            Ok(())
        })
        .await?;
        self.clicked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout_ms: u64) -> Result<()> {
        let after_click = self.clicked.swap(false, Ordering::SeqCst);
        self.on_tab(move |tab| {
            if after_click {
                wait_after_click(tab, state, timeout_ms)
            } else {
                wait_for_ready_state(tab, state, timeout_ms)
            }
        })
        .await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout_ms: u64,
    ) -> Result<()> {
        let selector = selector.to_string();
        self.on_tab(move |tab| {
            let literal = js_literal(&selector);
            let script = match state {
                SelectorState::Attached => format!("document.querySelector({literal}) !== null"),
                SelectorState::Visible => format!(
                    "(() => {{ const el = document.querySelector({literal}); \
                     if (!el) return false; \
                     const s = getComputedStyle(el); \
                     return s.display !== 'none' && s.visibility !== 'hidden' \
                     && el.getClientRects().length > 0; }})()"
                ),
            };
            if poll_until(timeout_ms, || eval_bool(tab, &script))? {
                Ok(())
            } else {
                Err(LoginError::SelectorTimeout {
                    selector,
                    timeout_ms,
                })
            }
        })
        .await
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        self.on_tab(move |tab| {
            let png = tab
                .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(cdp)?;
            std::fs::write(&path, png)?;
            Ok(())
        })
        .await
    }

    async fn pdf(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        self.on_tab(move |tab| {
            let bytes = tab.print_to_pdf(None).map_err(cdp)?;
            std::fs::write(&path, bytes)?;
            Ok(())
        })
        .await
    }
}
