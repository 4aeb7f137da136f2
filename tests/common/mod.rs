#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use login_pilot::brain::{QueryRequest, QueryService};
use login_pilot::error::{LoginError, Result};
use login_pilot::surface::{LoadState, SelectorState, Surface};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct State {
    url: String,
    pages: HashMap<String, Vec<String>>,
    pending: VecDeque<String>,
    current: String,
    redirects: HashMap<String, String>,
    missing: Vec<String>,
    log: Vec<String>,
    content_calls: usize,
    step_delay: Option<Duration>,
    not_ready: bool,
}

/// In-memory surface. Each page is a script of markups served one per
/// `content()` call; the last one repeats.
#[derive(Default)]
pub struct ScriptedSurface {
    state: Mutex<State>,
}

impl ScriptedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, script: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(url.to_string(), script.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Clicking `selector` moves the surface to `url`.
    pub fn redirect_on_click(self, selector: &str, url: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .redirects
            .insert(selector.to_string(), url.to_string());
        self
    }

    /// Selectors that never appear.
    pub fn missing(self, selector: &str) -> Self {
        self.state.lock().unwrap().missing.push(selector.to_string());
        self
    }

    pub fn with_step_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().step_delay = Some(delay);
        self
    }

    /// Every operation fails as if the browser was never started.
    pub fn not_ready(self) -> Self {
        self.state.lock().unwrap().not_ready = true;
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn content_calls(&self) -> usize {
        self.state.lock().unwrap().content_calls
    }

    fn record(&self, entry: String) -> Option<Duration> {
        let mut state = self.state.lock().unwrap();
        state.log.push(entry);
        state.step_delay
    }

    fn load(&self, url: &str) {
        let mut state = self.state.lock().unwrap();
        state.url = url.to_string();
        state.pending = state.pages.get(url).cloned().unwrap_or_default().into();
        state.current = String::new();
    }

    fn ready(&self) -> Result<()> {
        if self.state.lock().unwrap().not_ready {
            return Err(LoginError::SurfaceNotReady);
        }
        Ok(())
    }

    async fn step(&self, entry: String) -> Result<()> {
        self.ready()?;
        let start = format!("start {entry}");
        if let Some(delay) = self.record(start) {
            tokio::time::sleep(delay).await;
        }
        self.record(format!("end {entry}"));
        Ok(())
    }
}

#[async_trait]
impl Surface for ScriptedSurface {
    async fn goto(&self, url: &str) -> Result<()> {
        self.step(format!("goto {url}")).await?;
        self.load(url);
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        self.ready()?;
        let mut state = self.state.lock().unwrap();
        state.content_calls += 1;
        if let Some(next) = state.pending.pop_front() {
            state.current = next;
        }
        Ok(state.current.clone())
    }

    async fn url(&self) -> Result<String> {
        self.ready()?;
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.step(format!("fill {selector}={value}")).await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.step(format!("click {selector}")).await?;
        let target = self.state.lock().unwrap().redirects.get(selector).cloned();
        if let Some(url) = target {
            self.load(&url);
        }
        Ok(())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout_ms: u64) -> Result<()> {
        self.step(format!("wait_load {state:?} {timeout_ms}")).await?;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _state: SelectorState,
        timeout_ms: u64,
    ) -> Result<()> {
        self.step(format!("wait_selector {selector} {timeout_ms}")).await?;
        if self.state.lock().unwrap().missing.iter().any(|m| m == selector) {
            return Err(LoginError::SelectorTimeout {
                selector: selector.to_string(),
                timeout_ms,
            });
        }
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.step(format!("screenshot {}", path.display())).await?;
        Ok(())
    }

    async fn pdf(&self, path: &Path) -> Result<()> {
        self.step(format!("pdf {}", path.display())).await?;
        Ok(())
    }
}

/// Returns the same answer to every query and remembers what it was asked.
pub struct CannedQueryService {
    answer: std::result::Result<String, String>,
    requests: Mutex<Vec<QueryRequest>>,
}

impl CannedQueryService {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryService for CannedQueryService {
    async fn query(&self, request: &QueryRequest) -> anyhow::Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.answer.clone().map_err(|m| anyhow!(m))
    }
}

pub const LOGIN_PAGE: &str = r#"<html><body>
<form id="login">
  <input id="email" type="email" name="email">
  <input id="pwd" type="password" name="password">
  <button id="submit" type="submit">Sign in</button>
</form>
</body></html>"#;

pub const GOOD_ANSWER: &str =
    r##"{"usernameField": "#email", "passwordField": "#pwd", "submitControl": "#submit"}"##;
