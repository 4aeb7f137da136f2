//! Declarative action sequences run against a surface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{LoginError, Result};
use crate::surface::{LoadState, SelectorState, Surface};
use crate::types::DEFAULT_TIMEOUT_MS;

const DEFAULT_SCREENSHOT_PATH: &str = "screenshot.png";
const DEFAULT_PDF_PATH: &str = "output.pdf";

/// One step as it appears in an action file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl ActionSpec {
    pub fn new(action: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            action: action.into(),
            args,
            kwargs: Map::new(),
        }
    }

    pub fn with_kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.to_string(), value.into());
        self
    }
}

/// Ordered steps, run left to right.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionSequence(pub Vec<ActionSpec>);

impl ActionSequence {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<ActionSpec>> for ActionSequence {
    fn from(specs: Vec<ActionSpec>) -> Self {
        Self(specs)
    }
}

/// Every action the executor knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionName {
    NavigateTo,
    ClickSelector,
    FillForm,
    WaitForSelector,
    WaitForNavigation,
    TakeScreenshot,
    GeneratePdf,
}

impl ActionName {
    pub const ALL: [ActionName; 7] = [
        ActionName::NavigateTo,
        ActionName::ClickSelector,
        ActionName::FillForm,
        ActionName::WaitForSelector,
        ActionName::WaitForNavigation,
        ActionName::TakeScreenshot,
        ActionName::GeneratePdf,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionName::NavigateTo => "navigate_to",
            ActionName::ClickSelector => "click_selector",
            ActionName::FillForm => "fill_form",
            ActionName::WaitForSelector => "wait_for_selector",
            ActionName::WaitForNavigation => "wait_for_navigation",
            ActionName::TakeScreenshot => "take_screenshot",
            ActionName::GeneratePdf => "generate_pdf",
        }
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a sequence.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub executed: Vec<ActionName>,
    /// Position and name of every skipped, unrecognized action.
    pub unknown: Vec<(usize, String)>,
}

/// Positional-then-keyword argument lookup for one spec.
struct Args<'a> {
    action: ActionName,
    spec: &'a ActionSpec,
}

impl<'a> Args<'a> {
    fn get(&self, index: usize, name: &str) -> Option<&'a Value> {
        self.spec
            .args
            .get(index)
            .or_else(|| self.spec.kwargs.get(name))
    }

    fn invalid(&self, reason: String) -> LoginError {
        LoginError::ActionArgument {
            action: self.action.to_string(),
            reason,
        }
    }

    fn string(&self, index: usize, name: &str) -> Result<String> {
        match self.get(index, name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Null) | None => Err(self.invalid(format!("missing '{name}'"))),
            Some(other) => Ok(other.to_string()),
        }
    }

    fn string_or(&self, index: usize, name: &str, default: &str) -> Result<String> {
        match self.get(index, name) {
            Some(Value::Null) | None => Ok(default.to_string()),
            Some(_) => self.string(index, name),
        }
    }

    fn millis_or(&self, index: usize, name: &str, default: u64) -> Result<u64> {
        match self.get(index, name) {
            Some(Value::Null) | None => Ok(default),
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .ok_or_else(|| self.invalid(format!("'{name}' must be non-negative"))),
            Some(Value::String(s)) => s
                .parse()
                .map_err(|_| self.invalid(format!("'{name}' is not a number: {s}"))),
            Some(other) => Err(self.invalid(format!("'{name}' is not a number: {other}"))),
        }
    }
}

/// Runs action sequences against one surface, strictly one step at a time.
pub struct ActionExecutor<'s> {
    surface: &'s dyn Surface,
}

impl<'s> ActionExecutor<'s> {
    pub fn new(surface: &'s dyn Surface) -> Self {
        Self { surface }
    }

    /// Unknown actions are logged and skipped. Any handler error stops the
    /// sequence.
    pub async fn execute(&self, sequence: &ActionSequence) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();

        for (position, spec) in sequence.0.iter().enumerate() {
            let Some(action) = ActionName::parse(&spec.action) else {
                let unknown = LoginError::UnknownAction(spec.action.clone());
                warn!(position, "{unknown}, skipping");
                report.unknown.push((position, spec.action.clone()));
                continue;
            };

            info!(position, %action, "running action");
            self.dispatch(action, spec).await?;
            report.executed.push(action);
        }

        Ok(report)
    }

    async fn dispatch(&self, action: ActionName, spec: &ActionSpec) -> Result<()> {
        let args = Args { action, spec };
        match action {
            ActionName::NavigateTo => {
                let url = args.string(0, "url")?;
                self.surface.goto(&url).await
            }
            ActionName::ClickSelector => {
                let selector = args.string(0, "selector")?;
                self.surface.click(&selector).await
            }
            ActionName::FillForm => {
                let selector = args.string(0, "selector")?;
                let value = args.string(1, "value")?;
                self.surface.fill(&selector, &value).await
            }
            ActionName::WaitForSelector => {
                let selector = args.string(0, "selector")?;
                let timeout = args.millis_or(1, "timeout", DEFAULT_TIMEOUT_MS)?;
                self.surface
                    .wait_for_selector(&selector, SelectorState::Attached, timeout)
                    .await
            }
            ActionName::WaitForNavigation => {
                let timeout = args.millis_or(0, "timeout", DEFAULT_TIMEOUT_MS)?;
                self.surface
                    .wait_for_load_state(LoadState::NetworkIdle, timeout)
                    .await
            }
            ActionName::TakeScreenshot => {
                let path = args.string_or(0, "path", DEFAULT_SCREENSHOT_PATH)?;
                self.surface.screenshot(&PathBuf::from(path)).await
            }
            ActionName::GeneratePdf => {
                let path = args.string_or(0, "path", DEFAULT_PDF_PATH)?;
                self.surface.pdf(&PathBuf::from(path)).await
            }
        }
    }
}
