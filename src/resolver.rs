//! Turns a cached login page into concrete selectors by asking the query
//! service, then validating its answer strictly.

use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::brain::{QueryContext, QueryRequest, QueryService};
use crate::error::{LoginError, Result};
use crate::types::{PageSnapshot, SelectorMap};

pub const USERNAME_KEY: &str = "usernameField";
pub const PASSWORD_KEY: &str = "passwordField";
pub const SUBMIT_KEY: &str = "submitControl";

const REQUIRED_KEYS: [&str; 3] = [USERNAME_KEY, PASSWORD_KEY, SUBMIT_KEY];

const INSTRUCTION: &str = r##"Look at the given HTML of a login page and find the selectors for these three elements:
- usernameField: the input where the email address or username is typed
- passwordField: the input where the password is typed
- submitControl: the button or input that submits the login form

The selectors are passed unchanged to a browser automation engine's fill and click commands, so each must match exactly one element in the given HTML. Prefer ids, then name attributes, then other attributes.

Respond only with a single JSON object with exactly these three keys and string values, for example:
{"usernameField": "#email", "passwordField": "#password", "submitControl": "button[type=submit]"}"##;

/// Where the question is grounded.
pub enum ResolveSource<'a> {
    /// One snapshot, sent literally.
    Snapshot(&'a PageSnapshot),
    /// Every page in a cache directory.
    CacheDir(PathBuf),
}

pub struct SelectorResolver {
    service: Arc<dyn QueryService>,
}

impl SelectorResolver {
    pub fn new(service: Arc<dyn QueryService>) -> Self {
        Self { service }
    }

    pub fn instruction() -> &'static str {
        INSTRUCTION
    }

    pub async fn resolve(&self, source: ResolveSource<'_>) -> Result<SelectorMap> {
        let (context, fingerprint) = match source {
            ResolveSource::Snapshot(snapshot) => (
                QueryContext::Document {
                    name: snapshot.url.clone(),
                    text: snapshot.markup.clone(),
                },
                Some(snapshot.fingerprint.clone()),
            ),
            ResolveSource::CacheDir(dir) => (QueryContext::Index(dir), None),
        };

        let request = QueryRequest {
            context,
            instruction: INSTRUCTION.to_string(),
        };

        let raw = self.service.query(&request).await.map_err(|e| {
            warn!("query service failed: {e:#}");
            LoginError::resolution(format!("query service error: {e:#}"))
        })?;

        let mut selectors = parse_selector_map(&raw)?;
        selectors.source_fingerprint = fingerprint;
        info!(
            username = %selectors.username_field,
            password = %selectors.password_field,
            submit = %selectors.submit_control,
            "selectors resolved"
        );
        Ok(selectors)
    }
}

/// Strict parse of a model answer into a [`SelectorMap`].
///
/// Accepts a JSON object or a single-quoted mapping literal, optionally
/// wrapped in a markdown fence. The mapping must have exactly the three role
/// keys, each with a non-empty string value.
pub fn parse_selector_map(raw: &str) -> Result<SelectorMap> {
    let cleaned = strip_fences(raw);
    debug!("parsing selector response: {}", cleaned);

    let value: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(json_err) => {
            let requoted = requote_literal(cleaned).ok_or_else(|| {
                LoginError::resolution(format!("response is not a mapping literal: {json_err}"))
            })?;
            serde_json::from_str(&requoted).map_err(|e| {
                LoginError::resolution(format!("response is not a mapping literal: {e}"))
            })?
        }
    };

    let Value::Object(map) = value else {
        return Err(LoginError::resolution("response is not a mapping"));
    };

    if let Some(extra) = map.keys().find(|k| !REQUIRED_KEYS.contains(&k.as_str())) {
        return Err(LoginError::resolution(format!("unexpected key '{extra}'")));
    }

    Ok(SelectorMap {
        username_field: required(&map, USERNAME_KEY)?,
        password_field: required(&map, PASSWORD_KEY)?,
        submit_control: required(&map, SUBMIT_KEY)?,
        source_fingerprint: None,
    })
}

fn required(map: &Map<String, Value>, key: &str) -> Result<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(LoginError::resolution(format!("key '{key}' is empty"))),
        Some(other) => Err(LoginError::resolution(format!(
            "key '{key}' is not a string: {other}"
        ))),
        None => Err(LoginError::resolution(format!("missing key '{key}'"))),
    }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence.
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Rewrites single-quoted strings as JSON strings. Returns `None` on an
/// unterminated string.
fn requote_literal(src: &str) -> Option<String> {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let quote = c;
                let mut body = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next()? {
                            'n' => body.push('\n'),
                            't' => body.push('\t'),
                            other => body.push(other),
                        },
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => body.push(c),
                    }
                }
                if !closed {
                    return None;
                }
                out.push_str(&Value::String(body).to_string());
            }
            c => out.push(c),
        }
    }
    Some(out)
}
