//! Runtime settings, read from flags with environment fallbacks.
//!
//! A `.env` file in the working directory is loaded before parsing.

use anyhow::{Result, anyhow};
use clap::Args;
use std::path::PathBuf;

use crate::brain::{LlmProvider, LlmSettings};
use crate::hands::ChromeOptions;
use crate::login::{LoginOptions, QueryMode};
use crate::types::{
    DEFAULT_MAX_CONTEXT_CHARS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_STABLE_CHECKS, DEFAULT_TIMEOUT_MS,
};

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Directory for page snapshots. Wiped at the start of every run.
    #[arg(long, env = "LOGIN_PILOT_CACHE_DIR", default_value = "html_cache", global = true)]
    pub cache_dir: PathBuf,

    /// Where the credential record is written after a successful login.
    #[arg(
        long,
        env = "LOGIN_PILOT_CREDENTIALS_FILE",
        default_value = "demo_credentials.json",
        global = true
    )]
    pub credentials_file: PathBuf,

    #[arg(long, env = "LOGIN_PILOT_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS, global = true)]
    pub poll_interval_ms: u64,

    /// Consecutive identical polls needed before a page counts as stable.
    #[arg(long, env = "LOGIN_PILOT_STABLE_CHECKS", default_value_t = DEFAULT_STABLE_CHECKS, global = true)]
    pub stable_checks: u32,

    /// Give up waiting for a stable page after this long. Unset waits forever.
    #[arg(long, env = "LOGIN_PILOT_STABILITY_TIMEOUT_MS", global = true)]
    pub stability_timeout_ms: Option<u64>,

    #[arg(long, env = "LOGIN_PILOT_POST_SUBMIT_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS, global = true)]
    pub post_submit_timeout_ms: u64,

    #[arg(
        long,
        env = "LOGIN_PILOT_HEADLESS",
        default_value_t = true,
        action = clap::ArgAction::Set,
        global = true
    )]
    pub headless: bool,

    /// Attach to a running Chrome, e.g. http://127.0.0.1:9222
    #[arg(long, env = "LOGIN_PILOT_CHROME_DEBUG_URL", global = true)]
    pub chrome_debug_url: Option<String>,

    #[arg(long, env = "LOGIN_PILOT_CHROME_PATH", global = true)]
    pub chrome_path: Option<PathBuf>,

    #[arg(long, env = "LOGIN_PILOT_PROFILE_DIR", global = true)]
    pub profile_dir: Option<PathBuf>,

    #[arg(long, value_enum, env = "LLM_PROVIDER", default_value = "openai", global = true)]
    pub llm_provider: LlmProvider,

    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini", global = true)]
    pub llm_model: String,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true, global = true)]
    pub llm_api_key: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_ENDPOINT", global = true)]
    pub azure_endpoint: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_API_VERSION", global = true)]
    pub azure_api_version: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT", global = true)]
    pub azure_deployment: Option<String>,

    #[arg(long, value_enum, env = "LLM_QUERY_MODE", default_value = "document", global = true)]
    pub query_mode: QueryMode,

    #[arg(long, env = "LLM_MAX_CONTEXT_CHARS", default_value_t = DEFAULT_MAX_CONTEXT_CHARS, global = true)]
    pub max_context_chars: usize,
}

impl Settings {
    pub fn chrome_options(&self) -> ChromeOptions {
        ChromeOptions {
            headless: self.headless,
            debug_url: self.chrome_debug_url.clone(),
            chrome_path: self.chrome_path.clone(),
            profile_dir: self.profile_dir.clone(),
        }
    }

    pub fn login_options(&self) -> LoginOptions {
        LoginOptions {
            poll_interval_ms: self.poll_interval_ms,
            stable_checks: self.stable_checks,
            stability_timeout_ms: self.stability_timeout_ms,
            post_submit_timeout_ms: self.post_submit_timeout_ms,
            query_mode: self.query_mode,
        }
    }

    /// Falls back to `OPENAI_API_KEY` when no LLM key was given.
    pub fn llm_settings(&self) -> Result<LlmSettings> {
        let api_key = self
            .llm_api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("LLM_API_KEY (or OPENAI_API_KEY) not set in environment"))?;

        Ok(LlmSettings {
            provider: self.llm_provider,
            model: self.llm_model.clone(),
            api_key,
            azure_endpoint: self.azure_endpoint.clone(),
            azure_api_version: self.azure_api_version.clone(),
            azure_deployment: self.azure_deployment.clone(),
            max_context_chars: self.max_context_chars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn flags_override_defaults() {
        let h = Harness::parse_from([
            "test",
            "--cache-dir",
            "/tmp/pages",
            "--stable-checks",
            "6",
            "--stability-timeout-ms",
            "10000",
            "--headless",
            "false",
            "--llm-provider",
            "azure",
            "--query-mode",
            "index",
        ]);
        let s = h.settings;
        assert_eq!(s.cache_dir, PathBuf::from("/tmp/pages"));
        assert!(!s.headless);
        assert_eq!(s.llm_provider, LlmProvider::Azure);

        let opts = s.login_options();
        assert_eq!(opts.stable_checks, 6);
        assert_eq!(opts.stability_timeout_ms, Some(10_000));
        assert_eq!(opts.query_mode, QueryMode::Index);
    }

    #[test]
    fn explicit_key_is_used_for_llm() {
        let h = Harness::parse_from(["test", "--llm-api-key", "sk-test", "--llm-model", "m"]);
        let llm = h.settings.llm_settings().unwrap();
        assert_eq!(llm.api_key, "sk-test");
        assert_eq!(llm.model, "m");
        assert_eq!(llm.provider, LlmProvider::OpenAi);
    }
}
