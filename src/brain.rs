//! Text-understanding boundary: documents in, free text out.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::dom;
use crate::types::CACHE_FILE_SUFFIX;

/// What the question is grounded in.
#[derive(Debug, Clone)]
pub enum QueryContext {
    /// Literal markup of a single page.
    Document { name: String, text: String },
    /// Every cached page under a directory.
    Index(PathBuf),
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub context: QueryContext,
    pub instruction: String,
}

/// A service that answers an instruction about some documents.
///
/// The answer is untrusted text; callers validate it.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub text: String,
}

/// Literal documents loaded from a cache directory, in file-name order.
#[derive(Debug, Clone, Default)]
pub struct DocumentIndex {
    documents: Vec<Document>,
}

impl DocumentIndex {
    pub fn build(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("reading cache directory {}", dir.display()))?
        {
            let path = entry?.path();
            let cached = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(CACHE_FILE_SUFFIX));
            if cached && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            documents.push(Document { name, text });
        }
        Ok(Self { documents })
    }

    pub fn from_document(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            documents: vec![Document {
                name: name.into(),
                text: text.into(),
            }],
        }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// All documents as one prompt section.
    ///
    /// Script and style bodies are dropped first. Markup that still exceeds
    /// `max_chars` is an error; a cut-off form would only mislead the model.
    pub fn render(&self, max_chars: usize) -> Result<String> {
        let mut out = String::new();
        for doc in &self.documents {
            out.push_str(&format!("--- document: {} ---\n", doc.name));
            out.push_str(&dom::strip_inert(&doc.text));
            out.push('\n');
        }
        let total = out.chars().count();
        if total > max_chars {
            return Err(anyhow!(
                "context is {total} chars after dropping scripts and styles, limit is {max_chars}"
            ));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LlmProvider {
    #[value(name = "openai")]
    OpenAi,
    Azure,
    Together,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: String,
    pub azure_endpoint: Option<String>,
    pub azure_api_version: Option<String>,
    pub azure_deployment: Option<String>,
    pub max_context_chars: usize,
}

const SYSTEM_PROMPT: &str = "You answer questions about the HTML documents you are given. \
Follow the requested output format exactly. Never add explanations or markdown.";

/// OpenAI-compatible chat completions client.
pub struct ChatQueryService {
    client: Client,
    settings: LlmSettings,
}

impl ChatQueryService {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        if settings.api_key.is_empty() {
            return Err(anyhow!("LLM API key is empty"));
        }
        Ok(Self {
            client: Client::new(),
            settings,
        })
    }

    fn endpoint(&self) -> Result<String> {
        match self.settings.provider {
            LlmProvider::OpenAi => Ok("https://api.openai.com/v1/chat/completions".to_string()),
            LlmProvider::Together => {
                Ok("https://api.together.xyz/v1/chat/completions".to_string())
            }
            LlmProvider::Azure => {
                let endpoint = self
                    .settings
                    .azure_endpoint
                    .as_deref()
                    .ok_or_else(|| anyhow!("AZURE_OPENAI_ENDPOINT not set"))?;
                let deployment = self
                    .settings
                    .azure_deployment
                    .as_deref()
                    .ok_or_else(|| anyhow!("AZURE_OPENAI_DEPLOYMENT not set"))?;
                let version = self
                    .settings
                    .azure_api_version
                    .as_deref()
                    .unwrap_or("2024-02-01");
                Ok(format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    endpoint.trim_end_matches('/'),
                    deployment,
                    version
                ))
            }
        }
    }

    fn context_text(&self, context: &QueryContext) -> Result<String> {
        let index = match context {
            QueryContext::Document { name, text } => DocumentIndex::from_document(name, text),
            QueryContext::Index(dir) => DocumentIndex::build(dir)?,
        };
        if index.is_empty() {
            return Err(anyhow!("no documents to ground the query in"));
        }
        index.render(self.settings.max_context_chars)
    }
}

#[async_trait]
impl QueryService for ChatQueryService {
    async fn query(&self, request: &QueryRequest) -> Result<String> {
        let context = self.context_text(&request.context)?;
        let user = format!("{}\n\nHTML:\n{}", request.instruction, context);

        let mut builder = self.client.post(self.endpoint()?);
        builder = match self.settings.provider {
            LlmProvider::Azure => builder.header("api-key", &self.settings.api_key),
            _ => builder.header(
                "Authorization",
                format!("Bearer {}", self.settings.api_key),
            ),
        };

        debug!(
            provider = ?self.settings.provider,
            model = %self.settings.model,
            chars = user.len(),
            "sending selector query"
        );

        let response = builder
            .json(&json!({
                "model": self.settings.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": user},
                ],
                "temperature": 0.0,
            }))
            .send()
            .await?;

        let status = response.status();
        let json_resp: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let err_msg = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error");
            error!(%status, "LLM API error: {}", err_msg);
            return Err(anyhow!("LLM API error ({}): {}", status, err_msg));
        }

        let content = json_resp["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                warn!("unexpected LLM response shape");
                anyhow!("No content in LLM response: {}", json_resp)
            })?;

        debug!("LLM says: {}", content);
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_MAX_CONTEXT_CHARS;

    #[test]
    fn index_reads_only_cached_pages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.com_cached.html"), "<b/>").unwrap();
        std::fs::write(dir.path().join("a.com_cached.html"), "<a/>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let index = DocumentIndex::build(dir.path()).unwrap();
        let names: Vec<&str> = index.documents().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.com_cached.html", "b.com_cached.html"]);
    }

    #[test]
    fn render_keeps_a_form_behind_a_large_inline_bundle() {
        let markup = format!(
            "<html><head><script>{}</script></head><body>\
             <form><input id=\"email\"><input id=\"pwd\" type=\"password\"></form>\
             </body></html>",
            "x".repeat(128_000)
        );
        let index = DocumentIndex::from_document("login", markup);
        let rendered = index.render(DEFAULT_MAX_CONTEXT_CHARS).unwrap();
        assert!(rendered.starts_with("--- document: login ---"));
        assert!(rendered.contains(r#"id="email""#));
        assert!(rendered.contains(r#"id="pwd""#));
        assert!(rendered.len() < 1_000);
    }

    #[test]
    fn render_refuses_markup_over_the_limit() {
        let index = DocumentIndex::from_document("page", format!("<p>{}</p>", "x".repeat(500)));
        let err = index.render(100).unwrap_err();
        assert!(err.to_string().contains("limit is 100"));
        assert!(index.render(1_000).is_ok());
    }

    #[test]
    fn azure_endpoint_needs_deployment() {
        let service = ChatQueryService::new(LlmSettings {
            provider: LlmProvider::Azure,
            model: "gpt-35-turbo".into(),
            api_key: "k".into(),
            azure_endpoint: Some("https://res.openai.azure.com/".into()),
            azure_api_version: None,
            azure_deployment: None,
            max_context_chars: 1000,
        })
        .unwrap();
        assert!(service.endpoint().is_err());
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let result = ChatQueryService::new(LlmSettings {
            provider: LlmProvider::OpenAi,
            model: "gpt-4o-mini".into(),
            api_key: String::new(),
            azure_endpoint: None,
            azure_api_version: None,
            azure_deployment: None,
            max_context_chars: 1000,
        });
        assert!(result.is_err());
    }
}
