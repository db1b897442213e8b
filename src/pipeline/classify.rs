//! Page-to-zone classification.
//!
//! The Zone Segmenter does not decide which page belongs to which zone: a
//! [`PageClassifier`] does, given one prompt part per page (see
//! [`prompt_parts`]). The answer is a list of [`ZoneGroup`]s with a single,
//! strict schema; anything else is rejected as malformed.
//!
//! [`LlmPageClassifier`] is the production classifier. It calls the
//! configured LLM provider once per document and retries transient failures.
//!
//! ## Retry Strategy
//!
//! Exponential backoff (`retry_backoff_ms * 2^(attempt-1)`): with 500 ms base
//! and 3 retries the wait sequence is 500 ms → 1 s → 2 s.

use crate::config::PipelineConfig;
use crate::document::Document;
use crate::error::ZoneDocError;
use crate::prompts::{page_part, DEFAULT_ZONE_PROMPT};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// One classifier answer: the pages of one zone, in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneGroup {
    pub zoning: String,
    pub zone: String,
    pub pages: Vec<u32>,
}

/// Classifies pages into zones.
pub trait PageClassifier {
    /// `parts` holds one entry per page, as built by [`prompt_parts`].
    fn classify(&self, parts: &[String]) -> Result<Vec<ZoneGroup>, ZoneDocError>;
}

/// One `"Page {index}: {markdown}"` part per page of `doc`.
pub fn prompt_parts(doc: &Document) -> Vec<String> {
    doc.pages
        .iter()
        .map(|page| page_part(page.index, &page.markdown()))
        .collect()
}

/// Parse a classifier answer.
///
/// A single pair of surrounding code fences is tolerated; otherwise the text
/// must be a JSON array of `{zoning, zone, pages}` objects with non-blank
/// names.
pub fn parse_groups(text: &str) -> Result<Vec<ZoneGroup>, ZoneDocError> {
    let body = strip_fences(text);
    let groups: Vec<ZoneGroup> = serde_json::from_str(body)
        .map_err(|e| ZoneDocError::malformed("classification", e.to_string()))?;

    for group in &groups {
        if group.zoning.trim().is_empty() || group.zone.trim().is_empty() {
            return Err(ZoneDocError::malformed(
                "classification",
                format!("blank zoning or zone name in {:?}", group),
            ));
        }
    }
    Ok(groups)
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// [`PageClassifier`] backed by an `edgequake-llm` provider.
///
/// Owns a tokio runtime so the blocking pipeline can drive the async
/// provider API.
pub struct LlmPageClassifier {
    provider: Arc<dyn LLMProvider>,
    runtime: Runtime,
    system_prompt: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl LlmPageClassifier {
    /// Resolve the provider from `config` and set up the runtime.
    pub fn new(config: &PipelineConfig) -> Result<Self, ZoneDocError> {
        let provider = resolve_provider(config)?;
        Self::with_provider(provider, config)
    }

    /// Use an already constructed provider.
    pub fn with_provider(
        provider: Arc<dyn LLMProvider>,
        config: &PipelineConfig,
    ) -> Result<Self, ZoneDocError> {
        let runtime = Runtime::new()
            .map_err(|e| ZoneDocError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
        Ok(Self {
            provider,
            runtime,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_ZONE_PROMPT.to_string()),
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    async fn call(&self, parts: &[String]) -> Result<String, ZoneDocError> {
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(parts.join("\n\n")),
        ];
        let start = Instant::now();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Classifier: retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&self.options)).await {
                Ok(response) => {
                    debug!(
                        "Classifier: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Classifier: attempt {} failed: {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(ZoneDocError::ClassifierFailed {
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

impl PageClassifier for LlmPageClassifier {
    fn classify(&self, parts: &[String]) -> Result<Vec<ZoneGroup>, ZoneDocError> {
        info!("Classifying {} pages", parts.len());
        let text = self.runtime.block_on(self.call(parts))?;
        parse_groups(&text)
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ZoneDocError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ZoneDocError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, ZoneDocError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-mini");
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ZoneDocError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, GEMINI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::{document, page};

    #[test]
    fn parts_use_page_index_and_joined_paragraphs() {
        let doc = document(vec![
            page(2, &["# Zone UA", "Article 1"], vec![]),
            page(7, &["Annexe"], vec![]),
        ]);
        assert_eq!(
            prompt_parts(&doc),
            vec!["Page 2: # Zone UA\n\nArticle 1", "Page 7: Annexe"]
        );
    }

    #[test]
    fn parses_plain_array() {
        let groups =
            parse_groups(r#"[{"zoning": "Z1", "zone": "UA", "pages": [1, 3]}]"#).unwrap();
        assert_eq!(
            groups,
            vec![ZoneGroup {
                zoning: "Z1".into(),
                zone: "UA".into(),
                pages: vec![1, 3],
            }]
        );
    }

    #[test]
    fn parses_fenced_array() {
        let text = "```json\n[{\"zoning\": \"Z1\", \"zone\": \"UB\", \"pages\": [2]}]\n```\n";
        assert_eq!(parse_groups(text).unwrap()[0].zone, "UB");
    }

    #[test]
    fn empty_array_is_valid() {
        assert!(parse_groups("[]").unwrap().is_empty());
    }

    #[test]
    fn missing_pages_is_malformed() {
        let err = parse_groups(r#"[{"zoning": "Z1", "zone": "UA"}]"#).unwrap_err();
        assert!(matches!(
            err,
            ZoneDocError::MalformedInput {
                what: "classification",
                ..
            }
        ));
    }

    #[test]
    fn other_shapes_are_rejected() {
        assert!(parse_groups(r#"{"parsed": []}"#).is_err());
        assert!(parse_groups("The document has two zones.").is_err());
        assert!(parse_groups(r#"[{"zoning": "Z1", "zone": "UA", "pages": ["1"]}]"#).is_err());
    }

    #[test]
    fn blank_zone_name_is_malformed() {
        assert!(parse_groups(r#"[{"zoning": "Z1", "zone": " ", "pages": [1]}]"#).is_err());
    }

    #[test]
    fn build_options_defaults() {
        let config = PipelineConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(8192));
    }
}
