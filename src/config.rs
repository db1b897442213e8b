//! Configuration types for the normalization and segmentation pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`].

use crate::error::ZoneDocError;
use crate::layout::DataLayout;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a pipeline run.
///
/// # Example
/// ```rust
/// use zonedoc::{ImageDedup, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .data_dir("/srv/plu/data")
///     .table_dpi(150)
///     .image_dedup(ImageDedup::Exact)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root of the numbered data tree (see [`crate::layout`]). Default: `data`.
    pub data_dir: PathBuf,

    /// DPI used when rendering a source page to replace a table. Range: 72–400.
    /// Default: 200, matching the resolution the OCR service reports.
    pub table_dpi: u32,

    /// JPEG quality of rendered table pages. Range: 1–100. Default: 85.
    pub jpeg_quality: u8,

    /// Replace markdown tables with rendered page images. Default: true.
    pub substitute_tables: bool,

    /// How duplicate images are detected. Default: perceptual, distance < 5.
    pub image_dedup: ImageDedup,

    /// What to keep of a group of pages with identical text. Default: first.
    pub duplicate_pages: DuplicatePages,

    /// LLM model identifier used by the page classifier. If None, uses the
    /// provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for classification. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the classifier may generate. Default: 8192.
    ///
    /// The answer lists every page index of the document; long regulations
    /// with hundreds of zones need the room.
    pub max_tokens: usize,

    /// Maximum retry attempts on a failed classifier call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom classifier system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            table_dpi: 200,
            jpeg_quality: 85,
            substitute_tables: true,
            image_dedup: ImageDedup::default(),
            duplicate_pages: DuplicatePages::default(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("data_dir", &self.data_dir)
            .field("table_dpi", &self.table_dpi)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("substitute_tables", &self.substitute_tables)
            .field("image_dedup", &self.image_dedup)
            .field("duplicate_pages", &self.duplicate_pages)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The path table for [`PipelineConfig::data_dir`].
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn table_dpi(mut self, dpi: u32) -> Self {
        self.config.table_dpi = dpi.clamp(72, 400);
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn substitute_tables(mut self, v: bool) -> Self {
        self.config.substitute_tables = v;
        self
    }

    pub fn image_dedup(mut self, strategy: ImageDedup) -> Self {
        self.config.image_dedup = strategy;
        self
    }

    pub fn duplicate_pages(mut self, policy: DuplicatePages) -> Self {
        self.config.duplicate_pages = policy;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ZoneDocError> {
        let c = &self.config;
        if c.data_dir.as_os_str().is_empty() {
            return Err(ZoneDocError::InvalidConfig(
                "data directory must not be empty".into(),
            ));
        }
        if let ImageDedup::Perceptual { max_distance } = c.image_dedup {
            if max_distance == 0 || max_distance > 64 {
                return Err(ZoneDocError::InvalidConfig(format!(
                    "perceptual distance threshold must be 1–64 bits, got {}",
                    max_distance
                )));
            }
        }
        if c.max_tokens == 0 {
            return Err(ZoneDocError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Strategy for detecting duplicate images across a document.
///
/// Both strategies remove every member of a duplicate group: an image that
/// repeats across pages is a header, logo or stamp, not content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageDedup {
    /// Byte-identical encoded data.
    Exact,
    /// 64-bit perceptual hash; a pair is duplicate when the Hamming distance
    /// is strictly below `max_distance`.
    Perceptual { max_distance: u32 },
}

impl Default for ImageDedup {
    fn default() -> Self {
        ImageDedup::Perceptual { max_distance: 5 }
    }
}

/// What survives of a group of pages whose reconstructed text is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DuplicatePages {
    /// Keep the page with the lowest index, drop the others. (default)
    #[default]
    KeepFirst,
    /// Drop every page of the group.
    RemoveAll,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.table_dpi, 200);
        assert_eq!(c.jpeg_quality, 85);
        assert_eq!(c.image_dedup, ImageDedup::Perceptual { max_distance: 5 });
        assert_eq!(c.duplicate_pages, DuplicatePages::KeepFirst);
    }

    #[test]
    fn builder_clamps_dpi_and_quality() {
        let c = PipelineConfig::builder()
            .table_dpi(1200)
            .jpeg_quality(0)
            .build()
            .unwrap();
        assert_eq!(c.table_dpi, 400);
        assert_eq!(c.jpeg_quality, 1);
    }

    #[test]
    fn zero_distance_threshold_rejected() {
        let err = PipelineConfig::builder()
            .image_dedup(ImageDedup::Perceptual { max_distance: 0 })
            .build()
            .unwrap_err();
        assert!(matches!(err, ZoneDocError::InvalidConfig(_)));
    }

    #[test]
    fn layout_uses_data_dir() {
        let c = PipelineConfig::builder().data_dir("/tmp/x").build().unwrap();
        assert_eq!(c.layout().root(), std::path::Path::new("/tmp/x"));
    }
}
