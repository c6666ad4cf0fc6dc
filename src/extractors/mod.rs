//! Extraction engines.
//!
//! Each [`Method`] is backed by one [`TextExtractor`]. Engines that do heavy
//! lifting (layout models, OCR, LLMs) are external: executables on `PATH` or
//! HTTP sidecars. The rest parse the document in-process.

pub mod docling;
pub mod fields;
pub mod marker;
pub mod pages;
pub mod pdf_text;
pub mod slides;
pub mod tesseract;

use crate::config::ServiceConfig;
use crate::error::{ExtractError, Result};
use crate::methods::Method;
use crate::openrouter::OpenRouterClient;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Caller-supplied knobs that only some methods look at.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Field names for schema-driven extraction.
    pub fields: Vec<String>,
    /// Skip writing slide images.
    pub disable_image: bool,
}

/// What an extractor gets to work with.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    /// Stored copy of the upload.
    pub path: &'a Path,
    /// Name the client uploaded the file under.
    pub original_name: &'a str,
    pub options: &'a ExtractOptions,
}

/// Normalized extractor output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorOutput {
    Text { text: String },
    /// Text with page boundaries recovered.
    Paged { text: String, pages: Vec<String> },
    /// Prose and tables from independent passes. `error` is set when one of
    /// the passes failed and its side is empty.
    Hybrid {
        text: String,
        tables: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Requested field names mapped to what was found.
    Fields { fields: BTreeMap<String, Option<String>> },
    /// Converter that writes its own markdown file.
    Markdown { content: String, filename: String },
    /// Recognized non-success that is not an error.
    Unsupported { message: String },
    /// Engine failure degraded to an empty result.
    Failed { error: String },
}

impl ExtractorOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Primary text of the result.
    pub fn primary_text(&self) -> String {
        match self {
            Self::Text { text } | Self::Paged { text, .. } | Self::Hybrid { text, .. } => {
                text.clone()
            }
            Self::Fields { fields } => render_fields(fields),
            Self::Markdown { content, .. } => content.clone(),
            Self::Unsupported { message } => message.clone(),
            Self::Failed { .. } => String::new(),
        }
    }

    /// Error message if the engine failed, wholly or in part.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error } => Some(error),
            Self::Hybrid { error, .. } => error.as_deref(),
            _ => None,
        }
    }

    /// `(tag, text)` pairs to persist as markdown artifacts.
    pub fn artifacts(&self, method: Method) -> Vec<(String, String)> {
        let tag = method.artifact_tag();
        match self {
            Self::Text { text } => vec![(tag.to_string(), text.clone())],
            Self::Paged { pages, .. } if method == Method::PdfminerPages => {
                vec![(tag.to_string(), pages.join("\n"))]
            }
            Self::Paged { text, .. } => vec![(tag.to_string(), text.clone())],
            Self::Hybrid { text, tables, .. } => vec![
                (format!("{tag}_text"), text.clone()),
                (format!("{tag}_table"), tables.clone()),
            ],
            Self::Fields { fields } if !fields.is_empty() => {
                vec![(tag.to_string(), render_fields(fields))]
            }
            Self::Fields { .. }
            | Self::Markdown { .. }
            | Self::Unsupported { .. }
            | Self::Failed { .. } => Vec::new(),
        }
    }
}

fn render_fields(fields: &BTreeMap<String, Option<String>>) -> String {
    serde_json::to_string_pretty(fields).unwrap_or_default()
}

/// One extraction strategy.
#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    fn method(&self) -> Method;

    /// Run the extraction. "Nothing found" is an empty output, not an error.
    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<ExtractorOutput>;
}

/// Run CPU-bound parsing off the async workers.
pub(crate) async fn run_blocking<T, F>(engine: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExtractError::engine(engine, format!("worker panicked: {}", e)))?
}

/// Build one extractor per method from the service configuration.
pub fn default_extractors(
    config: &ServiceConfig,
    http: reqwest::Client,
    llm: Option<OpenRouterClient>,
) -> Vec<Arc<dyn TextExtractor>> {
    vec![
        Arc::new(pdf_text::PageTextExtractor),
        Arc::new(tesseract::TesseractExtractor::new(
            config.ocr_language.clone(),
            config.ocr_dpi,
        )),
        Arc::new(pdf_text::StreamTextExtractor),
        Arc::new(docling::DoclingExtractor::new(
            config.docling_url.clone(),
            http.clone(),
        )),
        Arc::new(marker::MarkerExtractor::new(config.marker_url.clone(), http)),
        Arc::new(fields::FieldExtractor::new(llm)),
        Arc::new(pages::CumulativePageExtractor::full()),
        Arc::new(pages::CumulativePageExtractor::per_page()),
        Arc::new(slides::SlideConverter::new(config.slides_dir.clone())),
    ]
}
