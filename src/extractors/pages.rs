//! Per-page text recovered from a cumulative text stream.
//!
//! The engine appends each page's text to one growing buffer. Page boundaries
//! are recovered by remembering how long the buffer was after the previous
//! page: page `i` is everything between that offset and the current length.
//! This only holds while the buffer is append-only; a rewrite of earlier
//! offsets is detected and the affected page comes back empty.

use super::pdf_text::load_page_texts;
use super::{run_blocking, ExtractionInput, ExtractorOutput, TextExtractor};
use crate::error::Result;
use crate::methods::Method;
use std::path::Path;
use tracing::{info, warn};

/// Splits a cumulative stream into pages by tracking the end offset of the
/// previous page.
#[derive(Debug, Default)]
pub struct PageSplitter {
    cursor: usize,
    pages: Vec<String>,
}

impl PageSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the stream as it stands after one more page was processed.
    pub fn record(&mut self, cumulative: &str) {
        let page = match cumulative.get(self.cursor..) {
            Some(page) => page.to_string(),
            None => {
                warn!(
                    "Cumulative stream shrank or was rewritten before offset {} (page {})",
                    self.cursor,
                    self.pages.len()
                );
                String::new()
            }
        };
        self.pages.push(page);
        self.cursor = cumulative.len();
    }

    pub fn into_pages(self) -> Vec<String> {
        self.pages
    }
}

/// Run the cumulative engine over a PDF. Returns the final stream and the
/// per-page slices.
pub fn extract_cumulative(path: &Path) -> Result<(String, Vec<String>)> {
    let page_texts = load_page_texts(path)?;
    info!("Total pages found: {}", page_texts.len());

    let mut stream = String::new();
    let mut splitter = PageSplitter::new();
    for page in &page_texts {
        stream.push_str(page);
        splitter.record(&stream);
    }

    Ok((stream, splitter.into_pages()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Full,
    PerPage,
}

/// Extracts the whole text or its pages from the cumulative stream.
pub struct CumulativePageExtractor {
    mode: Mode,
}

impl CumulativePageExtractor {
    pub fn full() -> Self {
        Self { mode: Mode::Full }
    }

    pub fn per_page() -> Self {
        Self { mode: Mode::PerPage }
    }
}

#[async_trait::async_trait]
impl TextExtractor for CumulativePageExtractor {
    fn method(&self) -> Method {
        match self.mode {
            Mode::Full => Method::PdfminerFull,
            Mode::PerPage => Method::PdfminerPages,
        }
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<ExtractorOutput> {
        let path = input.path.to_path_buf();
        let (text, pages) = run_blocking("lopdf", move || extract_cumulative(&path)).await?;

        info!(
            "Completed PDF extraction: {} characters across {} pages",
            text.len(),
            pages.len()
        );
        Ok(ExtractorOutput::Paged { text, pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::ExtractOptions;
    use crate::test_support::sample_pdf;

    #[test]
    fn test_splitter_slices_by_previous_length() {
        let mut splitter = PageSplitter::new();
        splitter.record("alpha\n");
        splitter.record("alpha\nbeta\n");
        splitter.record("alpha\nbeta\n");
        splitter.record("alpha\nbeta\ngamma");

        assert_eq!(
            splitter.into_pages(),
            vec!["alpha\n", "beta\n", "", "gamma"]
        );
    }

    #[test]
    fn test_splitter_handles_multibyte_text() {
        let mut splitter = PageSplitter::new();
        splitter.record("Olá ");
        splitter.record("Olá você");
        assert_eq!(splitter.into_pages(), vec!["Olá ", "você"]);
    }

    #[test]
    fn test_splitter_detects_rewrite() {
        let mut splitter = PageSplitter::new();
        splitter.record("long first page");
        splitter.record("short");
        splitter.record("short and more");

        let pages = splitter.into_pages();
        assert_eq!(pages[1], "");
        assert_eq!(pages[2], " and more");
    }

    #[tokio::test]
    async fn test_pages_concatenate_to_full_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, sample_pdf(&["One", "Two", "Three"])).unwrap();

        let options = ExtractOptions::default();
        let input = ExtractionInput {
            path: &path,
            original_name: "doc.pdf",
            options: &options,
        };

        let per_page = CumulativePageExtractor::per_page()
            .extract(&input)
            .await
            .unwrap();
        let full = CumulativePageExtractor::full().extract(&input).await.unwrap();

        let ExtractorOutput::Paged { pages, .. } = per_page else {
            panic!("expected paged output");
        };
        assert_eq!(pages.len(), 3);
        assert!(pages[1].contains("Two"));
        assert_eq!(pages.concat(), full.primary_text());
    }
}
