//! In-process PDF text extraction.

use super::{run_blocking, ExtractionInput, ExtractorOutput, TextExtractor};
use crate::error::{ExtractError, Result};
use crate::methods::Method;
use std::path::Path;
use tracing::{debug, info};

/// Load a PDF and return the text of every page in page order.
///
/// A page whose content cannot be decoded comes back empty; only failing to
/// open the document is an error.
pub fn load_page_texts(path: &Path) -> Result<Vec<String>> {
    let doc = lopdf::Document::load(path)
        .map_err(|e| ExtractError::engine("lopdf", format!("Failed to load PDF: {}", e)))?;

    let pages = doc.get_pages();
    debug!("Total pages found: {}", pages.len());

    Ok(pages
        .keys()
        .map(|&page_num| {
            doc.extract_text(&[page_num]).unwrap_or_else(|e| {
                debug!("No text on page {}: {}", page_num, e);
                String::new()
            })
        })
        .collect())
}

/// Walks the pages of a digital-text PDF and joins them line by line.
pub struct PageTextExtractor;

#[async_trait::async_trait]
impl TextExtractor for PageTextExtractor {
    fn method(&self) -> Method {
        Method::Pdfplumber
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<ExtractorOutput> {
        let path = input.path.to_path_buf();
        let pages = run_blocking("lopdf", move || load_page_texts(&path)).await?;

        let mut text = String::new();
        for page in pages.iter().filter(|p| !p.is_empty()) {
            text.push_str(page);
            text.push('\n');
        }

        info!("Text extracted page by page from: {}", input.path.display());
        Ok(ExtractorOutput::text(text.trim()))
    }
}

/// Whole-document text in reading order via `pdf-extract`.
pub struct StreamTextExtractor;

#[async_trait::async_trait]
impl TextExtractor for StreamTextExtractor {
    fn method(&self) -> Method {
        Method::Pymupdf
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<ExtractorOutput> {
        let path = input.path.to_path_buf();
        let text = run_blocking("pdf-extract", move || {
            let bytes = std::fs::read(&path)
                .map_err(|e| ExtractError::engine("pdf-extract", e))?;
            pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| ExtractError::engine("pdf-extract", e))
        })
        .await?;

        info!("Text extracted as a stream from: {}", input.path.display());
        Ok(ExtractorOutput::text(text.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::ExtractOptions;
    use crate::test_support::sample_pdf;

    #[tokio::test]
    async fn test_pages_joined_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, sample_pdf(&["First page", "Second page"])).unwrap();

        let options = ExtractOptions::default();
        let input = ExtractionInput {
            path: &path,
            original_name: "doc.pdf",
            options: &options,
        };
        let output = PageTextExtractor.extract(&input).await.unwrap();
        let text = output.primary_text();

        let first = text.find("First page").expect("first page text");
        let second = text.find("Second page").expect("second page text");
        assert!(first < second);
        assert_eq!(text, text.trim());
    }

    #[tokio::test]
    async fn test_corrupt_pdf_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"definitely not a pdf").unwrap();

        let options = ExtractOptions::default();
        let input = ExtractionInput {
            path: &path,
            original_name: "broken.pdf",
            options: &options,
        };
        assert!(matches!(
            PageTextExtractor.extract(&input).await,
            Err(ExtractError::Engine { .. })
        ));
        assert!(matches!(
            StreamTextExtractor.extract(&input).await,
            Err(ExtractError::Engine { .. })
        ));
    }

    #[test]
    fn test_load_page_texts_counts_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, sample_pdf(&["a", "b", "c"])).unwrap();

        assert_eq!(load_page_texts(&path).unwrap().len(), 3);
    }
}
