//! OCR through the `pdftoppm` and `tesseract` executables.

use super::{ExtractionInput, ExtractorOutput, TextExtractor};
use crate::error::{ExtractError, Result};
use crate::methods::{file_extension, Method};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff"];

/// Rasterizes each page and runs Tesseract on it.
pub struct TesseractExtractor {
    language: String,
    dpi: u32,
}

impl TesseractExtractor {
    pub fn new(language: impl Into<String>, dpi: u32) -> Self {
        Self {
            language: language.into(),
            dpi,
        }
    }

    /// Render every PDF page to `{dir}/page-N.png`, returned in page order.
    async fn rasterize(&self, pdf: &Path, dir: &Path) -> Result<Vec<PathBuf>> {
        let status = Command::new("pdftoppm")
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(pdf)
            .arg(dir.join("page"))
            .status()
            .await
            .map_err(|e| ExtractError::engine("pdftoppm", e))?;

        if !status.success() {
            return Err(ExtractError::engine(
                "pdftoppm",
                format!("exited with {}", status),
            ));
        }

        let mut images = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| ExtractError::engine("pdftoppm", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ExtractError::engine("pdftoppm", e))?
        {
            let path = entry.path();
            if let Some(page_num) = page_number(&path) {
                images.push((page_num, path));
            }
        }
        images.sort_by_key(|(page_num, _)| *page_num);
        debug!("Rasterized {} pages", images.len());

        Ok(images.into_iter().map(|(_, path)| path).collect())
    }

    async fn recognize(&self, image: &Path) -> Result<String> {
        let output = Command::new("tesseract")
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .await
            .map_err(|e| ExtractError::engine("tesseract", e))?;

        if !output.status.success() {
            return Err(ExtractError::engine(
                "tesseract",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        // Tesseract ends each page with a form feed
        Ok(String::from_utf8_lossy(&output.stdout).replace('\x0c', ""))
    }
}

/// Page number from a `pdftoppm` output name such as `page-07.png`.
fn page_number(path: &Path) -> Option<u32> {
    if path.extension().and_then(|e| e.to_str()) != Some("png") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('-').next()?.parse().ok()
}

#[async_trait::async_trait]
impl TextExtractor for TesseractExtractor {
    fn method(&self) -> Method {
        Method::Tesseract
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<ExtractorOutput> {
        let is_image = file_extension(input.original_name)
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()));

        let scratch = tempfile::tempdir().map_err(|e| ExtractError::engine("tesseract", e))?;
        let images = if is_image {
            vec![input.path.to_path_buf()]
        } else {
            self.rasterize(input.path, scratch.path()).await?
        };

        if images.is_empty() {
            return Err(ExtractError::engine("tesseract", "no page images to recognize"));
        }

        let mut text = String::new();
        let mut recognized = 0;
        let mut last_error = None;
        for (idx, image) in images.iter().enumerate() {
            match self.recognize(image).await {
                Ok(page_text) => {
                    recognized += 1;
                    text.push_str(&page_text);
                    text.push('\n');
                }
                Err(e) => {
                    warn!("OCR failed for page {}: {}", idx + 1, e);
                    last_error = Some(e);
                }
            }
        }

        if recognized == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        info!(
            "Text extracted using Tesseract OCR from: {} ({} pages)",
            input.path.display(),
            images.len()
        );
        Ok(ExtractorOutput::text(text.trim()))
    }
}
