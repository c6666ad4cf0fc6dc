//! Layout-aware conversion through the Docling sidecar.

use super::{ExtractionInput, ExtractorOutput, TextExtractor};
use crate::error::{ExtractError, Result};
use crate::methods::{file_extension, is_supported_format, Method, UNSUPPORTED_FORMAT_SENTINEL};
use serde::Deserialize;
use tracing::{info, warn};

/// Docling sidecar response (private deserialization types).
#[derive(Debug, Deserialize)]
struct DoclingResponse {
    markdown: String,
    #[serde(default)]
    total_pages: Option<u32>,
}

pub struct DoclingExtractor {
    url: String,
    client: reqwest::Client,
}

impl DoclingExtractor {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

fn mime_for(ext: &str) -> &'static str {
    match ext {
        "pdf" => "application/pdf",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpeg" => "image/jpeg",
        "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[async_trait::async_trait]
impl TextExtractor for DoclingExtractor {
    fn method(&self) -> Method {
        Method::Docling
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<ExtractorOutput> {
        use reqwest::multipart::{Form, Part};

        info!("Starting docling extraction for file: {}", input.original_name);
        if !is_supported_format(input.original_name) {
            warn!("Unsupported file format: {}", input.original_name);
            return Ok(ExtractorOutput::Unsupported {
                message: UNSUPPORTED_FORMAT_SENTINEL.to_string(),
            });
        }

        let ext = file_extension(input.original_name).unwrap_or_default();
        let data = tokio::fs::read(input.path)
            .await
            .map_err(|e| ExtractError::engine("docling", e))?;

        let part = Part::bytes(data)
            .file_name(input.original_name.to_string())
            .mime_str(mime_for(&ext))
            .map_err(|e| ExtractError::engine("docling", e))?;

        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/convert", self.url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExtractError::engine("docling", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExtractError::engine(
                "docling",
                format!("sidecar error ({}): {}", status, error_text),
            ));
        }

        let docling: DoclingResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::engine("docling", e))?;

        info!(
            "Successfully extracted text using Docling for file: {} ({} pages)",
            input.original_name,
            docling.total_pages.unwrap_or_default()
        );
        Ok(ExtractorOutput::text(docling.markdown))
    }
}
