//! Prose and table passes through the Marker sidecar.
//!
//! The sidecar is called twice with the same document, once per mode. The two
//! outputs are independent; nothing lines them up page by page.

use super::{ExtractionInput, ExtractorOutput, TextExtractor};
use crate::error::{ExtractError, Result};
use crate::methods::Method;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct MarkerResponse {
    markdown: String,
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Text,
    Table,
}

impl Pass {
    fn mode(self) -> &'static str {
        match self {
            Pass::Text => "text",
            Pass::Table => "table",
        }
    }
}

pub struct MarkerExtractor {
    url: String,
    client: reqwest::Client,
}

impl MarkerExtractor {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    async fn convert(&self, data: Vec<u8>, filename: &str, pass: Pass) -> Result<String> {
        use reqwest::multipart::{Form, Part};

        let part = Part::bytes(data)
            .file_name(filename.to_string())
            .mime_str("application/pdf")
            .map_err(|e| ExtractError::engine("marker", e))?;

        let form = Form::new().part("file", part).text("mode", pass.mode());

        let response = self
            .client
            .post(format!("{}/convert", self.url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExtractError::engine("marker", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExtractError::engine(
                "marker",
                format!("{} pass failed ({}): {}", pass.mode(), status, error_text),
            ));
        }

        let rendered: MarkerResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::engine("marker", e))?;
        Ok(rendered.markdown)
    }
}

#[async_trait::async_trait]
impl TextExtractor for MarkerExtractor {
    fn method(&self) -> Method {
        Method::Marker
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<ExtractorOutput> {
        info!("Starting Marker extraction for file: {}", input.path.display());
        let data = tokio::fs::read(input.path)
            .await
            .map_err(|e| ExtractError::engine("marker", e))?;

        let (text, tables) = tokio::join!(
            self.convert(data.clone(), input.original_name, Pass::Text),
            self.convert(data, input.original_name, Pass::Table),
        );

        let output = combine_passes(text, tables)?;
        info!("Marker extraction completed for file: {}", input.path.display());
        Ok(output)
    }
}

/// Keep whichever pass succeeded. Only both failing is an error.
fn combine_passes(text: Result<String>, tables: Result<String>) -> Result<ExtractorOutput> {
    let (text, tables, error) = match (text, tables) {
        (Ok(text), Ok(tables)) => (text, tables, None),
        (Ok(text), Err(e)) => {
            warn!("Marker table pass failed: {}", e);
            (text, String::new(), Some(e.to_string()))
        }
        (Err(e), Ok(tables)) => {
            warn!("Marker text pass failed: {}", e);
            (String::new(), tables, Some(e.to_string()))
        }
        (Err(text_err), Err(_)) => return Err(text_err),
    };

    Ok(ExtractorOutput::Hybrid {
        text: text.trim().to_string(),
        tables: tables.trim().to_string(),
        error,
    })
}
