//! Service configuration.
//!
//! Everything is read from the environment once at startup (`.env` is loaded
//! first by `main`). Unset variables fall back to defaults; malformed numbers
//! abort startup.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

/// Runtime settings for the extraction server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Where uploads are staged while an extractor runs.
    pub work_dir: PathBuf,
    /// Where `{name}_{tag}.md` artifacts are written.
    pub output_dir: PathBuf,
    /// Where the slide converter writes decks and their images.
    pub slides_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub docling_url: String,
    pub marker_url: String,
    pub ocr_language: String,
    pub ocr_dpi: u32,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,
}

impl ServiceConfig {
    /// Load from process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let string = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let max_upload_mb: usize =
            parse(get("DOCUMAGIC_MAX_UPLOAD_MB"), "DOCUMAGIC_MAX_UPLOAD_MB", 100)?;
        let max_upload_bytes = max_upload_mb.checked_mul(1024 * 1024).with_context(|| {
            format!("DOCUMAGIC_MAX_UPLOAD_MB is too large: {}", max_upload_mb)
        })?;

        Ok(Self {
            bind_addr: string("DOCUMAGIC_BIND", "0.0.0.0:8006"),
            work_dir: string("DOCUMAGIC_WORK_DIR", ".").into(),
            output_dir: string("DOCUMAGIC_OUTPUT_DIR", ".").into(),
            slides_dir: string("DOCUMAGIC_SLIDES_DIR", "output").into(),
            max_upload_bytes,
            docling_url: trim_slash(string("DOCLING_URL", "http://localhost:3001")),
            marker_url: trim_slash(string("MARKER_URL", "http://localhost:3002")),
            ocr_language: string("TESSERACT_LANG", "eng"),
            ocr_dpi: parse(get("OCR_DPI"), "OCR_DPI", 300)?,
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openrouter_model: string("OPENROUTER_MODEL", crate::openrouter::DEFAULT_MODEL),
        })
    }
}

fn parse<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got {:?}", key, raw)),
    }
}

fn trim_slash(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8006");
        assert_eq!(config.work_dir, PathBuf::from("."));
        assert_eq!(config.slides_dir, PathBuf::from("output"));
        assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.docling_url, "http://localhost:3001");
        assert_eq!(config.ocr_language, "eng");
        assert_eq!(config.ocr_dpi, 300);
        assert_eq!(config.openrouter_api_key, None);
        assert_eq!(config.openrouter_model, "openai/gpt-4o");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DOCUMAGIC_BIND", "127.0.0.1:9000"),
            ("DOCUMAGIC_MAX_UPLOAD_MB", "5"),
            ("MARKER_URL", "http://marker:8000/"),
            ("OCR_DPI", " 150 "),
            ("OPENROUTER_API_KEY", "sk-test"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.marker_url, "http://marker:8000");
        assert_eq!(config.ocr_dpi, 150);
        assert_eq!(config.openrouter_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_blank_key_is_unset() {
        let config = config_from(&[("OPENROUTER_API_KEY", "  ")]).unwrap();
        assert_eq!(config.openrouter_api_key, None);
    }

    #[test]
    fn test_oversized_upload_limit_fails() {
        let limit = usize::MAX.to_string();
        let err = config_from(&[("DOCUMAGIC_MAX_UPLOAD_MB", limit.as_str())]).unwrap_err();
        assert!(err.to_string().contains("DOCUMAGIC_MAX_UPLOAD_MB is too large"));
    }

    #[test]
    fn test_invalid_number_fails() {
        let err = config_from(&[("OCR_DPI", "high")]).unwrap_err();
        assert!(err.to_string().contains("OCR_DPI"));
    }
}
