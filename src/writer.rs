//! Markdown artifacts for extraction results.

use crate::temp_store::sanitize_filename;
use std::path::PathBuf;
use tracing::info;

/// Writes `{name}_{tag}.md` files into an output directory.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    output_dir: PathBuf,
}

impl ResultWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Artifact file name for an upload and method tag.
    pub fn artifact_name(original_name: &str, tag: &str) -> String {
        format!("{}_{}.md", sanitize_filename(original_name), tag)
    }

    /// Write the text under a heading. Returns `None` when there is nothing
    /// to write.
    pub async fn write(
        &self,
        original_name: &str,
        text: &str,
        tag: &str,
    ) -> std::io::Result<Option<PathBuf>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let path = self
            .output_dir
            .join(Self::artifact_name(original_name, tag));
        let content = format!("# Extracted Text ({})\n\n{}", tag, text);
        tokio::fs::write(&path, content).await?;
        info!("Extracted text saved as: {}", path.display());
        Ok(Some(path))
    }
}
