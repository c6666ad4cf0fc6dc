//! Static registry of extraction methods.
//!
//! Every method is addressed by a stable identifier that doubles as the URL
//! segment under `/extract/`. The table here is read-only for the lifetime of
//! the process; the dispatcher binds each variant to a concrete extractor.

use serde::Serialize;
use std::path::Path;

/// Formats accepted by the layout-aware converter.
pub const SUPPORTED_FORMATS: &[&str] = &[
    "pdf", "pptx", "docx", "xlsx", "md", "csv", "png", "jpeg", "tiff",
];

/// Returned instead of an error when the layout-aware converter is handed a
/// file outside [`SUPPORTED_FORMATS`].
pub const UNSUPPORTED_FORMAT_SENTINEL: &str = "Unsupported file format";

/// Known extraction methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Pdfplumber,
    Tesseract,
    Pymupdf,
    Docling,
    Marker,
    ExtractThinker,
    PdfminerFull,
    PdfminerPages,
    Pptx2md,
}

impl Method {
    /// All methods, in the order aggregate mode runs them.
    pub const ALL: [Method; 9] = [
        Method::Pdfplumber,
        Method::Tesseract,
        Method::Pymupdf,
        Method::Docling,
        Method::Marker,
        Method::ExtractThinker,
        Method::PdfminerFull,
        Method::PdfminerPages,
        Method::Pptx2md,
    ];

    /// Parse a method identifier as it appears in the request path.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.id() == s)
    }

    pub fn id(self) -> &'static str {
        match self {
            Self::Pdfplumber => "pdfplumber",
            Self::Tesseract => "tesseract",
            Self::Pymupdf => "pymupdf",
            Self::Docling => "docling",
            Self::Marker => "marker",
            Self::ExtractThinker => "extract_thinker",
            Self::PdfminerFull => "pdfminer_full",
            Self::PdfminerPages => "pdfminer_pages",
            Self::Pptx2md => "pptx2md",
        }
    }

    /// Human readable name reported back in the `method` field.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pdfplumber => "PDFPlumber",
            Self::Tesseract => "Tesseract OCR",
            Self::Pymupdf => "PyMuPDF",
            Self::Docling => "Docling",
            Self::Marker => "Marker",
            Self::ExtractThinker => "extract_thinker",
            Self::PdfminerFull | Self::PdfminerPages => "PDFMiner",
            Self::Pptx2md => "pptx2md",
        }
    }

    /// Suffix used when naming the markdown artifact for this method.
    pub fn artifact_tag(self) -> &'static str {
        match self {
            Self::PdfminerFull => "pdfminer",
            other => other.id(),
        }
    }

    /// Which documents the method is meant for.
    pub fn best_for(self) -> &'static str {
        match self {
            Self::Pdfplumber => "Digital PDFs with selectable text",
            Self::Tesseract => "Scanned PDFs and image-based documents",
            Self::Pymupdf => "Mixed PDFs with text and images",
            Self::Docling => "Office documents (DOCX, PPTX, XLSX) and PDFs",
            Self::Marker => "PDFs with tables",
            Self::ExtractThinker => "Pulling named fields out of a document",
            Self::PdfminerFull | Self::PdfminerPages => "Normal PDFs",
            Self::Pptx2md => "PowerPoint decks",
        }
    }

    /// Extensions the method accepts. An empty slice means no gate is applied
    /// at dispatch time.
    pub fn accepted_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Pptx2md => &["pptx"],
            _ => &[],
        }
    }

    /// Check the upload's name against [`Method::accepted_extensions`].
    pub fn accepts(self, filename: &str) -> bool {
        let accepted = self.accepted_extensions();
        accepted.is_empty()
            || file_extension(filename).is_some_and(|ext| accepted.contains(&ext.as_str()))
    }

    /// Error message for uploads rejected by the format gate.
    pub fn rejection_message(self) -> String {
        let list = self
            .accepted_extensions()
            .iter()
            .map(|ext| format!(".{ext}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("Only {list} files are supported.")
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Lowercased extension of a filename, if any.
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether the layout-aware converter accepts this filename.
pub fn is_supported_format(filename: &str) -> bool {
    file_extension(filename).is_some_and(|ext| SUPPORTED_FORMATS.contains(&ext.as_str()))
}
