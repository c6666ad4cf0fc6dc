//! Routes uploads to extractors and normalizes what comes back.
//!
//! A single dispatch walks `Received → Stored → Extracting → Extracted|Failed
//! → Cleaned`. The temporary copy of the upload is released on every path:
//! explicitly once extraction returns, or by the artifact's drop if the
//! request future is abandoned.

use crate::error::{ExtractError, Result};
use crate::extractors::{ExtractOptions, ExtractionInput, ExtractorOutput, TextExtractor};
use crate::methods::{Method, SUPPORTED_FORMATS};
use crate::temp_store::{TempArtifact, TempStore};
use crate::writer::ResultWriter;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

/// An upload as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Uniform result of one method run.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub method: Method,
    pub output: ExtractorOutput,
    /// Artifacts written, keyed by tag (e.g. `marker_table`).
    pub saved: BTreeMap<String, PathBuf>,
}

impl ExtractionResult {
    pub fn text(&self) -> String {
        self.output.primary_text()
    }

    /// The artifact named after the method itself, if any.
    pub fn saved_as(&self) -> Option<&PathBuf> {
        self.saved.get(self.method.artifact_tag())
    }

    pub fn error(&self) -> Option<&str> {
        self.output.error()
    }
}

/// Outcome for one method in aggregate mode.
#[derive(Debug, Clone)]
pub enum AggregateEntry {
    Done(ExtractionResult),
    /// The method refused the document before running.
    Rejected(String),
}

/// Maps methods to extractors and runs them against uploads.
pub struct ExtractionDispatcher {
    extractors: BTreeMap<Method, Arc<dyn TextExtractor>>,
    store: TempStore,
    writer: ResultWriter,
}

impl ExtractionDispatcher {
    pub fn new(store: TempStore, writer: ResultWriter) -> Self {
        Self {
            extractors: BTreeMap::new(),
            store,
            writer,
        }
    }

    /// Bind an extractor to the method it reports. Replaces any previous one.
    pub fn register(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractors.insert(extractor.method(), extractor);
        self
    }

    pub fn with_extractors(
        self,
        extractors: impl IntoIterator<Item = Arc<dyn TextExtractor>>,
    ) -> Self {
        extractors.into_iter().fold(self, |d, e| d.register(e))
    }

    /// Registered methods, in registry order.
    pub fn methods(&self) -> Vec<Method> {
        self.extractors.keys().copied().collect()
    }

    /// Formats the layout-aware converter accepts.
    pub fn supported_formats(&self) -> &'static [&'static str] {
        SUPPORTED_FORMATS
    }

    fn resolve(&self, method: &str) -> Result<(Method, Arc<dyn TextExtractor>)> {
        Method::parse(method)
            .and_then(|m| self.extractors.get(&m).map(|e| (m, Arc::clone(e))))
            .ok_or_else(|| ExtractError::UnknownMethod(method.to_string()))
    }

    /// Run one method against an upload.
    pub async fn dispatch(
        &self,
        method: &str,
        document: &UploadedDocument,
        options: &ExtractOptions,
    ) -> Result<ExtractionResult> {
        let (method, extractor) = self.resolve(method)?;
        if !method.accepts(&document.filename) {
            return Err(ExtractError::UnsupportedFormat(method.rejection_message()));
        }

        let span = info_span!("dispatch", method = %method, file = %document.filename);
        async move {
            let artifact = self.store.store(&document.data, &document.filename).await?;
            let result = self
                .run(extractor.as_ref(), &artifact, &document.filename, options)
                .await;
            release(artifact).await;
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Run every registered method against one stored copy of the upload.
    pub async fn dispatch_all(
        &self,
        document: &UploadedDocument,
    ) -> Result<BTreeMap<Method, AggregateEntry>> {
        let span = info_span!("dispatch_all", file = %document.filename);
        async move {
            let artifact = self.store.store(&document.data, &document.filename).await?;
            let options = ExtractOptions::default();

            let mut results = BTreeMap::new();
            for (method, extractor) in &self.extractors {
                let entry = if method.accepts(&document.filename) {
                    AggregateEntry::Done(
                        self.run(extractor.as_ref(), &artifact, &document.filename, &options)
                            .await,
                    )
                } else {
                    AggregateEntry::Rejected(method.rejection_message())
                };
                results.insert(*method, entry);
            }

            release(artifact).await;
            info!("Aggregate extraction finished: {} methods", results.len());
            Ok(results)
        }
        .instrument(span)
        .await
    }

    /// Extract, degrade failures, write artifacts. Never fails.
    async fn run(
        &self,
        extractor: &dyn TextExtractor,
        artifact: &TempArtifact,
        original_name: &str,
        options: &ExtractOptions,
    ) -> ExtractionResult {
        let method = extractor.method();
        let input = ExtractionInput {
            path: artifact.path(),
            original_name,
            options,
        };

        let output = match extractor.extract(&input).await {
            Ok(output) => output,
            Err(e) => {
                error!("Error during text extraction with {}: {}", method, e);
                ExtractorOutput::Failed {
                    error: e.to_string(),
                }
            }
        };

        let mut saved = BTreeMap::new();
        for (tag, text) in output.artifacts(method) {
            match self.writer.write(original_name, &text, &tag).await {
                Ok(Some(path)) => {
                    saved.insert(tag, path);
                }
                Ok(None) => {}
                Err(e) => error!("Failed to save {} artifact: {}", tag, e),
            }
        }

        ExtractionResult {
            method,
            output,
            saved,
        }
    }
}

async fn release(artifact: TempArtifact) {
    let path = artifact.path().display().to_string();
    if let Err(e) = artifact.release().await {
        warn!("Could not delete temporary file {}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::pdf_text::PageTextExtractor;
    use crate::extractors::slides::SlideConverter;
    use crate::test_support::sample_pdf;
    use std::path::Path;
    use std::sync::Mutex;

    /// Records the path it saw and returns a canned result.
    struct FakeExtractor {
        method: Method,
        reply: std::result::Result<String, String>,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl FakeExtractor {
        fn ok(method: Method, text: &str) -> Arc<Self> {
            Arc::new(Self {
                method,
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(method: Method) -> Arc<Self> {
            Arc::new(Self {
                method,
                reply: Err("engine crashed".to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl TextExtractor for FakeExtractor {
        fn method(&self) -> Method {
            self.method
        }

        async fn extract(&self, input: &ExtractionInput<'_>) -> Result<ExtractorOutput> {
            assert!(input.path.exists(), "temp file must exist during extraction");
            self.seen.lock().unwrap().push(input.path.to_path_buf());
            match &self.reply {
                Ok(text) => Ok(ExtractorOutput::text(text.clone())),
                Err(msg) => Err(ExtractError::engine("fake", msg)),
            }
        }
    }

    fn dispatcher(work: &Path, out: &Path) -> ExtractionDispatcher {
        ExtractionDispatcher::new(TempStore::new(work), ResultWriter::new(out))
    }

    fn upload(name: &str, data: &[u8]) -> UploadedDocument {
        UploadedDocument {
            filename: name.to_string(),
            data: data.to_vec(),
        }
    }

    fn dir_is_empty(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_dispatch_stores_extracts_writes_and_cleans_up() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let fake = FakeExtractor::ok(Method::Pdfplumber, "Invoice total 42");
        let dispatcher = dispatcher(work.path(), out.path()).register(fake.clone());

        let result = dispatcher
            .dispatch(
                "pdfplumber",
                &upload("Sample Invoice.pdf", b"%PDF"),
                &ExtractOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            fake.seen.lock().unwrap().as_slice(),
            &[work.path().join("temp_Sample_Invoice.pdf")]
        );
        assert!(dir_is_empty(work.path()));
        assert_eq!(result.text(), "Invoice total 42");

        let saved = result.saved_as().unwrap();
        assert_eq!(saved, &out.path().join("Sample_Invoice.pdf_pdfplumber.md"));
        assert!(saved.exists());
    }

    #[tokio::test]
    async fn test_empty_text_produces_no_artifact() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(work.path(), out.path())
            .register(FakeExtractor::ok(Method::Pdfplumber, ""));

        let result = dispatcher
            .dispatch("pdfplumber", &upload("a.pdf", b"x"), &ExtractOptions::default())
            .await
            .unwrap();

        assert!(result.saved_as().is_none());
        assert!(dir_is_empty(out.path()));
        assert!(dir_is_empty(work.path()));
    }

    #[tokio::test]
    async fn test_failure_degrades_and_still_cleans_up() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(work.path(), out.path())
            .register(FakeExtractor::failing(Method::Tesseract));

        let result = dispatcher
            .dispatch("tesseract", &upload("scan.pdf", b"x"), &ExtractOptions::default())
            .await
            .unwrap();

        assert_eq!(result.text(), "");
        assert!(result.error().unwrap().contains("engine crashed"));
        assert!(result.saved.is_empty());
        assert!(dir_is_empty(work.path()));
    }

    #[tokio::test]
    async fn test_unknown_method_stores_nothing() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(work.path(), out.path())
            .register(FakeExtractor::ok(Method::Pdfplumber, "x"));

        for name in ["doctr", "pymupdf"] {
            let err = dispatcher
                .dispatch(name, &upload("a.pdf", b"x"), &ExtractOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, ExtractError::UnknownMethod(ref m) if m == name));
        }
        assert!(dir_is_empty(work.path()));
    }

    #[tokio::test]
    async fn test_format_gate_rejects_before_storing() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dispatcher =
            dispatcher(work.path(), out.path()).register(Arc::new(SlideConverter::new(out.path())));

        let err = dispatcher
            .dispatch("pptx2md", &upload("deck.pdf", b"x"), &ExtractOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
        assert!(dir_is_empty(work.path()));
    }

    #[tokio::test]
    async fn test_dispatch_all_returns_one_entry_per_method() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let plumber = FakeExtractor::ok(Method::Pdfplumber, "plumber text");
        let ocr = FakeExtractor::failing(Method::Tesseract);
        let docling = FakeExtractor::ok(Method::Docling, "docling text");
        let dispatcher = dispatcher(work.path(), out.path())
            .register(plumber.clone())
            .register(ocr.clone())
            .register(docling.clone())
            .register(Arc::new(SlideConverter::new(out.path())));

        let results = dispatcher
            .dispatch_all(&upload("report.pdf", b"%PDF"))
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(dispatcher.methods().len(), 4);

        // One stored copy shared by every extractor.
        let expected = work.path().join("temp_report.pdf");
        for fake in [&plumber, &ocr, &docling] {
            assert_eq!(fake.seen.lock().unwrap().as_slice(), &[expected.clone()]);
        }
        assert!(dir_is_empty(work.path()));

        match &results[&Method::Tesseract] {
            AggregateEntry::Done(r) => assert!(r.error().is_some()),
            other => panic!("unexpected: {:?}", other),
        }
        match &results[&Method::Pptx2md] {
            AggregateEntry::Rejected(msg) => assert_eq!(msg, "Only .pptx files are supported."),
            other => panic!("unexpected: {:?}", other),
        }
        match &results[&Method::Docling] {
            AggregateEntry::Done(r) => assert_eq!(r.text(), "docling text"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(out.path().join("report.pdf_pdfplumber.md").exists());
        assert!(out.path().join("report.pdf_docling.md").exists());
    }

    #[tokio::test]
    async fn test_dispatch_with_real_pdf() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dispatcher =
            dispatcher(work.path(), out.path()).register(Arc::new(PageTextExtractor));

        let result = dispatcher
            .dispatch(
                "pdfplumber",
                &upload("Sample Invoice.pdf", &sample_pdf(&["Invoice 1001"])),
                &ExtractOptions::default(),
            )
            .await
            .unwrap();

        assert!(result.text().contains("Invoice 1001"));
        let saved = std::fs::read_to_string(result.saved_as().unwrap()).unwrap();
        assert!(saved.starts_with("# Extracted Text (pdfplumber)\n\n"));
        assert!(dir_is_empty(work.path()));
    }
}
