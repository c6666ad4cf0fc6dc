//! documagic - multi-engine document text extraction server.

mod config;
mod dispatcher;
mod error;
mod extractors;
mod methods;
mod openrouter;
mod temp_store;
mod writer;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use config::ServiceConfig;
use dispatcher::{AggregateEntry, ExtractionDispatcher, ExtractionResult, UploadedDocument};
use error::ExtractError;
use extractors::{ExtractOptions, ExtractorOutput};
use methods::Method;
use openrouter::OpenRouterClient;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use temp_store::TempStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use writer::ResultWriter;

const NO_TEXT: &str = "No text extracted";
const NO_TABLE: &str = "No table extracted";
const NO_DATA: &str = "No data extracted";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<ExtractionDispatcher>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "documagic=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    for dir in [&config.work_dir, &config.output_dir, &config.slides_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    let http = reqwest::Client::new();
    let llm = config.openrouter_api_key.as_ref().map(|key| {
        OpenRouterClient::new(http.clone(), key.clone()).with_model(config.openrouter_model.clone())
    });
    match &llm {
        Some(_) => info!("OpenRouter client initialized ({})", config.openrouter_model),
        None => warn!("OPENROUTER_API_KEY not set, extract_thinker requests will fail"),
    }

    let dispatcher = ExtractionDispatcher::new(
        TempStore::new(config.work_dir.clone()),
        ResultWriter::new(config.output_dir.clone()),
    )
    .with_extractors(extractors::default_extractors(&config, http, llm));
    info!("Registered {} extraction methods", dispatcher.methods().len());

    let state = AppState {
        dispatcher: Arc::new(dispatcher),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/methods", get(list_methods))
        .route("/supported-formats", get(supported_formats))
        .route("/extract/pdfminer/pages", post(extract_pdfminer_pages))
        .route("/extract/:method", post(extract_document))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(serde::Serialize)]
struct MethodInfo {
    id: &'static str,
    label: &'static str,
    best_for: &'static str,
    accepted_extensions: &'static [&'static str],
}

/// List registered extraction methods.
async fn list_methods(State(state): State<AppState>) -> Json<Vec<MethodInfo>> {
    Json(
        state
            .dispatcher
            .methods()
            .into_iter()
            .map(|m| MethodInfo {
                id: m.id(),
                label: m.label(),
                best_for: m.best_for(),
                accepted_extensions: m.accepted_extensions(),
            })
            .collect(),
    )
}

/// Formats the layout-aware converter accepts.
async fn supported_formats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "supported_formats": state.dispatcher.supported_formats() }))
}

#[derive(serde::Deserialize, Default)]
struct ExtractQuery {
    disable_image: Option<bool>,
}

/// Upload a document and run one method, or every method for `all`.
async fn extract_document(
    State(state): State<AppState>,
    Path(method): Path<String>,
    Query(query): Query<ExtractQuery>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let (document, mut options) = read_upload(multipart).await?;
    if let Some(disable) = query.disable_image {
        options.disable_image = disable;
    }

    info!(
        "Received file: {} ({} bytes) for method: {}",
        document.filename,
        document.data.len(),
        method
    );

    if method == "all" {
        let results = state
            .dispatcher
            .dispatch_all(&document)
            .await
            .map_err(into_api_error)?;
        return Ok(Json(render_all(&results)));
    }

    match state.dispatcher.dispatch(&method, &document, &options).await {
        Ok(result) => Ok(Json(render(&result))),
        Err(ExtractError::UnsupportedFormat(message)) => {
            error!("Rejected {} for {}: {}", document.filename, method, message);
            Ok(Json(json!({ "error": message })))
        }
        Err(e) => Err(into_api_error(e)),
    }
}

/// Per-page PDFMiner lives under its own path.
async fn extract_pdfminer_pages(
    state: State<AppState>,
    query: Query<ExtractQuery>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    extract_document(
        state,
        Path(Method::PdfminerPages.id().to_string()),
        query,
        multipart,
    )
    .await
}

/// Pull the `file`, `fields` and `disable_image` parts out of the form.
async fn read_upload(
    mut multipart: Multipart,
) -> Result<(UploadedDocument, ExtractOptions), ApiError> {
    let mut document = None;
    let mut options = ExtractOptions::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        let read_text = |e: axum::extract::multipart::MultipartError| {
            api_error(StatusCode::BAD_REQUEST, format!("Failed to read form field: {}", e))
        };
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let data = field.bytes().await.map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
                })?;
                document = Some(UploadedDocument {
                    filename,
                    data: data.to_vec(),
                });
            }
            Some("fields") => {
                let value = field.text().await.map_err(read_text)?;
                options.fields.push(value);
            }
            Some("disable_image") => {
                let value = field.text().await.map_err(read_text)?;
                options.disable_image = parse_flag(&value);
            }
            _ => {}
        }
    }

    let document =
        document.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No file uploaded"))?;
    Ok((document, options))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn into_api_error(e: ExtractError) -> ApiError {
    let status = match &e {
        ExtractError::UnknownMethod(_) => StatusCode::NOT_FOUND,
        ExtractError::Upload(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ExtractError::UnsupportedFormat(_) | ExtractError::Engine { .. } => StatusCode::OK,
    };
    if status != StatusCode::OK {
        error!("Request failed: {}", e);
    }
    api_error(status, e.to_string())
}

// ============================================================================
// Response rendering
// ============================================================================

fn file_name(path: &std::path::Path) -> Value {
    path.file_name()
        .map(|n| Value::String(n.to_string_lossy().into_owned()))
        .unwrap_or(Value::Null)
}

fn saved(result: &ExtractionResult, tag: &str) -> Value {
    result
        .saved
        .get(tag)
        .map(|p| file_name(p))
        .unwrap_or(Value::Null)
}

fn or_placeholder(text: &str, placeholder: &str) -> String {
    if text.trim().is_empty() {
        placeholder.to_string()
    } else {
        text.to_string()
    }
}

/// Shape one method's result the way its endpoint reports it.
fn render(result: &ExtractionResult) -> Value {
    let method = result.method;
    let saved_as = result.saved_as().map(|p| file_name(p)).unwrap_or(Value::Null);

    let mut body = match (method, &result.output) {
        (Method::Marker, output) => {
            let (text, tables) = match output {
                ExtractorOutput::Hybrid { text, tables, .. } => (text.as_str(), tables.as_str()),
                _ => ("", ""),
            };
            let tag = method.artifact_tag();
            json!({
                "text": or_placeholder(text, NO_TEXT),
                "table_text": or_placeholder(tables, NO_TABLE),
                "saved_files": {
                    "text": saved(result, &format!("{tag}_text")),
                    "table": saved(result, &format!("{tag}_table")),
                },
            })
        }
        (Method::ExtractThinker, output) => {
            let data = match output {
                ExtractorOutput::Fields { fields } if !fields.is_empty() => json!(fields),
                _ => json!(NO_DATA),
            };
            json!({ "extracted_data": data, "method": method.label(), "saved_as": saved_as })
        }
        (Method::PdfminerPages, output) => {
            let text = match output {
                ExtractorOutput::Paged { pages, .. } if !pages.is_empty() => json!(pages),
                _ => json!(NO_TEXT),
            };
            json!({
                "text": text,
                "pages": page_count(output),
                "method": method.label(),
                "saved_as": saved_as,
            })
        }
        (Method::PdfminerFull, output) => json!({
            "text": or_placeholder(&output.primary_text(), NO_TEXT),
            "pages": page_count(output),
            "method": method.label(),
            "saved_as": saved_as,
        }),
        (Method::Pptx2md, ExtractorOutput::Markdown { content, filename }) => json!({
            "markdown_content": content,
            "filename": filename,
        }),
        (Method::Pptx2md, output) => {
            return json!({ "error": output.error().unwrap_or(NO_TEXT) });
        }
        (_, output) => json!({
            "text": or_placeholder(&output.primary_text(), NO_TEXT),
            "method": method.label(),
            "saved_as": saved_as,
        }),
    };

    if let (Some(error), Value::Object(map)) = (result.error(), &mut body) {
        map.insert("error".to_string(), json!(error));
    }
    body
}

fn page_count(output: &ExtractorOutput) -> usize {
    match output {
        ExtractorOutput::Paged { pages, .. } => pages.len(),
        _ => 0,
    }
}

/// Aggregate response: one entry per method plus every artifact written.
fn render_all(results: &BTreeMap<Method, AggregateEntry>) -> Value {
    let mut entries = Map::new();
    let mut saved_files = Map::new();

    for (method, entry) in results {
        let value = match entry {
            AggregateEntry::Rejected(message) => json!({ "error": message }),
            AggregateEntry::Done(result) => {
                for (tag, path) in &result.saved {
                    saved_files.insert(tag.clone(), file_name(path));
                }
                match &result.output {
                    ExtractorOutput::Failed { error } => json!({ "error": error }),
                    _ => json!(result.text()),
                }
            }
        };
        entries.insert(method.id().to_string(), value);
    }

    json!({ "results": entries, "saved_files": saved_files })
}
