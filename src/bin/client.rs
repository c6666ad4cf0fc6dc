//! Command-line client for the documagic server.
//!
//! Uploads a document to one extraction method (or `all`), prints what came
//! back and keeps a markdown copy of the text locally.

use anyhow::{bail, Context, Result};
use clap::Parser;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_BASE_URL: &str = "http://localhost:8006";
const NO_TEXT: &str = "No text extracted";

#[derive(Parser, Debug)]
#[command(name = "documagic-client")]
#[command(about = "Send a document to a documagic server and show the extracted text")]
struct Cli {
    /// Document to extract
    #[arg(required_unless_present = "list")]
    file: Option<PathBuf>,

    /// Extraction method id, or `all`
    #[arg(short, long, default_value = "pdfplumber")]
    method: String,

    /// Field to pull out with extract_thinker (repeatable)
    #[arg(short, long)]
    fields: Vec<String>,

    /// Skip slide images with pptx2md
    #[arg(long)]
    disable_image: bool,

    /// List the server's methods and exit
    #[arg(long)]
    list: bool,

    /// Server base URL
    #[arg(long, env = "DOCUMAGIC_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Where extracted text is saved
    #[arg(short, long, default_value = "output_folder")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "documagic_client=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let http = reqwest::Client::new();
    let base_url = cli.base_url.trim_end_matches('/');

    if cli.list {
        return list_methods(&http, base_url).await;
    }
    let Some(file) = cli.file.as_deref() else {
        bail!("No document given");
    };

    let local = stage_copy(file, Path::new("."))?;
    let outcome = extract(&http, base_url, &cli, file, &local).await;
    remove_with_retry(&local).await;

    let response = outcome?;
    report(&response);

    let text = response_text(&response);
    let saved = save_text(&cli.output_dir, file, &cli.method, &text).await?;
    println!("\nSaved to {}", saved.display());
    Ok(())
}

async fn list_methods(http: &reqwest::Client, base_url: &str) -> Result<()> {
    let methods: Vec<Value> = http
        .get(format!("{}/methods", base_url))
        .send()
        .await
        .context("Failed to reach server")?
        .error_for_status()?
        .json()
        .await
        .context("Failed to parse method list")?;

    for method in &methods {
        println!(
            "{:<16} {:<14} {}",
            method["id"].as_str().unwrap_or_default(),
            method["label"].as_str().unwrap_or_default(),
            method["best_for"].as_str().unwrap_or_default(),
        );
    }
    Ok(())
}

/// Copy the input into `dir` as `temp*.{ext}`.
fn stage_copy(file: &Path, dir: &Path) -> Result<PathBuf> {
    let suffix = file
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let (mut staged, path) = tempfile::Builder::new()
        .prefix("temp")
        .suffix(&suffix)
        .tempfile_in(dir)
        .context("Failed to create temporary copy")?
        .keep()
        .context("Failed to keep temporary copy")?;

    let mut source = std::fs::File::open(file)
        .with_context(|| format!("Failed to open {}", file.display()))?;
    std::io::copy(&mut source, &mut staged)
        .with_context(|| format!("Failed to copy {}", file.display()))?;
    info!("Staged {} as {}", file.display(), path.display());
    Ok(path)
}

/// Endpoint path for a method id.
fn endpoint(method: &str) -> String {
    match method {
        "pdfminer_pages" => "/extract/pdfminer/pages".to_string(),
        other => format!("/extract/{}", other),
    }
}

async fn extract(
    http: &reqwest::Client,
    base_url: &str,
    cli: &Cli,
    original: &Path,
    staged: &Path,
) -> Result<Value> {
    let data = tokio::fs::read(staged)
        .await
        .with_context(|| format!("Failed to read {}", staged.display()))?;
    let filename = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let mut form = Form::new()
        .part("file", Part::bytes(data).file_name(filename))
        .text("disable_image", cli.disable_image.to_string());
    for field in &cli.fields {
        form = form.text("fields", field.clone());
    }

    let url = format!("{}{}", base_url, endpoint(&cli.method));
    info!("Sending request to API endpoint: {}", url);
    let response = http
        .post(&url)
        .multipart(form)
        .send()
        .await
        .context("API request failed")?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .context("Failed to parse server response")?;
    if !status.is_success() {
        bail!(
            "Server returned {}: {}",
            status,
            body["error"].as_str().unwrap_or_default()
        );
    }
    Ok(body)
}

/// Delete the staged copy, retrying once after a second.
async fn remove_with_retry(path: &Path) {
    if tokio::fs::remove_file(path).await.is_ok() {
        info!("Temporary file deleted: {}", path.display());
        return;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Temporary file deleted: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Could not delete temporary file {}: {}. It may still be in use.",
            path.display(),
            e
        ),
    }
}

/// The text to show and save, whatever shape the endpoint answered with.
fn response_text(response: &Value) -> String {
    match &response["text"] {
        Value::String(text) => text.clone(),
        Value::Array(pages) => pages
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => response["markdown_content"]
            .as_str()
            .unwrap_or(NO_TEXT)
            .to_string(),
    }
}

fn report(response: &Value) {
    if let Some(error) = response["error"].as_str() {
        warn!("Server reported an error: {}", error);
    }

    if let Some(results) = response["results"].as_object() {
        for (method, value) in results {
            println!("== {} ==", method);
            match value {
                Value::String(text) => println!("{}\n", text),
                other => println!("{}\n", other),
            }
        }
        return;
    }

    println!("{}", response_text(response));
    if let Some(tables) = response["table_text"].as_str() {
        println!("\n== Tables ==\n{}", tables);
    }
    if let Some(data) = response.get("extracted_data") {
        if let Ok(pretty) = serde_json::to_string_pretty(data) {
            println!("\n== Fields ==\n{}", pretty);
        }
    }
}

/// Write `{output_dir}/{stem}_{method}.md`.
async fn save_text(output_dir: &Path, original: &Path, method: &str, text: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let path = output_dir.join(format!("{}_{}.md", stem, method.replace(' ', "_")));
    tokio::fs::write(&path, text)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
