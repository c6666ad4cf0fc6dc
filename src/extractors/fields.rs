//! Schema-driven field extraction backed by an LLM.
//!
//! The caller names the fields it wants; each one becomes a nullable text slot
//! in a JSON schema that the model must answer with. Whatever the model leaves
//! out or nulls maps back to `None`.

use super::pdf_text::load_page_texts;
use super::{run_blocking, ExtractionInput, ExtractorOutput, TextExtractor};
use crate::error::{ExtractError, Result};
use crate::methods::{file_extension, Method};
use crate::openrouter::{Message, OpenRouterClient};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::info;

const SYSTEM_PROMPT: &str = "You extract named fields from documents. \
Answer with a JSON object holding exactly the requested keys. \
Use the text as it appears in the document. \
Use null for any field the document does not contain.";

/// Ordered, de-duplicated set of field names, each typed as plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<String>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text field. Blank and repeated names are ignored.
    pub fn text_field(mut self, name: &str) -> Self {
        let name = name.trim();
        if !name.is_empty() && !self.fields.iter().any(|f| f == name) {
            self.fields.push(name.to_string());
        }
        self
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .fold(Self::new(), |schema, name| schema.text_field(name.as_ref()))
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON schema handed to the model.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.clone(), json!({ "type": ["string", "null"] })))
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.fields,
            "additionalProperties": false,
        })
    }

    /// Map a model answer back onto the requested names.
    pub fn resolve(&self, answer: &Map<String, Value>) -> BTreeMap<String, Option<String>> {
        self.fields
            .iter()
            .map(|field| {
                let value = match answer.get(field) {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                };
                (field.clone(), value)
            })
            .collect()
    }
}

/// Pulls caller-named fields out of a document with an LLM.
pub struct FieldExtractor {
    client: Option<OpenRouterClient>,
}

impl FieldExtractor {
    pub fn new(client: Option<OpenRouterClient>) -> Self {
        Self { client }
    }
}

/// Document text the model gets to read.
async fn load_document_text(input: &ExtractionInput<'_>) -> Result<String> {
    let path = input.path.to_path_buf();
    if file_extension(input.original_name).as_deref() == Some("pdf") {
        let pages = run_blocking("lopdf", move || load_page_texts(&path)).await?;
        Ok(pages.join("\n"))
    } else {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ExtractError::engine("extract_thinker", e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait::async_trait]
impl TextExtractor for FieldExtractor {
    fn method(&self) -> Method {
        Method::ExtractThinker
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<ExtractorOutput> {
        let schema = FieldSchema::from_names(&input.options.fields);
        if schema.is_empty() {
            return Ok(ExtractorOutput::Fields {
                fields: BTreeMap::new(),
            });
        }

        let client = self.client.as_ref().ok_or_else(|| {
            ExtractError::engine("extract_thinker", "OPENROUTER_API_KEY is not configured")
        })?;

        info!(
            "Starting field extraction for file: {} ({} fields)",
            input.path.display(),
            schema.fields().len()
        );
        let document = load_document_text(input).await?;

        let messages = vec![
            Message::system(format!("{}\n\nDOCUMENT:\n{}", SYSTEM_PROMPT, document)),
            Message::user(format!("Extract these fields: {}", schema.fields().join(", "))),
        ];
        let answer: Map<String, Value> = client
            .chat_json(messages, "document_fields", schema.to_json_schema())
            .await
            .map_err(|e| ExtractError::engine("extract_thinker", format!("{:#}", e)))?;

        info!("Field extraction completed for file: {}", input.path.display());
        Ok(ExtractorOutput::Fields {
            fields: schema.resolve(&answer),
        })
    }
}
