//! Natural-language request to batch descriptor, via Gemini structured output.

use crate::batch::{default_output_folder, save_descriptor, validate, BatchDescriptor, RawBatch};
use crate::error::{parse_retry_after, sanitize_error_message, ImgGenError, Result};
use crate::input::MAX_VARIATIONS;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Text model used for parsing.
pub const PARSE_MODEL: &str = "gemini-2.0-flash";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const INSTRUCTIONS: &str = r#"Parse this natural language request into a batch image generation
YAML structure.

For each image request:
- Extract a clear, descriptive prompt
- Default to 4 variations if not specified, but cap at maximum 4 variations
- Map terms like "widescreen"→"16:9", "portrait"→"9:16"
- Extract any file paths for style references

Return valid JSON matching this structure:
{
  "images": [
    {"prompt": "description", "variations": 4, "aspect_ratio": "16:9"},
    ...
  ],
  "global_style_references": []
}

User request:
"#;

/// Printed when the parse call hits the free-tier quota.
pub const QUOTA_GUIDANCE: &[&str] = &[
    "Error: API quota exceeded",
    "",
    "Your free tier quota is exhausted. To continue:",
    "1. Upgrade to a paid plan: https://ai.google.dev/pricing",
    "2. Or wait for your quota to reset (daily limit)",
];

/// Calls Gemini to turn free text into a raw batch.
pub struct PromptParser {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl PromptParser {
    /// Parser using [`PARSE_MODEL`].
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: PARSE_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Overrides the API host.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sends `text` for parsing and decodes the JSON answer.
    pub async fn parse_text(&self, text: &str) -> Result<RawBatch> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        tracing::debug!(model = %self.model, chars = text.len(), "sending parse request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&parse_request(text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => ImgGenError::RateLimited {
                    retry_after: parse_retry_after(&headers).map(std::time::Duration::from_secs),
                },
                401 | 403 => ImgGenError::Auth(sanitize_error_message(&body)),
                code => ImgGenError::Api {
                    status: code,
                    message: sanitize_error_message(&body),
                },
            });
        }

        let body: ParseResponse = response.json().await?;
        decode_answer(&body.text())
    }
}

fn parse_request(text: &str) -> Value {
    json!({
        "contents": [{
            "parts": [{ "text": format!("{INSTRUCTIONS}{text}") }]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": batch_schema()
        }
    })
}

/// Response schema in the Gemini schema dialect.
fn batch_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "images": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING" },
                        "prompt": { "type": "STRING" },
                        "variations": { "type": "INTEGER" },
                        "aspect_ratio": { "type": "STRING" },
                        "resolution": { "type": "STRING" }
                    },
                    "required": ["prompt", "variations"]
                }
            },
            "global_style_references": {
                "type": "ARRAY",
                "items": { "type": "STRING" }
            },
            "output_folder": { "type": "STRING" }
        },
        "required": ["images"]
    })
}

fn decode_answer(text: &str) -> Result<RawBatch> {
    if text.trim().is_empty() {
        return Err(ImgGenError::UnexpectedResponse(
            "Empty response from Gemini".into(),
        ));
    }
    serde_json::from_str(text).map_err(|e| {
        ImgGenError::UnexpectedResponse(format!("Failed to parse Gemini response as JSON: {e}"))
    })
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    candidates: Vec<ParseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ParseCandidate {
    #[serde(default)]
    content: Option<ParseContent>,
}

#[derive(Debug, Deserialize)]
struct ParseContent {
    #[serde(default)]
    parts: Vec<ParsePart>,
}

#[derive(Debug, Deserialize)]
struct ParsePart {
    #[serde(default)]
    text: Option<String>,
}

impl ParseResponse {
    /// Text parts of the first candidate, joined.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Result of a parse run.
#[derive(Debug, Clone)]
pub struct ParseSummary {
    /// The validated descriptor that was written.
    pub descriptor: BatchDescriptor,
    /// Variation counts as the model returned them, per group.
    pub requested_variations: Vec<Option<i64>>,
    /// Where the YAML was written.
    pub output_file: PathBuf,
}

impl ParseSummary {
    /// Console summary of what a batch run of this file will do.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            String::new(),
            "Parsed successfully!".to_string(),
            format!(
                "Will generate {} images from {} prompts:",
                self.descriptor.total_images(),
                self.descriptor.images.len()
            ),
        ];

        for (i, group) in self.descriptor.images.iter().enumerate() {
            let mut extra = String::new();
            if let Some(Some(requested)) = self.requested_variations.get(i) {
                if *requested > i64::from(MAX_VARIATIONS) {
                    extra.push_str(&format!(", capped from {}", requested));
                }
            }
            if let Some(ratio) = group.aspect_ratio {
                extra.push_str(&format!(", {}", ratio));
            }
            lines.push(format!(
                "  • \"{}\" ({} variations{})",
                group.prompt, group.variations, extra
            ));
            if group.variations > 1 {
                lines.push(format!(
                    "    → Files: {}, {}, ...",
                    group.filename(1),
                    group.filename(2)
                ));
            } else {
                lines.push(format!("    → File: {}", group.filename(1)));
            }
        }

        lines.push(String::new());
        lines.push(format!("Saved to: {}", self.output_file.display()));
        lines.push(format!(
            "Ready to generate! Run: imggen batch {}",
            self.output_file.display()
        ));
        lines
    }
}

/// Validates a parsed batch, points it at `{input_stem}_output` beside
/// `output`, and writes it as YAML.
pub fn write_parsed(raw: RawBatch, input: &Path, output: &Path) -> Result<ParseSummary> {
    let requested_variations = raw
        .images
        .as_ref()
        .map(|images| images.iter().map(|g| g.variations).collect())
        .unwrap_or_default();

    let mut descriptor = validate(raw)?;
    let folder = std::path::absolute(default_output_folder(input, output))?;
    descriptor.output_folder = Some(folder.display().to_string());

    save_descriptor(&descriptor, output)?;
    tracing::info!(
        output = %output.display(),
        groups = descriptor.images.len(),
        "wrote batch file"
    );

    Ok(ParseSummary {
        descriptor,
        requested_variations,
        output_file: output.to_path_buf(),
    })
}

/// Reads a free-text request from `input`, parses it, and writes the batch
/// descriptor to `output`.
pub async fn parse_prompts(
    parser: &PromptParser,
    input: &Path,
    output: &Path,
) -> Result<ParseSummary> {
    let text = std::fs::read_to_string(input).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ImgGenError::Validation(format!("Input file '{}' not found", input.display()))
        } else {
            ImgGenError::Io(e)
        }
    })?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ImgGenError::Validation("Input file is empty".into()));
    }

    let raw = parser.parse_text(text).await?;
    write_parsed(raw, input, output)
}
