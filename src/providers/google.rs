//! Google (Gemini) image generation provider.

use crate::error::{parse_retry_after, sanitize_error_message, ImgGenError, Result};
use crate::provider::ImageProvider;
use crate::types::{GeneratedImage, ImageFormat, ImageRequest, ProviderKind, MAX_REFERENCE_IMAGES};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

/// Default Gemini image model.
pub const GOOGLE_DEFAULT_MODEL: &str = "gemini-3-pro-image-preview";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Builder for GoogleProvider.
#[derive(Debug, Clone, Default)]
pub struct GoogleProviderBuilder {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
}

impl GoogleProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `GOOGLE_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the default model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Overrides the API host (proxies, tests).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Builds the provider, resolving the API key.
    pub fn build(self) -> Result<GoogleProvider> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .ok_or_else(|| {
                ImgGenError::Auth("GOOGLE_API_KEY not set and no API key provided".into())
            })?;

        Ok(GoogleProvider {
            client: reqwest::Client::new(),
            api_key,
            model: self.model.unwrap_or_else(|| GOOGLE_DEFAULT_MODEL.to_string()),
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

/// Google Gemini image generation provider.
pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GoogleProvider {
    /// Creates a new `GoogleProviderBuilder`.
    pub fn builder() -> GoogleProviderBuilder {
        GoogleProviderBuilder::new()
    }

    async fn generate_impl(&self, request: &ImageRequest) -> Result<GeneratedImage> {
        if request.reference_images.len() > MAX_REFERENCE_IMAGES {
            return Err(ImgGenError::InvalidRequest(format!(
                "Too many reference images: {}. Max {} allowed",
                request.reference_images.len(),
                MAX_REFERENCE_IMAGES
            )));
        }

        let references = load_references(&request.reference_images).await?;

        let start = Instant::now();
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let body = GenerateContentRequest::from_image_request(request, &references);

        tracing::debug!(
            model,
            references = references.len(),
            "sending Gemini generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let payload: GenerateContentResponse = response.json().await?;
        let data = payload.into_image_bytes()?;

        tracing::debug!(
            model,
            bytes = data.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Gemini returned image"
        );

        Ok(GeneratedImage::new(data, ProviderKind::Google, model))
    }
}

#[async_trait]
impl ImageProvider for GoogleProvider {
    async fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage> {
        self.generate_impl(request).await
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn generate_model(&self) -> &str {
        &self.model
    }
}

/// Reads every reference image, in order, before any remote call.
async fn load_references(paths: &[std::path::PathBuf]) -> Result<Vec<Vec<u8>>> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        images.push(read_reference(path).await?);
    }
    Ok(images)
}

async fn read_reference(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ImgGenError::ReferenceNotFound(path.to_path_buf())
        } else {
            ImgGenError::Io(e)
        }
    })
}

fn parse_error(status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> ImgGenError {
    let text = sanitize_error_message(text);
    if status == 429 {
        let retry_after = parse_retry_after(headers).map(std::time::Duration::from_secs);
        return ImgGenError::RateLimited { retry_after };
    }
    if status == 401 || status == 403 {
        return ImgGenError::Auth(text);
    }
    if status == 404 {
        return ImgGenError::InvalidRequest(
            "Model not found. Verify the model name is correct.".into(),
        );
    }
    let lower = text.to_lowercase();
    if lower.contains("resource_exhausted") || lower.contains("quota") {
        return ImgGenError::RateLimited { retry_after: None };
    }
    if lower.contains("safety") || lower.contains("prohibited") {
        return ImgGenError::ContentBlocked(text);
    }
    ImgGenError::Api {
        status,
        message: text,
    }
}

/// Appends aspect ratio and resolution hints to the prompt.
fn compose_prompt(request: &ImageRequest) -> String {
    let mut hints = Vec::new();
    if let Some(ar) = request.aspect_ratio {
        hints.push(format!("aspect_ratio: {}", ar));
    }
    if let Some(res) = request.resolution {
        hints.push(format!("quality: {}", res));
    }

    if hints.is_empty() {
        request.prompt.clone()
    } else {
        format!("{}\n\n[{}]", request.prompt, hints.join(", "))
    }
}

// Wire types for generateContent
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    InlineData { inline_data: Blob },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
}

impl GenerateContentRequest {
    /// Prompt first, then each reference image in order.
    fn from_image_request(req: &ImageRequest, references: &[Vec<u8>]) -> Self {
        let mut parts = vec![RequestPart::Text {
            text: compose_prompt(req),
        }];

        for image_data in references {
            let mime_type = ImageFormat::from_magic_bytes(image_data)
                .map(|f| f.mime_type())
                .unwrap_or("image/png")
                .to_string();

            parts.push(RequestPart::InlineData {
                inline_data: Blob {
                    mime_type,
                    data: base64::engine::general_purpose::STANDARD.encode(image_data),
                },
            });
        }

        let generation_config = (!references.is_empty()).then(|| GenerationConfig {
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
        });

        Self {
            contents: vec![Content { parts }],
            generation_config,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<InlineBlob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineBlob {
    #[allow(dead_code)]
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

impl GenerateContentResponse {
    /// Decodes the first inline binary part of the response.
    fn into_image_bytes(self) -> Result<Vec<u8>> {
        // Blocked prompts still come back as HTTP 200
        if let Some(feedback) = self.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                let msg = feedback
                    .block_reason_message
                    .unwrap_or_else(|| format!("Prompt blocked: {}", reason));
                return Err(ImgGenError::ContentBlocked(msg));
            }
        }

        let inline = self
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.inline_data)
            .find(|d| !d.data.is_empty())
            .ok_or(ImgGenError::NoImageData)?;

        base64::engine::general_purpose::STANDARD
            .decode(&inline.data)
            .map_err(|e| ImgGenError::Decode(e.to_string()))
    }
}
