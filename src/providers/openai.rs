//! OpenAI image generation provider (gpt-image).

use crate::error::{parse_retry_after, sanitize_error_message, ImgGenError, Result};
use crate::provider::ImageProvider;
use crate::types::{AspectRatio, GeneratedImage, ImageFormat, ImageRequest, ProviderKind};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncReadExt;

/// Default OpenAI image model.
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-image-1.5";

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Builder for OpenAiProvider.
#[derive(Debug, Clone, Default)]
pub struct OpenAiProviderBuilder {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
}

impl OpenAiProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `OPENAI_API_KEY` env var.
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
    pub fn build(self) -> Result<OpenAiProvider> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                ImgGenError::Auth("OPENAI_API_KEY not set and no API key provided".into())
            })?;

        Ok(OpenAiProvider {
            client: reqwest::Client::new(),
            api_key,
            model: self.model.unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

/// OpenAI image generation provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    /// Creates a new `OpenAiProviderBuilder`.
    pub fn builder() -> OpenAiProviderBuilder {
        OpenAiProviderBuilder::new()
    }

    /// Maps an aspect ratio to the closest supported gpt-image size.
    fn resolve_size(aspect_ratio: Option<AspectRatio>) -> Option<&'static str> {
        aspect_ratio.map(|ar| match ar {
            AspectRatio::Square => "1024x1024",
            AspectRatio::Landscape | AspectRatio::Standard => "1536x1024",
            AspectRatio::Portrait | AspectRatio::StandardPortrait => "1024x1536",
        })
    }

    fn model_for<'a>(&'a self, request: &'a ImageRequest) -> &'a str {
        request.model.as_deref().unwrap_or(&self.model)
    }

    /// Pure generation via the JSON endpoint.
    async fn generate_new(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        let body = OpenAiImageRequest::from_image_request(request, self.model_for(request));

        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        self.read_image_response(response).await
    }

    /// Edit mode: reference images go up as multipart parts.
    async fn generate_edit(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model_for(request).to_string())
            .text("prompt", request.prompt.clone())
            .text("n", "1");

        for path in &request.reference_images {
            let data = read_reference(path).await?;
            let format = ImageFormat::from_magic_bytes(&data).unwrap_or_default();
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("image.{}", format.extension()));

            let part = reqwest::multipart::Part::bytes(data)
                .file_name(file_name)
                .mime_str(format.mime_type())
                .map_err(|e| ImgGenError::InvalidRequest(e.to_string()))?;
            form = form.part("image[]", part);
        }

        if let Some(size) = Self::resolve_size(request.aspect_ratio) {
            form = form.text("size", size);
        }
        if let Some(quality) = request.quality {
            form = form.text("quality", quality.as_str());
        }
        if let Some(fidelity) = request.input_fidelity {
            form = form.text("input_fidelity", fidelity.as_str());
        }

        let response = self
            .client
            .post(format!("{}/v1/images/edits", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        self.read_image_response(response).await
    }

    async fn read_image_response(&self, response: reqwest::Response) -> Result<Vec<u8>> {
        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let openai_response: OpenAiImageResponse = response.json().await?;
        let image_data = openai_response
            .data
            .into_iter()
            .next()
            .ok_or(ImgGenError::NoImageData)?;

        if let Some(b64) = image_data.b64_json {
            return base64::engine::general_purpose::STANDARD
                .decode(&b64)
                .map_err(|e| ImgGenError::Decode(e.to_string()));
        }

        if let Some(url) = image_data.url {
            let img_response = self.client.get(&url).send().await?;
            if !img_response.status().is_success() {
                return Err(ImgGenError::Api {
                    status: img_response.status().as_u16(),
                    message: "Failed to download image from URL".into(),
                });
            }
            return Ok(img_response.bytes().await?.to_vec());
        }

        Err(ImgGenError::NoImageData)
    }
}

#[async_trait]
impl ImageProvider for OpenAiProvider {
    async fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage> {
        let start = Instant::now();
        let model = self.model_for(request);

        tracing::debug!(
            model,
            references = request.reference_images.len(),
            "sending OpenAI image request"
        );

        let data = if request.has_references() {
            self.generate_edit(request).await?
        } else {
            self.generate_new(request).await?
        };

        tracing::debug!(
            model,
            bytes = data.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "OpenAI returned image"
        );

        Ok(GeneratedImage::new(data, ProviderKind::OpenAI, model))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn generate_model(&self) -> &str {
        &self.model
    }
}

/// Reads one reference image. The handle is closed when this returns,
/// whether or not the read succeeded.
async fn read_reference(path: &Path) -> Result<Vec<u8>> {
    let not_found = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ImgGenError::ReferenceNotFound(PathBuf::from(path))
        } else {
            ImgGenError::Io(e)
        }
    };

    let mut file = tokio::fs::File::open(path).await.map_err(not_found)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).await?;
    Ok(data)
}

fn parse_error(status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> ImgGenError {
    let text = sanitize_error_message(text);
    if status == 429 {
        // insufficient_quota is also reported as 429; both mean stop for now
        let retry_after = parse_retry_after(headers).map(std::time::Duration::from_secs);
        return ImgGenError::RateLimited { retry_after };
    }
    if status == 413 {
        return ImgGenError::InvalidRequest(
            "Image too large. Reduce image size and try again.".into(),
        );
    }
    if status == 401 || status == 403 {
        return ImgGenError::Auth(text);
    }
    let lower = text.to_lowercase();
    if lower.contains("safety") || lower.contains("content_policy") {
        return ImgGenError::ContentBlocked(text);
    }
    ImgGenError::Api {
        status,
        message: text,
    }
}

#[derive(Debug, Serialize)]
struct OpenAiImageRequest {
    model: String,
    prompt: String,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<String>,
}

impl OpenAiImageRequest {
    fn from_image_request(req: &ImageRequest, model: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt: req.prompt.clone(),
            n: 1,
            size: OpenAiProvider::resolve_size(req.aspect_ratio).map(String::from),
            quality: req.quality.map(|q| q.as_str().to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiImageResponse {
    #[serde(default)]
    data: Vec<OpenAiImageData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}
