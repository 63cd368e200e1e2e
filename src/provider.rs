//! Image provider trait, factory and model catalogue.

use crate::error::Result;
use crate::types::{GeneratedImage, GenerationOutcome, ImageRequest, ProviderKind};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Models offered per provider. The first entry is the provider default.
static AVAILABLE_MODELS: [(ProviderKind, &[&str]); 2] = [
    (ProviderKind::Google, &["gemini-3-pro-image-preview"]),
    (ProviderKind::OpenAI, &["gpt-image-1.5"]),
];

/// Trait for image generation providers.
///
/// Implementations hold one HTTP client each and are shared read-only across
/// concurrent generation tasks.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Performs one remote generation call and returns the image bytes.
    async fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage>;

    /// Returns the kind of this provider.
    fn kind(&self) -> ProviderKind;

    /// Returns the provider identifier ("google" or "openai").
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Default model identifier, shown before any call is made.
    fn generate_model(&self) -> &str;

    /// Generates one image and writes it to `output_dir/filename`.
    ///
    /// Never fails: every error becomes a `failed` outcome, and rate limiting
    /// sets [`GenerationOutcome::rate_limited`].
    async fn generate_image(
        &self,
        request: &ImageRequest,
        output_dir: &Path,
        filename: &str,
    ) -> GenerationOutcome {
        let result = match self.generate(request).await {
            Ok(image) => image.save(output_dir.join(filename)).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => GenerationOutcome::success(filename),
            Err(e) => {
                if e.is_rate_limited() {
                    tracing::warn!(provider = self.name(), filename, "rate limited");
                } else {
                    tracing::debug!(provider = self.name(), filename, "generation failed: {e}");
                }
                GenerationOutcome::from_error(filename, &e)
            }
        }
    }
}

/// Creates a provider by name ("google" or "openai").
pub fn get_provider(name: &str, api_key: impl Into<String>) -> Result<Arc<dyn ImageProvider>> {
    provider_for(name.parse()?, api_key)
}

/// Creates a provider of the given kind.
pub fn provider_for(
    kind: ProviderKind,
    api_key: impl Into<String>,
) -> Result<Arc<dyn ImageProvider>> {
    let api_key = api_key.into();
    match kind {
        ProviderKind::Google => {
            #[cfg(feature = "google")]
            {
                let provider = crate::providers::GoogleProvider::builder()
                    .api_key(api_key)
                    .build()?;
                Ok(Arc::new(provider))
            }
            #[cfg(not(feature = "google"))]
            {
                let _ = api_key;
                Err(crate::error::ImgGenError::ProviderNotAvailable("google".into()))
            }
        }
        ProviderKind::OpenAI => {
            #[cfg(feature = "openai")]
            {
                let provider = crate::providers::OpenAiProvider::builder()
                    .api_key(api_key)
                    .build()?;
                Ok(Arc::new(provider))
            }
            #[cfg(not(feature = "openai"))]
            {
                let _ = api_key;
                Err(crate::error::ImgGenError::ProviderNotAvailable("openai".into()))
            }
        }
    }
}

/// Guesses the provider from a model name.
///
/// `gemini-*` and `google-*` map to Google, `gpt-*` and `dall-e-*` to
/// OpenAI. Anything else falls back to OpenAI.
pub fn infer_provider_from_model(model: &str) -> ProviderKind {
    if model.starts_with("gemini-") || model.starts_with("google-") {
        ProviderKind::Google
    } else {
        ProviderKind::OpenAI
    }
}

/// All models, grouped by provider.
pub fn available_models() -> &'static [(ProviderKind, &'static [&'static str])] {
    &AVAILABLE_MODELS
}

/// Models for a provider name; empty for unknown names.
pub fn models_for_provider(name: &str) -> &'static [&'static str] {
    name.parse::<ProviderKind>()
        .ok()
        .and_then(|kind| {
            AVAILABLE_MODELS
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, models)| *models)
        })
        .unwrap_or(&[])
}

/// Default model for a provider.
pub fn default_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Google => "gemini-3-pro-image-preview",
        ProviderKind::OpenAI => "gpt-image-1.5",
    }
}
