//! Core types for image generation.

use crate::error::{ImgGenError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Maximum reference images a single request may carry.
pub const MAX_REFERENCE_IMAGES: usize = 14;

/// Image formats accepted as reference images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format.
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }
}

/// Supported image providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini image models.
    Google,
    /// OpenAI image models (GPT Image).
    OpenAI,
}

impl ProviderKind {
    /// All providers, in display order.
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Google, ProviderKind::OpenAI];

    /// Identifier used in config files and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::OpenAI => "openai",
        }
    }

    /// Human readable vendor name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::OpenAI => "OpenAI",
        }
    }

    /// Environment variable consulted for this provider's API key.
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Google => "GOOGLE_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
        }
    }

    /// Where users obtain a key for this provider.
    pub fn key_url(&self) -> &'static str {
        match self {
            Self::Google => "https://aistudio.google.com/api-keys",
            Self::OpenAI => "https://platform.openai.com/api-keys",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ImgGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "google" => Ok(Self::Google),
            "openai" => Ok(Self::OpenAI),
            other => Err(ImgGenError::UnknownProvider(other.to_string())),
        }
    }
}

/// Aspect ratios accepted by both providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    /// 1:1 square aspect ratio.
    #[serde(rename = "1:1")]
    Square,
    /// 16:9 landscape (widescreen) aspect ratio.
    #[serde(rename = "16:9")]
    Landscape,
    /// 9:16 portrait (tall) aspect ratio.
    #[serde(rename = "9:16")]
    Portrait,
    /// 4:3 standard landscape aspect ratio.
    #[serde(rename = "4:3")]
    Standard,
    /// 3:4 standard portrait aspect ratio.
    #[serde(rename = "3:4")]
    StandardPortrait,
}

impl AspectRatio {
    /// Every accepted value, as written by users.
    pub const WHITELIST: [&'static str; 5] = ["1:1", "16:9", "9:16", "4:3", "3:4"];

    /// Returns the aspect ratio as a string (e.g., "16:9").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Standard => "4:3",
            Self::StandardPortrait => "3:4",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ImgGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1:1" => Ok(Self::Square),
            "16:9" => Ok(Self::Landscape),
            "9:16" => Ok(Self::Portrait),
            "4:3" => Ok(Self::Standard),
            "3:4" => Ok(Self::StandardPortrait),
            other => Err(invalid_choice("aspect_ratio", other, &Self::WHITELIST)),
        }
    }
}

/// Output resolution (Google only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Roughly 1024px on the long edge.
    #[serde(rename = "1K")]
    OneK,
    /// Roughly 2048px on the long edge.
    #[serde(rename = "2K")]
    TwoK,
    /// Roughly 4096px on the long edge.
    #[serde(rename = "4K")]
    FourK,
}

impl Resolution {
    /// Every accepted value, as written by users.
    pub const WHITELIST: [&'static str; 3] = ["1K", "2K", "4K"];

    /// Returns the resolution label (e.g., "2K").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ImgGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1K" => Ok(Self::OneK),
            "2K" => Ok(Self::TwoK),
            "4K" => Ok(Self::FourK),
            other => Err(invalid_choice("resolution", other, &Self::WHITELIST)),
        }
    }
}

/// Rendering quality (OpenAI only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Fastest and cheapest.
    Low,
    /// Balanced.
    Medium,
    /// Best detail.
    High,
}

impl Quality {
    /// Every accepted value, as written by users.
    pub const WHITELIST: [&'static str; 3] = ["low", "medium", "high"];

    /// Returns the API quality string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Quality {
    type Err = ImgGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(invalid_choice("quality", other, &Self::WHITELIST)),
        }
    }
}

/// How closely OpenAI edits follow the reference images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFidelity {
    /// Preserve faces, logos and fine detail from the references.
    High,
    /// Looser interpretation of the references.
    Low,
}

impl InputFidelity {
    /// Every accepted value, as written by users.
    pub const WHITELIST: [&'static str; 2] = ["high", "low"];

    /// Returns the API string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for InputFidelity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InputFidelity {
    type Err = ImgGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            other => Err(invalid_choice("input_fidelity", other, &Self::WHITELIST)),
        }
    }
}

fn invalid_choice(field: &str, value: &str, allowed: &[&str]) -> ImgGenError {
    ImgGenError::Validation(format!(
        "Invalid {field} '{value}'. Must be one of: {}",
        allowed.join(", ")
    ))
}

/// A request to generate one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    /// The text prompt describing the desired image.
    pub prompt: String,
    /// Aspect ratio of the output.
    pub aspect_ratio: Option<AspectRatio>,
    /// Output resolution (Google).
    pub resolution: Option<Resolution>,
    /// Rendering quality (OpenAI).
    pub quality: Option<Quality>,
    /// Reference image paths, in the order they are sent.
    pub reference_images: Vec<PathBuf>,
    /// Model override; the provider default is used when unset.
    pub model: Option<String>,
    /// Reference adherence for OpenAI edits.
    pub input_fidelity: Option<InputFidelity>,
}

impl ImageRequest {
    /// Creates a new request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: None,
            resolution: None,
            quality: None,
            reference_images: Vec::new(),
            model: None,
            input_fidelity: None,
        }
    }

    /// Sets the aspect ratio.
    pub fn with_aspect_ratio(mut self, ratio: AspectRatio) -> Self {
        self.aspect_ratio = Some(ratio);
        self
    }

    /// Sets the resolution.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Sets the quality.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Sets the reference images.
    pub fn with_reference_images<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.reference_images = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the input fidelity.
    pub fn with_input_fidelity(mut self, fidelity: InputFidelity) -> Self {
        self.input_fidelity = Some(fidelity);
        self
    }

    /// Returns true if reference images are attached.
    pub fn has_references(&self) -> bool {
        !self.reference_images.is_empty()
    }
}

/// Final state of one variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Image written to disk.
    Success,
    /// Nothing written; see the error.
    Failed,
}

/// Result of a single variation. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    /// Output file name, relative to the output directory.
    #[serde(rename = "file")]
    pub filename: String,
    /// Whether the image was produced.
    pub status: OutcomeStatus,
    /// Human readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The remote reported quota or rate exhaustion.
    #[serde(skip)]
    pub rate_limited: bool,
    /// Server-suggested wait before retrying, when one was sent.
    #[serde(skip)]
    pub retry_after: Option<Duration>,
    /// When the outcome was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl GenerationOutcome {
    /// A successful outcome.
    pub fn success(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: OutcomeStatus::Success,
            error: None,
            rate_limited: false,
            retry_after: None,
            timestamp: None,
        }
    }

    /// A failed outcome with the given reason.
    pub fn failed(filename: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: OutcomeStatus::Failed,
            error: Some(error.into()),
            rate_limited: false,
            retry_after: None,
            timestamp: None,
        }
    }

    /// A failed outcome caused by rate limiting.
    pub fn rate_limited(filename: impl Into<String>) -> Self {
        Self {
            rate_limited: true,
            ..Self::failed(filename, ImgGenError::RateLimited { retry_after: None }.to_string())
        }
    }

    /// Converts a provider error into a failed outcome.
    pub fn from_error(filename: impl Into<String>, err: &ImgGenError) -> Self {
        if err.is_rate_limited() {
            Self {
                retry_after: err.retry_after(),
                ..Self::rate_limited(filename)
            }
        } else {
            Self::failed(filename, err.to_string())
        }
    }

    /// Stamps the outcome with the given instant.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Returns true for successful outcomes.
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Failure reason, or a placeholder when none was recorded.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown error")
    }
}

/// Image bytes returned by a provider.
#[derive(Debug, Clone)]
#[must_use = "generated image should be saved or processed"]
pub struct GeneratedImage {
    /// Raw image bytes, exactly as the provider sent them.
    pub data: Vec<u8>,
    /// Provider that generated this image.
    pub provider: ProviderKind,
    /// Model that produced the image.
    pub model: String,
}

impl GeneratedImage {
    /// Creates a new generated image.
    pub fn new(data: Vec<u8>, provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            data,
            provider,
            model: model.into(),
        }
    }

    /// Writes the bytes verbatim to `path`.
    pub async fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        tokio::fs::write(path, &self.data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_MAGIC: [u8; 12] = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0];
    const WEBP_MAGIC: [u8; 12] = *b"RIFF\x00\x00\x00\x00WEBP";

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            ImageFormat::from_magic_bytes(&PNG_MAGIC),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&JPEG_MAGIC),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&WEBP_MAGIC),
            Some(ImageFormat::WebP)
        );
        assert_eq!(ImageFormat::from_magic_bytes(b"fake image data"), None);
    }

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
        assert_eq!(ProviderKind::OpenAI.to_string(), "openai");
    }

    #[test]
    fn test_unknown_provider_kind() {
        let err = "stability".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, ImgGenError::UnknownProvider(ref name) if name == "stability"));
    }

    #[test]
    fn test_aspect_ratio_parsing() {
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), AspectRatio::Landscape);
        assert_eq!(AspectRatio::StandardPortrait.as_str(), "3:4");

        let err = "21:9".parse::<AspectRatio>().unwrap_err();
        assert!(err.to_string().contains("aspect_ratio"));
        assert!(err.to_string().contains("1:1, 16:9, 9:16, 4:3, 3:4"));
    }

    #[test]
    fn test_enum_parsing_rejects_other_case() {
        assert!("2k".parse::<Resolution>().is_err());
        assert!("HIGH".parse::<Quality>().is_err());
        assert_eq!("4K".parse::<Resolution>().unwrap(), Resolution::FourK);
        assert_eq!("medium".parse::<Quality>().unwrap(), Quality::Medium);
    }

    #[test]
    fn test_input_fidelity_parsing() {
        assert_eq!("high".parse::<InputFidelity>().unwrap(), InputFidelity::High);
        assert_eq!("low".parse::<InputFidelity>().unwrap(), InputFidelity::Low);

        let err = "invalid".parse::<InputFidelity>().unwrap_err();
        assert!(err.to_string().contains("input_fidelity"));
    }

    #[test]
    fn test_request_builder() {
        let req = ImageRequest::new("A lighthouse")
            .with_aspect_ratio(AspectRatio::Portrait)
            .with_reference_images(["a.png", "b.png"])
            .with_model("gpt-image-1.5");

        assert_eq!(req.aspect_ratio, Some(AspectRatio::Portrait));
        assert_eq!(req.reference_images.len(), 2);
        assert!(req.has_references());
        assert_eq!(req.model.as_deref(), Some("gpt-image-1.5"));
        assert!(!ImageRequest::new("x").has_references());
    }

    #[test]
    fn test_outcome_from_rate_limit_error() {
        let outcome = GenerationOutcome::from_error(
            "imggen_001.png",
            &ImgGenError::RateLimited { retry_after: None },
        );
        assert!(outcome.rate_limited);
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("Rate limit exceeded"));
        assert_eq!(outcome.retry_after, None);

        let outcome = GenerationOutcome::from_error(
            "imggen_002.png",
            &ImgGenError::RateLimited {
                retry_after: Some(Duration::from_secs(30)),
            },
        );
        assert!(outcome.rate_limited);
        assert_eq!(outcome.retry_after, Some(Duration::from_secs(30)));

        let outcome = GenerationOutcome::from_error("imggen_001.png", &ImgGenError::NoImageData);
        assert!(!outcome.rate_limited);
        assert_eq!(outcome.error_message(), "No image data in response");
    }

    #[test]
    fn test_outcome_serialization_uses_file_key() {
        let outcome = GenerationOutcome::success("sunset_001.png");
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["file"], "sunset_001.png");
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
        assert!(json.get("rate_limited").is_none());
        assert!(json.get("retry_after").is_none());
    }
}
