#![warn(missing_docs)]
//! imggen - batch image generation over Google Gemini and OpenAI image models.
//!
//! The crate wraps both vendors behind one [`ImageProvider`] trait and adds
//! the pieces around it: cost estimates, a collision guard for output
//! files, a bounded concurrent runner for prompt variations, and a
//! sequential, resumable batch runner driven by a YAML descriptor.
//!
//! # Quick Start
//!
//! ```no_run
//! use imggen::{generate_from_prompt, get_provider, GenerateOptions};
//!
//! #[tokio::main]
//! async fn main() -> imggen::Result<()> {
//!     let provider = get_provider("openai", std::env::var("OPENAI_API_KEY").unwrap_or_default())?;
//!     let opts = GenerateOptions {
//!         variations: 2,
//!         ..GenerateOptions::new("A lighthouse at dusk")
//!     };
//!     let report = generate_from_prompt(provider, &opts).await?;
//!     for line in report.lines() {
//!         println!("{line}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Batch runs
//!
//! ```no_run
//! use imggen::batch::{load_descriptor, resolve_output_dir, run_batch, validate};
//! use std::path::Path;
//!
//! # async fn run(provider: &dyn imggen::ImageProvider) -> imggen::Result<()> {
//! let path = Path::new("batch.yaml");
//! let mut descriptor = validate(load_descriptor(path)?)?;
//! let output_dir = resolve_output_dir(&descriptor, path);
//! run_batch(provider, &mut descriptor, &output_dir, |p| println!("{}", p.line())).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `google`: Gemini image provider
//! - `openai`: OpenAI GPT Image provider
//! - `cli`: Command-line interface

mod error;

pub mod batch;
pub mod collision;
pub mod config;
pub mod generator;
pub mod input;
pub mod parse;
pub mod pricing;
pub mod provider;
pub mod providers;
pub mod types;

pub use error::{sanitize_error_message, ImgGenError, Result};

pub use generator::{generate_from_prompt, GenerateOptions, RunPlan, RunReport};
pub use provider::{get_provider, infer_provider_from_model, provider_for, ImageProvider};
pub use types::{
    AspectRatio, GeneratedImage, GenerationOutcome, ImageFormat, ImageRequest, InputFidelity,
    OutcomeStatus, ProviderKind, Quality, Resolution,
};

#[cfg(feature = "google")]
pub use providers::{GoogleProvider, GoogleProviderBuilder};

#[cfg(feature = "openai")]
pub use providers::{OpenAiProvider, OpenAiProviderBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::batch::{BatchDescriptor, ImageGroup};
    pub use crate::config::{ConfigCredentials, CredentialProvider};
    pub use crate::error::{ImgGenError, Result};
    pub use crate::generator::{generate_from_prompt, GenerateOptions};
    pub use crate::provider::ImageProvider;
    pub use crate::types::{GenerationOutcome, ImageRequest, ProviderKind};

    #[cfg(feature = "google")]
    pub use crate::providers::GoogleProvider;

    #[cfg(feature = "openai")]
    pub use crate::providers::OpenAiProvider;
}
