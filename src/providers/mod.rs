//! Provider implementations.

#[cfg(feature = "google")]
mod google;
#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "google")]
pub use google::{GoogleProvider, GoogleProviderBuilder, GOOGLE_DEFAULT_MODEL};
#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderBuilder, OPENAI_DEFAULT_MODEL};
