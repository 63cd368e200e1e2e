//! Per-image price table.
//!
//! Prices are USD list prices per generated image. Failed generations are
//! never charged here, even though a vendor may bill some of them.

use crate::types::{ProviderKind, Quality, Resolution};

/// Returns the price of one image for the given settings.
///
/// OpenAI prices by quality (unset means low) and ignores resolution.
/// Google prices by resolution (unset means 2K) and ignores quality.
pub fn calculate_image_cost(
    provider: ProviderKind,
    quality: Option<Quality>,
    resolution: Option<Resolution>,
) -> f64 {
    match provider {
        ProviderKind::OpenAI => match quality.unwrap_or(Quality::Low) {
            Quality::Low => 0.009,
            Quality::Medium => 0.034,
            Quality::High => 0.133,
        },
        ProviderKind::Google => match resolution.unwrap_or(Resolution::TwoK) {
            Resolution::OneK | Resolution::TwoK => 0.134,
            Resolution::FourK => 0.24,
        },
    }
}

/// Formats a dollar amount the way summaries print it.
pub fn format_cost(amount: f64) -> String {
    format!("${:.2}", amount)
}
