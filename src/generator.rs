//! Single-prompt generation: N variations fanned out over a bounded pool.
//!
//! A run moves through estimate, optional dry-run exit, dispatch, collect,
//! and summary. Outcomes are keyed by variation index so the summary is
//! printed in index order regardless of completion order.

use crate::collision::{check_collisions, sequential_filename};
use crate::error::{ImgGenError, Result};
use crate::input::validate_variations;
use crate::pricing::{calculate_image_cost, format_cost};
use crate::provider::ImageProvider;
use crate::types::{
    AspectRatio, GenerationOutcome, ImageRequest, InputFidelity, ProviderKind, Quality,
    Resolution,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Upper bound on concurrent remote calls in one run.
pub const MAX_CONCURRENCY: u32 = 4;

const RULE_WIDTH: usize = 50;

/// Everything needed to run one prompt.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Image prompt.
    pub prompt: String,
    /// Reference images, sent in order with every variation.
    pub reference_images: Vec<PathBuf>,
    /// Directory receiving `imggen_NNN.png` files.
    pub output_dir: PathBuf,
    /// Number of variations, 1 to 4.
    pub variations: u32,
    /// Aspect ratio of every variation.
    pub aspect_ratio: Option<AspectRatio>,
    /// OpenAI quality.
    pub quality: Option<Quality>,
    /// Google resolution.
    pub resolution: Option<Resolution>,
    /// Model override.
    pub model: Option<String>,
    /// OpenAI reference adherence.
    pub input_fidelity: Option<InputFidelity>,
    /// Stop after the cost estimate.
    pub dry_run: bool,
}

impl GenerateOptions {
    /// One variation into the current directory.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference_images: Vec::new(),
            output_dir: PathBuf::from("."),
            variations: 1,
            aspect_ratio: None,
            quality: None,
            resolution: None,
            model: None,
            input_fidelity: None,
            dry_run: false,
        }
    }

    /// The request sent for every variation.
    pub fn request(&self) -> ImageRequest {
        ImageRequest {
            prompt: self.prompt.clone(),
            aspect_ratio: self.aspect_ratio,
            resolution: self.resolution,
            quality: self.quality,
            reference_images: self.reference_images.clone(),
            model: self.model.clone(),
            input_fidelity: self.input_fidelity,
        }
    }
}

/// Picks the provider for a run.
///
/// A model override wins over the requested provider, so that
/// `--model gemini-...` does not get sent to OpenAI.
pub fn resolve_provider_kind(
    requested: Option<ProviderKind>,
    model: Option<&str>,
    fallback: ProviderKind,
) -> ProviderKind {
    match model {
        Some(model) => crate::provider::infer_provider_from_model(model),
        None => requested.unwrap_or(fallback),
    }
}

/// Checks that run before anything is dispatched or charged.
pub fn preflight(opts: &GenerateOptions) -> Result<()> {
    validate_variations(opts.variations)?;

    let (has_collision, files) = check_collisions(&opts.output_dir, opts.variations);
    if has_collision {
        return Err(ImgGenError::Collision {
            output_dir: opts.output_dir.clone(),
            files,
        });
    }
    Ok(())
}

/// Cost estimate and configuration echo, computed before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    /// Provider the run goes to.
    pub provider: ProviderKind,
    /// Model shown to the user.
    pub model: String,
    /// Price of one successful image.
    pub cost_per_image: f64,
    /// `cost_per_image` times the variation count.
    pub estimated_cost: f64,
}

impl RunPlan {
    /// Estimates the run without touching the network or disk.
    pub fn new(provider: &dyn ImageProvider, opts: &GenerateOptions) -> Self {
        let kind = provider.kind();
        let cost_per_image = calculate_image_cost(kind, opts.quality, opts.resolution);
        Self {
            provider: kind,
            model: opts
                .model
                .clone()
                .unwrap_or_else(|| provider.generate_model().to_string()),
            cost_per_image,
            estimated_cost: cost_per_image * opts.variations as f64,
        }
    }

    /// Header printed before generation starts.
    pub fn lines(&self, opts: &GenerateOptions) -> Vec<String> {
        let n = opts.variations;
        let dir = opts.output_dir.display();
        let mut lines = vec![
            format!(
                "Generating {} image{} with {} ({})",
                n,
                if n > 1 { "s" } else { "" },
                self.provider.display_name(),
                self.model
            ),
            String::new(),
            "Configuration:".to_string(),
            format!("  Prompt: \"{}\"", opts.prompt),
        ];
        if let Some(quality) = opts.quality {
            lines.push(format!("  Quality: {}", quality));
        }
        if let Some(resolution) = opts.resolution {
            lines.push(format!("  Resolution: {}", resolution));
        }
        if let Some(ratio) = opts.aspect_ratio {
            lines.push(format!("  Aspect ratio: {}", ratio));
        }
        if let Some(fidelity) = opts.input_fidelity {
            lines.push(format!("  Input fidelity: {}", fidelity));
        }
        if !opts.reference_images.is_empty() {
            let refs: Vec<String> = opts
                .reference_images
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            lines.push(format!("  Reference images: {}", refs.join(", ")));
        }
        lines.push(format!("  Variations: {}", n));
        lines.push(format!(
            "  Output: {}/{} ... {}/{}",
            dir,
            sequential_filename(1),
            dir,
            sequential_filename(n)
        ));
        lines.push(String::new());
        lines.push(format!("Estimated cost: {}", format_cost(self.estimated_cost)));
        lines
    }
}

/// What happened in one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The estimate the run started from.
    pub plan: RunPlan,
    /// Requested variation count.
    pub variations: u32,
    /// Collected outcomes keyed by 1-based variation index.
    pub outcomes: BTreeMap<u32, GenerationOutcome>,
    /// A variation reported quota exhaustion and the run stopped early.
    pub rate_limited: bool,
    /// The run ended after estimation.
    pub dry_run: bool,
    /// Where images were written.
    pub output_dir: PathBuf,
}

impl RunReport {
    /// Number of images written.
    pub fn successful(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    /// Number of collected failures.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.successful()
    }

    /// Only successful images are charged.
    pub fn actual_cost(&self) -> f64 {
        self.plan.cost_per_image * self.successful() as f64
    }

    /// Longest wait the provider asked for before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        self.outcomes.values().filter_map(|o| o.retry_after).max()
    }

    /// One line per collected variation, in index order.
    pub fn progress_lines(&self) -> Vec<String> {
        (1..=self.variations)
            .filter_map(|i| self.outcomes.get(&i).map(|o| (i, o)))
            .map(|(i, outcome)| {
                let mark = if outcome.is_success() { "✓" } else { "✗" };
                format!(
                    "  [{}/{}] Generating {}... {}",
                    i, self.variations, outcome.filename, mark
                )
            })
            .collect()
    }

    /// Everything printed after the plan header.
    pub fn lines(&self) -> Vec<String> {
        if self.dry_run {
            return vec![
                String::new(),
                "Run without --dry-run to generate images.".to_string(),
            ];
        }

        let successful = self.successful();
        let failed = self.failed();
        let total = successful + failed;

        let mut lines = vec![String::new()];
        lines.extend(self.progress_lines());
        lines.push(String::new());
        lines.push("=".repeat(RULE_WIDTH));
        lines.push("Generation complete!".to_string());
        lines.push(format!("  Successful: {}/{}", successful, total));
        if failed > 0 {
            lines.push(format!("  Failed: {}/{}", failed, total));
            lines.push(String::new());
            lines.push("Errors:".to_string());
            for outcome in self.outcomes.values().filter(|o| !o.is_success()) {
                lines.push(format!("  - {}: {}", outcome.filename, outcome.error_message()));
            }
        }
        if self.rate_limited {
            lines.push(String::new());
            lines.push(format!(
                "Rate limit exceeded. Stopped after {} of {} variations; try again later.",
                total, self.variations
            ));
            if let Some(wait) = self.retry_after() {
                lines.push(format!("Retry after {}s.", wait.as_secs()));
            }
        }
        lines.push(String::new());
        lines.push(format!("Actual cost: {}", format_cost(self.actual_cost())));
        lines.push(format!("Output directory: {}", self.output_dir.display()));
        lines
    }
}

/// Runs one prompt end to end.
///
/// Fails only on pre-flight problems (bad variation count, collision, an
/// uncreatable output directory). Per-variation failures are reported in
/// the returned [`RunReport`].
pub async fn generate_from_prompt(
    provider: Arc<dyn ImageProvider>,
    opts: &GenerateOptions,
) -> Result<RunReport> {
    preflight(opts)?;

    let plan = RunPlan::new(provider.as_ref(), opts);
    let mut report = RunReport {
        plan,
        variations: opts.variations,
        outcomes: BTreeMap::new(),
        rate_limited: false,
        dry_run: opts.dry_run,
        output_dir: opts.output_dir.clone(),
    };

    if opts.dry_run {
        return Ok(report);
    }

    tokio::fs::create_dir_all(&opts.output_dir).await?;

    tracing::info!(
        provider = provider.name(),
        variations = opts.variations,
        output_dir = %opts.output_dir.display(),
        "dispatching generation"
    );

    let permits = opts.variations.min(MAX_CONCURRENCY) as usize;
    let semaphore = Arc::new(Semaphore::new(permits));
    let request = Arc::new(opts.request());
    let mut tasks = JoinSet::new();

    for index in 1..=opts.variations {
        let sem = Arc::clone(&semaphore);
        let provider = Arc::clone(&provider);
        let request = Arc::clone(&request);
        let output_dir = opts.output_dir.clone();

        tasks.spawn(async move {
            // closed once the run stops; tasks still waiting never call out
            let _permit = sem.acquire_owned().await.ok()?;
            let filename = sequential_filename(index);
            let outcome = provider
                .generate_image(&request, &output_dir, &filename)
                .await;
            Some((index, outcome))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (index, outcome) = match joined {
            Ok(Some(result)) => result,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!("generation task failed: {e}");
                continue;
            }
        };

        let stop = outcome.rate_limited;
        report.outcomes.insert(index, outcome);

        if stop {
            tracing::warn!(index, "rate limited, stopping run");
            report.rate_limited = true;
            semaphore.close();
            // in-flight calls finish on their own; their results are dropped
            tasks.detach_all();
            break;
        }
    }

    tracing::info!(
        successful = report.successful(),
        failed = report.failed(),
        "generation finished"
    );

    Ok(report)
}
