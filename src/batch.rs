//! Batch runs driven by a YAML (or JSON) descriptor.
//!
//! A descriptor lists named image groups. Validation turns the loosely
//! typed file into a [`BatchDescriptor`] with unique names and clamped
//! variation counts. The executor walks groups and variations in order,
//! appends an outcome per variation, and writes the whole descriptor back
//! to `output.yaml` so it can be edited and rerun.

use crate::error::{ImgGenError, Result};
use crate::input::MAX_VARIATIONS;
use crate::provider::ImageProvider;
use crate::types::{AspectRatio, GenerationOutcome, ImageRequest, Resolution};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the persisted results inside the output directory.
pub const OUTPUT_METADATA_FILE: &str = "output.yaml";

/// Variation count used when a group does not give one.
pub const DEFAULT_VARIATIONS: u32 = 4;

const MAX_SLUG_LEN: usize = 30;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "in", "on", "at", "to", "for", "of", "with", "by", "is", "are",
    "be", "no", "not", "that", "this",
];

// Words that tell otherwise similar prompts apart.
const PRIORITY_WORDS: &[&str] = &[
    "female",
    "male",
    "woman",
    "man",
    "girl",
    "boy",
    "women",
    "men",
    "dark",
    "light",
    "bright",
    "digital",
    "oil",
    "watercolor",
];

/// A descriptor as written by a user, before validation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBatch {
    /// Image groups.
    #[serde(default)]
    pub images: Option<Vec<RawImageGroup>>,
    /// Style references applied to every group.
    #[serde(default)]
    pub global_style_references: Vec<String>,
    /// Where images and `output.yaml` go.
    #[serde(default)]
    pub output_folder: Option<String>,
}

/// One image group as written by a user.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawImageGroup {
    /// Optional file name stem.
    #[serde(default)]
    pub name: Option<String>,
    /// Image prompt.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Requested variation count.
    #[serde(default)]
    pub variations: Option<i64>,
    /// Aspect ratio string.
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    /// Resolution string.
    #[serde(default)]
    pub resolution: Option<String>,
    /// Outcomes from earlier runs.
    #[serde(default)]
    pub generated: Vec<GenerationOutcome>,
}

/// A validated batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    /// Groups, in run order. Names are unique.
    pub images: Vec<ImageGroup>,
    /// Style references applied to every group.
    #[serde(default)]
    pub global_style_references: Vec<String>,
    /// Where images and `output.yaml` go.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_folder: Option<String>,
}

/// A validated image group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGroup {
    /// File name stem, unique within the descriptor.
    pub name: String,
    /// Image prompt.
    pub prompt: String,
    /// Variation count, 1 to 4.
    pub variations: u32,
    /// Aspect ratio for every variation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
    /// Resolution for every variation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Outcomes recorded so far.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated: Vec<GenerationOutcome>,
}

impl ImageGroup {
    /// File name of the `index`-th variation.
    pub fn filename(&self, index: u32) -> String {
        format!("{}_{:03}.png", self.name, index)
    }
}

impl BatchDescriptor {
    /// Images the whole batch asks for.
    pub fn total_images(&self) -> u32 {
        self.images.iter().map(|g| g.variations).sum()
    }

    /// Global style references as paths.
    pub fn reference_paths(&self) -> Vec<PathBuf> {
        self.global_style_references
            .iter()
            .map(PathBuf::from)
            .collect()
    }
}

impl From<BatchDescriptor> for RawBatch {
    fn from(d: BatchDescriptor) -> Self {
        RawBatch {
            images: Some(
                d.images
                    .into_iter()
                    .map(|g| RawImageGroup {
                        name: Some(g.name),
                        prompt: Some(g.prompt),
                        variations: Some(i64::from(g.variations)),
                        aspect_ratio: g.aspect_ratio.map(|a| a.to_string()),
                        resolution: g.resolution.map(|r| r.to_string()),
                        generated: g.generated,
                    })
                    .collect(),
            ),
            global_style_references: d.global_style_references,
            output_folder: d.output_folder,
        }
    }
}

/// Builds a short snake_case name from a prompt.
///
/// Distinguishing words (gender, lighting, medium) come first, then up to
/// three other words longer than two letters. Falls back to
/// `image_{index:03}` when nothing usable is left.
pub fn generate_image_slug(prompt: &str, index: usize) -> String {
    let lower = prompt.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_lowercase()))
        .collect();

    let priority: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| PRIORITY_WORDS.contains(w))
        .collect();
    let meaningful: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| !STOP_WORDS.contains(w) && w.len() > 2 && !PRIORITY_WORDS.contains(w))
        .collect();

    let slug_words: Vec<&str> = if !priority.is_empty() {
        priority
            .into_iter()
            .take(2)
            .chain(meaningful.into_iter().take(1))
            .collect()
    } else if !meaningful.is_empty() {
        meaningful.into_iter().take(3).collect()
    } else {
        return format!("image_{:03}", index);
    };

    let mut slug = slug_words.join("_");
    slug.truncate(MAX_SLUG_LEN);
    slug
}

/// Lowercases and drops everything outside `[a-z0-9_-]`.
pub fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect()
}

/// Hands out unique names, suffixing `_2`, `_3`, ... on repeats.
#[derive(Debug, Default)]
struct NameRegistry {
    used: HashSet<String>,
    counters: HashMap<String, u32>,
}

impl NameRegistry {
    fn claim(&mut self, base: String) -> String {
        let name = if self.used.contains(&base) {
            let counter = self.counters.entry(base.clone()).or_insert(1);
            loop {
                *counter += 1;
                let candidate = format!("{}_{}", base, counter);
                if !self.used.contains(&candidate) {
                    break candidate;
                }
            }
        } else {
            base
        };
        self.used.insert(name.clone());
        name
    }
}

/// Validates a raw descriptor and fills in defaults.
///
/// Validating an already validated descriptor returns it unchanged.
pub fn validate(raw: RawBatch) -> Result<BatchDescriptor> {
    let raw_images = raw.images.ok_or_else(|| {
        ImgGenError::Validation(
            "Batch file must contain 'images' key with list of image configs".into(),
        )
    })?;

    let mut names = NameRegistry::default();
    let mut images = Vec::with_capacity(raw_images.len());

    for (i, group) in raw_images.into_iter().enumerate() {
        let prompt = group
            .prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                ImgGenError::Validation(format!("Image {} must have a non-empty 'prompt'", i))
            })?;

        let variations = match group.variations {
            None => DEFAULT_VARIATIONS,
            Some(n) if n < 1 => {
                return Err(ImgGenError::Validation(format!(
                    "Image {} variations must be a positive integer",
                    i
                )))
            }
            Some(n) => n.min(i64::from(MAX_VARIATIONS)) as u32,
        };

        let base = group
            .name
            .as_deref()
            .map(sanitize_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| generate_image_slug(&prompt, i + 1));
        let name = names.claim(base);

        let aspect_ratio = group
            .aspect_ratio
            .as_deref()
            .map(str::parse::<AspectRatio>)
            .transpose()
            .map_err(|e| ImgGenError::Validation(format!("Image {}: {}", i, e)))?;
        let resolution = group
            .resolution
            .as_deref()
            .map(str::parse::<Resolution>)
            .transpose()
            .map_err(|e| ImgGenError::Validation(format!("Image {}: {}", i, e)))?;

        images.push(ImageGroup {
            name,
            prompt,
            variations,
            aspect_ratio,
            resolution,
            generated: group.generated,
        });
    }

    Ok(BatchDescriptor {
        images,
        global_style_references: raw.global_style_references,
        output_folder: raw.output_folder.filter(|f| !f.is_empty()),
    })
}

/// Reads a descriptor file. `.json` files are parsed as JSON, anything
/// else as YAML.
pub fn load_descriptor(path: &Path) -> Result<RawBatch> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ImgGenError::Validation(format!("Batch file '{}' not found", path.display()))
        } else {
            ImgGenError::Io(e)
        }
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(&text)?)
    } else {
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// Writes `descriptor` as YAML, replacing `path` atomically.
pub fn save_descriptor(descriptor: &BatchDescriptor, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    serde_yaml::to_writer(&mut file, descriptor)?;
    file.flush()?;
    file.persist(path).map_err(|e| ImgGenError::Io(e.error))?;
    Ok(())
}

/// `{stem}_output` next to `file`.
pub fn default_output_folder(file: &Path, beside: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "batch".to_string());
    let dir = match beside.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    dir.join(format!("{}_output", stem))
}

/// Output directory for a run: the descriptor's `output_folder`, or
/// `{stem}_output` beside the descriptor file.
pub fn resolve_output_dir(descriptor: &BatchDescriptor, descriptor_path: &Path) -> PathBuf {
    match &descriptor.output_folder {
        Some(folder) => PathBuf::from(folder),
        None => default_output_folder(descriptor_path, descriptor_path),
    }
}

/// One finished variation, as reported to the progress callback.
#[derive(Debug)]
pub struct BatchProgress<'a> {
    /// 1-based position across the whole batch.
    pub position: u32,
    /// Images the batch asks for.
    pub total: u32,
    /// The recorded outcome.
    pub outcome: &'a GenerationOutcome,
}

impl BatchProgress<'_> {
    /// Console line for this variation.
    pub fn line(&self) -> String {
        let status = if self.outcome.is_success() {
            "✓".to_string()
        } else {
            format!("✗ ({})", self.outcome.error_message())
        };
        format!(
            "  [{}/{}] Generating {}... {}",
            self.position, self.total, self.outcome.filename, status
        )
    }
}

/// Totals for a finished batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// Successful outcomes recorded in the descriptor.
    pub successful: usize,
    /// Failed outcomes recorded in the descriptor.
    pub failed: usize,
    /// The run stopped on a rate limit.
    pub rate_limited: bool,
    /// Wait the provider asked for when it rate limited the run.
    pub retry_after: Option<Duration>,
    /// Directory holding the images.
    pub output_dir: PathBuf,
    /// Where the descriptor and results were written.
    pub metadata_path: PathBuf,
}

impl BatchReport {
    /// Summary printed after a run.
    pub fn lines(&self, descriptor: &BatchDescriptor, source: &Path) -> Vec<String> {
        let total = self.successful + self.failed;
        let mut lines = vec![
            String::new(),
            "=".repeat(50),
            "Generation complete!".to_string(),
            format!("  Successful: {}/{}", self.successful, total),
        ];
        if self.failed > 0 {
            lines.push(format!("  Failed: {}/{}", self.failed, total));
        }
        if self.rate_limited {
            lines.push(String::new());
            lines.push("Rate limit exceeded. Partial results saved.".to_string());
            lines.push(format!(
                "You can resume generation by editing {} to remove completed images.",
                source.display()
            ));
            if let Some(wait) = self.retry_after {
                lines.push(format!("Retry after {}s.", wait.as_secs()));
            }
        }

        lines.push(String::new());
        lines.push("Output structure:".to_string());
        lines.push(format!("  {}/", self.output_dir.display()));
        lines.push(format!(
            "    ├── {:<26}(metadata + results)",
            OUTPUT_METADATA_FILE
        ));
        for group in descriptor.images.iter().take(2) {
            lines.push(format!("    ├── {}", group.filename(1)));
            if group.variations > 1 {
                lines.push(format!("    ├── {}", group.filename(2)));
            }
            if group.variations > 2 {
                lines.push("    ├── ...".to_string());
            }
        }
        if descriptor.images.len() > 2 {
            lines.push("    └── ...".to_string());
        } else if let Some(last) = descriptor.images.last() {
            lines.push(format!("    └── {}", last.filename(1)));
        }

        lines.push(String::new());
        lines.push(format!("Metadata saved to: {}", self.metadata_path.display()));
        lines
    }
}

/// Runs every group in order, one variation at a time.
///
/// Each outcome is stamped and appended to its group. A rate-limited
/// outcome ends the whole run. The descriptor, with every outcome recorded
/// so far, is written to `output_dir/output.yaml` however the run ends.
pub async fn run_batch<F>(
    provider: &dyn ImageProvider,
    descriptor: &mut BatchDescriptor,
    output_dir: &Path,
    mut on_progress: F,
) -> Result<BatchReport>
where
    F: FnMut(&BatchProgress<'_>),
{
    tokio::fs::create_dir_all(output_dir).await?;

    let total = descriptor.total_images();
    let references = descriptor.reference_paths();
    let mut position = 0;
    let mut rate_limited = false;
    let mut retry_after = None;

    tracing::info!(
        provider = provider.name(),
        groups = descriptor.images.len(),
        total,
        "starting batch"
    );

    'groups: for group in descriptor.images.iter_mut() {
        let mut request = ImageRequest::new(group.prompt.clone())
            .with_reference_images(references.iter().cloned());
        request.aspect_ratio = group.aspect_ratio;
        request.resolution = group.resolution;

        for index in 1..=group.variations {
            position += 1;
            let filename = group.filename(index);
            let outcome = provider
                .generate_image(&request, output_dir, &filename)
                .await
                .at(Utc::now());

            on_progress(&BatchProgress {
                position,
                total,
                outcome: &outcome,
            });

            let stop = outcome.rate_limited;
            let wait = outcome.retry_after;
            group.generated.push(outcome);

            if stop {
                tracing::warn!(group = %group.name, index, "rate limited, ending batch");
                rate_limited = true;
                retry_after = wait;
                break 'groups;
            }
        }
    }

    let metadata_path = output_dir.join(OUTPUT_METADATA_FILE);
    save_descriptor(descriptor, &metadata_path)?;

    let (successful, failed) = descriptor
        .images
        .iter()
        .flat_map(|g| &g.generated)
        .fold((0, 0), |(ok, bad), o| {
            if o.is_success() {
                (ok + 1, bad)
            } else {
                (ok, bad + 1)
            }
        });

    Ok(BatchReport {
        successful,
        failed,
        rate_limited,
        retry_after,
        output_dir: output_dir.to_path_buf(),
        metadata_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeneratedImage, OutcomeStatus, ProviderKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Succeeds for every file except `rate_limit_on`.
    struct RecordingProvider {
        rate_limit_on: Option<&'static str>,
        calls: Mutex<Vec<(String, ImageRequest)>>,
    }

    impl RecordingProvider {
        fn new(rate_limit_on: Option<&'static str>) -> Self {
            Self {
                rate_limit_on,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn filenames(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(f, _)| f.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ImageProvider for RecordingProvider {
        async fn generate(&self, _request: &ImageRequest) -> Result<GeneratedImage> {
            Ok(GeneratedImage::new(b"png".to_vec(), ProviderKind::Google, "m"))
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::Google
        }

        fn generate_model(&self) -> &str {
            "recording"
        }

        async fn generate_image(
            &self,
            request: &ImageRequest,
            output_dir: &Path,
            filename: &str,
        ) -> GenerationOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((filename.to_string(), request.clone()));
            if self.rate_limit_on == Some(filename) {
                return GenerationOutcome {
                    retry_after: Some(Duration::from_secs(60)),
                    ..GenerationOutcome::rate_limited(filename)
                };
            }
            std::fs::write(output_dir.join(filename), b"png").unwrap();
            GenerationOutcome::success(filename)
        }
    }

    fn group(name: &str, variations: i64) -> RawImageGroup {
        RawImageGroup {
            name: Some(name.to_string()),
            prompt: Some(format!("prompt for {name}")),
            variations: Some(variations),
            ..Default::default()
        }
    }

    fn raw(groups: Vec<RawImageGroup>) -> RawBatch {
        RawBatch {
            images: Some(groups),
            ..Default::default()
        }
    }

    #[test]
    fn test_slug_from_meaningful_words() {
        assert_eq!(
            generate_image_slug("A mountain sunset with dramatic clouds", 1),
            "mountain_sunset_dramatic"
        );
        assert_eq!(generate_image_slug("Mountain sunset", 1), "mountain_sunset");
    }

    #[test]
    fn test_slug_priority_words_first() {
        assert_eq!(
            generate_image_slug("Portrait of a woman in oil paint", 1),
            "woman_oil_portrait"
        );
        assert_eq!(generate_image_slug("A dark forest at night", 1), "dark_forest");
    }

    #[test]
    fn test_slug_fallback_and_length() {
        assert_eq!(generate_image_slug("a an the", 7), "image_007");
        assert_eq!(generate_image_slug("", 12), "image_012");

        let slug = generate_image_slug("extraordinarily magnificent constellations", 1);
        assert_eq!(slug, "extraordinarily_magnificent_co");
        assert_eq!(slug.len(), 30);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("My Hero-Shot #1!"), "myhero-shot1");
        assert_eq!(sanitize_name("***"), "");
    }

    #[test]
    fn test_duplicate_slugs_are_suffixed() {
        let batch = raw(vec![
            RawImageGroup {
                prompt: Some("mountain sunset".into()),
                ..Default::default()
            },
            RawImageGroup {
                prompt: Some("Mountain sunset!".into()),
                ..Default::default()
            },
        ]);

        let validated = validate(batch).unwrap();
        assert_eq!(validated.images[0].name, "mountain_sunset");
        assert_eq!(validated.images[1].name, "mountain_sunset_2");
    }

    #[test]
    fn test_suffix_skips_user_supplied_names() {
        let batch = raw(vec![
            group("hero", 1),
            group("hero_2", 1),
            group("hero", 1),
        ]);

        let names: Vec<String> = validate(batch)
            .unwrap()
            .images
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(names, vec!["hero", "hero_2", "hero_3"]);
    }

    #[test]
    fn test_variation_defaults_and_clamping() {
        let mut no_count = group("a", 1);
        no_count.variations = None;
        let batch = raw(vec![no_count, group("b", 9), group("c", 2)]);

        let validated = validate(batch).unwrap();
        let counts: Vec<u32> = validated.images.iter().map(|g| g.variations).collect();
        assert_eq!(counts, vec![4, 4, 2]);
        assert_eq!(validated.total_images(), 10);
    }

    #[test]
    fn test_validation_errors() {
        let err = validate(RawBatch::default()).unwrap_err();
        assert!(err.to_string().contains("'images'"));

        let err = validate(raw(vec![group("a", 0)])).unwrap_err();
        assert!(err.to_string().contains("positive integer"));

        let mut no_prompt = group("a", 1);
        no_prompt.prompt = Some("   ".into());
        let err = validate(raw(vec![no_prompt])).unwrap_err();
        assert!(err.to_string().contains("non-empty 'prompt'"));

        let mut bad_ratio = group("a", 1);
        bad_ratio.aspect_ratio = Some("21:9".into());
        let err = validate(raw(vec![bad_ratio])).unwrap_err();
        assert!(err.to_string().contains("aspect_ratio"));

        let mut bad_res = group("a", 1);
        bad_res.resolution = Some("8K".into());
        assert!(validate(raw(vec![bad_res])).is_err());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let yaml = r#"
images:
  - prompt: mountain sunset
    variations: 7
    aspect_ratio: "16:9"
  - prompt: mountain sunset
  - name: "Custom Name!"
    prompt: a dark forest
    resolution: 4K
global_style_references:
  - style.png
"#;
        let once = validate(serde_yaml::from_str(yaml).unwrap()).unwrap();
        let twice = validate(once.clone().into()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.images[2].name, "customname");
        assert_eq!(once.images[0].aspect_ratio, Some(AspectRatio::Landscape));
    }

    #[test]
    fn test_load_json_and_yaml() {
        let temp = tempfile::tempdir().unwrap();

        let json_path = temp.path().join("batch.json");
        std::fs::write(&json_path, r#"{"images": [{"prompt": "a cat", "variations": 1}]}"#)
            .unwrap();
        let yaml_path = temp.path().join("batch.yaml");
        std::fs::write(&yaml_path, "images:\n  - prompt: a cat\n    variations: 1\n").unwrap();

        let from_json = validate(load_descriptor(&json_path).unwrap()).unwrap();
        let from_yaml = validate(load_descriptor(&yaml_path).unwrap()).unwrap();
        assert_eq!(from_json, from_yaml);

        let err = load_descriptor(&temp.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_output_dir_resolution() {
        let descriptor = validate(raw(vec![group("a", 1)])).unwrap();
        assert_eq!(
            resolve_output_dir(&descriptor, Path::new("jobs/batch.yaml")),
            PathBuf::from("jobs/batch_output")
        );
        assert_eq!(
            resolve_output_dir(&descriptor, Path::new("batch.yaml")),
            PathBuf::from("./batch_output")
        );

        let with_folder = BatchDescriptor {
            output_folder: Some("/tmp/renders".into()),
            ..descriptor
        };
        assert_eq!(
            resolve_output_dir(&with_folder, Path::new("jobs/batch.yaml")),
            PathBuf::from("/tmp/renders")
        );
    }

    #[tokio::test]
    async fn test_rate_limit_ends_batch_and_persists() {
        let temp = tempfile::tempdir().unwrap();
        let mut descriptor =
            validate(raw(vec![group("a", 2), group("b", 3), group("c", 1)])).unwrap();
        let provider = RecordingProvider::new(Some("b_002.png"));
        let mut lines = Vec::new();

        let report = run_batch(&provider, &mut descriptor, temp.path(), |p| {
            lines.push(p.line())
        })
        .await
        .unwrap();

        assert!(report.rate_limited);
        assert_eq!(report.retry_after, Some(Duration::from_secs(60)));
        assert_eq!(report.successful, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(
            provider.filenames(),
            vec!["a_001.png", "a_002.png", "b_001.png", "b_002.png"]
        );

        let statuses = |g: &ImageGroup| g.generated.iter().map(|o| o.status).collect::<Vec<_>>();
        assert_eq!(
            statuses(&descriptor.images[0]),
            vec![OutcomeStatus::Success, OutcomeStatus::Success]
        );
        assert_eq!(
            statuses(&descriptor.images[1]),
            vec![OutcomeStatus::Success, OutcomeStatus::Failed]
        );
        assert!(descriptor.images[2].generated.is_empty());
        assert!(descriptor.images[1].generated[1].timestamp.is_some());

        assert_eq!(lines[3], "  [4/6] Generating b_002.png... ✗ (Rate limit exceeded)");

        let persisted = validate(load_descriptor(&report.metadata_path).unwrap()).unwrap();
        let recorded: Vec<usize> = persisted.images.iter().map(|g| g.generated.len()).collect();
        assert_eq!(recorded, vec![2, 2, 0]);
        assert_eq!(statuses(&persisted.images[1]), statuses(&descriptor.images[1]));
        assert_eq!(
            persisted.images[1].generated[1].error.as_deref(),
            Some("Rate limit exceeded")
        );
    }

    #[tokio::test]
    async fn test_batch_passes_group_settings_and_style_references() {
        let temp = tempfile::tempdir().unwrap();
        let mut g = group("wide", 1);
        g.aspect_ratio = Some("16:9".into());
        g.resolution = Some("1K".into());
        let mut descriptor = validate(RawBatch {
            images: Some(vec![g]),
            global_style_references: vec!["style.png".into()],
            output_folder: None,
        })
        .unwrap();
        let provider = RecordingProvider::new(None);

        let report = run_batch(&provider, &mut descriptor, temp.path(), |_| {})
            .await
            .unwrap();

        assert!(!report.rate_limited);
        assert_eq!(report.successful, 1);
        let calls = provider.calls.lock().unwrap();
        let request = &calls[0].1;
        assert_eq!(request.prompt, "prompt for wide");
        assert_eq!(request.aspect_ratio, Some(AspectRatio::Landscape));
        assert_eq!(request.resolution, Some(Resolution::OneK));
        assert_eq!(request.reference_images, vec![PathBuf::from("style.png")]);
        assert!(temp.path().join("wide_001.png").exists());
    }

    #[tokio::test]
    async fn test_failures_are_recorded_and_persisted() {
        struct AlwaysFails;

        #[async_trait]
        impl ImageProvider for AlwaysFails {
            async fn generate(&self, _request: &ImageRequest) -> Result<GeneratedImage> {
                Err(ImgGenError::NoImageData)
            }

            fn kind(&self) -> ProviderKind {
                ProviderKind::OpenAI
            }

            fn generate_model(&self) -> &str {
                "fails"
            }
        }

        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("nested").join("out");
        let mut descriptor = validate(raw(vec![group("a", 2), group("b", 1)])).unwrap();

        let report = run_batch(&AlwaysFails, &mut descriptor, &out, |_| {})
            .await
            .unwrap();

        // ordinary failures never stop the run
        assert!(!report.rate_limited);
        assert_eq!(report.successful, 0);
        assert_eq!(report.failed, 3);
        assert!(out.join(OUTPUT_METADATA_FILE).exists());

        let lines = report.lines(&descriptor, Path::new("batch.yaml"));
        assert!(lines.contains(&"  Failed: 3/3".to_string()));
        assert!(!lines.iter().any(|l| l.contains("resume")));
    }

    #[test]
    fn test_summary_resume_hint() {
        let descriptor = validate(raw(vec![group("a", 3)])).unwrap();
        let report = BatchReport {
            successful: 1,
            failed: 1,
            rate_limited: true,
            retry_after: Some(Duration::from_secs(120)),
            output_dir: PathBuf::from("out"),
            metadata_path: PathBuf::from("out/output.yaml"),
        };

        let lines = report.lines(&descriptor, Path::new("batch.yaml"));
        assert!(lines.contains(&"Rate limit exceeded. Partial results saved.".to_string()));
        assert!(lines.contains(
            &"You can resume generation by editing batch.yaml to remove completed images."
                .to_string()
        ));
        assert!(lines.contains(&"Retry after 120s.".to_string()));
        assert!(lines.contains(&"    ├── a_002.png".to_string()));
        assert_eq!(lines.last().unwrap(), "Metadata saved to: out/output.yaml");
    }
}
