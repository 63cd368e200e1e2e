//! CLI for imggen - batch image generation.

use clap::{Args, Parser, Subcommand, ValueEnum};
use imggen::batch::{load_descriptor, resolve_output_dir, run_batch, validate};
use imggen::collision::format_collision_error;
use imggen::config::{run_setup, ConfigCredentials, ConfigStore, CredentialProvider};
use imggen::generator::{preflight, resolve_provider_kind};
use imggen::input::{load_prompt, load_references};
use imggen::parse::{parse_prompts, PromptParser, QUOTA_GUIDANCE};
use imggen::provider::{available_models, default_model};
use imggen::{
    generate_from_prompt, provider_for, AspectRatio, GenerateOptions, ImgGenError, InputFidelity,
    ProviderKind, Quality, Resolution, RunPlan,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imggen")]
#[command(about = "Generate images with Google Gemini or OpenAI, one prompt or a whole batch")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    generate: GenerateArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// List available models grouped by provider
    ListModels,

    /// Run a batch descriptor (YAML or JSON)
    Batch(BatchArgs),

    /// Turn a natural-language request into a batch descriptor
    Parse(ParseArgs),

    /// Store API keys interactively
    Setup,
}

#[derive(Args)]
struct GenerateArgs {
    /// The text prompt describing the image
    #[arg(short, long, conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the prompt from a file
    #[arg(short = 'f', long)]
    prompt_file: Option<PathBuf>,

    /// Reference images, sent in order
    #[arg(conflicts_with = "references_file")]
    references: Vec<PathBuf>,

    /// File listing reference images, one per line
    #[arg(long)]
    references_file: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Provider to use (defaults to the configured provider)
    #[arg(long, value_enum)]
    provider: Option<ProviderArg>,

    /// Model override; also selects the provider
    #[arg(long)]
    model: Option<String>,

    /// Aspect ratio (1:1, 16:9, 9:16, 4:3, 3:4)
    #[arg(long)]
    aspect_ratio: Option<AspectRatio>,

    /// Quality for OpenAI (low, medium, high)
    #[arg(long)]
    quality: Option<Quality>,

    /// Resolution for Google (1K, 2K, 4K)
    #[arg(long)]
    resolution: Option<Resolution>,

    /// Number of variations (1-4)
    #[arg(short = 'n', long, default_value_t = 1)]
    variations: u32,

    /// How closely OpenAI edits follow the references (high, low)
    #[arg(long)]
    input_fidelity: Option<InputFidelity>,

    /// Show the cost estimate without generating
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct BatchArgs {
    /// Batch descriptor file
    file: PathBuf,

    /// Provider to use (defaults to the configured provider)
    #[arg(long, value_enum)]
    provider: Option<ProviderArg>,
}

#[derive(Args)]
struct ParseArgs {
    /// Text file with the request
    input: PathBuf,

    /// Where to write the batch descriptor
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Google,
    Openai,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Google => ProviderKind::Google,
            ProviderArg::Openai => ProviderKind::OpenAI,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::ListModels) => {
            list_models();
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Batch(args)) => batch(args).await,
        Some(Commands::Parse(args)) => parse(args).await,
        Some(Commands::Setup) => setup(),
        None => generate(cli.generate).await,
    }
}

fn credentials() -> anyhow::Result<(ConfigCredentials, ProviderKind)> {
    let store = ConfigStore::locate()?;
    let default_provider = store.load().default_provider();
    Ok((ConfigCredentials::new(store), default_provider))
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

async fn generate(args: GenerateArgs) -> anyhow::Result<ExitCode> {
    let prompt = load_prompt(args.prompt.as_deref(), args.prompt_file.as_deref())?;
    let reference_images = load_references(&args.references, args.references_file.as_deref())?;

    let opts = GenerateOptions {
        prompt,
        reference_images,
        output_dir: args.output,
        variations: args.variations,
        aspect_ratio: args.aspect_ratio,
        quality: args.quality,
        resolution: args.resolution,
        model: args.model,
        input_fidelity: args.input_fidelity,
        dry_run: args.dry_run,
    };

    // before any key prompt or remote call
    match preflight(&opts) {
        Ok(()) => {}
        Err(ImgGenError::Collision { output_dir, files }) => {
            eprintln!("{}", format_collision_error(&files, &output_dir));
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    }

    let (creds, default_provider) = credentials()?;
    let kind = resolve_provider_kind(
        args.provider.map(Into::into),
        opts.model.as_deref(),
        default_provider,
    );
    let provider = provider_for(kind, creds.api_key_for_provider(kind)?)?;

    print_lines(&RunPlan::new(provider.as_ref(), &opts).lines(&opts));

    let report = generate_from_prompt(provider, &opts).await?;
    print_lines(&report.lines());

    Ok(ExitCode::SUCCESS)
}

async fn batch(args: BatchArgs) -> anyhow::Result<ExitCode> {
    let mut descriptor = validate(load_descriptor(&args.file)?)?;
    let output_dir = resolve_output_dir(&descriptor, &args.file);

    let (creds, default_provider) = credentials()?;
    let kind = args.provider.map(Into::into).unwrap_or(default_provider);
    let provider = provider_for(kind, creds.api_key_for_provider(kind)?)?;

    println!(
        "Generating {} images from {} prompts...",
        descriptor.total_images(),
        descriptor.images.len()
    );

    let report = run_batch(provider.as_ref(), &mut descriptor, &output_dir, |progress| {
        println!("{}", progress.line())
    })
    .await?;

    print_lines(&report.lines(&descriptor, &args.file));
    Ok(ExitCode::SUCCESS)
}

async fn parse(args: ParseArgs) -> anyhow::Result<ExitCode> {
    let (creds, _) = credentials()?;
    let parser = PromptParser::new(creds.api_key_for_provider(ProviderKind::Google)?);

    println!("Parsing {}...", args.input.display());

    match parse_prompts(&parser, &args.input, &args.output).await {
        Ok(summary) => {
            print_lines(&summary.lines());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_rate_limited() => {
            for line in QUOTA_GUIDANCE {
                eprintln!("{}", line);
            }
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

fn setup() -> anyhow::Result<ExitCode> {
    let store = ConfigStore::locate()?;
    let stdin = std::io::stdin();

    match run_setup(&store, &mut stdin.lock(), &mut std::io::stdout()) {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(ImgGenError::Validation(msg)) => {
            eprintln!("Error: {}", msg);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

fn list_models() {
    println!("Available image generation models:");
    for (kind, models) in available_models() {
        println!("\n{}:", kind.display_name());
        for model in models.iter() {
            if *model == default_model(*kind) {
                println!("  - {} (default)", model);
            } else {
                println!("  - {}", model);
            }
        }
    }
}
