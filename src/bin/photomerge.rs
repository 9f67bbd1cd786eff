//! CLI for photomerge - composite a portrait into a background with Gemini.

use clap::{Args, Parser, Subcommand};
use photomerge::{
    GeminiModel, GeminiProvider, ImageFile, MergeAttempt, MergeError, MergeProvider,
    SessionController, SlotKind, DEFAULT_DOWNLOAD_NAME,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "photomerge")]
#[command(about = "Place the person from a portrait photo into a background scene via Gemini")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a portrait into a background
    Merge(MergeArgs),

    /// Check the API key and that the model is reachable
    Check(CheckArgs),
}

#[derive(Args)]
struct MergeArgs {
    /// Photo of the person to extract
    #[arg(short, long)]
    portrait: PathBuf,

    /// Scene to place the person into
    #[arg(short, long)]
    background: PathBuf,

    /// Output file or directory
    #[arg(short, long, default_value = DEFAULT_DOWNLOAD_NAME)]
    output: PathBuf,

    /// Media type of the portrait, when the extension does not say
    #[arg(long)]
    portrait_type: Option<String>,

    /// Media type of the background, when the extension does not say
    #[arg(long)]
    background_type: Option<String>,

    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Args)]
struct CheckArgs {
    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Args)]
struct ProviderArgs {
    /// Gemini model id (defaults to gemini-2.5-flash-image)
    #[arg(long, env = "PHOTOMERGE_MODEL")]
    model: Option<String>,
}

impl ProviderArgs {
    /// Builds the provider, exiting with remediation text when no key is set.
    fn build(&self) -> anyhow::Result<GeminiProvider> {
        let mut builder = GeminiProvider::builder();
        if let Some(ref model) = self.model {
            builder = builder.model(GeminiModel::from_id(model));
        }

        match builder.build() {
            Ok(provider) => Ok(provider),
            Err(e) if e.is_fatal() => exit_with_remediation(&e),
            Err(e) => Err(e.into()),
        }
    }
}

fn exit_with_remediation(err: &MergeError) -> ! {
    eprintln!("error: {err}");
    if let Some(help) = err.remediation() {
        eprintln!();
        eprintln!("{help}");
    }
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Merge(args) => {
            merge(args, cli.json).await?;
        }
        Commands::Check(args) => {
            check(args, cli.json).await?;
        }
    }

    Ok(())
}

fn image_file(path: PathBuf, content_type: Option<String>) -> ImageFile {
    let file = ImageFile::from_path(path);
    match content_type {
        Some(ct) => file.with_content_type(ct),
        None => file,
    }
}

async fn merge(args: MergeArgs, json_output: bool) -> anyhow::Result<()> {
    let provider = args.provider.build()?;
    let model = provider.model().as_str().to_string();
    let session = SessionController::new(provider);

    session.select_image(
        SlotKind::Portrait,
        Some(image_file(args.portrait, args.portrait_type)),
    );
    session.select_image(
        SlotKind::Background,
        Some(image_file(args.background, args.background_type)),
    );

    if !json_output {
        eprintln!("Merging images with {model}...");
    }

    let started = std::time::Instant::now();
    let image = match session.request_merge().await {
        MergeAttempt::Succeeded(image) => image,
        MergeAttempt::Failed(message) => anyhow::bail!(message),
        MergeAttempt::Rejected(reason) => anyhow::bail!(reason.to_string()),
        MergeAttempt::Discarded => anyhow::bail!("merge result was discarded"),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    let Some(saved) = session.download_result(&args.output).await? else {
        anyhow::bail!("no merge result to save");
    };

    if json_output {
        let result = serde_json::json!({
            "success": true,
            "output": saved.display().to_string(),
            "media_type": image.media_type,
            "size_bytes": image.size(),
            "model": model,
            "duration_ms": duration_ms,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Merged image: {} ({} bytes, {})",
            saved.display(),
            image.size(),
            image.media_type
        );
        println!("Duration: {}ms", duration_ms);
    }

    Ok(())
}

async fn check(args: CheckArgs, json_output: bool) -> anyhow::Result<()> {
    let provider = args.provider.build()?;
    let outcome = provider.health_check().await;

    if json_output {
        let result = serde_json::json!({
            "provider": provider.kind().to_string(),
            "model": provider.model().as_str(),
            "ok": outcome.is_ok(),
            "error": outcome.as_ref().err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if outcome.is_ok() {
        println!(
            "✓ {} is reachable with model {}",
            provider.name(),
            provider.model().as_str()
        );
    }

    if let Err(e) = outcome {
        if let Some(help) = e.remediation() {
            eprintln!("{help}");
        }
        return Err(e.into());
    }
    Ok(())
}
