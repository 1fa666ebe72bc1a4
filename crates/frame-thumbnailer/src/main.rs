use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use frame_thumbnailer::{
    config::Config,
    models::{MediaKind, ThumbnailRequest},
    renderer::FfmpegBackend,
    services::{ConcurrencyGate, ThumbnailService, ThumbnailStore},
};

#[derive(Parser)]
#[command(name = "frame-thumbnailer")]
#[command(version)]
#[command(about = "Extract a representative thumbnail from video and other streamable media")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path (defaults to $FRAME_THUMBNAILER_CONFIG, then config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a thumbnail and write it to a file
    Generate {
        /// Local path or remote URL of the media
        source: String,

        /// Target width in pixels; height follows the source aspect ratio
        #[arg(short, long)]
        width: u32,

        /// Where to write the encoded image
        #[arg(short, long)]
        output: PathBuf,

        /// Request header for remote sources, as "Name: Value" (repeatable)
        #[arg(long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,

        /// Media item id, used as the memory cache identity
        #[arg(long)]
        id: Option<String>,

        /// Media type (video, audio, animated-image); guessed from the extension if omitted
        #[arg(long)]
        kind: Option<MediaKind>,
    },

    /// Remove every cached thumbnail
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_filter = format!("frame_thumbnailer={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };

    let store = Arc::new(
        ThumbnailStore::new(&config.cache)
            .await
            .context("Failed to open thumbnail cache")?,
    );

    match cli.command {
        Command::Generate {
            source,
            width,
            output,
            headers,
            id,
            kind,
        } => {
            let mut request = ThumbnailRequest::parse(&source, width)?;
            for header in &headers {
                let (name, value) = parse_header(header)?;
                request = request.with_header(name, value);
            }
            if let Some(id) = id {
                request = request.with_media_id(id);
            }
            if let Some(kind) = kind {
                request = request.with_kind(kind);
            }

            let backend = Arc::new(FfmpegBackend::new(&config.render));
            let gate = ConcurrencyGate::new(config.render.max_concurrent_renders);
            let service = ThumbnailService::new(&config, backend, gate, store);

            let thumbnail = tokio::select! {
                thumbnail = service.generate(request) => thumbnail,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, abandoning thumbnail generation");
                    service.shutdown();
                    None
                }
            };

            match thumbnail {
                Some(thumbnail) => {
                    tokio::fs::write(&output, &thumbnail.bytes)
                        .await
                        .with_context(|| format!("Failed to write {}", output.display()))?;
                    info!(
                        "Wrote {}x{} {} thumbnail ({} bytes) to {}",
                        thumbnail.width,
                        thumbnail.height,
                        thumbnail.format,
                        thumbnail.len(),
                        output.display()
                    );
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    error!("No thumbnail produced for {}", source);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::ClearCache => {
            let removed = store.clear_all().await?;
            info!("Removed {} cached thumbnails", removed);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_header(header: &str) -> Result<(String, String)> {
    let (name, value) = header
        .split_once(':')
        .ok_or_else(|| anyhow!("Header {:?} is not in \"Name: Value\" form", header))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}
