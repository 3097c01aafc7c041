use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use image_host_uploader::config::{self, Config};
use image_host_uploader::{ImageDownloader, ImageUploader, UploadResult};

#[derive(Parser)]
#[command(name = "image-host-uploader")]
#[command(about = "Upload screenshots to image hosts and fetch them back", long_about = None)]
struct Cli {
    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files to one configured host and print the resulting URLs as JSON
    Upload {
        /// chevereto_v3, imgbb, chevereto_v4 or ptpimg
        #[arg(long)]
        host: String,

        /// Album name for hosts that group uploads into albums
        #[arg(long)]
        album: Option<String>,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Download hosted images into a clean directory
    Download {
        #[arg(short, long)]
        out: PathBuf,

        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Show or reset the persisted configuration
    Config {
        #[arg(long, conflicts_with = "reset")]
        show: bool,

        #[arg(long)]
        reset: bool,
    },
}

fn init_logging(level: &str) {
    let filter = level.parse().unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::from_default_env()
        .filter_level(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config().context("Failed to load configuration")?;

    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));
    log::info!("Starting Image Host Uploader");

    match cli.command {
        Commands::Upload { host, album, files } => upload(&config, &host, album, files).await,
        Commands::Download { out, urls } => download(&config, out, urls).await,
        Commands::Config { show, reset } => {
            let config = if reset { config::reset_config()? } else { config };
            if show || reset {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{}", config::get_config_path()?.display());
            }
            Ok(())
        }
    }
}

async fn upload(
    config: &Config,
    host: &str,
    album: Option<String>,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let backend = config
        .build_backend(host)
        .with_context(|| format!("Cannot use host '{}'", host))?;

    let mut uploader = ImageUploader::new(config.delete_job_as_completed).with_progress_sink(
        |job_id, job_percent, aggregate_percent| {
            log::info!(
                "Job {}: {}% (overall {}%)",
                job_id,
                job_percent,
                aggregate_percent
            );
        },
    );
    uploader.register_backend(host, backend);

    let mut options = config.upload_options();
    options.album_name = album;
    let job_id = uploader.add_job(host, files, options)?;

    let mut outcomes = uploader.run_all().await;
    let results = match outcomes.remove(&job_id) {
        Some(result) => result?,
        None => bail!("Job {} produced no outcome", job_id),
    };

    println!("{}", serde_json::to_string_pretty(&results)?);

    let failed = results.values().filter(|r| !r.is_success()).count();
    if failed > 0 {
        bail!("{} of {} uploads failed", failed, results.len());
    }
    Ok(())
}

async fn download(config: &Config, out: PathBuf, urls: Vec<String>) -> anyhow::Result<()> {
    let url_data = urls
        .into_iter()
        .map(|url| UploadResult::success(url, None))
        .collect();

    let downloader = ImageDownloader::new(url_data, out, &config.client_settings())?
        .with_concurrency(config.download_concurrency)
        .with_progress(|percent| log::info!("Downloaded {:.0}%", percent));

    for path in downloader.download_images().await? {
        println!("{}", path.display());
    }
    Ok(())
}
