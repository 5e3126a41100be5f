use anyhow::{anyhow, Result};
use book2epub::cleanup::sweep_stray_images;
use book2epub::config::{dedicated_scratch_dir, default_scratch_dir, DEFAULT_IMAGE_CONCURRENCY};
use book2epub::{Downloader, DownloaderConfig, EbookConverter, Endpoints, HttpFetcher, RunReport};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;
use tokio::fs;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "book2epub")]
#[command(about = "CLI utility to turn a subscription technical book into a self-contained EPUB")]
#[command(version = "0.1.0")]
struct Args {
    /// Bearer token of a logged-in subscription
    #[arg(long = "token", env = "PACKT_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Parent of the `.packt_tmp` directory used for transient image downloads
    #[arg(long = "scratch-dir", global = true)]
    scratch_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct BookArgs {
    /// ISBN or product id of the book
    isbn: String,

    /// Output directory for the assembled book
    #[arg(short = 'o', long = "out-dir", default_value = ".")]
    out_dir: PathBuf,

    /// Include prefaces before the first chapter
    #[arg(long = "front-matter")]
    front_matter: bool,

    /// Include appendices after the last chapter
    #[arg(long = "appendices")]
    appendices: bool,

    /// Parallel image downloads within one page
    #[arg(short = 'j', long = "image-concurrency", default_value_t = DEFAULT_IMAGE_CONCURRENCY, value_parser = parse_concurrency)]
    image_concurrency: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a book into a single EPUB
    Epub {
        #[command(flatten)]
        book: BookArgs,
    },
    /// Download a book and convert it with Calibre's ebook-convert
    Mobi {
        #[command(flatten)]
        book: BookArgs,

        /// Target format passed to the converter
        #[arg(short = 'f', long = "format", default_value = "mobi")]
        format: String,

        /// Keep the intermediate EPUB (by default it is deleted after converting)
        #[arg(short = 'k', long = "keep-epub")]
        keep_epub: bool,
    },
    /// Remove image files left in the scratch directory by interrupted runs
    Clean,
}

fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value = s.parse::<usize>().map_err(|_| "Not a number.")?;
    if value == 0 {
        return Err("Must be at least 1.".to_string());
    }
    Ok(value)
}

async fn download(token: Option<String>, scratch_dir: PathBuf, book: BookArgs) -> Result<RunReport> {
    if token.is_none() {
        warn!("No token given, page requests will most likely be rejected");
    }

    let fetcher = HttpFetcher::new(Endpoints::default(), token)
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

    let mut config = DownloaderConfig::new(scratch_dir, book.out_dir);
    config.front_matter = book.front_matter;
    config.appendices = book.appendices;
    config.image_concurrency = book.image_concurrency;

    let report = Downloader::new(fetcher, config).run(&book.isbn).await?;

    info!(
        "{} sections, {} images embedded, {} images missing",
        report.sections, report.images.embedded, report.images.failed.len()
    );
    for source in &report.images.failed {
        warn!("Missing image: {}", source.yellow());
    }

    Ok(report)
}

async fn convert(report: &RunReport, format: &str, keep_epub: bool) -> Result<()> {
    let Some(converter) = EbookConverter::locate() else {
        warn!(
            "ebook-convert not found, keeping {}",
            report.output.display().to_string().green()
        );
        return Ok(());
    };

    match converter.convert(&report.output, format).await {
        Ok(converted) => {
            println!("Output : {}", converted.display().to_string().green());
            if !keep_epub {
                if let Err(e) = fs::remove_file(&report.output).await {
                    warn!("Failed to remove {}: {}", report.output.display(), e);
                }
            }
        }
        Err(e) => {
            warn!("Conversion failed ({}), keeping {}", e, report.output.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::from_default_env()
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap())
        .add_directive("book2epub=info".parse().unwrap());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();
    let scratch_dir = args
        .scratch_dir
        .map(dedicated_scratch_dir)
        .unwrap_or_else(default_scratch_dir);

    let result = match args.command {
        Commands::Epub { book } => download(args.token, scratch_dir, book).await.map(|report| {
            println!("Output : {}", report.output.display().to_string().green());
        }),
        Commands::Mobi { book, format, keep_epub } => {
            match download(args.token, scratch_dir, book).await {
                Ok(report) => convert(&report, &format, keep_epub).await,
                Err(e) => Err(e),
            }
        }
        Commands::Clean => {
            let report = sweep_stray_images(&scratch_dir).await;
            println!("Removed {} files from {}", report.removed, scratch_dir.display());
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {:#}", e).red());
        process::exit(1);
    }
}
