use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;

use firmware_crawler::config::Settings;
use firmware_crawler::db::SqliteStore;
use firmware_crawler::download::DownloadReport;
use firmware_crawler::{detail, download, listing, net};

#[derive(Parser)]
#[command(name = "firmware_crawler", about = "Firmware listing crawler and downloader")]
struct Cli {
    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Settings file (default: firmware_crawler.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level, including fields missing from pages
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the listing from URL and store every item's metadata
    Crawl {
        /// First listing page
        url: String,
        /// Site root for relative links (default: config, then URL's host)
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Fetch each stored item's detail page for chipset, date and asset link
    Enrich {
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Download every stored asset
    Download {
        /// Destination directory (overrides config)
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },
    /// Crawl, enrich and download in one go
    Run {
        url: String,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },
    /// Show store statistics
    Stats,
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let t0 = Instant::now();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let store = SqliteStore::open(&settings.db_path)?;
    let client = net::build_client(&settings)?;

    let result = match cli.command {
        Commands::Crawl { url, base_url } => {
            let base = crawl_base(&settings, base_url, &url)?;
            let stats = listing::crawl(&client, &store, &url, &base).await?;
            println!(
                "Stored {} records from {} pages ({} skipped).",
                stats.records, stats.pages, stats.skipped
            );
            Ok(())
        }
        Commands::Enrich { base_url } => {
            let base = base_url
                .or_else(|| settings.base_url.clone())
                .ok_or_else(|| anyhow!("No base URL: pass --base-url or set base_url"))?;
            run_enrich(&client, &store, &base).await
        }
        Commands::Download { dest } => {
            let dest = dest.unwrap_or_else(|| settings.download_dir.clone());
            let report = download::download_records(&client, &store, &dest).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Run {
            url,
            base_url,
            dest,
        } => {
            let base = crawl_base(&settings, base_url, &url)?;
            let dest = dest.unwrap_or_else(|| settings.download_dir.clone());

            let t_crawl = Instant::now();
            let stats = listing::crawl(&client, &store, &url, &base).await?;
            println!(
                "Crawled {} records from {} pages in {:.1}s",
                stats.records,
                stats.pages,
                t_crawl.elapsed().as_secs_f64()
            );

            run_enrich(&client, &store, &base).await?;

            let report = download::download_records(&client, &store, &dest).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Stats => {
            let s = store.stats()?;
            println!("Records:      {}", s.total);
            println!("With detail:  {}", s.with_detail);
            println!("With asset:   {}", s.with_asset);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn crawl_base(settings: &Settings, flag: Option<String>, url: &str) -> Result<String> {
    match flag.or_else(|| settings.base_url.clone()) {
        Some(base) => Ok(base),
        None => Ok(net::site_root(url)?),
    }
}

async fn run_enrich(client: &Client, store: &SqliteStore, base: &str) -> Result<()> {
    let stats = detail::enrich_all(client, store, base).await?;
    println!(
        "Enriched {} records: {} with asset, {} without ({} fetch errors).",
        stats.total, stats.with_asset, stats.without_asset, stats.failed
    );
    Ok(())
}

fn print_report(report: &DownloadReport) {
    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!("\n--- Failed ---");
        for (url, reason) in &failures {
            println!("  {}: {}", url, reason);
        }
    }
    println!("{}.", report.summary());
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
