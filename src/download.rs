use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;

use crate::db::MetadataStore;
use crate::error::CrawlError;
use crate::net;

/// Progress is logged each time another 5% of the batch completes.
const PROGRESS_STEPS: usize = 20;

/// Result of one asset transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved { path: PathBuf, bytes: u64 },
    Failed { reason: String },
    /// Record had no asset URL.
    MissingLink,
}

impl DownloadOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, DownloadOutcome::Saved { .. })
    }
}

/// Per-URL outcomes in input order.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub outcomes: Vec<(String, DownloadOutcome)>,
}

impl DownloadReport {
    pub fn saved(&self) -> usize {
        self.count(|o| o.is_saved())
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Failed { .. }))
    }

    pub fn missing(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::MissingLink))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|(url, o)| match o {
            DownloadOutcome::Failed { reason } => Some((url.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn summary(&self) -> String {
        format!(
            "{} assets: {} saved, {} failed, {} without link",
            self.outcomes.len(),
            self.saved(),
            self.failed(),
            self.missing()
        )
    }

    fn count(&self, pred: impl Fn(&DownloadOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Percentage to log after item `done` of `total`, if this item crosses into
/// a new 5% band or finishes the batch.
fn progress_mark(done: usize, total: usize) -> Option<usize> {
    if done == 0 || total == 0 {
        return None;
    }
    let band = |n: usize| n * PROGRESS_STEPS / total;
    if band(done) > band(done - 1) || done == total {
        Some(done * 100 / total)
    } else {
        None
    }
}

/// Local file name for `url`: its last non-empty path segment.
pub fn file_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Stream `url` into `dest`, returning the byte count written.
async fn fetch_to_file(client: &Client, url: &str, dest: &Path) -> Result<u64, CrawlError> {
    let mut response = net::get(client, url).await?;
    let mut file = File::create(dest).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

async fn download_one(client: &Client, url: &str, dest_dir: &Path) -> DownloadOutcome {
    if url.is_empty() {
        return DownloadOutcome::MissingLink;
    }
    let Some(name) = file_name(url) else {
        return DownloadOutcome::Failed {
            reason: "no file name in URL".to_string(),
        };
    };
    let path = dest_dir.join(name);
    match fetch_to_file(client, url, &path).await {
        Ok(bytes) => DownloadOutcome::Saved { path, bytes },
        Err(e) => DownloadOutcome::Failed {
            reason: e.to_string(),
        },
    }
}

/// Download every URL into `dest_dir`, one at a time. A failed transfer is
/// recorded and the batch moves on; partial files are left on disk.
pub async fn download_all(client: &Client, urls: &[String], dest_dir: &Path) -> Result<DownloadReport> {
    tokio::fs::create_dir_all(dest_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", dest_dir))?;

    let total = urls.len();
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut report = DownloadReport::default();
    for (i, url) in urls.iter().enumerate() {
        let outcome = download_one(client, url, dest_dir).await;
        if let DownloadOutcome::Failed { reason } = &outcome {
            pb.suspend(|| warn!("Download failed for {}: {}", url, reason));
        }
        report.outcomes.push((url.clone(), outcome));
        pb.inc(1);

        if let Some(pct) = progress_mark(i + 1, total) {
            pb.suspend(|| info!("{}% downloaded", pct));
        }
    }
    pb.finish_and_clear();

    info!("{}", report.summary());
    Ok(report)
}

/// Asset pass: download the asset of every stored record.
pub async fn download_records<S: MetadataStore>(
    client: &Client,
    store: &S,
    dest_dir: &Path,
) -> Result<DownloadReport> {
    let urls: Vec<String> = store.scan()?.into_iter().map(|r| r.asset_url).collect();
    download_all(client, &urls, dest_dir).await
}
