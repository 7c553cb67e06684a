use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::db::{MetadataStore, Record};
use crate::error::CrawlError;
use crate::extract;
use crate::net;

static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static ARCHIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(zip|rar|7z|tar|gz|tgz|bz2|xz)$").unwrap());

/// Fields found on an item's own page.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DetailFields {
    pub last_modified: String,
    pub chipset: String,
    pub asset_url: String,
}

/// Extract detail fields from a fetched page; `page_url` resolves a relative asset link.
pub fn parse_detail(page_url: &str, html: &str) -> DetailFields {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let asset_url = document
        .select(&ANCHOR_SEL)
        .filter_map(|a| a.value().attr("href"))
        .map(net::normalize_path)
        .find(|href| is_archive(href))
        .and_then(|href| match net::resolve(page_url, &href) {
            Ok(url) => Some(url),
            Err(e) => {
                debug!("Unusable asset link {}: {}", href, e);
                None
            }
        })
        .unwrap_or_default();

    DetailFields {
        last_modified: extract::extract(root, &extract::LAST_MODIFIED),
        chipset: extract::extract(root, &extract::CHIPSET),
        asset_url,
    }
}

/// Whether `href` points at a compressed archive (query and fragment ignored).
pub fn is_archive(href: &str) -> bool {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    ARCHIVE_RE.is_match(path)
}

async fn fetch_detail(client: &Client, url: &str) -> Result<DetailFields, CrawlError> {
    let body = net::fetch_html(client, url).await?;
    Ok(parse_detail(url, &body))
}

/// Fetch `record`'s detail page and fill in its detail fields.
/// The asset URL is cleared first, so a failure leaves the record without one.
async fn try_enrich(
    client: &Client,
    record: &mut Record,
    base_url: &str,
) -> Result<(), CrawlError> {
    record.asset_url.clear();
    if record.detail_path.is_empty() {
        debug!("No detail page for {}", record.title);
        return Ok(());
    }

    let url = net::resolve(base_url, &record.detail_path)?;
    let fields = fetch_detail(client, &url).await?;
    record.last_modified = fields.last_modified;
    record.chipset = fields.chipset;
    record.asset_url = fields.asset_url;
    Ok(())
}

/// A record after its detail pass. `error` is set when the detail page could
/// not be fetched; the record then has no asset URL.
#[derive(Debug)]
pub struct Enriched {
    pub record: Record,
    pub error: Option<CrawlError>,
}

/// Fill in `record`'s detail fields. Never fails: a fetch error is logged and
/// handed back alongside the record.
pub async fn enrich(client: &Client, mut record: Record, base_url: &str) -> Enriched {
    let error = try_enrich(client, &mut record, base_url).await.err();
    if let Some(e) = &error {
        warn!("Detail fetch failed for {}: {}", record.title, e);
    }
    Enriched { record, error }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnrichStats {
    pub total: usize,
    pub with_asset: usize,
    pub without_asset: usize,
    pub failed: usize,
}

/// Detail pass over every stored record.
pub async fn enrich_all<S: MetadataStore>(
    client: &Client,
    store: &S,
    base_url: &str,
) -> Result<EnrichStats> {
    let records = store.scan()?;
    let mut stats = EnrichStats {
        total: records.len(),
        ..Default::default()
    };

    for record in records {
        let Enriched { record, error } = enrich(client, record, base_url).await;
        if error.is_some() {
            stats.failed += 1;
        }
        if record.asset_url.is_empty() {
            stats.without_asset += 1;
        } else {
            stats.with_asset += 1;
        }
        store.upsert(&record.title, &record.detail_fields())?;
    }

    info!(
        "Enriched {} records: {} with asset, {} without ({} fetch errors)",
        stats.total, stats.with_asset, stats.without_asset, stats.failed
    );
    Ok(stats)
}
