use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::Result;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, warn};

use crate::db::{MetadataStore, Record};
use crate::error::CrawlError;
use crate::extract::{self, normalize};
use crate::net;

static TABLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static NEXT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[rel~="next"][href], a.next[href]"#).unwrap());
static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static TITLE_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td.title a[href]").unwrap());

const NEXT_LABELS: &[&str] = &["next", "next »", "next page", "»", ">"];

/// One parsed page of the firmware listing.
pub struct ListingPage {
    document: Html,
}

impl ListingPage {
    /// Parse `html`; a page without a table means the layout changed.
    pub fn parse(url: &str, html: &str) -> Result<Self, CrawlError> {
        let document = Html::parse_document(html);
        if document.select(&TABLE_SEL).next().is_none() {
            return Err(CrawlError::MissingTable {
                url: url.to_string(),
            });
        }
        Ok(Self { document })
    }

    /// Rows of the first table, header row excluded. Rows of tables nested
    /// inside its cells are not included.
    pub fn rows(&self) -> impl Iterator<Item = ElementRef<'_>> + '_ {
        self.document
            .select(&TABLE_SEL)
            .take(1)
            .flat_map(|table| {
                table
                    .select(&ROW_SEL)
                    .filter(move |row| owning_table(*row).map(|t| t.id()) == Some(table.id()))
            })
            .skip(1)
    }

    /// Href of the "next page" control, if the page has one.
    pub fn next_page(&self) -> Option<String> {
        let by_marker = self.document.select(&NEXT_SEL).next();
        let anchor = by_marker.or_else(|| {
            self.document.select(&ANCHOR_SEL).find(|a| {
                let label = normalize(&a.text().collect::<String>()).to_lowercase();
                NEXT_LABELS.contains(&label.as_str())
            })
        })?;
        anchor.value().attr("href").map(str::to_string)
    }
}

/// Nearest enclosing `table` of `row`.
fn owning_table(row: ElementRef<'_>) -> Option<ElementRef<'_>> {
    row.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "table")
}

pub async fn fetch_listing(client: &Client, url: &str) -> Result<ListingPage, CrawlError> {
    let body = net::fetch_html(client, url).await?;
    ListingPage::parse(url, &body)
}

/// Build a record from one listing row via the column field map.
pub fn record_from_row(row: ElementRef<'_>) -> Record {
    let detail_path = row
        .select(&TITLE_LINK_SEL)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|href| net::normalize_path(href.trim()))
        .unwrap_or_default();

    Record {
        title: extract::extract(row, &extract::TITLE),
        brand: extract::extract(row, &extract::BRAND),
        model: extract::extract(row, &extract::MODEL),
        stock_rom: extract::extract(row, &extract::STOCK_ROM),
        android_version: extract::extract(row, &extract::ANDROID_VERSION),
        author: extract::extract(row, &extract::AUTHOR),
        detail_path,
        ..Default::default()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    pub pages: usize,
    pub records: usize,
    pub skipped: usize,
}

/// Walk the listing from `start_url`, handing each row's record to `on_record`
/// in page order. Stops after the first page without a next link.
pub async fn walk<F>(
    client: &Client,
    start_url: &str,
    base_url: &str,
    mut on_record: F,
) -> Result<CrawlStats>
where
    F: FnMut(Record) -> Result<()>,
{
    let mut stats = CrawlStats::default();
    let mut visited = HashSet::new();
    let mut current = Some(start_url.to_string());

    while let Some(url) = current.take() {
        visited.insert(url.clone());
        let page = fetch_listing(client, &url).await?;
        stats.pages += 1;

        let mut on_page = 0;
        for row in page.rows() {
            let record = record_from_row(row);
            if record.title.is_empty() {
                warn!("Skipping row without title on {}", url);
                stats.skipped += 1;
                continue;
            }
            on_record(record)?;
            on_page += 1;
        }
        stats.records += on_page;
        info!("Page {}: {} records ({})", stats.pages, on_page, url);

        if let Some(href) = page.next_page() {
            let next = net::resolve(base_url, &href)?;
            if visited.contains(&next) {
                warn!("Next page {} already visited, stopping", next);
            } else {
                current = Some(next);
            }
        }
    }

    Ok(stats)
}

/// Metadata pass: walk the listing and upsert every record's listing fields.
pub async fn crawl<S: MetadataStore>(
    client: &Client,
    store: &S,
    start_url: &str,
    base_url: &str,
) -> Result<CrawlStats> {
    let stats = walk(client, start_url, base_url, |record| {
        store.upsert(&record.title, &record.listing_fields())
    })
    .await?;
    info!(
        "Crawled {} pages, stored {} records ({} skipped)",
        stats.pages, stats.records, stats.skipped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::testing::{client, fixture, html, html_counted, Hits, TestServer};
    use axum::Router;

    async fn two_page_site() -> TestServer {
        let router = Router::new()
            .route("/firmware", html(fixture("listing_page1")))
            .route("/firmware/page/2", html(fixture("listing_page2")));
        TestServer::new(router).await
    }

    #[test]
    fn rows_skip_header() {
        let page = ListingPage::parse("mem://1", &fixture("listing_page1")).unwrap();
        assert_eq!(page.rows().count(), 2);
        assert_eq!(page.next_page().as_deref(), Some("/firmware/page/2"));
    }

    #[test]
    fn row_fields_are_normalized() {
        let page = ListingPage::parse("mem://1", &fixture("listing_page1")).unwrap();
        let records: Vec<Record> = page.rows().map(record_from_row).collect();

        assert_eq!(records[0].title, "Acme MXQ Pro 4K");
        assert_eq!(records[0].model, "MXQ Pro");
        assert_eq!(records[0].detail_path, "firmware/acme-mxq-pro.html");
        assert_eq!(records[1].author, "fwteam");
        assert_eq!(records[1].android_version, "8.1");
        assert_eq!(records[1].asset_url, "");
    }

    #[test]
    fn nested_table_rows_are_not_listing_rows() {
        let body = r#"<table>
            <tr><th>Title</th><th>Notes</th></tr>
            <tr>
              <td class="title"><a href="/fw/a.html">Outer</a></td>
              <td><table><tr><td class="title">Inner</td></tr></table></td>
            </tr>
            </table>"#;
        let page = ListingPage::parse("mem://nested", body).unwrap();
        let records: Vec<Record> = page.rows().map(record_from_row).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Outer");
        assert_eq!(records[0].detail_path, "/fw/a.html");
    }

    #[test]
    fn next_link_found_by_label() {
        let body = r#"<table><tr><th>h</th></tr></table>
            <a href="/p/1">1</a> <a href="/p/3"> Next </a>"#;
        let page = ListingPage::parse("mem://2", body).unwrap();
        assert_eq!(page.next_page().as_deref(), Some("/p/3"));
    }

    #[test]
    fn last_page_has_no_next() {
        let page = ListingPage::parse("mem://2", &fixture("listing_page2")).unwrap();
        assert_eq!(page.next_page(), None);
        assert_eq!(page.rows().count(), 1);
    }

    #[test]
    fn missing_table_is_structural_error() {
        let err = ListingPage::parse("mem://x", &fixture("listing_no_table"))
            .err()
            .unwrap();
        assert!(matches!(err, CrawlError::MissingTable { .. }));
    }

    #[tokio::test]
    async fn walk_yields_rows_in_page_order() {
        let server = two_page_site().await;
        let mut titles = Vec::new();
        let stats = walk(
            &client(),
            &server.url("/firmware"),
            server.base_url(),
            |r| {
                titles.push(r.title);
                Ok(())
            },
        )
        .await
        .unwrap();

        assert_eq!(stats.pages, 2);
        assert_eq!(stats.records, 3);
        assert_eq!(
            titles,
            vec!["Acme MXQ Pro 4K", "Beelink GT1 Mini", "Cube X96 Max"]
        );
    }

    #[tokio::test]
    async fn recrawl_does_not_duplicate() {
        let server = two_page_site().await;
        let store = SqliteStore::open_in_memory().unwrap();
        let start = server.url("/firmware");

        crawl(&client(), &store, &start, server.base_url()).await.unwrap();
        crawl(&client(), &store, &start, server.base_url()).await.unwrap();

        assert_eq!(store.scan().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn single_page_fetched_once() {
        let hits = Hits::default();
        let router = Router::new().route(
            "/firmware",
            html_counted(fixture("listing_page2"), hits.clone()),
        );
        let server = TestServer::new(router).await;

        let stats = walk(&client(), &server.url("/firmware"), server.base_url(), |_| Ok(()))
            .await
            .unwrap();

        assert_eq!(stats.records, 1);
        assert_eq!(hits.get(), 1);
    }

    #[tokio::test]
    async fn self_referencing_next_stops() {
        let body = r#"<table><tr><th>Title</th></tr>
            <tr><td class="title">Only</td></tr></table>
            <a class="next" href="/firmware">Next</a>"#;
        let server = TestServer::new(Router::new().route("/firmware", html(body.to_string()))).await;

        let stats = walk(&client(), &server.url("/firmware"), server.base_url(), |_| Ok(()))
            .await
            .unwrap();
        assert_eq!((stats.pages, stats.records), (1, 1));
    }

    #[tokio::test]
    async fn http_error_aborts_crawl() {
        let server = TestServer::new(Router::new()).await;
        let err = walk(&client(), &server.url("/firmware"), server.base_url(), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CrawlError>(),
            Some(CrawlError::Status { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn rows_without_title_are_skipped() {
        let body = r#"<table><tr><th>Title</th></tr>
            <tr><td class="brand">Nameless</td></tr>
            <tr><td class="title">Named</td></tr></table>"#;
        let server = TestServer::new(Router::new().route("/firmware", html(body.to_string()))).await;
        let store = SqliteStore::open_in_memory().unwrap();

        let stats = crawl(&client(), &store, &server.url("/firmware"), server.base_url())
            .await
            .unwrap();
        assert_eq!((stats.records, stats.skipped), (1, 1));
        assert_eq!(store.scan().unwrap()[0].title, "Named");
    }
}
