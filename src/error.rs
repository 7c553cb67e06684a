use thiserror::Error;

/// Errors from fetching and parsing listing/detail pages.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("no table found on listing page {url}")]
    MissingTable { url: String },
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
