use std::time::Duration;

use reqwest::{Client, Response};
use url::Url;

use crate::config::Settings;
use crate::error::CrawlError;

pub fn build_client(settings: &Settings) -> Result<Client, CrawlError> {
    let client = Client::builder()
        .user_agent(&settings.user_agent)
        .timeout(Duration::from_secs(settings.timeout_secs))
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .build()?;
    Ok(client)
}

/// GET `url` and fail on any non-2xx status.
pub async fn get(client: &Client, url: &str) -> Result<Response, CrawlError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CrawlError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

pub async fn fetch_html(client: &Client, url: &str) -> Result<String, CrawlError> {
    Ok(get(client, url).await?.text().await?)
}

/// Site uses `\` in some paths; treat it as `/`.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Resolve `href` against `base`. Absolute hrefs pass through unchanged.
pub fn resolve(base: &str, href: &str) -> Result<String, CrawlError> {
    let href = normalize_path(href.trim());
    let base = Url::parse(base).map_err(|source| CrawlError::InvalidUrl {
        url: base.to_string(),
        source,
    })?;
    let joined = base.join(&href).map_err(|source| CrawlError::InvalidUrl {
        url: href.clone(),
        source,
    })?;
    Ok(joined.into())
}

/// Scheme and host of `url`, e.g. `https://site.example/`.
pub fn site_root(url: &str) -> Result<String, CrawlError> {
    let parsed = Url::parse(url).map_err(|source| CrawlError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;
    Ok(parsed.join("/").map(String::from).unwrap_or_else(|_| url.to_string()))
}
