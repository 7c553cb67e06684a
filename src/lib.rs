//! Crawl a paginated firmware listing into SQLite, enrich each record from its
//! detail page, then download the referenced archives.

pub mod config;
pub mod db;
pub mod detail;
pub mod download;
pub mod error;
pub mod extract;
pub mod listing;
pub mod net;

#[cfg(test)]
mod testing;
