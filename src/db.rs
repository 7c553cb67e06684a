use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// One firmware item, keyed by `title`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub title: String,
    pub brand: String,
    pub model: String,
    pub stock_rom: String,
    pub android_version: String,
    pub author: String,
    pub detail_path: String,
    pub last_modified: String,
    pub chipset: String,
    pub asset_url: String,
}

/// Non-key columns of the `records` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Brand,
    Model,
    StockRom,
    AndroidVersion,
    Author,
    DetailPath,
    LastModified,
    Chipset,
    AssetUrl,
}

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Column::Brand => "brand",
            Column::Model => "model",
            Column::StockRom => "stock_rom",
            Column::AndroidVersion => "android_version",
            Column::Author => "author",
            Column::DetailPath => "detail_path",
            Column::LastModified => "last_modified",
            Column::Chipset => "chipset",
            Column::AssetUrl => "asset_url",
        }
    }
}

impl Record {
    /// Fields the listing pass owns.
    pub fn listing_fields(&self) -> Vec<(Column, String)> {
        vec![
            (Column::Brand, self.brand.clone()),
            (Column::Model, self.model.clone()),
            (Column::StockRom, self.stock_rom.clone()),
            (Column::AndroidVersion, self.android_version.clone()),
            (Column::Author, self.author.clone()),
            (Column::DetailPath, self.detail_path.clone()),
        ]
    }

    /// Fields the detail pass owns.
    pub fn detail_fields(&self) -> Vec<(Column, String)> {
        vec![
            (Column::LastModified, self.last_modified.clone()),
            (Column::Chipset, self.chipset.clone()),
            (Column::AssetUrl, self.asset_url.clone()),
        ]
    }
}

/// Keyed record storage. Upserting an existing title only touches the given fields.
pub trait MetadataStore {
    fn upsert(&self, title: &str, fields: &[(Column, String)]) -> Result<()>;
    fn scan(&self) -> Result<Vec<Record>>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn stats(&self) -> Result<Stats> {
        let total: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
        let with_detail: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE detail_path != ''",
            [],
            |r| r.get(0),
        )?;
        let with_asset: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE asset_url != ''",
            [],
            |r| r.get(0),
        )?;
        Ok(Stats {
            total,
            with_detail,
            with_asset,
        })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            title           TEXT PRIMARY KEY,
            brand           TEXT NOT NULL DEFAULT '',
            model           TEXT NOT NULL DEFAULT '',
            stock_rom       TEXT NOT NULL DEFAULT '',
            android_version TEXT NOT NULL DEFAULT '',
            author          TEXT NOT NULL DEFAULT '',
            detail_path     TEXT NOT NULL DEFAULT '',
            last_modified   TEXT NOT NULL DEFAULT '',
            chipset         TEXT NOT NULL DEFAULT '',
            asset_url       TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

impl MetadataStore for SqliteStore {
    fn upsert(&self, title: &str, fields: &[(Column, String)]) -> Result<()> {
        let columns: Vec<&str> = fields.iter().map(|(c, _)| c.name()).collect();
        let placeholders: String = (2..=fields.len() + 1)
            .map(|i| format!(", ?{}", i))
            .collect();
        let updates: String = columns
            .iter()
            .map(|c| format!("{c} = excluded.{c}, "))
            .collect();
        let insert_columns: String = columns.iter().map(|c| format!(", {}", c)).collect();

        let sql = format!(
            "INSERT INTO records (title{insert_columns}) VALUES (?1{placeholders})
             ON CONFLICT(title) DO UPDATE SET {updates}updated_at = datetime('now')"
        );

        let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(fields.len() + 1);
        params.push(&title);
        for (_, value) in fields {
            params.push(value);
        }

        self.conn
            .prepare_cached(&sql)?
            .execute(params.as_slice())
            .with_context(|| format!("Failed to upsert {:?}", title))?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(
            "SELECT title, brand, model, stock_rom, android_version, author,
                    detail_path, last_modified, chipset, asset_url
             FROM records ORDER BY title",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Record {
                    title: row.get(0)?,
                    brand: row.get(1)?,
                    model: row.get(2)?,
                    stock_rom: row.get(3)?,
                    android_version: row.get(4)?,
                    author: row.get(5)?,
                    detail_path: row.get(6)?,
                    last_modified: row.get(7)?,
                    chipset: row.get(8)?,
                    asset_url: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub with_detail: usize,
    pub with_asset: usize,
}
