//! Persistent item catalog.
//!
//! The catalog is the single owner of item state. Stages never hold on to an
//! item between runs: they read it, hand an [`ItemUpdate`] back, and the
//! catalog validates the status transition before writing it.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::models::{Item, ItemStatus, MediaObject, Platform};
use crate::{PipelineError, Result};

/// Changes to write back for one item; `None` fields are left alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemUpdate {
    pub status: Option<ItemStatus>,
    pub platform: Option<Platform>,
    pub media_id: Option<String>,
    pub failure_reason: Option<String>,
    pub clear_failure: bool,
    pub attempt_count: Option<u32>,
    pub failed_from: Option<ItemStatus>,
    pub storage_key: Option<String>,
    pub media_size: Option<u64>,
    pub media_etag: Option<String>,
    pub duration_seconds: Option<f64>,
    pub transcript_ref: Option<String>,
    pub service_used: Option<String>,
    pub transcribed_at: Option<DateTime<Utc>>,
}

impl ItemUpdate {
    pub fn resolved(platform: Platform, media_id: impl Into<String>) -> Self {
        Self {
            status: Some(ItemStatus::Resolved),
            platform: Some(platform),
            media_id: Some(media_id.into()),
            ..Default::default()
        }
    }

    /// No embedded video: record the classification, keep the status
    pub fn needs_review() -> Self {
        Self {
            platform: Some(Platform::None),
            ..Default::default()
        }
    }

    pub fn stored(media: &MediaObject) -> Self {
        Self {
            status: Some(ItemStatus::Stored),
            storage_key: Some(media.storage_key.clone()),
            media_size: Some(media.size),
            media_etag: media.etag.clone(),
            duration_seconds: media.duration_seconds,
            ..Default::default()
        }
    }

    pub fn transcribed(transcript_ref: impl Into<String>, service: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ItemStatus::Transcribed),
            transcript_ref: Some(transcript_ref.into()),
            service_used: Some(service.into()),
            transcribed_at: Some(at),
            ..Default::default()
        }
    }

    pub fn failed(from: ItemStatus, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: Some(ItemStatus::Failed),
            failed_from: Some(from),
            failure_reason: Some(reason.into()),
            attempt_count: Some(attempts),
            ..Default::default()
        }
    }

    pub fn attempts(count: u32) -> Self {
        Self {
            attempt_count: Some(count),
            ..Default::default()
        }
    }

    /// Apply onto `item`, refusing status moves outside the lifecycle
    pub fn apply_to(&self, item: &mut Item) -> Result<()> {
        if let Some(next) = self.status {
            if !item.status.can_transition_to(next) {
                return Err(PipelineError::Catalog(format!(
                    "illegal status transition {} -> {} for item {}",
                    item.status, next, item.id
                )));
            }
            item.status = next;
        }
        if let Some(platform) = self.platform {
            item.platform = Some(platform);
        }
        if let Some(media_id) = &self.media_id {
            item.media_id = Some(media_id.clone());
        }
        if self.clear_failure {
            item.failure_reason = None;
            item.failed_from = None;
        }
        if let Some(reason) = &self.failure_reason {
            item.failure_reason = Some(reason.clone());
        }
        if let Some(from) = self.failed_from {
            item.failed_from = Some(from);
        }
        if let Some(count) = self.attempt_count {
            item.attempt_count = count;
        }
        if let Some(key) = &self.storage_key {
            item.storage_key = Some(key.clone());
        }
        if let Some(size) = self.media_size {
            item.media_size = Some(size);
        }
        if let Some(etag) = &self.media_etag {
            item.media_etag = Some(etag.clone());
        }
        if let Some(duration) = self.duration_seconds {
            item.duration_seconds = Some(duration);
        }
        if let Some(reference) = &self.transcript_ref {
            item.transcript_ref = Some(reference.clone());
        }
        if let Some(service) = &self.service_used {
            item.service_used = Some(service.clone());
        }
        if let Some(at) = self.transcribed_at {
            item.transcribed_at = Some(at);
        }
        Ok(())
    }
}

/// Item persistence as seen by the pipeline core
pub trait Catalog: Send + Sync {
    /// All items ordered by ascending id
    fn items(&self) -> Result<Vec<Item>>;

    fn get(&self, id: &str) -> Result<Option<Item>>;

    /// Apply `update` to item `id` and return the stored result
    fn apply(&self, id: &str, update: &ItemUpdate) -> Result<Item>;

    /// Return a failed item to the state it failed from
    fn reset_failed(&self, id: &str) -> Result<Item> {
        let mut item = self
            .get(id)?
            .ok_or_else(|| PipelineError::NotFound(format!("item {}", id)))?;
        if item.status != ItemStatus::Failed {
            return Ok(item);
        }
        item.status = item.failed_from.unwrap_or(ItemStatus::Unresolved);
        item.failed_from = None;
        item.failure_reason = None;
        item.attempt_count = 0;
        self.replace(&item)?;
        Ok(item)
    }

    /// Overwrite a full row; used for failure resets
    fn replace(&self, item: &Item) -> Result<()>;
}

/// Counts for the `stats` report
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_platform: BTreeMap<String, u64>,
    pub needs_review: u64,
}

/// SQLite-backed catalog with a single `items` table
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

struct RawItem {
    id: String,
    source_url: String,
    platform: Option<String>,
    media_id: Option<String>,
    status: String,
    failure_reason: Option<String>,
    attempt_count: i64,
    failed_from: Option<String>,
    storage_key: Option<String>,
    media_size: Option<i64>,
    media_etag: Option<String>,
    duration_seconds: Option<f64>,
    transcript_ref: Option<String>,
    service_used: Option<String>,
    transcribed_at: Option<String>,
}

const ITEM_COLUMNS: &str = "id, source_url, platform, media_id, status, failure_reason, attempt_count, \
     failed_from, storage_key, media_size, media_etag, duration_seconds, transcript_ref, service_used, \
     transcribed_at";

impl RawItem {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_url: row.get(1)?,
            platform: row.get(2)?,
            media_id: row.get(3)?,
            status: row.get(4)?,
            failure_reason: row.get(5)?,
            attempt_count: row.get(6)?,
            failed_from: row.get(7)?,
            storage_key: row.get(8)?,
            media_size: row.get(9)?,
            media_etag: row.get(10)?,
            duration_seconds: row.get(11)?,
            transcript_ref: row.get(12)?,
            service_used: row.get(13)?,
            transcribed_at: row.get(14)?,
        })
    }

    fn into_item(self) -> Result<Item> {
        let transcribed_at = self
            .transcribed_at
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| PipelineError::Corruption(format!("transcribed_at '{}': {}", raw, e)))
            })
            .transpose()?;

        Ok(Item {
            id: self.id,
            source_url: self.source_url,
            platform: self.platform.map(|p| p.parse()).transpose()?,
            media_id: self.media_id,
            status: self.status.parse()?,
            failure_reason: self.failure_reason,
            attempt_count: self.attempt_count.max(0) as u32,
            failed_from: self.failed_from.map(|s| s.parse()).transpose()?,
            storage_key: self.storage_key,
            media_size: self.media_size.map(|s| s.max(0) as u64),
            media_etag: self.media_etag,
            duration_seconds: self.duration_seconds,
            transcript_ref: self.transcript_ref,
            service_used: self.service_used,
            transcribed_at,
        })
    }
}

impl SqliteCatalog {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
        ",
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let catalog = Self {
            conn: Mutex::new(conn),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                platform TEXT,
                media_id TEXT,
                status TEXT NOT NULL DEFAULT 'unresolved',
                failure_reason TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                failed_from TEXT,
                storage_key TEXT,
                media_size INTEGER,
                media_etag TEXT,
                duration_seconds REAL,
                transcript_ref TEXT,
                service_used TEXT,
                transcribed_at TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::Catalog("catalog connection poisoned".to_string()))
    }

    /// Insert new items; ids already present are left untouched
    pub fn import(&self, entries: &[(String, String)]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO items (id, source_url) VALUES (?1, ?2)")?;
            for (id, url) in entries {
                inserted += stmt.execute(params![id, url])?;
            }
        }
        tx.commit()?;
        tracing::info!("Imported {} new items ({} entries read)", inserted, entries.len());
        Ok(inserted)
    }

    pub fn failed_items(&self) -> Result<Vec<Item>> {
        Ok(self
            .items()?
            .into_iter()
            .filter(|item| item.status == ItemStatus::Failed)
            .collect())
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        let conn = self.conn()?;
        let mut stats = CatalogStats::default();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM items GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            stats.total += count as u64;
            stats.by_status.insert(status, count as u64);
        }

        let mut stmt =
            conn.prepare("SELECT COALESCE(platform, 'unclassified'), COUNT(*) FROM items GROUP BY platform")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (platform, count) = row?;
            stats.by_platform.insert(platform, count as u64);
        }

        stats.needs_review = stats.by_platform.get(Platform::None.as_str()).copied().unwrap_or(0);
        Ok(stats)
    }

    fn write(conn: &Connection, item: &Item) -> Result<()> {
        conn.execute(
            "UPDATE items SET platform = ?2, media_id = ?3, status = ?4, failure_reason = ?5,
                attempt_count = ?6, failed_from = ?7, storage_key = ?8, media_size = ?9,
                media_etag = ?10, duration_seconds = ?11, transcript_ref = ?12,
                service_used = ?13, transcribed_at = ?14, updated_at = datetime('now')
             WHERE id = ?1",
            params![
                item.id,
                item.platform.map(|p| p.as_str()),
                item.media_id,
                item.status.as_str(),
                item.failure_reason,
                item.attempt_count as i64,
                item.failed_from.map(|s| s.as_str()),
                item.storage_key,
                item.media_size.map(|s| s as i64),
                item.media_etag,
                item.duration_seconds,
                item.transcript_ref,
                item.service_used,
                item.transcribed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<Item>> {
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS),
                params![id],
                RawItem::from_row,
            )
            .optional()?;
        raw.map(RawItem::into_item).transpose()
    }
}

impl Catalog for SqliteCatalog {
    fn items(&self) -> Result<Vec<Item>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM items ORDER BY id", ITEM_COLUMNS))?;
        let raws = stmt
            .query_map([], RawItem::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawItem::into_item).collect()
    }

    fn get(&self, id: &str) -> Result<Option<Item>> {
        let conn = self.conn()?;
        Self::load(&conn, id)
    }

    fn apply(&self, id: &str, update: &ItemUpdate) -> Result<Item> {
        let conn = self.conn()?;
        let mut item = Self::load(&conn, id)?.ok_or_else(|| PipelineError::NotFound(format!("item {}", id)))?;
        update.apply_to(&mut item)?;
        Self::write(&conn, &item)?;
        Ok(item)
    }

    fn replace(&self, item: &Item) -> Result<()> {
        let conn = self.conn()?;
        Self::write(&conn, item)
    }
}

/// Parse an import list: `id,url` lines or bare URLs, `#` comments allowed.
/// Bare URLs get their line number, zero-padded, as id.
pub fn parse_import_list(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match line.split_once(',') {
                Some((id, url)) => {
                    let (id, url) = (id.trim(), url.trim());
                    if id.eq_ignore_ascii_case("id") || url.is_empty() {
                        None
                    } else {
                        Some((id.to_string(), url.to_string()))
                    }
                }
                None => Some((format!("{:06}", index + 1), line.to_string())),
            }
        })
        .collect()
}
