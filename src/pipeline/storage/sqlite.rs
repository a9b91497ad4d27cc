use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

use crate::app::ports::{IdentityReferencePort, PlatformReferencePort, ReviewQueuePort};
use crate::constants::SQLITE_BUSY_TIMEOUT_MS;
use crate::domain::{IdentityReferenceEntry, PlatformReferenceEntry, ReviewQueueEntry};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::identity::text::clean_name;
use crate::pipeline::processing::identity::MatchStrategy;

use super::fold_key;
use super::seed::ReferenceSeed;

/// SQLite-backed reference store.
///
/// `identity_reference.search_key` holds the cleaned form of
/// `searchable_name` so the exact and partial stages can pre-filter in SQL.
/// Port calls run on the blocking pool, so a caller's timeout still fires
/// while SQLite waits on a locked database.
pub struct SqliteReferenceStore {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS platform_reference (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        raw_variant   TEXT NOT NULL,
        variant_key   TEXT NOT NULL,
        canonical_id  TEXT NOT NULL,
        display_name  TEXT NOT NULL,
        platform_type TEXT NOT NULL,
        active        INTEGER NOT NULL DEFAULT 1,
        notes         TEXT,
        source        TEXT,
        created_at    TEXT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_platform_variant
        ON platform_reference (variant_key);

    CREATE TABLE IF NOT EXISTS identity_reference (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        regulator_id    TEXT NOT NULL,
        canonical_name  TEXT NOT NULL,
        searchable_name TEXT NOT NULL,
        search_key      TEXT NOT NULL,
        base_confidence REAL NOT NULL,
        match_type      TEXT NOT NULL DEFAULT 'canonical'
    );
    CREATE INDEX IF NOT EXISTS idx_identity_search_key
        ON identity_reference (search_key);

    CREATE TABLE IF NOT EXISTS manual_overrides (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        raw_institution_name TEXT NOT NULL,
        name_key             TEXT NOT NULL,
        regulator_id         TEXT,
        canonical_name       TEXT,
        confidence           REAL NOT NULL DEFAULT 0,
        notes                TEXT NOT NULL,
        created_at           TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_override_name
        ON manual_overrides (name_key);
"#;

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::store(format!("bad timestamp '{}': {}", raw, e)))
}

fn platform_from_row(row: &Row<'_>) -> rusqlite::Result<(PlatformReferenceEntry, Option<String>)> {
    Ok((
        PlatformReferenceEntry {
            raw_variant: row.get(0)?,
            canonical_id: row.get(1)?,
            display_name: row.get(2)?,
            platform_type: row.get(3)?,
            active: row.get(4)?,
            notes: row.get(5)?,
            source: row.get(6)?,
            created_at: None,
        },
        row.get(7)?,
    ))
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<IdentityReferenceEntry> {
    Ok(IdentityReferenceEntry {
        regulator_id: row.get(0)?,
        canonical_name: row.get(1)?,
        searchable_name: row.get(2)?,
        base_confidence: row.get(3)?,
        match_type: row.get(4)?,
    })
}

impl SqliteReferenceStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || op(&lock(&conn)))
            .await
            .map_err(|e| PipelineError::store(format!("sqlite task did not complete: {}", e)))?
    }

    /// Insert seed rows. Platform variants already present are left alone;
    /// institutions are appended.
    pub fn apply_seed(&self, seed: &ReferenceSeed) -> Result<()> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;
        for entry in &seed.platforms {
            insert_platform(&tx, entry)?;
        }
        for entry in &seed.institutions {
            tx.execute(
                "INSERT INTO identity_reference
                    (regulator_id, canonical_name, searchable_name, search_key, base_confidence, match_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.regulator_id,
                    entry.canonical_name,
                    entry.searchable_name,
                    clean_name(&entry.searchable_name),
                    entry.base_confidence,
                    entry.match_type
                ],
            )?;
        }
        tx.commit()?;
        info!(
            "Applied reference seed: {} platform variants, {} institutions",
            seed.platforms.len(),
            seed.institutions.len()
        );
        Ok(())
    }

    /// Every name awaiting manual research, oldest first
    pub fn pending_reviews(&self) -> Result<Vec<ReviewQueueEntry>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT raw_institution_name, regulator_id, canonical_name, confidence, notes, created_at
             FROM manual_overrides ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(name, regulator_id, canonical_name, confidence, notes, created_at)| {
                Ok(ReviewQueueEntry {
                    raw_institution_name: name,
                    regulator_id,
                    canonical_name,
                    confidence,
                    notes,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }
}

fn insert_platform(conn: &Connection, entry: &PlatformReferenceEntry) -> Result<usize> {
    Ok(conn.execute(
        "INSERT OR IGNORE INTO platform_reference
            (raw_variant, variant_key, canonical_id, display_name, platform_type, active, notes, source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.raw_variant.trim(),
            fold_key(&entry.raw_variant),
            entry.canonical_id,
            entry.display_name,
            entry.platform_type,
            entry.active,
            entry.notes,
            entry.source,
            entry.created_at.map(|t| t.to_rfc3339())
        ],
    )?)
}

#[async_trait]
impl PlatformReferencePort for SqliteReferenceStore {
    async fn load_variants(&self) -> Result<Vec<PlatformReferenceEntry>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT raw_variant, canonical_id, display_name, platform_type, active, notes, source, created_at
                 FROM platform_reference ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], platform_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(mut entry, created_at)| {
                    entry.created_at = created_at.as_deref().map(parse_timestamp).transpose()?;
                    Ok(entry)
                })
                .collect()
        })
        .await
    }

    async fn variant_exists(&self, raw_variant: &str) -> Result<bool> {
        let key = fold_key(raw_variant);
        self.blocking(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM platform_reference WHERE variant_key = ?1 LIMIT 1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn register_variant(&self, entry: &PlatformReferenceEntry) -> Result<()> {
        let entry = entry.clone();
        self.blocking(move |conn| {
            insert_platform(conn, &entry)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl IdentityReferencePort for SqliteReferenceStore {
    async fn candidates(
        &self,
        strategy: MatchStrategy,
        search_key: &str,
    ) -> Result<Vec<IdentityReferenceEntry>> {
        let sql = match strategy {
            MatchStrategy::Exact => {
                "SELECT regulator_id, canonical_name, searchable_name, base_confidence, match_type
                 FROM identity_reference WHERE search_key = ?1 ORDER BY id"
            }
            MatchStrategy::Partial => {
                "SELECT regulator_id, canonical_name, searchable_name, base_confidence, match_type
                 FROM identity_reference
                 WHERE search_key <> '' AND (instr(?1, search_key) > 0 OR instr(search_key, ?1) > 0)
                 ORDER BY id"
            }
            MatchStrategy::Fuzzy => {
                "SELECT regulator_id, canonical_name, searchable_name, base_confidence, match_type
                 FROM identity_reference WHERE ?1 IS NOT NULL ORDER BY id"
            }
        };

        let search_key = search_key.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params![search_key], identity_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

#[async_trait]
impl ReviewQueuePort for SqliteReferenceStore {
    async fn is_flagged(&self, raw_institution_name: &str) -> Result<bool> {
        let key = fold_key(raw_institution_name);
        self.blocking(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM manual_overrides WHERE name_key = ?1 LIMIT 1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn flag(&self, entry: &ReviewQueueEntry) -> Result<()> {
        let entry = entry.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO manual_overrides
                    (raw_institution_name, name_key, regulator_id, canonical_name, confidence, notes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.raw_institution_name.trim(),
                    fold_key(&entry.raw_institution_name),
                    entry.regulator_id,
                    entry.canonical_name,
                    entry.confidence,
                    entry.notes,
                    entry.created_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await
    }
}
