//! SQLite event store.
//!
//! Holds the append-only `events` table written by the watcher loop and read
//! by the dashboard, plus the `file_classification` labels the dashboard
//! manages. The connection sits behind a mutex, which serializes writes from
//! any number of callers.
//!
//! Paths are stored as their raw bytes so names that are not valid UTF-8
//! round-trip exactly.
//!
//! # Example
//!
//! ```no_run
//! use fim_monitor::store::EventStore;
//!
//! let store = EventStore::open("data/fim_events.db").unwrap();
//! for stored in store.recent(10).unwrap() {
//!     println!("{} {}", stored.event.event_type, stored.event.file_path.display());
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::sink::{EventSink, SinkError};
use crate::types::{serialize_path_lossy, Digest, EventType, FileEvent, StoredEvent};

const EVENT_COLUMNS: &str = "id, event_type, file_path, timestamp, endpoint, hostname, \
                             username, hash_before, hash_after, synced";

/// Errors from the event store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite returned an error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Creating the database directory failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A previous holder of the connection panicked.
    #[error("database connection lock poisoned")]
    LockPoisoned,
}

/// Columns a free-text search may match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchColumn {
    Timestamp,
    EventType,
    FilePath,
    Endpoint,
    Hostname,
    Username,
}

impl SearchColumn {
    pub const ALL: [SearchColumn; 6] = [
        Self::Timestamp,
        Self::EventType,
        Self::FilePath,
        Self::Endpoint,
        Self::Hostname,
        Self::Username,
    ];

    fn column(&self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::EventType => "event_type",
            Self::FilePath => "file_path",
            Self::Endpoint => "endpoint",
            Self::Hostname => "hostname",
            Self::Username => "username",
        }
    }

    /// Parses a column name, returning `None` for anything not searchable.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.column().eq_ignore_ascii_case(name.trim()))
    }
}

/// Filter for [`EventStore::query`].
///
/// Empty `types` means every type; empty `columns` means every searchable
/// column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub types: Vec<EventType>,
    pub search: Option<String>,
    pub columns: Vec<SearchColumn>,
    pub limit: usize,
}

impl EventQuery {
    #[must_use]
    pub fn recent(limit: usize) -> Self {
        Self {
            types: Vec::new(),
            search: None,
            columns: Vec::new(),
            limit,
        }
    }

    #[must_use]
    pub fn with_types(mut self, types: Vec<EventType>) -> Self {
        self.types = types;
        self
    }

    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>, columns: Vec<SearchColumn>) -> Self {
        self.search = Some(search.into());
        self.columns = columns;
        self
    }
}

/// Latest event seen for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    #[serde(serialize_with = "serialize_path_lossy")]
    pub file_path: PathBuf,
    pub last_event_type: EventType,
    pub last_timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub hostname: String,
    pub username: String,
}

/// Dashboard label attached to a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(serialize_with = "serialize_path_lossy")]
    pub file_path: PathBuf,
    pub classification: String,
    pub last_updated: DateTime<Utc>,
    pub endpoint: Option<String>,
    pub hostname: Option<String>,
    pub username: Option<String>,
}

/// SQLite-backed [`EventSink`] and query interface.
#[derive(Debug, Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
}

impl EventStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let store = Self::from_connection(Connection::open(path)?)?;
        info!(path = %path.display(), "Event store opened");
        Ok(store)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                file_path BLOB NOT NULL,
                timestamp TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                hostname TEXT NOT NULL,
                username TEXT NOT NULL,
                hash_before TEXT,
                hash_after TEXT,
                synced INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_event_type ON events(event_type);
            CREATE INDEX IF NOT EXISTS idx_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_file_path ON events(file_path);

            CREATE TABLE IF NOT EXISTS file_classification (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path BLOB NOT NULL UNIQUE,
                classification TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                endpoint TEXT,
                hostname TEXT,
                username TEXT
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Inserts `event` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert(&self, event: &FileEvent) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO events (
                event_type, file_path, timestamp, endpoint, hostname,
                username, hash_before, hash_after, synced
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                event.event_type.as_str(),
                path_to_sql(&event.file_path),
                event.timestamp,
                event.endpoint,
                event.hostname,
                event.username,
                event.hash_before.as_ref().map(Digest::as_str),
                event.hash_after.as_ref().map(Digest::as_str),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, event_type = %event.event_type, "Event stored");
        Ok(id)
    }

    /// Returns the `limit` most recently appended events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>, StoreError> {
        self.query(&EventQuery::recent(limit))
    }

    /// Returns events matching `query`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn query(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE 1=1");
        let mut values: Vec<Value> = Vec::new();

        if !query.types.is_empty() {
            sql.push_str(&format!(
                " AND event_type IN ({})",
                placeholders(query.types.len())
            ));
            values.extend(
                query
                    .types
                    .iter()
                    .map(|t| Value::Text(t.as_str().to_string())),
            );
        }

        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let columns: &[SearchColumn] = if query.columns.is_empty() {
                &SearchColumn::ALL
            } else {
                &query.columns
            };
            let pattern = format!("%{search}%");
            let conditions: Vec<String> = columns
                .iter()
                .map(|c| format!("{} LIKE ?", c.column()))
                .collect();
            sql.push_str(&format!(" AND ({})", conditions.join(" OR ")));
            values.extend(columns.iter().map(|_| Value::Text(pattern.clone())));
        }

        sql.push_str(" ORDER BY id DESC LIMIT ?");
        values.push(Value::Integer(to_sql_limit(query.limit)));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), stored_event_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Returns the total number of stored events.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Returns the last known digest of every path whose latest event is not
    /// a deletion.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn latest_hashes(&self) -> Result<Vec<(PathBuf, Digest)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT e.file_path, e.hash_after FROM events e
             JOIN (SELECT file_path, MAX(id) AS max_id FROM events GROUP BY file_path) latest
               ON e.id = latest.max_id
             WHERE e.event_type != 'DELETED' AND e.hash_after IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                path_from_column(row, 0)?,
                Digest::from_hex(row.get::<_, String>(1)?),
            ))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Returns the latest event of every path, newest first, optionally
    /// restricted to the given endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn distinct_files(&self, endpoints: &[String]) -> Result<Vec<FileSummary>, StoreError> {
        let mut sql = String::from(
            "SELECT e.file_path, e.event_type, e.timestamp, e.endpoint, e.hostname, e.username
             FROM events e
             JOIN (SELECT file_path, MAX(id) AS max_id FROM events GROUP BY file_path) latest
               ON e.id = latest.max_id",
        );
        if !endpoints.is_empty() {
            sql.push_str(&format!(
                " WHERE e.endpoint IN ({})",
                placeholders(endpoints.len())
            ));
        }
        sql.push_str(" ORDER BY e.id DESC");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(endpoints.iter()), |row| {
            Ok(FileSummary {
                file_path: path_from_column(row, 0)?,
                last_event_type: event_type_from_column(row, 1)?,
                last_timestamp: row.get(2)?,
                endpoint: row.get(3)?,
                hostname: row.get(4)?,
                username: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Returns every endpoint that has reported an event, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn distinct_endpoints(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT endpoint FROM events WHERE endpoint != '' ORDER BY endpoint",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Returns up to `limit` events not yet forwarded, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn unsynced(&self, limit: usize) -> Result<Vec<StoredEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE synced = 0 ORDER BY id ASC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![to_sql_limit(limit)], stored_event_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Flags the given events as forwarded. Returns the number updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails; no rows are changed in that case.
    pub fn mark_synced(&self, ids: &[i64]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE events SET synced = 1 WHERE id = ?1")?;
            for id in ids {
                updated += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Returns the label for `path`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn classification(&self, path: &Path) -> Result<Option<Classification>, StoreError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT file_path, classification, last_updated, endpoint, hostname, username
                 FROM file_classification WHERE file_path = ?1",
                params![path_to_sql(path)],
                classification_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Returns all labels, most recently updated first, optionally restricted
    /// to the given endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn classifications(&self, endpoints: &[String]) -> Result<Vec<Classification>, StoreError> {
        let mut sql = String::from(
            "SELECT file_path, classification, last_updated, endpoint, hostname, username
             FROM file_classification",
        );
        if !endpoints.is_empty() {
            sql.push_str(&format!(" WHERE endpoint IN ({})", placeholders(endpoints.len())));
        }
        sql.push_str(" ORDER BY last_updated DESC, id DESC");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(endpoints.iter()), classification_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Sets the label for `update.file_path`. A blank label clears it.
    ///
    /// Returns the stored label, or `None` when it was cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_classification(
        &self,
        update: &ClassificationUpdate,
    ) -> Result<Option<Classification>, StoreError> {
        let label = update.classification.trim();
        let path = path_to_sql(&update.file_path);

        if label.is_empty() {
            let conn = self.lock()?;
            conn.execute(
                "DELETE FROM file_classification WHERE file_path = ?1",
                params![path],
            )?;
            return Ok(None);
        }

        let classification = Classification {
            file_path: update.file_path.clone(),
            classification: label.to_string(),
            last_updated: Utc::now(),
            endpoint: update.endpoint.clone(),
            hostname: update.hostname.clone(),
            username: update.username.clone(),
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO file_classification (
                file_path, classification, last_updated, endpoint, hostname, username
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(file_path) DO UPDATE SET
                classification = excluded.classification,
                last_updated = excluded.last_updated,
                endpoint = excluded.endpoint,
                hostname = excluded.hostname,
                username = excluded.username",
            params![
                path,
                classification.classification,
                classification.last_updated,
                classification.endpoint,
                classification.hostname,
                classification.username,
            ],
        )?;

        Ok(Some(classification))
    }
}

impl EventSink for EventStore {
    fn append(&self, event: &FileEvent) -> Result<i64, SinkError> {
        Ok(self.insert(event)?)
    }
}

/// Request to label (or unlabel) a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationUpdate {
    /// Empty when the request named no path.
    #[serde(default, serialize_with = "serialize_path_lossy")]
    pub file_path: PathBuf,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

fn to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[cfg(unix)]
fn path_to_sql(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_to_sql(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

/// Reads a path column. Rows written as TEXT by older databases are
/// accepted too.
fn path_from_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<PathBuf> {
    match row.get_ref(idx)? {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(path_from_bytes(bytes)),
        other => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "file_path".to_string(),
            other.data_type(),
        )),
    }
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

fn event_type_from_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<EventType> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn stored_event_from_row(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    Ok(StoredEvent {
        id: row.get(0)?,
        synced: row.get::<_, i64>(9)? != 0,
        event: FileEvent {
            event_type: event_type_from_column(row, 1)?,
            file_path: path_from_column(row, 2)?,
            timestamp: row.get(3)?,
            endpoint: row.get(4)?,
            hostname: row.get(5)?,
            username: row.get(6)?,
            hash_before: row.get::<_, Option<String>>(7)?.map(Digest::from_hex),
            hash_after: row.get::<_, Option<String>>(8)?.map(Digest::from_hex),
        },
    })
}

fn classification_from_row(row: &Row<'_>) -> rusqlite::Result<Classification> {
    Ok(Classification {
        file_path: path_from_column(row, 0)?,
        classification: row.get(1)?,
        last_updated: row.get(2)?,
        endpoint: row.get(3)?,
        hostname: row.get(4)?,
        username: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Change, Provenance};
    use chrono::TimeZone;

    fn provenance(endpoint: &str) -> Provenance {
        Provenance::new(endpoint.to_string(), "host".to_string(), "user".to_string())
    }

    fn created(path: &str, hash: &str, endpoint: &str) -> FileEvent {
        FileEvent::from_change(
            Change::Created {
                path: PathBuf::from(path),
                hash_after: Digest::from_hex(hash),
            },
            &provenance(endpoint),
            Utc::now(),
        )
    }

    fn modified(path: &str, before: &str, after: &str) -> FileEvent {
        FileEvent::from_change(
            Change::Modified {
                path: PathBuf::from(path),
                hash_before: Digest::from_hex(before),
                hash_after: Digest::from_hex(after),
            },
            &provenance("agent"),
            Utc::now(),
        )
    }

    fn deleted(path: &str, before: &str) -> FileEvent {
        FileEvent::from_change(
            Change::Deleted {
                path: PathBuf::from(path),
                hash_before: Digest::from_hex(before),
            },
            &provenance("agent"),
            Utc::now(),
        )
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let store = EventStore::in_memory().unwrap();
        let first = store.append(&created("/w/a", "h1", "agent")).unwrap();
        let second = store.append(&created("/w/b", "h2", "agent")).unwrap();

        assert!(second > first);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_recent_returns_newest_first_bit_exact() {
        let store = EventStore::in_memory().unwrap();
        let mut appended = vec![
            created("/w/a", "h1", "agent"),
            modified("/w/a", "h1", "h2"),
            deleted("/w/a", "h2"),
        ];
        appended[0].timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        for event in &appended {
            store.append(event).unwrap();
        }

        let recent = store.recent(3).unwrap();
        let events: Vec<FileEvent> = recent.into_iter().map(|s| s.event).collect();
        appended.reverse();

        assert_eq!(events, appended);
    }

    #[test]
    fn test_recent_respects_limit() {
        let store = EventStore::in_memory().unwrap();
        for i in 0..5 {
            store.append(&created(&format!("/w/{i}"), "h", "agent")).unwrap();
        }

        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event.file_path, PathBuf::from("/w/4"));
        assert_eq!(recent[1].event.file_path, PathBuf::from("/w/3"));
    }

    #[test]
    fn test_query_by_type() {
        let store = EventStore::in_memory().unwrap();
        store.append(&created("/w/a", "h1", "agent")).unwrap();
        store.append(&modified("/w/a", "h1", "h2")).unwrap();
        store.append(&deleted("/w/a", "h2")).unwrap();

        let query = EventQuery::recent(10).with_types(vec![EventType::Created, EventType::Deleted]);
        let types: Vec<EventType> = store
            .query(&query)
            .unwrap()
            .into_iter()
            .map(|s| s.event.event_type)
            .collect();

        assert_eq!(types, vec![EventType::Deleted, EventType::Created]);
    }

    #[test]
    fn test_query_search_in_selected_columns() {
        let store = EventStore::in_memory().unwrap();
        store.append(&created("/w/report.txt", "h1", "agent")).unwrap();
        store.append(&created("/w/notes.md", "h2", "report-host")).unwrap();

        let by_path = EventQuery::recent(10).with_search("report", vec![SearchColumn::FilePath]);
        let found = store.query(&by_path).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].event.file_path, PathBuf::from("/w/report.txt"));

        let anywhere = EventQuery::recent(10).with_search("report", Vec::new());
        assert_eq!(store.query(&anywhere).unwrap().len(), 2);
    }

    #[test]
    fn test_blank_search_is_ignored() {
        let store = EventStore::in_memory().unwrap();
        store.append(&created("/w/a", "h1", "agent")).unwrap();

        let query = EventQuery::recent(10).with_search("   ", Vec::new());
        assert_eq!(store.query(&query).unwrap().len(), 1);
    }

    #[test]
    fn test_latest_hashes_skips_deleted_paths() {
        let store = EventStore::in_memory().unwrap();
        store.append(&created("/w/a", "h1", "agent")).unwrap();
        store.append(&modified("/w/a", "h1", "h2")).unwrap();
        store.append(&created("/w/b", "h3", "agent")).unwrap();
        store.append(&deleted("/w/b", "h3")).unwrap();

        let hashes = store.latest_hashes().unwrap();
        assert_eq!(hashes, vec![(PathBuf::from("/w/a"), Digest::from_hex("h2"))]);
    }

    #[test]
    fn test_distinct_files_and_endpoints() {
        let store = EventStore::in_memory().unwrap();
        store.append(&created("/w/a", "h1", "alpha")).unwrap();
        store.append(&created("/w/b", "h2", "beta")).unwrap();
        store.append(&deleted("/w/a", "h1")).unwrap();

        let files = store.distinct_files(&[]).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_path, PathBuf::from("/w/a"));
        assert_eq!(files[0].last_event_type, EventType::Deleted);

        let beta_only = store.distinct_files(&["beta".to_string()]).unwrap();
        assert_eq!(beta_only.len(), 1);
        assert_eq!(beta_only[0].file_path, PathBuf::from("/w/b"));

        assert_eq!(
            store.distinct_endpoints().unwrap(),
            vec!["agent".to_string(), "alpha".to_string(), "beta".to_string()]
        );
    }

    #[test]
    fn test_unsynced_and_mark_synced() {
        let store = EventStore::in_memory().unwrap();
        let a = store.append(&created("/w/a", "h1", "agent")).unwrap();
        let b = store.append(&created("/w/b", "h2", "agent")).unwrap();

        let pending = store.unsynced(10).unwrap();
        assert_eq!(pending.iter().map(|s| s.id).collect::<Vec<_>>(), vec![a, b]);
        assert!(pending.iter().all(|s| !s.synced));

        assert_eq!(store.mark_synced(&[a]).unwrap(), 1);
        let pending = store.unsynced(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b);

        let recent = store.recent(2).unwrap();
        assert!(recent.iter().any(|s| s.id == a && s.synced));
        assert_eq!(store.mark_synced(&[]).unwrap(), 0);
    }

    #[test]
    fn test_classification_upsert_and_clear() {
        let store = EventStore::in_memory().unwrap();
        let mut update = ClassificationUpdate {
            file_path: PathBuf::from("/w/secret.txt"),
            classification: "confidential".to_string(),
            endpoint: Some("agent".to_string()),
            hostname: None,
            username: None,
        };

        let saved = store.set_classification(&update).unwrap().unwrap();
        assert_eq!(saved.classification, "confidential");

        update.classification = " public ".to_string();
        store.set_classification(&update).unwrap();
        let found = store
            .classification(Path::new("/w/secret.txt"))
            .unwrap()
            .unwrap();
        assert_eq!(found.classification, "public");
        assert_eq!(store.classifications(&[]).unwrap().len(), 1);
        assert!(store.classifications(&["other".to_string()]).unwrap().is_empty());

        update.classification = String::new();
        assert!(store.set_classification(&update).unwrap().is_none());
        assert!(store.classification(Path::new("/w/secret.txt")).unwrap().is_none());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/fim_events.db");

        let store = EventStore::open(&path).unwrap();
        store.append(&created("/w/a", "h1", "agent")).unwrap();
        drop(store);

        let reopened = EventStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_round_trip_exactly() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let bad = PathBuf::from(OsStr::from_bytes(b"/w/bad\xFFname"));
        let store = EventStore::in_memory().unwrap();
        let mut event = created("/w/placeholder", "h1", "agent");
        event.file_path = bad.clone();
        store.append(&event).unwrap();

        assert_eq!(store.recent(1).unwrap()[0].event, event);
        assert_eq!(store.latest_hashes().unwrap(), vec![(bad, Digest::from_hex("h1"))]);

        let mut first = created("/w/placeholder", "h2", "agent");
        first.file_path = PathBuf::from(OsStr::from_bytes(b"/w/a\xFF"));
        let mut second = created("/w/placeholder", "h3", "agent");
        second.file_path = PathBuf::from(OsStr::from_bytes(b"/w/a\xFE"));
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let files: Vec<PathBuf> = store
            .distinct_files(&[])
            .unwrap()
            .into_iter()
            .map(|f| f.file_path)
            .collect();
        assert_eq!(files.len(), 3);
        assert!(files.contains(&first.file_path));
        assert!(files.contains(&second.file_path));
    }

    #[test]
    fn test_search_matches_blob_paths() {
        let store = EventStore::in_memory().unwrap();
        store.append(&created("/w/payroll.csv", "h1", "agent")).unwrap();

        let query = EventQuery::recent(10).with_search("payroll", vec![SearchColumn::FilePath]);
        assert_eq!(store.query(&query).unwrap().len(), 1);
    }

    #[test]
    fn test_append_recovers_after_failed_write() {
        let store = EventStore::in_memory().unwrap();
        let first = store.append(&created("/w/a", "h1", "agent")).unwrap();

        store
            .lock()
            .unwrap()
            .execute_batch("ALTER TABLE events RENAME TO events_away")
            .unwrap();
        let err = store.append(&created("/w/b", "h2", "agent")).unwrap_err();
        assert!(matches!(err, SinkError::Write(_)), "unexpected error: {err:?}");

        store
            .lock()
            .unwrap()
            .execute_batch("ALTER TABLE events_away RENAME TO events")
            .unwrap();
        let next = store.append(&created("/w/c", "h3", "agent")).unwrap();

        assert_eq!(next, first + 1);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_search_column_parse() {
        assert_eq!(SearchColumn::parse("file_path"), Some(SearchColumn::FilePath));
        assert_eq!(SearchColumn::parse(" HOSTNAME "), Some(SearchColumn::Hostname));
        assert_eq!(SearchColumn::parse("hash_after"), None);
    }
}
