//! HTTP route handlers for the FIM dashboard API.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `GET /health` - Health check endpoint
//! - `GET /api/status` - Monitor status and event count
//! - `GET /api/events` - Recent events with type and text filters
//! - `GET /api/files` - Latest event per file, with its classification
//! - `GET /api/endpoints` - Endpoints that have reported events
//! - `GET /api/classifications` - File classification labels
//! - `POST /api/classifications` - Set or clear classification labels
//!
//! Events are never modified through this API.
//!
//! # Example
//!
//! ```rust,no_run
//! use fim_monitor::store::EventStore;
//! use fim_server::config::Config;
//! use fim_server::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let store = EventStore::open(&config.db_path).expect("failed to open store");
//!     let app = create_router(AppState::new(config, store));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    routing::get,
    Json, Router,
};
use fim_monitor::store::{
    Classification, ClassificationUpdate, EventQuery, EventStore, FileSummary, SearchColumn,
    StoreError,
};
use fim_monitor::types::{EventType, StoredEvent};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, ServerError};

// ============================================================================
// Constants
// ============================================================================

/// Events returned when no limit is given.
const DEFAULT_EVENT_LIMIT: usize = 100;

/// Largest accepted event limit.
const MAX_EVENT_LIMIT: usize = 1000;

/// Maximum body size for classification updates (1 MB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Event store shared with the monitor.
    pub store: EventStore,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, store: EventStore) -> Self {
        Self {
            config: Arc::new(config),
            store,
            start_time: Instant::now(),
        }
    }

    /// Runs a store operation on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&EventStore) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("store", &"<EventStore>")
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/status", get(get_status))
        .route("/api/events", get(get_events))
        .route("/api/files", get(get_files))
        .route("/api/endpoints", get(get_endpoints))
        .route(
            "/api/classifications",
            get(get_classifications).post(post_classifications),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Query parsing
// ============================================================================

/// Splits a comma-separated parameter, dropping blanks.
fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `types`; `all` (or nothing) means every type.
fn parse_types(raw: Option<&str>) -> Result<Vec<EventType>> {
    let names = split_list(raw);
    if names.iter().any(|n| n.eq_ignore_ascii_case("all")) {
        return Ok(Vec::new());
    }
    names
        .iter()
        .map(|n| {
            n.parse::<EventType>()
                .map_err(|e| ServerError::validation(e.to_string()))
        })
        .collect()
}

/// Parses `columns`; `all` (or nothing) means every searchable column.
fn parse_columns(raw: Option<&str>) -> Result<Vec<SearchColumn>> {
    let names = split_list(raw);
    if names.iter().any(|n| n.eq_ignore_ascii_case("all")) {
        return Ok(Vec::new());
    }
    names
        .iter()
        .map(|n| {
            SearchColumn::parse(n)
                .ok_or_else(|| ServerError::validation(format!("unknown search column: {n}")))
        })
        .collect()
}

// ============================================================================
// GET /health
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
}

async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// GET /api/status
// ============================================================================

/// Status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub event_count: u64,
    pub replication_enabled: bool,
    pub uptime_seconds: u64,
}

async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>> {
    let event_count = state.with_store(|store| store.count()).await?;

    Ok(Json(StatusResponse {
        status: "running".to_string(),
        event_count,
        replication_enabled: state.config.replication_enabled,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    }))
}

// ============================================================================
// GET /api/events
// ============================================================================

/// Query parameters for `GET /api/events`.
#[derive(Debug, Default, Deserialize)]
pub struct EventsParams {
    pub limit: Option<usize>,
    /// Comma-separated event types, or `all`.
    pub types: Option<String>,
    /// Case-insensitive substring to look for.
    pub search: Option<String>,
    /// Comma-separated columns to search, or `all`.
    pub columns: Option<String>,
}

/// Most recent events, newest first.
async fn get_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Result<Json<Vec<StoredEvent>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT);

    let mut query = EventQuery::recent(limit).with_types(parse_types(params.types.as_deref())?);
    let columns = parse_columns(params.columns.as_deref())?;
    if let Some(search) = params.search.as_deref().map(str::trim) {
        if !search.is_empty() {
            query = query.with_search(search, columns);
        }
    }

    debug!(?query, "Querying events");
    let events = state.with_store(move |store| store.query(&query)).await?;
    Ok(Json(events))
}

// ============================================================================
// GET /api/files
// ============================================================================

/// Query parameters for `GET /api/files`.
#[derive(Debug, Default, Deserialize)]
pub struct FilesParams {
    /// Comma-separated endpoint names.
    pub endpoints: Option<String>,
    /// Case-insensitive substring of the file path.
    pub search: Option<String>,
}

/// A file's latest event together with its label.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(flatten)]
    pub summary: FileSummary,
    pub classification: Option<String>,
}

async fn get_files(
    State(state): State<AppState>,
    Query(params): Query<FilesParams>,
) -> Result<Json<Vec<FileEntry>>> {
    let endpoints = split_list(params.endpoints.as_deref());
    let search = params
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let (files, labels) = state
        .with_store(move |store| {
            Ok((
                store.distinct_files(&endpoints)?,
                store.classifications(&endpoints)?,
            ))
        })
        .await?;

    let mut labels: HashMap<_, _> = labels
        .into_iter()
        .map(|c| (c.file_path, c.classification))
        .collect();

    let entries = files
        .into_iter()
        .filter(|f| match &search {
            Some(needle) => f
                .file_path
                .to_string_lossy()
                .to_lowercase()
                .contains(needle.as_str()),
            None => true,
        })
        .map(|summary| FileEntry {
            classification: labels.remove(&summary.file_path),
            summary,
        })
        .collect();

    Ok(Json(entries))
}

// ============================================================================
// GET /api/endpoints
// ============================================================================

async fn get_endpoints(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    let endpoints = state.with_store(|store| store.distinct_endpoints()).await?;
    Ok(Json(endpoints))
}

// ============================================================================
// /api/classifications
// ============================================================================

/// Query parameters for `GET /api/classifications`.
#[derive(Debug, Default, Deserialize)]
pub struct ClassificationsParams {
    /// Comma-separated endpoint names.
    pub endpoints: Option<String>,
}

async fn get_classifications(
    State(state): State<AppState>,
    Query(params): Query<ClassificationsParams>,
) -> Result<Json<Vec<Classification>>> {
    let endpoints = split_list(params.endpoints.as_deref());
    let labels = state
        .with_store(move |store| store.classifications(&endpoints))
        .await?;
    Ok(Json(labels))
}

/// Request body: one update or a batch of updates.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassificationPayload {
    Single(ClassificationUpdate),
    Batch(Vec<ClassificationUpdate>),
}

/// Outcome of `POST /api/classifications`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub success: bool,
    /// Labels set or replaced.
    pub saved: usize,
    /// Labels removed by a blank classification.
    pub cleared: usize,
    pub message: String,
}

/// Sets or clears labels.
///
/// A single update without a `file_path` is rejected with 400; in a batch
/// such entries are skipped.
async fn post_classifications(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ClassificationResponse>> {
    let payload: ClassificationPayload = serde_json::from_slice(&body)
        .map_err(|e| ServerError::validation(format!("invalid classification request: {e}")))?;

    let updates: Vec<ClassificationUpdate> = match payload {
        ClassificationPayload::Single(update) => {
            if update.file_path.as_os_str().is_empty() {
                return Err(ServerError::validation("missing file_path"));
            }
            vec![update]
        }
        ClassificationPayload::Batch(updates) => updates
            .into_iter()
            .filter(|u| !u.file_path.as_os_str().is_empty())
            .collect(),
    };

    let (saved, cleared) = state
        .with_store(move |store| {
            let mut saved = 0usize;
            let mut cleared = 0usize;
            for update in &updates {
                match store.set_classification(update)? {
                    Some(_) => saved += 1,
                    None => cleared += 1,
                }
            }
            Ok((saved, cleared))
        })
        .await?;

    info!(saved, cleared, "Classifications updated");

    Ok(Json(ClassificationResponse {
        success: true,
        saved,
        cleared,
        message: format!("saved {saved} classification(s), cleared {cleared}"),
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use fim_monitor::types::{Change, Digest, FileEvent, Provenance};
    use std::path::PathBuf;
    use tower::ServiceExt;

    use crate::error::ErrorResponse;

    fn test_config() -> Config {
        Config {
            port: 8080,
            db_path: PathBuf::from(":memory:"),
            replication_enabled: false,
        }
    }

    fn record(store: &EventStore, change: Change, endpoint: &str) {
        let provenance = Provenance::new(endpoint.into(), "host".into(), "user".into());
        store
            .insert(&FileEvent::from_change(change, &provenance, Utc::now()))
            .unwrap();
    }

    /// Store with a created+modified report.txt on `alpha` and a deleted
    /// notes.md on `beta`.
    fn seeded_store() -> EventStore {
        let store = EventStore::in_memory().unwrap();
        record(
            &store,
            Change::Created {
                path: PathBuf::from("/w/report.txt"),
                hash_after: Digest::from_hex("a1"),
            },
            "alpha",
        );
        record(
            &store,
            Change::Modified {
                path: PathBuf::from("/w/report.txt"),
                hash_before: Digest::from_hex("a1"),
                hash_after: Digest::from_hex("a2"),
            },
            "alpha",
        );
        record(
            &store,
            Change::Deleted {
                path: PathBuf::from("/w/notes.md"),
                hash_before: Digest::from_hex("b1"),
            },
            "beta",
        );
        store
    }

    fn app(store: EventStore) -> Router {
        create_router(AppState::new(test_config(), store))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(app: Router, uri: &str) -> (StatusCode, T) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> axum::response::Response {
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    // ========================================================================
    // Health and status
    // ========================================================================

    #[tokio::test]
    async fn health_returns_ok_status() {
        let (status, health): (_, HealthResponse) =
            get_json(app(EventStore::in_memory().unwrap()), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn status_reports_event_count() {
        let (status, body): (_, StatusResponse) = get_json(app(seeded_store()), "/api/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "running");
        assert_eq!(body.event_count, 3);
        assert!(!body.replication_enabled);
    }

    // ========================================================================
    // GET /api/events
    // ========================================================================

    #[tokio::test]
    async fn events_are_newest_first() {
        let (status, events): (_, Vec<StoredEvent>) =
            get_json(app(seeded_store()), "/api/events").await;

        assert_eq!(status, StatusCode::OK);
        let types: Vec<EventType> = events.iter().map(|e| e.event.event_type).collect();
        assert_eq!(
            types,
            vec![EventType::Deleted, EventType::Modified, EventType::Created]
        );
    }

    #[tokio::test]
    async fn events_respect_limit() {
        let (_, events): (_, Vec<StoredEvent>) =
            get_json(app(seeded_store()), "/api/events?limit=1").await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.event_type, EventType::Deleted);
    }

    #[tokio::test]
    async fn events_filter_by_types() {
        let (_, events): (_, Vec<StoredEvent>) =
            get_json(app(seeded_store()), "/api/events?types=created,deleted").await;

        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.event.event_type != EventType::Modified));
    }

    #[tokio::test]
    async fn events_types_all_disables_filter() {
        let (_, events): (_, Vec<StoredEvent>) =
            get_json(app(seeded_store()), "/api/events?types=all,created").await;

        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn events_search_in_selected_columns() {
        let (_, by_endpoint): (_, Vec<StoredEvent>) =
            get_json(app(seeded_store()), "/api/events?search=BETA&columns=endpoint").await;
        assert_eq!(by_endpoint.len(), 1);
        assert_eq!(by_endpoint[0].event.file_path, PathBuf::from("/w/notes.md"));

        let (_, by_path): (_, Vec<StoredEvent>) =
            get_json(app(seeded_store()), "/api/events?search=beta&columns=file_path").await;
        assert!(by_path.is_empty());
    }

    #[tokio::test]
    async fn events_reject_unknown_type() {
        let (status, body): (_, ErrorResponse) =
            get_json(app(seeded_store()), "/api/events?types=renamed").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code.as_deref(), Some("invalid_request"));
    }

    #[tokio::test]
    async fn events_reject_unknown_column() {
        let (status, _): (_, ErrorResponse) =
            get_json(app(seeded_store()), "/api/events?search=x&columns=content").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // ========================================================================
    // GET /api/files and /api/endpoints
    // ========================================================================

    #[tokio::test]
    async fn files_list_latest_event_per_path() {
        let (status, files): (_, Vec<FileEntry>) = get_json(app(seeded_store()), "/api/files").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(files.len(), 2);
        let report = files
            .iter()
            .find(|f| f.summary.file_path == PathBuf::from("/w/report.txt"))
            .unwrap();
        assert_eq!(report.summary.last_event_type, EventType::Modified);
        assert!(report.classification.is_none());
    }

    #[tokio::test]
    async fn files_filter_by_endpoint_and_search() {
        let (_, files): (_, Vec<FileEntry>) =
            get_json(app(seeded_store()), "/api/files?endpoints=alpha").await;
        assert_eq!(files.len(), 1);

        let (_, files): (_, Vec<FileEntry>) =
            get_json(app(seeded_store()), "/api/files?search=NOTES").await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].summary.endpoint, "beta");
    }

    #[tokio::test]
    async fn endpoints_are_distinct() {
        let (_, endpoints): (_, Vec<String>) =
            get_json(app(seeded_store()), "/api/endpoints").await;

        assert_eq!(endpoints, vec!["alpha".to_string(), "beta".to_string()]);
    }

    // ========================================================================
    // /api/classifications
    // ========================================================================

    #[tokio::test]
    async fn classification_roundtrip_through_files() {
        let store = seeded_store();

        let response = post_json(
            app(store.clone()),
            "/api/classifications",
            r#"{"file_path":"/w/report.txt","classification":"Confidential","endpoint":"alpha"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let (_, files): (_, Vec<FileEntry>) = get_json(app(store.clone()), "/api/files").await;
        let report = files
            .iter()
            .find(|f| f.summary.file_path == PathBuf::from("/w/report.txt"))
            .unwrap();
        assert_eq!(report.classification.as_deref(), Some("Confidential"));

        let (_, labels): (_, Vec<Classification>) =
            get_json(app(store), "/api/classifications?endpoints=alpha").await;
        assert_eq!(labels.len(), 1);
    }

    #[tokio::test]
    async fn blank_classification_clears_label() {
        let store = seeded_store();
        post_json(
            app(store.clone()),
            "/api/classifications",
            r#"{"file_path":"/w/report.txt","classification":"Internal"}"#,
        )
        .await;

        let response = post_json(
            app(store.clone()),
            "/api/classifications",
            r#"{"file_path":"/w/report.txt","classification":"  "}"#,
        )
        .await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let result: ClassificationResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(result.cleared, 1);
        assert!(store.classifications(&[]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_classification_skips_entries_without_path() {
        let store = seeded_store();

        let response = post_json(
            app(store.clone()),
            "/api/classifications",
            r#"[{"file_path":"/w/report.txt","classification":"Public"},
                {"file_path":"","classification":"Secret"},
                {"classification":"Internal"},
                {"file_path":"/w/notes.md","classification":"Secret"}]"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let result: ClassificationResponse = serde_json::from_slice(&body).unwrap();

        assert!(result.success);
        assert_eq!(result.saved, 2);
        assert_eq!(store.classifications(&[]).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn classification_without_path_is_rejected() {
        let response = post_json(
            app(seeded_store()),
            "/api/classifications",
            r#"{"file_path":"","classification":"Secret"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = post_json(
            app(seeded_store()),
            "/api/classifications",
            r#"{"classification":"Secret"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn events_are_not_writable() {
        let response = post_json(app(seeded_store()), "/api/events", "[]").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn parse_helpers() {
        assert!(parse_types(None).unwrap().is_empty());
        assert_eq!(
            parse_types(Some("Created, modified")).unwrap(),
            vec![EventType::Created, EventType::Modified]
        );
        assert!(parse_columns(Some("all")).unwrap().is_empty());
        assert_eq!(
            parse_columns(Some("file_path,hostname")).unwrap(),
            vec![SearchColumn::FilePath, SearchColumn::Hostname]
        );
        assert_eq!(split_list(Some(" a,, b ")), vec!["a", "b"]);
    }
}
