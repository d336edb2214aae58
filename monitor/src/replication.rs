//! Optional replication of recorded events to a secondary store.
//!
//! The [`Replicator`] sits downstream of the local [`EventStore`]: it reads
//! events that have not been forwarded yet, posts them as a JSON array to
//! `<url>/events`, and flags them as synced once the replica answers with a
//! success status. The watcher loop never waits on it.
//!
//! # Retry behavior
//!
//! Server errors, timeouts and connection failures are retried with
//! exponential backoff up to the configured retry limit. Other client errors
//! fail immediately. Either way the events stay unsynced locally and are
//! offered again on the next cycle, so nothing is lost.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ReplicationConfig;
use crate::retry::RetryPolicy;
use crate::store::{EventStore, StoreError};
use crate::types::{EventType, StoredEvent};

/// Maximum number of events per request.
const MAX_BATCH_SIZE: usize = 500;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Initial delay before retrying a failed request.
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Cap on the delay between retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Time allowed for the final sync on shutdown.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Reading or flagging local events failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Replica returned an error status.
    #[error("server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Maximum retry attempts exceeded.
    #[error("max retries exceeded after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },
}

/// Document shape accepted by the replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaDocument {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub path: String,
    /// Content after the change, absent for deletions.
    pub content_hash: Option<String>,
    pub hash_before: Option<String>,
    pub hash_after: Option<String>,
    pub endpoint: String,
    pub hostname: String,
    pub username: String,
    pub agent_id: String,
}

impl ReplicaDocument {
    #[must_use]
    pub fn from_stored(stored: &StoredEvent, agent_id: &str) -> Self {
        let event = &stored.event;
        let hash_after = event.hash_after.as_ref().map(|d| d.as_str().to_string());
        Self {
            timestamp: event.timestamp,
            event_type: event.event_type,
            path: event.file_path.to_string_lossy().into_owned(),
            content_hash: hash_after.clone(),
            hash_before: event.hash_before.as_ref().map(|d| d.as_str().to_string()),
            hash_after,
            endpoint: event.endpoint.clone(),
            hostname: event.hostname.clone(),
            username: event.username.clone(),
            agent_id: agent_id.to_string(),
        }
    }
}

/// Forwards unsynced events from the local store to the replica.
pub struct Replicator {
    store: EventStore,
    client: Client,
    events_url: String,
    agent_id: String,
    interval: Duration,
    retry: RetryPolicy,
}

impl Replicator {
    /// Creates a replicator for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Http`] if the HTTP client cannot be built.
    pub fn new(
        config: &ReplicationConfig,
        agent_id: impl Into<String>,
        store: EventStore,
    ) -> Result<Self, ReplicationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .pool_max_idle_per_host(5)
            .build()?;

        Ok(Self {
            store,
            client,
            events_url: format!("{}/events", config.url.trim_end_matches('/')),
            agent_id: agent_id.into(),
            interval: Duration::from_secs(config.batch_interval_secs.max(1)),
            retry: RetryPolicy::new(
                u32::from(config.retry_limit),
                INITIAL_RETRY_DELAY,
                MAX_RETRY_DELAY,
            ),
        })
    }

    /// Overrides the retry delays; the attempt count is kept.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry.with_max_attempts(self.retry.max_attempts);
        self
    }

    /// Forwards every unsynced event, in id order. Returns how many were synced.
    ///
    /// # Errors
    ///
    /// Returns the error of the first batch that could not be delivered;
    /// batches delivered before it stay synced.
    pub async fn sync_once(&self) -> Result<usize, ReplicationError> {
        let mut synced = 0;

        loop {
            let store = self.store.clone();
            let batch =
                tokio::task::spawn_blocking(move || store.unsynced(MAX_BATCH_SIZE)).await??;
            if batch.is_empty() {
                break;
            }

            let documents: Vec<ReplicaDocument> = batch
                .iter()
                .map(|stored| ReplicaDocument::from_stored(stored, &self.agent_id))
                .collect();
            self.post_batch(&documents).await?;

            let ids: Vec<i64> = batch.iter().map(|stored| stored.id).collect();
            let store = self.store.clone();
            tokio::task::spawn_blocking(move || store.mark_synced(&ids)).await??;

            synced += batch.len();
            if batch.len() < MAX_BATCH_SIZE {
                break;
            }
        }

        if synced > 0 {
            info!(events = synced, "Events replicated");
        }
        Ok(synced)
    }

    /// Runs replication cycles every batch interval until `shutdown` resolves,
    /// then makes one last bounded attempt. Returns the total synced.
    pub async fn run<F>(self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut total: u64 = 0;

        info!(url = %self.events_url, interval_secs = self.interval.as_secs(), "Replication started");

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => match self.sync_once().await {
                    Ok(n) => total += n as u64,
                    Err(e) => warn!(error = %e, "Replication cycle failed, events stay queued"),
                },
            }
        }

        match tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, self.sync_once()).await {
            Ok(Ok(n)) => total += n as u64,
            Ok(Err(e)) => error!(error = %e, "Failed to replicate during shutdown"),
            Err(_) => error!("Timeout while replicating during shutdown"),
        }

        info!(total, "Replication stopped");
        total
    }

    async fn post_batch(&self, documents: &[ReplicaDocument]) -> Result<(), ReplicationError> {
        let max_attempts = self.retry.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(
                url = %self.events_url,
                events = documents.len(),
                attempt,
                "Sending replication batch"
            );

            let retryable = match self.client.post(&self.events_url).json(documents).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let message = response.text().await.unwrap_or_default();
                    if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                        return Err(ReplicationError::ServerError {
                            status: status.as_u16(),
                            message,
                        });
                    }
                    warn!(status = status.as_u16(), message = %message, "Replica error, will retry");
                    if attempt >= max_attempts {
                        return Err(ReplicationError::ServerError {
                            status: status.as_u16(),
                            message,
                        });
                    }
                    true
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!(error = %e, "Connection error, will retry");
                    if attempt >= max_attempts {
                        return Err(ReplicationError::MaxRetriesExceeded { attempts: attempt });
                    }
                    true
                }
                Err(e) => return Err(ReplicationError::Http(e)),
            };

            if retryable {
                let delay = self.retry.delay_for(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "Waiting before retry");
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Change, Digest, FileEvent, Provenance};
    use std::path::PathBuf;

    fn stored(change: Change) -> StoredEvent {
        let provenance = Provenance::new("lab".into(), "box".into(), "ana".into());
        StoredEvent {
            id: 7,
            synced: false,
            event: FileEvent::from_change(change, &provenance, Utc::now()),
        }
    }

    #[test]
    fn test_document_for_modification() {
        let doc = ReplicaDocument::from_stored(
            &stored(Change::Modified {
                path: PathBuf::from("/w/a.txt"),
                hash_before: Digest::from_hex("aa"),
                hash_after: Digest::from_hex("bb"),
            }),
            "agent-1",
        );

        assert_eq!(doc.path, "/w/a.txt");
        assert_eq!(doc.content_hash.as_deref(), Some("bb"));
        assert_eq!(doc.hash_before.as_deref(), Some("aa"));
        assert_eq!(doc.agent_id, "agent-1");
    }

    #[test]
    fn test_document_for_deletion_has_no_content_hash() {
        let doc = ReplicaDocument::from_stored(
            &stored(Change::Deleted {
                path: PathBuf::from("/w/a.txt"),
                hash_before: Digest::from_hex("aa"),
            }),
            "agent-1",
        );

        assert!(doc.content_hash.is_none());
        assert!(doc.hash_after.is_none());

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["event_type"], "DELETED");
        assert!(json["content_hash"].is_null());
    }

    #[test]
    fn test_events_url_is_normalized() {
        let config = ReplicationConfig {
            url: "http://replica.local/".to_string(),
            batch_interval_secs: 10,
            retry_limit: 4,
        };
        let replicator =
            Replicator::new(&config, "agent", EventStore::in_memory().unwrap()).unwrap();

        assert_eq!(replicator.events_url, "http://replica.local/events");
        assert_eq!(replicator.retry.max_attempts, 4);
        assert_eq!(
            replicator
                .with_retry_policy(RetryPolicy::fast_for_tests())
                .retry
                .max_attempts,
            4
        );
    }

    #[test]
    fn test_replication_error_display() {
        let err = ReplicationError::ServerError {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "server error: 503 - unavailable");

        let err = ReplicationError::MaxRetriesExceeded { attempts: 3 };
        assert_eq!(err.to_string(), "max retries exceeded after 3 attempts");
    }
}
