//! Console alerts for emitted events.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::pipeline::EmittedEvent;
use crate::types::FileEvent;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats one alert line (without trailing newline).
///
/// ```
/// use std::path::PathBuf;
/// use chrono::{TimeZone, Utc};
/// use fim_monitor::alert::format_alert;
/// use fim_monitor::types::{Change, Digest, FileEvent, Provenance};
///
/// let change = Change::Created { path: PathBuf::from("/w/a.txt"), hash_after: Digest::from_hex("aa") };
/// let provenance = Provenance::new("lab".into(), "box".into(), "ana".into());
/// let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
/// let event = FileEvent::from_change(change, &provenance, at);
///
/// assert_eq!(
///     format_alert(&event),
///     "[ALERT] 2024-05-01 12:00:00 CREATED /w/a.txt endpoint=lab hostname=box user=ana"
/// );
/// ```
#[must_use]
pub fn format_alert(event: &FileEvent) -> String {
    format!(
        "[ALERT] {} {} {} endpoint={} hostname={} user={}",
        event.timestamp.format(TIMESTAMP_FORMAT),
        event.event_type,
        event.file_path.display(),
        event.endpoint,
        event.hostname,
        event.username
    )
}

/// Writes an alert line for every event received, in order, until the
/// channel closes. Returns the number of lines written.
///
/// # Errors
///
/// Returns the first write error.
pub async fn run_alerts<W>(
    mut receiver: mpsc::Receiver<EmittedEvent>,
    mut writer: W,
) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(emitted) = receiver.recv().await {
        let mut line = format_alert(&emitted.event);
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        written += 1;
    }
    debug!(written, "Alert channel closed");
    Ok(written)
}
