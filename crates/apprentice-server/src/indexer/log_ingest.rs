// crates/apprentice-server/src/indexer/log_ingest.rs
// Append-only JSON-lines tailing with durable line cursors
//
// One cursor row per source in indexer_state. Lines that fail to parse are
// logged and skipped; the cursor advances past them so they are never
// retried.

use crate::db::{self, DatabasePool, EventRow};
use crate::redact::redact;
use crate::utils::parse_rfc3339;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Durable position within one log file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogCursor {
    pub last_processed_line: u64,
    pub last_processed_timestamp: Option<String>,
}

/// Tail one event log, inserting new events. Returns the number of rows
/// actually inserted (replayed ids are no-ops).
pub async fn process_log(
    pool: &Arc<DatabasePool>,
    path: &Path,
    source_key: &str,
) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }

    let cursor = load_cursor(pool, source_key).await?;

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open event log {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut events = Vec::new();
    let mut lines_seen = 0u64;
    let mut last_timestamp = cursor.last_processed_timestamp.clone();

    for (index, line) in reader.lines().enumerate() {
        let line_no = index as u64 + 1;
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(source = source_key, line = line_no, "Unreadable log line: {}", e);
                lines_seen = line_no;
                continue;
            }
        };
        lines_seen = line_no;
        if line_no <= cursor.last_processed_line || line.trim().is_empty() {
            continue;
        }

        match parse_event_line(&line) {
            Ok(event) => {
                last_timestamp = Some(event.timestamp.clone());
                events.push(event);
            }
            Err(e) => {
                tracing::warn!(
                    source = source_key,
                    line = line_no,
                    "Skipping malformed event line: {}",
                    e
                );
            }
        }
    }

    let inserted = {
        let source_key = source_key.to_string();
        let new_cursor = LogCursor {
            last_processed_line: lines_seen.max(cursor.last_processed_line),
            last_processed_timestamp: last_timestamp,
        };
        pool.interact(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut inserted = 0usize;
            for event in &events {
                if db::insert_event_sync(&tx, event)? {
                    inserted += 1;
                }
            }
            db::set_state_sync(&tx, &source_key, &serde_json::to_value(&new_cursor)?)?;
            tx.commit()?;
            Ok(inserted)
        })
        .await?
    };

    Ok(inserted)
}

/// Parse one log line into a redacted event.
///
/// The message and `metadata.shell.output_preview` are rewritten through
/// the redaction transform before insert.
fn parse_event_line(line: &str) -> Result<EventRow> {
    let mut event: EventRow = serde_json::from_str(line).context("not a valid event object")?;
    if event.id.is_empty() {
        anyhow::bail!("event id is empty");
    }
    if parse_rfc3339(&event.timestamp).is_none() {
        anyhow::bail!("timestamp {:?} is not RFC 3339", event.timestamp);
    }

    event.message = redact(&event.message);
    if let Some(preview) = event
        .metadata
        .get_mut("shell")
        .and_then(|s| s.get_mut("output_preview"))
    {
        if let Some(text) = preview.as_str() {
            *preview = serde_json::Value::String(redact(text));
        }
    }
    Ok(event)
}

async fn load_cursor(pool: &Arc<DatabasePool>, source_key: &str) -> Result<LogCursor> {
    let source_key = source_key.to_string();
    let value = pool
        .interact(move |conn| Ok(db::get_state_sync(conn, &source_key)?))
        .await?;
    Ok(value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn event_line(id: &str, ts: &str, message: &str) -> String {
        serde_json::json!({
            "id": id,
            "timestamp": ts,
            "message": message,
            "metadata": {"shell": {"output_preview": "ok"}}
        })
        .to_string()
    }

    async fn count_events(pool: &Arc<DatabasePool>) -> i64 {
        pool.interact(|conn| {
            conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
                .map_err(Into::into)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_is_zero() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let n = process_log(&pool, Path::new("/definitely/not/here.log"), "bash")
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_resume_after_appends_and_corruption() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("bash.log");
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());

        // first batch: 5 lines
        {
            let mut f = std::fs::File::create(&log).unwrap();
            for i in 0..5 {
                writeln!(f, "{}", event_line(&format!("e{i}"), "2024-06-01T10:00:00Z", "git status")).unwrap();
            }
        }
        assert_eq!(process_log(&pool, &log, "bash").await.unwrap(), 5);
        assert_eq!(count_events(&pool).await, 5);

        // append 3 more, one corrupted
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
            writeln!(f, "{}", event_line("e5", "2024-06-01T10:05:00Z", "ls")).unwrap();
            writeln!(f, "this is not json").unwrap();
            writeln!(f, "{}", event_line("e7", "2024-06-01T10:07:00Z", "pwd")).unwrap();
        }
        assert_eq!(process_log(&pool, &log, "bash").await.unwrap(), 2);
        assert_eq!(count_events(&pool).await, 7);

        // the cursor has advanced past the corrupt line: nothing re-indexes
        assert_eq!(process_log(&pool, &log, "bash").await.unwrap(), 0);

        let cursor: LogCursor = pool
            .interact(|conn| Ok(db::get_state_sync(conn, "bash")?))
            .await
            .unwrap()
            .map(|v| serde_json::from_value(v).unwrap())
            .unwrap();
        assert_eq!(cursor.last_processed_line, 8);
    }

    #[tokio::test]
    async fn test_blank_lines_and_replayed_ids_skipped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("chat.log");
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());

        std::fs::write(
            &log,
            format!(
                "{}\n\n{}\n",
                event_line("dup", "2024-06-01T10:00:00Z", "first"),
                event_line("dup", "2024-06-01T10:01:00Z", "replayed id"),
            ),
        )
        .unwrap();

        assert_eq!(process_log(&pool, &log, "chat").await.unwrap(), 1);
        assert_eq!(count_events(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_invalid_timestamp_is_skipped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("bash.log");
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());

        std::fs::write(
            &log,
            format!(
                "{}\n{}\n",
                serde_json::json!({"id": "bad", "timestamp": "yesterday", "message": "x"}),
                event_line("good", "2024-06-01T10:00:00Z", "y"),
            ),
        )
        .unwrap();

        assert_eq!(process_log(&pool, &log, "bash").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_redaction_applied_to_message_and_preview() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("bash.log");
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());

        let line = serde_json::json!({
            "id": "e1",
            "timestamp": "2024-06-01T10:00:00Z",
            "message": "export OPENAI_API_KEY=sk-abcdefghijklmnop1234",
            "metadata": {"shell": {"output_preview": "PASSWORD=hunter2 done"}}
        });
        std::fs::write(&log, format!("{line}\n")).unwrap();

        process_log(&pool, &log, "bash").await.unwrap();
        let event = pool
            .interact(|conn| Ok(db::get_event_sync(conn, "e1")?))
            .await
            .unwrap()
            .unwrap();
        assert!(!event.message.contains("sk-abcdefghijklmnop1234"));
        let preview = event.metadata["shell"]["output_preview"].as_str().unwrap();
        assert!(!preview.contains("hunter2"));
    }
}
