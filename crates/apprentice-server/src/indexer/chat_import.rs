// crates/apprentice-server/src/indexer/chat_import.rs
// Chat session import: adapters discover sessions, the driver flattens
// them into events and appends to the chat log
//
// All chat ingest goes through the chat log file; the tailer in
// log_ingest.rs is the only path that writes chat events to the store.

use crate::config::ChatImportConfig;
use crate::db::{self, DatabasePool};
use crate::redact::redact;
use crate::utils::{now_rfc3339, parse_rfc3339, truncate_at_boundary};
use anyhow::{Context as _, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Cursor key in indexer_state for all chat imports.
const CHAT_IMPORT_STATE_KEY: &str = "chat.import";

/// A parsed chat session ready to flatten into events.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub session_id: String,
    pub created_at: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub text: String,
    /// Raw timestamp as found in the source: RFC 3339, epoch millis, or a
    /// `c`-prefixed encoded millisecond value (numeric or string).
    pub timestamp: Option<Value>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub output: String,
}

/// A source of chat sessions. One built-in implementation (Copilot JSON
/// session files); more can be registered at startup.
pub trait ChatSourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;
    fn source_name(&self) -> &str;
    fn discover_sessions(&self) -> Result<Vec<PathBuf>>;
    fn import_session(&self, path: &Path) -> Result<Option<ChatSession>>;
    fn get_session_modified_time(&self, path: &Path) -> Option<String>;
}

/// Resolve a message timestamp to RFC 3339.
///
/// Accepts epoch-millisecond numbers, `c`-prefixed encoded millisecond
/// strings or numbers-as-strings, and plain RFC 3339 strings. Anything
/// unparseable falls back to the session's createdAt.
pub fn resolve_message_timestamp(raw: Option<&Value>, session_created_at: Option<&str>) -> String {
    let fallback = || {
        session_created_at
            .and_then(parse_rfc3339)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(now_rfc3339)
    };

    let Some(raw) = raw else {
        return fallback();
    };

    let from_millis = |ms: i64| {
        DateTime::<Utc>::from_timestamp_millis(ms)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    };

    match raw {
        Value::Number(n) => n
            .as_i64()
            .and_then(from_millis)
            .unwrap_or_else(fallback),
        Value::String(s) => {
            let stripped = s.strip_prefix('c').unwrap_or(s);
            if let Ok(ms) = stripped.parse::<i64>() {
                return from_millis(ms).unwrap_or_else(fallback);
            }
            parse_rfc3339(s)
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_else(fallback)
        }
        _ => fallback(),
    }
}

/// Flatten one session into event-log lines, sorted by timestamp.
pub fn flatten_session(
    session: &ChatSession,
    source_id: &str,
    config: &ChatImportConfig,
) -> Vec<Value> {
    let mut events = Vec::new();

    for message in &session.messages {
        let timestamp =
            resolve_message_timestamp(message.timestamp.as_ref(), session.created_at.as_deref());
        let text = truncate_at_boundary(&message.text, config.max_message_length);
        events.push(json!({
            "id": ulid::Ulid::new().to_string(),
            "timestamp": timestamp,
            "message": redact(text),
            "metadata": {
                "chat": {
                    "session_id": session.session_id,
                    "role": message.role,
                },
                "source": {"id": source_id},
            },
        }));

        if config.tool_calls_as_events {
            for tool_call in &message.tool_calls {
                let output = truncate_at_boundary(&tool_call.output, config.max_tool_output_length);
                events.push(json!({
                    "id": ulid::Ulid::new().to_string(),
                    "timestamp": timestamp,
                    "message": redact(&format!("{}: {}", tool_call.name, output)),
                    "metadata": {
                        "chat": {"session_id": session.session_id, "role": "tool"},
                        "tool": {"name": tool_call.name},
                        "source": {"id": source_id},
                    },
                }));
            }
        }
    }

    events.sort_by(|a, b| {
        let ta = a["timestamp"].as_str().unwrap_or_default();
        let tb = b["timestamp"].as_str().unwrap_or_default();
        ta.cmp(tb)
    });
    events
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SourceCursor {
    last_import_time: Option<String>,
    imported_sessions: BTreeMap<String, String>,
}

/// Run every adapter once: import sessions whose modification time
/// advanced, append their events to the chat log, record new mtimes.
/// Returns the number of event lines appended.
pub async fn run_chat_import(
    pool: &Arc<DatabasePool>,
    config: &ChatImportConfig,
    adapters: &[Box<dyn ChatSourceAdapter>],
    chat_log_path: &Path,
) -> Result<usize> {
    let mut state: BTreeMap<String, SourceCursor> = pool
        .interact(|conn| Ok(db::get_state_sync(conn, CHAT_IMPORT_STATE_KEY)?))
        .await?
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let mut appended = 0usize;
    for adapter in adapters {
        let cursor = state.entry(adapter.source_id().to_string()).or_default();
        match import_source(adapter.as_ref(), cursor, config, chat_log_path) {
            Ok(count) => {
                appended += count;
                cursor.last_import_time = Some(now_rfc3339());
            }
            Err(e) => {
                tracing::warn!(source = adapter.source_id(), "Chat import failed: {:#}", e);
            }
        }
    }

    let value = serde_json::to_value(&state)?;
    pool.interact(move |conn| Ok(db::set_state_sync(conn, CHAT_IMPORT_STATE_KEY, &value)?))
        .await?;

    Ok(appended)
}

fn import_source(
    adapter: &dyn ChatSourceAdapter,
    cursor: &mut SourceCursor,
    config: &ChatImportConfig,
    chat_log_path: &Path,
) -> Result<usize> {
    let mut appended = 0usize;

    for path in adapter.discover_sessions()? {
        let path_key = path.to_string_lossy().into_owned();
        let Some(mtime) = adapter.get_session_modified_time(&path) else {
            continue;
        };
        if cursor.imported_sessions.get(&path_key).is_some_and(|seen| *seen >= mtime) {
            continue;
        }

        let session = match adapter.import_session(&path) {
            Ok(Some(session)) => session,
            Ok(None) => {
                cursor.imported_sessions.insert(path_key, mtime);
                continue;
            }
            Err(e) => {
                tracing::warn!(
                    source = adapter.source_id(),
                    session = %path.display(),
                    "Skipping session: {:#}",
                    e
                );
                continue;
            }
        };

        let events = flatten_session(&session, adapter.source_id(), config);
        append_lines(chat_log_path, &events)
            .with_context(|| format!("Failed to append to {}", chat_log_path.display()))?;
        appended += events.len();
        cursor.imported_sessions.insert(path_key, mtime);
    }

    Ok(appended)
}

fn append_lines(path: &Path, events: &[Value]) -> Result<()> {
    use std::io::Write;
    if events.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    for event in events {
        writeln!(file, "{event}")?;
    }
    Ok(())
}

/// Built-in adapter for Copilot-style JSON session files: one `*.json`
/// file per session under a sessions directory.
pub struct CopilotAdapter {
    sessions_dir: PathBuf,
}

impl CopilotAdapter {
    pub fn new(sessions_dir: PathBuf) -> Self {
        Self { sessions_dir }
    }

    /// Default location under the user's config directory.
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::new(dir.join("github-copilot").join("sessions")))
    }
}

impl ChatSourceAdapter for CopilotAdapter {
    fn source_id(&self) -> &str {
        "copilot"
    }

    fn source_name(&self) -> &str {
        "GitHub Copilot"
    }

    fn discover_sessions(&self) -> Result<Vec<PathBuf>> {
        if !self.sessions_dir.exists() {
            return Ok(vec![]);
        }
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                sessions.push(path);
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    fn import_session(&self, path: &Path) -> Result<Option<ChatSession>> {
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(path)?)
            .with_context(|| format!("session file {} is not JSON", path.display()))?;

        let session_id = raw
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()));
        let Some(session_id) = session_id else {
            return Ok(None);
        };

        let created_at = raw
            .get("createdAt")
            .and_then(Value::as_str)
            .map(str::to_string);

        let messages = raw
            .get("messages")
            .and_then(Value::as_array)
            .map(|msgs| {
                msgs.iter()
                    .filter_map(|m| {
                        let text = m
                            .get("text")
                            .or_else(|| m.get("content"))
                            .and_then(Value::as_str)?;
                        Some(ChatMessage {
                            role: m
                                .get("role")
                                .and_then(Value::as_str)
                                .unwrap_or("user")
                                .to_string(),
                            text: text.to_string(),
                            timestamp: m.get("timestamp").cloned(),
                            tool_calls: parse_tool_calls(m),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(ChatSession {
            session_id,
            created_at,
            messages,
        }))
    }

    fn get_session_modified_time(&self, path: &Path) -> Option<String> {
        let modified = std::fs::metadata(path).ok()?.modified().ok()?;
        Some(DateTime::<Utc>::from(modified).to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    message
        .get("toolCalls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    Some(ToolCall {
                        name: c.get("name").and_then(Value::as_str)?.to_string(),
                        output: c
                            .get("output")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_timestamp_numeric_millis() {
        let ts = resolve_message_timestamp(Some(&json!(1717236000000i64)), None);
        assert_eq!(ts, "2024-06-01T10:00:00.000Z");
    }

    #[test]
    fn test_timestamp_c_prefixed_string() {
        let ts = resolve_message_timestamp(Some(&json!("c1717236000000")), None);
        assert_eq!(ts, "2024-06-01T10:00:00.000Z");
    }

    #[test]
    fn test_timestamp_plain_numeric_string() {
        let ts = resolve_message_timestamp(Some(&json!("1717236000000")), None);
        assert_eq!(ts, "2024-06-01T10:00:00.000Z");
    }

    #[test]
    fn test_timestamp_falls_back_to_created_at() {
        let ts = resolve_message_timestamp(
            Some(&json!("cnot-a-number")),
            Some("2024-06-01T09:00:00Z"),
        );
        assert_eq!(ts, "2024-06-01T09:00:00.000Z");

        let ts = resolve_message_timestamp(None, Some("2024-06-01T09:00:00Z"));
        assert_eq!(ts, "2024-06-01T09:00:00.000Z");
    }

    #[test]
    fn test_flatten_orders_by_timestamp_and_truncates() {
        let session = ChatSession {
            session_id: "S".into(),
            created_at: Some("2024-06-01T09:00:00Z".into()),
            messages: vec![
                ChatMessage {
                    role: "assistant".into(),
                    text: "later".into(),
                    timestamp: Some(json!(1717236060000i64)),
                    tool_calls: vec![],
                },
                ChatMessage {
                    role: "user".into(),
                    text: "x".repeat(50),
                    timestamp: Some(json!(1717236000000i64)),
                    tool_calls: vec![],
                },
            ],
        };
        let config = ChatImportConfig {
            max_message_length: 10,
            ..Default::default()
        };
        let events = flatten_session(&session, "copilot", &config);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["metadata"]["chat"]["role"], "user");
        assert_eq!(events[0]["message"].as_str().unwrap().len(), 10);
        assert_eq!(events[1]["message"], "later");
        assert_eq!(events[0]["metadata"]["chat"]["session_id"], "S");
        assert_eq!(events[0]["metadata"]["source"]["id"], "copilot");
    }

    #[test]
    fn test_flatten_tool_calls_as_events() {
        let session = ChatSession {
            session_id: "S".into(),
            created_at: None,
            messages: vec![ChatMessage {
                role: "assistant".into(),
                text: "running".into(),
                timestamp: Some(json!(1717236000000i64)),
                tool_calls: vec![ToolCall {
                    name: "bash".into(),
                    output: "done".into(),
                }],
            }],
        };
        let config = ChatImportConfig {
            tool_calls_as_events: true,
            ..Default::default()
        };
        let events = flatten_session(&session, "copilot", &config);
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e["metadata"]["tool"]["name"] == "bash"));
    }

    #[tokio::test]
    async fn test_driver_imports_only_changed_sessions() {
        let sessions = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let chat_log = logs.path().join("chat.log");
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());

        std::fs::write(
            sessions.path().join("s1.json"),
            json!({
                "sessionId": "s1",
                "createdAt": "2024-06-01T09:00:00Z",
                "messages": [
                    {"role": "user", "text": "hello", "timestamp": 1717236000000i64},
                    {"role": "assistant", "text": "hi", "timestamp": "c1717236001000"}
                ]
            })
            .to_string(),
        )
        .unwrap();

        let adapters: Vec<Box<dyn ChatSourceAdapter>> =
            vec![Box::new(CopilotAdapter::new(sessions.path().to_path_buf()))];
        let config = ChatImportConfig::default();

        let first = run_chat_import(&pool, &config, &adapters, &chat_log).await.unwrap();
        assert_eq!(first, 2);
        let lines = std::fs::read_to_string(&chat_log).unwrap();
        assert_eq!(lines.lines().count(), 2);

        // unchanged mtime: nothing re-imports
        let second = run_chat_import(&pool, &config, &adapters, &chat_log).await.unwrap();
        assert_eq!(second, 0);
    }
}
