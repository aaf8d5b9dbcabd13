//! Adapter for Amazon Q CLI conversation state.
//!
//! Amazon Q keeps one row per workspace in `conversations_v2(key, value)`
//! inside `data.sqlite3`: the key is the workspace directory, the value the
//! serialized conversation. History entries are tagged `Prompt`,
//! `Assistant`, or `ToolUseResults`; results are folded into the preceding
//! assistant entry. The store records no per-entry timestamps, so the DB
//! file's mtime stands in for session recency and message order follows
//! history order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::{FileCache, FileStamp};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::model::{Capabilities, ContentBlock, Message, Role, Session, TokenUsage, ToolUse, WatchScope};
use crate::paths;
use crate::watch::{self, WatchHandle};

use super::sqlite::{SqliteSource, wal_watch_config};
use super::{Adapter, derive_title, epoch, sort_sessions};

pub struct AmazonQAdapter {
    source: SqliteSource,
    message_cache: FileCache<Vec<Message>>,
    debounce: Duration,
    event_buffer: usize,
}

#[derive(Debug, Deserialize)]
struct ConversationState {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    history: Vec<Value>,
}

impl Default for AmazonQAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AmazonQAdapter {
    pub fn new() -> Self {
        Self::with_db(Self::default_db())
    }

    pub fn with_db(db_path: PathBuf) -> Self {
        Self::with_config(db_path, &IngestConfig::default())
    }

    pub fn with_config(db_path: PathBuf, config: &IngestConfig) -> Self {
        AmazonQAdapter {
            source: SqliteSource::new(db_path),
            message_cache: FileCache::new(config.message_cache_entries),
            debounce: config.debounce(),
            event_buffer: config.event_buffer,
        }
    }

    /// `AMAZON_Q_INGEST_DB` override, else the platform data dir.
    pub(crate) fn default_db() -> PathBuf {
        if let Ok(db) = dotenvy::var("AMAZON_Q_INGEST_DB") {
            return PathBuf::from(db);
        }
        dirs::data_local_dir()
            .map(|d| d.join("amazon-q/data.sqlite3"))
            .unwrap_or_default()
    }

    fn db_mtime(&self) -> DateTime<Utc> {
        std::fs::metadata(self.source.path())
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| epoch())
    }

    fn rows_for(&self, project_root: &Path) -> Result<Vec<(String, String)>> {
        let root = paths::canonicalize(project_root);
        let root_str = root.to_string_lossy().to_string();
        let rows = self.source.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM conversations_v2 \
                 WHERE key = ?1 OR key LIKE ?1 || '/%'",
            )?;
            let rows = stmt
                .query_map([&root_str], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        // LIKE is byte-wise; re-check containment on canonical paths.
        Ok(rows
            .into_iter()
            .filter(|(key, _)| paths::contains(project_root, Path::new(key)))
            .collect())
    }

    fn all_rows(&self) -> Result<Vec<(String, String)>> {
        self.source.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM conversations_v2")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn build_session(&self, key: &str, value: &str) -> Option<(Session, Vec<Message>)> {
        let state: ConversationState = match serde_json::from_str(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(key, error = %e, "skipping malformed conversation row");
                return None;
            }
        };
        let session_id = state
            .conversation_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| key.to_string());

        let messages = assemble_history(&state.history, &session_id);
        let mtime = self.db_mtime();
        let session = Session {
            id: session_id,
            name: derive_title(&messages, key),
            adapter_id: self.id().to_string(),
            adapter_name: self.display_name().to_string(),
            adapter_icon: self.icon().to_string(),
            created_at: mtime,
            updated_at: mtime,
            total_tokens: 0,
            estimated_cost: 0.0,
            message_count: messages.len(),
            parent_id: None,
            path: Some(self.source.path().to_path_buf()),
            file_size: FileStamp::probe(self.source.path()).map(|s| s.size),
        };
        Some((session, messages))
    }
}

impl Adapter for AmazonQAdapter {
    fn id(&self) -> &'static str {
        "amazon-q"
    }

    fn display_name(&self) -> &'static str {
        "Amazon Q"
    }

    fn icon(&self) -> &'static str {
        "ⓠ"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            session_lookup: true,
            ..Capabilities::base()
        }
    }

    fn detect(&self, project_root: &Path) -> bool {
        if !self.source.exists() {
            return false;
        }
        self.rows_for(project_root)
            .map(|rows| !rows.is_empty())
            .unwrap_or(false)
    }

    fn sessions(&self, project_root: &Path) -> Result<Vec<Session>> {
        if !self.source.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for (key, value) in self.rows_for(project_root)? {
            if let Some((session, messages)) = self.build_session(&key, &value)
                && let Some(stamp) = FileStamp::probe(self.source.path())
            {
                self.message_cache.set(&session.id, messages, stamp);
                sessions.push(session);
            }
        }
        sort_sessions(&mut sessions);
        Ok(sessions)
    }

    fn messages(&self, session_id: &str) -> Result<Vec<Message>> {
        if let Some(stamp) = FileStamp::probe(self.source.path())
            && let Some(messages) = self.message_cache.get(session_id, stamp)
        {
            return Ok(messages);
        }
        for (key, value) in self.all_rows()? {
            if let Some((session, messages)) = self.build_session(&key, &value)
                && session.id == session_id
            {
                if let Some(stamp) = FileStamp::probe(self.source.path()) {
                    self.message_cache.set(session_id, messages.clone(), stamp);
                }
                return Ok(messages);
            }
        }
        Err(IngestError::UnknownSession(session_id.to_string()).into())
    }

    fn session_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        if !self.source.exists() {
            return Ok(None);
        }
        for (key, value) in self.all_rows()? {
            if let Some((session, _)) = self.build_session(&key, &value)
                && session.id == session_id
            {
                return Ok(Some(session));
            }
        }
        Ok(None)
    }

    fn watch_scope(&self) -> WatchScope {
        WatchScope::Global
    }

    fn watch(&self, _project_root: &Path) -> Result<WatchHandle> {
        let mut config = wal_watch_config(self.source.path())?;
        config.debounce = self.debounce;
        config.capacity = self.event_buffer;
        watch::spawn(config)
    }

    fn close(&self) {
        self.source.close();
    }
}

/// Fold the tagged history into messages. `ToolUseResults` entries attach to
/// the assistant entry before them and are not messages of their own.
fn assemble_history(history: &[Value], session_id: &str) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();

    for (idx, entry) in history.iter().enumerate() {
        if let Some(prompt) = entry.get("Prompt") {
            let content = prompt
                .get("prompt")
                .and_then(|p| p.as_str())
                .unwrap_or_default()
                .to_string();
            if content.is_empty() {
                continue;
            }
            messages.push(Message {
                id: format!("{session_id}-{idx}"),
                role: Role::User,
                timestamp: epoch(),
                model: None,
                content: content.clone(),
                blocks: vec![ContentBlock::Text { text: content }],
                tool_uses: Vec::new(),
                thinking: Vec::new(),
                usage: TokenUsage::default(),
            });
        } else if let Some(assistant) = entry.get("Assistant") {
            let content = assistant
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            let mut blocks = Vec::new();
            if !content.is_empty() {
                blocks.push(ContentBlock::Text {
                    text: content.clone(),
                });
            }
            let mut tool_uses = Vec::new();
            if let Some(uses) = assistant.get("tool_uses").and_then(|t| t.as_array()) {
                for use_entry in uses {
                    let tool = ToolUse {
                        id: use_entry
                            .get("id")
                            .and_then(|i| i.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: use_entry
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        input: use_entry
                            .get("args")
                            .map(|a| a.to_string())
                            .unwrap_or_default(),
                        output: String::new(),
                        is_error: false,
                    };
                    blocks.push(ContentBlock::ToolUse {
                        id: tool.id.clone(),
                        name: tool.name.clone(),
                        input: tool.input.clone(),
                        output: String::new(),
                        is_error: false,
                    });
                    tool_uses.push(tool);
                }
            }
            messages.push(Message {
                id: assistant
                    .get("message_id")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{session_id}-{idx}")),
                role: Role::Assistant,
                timestamp: epoch(),
                model: None,
                content,
                blocks,
                tool_uses,
                thinking: Vec::new(),
                usage: TokenUsage::default(),
            });
        } else if let Some(results) = entry
            .get("ToolUseResults")
            .and_then(|r| r.get("tool_use_results"))
            .and_then(|r| r.as_array())
        {
            for result in results {
                attach_result(result, &mut messages);
            }
        }
    }

    messages
}

fn attach_result(result: &Value, messages: &mut [Message]) {
    let Some(tool_use_id) = result.get("tool_use_id").and_then(|i| i.as_str()) else {
        return;
    };
    let output = flatten_result_content(result.get("content"));
    let is_error = result.get("status").and_then(|s| s.as_str()) == Some("Error");

    let Some(msg) = messages
        .iter_mut()
        .rev()
        .find(|m| m.role == Role::Assistant && m.tool_uses.iter().any(|t| t.id == tool_use_id))
    else {
        return;
    };
    if let Some(tool) = msg.tool_uses.iter_mut().find(|t| t.id == tool_use_id) {
        tool.output = output.clone();
        tool.is_error = is_error;
    }
    for block in &mut msg.blocks {
        if let ContentBlock::ToolUse {
            id,
            output: block_output,
            is_error: block_error,
            ..
        } = block
            && id == tool_use_id
        {
            *block_output = output.clone();
            *block_error = is_error;
        }
    }
}

fn flatten_result_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| {
                i.get("Text")
                    .or_else(|| i.get("text"))
                    .and_then(|t| t.as_str())
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn seed_db(db: &Path, rows: &[(&str, Value)]) {
        let conn = Connection::open(db).unwrap();
        conn.execute_batch("CREATE TABLE conversations_v2 (key TEXT PRIMARY KEY, value TEXT)")
            .unwrap();
        for (key, value) in rows {
            conn.execute(
                "INSERT INTO conversations_v2 (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value.to_string()],
            )
            .unwrap();
        }
    }

    fn conversation(cid: &str) -> Value {
        json!({
            "conversation_id": cid,
            "history": [
                {"Prompt": {"prompt": "add a test"}},
                {"Assistant": {"message_id": "m1", "content": "adding it",
                               "tool_uses": [{"id": "t1", "name": "fs_write",
                                              "args": {"path": "test.rs"}}]}},
                {"ToolUseResults": {"tool_use_results": [
                    {"tool_use_id": "t1", "content": [{"Text": "wrote file"}],
                     "status": "Success"}]}}
            ]
        })
    }

    #[test]
    fn rows_filter_by_workspace_key() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("proj");
        let other = dir.path().join("proj2");
        fs::create_dir_all(&proj).unwrap();
        fs::create_dir_all(&other).unwrap();
        let db = dir.path().join("data.sqlite3");
        seed_db(
            &db,
            &[
                (proj.to_str().unwrap(), conversation("conv-a")),
                (other.to_str().unwrap(), conversation("conv-b")),
            ],
        );

        let adapter = AmazonQAdapter::with_db(db);
        assert!(adapter.detect(&proj));
        let sessions = adapter.sessions(&proj).unwrap();
        // proj2 is a sibling, not a child; the LIKE prefix must not leak it.
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "conv-a");
        assert_eq!(sessions[0].name, "add a test");
    }

    #[test]
    fn tool_results_fold_into_assistant_entry() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("proj");
        fs::create_dir_all(&proj).unwrap();
        let db = dir.path().join("data.sqlite3");
        seed_db(&db, &[(proj.to_str().unwrap(), conversation("conv-a"))]);

        let adapter = AmazonQAdapter::with_db(db);
        adapter.sessions(&proj).unwrap();
        let messages = adapter.messages("conv-a").unwrap();
        assert_eq!(messages.len(), 2);
        let assistant = &messages[1];
        assert_eq!(assistant.id, "m1");
        assert_eq!(assistant.tool_uses[0].name, "fs_write");
        assert_eq!(assistant.tool_uses[0].output, "wrote file");
        assert!(!assistant.tool_uses[0].is_error);
    }

    #[test]
    fn error_status_marks_tool_result() {
        let history = json!([
            {"Assistant": {"message_id": "m1", "content": "trying",
                           "tool_uses": [{"id": "t1", "name": "bash", "args": {}}]}},
            {"ToolUseResults": {"tool_use_results": [
                {"tool_use_id": "t1", "content": "denied", "status": "Error"}]}}
        ]);
        let messages = assemble_history(history.as_array().unwrap(), "s");
        assert!(messages[0].tool_uses[0].is_error);
        assert_eq!(messages[0].tool_uses[0].output, "denied");
    }

    #[test]
    fn missing_db_detects_false_and_lists_nothing() {
        let adapter = AmazonQAdapter::with_db(PathBuf::from("/no/such/data.sqlite3"));
        assert!(!adapter.detect(Path::new("/tmp")));
        assert!(adapter.sessions(Path::new("/tmp")).unwrap().is_empty());
        assert!(adapter.session_by_id("x").unwrap().is_none());
    }

    #[test]
    fn session_lookup_scans_all_rows() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("proj");
        fs::create_dir_all(&proj).unwrap();
        let db = dir.path().join("data.sqlite3");
        seed_db(&db, &[(proj.to_str().unwrap(), conversation("conv-a"))]);

        let adapter = AmazonQAdapter::with_db(db);
        let session = adapter.session_by_id("conv-a").unwrap().unwrap();
        assert_eq!(session.id, "conv-a");
        assert!(adapter.session_by_id("conv-zzz").unwrap().is_none());
    }
}
