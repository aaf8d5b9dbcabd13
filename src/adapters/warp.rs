//! Adapter for the Warp terminal's AI query store.
//!
//! Warp keeps everything in one global `warp.sqlite`: `ai_queries` holds the
//! user side (input, model, per-exchange token totals) and `blocks` holds
//! the agent output, both keyed by conversation id. The store records no
//! workspace path, so the adapter is global — every conversation is
//! reported regardless of project — and the watcher fires on WAL commits
//! for the whole database.
//!
//! Tokens come as a single per-query total with no input/output breakdown;
//! `split_total_tokens` applies a fixed 80/20 split so cost estimation has
//! something to work with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cache::{FileCache, FileStamp};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::model::{Capabilities, ContentBlock, Message, Role, Session, TokenUsage, WatchScope};
use crate::pricing::PricingTable;
use crate::watch::{self, WatchHandle};

use super::sqlite::{SqliteSource, wal_watch_config};
use super::{Adapter, derive_title, epoch, parse_timestamp_str, sort_messages, sort_sessions};

pub struct WarpAdapter {
    source: SqliteSource,
    message_cache: FileCache<Vec<Message>>,
    pricing: PricingTable,
    debounce: Duration,
    event_buffer: usize,
}

struct QueryRow {
    input: String,
    model_id: Option<String>,
    start_ts: Option<String>,
    total_tokens: u64,
}

struct BlockRow {
    content: String,
    created_at: Option<String>,
}

impl Default for WarpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl WarpAdapter {
    pub fn new() -> Self {
        Self::with_db(Self::default_db())
    }

    pub fn with_db(db_path: PathBuf) -> Self {
        Self::with_config(db_path, &IngestConfig::default())
    }

    pub fn with_config(db_path: PathBuf, config: &IngestConfig) -> Self {
        WarpAdapter {
            source: SqliteSource::new(db_path),
            message_cache: FileCache::new(config.message_cache_entries),
            pricing: config.pricing_table(),
            debounce: config.debounce(),
            event_buffer: config.event_buffer,
        }
    }

    /// `WARP_INGEST_DB` override, else the platform data dir.
    pub(crate) fn default_db() -> PathBuf {
        if let Ok(db) = dotenvy::var("WARP_INGEST_DB") {
            return PathBuf::from(db);
        }
        dirs::data_local_dir()
            .map(|d| d.join("warp/warp.sqlite"))
            .unwrap_or_default()
    }

    fn query_rows(&self, conversation_id: &str) -> Result<Vec<QueryRow>> {
        self.source.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT input, model_id, start_ts, COALESCE(total_tokens, 0) \
                 FROM ai_queries WHERE conversation_id = ?1 ORDER BY start_ts",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| {
                    Ok(QueryRow {
                        input: row.get(0)?,
                        model_id: row.get(1)?,
                        start_ts: row.get(2)?,
                        total_tokens: row.get::<_, i64>(3)?.max(0) as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn block_rows(&self, conversation_id: &str) -> Result<Vec<BlockRow>> {
        self.source.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT content, created_at FROM blocks \
                 WHERE conversation_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| {
                    Ok(BlockRow {
                        content: row.get(0)?,
                        created_at: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn assemble(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut messages = Vec::new();

        for (idx, row) in self.query_rows(conversation_id)?.into_iter().enumerate() {
            let text = extract_input_text(&row.input);
            let (input, output) = split_total_tokens(row.total_tokens);
            messages.push(Message {
                id: format!("{conversation_id}-q{idx}"),
                role: Role::User,
                timestamp: row
                    .start_ts
                    .as_deref()
                    .and_then(parse_timestamp_str)
                    .unwrap_or_else(epoch),
                model: row.model_id,
                content: text.clone(),
                blocks: vec![ContentBlock::Text { text }],
                tool_uses: Vec::new(),
                thinking: Vec::new(),
                usage: TokenUsage {
                    input,
                    output,
                    ..TokenUsage::default()
                },
            });
        }

        for (idx, row) in self.block_rows(conversation_id)?.into_iter().enumerate() {
            if row.content.trim().is_empty() {
                continue;
            }
            messages.push(Message {
                id: format!("{conversation_id}-b{idx}"),
                role: Role::Assistant,
                timestamp: row
                    .created_at
                    .as_deref()
                    .and_then(parse_timestamp_str)
                    .unwrap_or_else(epoch),
                model: None,
                content: row.content.clone(),
                blocks: vec![ContentBlock::Text { text: row.content }],
                tool_uses: Vec::new(),
                thinking: Vec::new(),
                usage: TokenUsage::default(),
            });
        }

        sort_messages(&mut messages);
        Ok(messages)
    }
}

impl Adapter for WarpAdapter {
    fn id(&self) -> &'static str {
        "warp"
    }

    fn display_name(&self) -> &'static str {
        "Warp"
    }

    fn icon(&self) -> &'static str {
        "⌁"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::base()
    }

    // The store is not partitioned by workspace, so presence of the DB is
    // the whole signal.
    fn detect(&self, _project_root: &Path) -> bool {
        self.source.exists()
    }

    fn sessions(&self, _project_root: &Path) -> Result<Vec<Session>> {
        if !self.source.exists() {
            return Ok(Vec::new());
        }
        let summary = self.source.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, MIN(start_ts), MAX(start_ts), \
                        COUNT(*), SUM(COALESCE(total_tokens, 0)) \
                 FROM ai_queries GROUP BY conversation_id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?.max(0) as u64,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        let file_size = FileStamp::probe(self.source.path()).map(|s| s.size);
        let mut sessions = Vec::new();
        for (conversation_id, min_ts, max_ts, query_count, total_tokens) in summary {
            let created_at: DateTime<Utc> = min_ts
                .as_deref()
                .and_then(parse_timestamp_str)
                .unwrap_or_else(epoch);
            let updated_at = max_ts
                .as_deref()
                .and_then(parse_timestamp_str)
                .unwrap_or(created_at)
                .max(created_at);
            let messages = self.assemble(&conversation_id)?;
            if let Some(stamp) = FileStamp::probe(self.source.path()) {
                self.message_cache
                    .set(&conversation_id, messages.clone(), stamp);
            }
            let (input, output) = split_total_tokens(total_tokens);
            let model = messages.iter().find_map(|m| m.model.clone());
            sessions.push(Session {
                id: conversation_id.clone(),
                name: derive_title(&messages, &conversation_id),
                adapter_id: self.id().to_string(),
                adapter_name: self.display_name().to_string(),
                adapter_icon: self.icon().to_string(),
                created_at,
                updated_at,
                total_tokens,
                estimated_cost: self.pricing.cost(
                    model.as_deref(),
                    &TokenUsage {
                        input,
                        output,
                        ..TokenUsage::default()
                    },
                ),
                message_count: messages.len().max(query_count as usize),
                parent_id: None,
                path: Some(self.source.path().to_path_buf()),
                file_size,
            });
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
        let messages = self.assemble(session_id)?;
        if messages.is_empty() {
            let known = self.source.with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM ai_queries WHERE conversation_id = ?1",
                    [session_id],
                    |row| row.get::<_, i64>(0),
                )
            })?;
            if known == 0 {
                return Err(IngestError::UnknownSession(session_id.to_string()).into());
            }
        }
        if let Some(stamp) = FileStamp::probe(self.source.path()) {
            self.message_cache.set(session_id, messages.clone(), stamp);
        }
        Ok(messages)
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

/// The store reports one total per exchange; assume the bulk is prompt-side
/// context. 80% input, 20% output.
fn split_total_tokens(total: u64) -> (u64, u64) {
    let input = total * 4 / 5;
    (input, total - input)
}

/// `input` is usually a JSON envelope with the typed text; fall back to the
/// raw column value.
fn extract_input_text(input: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(input)
        && let Some(text) = value.get("text").and_then(|t| t.as_str())
    {
        return text.to_string();
    }
    input.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn seed_db(db: &Path) {
        let conn = Connection::open(db).unwrap();
        conn.execute_batch(
            "CREATE TABLE ai_queries (
                 conversation_id TEXT, input TEXT, model_id TEXT,
                 start_ts TEXT, total_tokens INTEGER
             );
             CREATE TABLE blocks (
                 conversation_id TEXT, content TEXT, created_at TEXT
             );
             INSERT INTO ai_queries VALUES
                 ('c1', '{\"text\":\"explain this error\"}', 'gpt-5',
                  '2025-01-15 10:00:00', 1000),
                 ('c1', 'plain follow-up', 'gpt-5',
                  '2025-01-15 10:02:00', 500),
                 ('c2', '{\"text\":\"other conversation\"}', 'gpt-5',
                  '2025-01-15 11:00:00', 200);
             INSERT INTO blocks VALUES
                 ('c1', 'the error means X', '2025-01-15 10:00:30'),
                 ('c1', '', '2025-01-15 10:01:00'),
                 ('c2', 'an answer', '2025-01-15 11:00:30');",
        )
        .unwrap();
    }

    #[test]
    fn sessions_group_queries_by_conversation() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("warp.sqlite");
        seed_db(&db);

        let adapter = WarpAdapter::with_db(db);
        assert!(adapter.detect(Path::new("/anywhere")));
        let sessions = adapter.sessions(Path::new("/anywhere")).unwrap();
        assert_eq!(sessions.len(), 2);

        let c1 = sessions.iter().find(|s| s.id == "c1").unwrap();
        assert_eq!(c1.total_tokens, 1500);
        assert_eq!(c1.name, "explain this error");
        // Two queries plus one non-empty block.
        assert_eq!(c1.message_count, 3);
    }

    #[test]
    fn messages_interleave_queries_and_blocks_by_time() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("warp.sqlite");
        seed_db(&db);

        let adapter = WarpAdapter::with_db(db);
        let messages = adapter.messages("c1").unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "explain this error");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "the error means X");
        assert_eq!(messages[2].role, Role::User);
        assert_eq!(messages[2].content, "plain follow-up");
    }

    #[test]
    fn token_split_is_four_to_one() {
        assert_eq!(split_total_tokens(1000), (800, 200));
        assert_eq!(split_total_tokens(0), (0, 0));
        assert_eq!(split_total_tokens(1), (0, 1));
    }

    #[test]
    fn unknown_conversation_is_an_error() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("warp.sqlite");
        seed_db(&db);

        let adapter = WarpAdapter::with_db(db);
        assert!(adapter.messages("nope").is_err());
    }

    #[test]
    fn missing_db_detects_false() {
        let adapter = WarpAdapter::with_db(PathBuf::from("/no/such/warp.sqlite"));
        assert!(!adapter.detect(Path::new("/tmp")));
        assert!(adapter.sessions(Path::new("/tmp")).unwrap().is_empty());
    }
}
