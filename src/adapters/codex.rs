//! Adapter for Codex CLI rollout logs.
//!
//! Codex writes date-partitioned JSONL under
//! `~/.codex/sessions/YYYY/MM/DD/rollout-<timestamp>-<uuid>.jsonl`. The first
//! line is a `session_meta` record carrying the session id and cwd; the rest
//! are `response_item` records (messages, reasoning, function calls and
//! their outputs as separate items paired by `call_id`) plus `event_msg`
//! records whose `token_count` payloads snapshot cumulative usage — the last
//! snapshot wins. Only a total split of input/cached/output is reported, so
//! per-message usage stays empty and `usage()` reads the snapshot.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::cache::{FileCache, FileStamp};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::model::{
    Capabilities, ContentBlock, Event, EventKind, Message, Role, Session, ThinkingBlock,
    TokenUsage, ToolUse, UsageStats,
};
use crate::paths;
use crate::pricing::PricingTable;
use crate::watch::{self, RawKind, WatchConfig, WatchHandle};

use super::{
    Adapter, derive_title, epoch, estimate_tokens, parse_timestamp_str, sort_messages,
    sort_sessions,
};

pub struct CodexAdapter {
    sessions_root: PathBuf,
    index: RwLock<FxHashMap<String, PathBuf>>,
    meta_cache: FileCache<Session>,
    message_cache: FileCache<Vec<Message>>,
    usage_cache: FileCache<UsageStats>,
    pricing: PricingTable,
    debounce: Duration,
    event_buffer: usize,
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CodexAdapter {
    pub fn new() -> Self {
        Self::with_root(Self::default_root())
    }

    pub fn with_root(sessions_root: PathBuf) -> Self {
        Self::with_config(sessions_root, &IngestConfig::default())
    }

    pub fn with_config(sessions_root: PathBuf, config: &IngestConfig) -> Self {
        CodexAdapter {
            sessions_root,
            index: RwLock::new(FxHashMap::default()),
            meta_cache: FileCache::new(config.meta_cache_entries),
            message_cache: FileCache::new(config.message_cache_entries),
            usage_cache: FileCache::new(config.meta_cache_entries),
            pricing: config.pricing_table(),
            debounce: config.debounce(),
            event_buffer: config.event_buffer,
        }
    }

    /// `CODEX_INGEST_ROOT` override, else `~/.codex/sessions`.
    pub(crate) fn default_root() -> PathBuf {
        if let Ok(root) = dotenvy::var("CODEX_INGEST_ROOT") {
            return PathBuf::from(root);
        }
        dirs::home_dir()
            .map(|h| h.join(".codex/sessions"))
            .unwrap_or_default()
    }

    fn rollout_files(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.sessions_root)
            .min_depth(4)
            .max_depth(4)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .filter(|p| is_rollout_file(p))
            .collect()
    }

    fn load(&self, session_id: &str, path: &Path) -> Result<Option<(Session, Vec<Message>)>> {
        let Some(stamp) = FileStamp::probe(path) else {
            return Ok(None);
        };
        if let Some(session) = self.meta_cache.get(session_id, stamp)
            && let Some(messages) = self.message_cache.get(session_id, stamp)
        {
            return Ok(Some((session, messages)));
        }

        let parsed = assemble_rollout(path)?;
        let total_tokens = parsed.usage.total_tokens();
        let cost = self.pricing.cost(
            parsed.model.as_deref(),
            &TokenUsage {
                input: parsed.usage.input_tokens,
                output: parsed.usage.output_tokens,
                cache_read: parsed.usage.cache_read_tokens,
                cache_write: parsed.usage.cache_write_tokens,
            },
        );
        let created_at = parsed.first_ts.unwrap_or_else(epoch);
        let updated_at = parsed.last_ts.unwrap_or(created_at).max(created_at);
        let session = Session {
            id: session_id.to_string(),
            name: derive_title(&parsed.messages, session_id),
            adapter_id: self.id().to_string(),
            adapter_name: self.display_name().to_string(),
            adapter_icon: self.icon().to_string(),
            created_at,
            updated_at,
            total_tokens,
            estimated_cost: cost,
            message_count: parsed.messages.len(),
            parent_id: None,
            path: Some(path.to_path_buf()),
            file_size: Some(stamp.size),
        };

        let mut usage = parsed.usage;
        usage.message_count = parsed.messages.len();
        self.meta_cache.set(session_id, session.clone(), stamp);
        self.message_cache
            .set(session_id, parsed.messages.clone(), stamp);
        self.usage_cache.set(session_id, usage, stamp);
        Ok(Some((session, parsed.messages)))
    }

    fn path_for(&self, session_id: &str) -> Option<PathBuf> {
        if let Some(path) = self.index.read().get(session_id).cloned() {
            return Some(path);
        }
        self.rollout_files()
            .into_iter()
            .find(|p| read_meta(p).map(|m| m.id == session_id).unwrap_or(false))
    }
}

impl Adapter for CodexAdapter {
    fn id(&self) -> &'static str {
        "codex"
    }

    fn display_name(&self) -> &'static str {
        "Codex"
    }

    fn icon(&self) -> &'static str {
        "▣"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            session_lookup: true,
            ..Capabilities::base()
        }
    }

    fn detect(&self, project_root: &Path) -> bool {
        if !self.sessions_root.is_dir() {
            return false;
        }
        // Header peeks only — never a full-history parse.
        self.rollout_files().into_iter().any(|p| {
            read_meta(&p)
                .map(|m| paths::contains(project_root, Path::new(&m.cwd)))
                .unwrap_or(false)
        })
    }

    fn sessions(&self, project_root: &Path) -> Result<Vec<Session>> {
        if !self.sessions_root.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        let mut index = FxHashMap::default();

        for path in self.rollout_files() {
            let Some(meta) = read_meta(&path) else {
                continue;
            };
            if !paths::contains(project_root, Path::new(&meta.cwd)) {
                continue;
            }
            match self.load(&meta.id, &path) {
                Ok(Some((session, _))) => {
                    index.insert(meta.id, path);
                    sessions.push(session);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable rollout");
                }
            }
        }

        *self.index.write() = index;
        sort_sessions(&mut sessions);
        Ok(sessions)
    }

    fn messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let Some(path) = self.path_for(session_id) else {
            return Err(IngestError::UnknownSession(session_id.to_string()).into());
        };
        match self.load(session_id, &path)? {
            Some((_, messages)) => Ok(messages),
            None => Ok(Vec::new()),
        }
    }

    fn usage(&self, session_id: &str) -> Result<UsageStats> {
        let Some(path) = self.path_for(session_id) else {
            return Err(IngestError::UnknownSession(session_id.to_string()).into());
        };
        if let Some(stamp) = FileStamp::probe(&path)
            && let Some(stats) = self.usage_cache.get(session_id, stamp)
        {
            return Ok(stats);
        }
        // Cold path populates all three caches.
        self.load(session_id, &path)?;
        if let Some(stamp) = FileStamp::probe(&path)
            && let Some(stats) = self.usage_cache.get(session_id, stamp)
        {
            return Ok(stats);
        }
        Ok(UsageStats::default())
    }

    fn session_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        let Some(path) = self.path_for(session_id) else {
            return Ok(None);
        };
        Ok(self.load(session_id, &path)?.map(|(session, _)| session))
    }

    fn watch(&self, project_root: &Path) -> Result<WatchHandle> {
        let project_root = project_root.to_path_buf();
        let classify = Box::new(move |kind: RawKind, path: &Path| {
            if !is_rollout_file(path) {
                return None;
            }
            if kind == RawKind::Remove {
                return None;
            }
            // A freshly created file may hold only a partial first line;
            // fall back to peeking the header prefix for identity.
            let (id, cwd) = match read_meta(path) {
                Some(meta) => (meta.id, meta.cwd),
                None => (
                    super::peek_session_id(path, "id")?,
                    super::peek_session_id(path, "cwd")?,
                ),
            };
            if !paths::contains(&project_root, Path::new(&cwd)) {
                return None;
            }
            let event_kind = if kind == RawKind::Create {
                EventKind::SessionCreated
            } else {
                EventKind::MessageAdded
            };
            Some(
                Event::new(event_kind, id)
                    .with_payload(serde_json::json!({ "path": path.display().to_string() })),
            )
        });

        let mut config = WatchConfig::new(watch::date_partition_roots(&self.sessions_root), classify);
        config.debounce = self.debounce;
        config.capacity = self.event_buffer;
        // New year/month/day directories appear at midnight; subscribe them
        // and sweep for files that raced the subscription.
        config.subscribe_created_dirs = true;
        watch::spawn(config)
    }
}

fn is_rollout_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("jsonl")
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("rollout-"))
}

struct RolloutMeta {
    id: String,
    cwd: String,
}

/// First-line `session_meta` header.
fn read_meta(path: &Path) -> Option<RolloutMeta> {
    let file = std::fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let value: Value = serde_json::from_str(&line).ok()?;
    if value.get("type").and_then(|t| t.as_str()) != Some("session_meta") {
        return None;
    }
    let payload = value.get("payload")?;
    Some(RolloutMeta {
        id: payload.get("id")?.as_str()?.to_string(),
        cwd: payload.get("cwd")?.as_str()?.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct RolloutRecord {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

struct ParsedRollout {
    messages: Vec<Message>,
    usage: UsageStats,
    model: Option<String>,
    first_ts: Option<DateTime<Utc>>,
    last_ts: Option<DateTime<Utc>>,
}

fn assemble_rollout(path: &Path) -> Result<ParsedRollout> {
    let file =
        std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut messages: Vec<Message> = Vec::new();
    let mut pending_calls: FxHashMap<String, (usize, usize)> = FxHashMap::default();
    let mut pending_thinking: Vec<ThinkingBlock> = Vec::new();
    let mut usage = UsageStats::default();
    let mut model = None;
    let mut first_ts = None;
    let mut last_ts: Option<DateTime<Utc>> = None;

    for (line_no, line) in reader.lines().enumerate() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }
        let record: RolloutRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::trace!(line = line_no, error = %e, "skipping malformed rollout record");
                continue;
            }
        };
        let ts = record.timestamp.as_deref().and_then(parse_timestamp_str);
        if let Some(ts) = ts {
            first_ts = Some(first_ts.map_or(ts, |f: DateTime<Utc>| f.min(ts)));
            last_ts = Some(last_ts.map_or(ts, |l| l.max(ts)));
        }
        let Some(payload) = record.payload else {
            continue;
        };

        match record.kind.as_deref() {
            Some("turn_context") => {
                if let Some(m) = payload.get("model").and_then(|m| m.as_str()) {
                    model = Some(m.to_string());
                }
            }
            Some("event_msg") => {
                if payload.get("type").and_then(|t| t.as_str()) == Some("token_count")
                    && let Some(totals) = payload
                        .get("info")
                        .and_then(|i| i.get("total_token_usage"))
                {
                    // Cumulative snapshot, last one wins.
                    usage.input_tokens = totals
                        .get("input_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(usage.input_tokens);
                    usage.cache_read_tokens = totals
                        .get("cached_input_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(usage.cache_read_tokens);
                    usage.output_tokens = totals
                        .get("output_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(usage.output_tokens);
                }
            }
            Some("response_item") => assemble_item(
                &payload,
                line_no,
                ts,
                &mut messages,
                &mut pending_calls,
                &mut pending_thinking,
            ),
            _ => {}
        }
    }

    sort_messages(&mut messages);
    Ok(ParsedRollout {
        messages,
        usage,
        model,
        first_ts,
        last_ts,
    })
}

fn assemble_item(
    payload: &Value,
    line_no: usize,
    ts: Option<DateTime<Utc>>,
    messages: &mut Vec<Message>,
    pending_calls: &mut FxHashMap<String, (usize, usize)>,
    pending_thinking: &mut Vec<ThinkingBlock>,
) {
    match payload.get("type").and_then(|t| t.as_str()) {
        Some("message") => {
            let role = Role::parse(payload.get("role").and_then(|r| r.as_str()).unwrap_or(""));
            let text = flatten_item_text(payload.get("content"));
            // Codex injects scaffolding turns; they are not conversation.
            if text.starts_with("<user_instructions>") || text.starts_with("<environment_context>")
            {
                return;
            }
            if text.trim().is_empty() {
                return;
            }
            let mut blocks = vec![ContentBlock::Text { text: text.clone() }];
            let mut thinking = Vec::new();
            if role == Role::Assistant && !pending_thinking.is_empty() {
                thinking = std::mem::take(pending_thinking);
                for t in &thinking {
                    blocks.insert(
                        0,
                        ContentBlock::Thinking {
                            text: t.text.clone(),
                            estimated_tokens: t.estimated_tokens,
                        },
                    );
                }
            }
            messages.push(Message {
                id: format!("item-{line_no}"),
                role,
                timestamp: ts.unwrap_or_else(epoch),
                model: None,
                content: text,
                blocks,
                tool_uses: Vec::new(),
                thinking,
                usage: TokenUsage::default(),
            });
        }
        Some("reasoning") => {
            let text = payload
                .get("summary")
                .and_then(|s| s.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            if !text.is_empty() {
                pending_thinking.push(ThinkingBlock {
                    estimated_tokens: estimate_tokens(&text),
                    text,
                });
            }
        }
        Some("function_call") => {
            let call_id = payload
                .get("call_id")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            let tool = ToolUse {
                id: call_id.clone(),
                name: payload
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string(),
                input: payload
                    .get("arguments")
                    .and_then(|a| a.as_str())
                    .unwrap_or_default()
                    .to_string(),
                output: String::new(),
                is_error: false,
            };
            // Calls ride on the preceding assistant turn; synthesize one for
            // a call that arrives first.
            let needs_host = !matches!(
                messages.last(),
                Some(last) if last.role == Role::Assistant
            );
            if needs_host {
                messages.push(Message {
                    id: format!("item-{line_no}"),
                    role: Role::Assistant,
                    timestamp: ts.unwrap_or_else(epoch),
                    model: None,
                    content: String::new(),
                    blocks: Vec::new(),
                    tool_uses: Vec::new(),
                    thinking: Vec::new(),
                    usage: TokenUsage::default(),
                });
            }
            let msg_idx = messages.len() - 1;
            let host = &mut messages[msg_idx];
            host.blocks.push(ContentBlock::ToolUse {
                id: tool.id.clone(),
                name: tool.name.clone(),
                input: tool.input.clone(),
                output: String::new(),
                is_error: false,
            });
            host.tool_uses.push(tool);
            if !call_id.is_empty() {
                pending_calls.insert(call_id, (msg_idx, messages[msg_idx].tool_uses.len() - 1));
            }
        }
        Some("function_call_output") => {
            let Some(call_id) = payload.get("call_id").and_then(|c| c.as_str()) else {
                return;
            };
            let Some((msg_idx, tool_idx)) = pending_calls.remove(call_id) else {
                return;
            };
            let raw = payload
                .get("output")
                .and_then(|o| o.as_str())
                .unwrap_or_default();
            let (output, is_error) = parse_call_output(raw);
            if let Some(msg) = messages.get_mut(msg_idx) {
                if let Some(tool) = msg.tool_uses.get_mut(tool_idx) {
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
                        && id == call_id
                    {
                        *block_output = output.clone();
                        *block_error = is_error;
                    }
                }
            }
        }
        _ => {}
    }
}

fn flatten_item_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Call outputs are either plain text or a JSON envelope with the real
/// output and an exit code in metadata.
fn parse_call_output(raw: &str) -> (String, bool) {
    if let Ok(value) = serde_json::from_str::<Value>(raw)
        && value.is_object()
    {
        let output = value
            .get("output")
            .and_then(|o| o.as_str())
            .unwrap_or(raw)
            .to_string();
        let is_error = value
            .get("metadata")
            .and_then(|m| m.get("exit_code"))
            .and_then(|c| c.as_i64())
            .is_some_and(|code| code != 0);
        return (output, is_error);
    }
    (raw.to_string(), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write_rollout(root: &Path, sid: &str, cwd: &str, extra: &[Value]) -> PathBuf {
        let day = root.join("2025/01/15");
        fs::create_dir_all(&day).unwrap();
        let path = day.join(format!("rollout-2025-01-15T10-00-00-{sid}.jsonl"));
        let mut lines = vec![json!({
            "timestamp": "2025-01-15T10:00:00Z",
            "type": "session_meta",
            "payload": {"id": sid, "cwd": cwd, "originator": "codex_cli_rs"}
        })];
        lines.extend_from_slice(extra);
        let content: String = lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&path, content).unwrap();
        path
    }

    fn user_item(text: &str, ts: &str) -> Value {
        json!({
            "timestamp": ts,
            "type": "response_item",
            "payload": {"type": "message", "role": "user",
                        "content": [{"type": "input_text", "text": text}]}
        })
    }

    fn assistant_item(text: &str, ts: &str) -> Value {
        json!({
            "timestamp": ts,
            "type": "response_item",
            "payload": {"type": "message", "role": "assistant",
                        "content": [{"type": "output_text", "text": text}]}
        })
    }

    #[test]
    fn sessions_filter_by_meta_cwd() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("proj");
        let other = dir.path().join("other");
        fs::create_dir_all(&proj).unwrap();
        fs::create_dir_all(&other).unwrap();
        let store = dir.path().join("store");

        write_rollout(
            &store,
            "aaa",
            proj.to_str().unwrap(),
            &[user_item("mine", "2025-01-15T10:00:01Z")],
        );
        write_rollout(
            &store,
            "bbb",
            other.to_str().unwrap(),
            &[user_item("theirs", "2025-01-15T10:00:01Z")],
        );

        let adapter = CodexAdapter::with_root(store);
        assert!(adapter.detect(&proj));
        let sessions = adapter.sessions(&proj).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "aaa");
        assert_eq!(sessions[0].name, "mine");
    }

    #[test]
    fn token_count_snapshots_use_the_last_one() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("proj");
        fs::create_dir_all(&proj).unwrap();
        let store = dir.path().join("store");
        let snapshot = |input: u64, output: u64| {
            json!({
                "timestamp": "2025-01-15T10:00:05Z",
                "type": "event_msg",
                "payload": {"type": "token_count",
                            "info": {"total_token_usage": {
                                "input_tokens": input,
                                "cached_input_tokens": 0,
                                "output_tokens": output}}}
            })
        };
        write_rollout(
            &store,
            "aaa",
            proj.to_str().unwrap(),
            &[
                user_item("hi", "2025-01-15T10:00:01Z"),
                snapshot(100, 20),
                assistant_item("hello", "2025-01-15T10:00:02Z"),
                snapshot(250, 60),
            ],
        );

        let adapter = CodexAdapter::with_root(store);
        adapter.sessions(&proj).unwrap();
        let usage = adapter.usage("aaa").unwrap();
        assert_eq!(usage.input_tokens, 250);
        assert_eq!(usage.output_tokens, 60);
        assert_eq!(usage.message_count, 2);
    }

    #[test]
    fn function_calls_pair_with_outputs() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("proj");
        fs::create_dir_all(&proj).unwrap();
        let store = dir.path().join("store");
        write_rollout(
            &store,
            "aaa",
            proj.to_str().unwrap(),
            &[
                user_item("list files", "2025-01-15T10:00:01Z"),
                assistant_item("running it", "2025-01-15T10:00:02Z"),
                json!({
                    "timestamp": "2025-01-15T10:00:03Z",
                    "type": "response_item",
                    "payload": {"type": "function_call", "name": "shell",
                                "arguments": "{\"command\":[\"ls\"]}", "call_id": "c1"}
                }),
                json!({
                    "timestamp": "2025-01-15T10:00:04Z",
                    "type": "response_item",
                    "payload": {"type": "function_call_output", "call_id": "c1",
                                "output": "{\"output\":\"a b c\",\"metadata\":{\"exit_code\":0}}"}
                }),
            ],
        );

        let adapter = CodexAdapter::with_root(store);
        adapter.sessions(&proj).unwrap();
        let messages = adapter.messages("aaa").unwrap();
        assert_eq!(messages.len(), 2);
        let assistant = &messages[1];
        assert_eq!(assistant.tool_uses.len(), 1);
        assert_eq!(assistant.tool_uses[0].name, "shell");
        assert_eq!(assistant.tool_uses[0].output, "a b c");
        assert!(!assistant.tool_uses[0].is_error);
    }

    #[test]
    fn nonzero_exit_code_sets_error_flag() {
        let (output, is_error) =
            parse_call_output("{\"output\":\"boom\",\"metadata\":{\"exit_code\":1}}");
        assert_eq!(output, "boom");
        assert!(is_error);

        let (output, is_error) = parse_call_output("plain text");
        assert_eq!(output, "plain text");
        assert!(!is_error);
    }

    #[test]
    fn scaffolding_turns_are_dropped() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("proj");
        fs::create_dir_all(&proj).unwrap();
        let store = dir.path().join("store");
        write_rollout(
            &store,
            "aaa",
            proj.to_str().unwrap(),
            &[
                user_item("<user_instructions>be nice</user_instructions>", "2025-01-15T10:00:01Z"),
                user_item("real question", "2025-01-15T10:00:02Z"),
            ],
        );

        let adapter = CodexAdapter::with_root(store);
        adapter.sessions(&proj).unwrap();
        let messages = adapter.messages("aaa").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "real question");
    }

    #[test]
    fn reasoning_attaches_to_next_assistant_turn() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("proj");
        fs::create_dir_all(&proj).unwrap();
        let store = dir.path().join("store");
        write_rollout(
            &store,
            "aaa",
            proj.to_str().unwrap(),
            &[
                user_item("why?", "2025-01-15T10:00:01Z"),
                json!({
                    "timestamp": "2025-01-15T10:00:02Z",
                    "type": "response_item",
                    "payload": {"type": "reasoning",
                                "summary": [{"type": "summary_text", "text": "thinking hard"}]}
                }),
                assistant_item("because", "2025-01-15T10:00:03Z"),
            ],
        );

        let adapter = CodexAdapter::with_root(store);
        adapter.sessions(&proj).unwrap();
        let messages = adapter.messages("aaa").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].thinking.len(), 1);
        assert_eq!(messages[1].thinking[0].text, "thinking hard");
    }

    #[test]
    fn month_rollover_directories_stay_watched() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("proj");
        fs::create_dir_all(&proj).unwrap();
        let store = dir.path().join("store");

        use chrono::{Datelike, Utc};
        let year = store.join(format!("{:04}", Utc::now().year()));
        fs::create_dir_all(&year).unwrap();

        let adapter = CodexAdapter::with_root(store);
        let handle = adapter.watch(&proj).unwrap();

        // A new month directory appears under the already-existing year.
        let day = year.join("07/01");
        fs::create_dir_all(&day).unwrap();
        let meta = json!({
            "timestamp": "2025-07-01T00:00:10Z",
            "type": "session_meta",
            "payload": {"id": "rollover", "cwd": proj.to_str().unwrap(),
                        "originator": "codex_cli_rs"}
        });
        fs::write(
            day.join("rollout-2025-07-01T00-00-10-rollover.jsonl"),
            format!("{meta}\n"),
        )
        .unwrap();

        let event = handle
            .events()
            .recv_timeout(Duration::from_secs(5))
            .expect("event from the new month directory");
        assert_eq!(event.session_id, "rollover");
        handle.close();
    }

    #[test]
    fn missing_root_is_absent_not_error() {
        let adapter = CodexAdapter::with_root(PathBuf::from("/no/such/root"));
        assert!(!adapter.detect(Path::new("/tmp")));
        assert!(adapter.sessions(Path::new("/tmp")).unwrap().is_empty());
    }
}
