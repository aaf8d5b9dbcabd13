//! Adapter for Claude Code JSONL session logs.
//!
//! Claude Code stores one JSONL file per session under
//! `~/.claude/projects/<encoded-cwd>/<session-id>.jsonl`, where the encoded
//! cwd replaces path separators with dashes. Each line is one record:
//!   - `{"type":"summary","summary":"..."}` — rolling session title
//!   - `{"type":"user","message":{...},"timestamp":"...","cwd":"..."}`
//!   - `{"type":"assistant","message":{...},"timestamp":"..."}`
//!
//! Assistant content is an array of `text` / `thinking` / `tool_use` blocks
//! with token usage on the record; tool results arrive later as `tool_result`
//! blocks inside user records sharing a `tool_use_id`. User records whose
//! content is nothing but tool results are absorbed into the preceding
//! assistant's invocations. The log is append-only and may end in a partial
//! line; whatever parses is kept.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::RecursiveMode;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::{FileCache, FileStamp};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::model::{
    Capabilities, ContentBlock, Event, EventKind, Message, Role, SearchMatch, Session,
    ThinkingBlock, TokenUsage,
};
use crate::paths;
use crate::pricing::PricingTable;
use crate::watch::{self, RawKind, WatchConfig, WatchHandle};

use super::{
    Adapter, derive_title, epoch, estimate_tokens, parse_timestamp_value, search_in_messages,
    sort_messages, sort_sessions,
};

pub struct ClaudeCodeAdapter {
    projects_root: PathBuf,
    index: RwLock<FxHashMap<String, PathBuf>>,
    meta_cache: FileCache<Session>,
    message_cache: FileCache<Vec<Message>>,
    pricing: PricingTable,
    debounce: Duration,
    event_buffer: usize,
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeCodeAdapter {
    pub fn new() -> Self {
        Self::with_root(Self::default_root())
    }

    pub fn with_root(projects_root: PathBuf) -> Self {
        Self::with_config(projects_root, &IngestConfig::default())
    }

    pub fn with_config(projects_root: PathBuf, config: &IngestConfig) -> Self {
        ClaudeCodeAdapter {
            projects_root,
            index: RwLock::new(FxHashMap::default()),
            meta_cache: FileCache::new(config.meta_cache_entries),
            message_cache: FileCache::new(config.message_cache_entries),
            pricing: config.pricing_table(),
            debounce: config.debounce(),
            event_buffer: config.event_buffer,
        }
    }

    /// `CLAUDE_INGEST_ROOT` override, else `~/.claude/projects`.
    pub(crate) fn default_root() -> PathBuf {
        if let Ok(root) = dotenvy::var("CLAUDE_INGEST_ROOT") {
            return PathBuf::from(root);
        }
        dirs::home_dir()
            .map(|h| h.join(".claude/projects"))
            .unwrap_or_default()
    }

    /// Parse one session file, memoizing both caches under the same stamp.
    /// `None` means the file vanished between index and read — not an error.
    fn load(&self, session_id: &str, path: &Path) -> Result<Option<(Session, Vec<Message>)>> {
        let Some(stamp) = FileStamp::probe(path) else {
            return Ok(None);
        };
        if let Some(session) = self.meta_cache.get(session_id, stamp)
            && let Some(messages) = self.message_cache.get(session_id, stamp)
        {
            return Ok(Some((session, messages)));
        }

        let parsed = assemble_file(path)?;
        let session = self.build_session(session_id, path, stamp, &parsed);
        self.meta_cache.set(session_id, session.clone(), stamp);
        self.message_cache
            .set(session_id, parsed.messages.clone(), stamp);
        Ok(Some((session, parsed.messages)))
    }

    fn build_session(
        &self,
        session_id: &str,
        path: &Path,
        stamp: FileStamp,
        parsed: &ParsedLog,
    ) -> Session {
        let mut total_tokens = 0u64;
        let mut cost = 0.0f64;
        for msg in &parsed.messages {
            total_tokens += msg.usage.total();
            if !msg.usage.is_empty() {
                cost += self.pricing.cost(msg.model.as_deref(), &msg.usage);
            }
        }
        let created_at = parsed.first_ts.unwrap_or_else(epoch);
        let updated_at = parsed.last_ts.unwrap_or(created_at).max(created_at);
        let name = parsed
            .summary
            .clone()
            .unwrap_or_else(|| derive_title(&parsed.messages, session_id));

        Session {
            id: session_id.to_string(),
            name,
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
        }
    }

    fn path_for(&self, session_id: &str) -> Option<PathBuf> {
        if let Some(path) = self.index.read().get(session_id).cloned() {
            return Some(path);
        }
        // Index not built (or stale): look for the file directly.
        let file_name = format!("{session_id}.jsonl");
        for dir in std::fs::read_dir(&self.projects_root).ok()?.flatten() {
            let candidate = dir.path().join(&file_name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}

impl Adapter for ClaudeCodeAdapter {
    fn id(&self) -> &'static str {
        "claude-code"
    }

    fn display_name(&self) -> &'static str {
        "Claude Code"
    }

    fn icon(&self) -> &'static str {
        "✳"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            session_lookup: true,
            search: true,
            ..Capabilities::base()
        }
    }

    fn detect(&self, project_root: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.projects_root) else {
            return false;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(header) = dir_header(&entry.path())
                && let Some(cwd) = header.cwd
                && paths::contains(project_root, Path::new(&cwd))
            {
                return true;
            }
        }
        false
    }

    fn sessions(&self, project_root: &Path) -> Result<Vec<Session>> {
        if !self.projects_root.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.projects_root)
            .with_context(|| format!("read projects root {}", self.projects_root.display()))?;

        let mut sessions = Vec::new();
        let mut index = FxHashMap::default();

        for dir in entries.flatten() {
            if !dir.path().is_dir() {
                continue;
            }
            let files = match std::fs::read_dir(dir.path()) {
                Ok(files) => files,
                Err(e) => {
                    tracing::debug!(dir = %dir.path().display(), error = %e, "skipping unreadable project dir");
                    continue;
                }
            };
            for file in files.flatten() {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                let Some(header) = read_header(&path) else {
                    continue;
                };
                match &header.cwd {
                    Some(cwd) if paths::contains(project_root, Path::new(cwd)) => {}
                    _ => continue,
                }
                let session_id = header.session_id.unwrap_or_else(|| {
                    path.file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default()
                        .to_string()
                });
                if session_id.is_empty() {
                    continue;
                }
                match self.load(&session_id, &path) {
                    Ok(Some((session, _))) => {
                        index.insert(session_id, path);
                        sessions.push(session);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "skipping unreadable session file");
                    }
                }
            }
        }

        // Atomic swap: the newer scan wins, stale ids disappear.
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
            // Backing file truncated away since the scan.
            None => Ok(Vec::new()),
        }
    }

    fn session_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        let Some(path) = self.path_for(session_id) else {
            return Ok(None);
        };
        Ok(self.load(session_id, &path)?.map(|(session, _)| session))
    }

    fn search_messages(&self, session_id: &str, query: &str) -> Result<Vec<SearchMatch>> {
        let messages = self.messages(session_id)?;
        Ok(search_in_messages(session_id, &messages, query))
    }

    fn watch(&self, project_root: &Path) -> Result<WatchHandle> {
        let project_root = project_root.to_path_buf();
        let classify = Box::new(move |kind: RawKind, path: &Path| {
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                return None;
            }
            let stem = path.file_stem()?.to_str()?.to_string();
            match kind {
                RawKind::Remove => None,
                RawKind::Create | RawKind::Write => {
                    // Session identity is the filename stem, but membership
                    // needs the embedded cwd.
                    let header = read_header(path)?;
                    let cwd = header.cwd?;
                    if !paths::contains(&project_root, Path::new(&cwd)) {
                        return None;
                    }
                    let event_kind = if kind == RawKind::Create {
                        EventKind::SessionCreated
                    } else {
                        EventKind::MessageAdded
                    };
                    Some(
                        Event::new(event_kind, stem)
                            .with_payload(serde_json::json!({ "path": path.display().to_string() })),
                    )
                }
            }
        });

        let mut config = WatchConfig::new(
            vec![(self.projects_root.clone(), RecursiveMode::Recursive)],
            classify,
        );
        config.debounce = self.debounce;
        config.capacity = self.event_buffer;
        watch::spawn(config)
    }
}

/// Minimal header pulled from the first few records of a log file.
struct Header {
    session_id: Option<String>,
    cwd: Option<String>,
}

/// Parse up to the first eight lines looking for a record carrying `cwd`
/// (summary records do not). Never scans full history.
fn read_header(path: &Path) -> Option<Header> {
    let file = std::fs::File::open(path).ok()?;
    let reader = std::io::BufReader::new(file);
    let mut header: Option<Header> = None;
    for line in reader.lines().take(8) {
        let line = line.ok()?;
        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let session_id = value
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(String::from);
        let cwd = value.get("cwd").and_then(|v| v.as_str()).map(String::from);
        if cwd.is_some() {
            return Some(Header { session_id, cwd });
        }
        if header.is_none() && session_id.is_some() {
            header = Some(Header {
                session_id,
                cwd: None,
            });
        }
    }
    header
}

/// Header of any one session file in a project directory, used by `detect`.
fn dir_header(dir: &Path) -> Option<Header> {
    for file in std::fs::read_dir(dir).ok()?.flatten() {
        let path = file.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jsonl")
            && let Some(header) = read_header(&path)
        {
            return Some(header);
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

struct ParsedLog {
    messages: Vec<Message>,
    summary: Option<String>,
    first_ts: Option<DateTime<Utc>>,
    last_ts: Option<DateTime<Utc>>,
}

/// Where an already-emitted tool invocation lives, for result pairing.
type ToolSlot = (usize, usize);

fn assemble_file(path: &Path) -> Result<ParsedLog> {
    let file =
        std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut messages: Vec<Message> = Vec::new();
    let mut pending_tools: FxHashMap<String, ToolSlot> = FxHashMap::default();
    let mut seen_uuids: FxHashSet<String> = FxHashSet::default();
    let mut summary = None;
    let mut first_ts = None;
    let mut last_ts: Option<DateTime<Utc>> = None;

    for (line_no, line) in reader.lines().enumerate() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }
        // A trailing partial line fails to parse and is silently skipped.
        let record: LogRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::trace!(line = line_no, error = %e, "skipping malformed record");
                continue;
            }
        };

        // Resumed sessions replay earlier records verbatim; first one wins.
        if let Some(uuid) = &record.uuid
            && !seen_uuids.insert(uuid.clone())
        {
            continue;
        }

        let ts = record.timestamp.as_ref().and_then(parse_timestamp_value);
        if let Some(ts) = ts {
            first_ts = Some(first_ts.map_or(ts, |f: DateTime<Utc>| f.min(ts)));
            last_ts = Some(last_ts.map_or(ts, |l| l.max(ts)));
        }

        match record.kind.as_deref() {
            Some("summary") => {
                if let Some(s) = record.summary {
                    summary = Some(super::truncate_title(&s));
                }
            }
            Some("user") => {
                let Some(body) = record.message else { continue };
                if let Some(msg) = assemble_user(
                    &body,
                    record.uuid.as_deref(),
                    line_no,
                    ts,
                    &mut messages,
                    &mut pending_tools,
                ) {
                    messages.push(msg);
                }
            }
            Some("assistant") => {
                let Some(body) = record.message else { continue };
                let msg = assemble_assistant(&body, record.uuid.as_deref(), line_no, ts);
                for (tool_idx, tool) in msg.tool_uses.iter().enumerate() {
                    pending_tools.insert(tool.id.clone(), (messages.len(), tool_idx));
                }
                messages.push(msg);
            }
            _ => {}
        }
    }

    sort_messages(&mut messages);
    Ok(ParsedLog {
        messages,
        summary,
        first_ts,
        last_ts,
    })
}

/// Assemble a user record. Tool results are routed to their invocation; a
/// record left with no other content is absorbed and yields `None`.
fn assemble_user(
    body: &Value,
    uuid: Option<&str>,
    line_no: usize,
    ts: Option<DateTime<Utc>>,
    messages: &mut [Message],
    pending_tools: &mut FxHashMap<String, ToolSlot>,
) -> Option<Message> {
    let mut text_parts: Vec<String> = Vec::new();
    let mut blocks: Vec<ContentBlock> = Vec::new();

    match body.get("content") {
        Some(Value::String(text)) => {
            text_parts.push(text.clone());
            blocks.push(ContentBlock::Text { text: text.clone() });
        }
        Some(Value::Array(items)) => {
            for item in items {
                match item.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                            text_parts.push(text.to_string());
                            blocks.push(ContentBlock::Text {
                                text: text.to_string(),
                            });
                        }
                    }
                    Some("tool_result") => {
                        attach_tool_result(item, messages, pending_tools);
                    }
                    _ => blocks.push(ContentBlock::Raw {
                        payload: item.clone(),
                    }),
                }
            }
        }
        _ => {}
    }

    if text_parts.is_empty() && blocks.is_empty() {
        // Tool-result-only record: absorbed, never a standalone message.
        return None;
    }
    let content = text_parts.join("\n\n");

    Some(Message {
        id: uuid
            .map(String::from)
            .unwrap_or_else(|| format!("line-{line_no}")),
        role: Role::User,
        timestamp: ts.unwrap_or_else(epoch),
        model: None,
        content,
        blocks,
        tool_uses: Vec::new(),
        thinking: Vec::new(),
        usage: TokenUsage::default(),
    })
}

fn assemble_assistant(
    body: &Value,
    uuid: Option<&str>,
    line_no: usize,
    ts: Option<DateTime<Utc>>,
) -> Message {
    let model = body
        .get("model")
        .and_then(|m| m.as_str())
        .map(String::from);
    let mut text_parts: Vec<String> = Vec::new();
    let mut blocks: Vec<ContentBlock> = Vec::new();
    let mut tool_uses = Vec::new();
    let mut thinking = Vec::new();

    if let Some(Value::Array(items)) = body.get("content") {
        for item in items {
            match item.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                        text_parts.push(text.to_string());
                        blocks.push(ContentBlock::Text {
                            text: text.to_string(),
                        });
                    }
                }
                Some("thinking") => {
                    let text = item
                        .get("thinking")
                        .or_else(|| item.get("text"))
                        .and_then(|t| t.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let estimated = estimate_tokens(&text);
                    blocks.push(ContentBlock::Thinking {
                        text: text.clone(),
                        estimated_tokens: estimated,
                    });
                    thinking.push(ThinkingBlock {
                        text,
                        estimated_tokens: estimated,
                    });
                }
                Some("tool_use") => {
                    let tool = crate::model::ToolUse {
                        id: item
                            .get("id")
                            .and_then(|i| i.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: item
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        input: item
                            .get("input")
                            .map(|i| i.to_string())
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
                _ => blocks.push(ContentBlock::Raw {
                    payload: item.clone(),
                }),
            }
        }
    }

    let usage = body
        .get("usage")
        .map(|u| TokenUsage {
            input: u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            output: u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            cache_read: u
                .get("cache_read_input_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            cache_write: u
                .get("cache_creation_input_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        })
        .unwrap_or_default();

    Message {
        id: uuid
            .map(String::from)
            .unwrap_or_else(|| format!("line-{line_no}")),
        role: Role::Assistant,
        timestamp: ts.unwrap_or_else(epoch),
        model,
        content: text_parts.join("\n\n"),
        blocks,
        tool_uses,
        thinking,
        usage,
    }
}

/// Pair a `tool_result` with its invocation, best effort. Unpaired results
/// are dropped; unpaired invocations keep their empty output.
fn attach_tool_result(
    item: &Value,
    messages: &mut [Message],
    pending_tools: &mut FxHashMap<String, ToolSlot>,
) {
    let Some(tool_use_id) = item.get("tool_use_id").and_then(|i| i.as_str()) else {
        return;
    };
    let Some((msg_idx, tool_idx)) = pending_tools.remove(tool_use_id) else {
        return;
    };
    let output = flatten_result_content(item.get("content"));
    let is_error = item
        .get("is_error")
        .and_then(|e| e.as_bool())
        .unwrap_or(false);

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
                && id == tool_use_id
            {
                *block_output = output.clone();
                *block_error = is_error;
            }
        }
    }
}

/// Tool result content is a string or an array of text blocks.
fn flatten_result_content(content: Option<&Value>) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write_session(root: &Path, project: &str, sid: &str, lines: &[Value]) -> PathBuf {
        let dir = root.join(project);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{sid}.jsonl"));
        let content: String = lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&path, content).unwrap();
        path
    }

    fn user_line(text: &str, ts: &str, cwd: &str, sid: &str) -> Value {
        json!({
            "type": "user",
            "sessionId": sid,
            "cwd": cwd,
            "timestamp": ts,
            "uuid": format!("u-{ts}"),
            "message": {"role": "user", "content": text}
        })
    }

    fn assistant_line(text: &str, ts: &str, input: u64, output: u64) -> Value {
        json!({
            "type": "assistant",
            "timestamp": ts,
            "uuid": format!("a-{ts}"),
            "message": {
                "role": "assistant",
                "model": "claude-sonnet-4-20250514",
                "content": [{"type": "text", "text": text}],
                "usage": {"input_tokens": input, "output_tokens": output}
            }
        })
    }

    #[test]
    fn sessions_parse_count_tokens_and_title() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("proj");
        fs::create_dir_all(&project).unwrap();
        write_session(
            dir.path().join("store").as_path(),
            "-proj",
            "session-x",
            &[
                user_line("hello", "2025-01-01T00:00:00Z", project.to_str().unwrap(), "session-x"),
                assistant_line("hi", "2025-01-01T00:00:01Z", 10, 5),
            ],
        );

        let adapter = ClaudeCodeAdapter::with_root(dir.path().join("store"));
        assert!(adapter.detect(&project));
        let sessions = adapter.sessions(&project).unwrap();
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.id, "session-x");
        assert_eq!(s.message_count, 2);
        assert_eq!(s.total_tokens, 15);
        assert_eq!(s.name, "hello");
        assert!(s.estimated_cost > 0.0);
        assert!(s.updated_at >= s.created_at);

        let messages = adapter.messages("session-x").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[0].timestamp <= messages[1].timestamp);
    }

    #[test]
    fn appended_record_invalidates_the_cache() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("proj");
        fs::create_dir_all(&project).unwrap();
        let cwd = project.to_str().unwrap().to_string();
        let path = write_session(
            dir.path().join("store").as_path(),
            "-proj",
            "s1",
            &[
                user_line("hello", "2025-01-01T00:00:00Z", &cwd, "s1"),
                assistant_line("hi", "2025-01-01T00:00:01Z", 10, 5),
            ],
        );

        let adapter = ClaudeCodeAdapter::with_root(dir.path().join("store"));
        assert_eq!(adapter.messages("s1").unwrap().len(), 2);

        let mut content = fs::read_to_string(&path).unwrap();
        content.push('\n');
        content.push_str(&user_line("again", "2025-01-01T00:00:02Z", &cwd, "s1").to_string());
        fs::write(&path, content).unwrap();

        assert_eq!(adapter.messages("s1").unwrap().len(), 3);
    }

    #[test]
    fn tool_result_only_user_records_are_absorbed() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("proj");
        fs::create_dir_all(&project).unwrap();
        let cwd = project.to_str().unwrap().to_string();

        let lines = vec![
            user_line("run ls", "2025-01-01T00:00:00Z", &cwd, "s1"),
            json!({
                "type": "assistant",
                "timestamp": "2025-01-01T00:00:01Z",
                "uuid": "a1",
                "message": {
                    "role": "assistant",
                    "model": "claude-sonnet-4",
                    "content": [{"type": "tool_use", "id": "T1", "name": "Bash", "input": {"cmd": "ls"}}],
                    "usage": {"input_tokens": 3, "output_tokens": 2}
                }
            }),
            json!({
                "type": "user",
                "timestamp": "2025-01-01T00:00:02Z",
                "uuid": "u2",
                "message": {
                    "role": "user",
                    "content": [{"type": "tool_result", "tool_use_id": "T1", "content": "a b c"}]
                }
            }),
            assistant_line("done", "2025-01-01T00:00:03Z", 1, 1),
        ];
        write_session(dir.path().join("store").as_path(), "-proj", "s1", &lines);

        let adapter = ClaudeCodeAdapter::with_root(dir.path().join("store"));
        let messages = adapter.messages("s1").unwrap();
        // user, assistant(tool), assistant(done) — the result record is gone.
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().filter(|m| m.role == Role::User).count() == 1);
        let tool_msg = &messages[1];
        assert_eq!(tool_msg.tool_uses.len(), 1);
        assert_eq!(tool_msg.tool_uses[0].output, "a b c");
        assert!(!tool_msg.tool_uses[0].is_error);
        assert_eq!(messages[2].content, "done");
    }

    #[test]
    fn trailing_partial_line_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("proj");
        fs::create_dir_all(&project).unwrap();
        let cwd = project.to_str().unwrap().to_string();
        let path = write_session(
            dir.path().join("store").as_path(),
            "-proj",
            "s1",
            &[
                user_line("hello", "2025-01-01T00:00:00Z", &cwd, "s1"),
                assistant_line("hi", "2025-01-01T00:00:01Z", 1, 1),
            ],
        );
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("\n{\"type\":\"assistant\",\"message\":{\"role\":\"assis");
        fs::write(&path, content).unwrap();

        let adapter = ClaudeCodeAdapter::with_root(dir.path().join("store"));
        assert_eq!(adapter.messages("s1").unwrap().len(), 2);
    }

    #[test]
    fn sessions_exclude_other_projects() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("proj");
        let proj2 = dir.path().join("proj2");
        fs::create_dir_all(&proj).unwrap();
        fs::create_dir_all(&proj2).unwrap();
        let store = dir.path().join("store");

        write_session(
            &store,
            "-proj",
            "mine",
            &[user_line("a", "2025-01-01T00:00:00Z", proj.to_str().unwrap(), "mine")],
        );
        write_session(
            &store,
            "-proj2",
            "other",
            &[user_line("b", "2025-01-01T00:00:00Z", proj2.to_str().unwrap(), "other")],
        );

        let adapter = ClaudeCodeAdapter::with_root(store);
        let sessions = adapter.sessions(&proj).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "mine");
    }

    #[test]
    fn replayed_records_are_deduplicated_by_uuid() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("proj");
        fs::create_dir_all(&project).unwrap();
        let cwd = project.to_str().unwrap().to_string();
        let hello = user_line("hello", "2025-01-01T00:00:00Z", &cwd, "s1");
        write_session(
            dir.path().join("store").as_path(),
            "-proj",
            "s1",
            &[
                hello.clone(),
                assistant_line("hi", "2025-01-01T00:00:01Z", 1, 1),
                // Resume replays the opening record.
                hello,
                user_line("more", "2025-01-01T00:00:02Z", &cwd, "s1"),
            ],
        );

        let adapter = ClaudeCodeAdapter::with_root(dir.path().join("store"));
        assert_eq!(adapter.messages("s1").unwrap().len(), 3);
    }

    #[test]
    #[serial_test::serial]
    fn env_override_redirects_default_root() {
        let dir = TempDir::new().unwrap();
        unsafe { std::env::set_var("CLAUDE_INGEST_ROOT", dir.path()) };
        assert_eq!(ClaudeCodeAdapter::default_root(), dir.path());
        unsafe { std::env::remove_var("CLAUDE_INGEST_ROOT") };
    }

    #[test]
    fn missing_root_detects_false_and_lists_empty() {
        let adapter = ClaudeCodeAdapter::with_root(PathBuf::from("/no/such/root"));
        assert!(!adapter.detect(Path::new("/tmp")));
        assert!(adapter.sessions(Path::new("/tmp")).unwrap().is_empty());
    }

    #[test]
    fn summary_record_overrides_title() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("proj");
        fs::create_dir_all(&project).unwrap();
        let cwd = project.to_str().unwrap().to_string();
        write_session(
            dir.path().join("store").as_path(),
            "-proj",
            "s1",
            &[
                json!({"type": "summary", "summary": "Fixing the build"}),
                user_line("hello", "2025-01-01T00:00:00Z", &cwd, "s1"),
            ],
        );
        let adapter = ClaudeCodeAdapter::with_root(dir.path().join("store"));
        let sessions = adapter.sessions(&project).unwrap();
        assert_eq!(sessions[0].name, "Fixing the build");
    }

    #[test]
    fn search_finds_substring_hits() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("proj");
        fs::create_dir_all(&project).unwrap();
        let cwd = project.to_str().unwrap().to_string();
        write_session(
            dir.path().join("store").as_path(),
            "-proj",
            "s1",
            &[
                user_line("please refactor the parser", "2025-01-01T00:00:00Z", &cwd, "s1"),
                assistant_line("refactored", "2025-01-01T00:00:01Z", 1, 1),
            ],
        );
        let adapter = ClaudeCodeAdapter::with_root(dir.path().join("store"));
        adapter.sessions(&project).unwrap();
        let hits = adapter.search_messages("s1", "REFACTOR").unwrap();
        assert_eq!(hits.len(), 2);
    }
}
