//! Adapter for Amp thread files.
//!
//! Amp stores each thread as one JSON document, `threads/T-<uuid>.json`,
//! holding the metadata and the full message array together. Tool results
//! arrive as `tool_result` blocks on a later user message and are folded
//! back into the invoking `tool_use`; a user message that carried nothing
//! but results is absorbed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::RecursiveMode;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::cache::{FileCache, FileStamp};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::model::{
    Capabilities, ContentBlock, Event, EventKind, Message, Role, SearchMatch, Session,
    ThinkingBlock, TokenUsage, ToolUse,
};
use crate::paths;
use crate::pricing::PricingTable;
use crate::watch::{self, RawKind, WatchConfig, WatchHandle};

use super::{
    Adapter, derive_title, epoch, estimate_tokens, parse_timestamp_int, search_in_messages,
    sort_messages, sort_sessions, truncate_title,
};

pub struct AmpAdapter {
    threads_root: PathBuf,
    index: RwLock<FxHashMap<String, PathBuf>>,
    meta_cache: FileCache<Session>,
    message_cache: FileCache<Vec<Message>>,
    pricing: PricingTable,
    debounce: Duration,
    event_buffer: usize,
}

#[derive(Debug, Deserialize)]
struct ThreadFile {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    updated: i64,
    #[serde(default)]
    env: ThreadEnv,
    #[serde(default)]
    messages: Vec<ThreadMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ThreadEnv {
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    meta: MessageMeta,
    #[serde(default)]
    usage: Option<ThreadUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageMeta {
    #[serde(rename = "sentAt", default)]
    sent_at: i64,
}

#[derive(Debug, Deserialize)]
struct ThreadUsage {
    #[serde(rename = "inputTokens", default)]
    input_tokens: u64,
    #[serde(rename = "outputTokens", default)]
    output_tokens: u64,
    #[serde(rename = "cacheReadInputTokens", default)]
    cache_read: u64,
    #[serde(rename = "cacheCreationInputTokens", default)]
    cache_write: u64,
    #[serde(default)]
    model: Option<String>,
}

impl Default for AmpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AmpAdapter {
    pub fn new() -> Self {
        Self::with_root(Self::default_root())
    }

    pub fn with_root(threads_root: PathBuf) -> Self {
        Self::with_config(threads_root, &IngestConfig::default())
    }

    pub fn with_config(threads_root: PathBuf, config: &IngestConfig) -> Self {
        AmpAdapter {
            threads_root,
            index: RwLock::new(FxHashMap::default()),
            meta_cache: FileCache::new(config.meta_cache_entries),
            message_cache: FileCache::new(config.message_cache_entries),
            pricing: config.pricing_table(),
            debounce: config.debounce(),
            event_buffer: config.event_buffer,
        }
    }

    /// `AMP_INGEST_ROOT` override, else `~/.local/share/amp/threads`.
    pub(crate) fn default_root() -> PathBuf {
        if let Ok(root) = dotenvy::var("AMP_INGEST_ROOT") {
            return PathBuf::from(root);
        }
        dirs::data_local_dir()
            .map(|d| d.join("amp/threads"))
            .unwrap_or_default()
    }

    fn thread_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.threads_root) else {
            return Vec::new();
        };
        entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| is_thread_file(p))
            .collect()
    }

    fn load(&self, path: &Path) -> Result<Option<(Session, Vec<Message>)>> {
        let Some(stamp) = FileStamp::probe(path) else {
            return Ok(None);
        };
        // The thread id lives inside the document, so the caches are keyed
        // by path: a stamp hit must not read the file at all.
        let key = path.to_string_lossy().into_owned();
        if let Some(session) = self.meta_cache.get(&key, stamp)
            && let Some(messages) = self.message_cache.get(&key, stamp)
        {
            return Ok(Some((session, messages)));
        }

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        let thread: ThreadFile = match serde_json::from_slice(&bytes) {
            Ok(thread) => thread,
            Err(e) => {
                // A thread mid-rewrite parses as garbage; treat it like a
                // vanished file and let the next probe pick it up.
                tracing::debug!(path = %path.display(), error = %e, "skipping malformed thread file");
                return Ok(None);
            }
        };

        let (messages, model) = assemble_thread(&thread);
        let mut total = TokenUsage::default();
        for msg in &messages {
            total.input += msg.usage.input;
            total.output += msg.usage.output;
            total.cache_read += msg.usage.cache_read;
            total.cache_write += msg.usage.cache_write;
        }

        let created_at = parse_timestamp_int(thread.created).unwrap_or_else(epoch);
        let updated_at = parse_timestamp_int(thread.updated)
            .unwrap_or(created_at)
            .max(created_at);
        let name = match thread.title.as_deref() {
            Some(title) if !title.trim().is_empty() => truncate_title(title),
            _ => derive_title(&messages, &thread.id),
        };
        let session = Session {
            id: thread.id.clone(),
            name,
            adapter_id: self.id().to_string(),
            adapter_name: self.display_name().to_string(),
            adapter_icon: self.icon().to_string(),
            created_at,
            updated_at,
            total_tokens: total.total(),
            estimated_cost: self.pricing.cost(model.as_deref(), &total),
            message_count: messages.len(),
            parent_id: None,
            path: Some(path.to_path_buf()),
            file_size: Some(stamp.size),
        };

        self.meta_cache.set(key.clone(), session.clone(), stamp);
        self.message_cache.set(key, messages.clone(), stamp);
        Ok(Some((session, messages)))
    }

    fn thread_cwd(path: &Path) -> Option<String> {
        let bytes = std::fs::read(path).ok()?;
        let value: Value = serde_json::from_slice(&bytes).ok()?;
        value
            .get("env")
            .and_then(|e| e.get("cwd"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
    }

    fn path_for(&self, session_id: &str) -> Option<PathBuf> {
        if let Some(path) = self.index.read().get(session_id).cloned() {
            return Some(path);
        }
        let candidate = self.threads_root.join(format!("{session_id}.json"));
        candidate.is_file().then_some(candidate)
    }
}

impl Adapter for AmpAdapter {
    fn id(&self) -> &'static str {
        "amp"
    }

    fn display_name(&self) -> &'static str {
        "Amp"
    }

    fn icon(&self) -> &'static str {
        "◆"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            session_lookup: true,
            search: true,
            ..Capabilities::base()
        }
    }

    fn detect(&self, project_root: &Path) -> bool {
        self.thread_files().into_iter().any(|p| {
            Self::thread_cwd(&p)
                .is_some_and(|cwd| paths::contains(project_root, Path::new(&cwd)))
        })
    }

    fn sessions(&self, project_root: &Path) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        let mut index = FxHashMap::default();

        for path in self.thread_files() {
            let in_project = Self::thread_cwd(&path)
                .is_some_and(|cwd| paths::contains(project_root, Path::new(&cwd)));
            if !in_project {
                continue;
            }
            match self.load(&path) {
                Ok(Some((session, _))) => {
                    index.insert(session.id.clone(), path);
                    sessions.push(session);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable thread");
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
        match self.load(&path)? {
            Some((_, messages)) => Ok(messages),
            None => Ok(Vec::new()),
        }
    }

    fn session_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        let Some(path) = self.path_for(session_id) else {
            return Ok(None);
        };
        Ok(self.load(&path)?.map(|(session, _)| session))
    }

    fn search_messages(&self, session_id: &str, query: &str) -> Result<Vec<SearchMatch>> {
        let messages = self.messages(session_id)?;
        Ok(search_in_messages(session_id, &messages, query))
    }

    fn watch(&self, project_root: &Path) -> Result<WatchHandle> {
        let project_root = project_root.to_path_buf();
        let classify = Box::new(move |kind: RawKind, path: &Path| {
            if kind == RawKind::Remove || !is_thread_file(path) {
                return None;
            }
            let cwd = Self::thread_cwd(path)?;
            if !paths::contains(&project_root, Path::new(&cwd)) {
                return None;
            }
            let session_id = path.file_stem()?.to_str()?.to_string();
            let event_kind = if kind == RawKind::Create {
                EventKind::SessionCreated
            } else {
                EventKind::MessageAdded
            };
            Some(Event::new(event_kind, session_id))
        });

        let mut config = WatchConfig::new(
            vec![(self.threads_root.clone(), RecursiveMode::NonRecursive)],
            classify,
        );
        config.debounce = self.debounce;
        config.capacity = self.event_buffer;
        watch::spawn(config)
    }
}

fn is_thread_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("T-"))
}

/// Flatten the embedded message array, pairing tool results back onto their
/// invocations. Returns the messages and the last model seen in usage.
fn assemble_thread(thread: &ThreadFile) -> (Vec<Message>, Option<String>) {
    let mut messages: Vec<Message> = Vec::new();
    let mut pending_tools: FxHashMap<String, (usize, usize)> = FxHashMap::default();
    let mut model = None;

    for (idx, raw) in thread.messages.iter().enumerate() {
        let role = Role::parse(&raw.role);
        let mut blocks = Vec::new();
        let mut tool_uses = Vec::new();
        let mut thinking = Vec::new();
        let mut text_parts = Vec::new();

        for block in &raw.content {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        blocks.push(ContentBlock::Text {
                            text: text.to_string(),
                        });
                        text_parts.push(text.to_string());
                    }
                }
                Some("thinking") => {
                    if let Some(text) = block.get("thinking").and_then(|t| t.as_str()) {
                        let estimated_tokens = estimate_tokens(text);
                        blocks.push(ContentBlock::Thinking {
                            text: text.to_string(),
                            estimated_tokens,
                        });
                        thinking.push(ThinkingBlock {
                            text: text.to_string(),
                            estimated_tokens,
                        });
                    }
                }
                Some("tool_use") => {
                    let tool = ToolUse {
                        id: block
                            .get("id")
                            .and_then(|i| i.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        input: block
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
                Some("tool_result") => {
                    attach_result(block, &mut messages, &mut pending_tools);
                }
                Some(_) => {
                    blocks.push(ContentBlock::Raw {
                        payload: block.clone(),
                    });
                }
                None => {}
            }
        }

        if text_parts.is_empty() && blocks.is_empty() {
            // Carried only tool results; absorbed above.
            continue;
        }

        let usage = raw
            .usage
            .as_ref()
            .map(|u| {
                if u.model.is_some() {
                    model = u.model.clone();
                }
                TokenUsage {
                    input: u.input_tokens,
                    output: u.output_tokens,
                    cache_read: u.cache_read,
                    cache_write: u.cache_write,
                }
            })
            .unwrap_or_default();

        let msg_idx = messages.len();
        for (tool_idx, tool) in tool_uses.iter().enumerate() {
            if !tool.id.is_empty() {
                pending_tools.insert(tool.id.clone(), (msg_idx, tool_idx));
            }
        }

        messages.push(Message {
            id: format!("{}-{idx}", thread.id),
            role,
            timestamp: parse_timestamp_int(raw.meta.sent_at).unwrap_or_else(epoch),
            model: raw.usage.as_ref().and_then(|u| u.model.clone()),
            content: text_parts.join("\n"),
            blocks,
            tool_uses,
            thinking,
            usage,
        });
    }

    // Result pairing is index-based and fully resolved above, so reordering
    // afterwards is safe.
    sort_messages(&mut messages);
    (messages, model)
}

fn attach_result(
    block: &Value,
    messages: &mut [Message],
    pending_tools: &mut FxHashMap<String, (usize, usize)>,
) {
    let Some(tool_use_id) = block.get("tool_use_id").and_then(|i| i.as_str()) else {
        return;
    };
    let Some((msg_idx, tool_idx)) = pending_tools.remove(tool_use_id) else {
        return;
    };
    let output = match block.get("run") {
        Some(run) => run
            .get("output")
            .and_then(|o| o.as_str())
            .unwrap_or_default()
            .to_string(),
        None => block
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string(),
    };
    let is_error = block
        .get("run")
        .and_then(|r| r.get("exitCode"))
        .and_then(|c| c.as_i64())
        .is_some_and(|code| code != 0);

    if let Some(msg) = messages.get_mut(msg_idx) {
        if let Some(tool) = msg.tool_uses.get_mut(tool_idx) {
            tool.output = output.clone();
            tool.is_error = is_error;
        }
        for b in &mut msg.blocks {
            if let ContentBlock::ToolUse {
                id,
                output: block_output,
                is_error: block_error,
                ..
            } = b
                && id == tool_use_id
            {
                *block_output = output.clone();
                *block_error = is_error;
            }
        }
    }
}
