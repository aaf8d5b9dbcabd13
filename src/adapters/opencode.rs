//! Adapter for OpenCode per-message storage trees.
//!
//! OpenCode splits a session across three subtrees of its storage root:
//! `session/<project>/<sid>.json` (session info), `message/<sid>/<mid>.json`
//! (message envelopes), and `part/<mid>/<pid>.json` (content parts —
//! text, reasoning, tool calls). Assembling one session means reading the
//! info file, every message file, and every part file of every message, so
//! the assembled result is cached against the info file's stamp folded with
//! the message directory's: OpenCode rewrites the info file on every turn,
//! and the directory mtime catches a message that lands before that rewrite.

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

pub struct OpenCodeAdapter {
    storage_root: PathBuf,
    index: RwLock<FxHashMap<String, PathBuf>>,
    project_map: RwLock<Option<FxHashMap<String, String>>>,
    meta_cache: FileCache<Session>,
    message_cache: FileCache<Vec<Message>>,
    pricing: PricingTable,
    debounce: Duration,
    event_buffer: usize,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    directory: Option<String>,
    #[serde(rename = "projectID", default)]
    project_id: Option<String>,
    #[serde(rename = "parentID", default)]
    parent_id: Option<String>,
    #[serde(default)]
    time: InfoTime,
}

#[derive(Debug, Default, Deserialize)]
struct InfoTime {
    #[serde(default)]
    created: i64,
    #[serde(default)]
    updated: i64,
}

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    id: String,
    #[serde(default)]
    role: String,
    #[serde(rename = "modelID", default)]
    model_id: Option<String>,
    #[serde(default)]
    time: InfoTime,
    #[serde(default)]
    tokens: Option<MessageTokens>,
}

#[derive(Debug, Deserialize)]
struct MessageTokens {
    #[serde(default)]
    input: u64,
    #[serde(default)]
    output: u64,
    #[serde(default)]
    cache: TokenCache,
}

#[derive(Debug, Default, Deserialize)]
struct TokenCache {
    #[serde(default)]
    read: u64,
    #[serde(default)]
    write: u64,
}

#[derive(Debug, Deserialize)]
struct PartFile {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "callID", default)]
    call_id: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    state: Option<PartState>,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    id: String,
    #[serde(default)]
    worktree: String,
}

#[derive(Debug, Deserialize)]
struct PartState {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    output: Option<String>,
}

impl Default for OpenCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenCodeAdapter {
    pub fn new() -> Self {
        Self::with_root(Self::default_root())
    }

    pub fn with_root(storage_root: PathBuf) -> Self {
        Self::with_config(storage_root, &IngestConfig::default())
    }

    pub fn with_config(storage_root: PathBuf, config: &IngestConfig) -> Self {
        OpenCodeAdapter {
            storage_root,
            index: RwLock::new(FxHashMap::default()),
            project_map: RwLock::new(None),
            meta_cache: FileCache::new(config.meta_cache_entries),
            message_cache: FileCache::new(config.message_cache_entries),
            pricing: config.pricing_table(),
            debounce: config.debounce(),
            event_buffer: config.event_buffer,
        }
    }

    /// `OPENCODE_INGEST_ROOT` override, else the platform data dir.
    pub(crate) fn default_root() -> PathBuf {
        if let Ok(root) = dotenvy::var("OPENCODE_INGEST_ROOT") {
            return PathBuf::from(root);
        }
        dirs::data_local_dir()
            .map(|d| d.join("opencode/storage"))
            .unwrap_or_default()
    }

    fn session_files(&self) -> Vec<PathBuf> {
        let session_root = self.storage_root.join("session");
        let mut files = Vec::new();
        let Ok(projects) = std::fs::read_dir(&session_root) else {
            return files;
        };
        for project in projects.flatten() {
            if !project.path().is_dir() {
                continue;
            }
            let Ok(entries) = std::fs::read_dir(project.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    files.push(path);
                }
            }
        }
        files
    }

    fn read_info(path: &Path) -> Option<SessionInfo> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Worktree for a session: the info file's `directory` when present,
    /// otherwise the `project/<id>.json` record the session points at.
    fn session_directory(&self, info: &SessionInfo) -> Option<String> {
        if let Some(dir) = &info.directory {
            return Some(dir.clone());
        }
        self.project_worktree(info.project_id.as_deref()?)
    }

    fn project_worktree(&self, project_id: &str) -> Option<String> {
        {
            let guard = self.project_map.read();
            if let Some(map) = guard.as_ref() {
                return map.get(project_id).cloned();
            }
        }
        let mut map = FxHashMap::default();
        if let Ok(entries) = std::fs::read_dir(self.storage_root.join("project")) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(bytes) = std::fs::read(&path) else {
                    continue;
                };
                if let Ok(project) = serde_json::from_slice::<ProjectInfo>(&bytes) {
                    map.insert(project.id, project.worktree);
                }
            }
        }
        let worktree = map.get(project_id).cloned();
        *self.project_map.write() = Some(map);
        worktree
    }

    /// Cache validator: the info file's stamp folded with the message
    /// directory's, so a new message invalidates even before OpenCode
    /// rewrites the session info.
    fn cache_stamp(&self, session_id: &str, info_stamp: FileStamp) -> FileStamp {
        let dir = self.storage_root.join("message").join(session_id);
        match FileStamp::probe(&dir) {
            Some(dir_stamp) => FileStamp {
                size: info_stamp.size.wrapping_add(dir_stamp.size),
                mtime: info_stamp.mtime.max(dir_stamp.mtime),
            },
            None => info_stamp,
        }
    }

    fn load(&self, info_path: &Path) -> Result<Option<(Session, Vec<Message>)>> {
        let Some(info_stamp) = FileStamp::probe(info_path) else {
            return Ok(None);
        };
        let Some(info) = Self::read_info(info_path) else {
            return Ok(None);
        };
        let stamp = self.cache_stamp(&info.id, info_stamp);
        if let Some(session) = self.meta_cache.get(&info.id, stamp)
            && let Some(messages) = self.message_cache.get(&info.id, stamp)
        {
            return Ok(Some((session, messages)));
        }

        let messages = self.assemble_messages(&info.id)?;
        let mut total = TokenUsage::default();
        let mut model = None;
        for msg in &messages {
            total.input += msg.usage.input;
            total.output += msg.usage.output;
            total.cache_read += msg.usage.cache_read;
            total.cache_write += msg.usage.cache_write;
            if msg.model.is_some() {
                model = msg.model.clone();
            }
        }

        let created_at = parse_timestamp_int(info.time.created).unwrap_or_else(epoch);
        let updated_at = parse_timestamp_int(info.time.updated)
            .unwrap_or(created_at)
            .max(created_at);
        let name = match info.title.as_deref() {
            Some(title) if !title.trim().is_empty() => truncate_title(title),
            _ => derive_title(&messages, &info.id),
        };
        let session = Session {
            id: info.id.clone(),
            name,
            adapter_id: self.id().to_string(),
            adapter_name: self.display_name().to_string(),
            adapter_icon: self.icon().to_string(),
            created_at,
            updated_at,
            total_tokens: total.total(),
            estimated_cost: self.pricing.cost(model.as_deref(), &total),
            message_count: messages.len(),
            parent_id: info.parent_id.clone(),
            path: Some(info_path.to_path_buf()),
            file_size: Some(info_stamp.size),
        };

        self.meta_cache.set(&info.id, session.clone(), stamp);
        self.message_cache.set(&info.id, messages.clone(), stamp);
        Ok(Some((session, messages)))
    }

    fn assemble_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let msg_dir = self.storage_root.join("message").join(session_id);
        let mut messages = Vec::new();
        let entries = match std::fs::read_dir(&msg_dir) {
            Ok(entries) => entries,
            // A session can exist before its first message lands.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(messages),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("read message dir {}", msg_dir.display()));
            }
        };

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();

        for path in files {
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            let envelope: MessageEnvelope = match serde_json::from_slice(&bytes) {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping malformed message file");
                    continue;
                }
            };
            messages.push(self.assemble_message(envelope));
        }

        sort_messages(&mut messages);
        Ok(messages)
    }

    fn assemble_message(&self, envelope: MessageEnvelope) -> Message {
        let mut blocks = Vec::new();
        let mut tool_uses = Vec::new();
        let mut thinking = Vec::new();
        let mut text_parts = Vec::new();

        for payload in self.read_parts(&envelope.id) {
            let Ok(part) = serde_json::from_value::<PartFile>(payload.clone()) else {
                continue;
            };
            match part.kind.as_str() {
                "text" => {
                    if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                        blocks.push(ContentBlock::Text { text: text.clone() });
                        text_parts.push(text);
                    }
                }
                "reasoning" => {
                    if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                        let estimated_tokens = estimate_tokens(&text);
                        blocks.push(ContentBlock::Thinking {
                            text: text.clone(),
                            estimated_tokens,
                        });
                        thinking.push(ThinkingBlock {
                            text,
                            estimated_tokens,
                        });
                    }
                }
                "tool" => {
                    let state = part.state.unwrap_or(PartState {
                        status: None,
                        input: None,
                        output: None,
                    });
                    let tool = ToolUse {
                        id: part.call_id.unwrap_or_default(),
                        name: part.tool.unwrap_or_default(),
                        input: state
                            .input
                            .map(|i| i.to_string())
                            .unwrap_or_default(),
                        output: state.output.unwrap_or_default(),
                        is_error: state.status.as_deref() == Some("error"),
                    };
                    blocks.push(ContentBlock::ToolUse {
                        id: tool.id.clone(),
                        name: tool.name.clone(),
                        input: tool.input.clone(),
                        output: tool.output.clone(),
                        is_error: tool.is_error,
                    });
                    tool_uses.push(tool);
                }
                // Step markers and snapshots carry no content.
                "step-start" | "step-finish" | "snapshot" => {}
                // File references, patches and future part kinds survive
                // as raw payloads.
                _ => blocks.push(ContentBlock::Raw { payload }),
            }
        }

        let usage = envelope
            .tokens
            .map(|t| TokenUsage {
                input: t.input,
                output: t.output,
                cache_read: t.cache.read,
                cache_write: t.cache.write,
            })
            .unwrap_or_default();

        Message {
            id: envelope.id,
            role: Role::parse(&envelope.role),
            timestamp: parse_timestamp_int(envelope.time.created).unwrap_or_else(epoch),
            model: envelope.model_id,
            content: text_parts.join("\n"),
            blocks,
            tool_uses,
            thinking,
            usage,
        }
    }

    fn read_parts(&self, message_id: &str) -> Vec<Value> {
        let part_dir = self.storage_root.join("part").join(message_id);
        let Ok(entries) = std::fs::read_dir(&part_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();

        files
            .into_iter()
            .filter_map(|path| {
                let bytes = std::fs::read(&path).ok()?;
                serde_json::from_slice(&bytes).ok()
            })
            .collect()
    }

    fn path_for(&self, session_id: &str) -> Option<PathBuf> {
        if let Some(path) = self.index.read().get(session_id).cloned() {
            return Some(path);
        }
        self.session_files().into_iter().find(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s == session_id)
        })
    }
}

fn project_worktree_at(storage_root: &Path, project_id: &str) -> Option<String> {
    let path = storage_root
        .join("project")
        .join(format!("{project_id}.json"));
    let bytes = std::fs::read(path).ok()?;
    let project: ProjectInfo = serde_json::from_slice(&bytes).ok()?;
    Some(project.worktree)
}

impl Adapter for OpenCodeAdapter {
    fn id(&self) -> &'static str {
        "opencode"
    }

    fn display_name(&self) -> &'static str {
        "OpenCode"
    }

    fn icon(&self) -> &'static str {
        "◍"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            session_lookup: true,
            search: true,
            ..Capabilities::base()
        }
    }

    fn detect(&self, project_root: &Path) -> bool {
        self.session_files().into_iter().any(|p| {
            Self::read_info(&p)
                .and_then(|info| self.session_directory(&info))
                .is_some_and(|dir| paths::contains(project_root, Path::new(&dir)))
        })
    }

    fn sessions(&self, project_root: &Path) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        let mut index = FxHashMap::default();

        for path in self.session_files() {
            let Some(info) = Self::read_info(&path) else {
                continue;
            };
            let in_project = self
                .session_directory(&info)
                .is_some_and(|dir| paths::contains(project_root, Path::new(&dir)));
            if !in_project {
                continue;
            }
            match self.load(&path) {
                Ok(Some((session, _))) => {
                    index.insert(info.id, path);
                    sessions.push(session);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable session");
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
        let storage_root = self.storage_root.clone();
        let classify = Box::new(move |kind: RawKind, path: &Path| {
            if kind == RawKind::Remove {
                return None;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                return None;
            }
            let rel = path.strip_prefix(&storage_root).ok()?;
            let mut components = rel.components().filter_map(|c| match c {
                std::path::Component::Normal(s) => s.to_str(),
                _ => None,
            });
            match components.next()? {
                "session" => {
                    let info = Self::read_info(path)?;
                    let dir = info.directory.clone().or_else(|| {
                        project_worktree_at(&storage_root, info.project_id.as_deref()?)
                    })?;
                    if !paths::contains(&project_root, Path::new(&dir)) {
                        return None;
                    }
                    let event_kind = if kind == RawKind::Create {
                        EventKind::SessionCreated
                    } else {
                        EventKind::SessionUpdated
                    };
                    Some(Event::new(event_kind, info.id))
                }
                "message" => {
                    // message/<sid>/<mid>.json — the session id is the
                    // enclosing directory.
                    let sid = components.next()?;
                    Some(Event::new(EventKind::MessageAdded, sid))
                }
                // Part writes stream constantly; the message and session
                // envelopes cover the signal.
                _ => None,
            }
        });

        let mut config = WatchConfig::new(
            vec![(self.storage_root.clone(), RecursiveMode::Recursive)],
            classify,
        );
        config.debounce = self.debounce;
        config.capacity = self.event_buffer;
        watch::spawn(config)
    }
}
