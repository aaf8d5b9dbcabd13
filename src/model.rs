//! Normalized session/message model shared by every adapter.
//!
//! Adapters translate their tool's on-disk shape into these types; nothing
//! source-specific leaks past this module. All timestamps are UTC instants;
//! records whose timestamps fail to parse carry the Unix epoch.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How recently a session must have been updated to count as active.
pub const ACTIVE_WINDOW_MINUTES: i64 = 5;

/// One continuous conversation with a coding agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Source-unique identifier, stable across rescans of unchanged data.
    pub id: String,
    /// Display title (source title, first user message, or short id).
    pub name: String,
    pub adapter_id: String,
    pub adapter_name: String,
    pub adapter_icon: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub message_count: usize,
    /// Set when this session was spawned by another session (sub-agent).
    pub parent_id: Option<String>,
    /// Backing file, when the source is file-backed.
    pub path: Option<PathBuf>,
    pub file_size: Option<u64>,
}

impl Session {
    pub fn duration(&self) -> Duration {
        self.updated_at - self.created_at
    }

    /// Updated within the last five minutes of `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.updated_at) <= Duration::minutes(ACTIVE_WINDOW_MINUTES)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    Other(String),
}

impl Role {
    pub fn parse(s: &str) -> Role {
        match s {
            "user" | "human" => Role::User,
            "assistant" | "agent" | "ai" => Role::Assistant,
            "system" => Role::System,
            "tool" | "toolResult" => Role::Tool,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
            Role::Other(s) => s,
        }
    }
}

/// Token counts attached to a single message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_read + self.cache_write
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// One ordered piece of message content, preserving source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        text: String,
        estimated_tokens: u64,
    },
    ToolUse {
        id: String,
        name: String,
        input: String,
        output: String,
        is_error: bool,
    },
    /// Block with an unrecognized tag, kept verbatim rather than dropped.
    Raw {
        payload: serde_json::Value,
    },
}

/// A tool invocation paired (best effort) with its eventual result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    /// Serialized invocation input.
    pub input: String,
    /// Paired result output; empty when no result record was found.
    pub output: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub text: String,
    pub estimated_tokens: u64,
}

/// Normalized message within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub model: Option<String>,
    /// Primary text content (text blocks joined).
    pub content: String,
    pub blocks: Vec<ContentBlock>,
    pub tool_uses: Vec<ToolUse>,
    pub thinking: Vec<ThinkingBlock>,
    pub usage: TokenUsage,
}

/// Aggregate usage for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub message_count: usize,
}

impl UsageStats {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read_tokens + self.cache_write_tokens
    }

    pub fn record(&mut self, usage: &TokenUsage) {
        self.input_tokens += usage.input;
        self.output_tokens += usage.output;
        self.cache_read_tokens += usage.cache_read;
        self.cache_write_tokens += usage.cache_write;
    }

    /// Aggregate over an assembled message list.
    pub fn from_messages(messages: &[Message]) -> UsageStats {
        let mut stats = UsageStats {
            message_count: messages.len(),
            ..UsageStats::default()
        };
        for msg in messages {
            stats.record(&msg.usage);
        }
        stats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionCreated,
    SessionUpdated,
    MessageAdded,
}

/// Change notification from a watcher.
///
/// `session_id` is empty when the source cannot be narrowed to one session
/// (a global SQLite WAL write, for instance); consumers then rescan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub session_id: String,
    /// Opaque source detail, typically the path that changed.
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, session_id: impl Into<String>) -> Event {
        Event {
            kind,
            session_id: session_id.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Event {
        self.payload = payload;
        self
    }
}

/// Whether a watcher is narrowed to the requested project or fans out
/// across all projects the source knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchScope {
    PerProject,
    Global,
}

/// Which operations an adapter supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub sessions: bool,
    pub messages: bool,
    pub usage: bool,
    pub watch: bool,
    /// `session_by_id` works without a full scan.
    pub session_lookup: bool,
    pub search: bool,
}

impl Capabilities {
    /// The baseline every adapter in this crate supports.
    pub fn base() -> Capabilities {
        Capabilities {
            sessions: true,
            messages: true,
            usage: true,
            watch: true,
            session_lookup: false,
            search: false,
        }
    }

    /// Logical OR, used by the registry for the union capability set.
    pub fn union(self, other: Capabilities) -> Capabilities {
        Capabilities {
            sessions: self.sessions || other.sessions,
            messages: self.messages || other.messages,
            usage: self.usage || other.usage,
            watch: self.watch || other.watch,
            session_lookup: self.session_lookup || other.session_lookup,
            search: self.search || other.search,
        }
    }
}

/// One hit from `search_messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub session_id: String,
    pub message_id: String,
    pub role: Role,
    /// Byte offset of the match within the message content.
    pub offset: usize,
    pub snippet: String,
}
