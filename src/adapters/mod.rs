//! Adapters over per-tool session storage.
//!
//! One adapter per source. Each implements the same read-only contract:
//! cheap detection, session enumeration, on-demand message assembly, usage
//! aggregation, and debounced watching; targeted single-session refresh and
//! search are optional and advertised through [`Capabilities`].
//!
//! Failure policy is uniform: malformed records are skipped with a debug
//! diagnostic, missing files are empty results, and only catastrophic source
//! corruption (unreadable root, DB that will not open) propagates out.

use std::io::Read;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::{
    Capabilities, Message, Role, SearchMatch, Session, UsageStats, WatchScope,
};
use crate::watch::WatchHandle;

pub mod amazon_q;
pub mod amp;
pub mod claude_code;
pub mod codex;
pub mod opencode;
pub mod registry;
pub(crate) mod sqlite;
pub mod warp;

/// Read-only driver over one tool's session storage.
pub trait Adapter: Send + Sync {
    /// Stable short identifier (`"claude-code"`, `"codex"`, ...).
    fn id(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Single display glyph.
    fn icon(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Cheap probe: does this source have content for the project? Must not
    /// scan full history. Absence and failure both read as `false`.
    fn detect(&self, project_root: &Path) -> bool;

    /// Normalized sessions for the project, newest `updated_at` first.
    /// Malformed records are skipped silently.
    fn sessions(&self, project_root: &Path) -> Result<Vec<Session>>;

    /// Normalized messages in ascending timestamp order, skipping malformed
    /// records.
    fn messages(&self, session_id: &str) -> Result<Vec<Message>>;

    fn usage(&self, session_id: &str) -> Result<UsageStats> {
        Ok(UsageStats::from_messages(&self.messages(session_id)?))
    }

    /// Whether watch events are narrowed to the project or fan out globally.
    fn watch_scope(&self) -> WatchScope {
        WatchScope::PerProject
    }

    /// Subscribe to change events for the project. The returned handle
    /// releases all resources on close or drop.
    fn watch(&self, project_root: &Path) -> Result<WatchHandle>;

    /// Targeted refresh: one session without a full scan. Adapters that
    /// support it advertise `capabilities().session_lookup`.
    fn session_by_id(&self, _session_id: &str) -> Result<Option<Session>> {
        Ok(None)
    }

    /// Case-insensitive substring search over a session's messages, for
    /// adapters advertising `capabilities().search`.
    fn search_messages(&self, _session_id: &str, _query: &str) -> Result<Vec<SearchMatch>> {
        Ok(Vec::new())
    }

    /// Release held resources (DB handles). Idempotent.
    fn close(&self) {}
}

/// The zero instant, used when a source timestamp fails every format.
pub(crate) fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Timestamp ladder: RFC3339 (with or without sub-second precision), then
/// the naive legacy shapes some tools emit. First success wins.
pub(crate) fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    None
}

/// Integer timestamps: values large enough to be Unix millis are treated as
/// millis, the rest as seconds.
pub(crate) fn parse_timestamp_int(n: i64) -> Option<DateTime<Utc>> {
    if n <= 0 {
        return None;
    }
    if n >= 100_000_000_000 {
        DateTime::<Utc>::from_timestamp_millis(n)
    } else {
        DateTime::<Utc>::from_timestamp(n, 0)
    }
}

pub(crate) fn parse_timestamp_value(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                parse_timestamp_int(i)
            } else {
                n.as_f64().and_then(|f| parse_timestamp_int(f as i64))
            }
        }
        _ => None,
    }
}

const TITLE_MAX_CHARS: usize = 50;
const SHORT_ID_CHARS: usize = 12;

/// First `SHORT_ID_CHARS` of the id, the title fallback of last resort.
pub(crate) fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_CHARS).collect()
}

/// Flatten newlines and truncate to the display budget with an ellipsis.
pub(crate) fn truncate_title(text: &str) -> String {
    let flat = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if flat.chars().count() <= TITLE_MAX_CHARS {
        flat
    } else {
        let mut out: String = flat.chars().take(TITLE_MAX_CHARS).collect();
        out.push('…');
        out
    }
}

/// Title derivation: first user message text, else a short id prefix.
pub(crate) fn derive_title(messages: &[Message], session_id: &str) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::User && !m.content.trim().is_empty())
        .map(|m| truncate_title(&m.content))
        .unwrap_or_else(|| short_id(session_id))
}

/// Extract a string field's value from the first 1024 bytes of a JSON file.
///
/// Source constraint: the id field must appear near the top of the file
/// (every source this crate reads writes it there). Used by watchers to
/// derive session identity from freshly created files without parsing them.
pub(crate) fn peek_session_id(path: &Path, field: &str) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut buf = [0u8; 1024];
    let n = file.read(&mut buf).ok()?;
    let head = String::from_utf8_lossy(&buf[..n]);
    let needle = format!("\"{field}\"");
    let at = head.find(&needle)?;
    let rest = &head[at + needle.len()..];
    let open = rest.find('"')?;
    let rest = &rest[open + 1..];
    let close = rest.find('"')?;
    let value = &rest[..close];
    if value.is_empty() { None } else { Some(value.to_string()) }
}

/// Merged ordering contract: `updated_at` descending, ties broken by id
/// ascending so output is deterministic.
pub(crate) fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Stable sort: source order is preserved among equal timestamps.
pub(crate) fn sort_messages(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.timestamp);
}

/// Chars-per-token heuristic for text with no usage record.
pub(crate) fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

const SEARCH_SNIPPET_CONTEXT: usize = 40;

/// Shared `search_messages` implementation over assembled messages.
pub(crate) fn search_in_messages(
    session_id: &str,
    messages: &[Message],
    query: &str,
) -> Vec<SearchMatch> {
    if query.is_empty() {
        return Vec::new();
    }
    let needle = query.to_lowercase();
    let mut hits = Vec::new();
    for msg in messages {
        let haystack = msg.content.to_lowercase();
        if let Some(found) = haystack.find(&needle) {
            // Lowercasing can shift byte offsets for non-ASCII text; snap
            // back to a boundary in the original string.
            let mut offset = found.min(msg.content.len());
            while offset > 0 && !msg.content.is_char_boundary(offset) {
                offset -= 1;
            }
            let start = msg.content[..offset]
                .char_indices()
                .rev()
                .take(SEARCH_SNIPPET_CONTEXT)
                .last()
                .map(|(i, _)| i)
                .unwrap_or(0);
            let end = (offset + needle.len() + SEARCH_SNIPPET_CONTEXT).min(msg.content.len());
            // Snap to char boundaries.
            let end = (end..=msg.content.len())
                .find(|&i| msg.content.is_char_boundary(i))
                .unwrap_or(msg.content.len());
            hits.push(SearchMatch {
                session_id: session_id.to_string(),
                message_id: msg.id.clone(),
                role: msg.role.clone(),
                offset,
                snippet: msg.content[start..end].to_string(),
            });
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentBlock, TokenUsage};
    use std::io::Write;

    fn msg(role: Role, content: &str, ts_secs: i64) -> Message {
        Message {
            id: format!("m-{ts_secs}"),
            role,
            timestamp: DateTime::<Utc>::from_timestamp(ts_secs, 0).unwrap(),
            model: None,
            content: content.to_string(),
            blocks: vec![ContentBlock::Text {
                text: content.to_string(),
            }],
            tool_uses: Vec::new(),
            thinking: Vec::new(),
            usage: TokenUsage::default(),
        }
    }

    #[test]
    fn timestamp_ladder_accepts_all_shapes() {
        assert!(parse_timestamp_str("2025-01-01T00:00:00Z").is_some());
        assert!(parse_timestamp_str("2025-01-01T00:00:00.123456789Z").is_some());
        assert!(parse_timestamp_str("2025-01-01T00:00:00+02:00").is_some());
        assert!(parse_timestamp_str("2025-01-01T00:00:00.5").is_some());
        assert!(parse_timestamp_str("2025-01-01 00:00:00").is_some());
        assert!(parse_timestamp_str("not a time").is_none());
    }

    #[test]
    fn integer_timestamps_distinguish_millis_from_seconds() {
        let secs = parse_timestamp_int(1_735_689_600).unwrap();
        let millis = parse_timestamp_int(1_735_689_600_000).unwrap();
        assert_eq!(secs, millis);
    }

    #[test]
    fn title_truncates_at_fifty_chars_with_ellipsis() {
        let long = "a".repeat(60);
        let title = truncate_title(&long);
        assert_eq!(title.chars().count(), 51);
        assert!(title.ends_with('…'));

        assert_eq!(truncate_title("hello\nworld"), "hello world");
    }

    #[test]
    fn derive_title_prefers_first_user_message() {
        let messages = vec![
            msg(Role::Assistant, "greeting", 1),
            msg(Role::User, "fix the tests", 2),
        ];
        assert_eq!(derive_title(&messages, "abcdef"), "fix the tests");
        assert_eq!(
            derive_title(&[], "0123456789abcdef"),
            "0123456789ab"
        );
    }

    #[test]
    fn peek_session_id_reads_prefix_only() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "{{\"sessionId\":\"abc-123\",\"padding\":\"{}\"}}",
            "x".repeat(4096)
        )
        .unwrap();
        assert_eq!(
            peek_session_id(f.path(), "sessionId"),
            Some("abc-123".to_string())
        );
        assert_eq!(peek_session_id(f.path(), "missing"), None);
    }

    #[test]
    fn session_sort_is_updated_desc_then_id_asc() {
        let base = Utc::now();
        let mk = |id: &str, offset: i64| Session {
            id: id.into(),
            name: id.into(),
            adapter_id: "t".into(),
            adapter_name: "T".into(),
            adapter_icon: "*".into(),
            created_at: base,
            updated_at: base + chrono::Duration::seconds(offset),
            total_tokens: 0,
            estimated_cost: 0.0,
            message_count: 0,
            parent_id: None,
            path: None,
            file_size: None,
        };
        let mut sessions = vec![mk("b", 0), mk("a", 0), mk("c", 5)];
        sort_sessions(&mut sessions);
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn message_sort_is_stable_for_timestamp_ties() {
        let mut messages = vec![
            msg(Role::User, "first", 5),
            msg(Role::Assistant, "second", 5),
            msg(Role::User, "earlier", 1),
        ];
        sort_messages(&mut messages);
        assert_eq!(messages[0].content, "earlier");
        assert_eq!(messages[1].content, "first");
        assert_eq!(messages[2].content, "second");
    }

    #[test]
    fn search_is_case_insensitive_with_offsets() {
        let messages = vec![msg(Role::Assistant, "The QUICK brown fox", 1)];
        let hits = search_in_messages("s", &messages, "quick");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].offset, 4);
        assert!(hits[0].snippet.contains("QUICK"));
        assert!(search_in_messages("s", &messages, "").is_empty());
    }
}
