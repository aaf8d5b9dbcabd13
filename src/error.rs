//! Typed error kinds for failures that propagate out of adapters.
//!
//! Almost everything this library hits on disk is recoverable: malformed
//! records are skipped, missing files mean an empty result. Only the
//! catastrophic kinds below surface to callers; they are usually wrapped in
//! an `anyhow::Error` with path context attached.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// A session id that no adapter index currently maps to a backing store.
    #[error("unknown session id: {0}")]
    UnknownSession(String),

    /// The source root exists but cannot be read (permissions, corrupt DB).
    #[error("source unavailable at {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    /// The filesystem observer could not be set up.
    #[error("watch setup failed for {path}: {reason}")]
    WatchSetup { path: PathBuf, reason: String },
}
