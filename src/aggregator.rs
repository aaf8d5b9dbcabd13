//! Cross-adapter aggregation: one merged session list, one event stream.
//!
//! The aggregator owns the active adapters for a project root, merges their
//! session lists into a single ordering, and multiplexes their watchers
//! into one channel of `(adapter_id, Event)` pairs. Incoming events also
//! update the merged list in place: an event that names a session on an
//! adapter with cheap lookup splices just that session; anything else
//! re-queries that adapter and swaps its slice of the list wholesale. The
//! merged list is therefore eventually consistent with the sources and
//! never partially written — readers always see a complete snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Mutex, RwLock};

use crate::adapters::Adapter;
use crate::error::IngestError;
use crate::model::{Event, Message, SearchMatch, Session, UsageStats};

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(500);
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct Aggregator {
    adapters: Vec<Arc<dyn Adapter>>,
    project_root: PathBuf,
    sessions: Arc<RwLock<Vec<Session>>>,
}

impl Aggregator {
    pub fn new(adapters: Vec<Arc<dyn Adapter>>, project_root: &Path) -> Aggregator {
        Aggregator {
            adapters,
            project_root: project_root.to_path_buf(),
            sessions: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn adapters(&self) -> &[Arc<dyn Adapter>] {
        &self.adapters
    }

    /// Re-query every adapter and rebuild the merged list. One adapter
    /// failing degrades to its sessions going missing, not a total failure.
    pub fn refresh(&self) -> Vec<Session> {
        let mut merged = Vec::new();
        for adapter in &self.adapters {
            match adapter.sessions(&self.project_root) {
                Ok(sessions) => merged.extend(sessions),
                Err(e) => {
                    tracing::warn!(adapter = adapter.id(), error = %e, "session listing failed");
                }
            }
        }
        sort_merged(&mut merged);
        *self.sessions.write() = merged.clone();
        merged
    }

    /// Snapshot of the merged list as of the last refresh or event.
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.read().clone()
    }

    /// Route to the owning adapter. Sessions the merged list has not seen
    /// are tried against every adapter before giving up.
    pub fn messages(&self, session_id: &str) -> Result<Vec<Message>> {
        match self.adapter_for(session_id) {
            Some(adapter) => adapter.messages(session_id),
            None => Err(IngestError::UnknownSession(session_id.to_string()).into()),
        }
    }

    pub fn usage(&self, session_id: &str) -> Result<UsageStats> {
        match self.adapter_for(session_id) {
            Some(adapter) => adapter.usage(session_id),
            None => Err(IngestError::UnknownSession(session_id.to_string()).into()),
        }
    }

    /// Search within one session, on adapters that support it.
    pub fn search(&self, session_id: &str, query: &str) -> Result<Vec<SearchMatch>> {
        match self.adapter_for(session_id) {
            Some(adapter) if adapter.capabilities().search => {
                adapter.search_messages(session_id, query)
            }
            Some(_) => Ok(Vec::new()),
            None => Err(IngestError::UnknownSession(session_id.to_string()).into()),
        }
    }

    fn adapter_for(&self, session_id: &str) -> Option<Arc<dyn Adapter>> {
        let owner = self
            .sessions
            .read()
            .iter()
            .find(|s| s.id == session_id)
            .map(|s| s.adapter_id.clone());
        if let Some(owner) = owner {
            return self.adapters.iter().find(|a| a.id() == owner).cloned();
        }
        self.adapters
            .iter()
            .find(|a| {
                a.session_by_id(session_id)
                    .ok()
                    .flatten()
                    .is_some()
            })
            .cloned()
    }

    /// Start watchers on every adapter and multiplex them. Events update
    /// the merged list before being forwarded, so a consumer that only
    /// reads [`sessions`](Aggregator::sessions) after each event always
    /// sees the change applied.
    pub fn subscribe(&self) -> Result<Subscription> {
        let (out_tx, out_rx) = bounded(EVENT_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let mut forwarders = Vec::new();

        for adapter in &self.adapters {
            if !adapter.capabilities().watch {
                continue;
            }
            let handle = adapter.watch(&self.project_root)?;
            let forwarder = Forwarder {
                adapter: Arc::clone(adapter),
                project_root: self.project_root.clone(),
                sessions: Arc::clone(&self.sessions),
                out_tx: out_tx.clone(),
                closed: Arc::clone(&closed),
            };
            let thread_name = format!("ingest-agg-{}", adapter.id());
            let join = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || forwarder.run(handle))?;
            forwarders.push(join);
        }

        Ok(Subscription {
            events: out_rx,
            closed,
            joins: Mutex::new(forwarders),
        })
    }
}

/// A live multiplexed subscription. Dropping it (or calling `close`) stops
/// every forwarder and closes the event channel.
pub struct Subscription {
    events: Receiver<(String, Event)>,
    closed: Arc<AtomicBool>,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl Subscription {
    pub fn events(&self) -> &Receiver<(String, Event)> {
        &self.events
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let joins = std::mem::take(&mut *self.joins.lock());
        for join in joins {
            let _ = join.join();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

struct Forwarder {
    adapter: Arc<dyn Adapter>,
    project_root: PathBuf,
    sessions: Arc<RwLock<Vec<Session>>>,
    out_tx: Sender<(String, Event)>,
    closed: Arc<AtomicBool>,
}

impl Forwarder {
    fn run(self, mut handle: crate::watch::WatchHandle) {
        let mut retried = false;
        loop {
            match handle.events().recv_timeout(Duration::from_millis(200)) {
                Ok(event) => {
                    self.apply(&event);
                    if self
                        .out_tx
                        .try_send((self.adapter.id().to_string(), event))
                        .is_err()
                    {
                        tracing::debug!(
                            adapter = self.adapter.id(),
                            "aggregate channel full, dropping event"
                        );
                    }
                    if self.closed.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    if self.closed.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    if self.closed.load(Ordering::SeqCst) || retried {
                        if retried {
                            tracing::warn!(
                                adapter = self.adapter.id(),
                                "watcher lost twice, dropping adapter from the stream"
                            );
                        }
                        break;
                    }
                    // A closed channel means the backend died; refresh what
                    // we may have missed and try once to come back.
                    retried = true;
                    std::thread::sleep(RESUBSCRIBE_BACKOFF);
                    self.refresh_adapter();
                    match self.adapter.watch(&self.project_root) {
                        Ok(new_handle) => {
                            tracing::debug!(adapter = self.adapter.id(), "watcher resubscribed");
                            handle = new_handle;
                        }
                        Err(e) => {
                            tracing::warn!(
                                adapter = self.adapter.id(),
                                error = %e,
                                "resubscribe failed, dropping adapter from the stream"
                            );
                            break;
                        }
                    }
                }
            }
        }
        handle.close();
    }

    fn apply(&self, event: &Event) {
        let targeted =
            !event.session_id.is_empty() && self.adapter.capabilities().session_lookup;
        if targeted {
            match self.adapter.session_by_id(&event.session_id) {
                Ok(Some(session)) => {
                    let mut guard = self.sessions.write();
                    splice_session(&mut guard, session);
                    return;
                }
                Ok(None) => {
                    // Named session is gone or out of scope; fall through to
                    // the adapter-wide refresh.
                }
                Err(e) => {
                    tracing::debug!(
                        adapter = self.adapter.id(),
                        session = %event.session_id,
                        error = %e,
                        "targeted lookup failed, refreshing adapter"
                    );
                }
            }
        }
        self.refresh_adapter();
    }

    fn refresh_adapter(&self) {
        match self.adapter.sessions(&self.project_root) {
            Ok(sessions) => {
                let mut guard = self.sessions.write();
                replace_adapter_sessions(&mut guard, self.adapter.id(), sessions);
            }
            Err(e) => {
                tracing::warn!(adapter = self.adapter.id(), error = %e, "refresh failed");
            }
        }
    }
}

fn sort_merged(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.adapter_id.cmp(&b.adapter_id))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Insert-or-update one session, keeping the merged ordering.
fn splice_session(sessions: &mut Vec<Session>, session: Session) {
    match sessions
        .iter_mut()
        .find(|s| s.id == session.id && s.adapter_id == session.adapter_id)
    {
        Some(slot) => *slot = session,
        None => sessions.push(session),
    }
    sort_merged(sessions);
}

/// Swap out every session belonging to one adapter.
fn replace_adapter_sessions(sessions: &mut Vec<Session>, adapter_id: &str, new: Vec<Session>) {
    sessions.retain(|s| s.adapter_id != adapter_id);
    sessions.extend(new);
    sort_merged(sessions);
}
