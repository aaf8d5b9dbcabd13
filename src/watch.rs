//! Debounced filesystem watching shared by every adapter.
//!
//! The notify backend pushes raw notifications onto a private channel; a
//! dedicated loop thread owns all debounce state. A single debounce slot is
//! rearmed on every relevant notification (newest event wins) and flushed
//! when the window goes quiet. Removes are suppressed, and the outbound
//! channel is bounded with non-blocking sends — consumers are expected to
//! re-query authoritatively, so a dropped event costs at most one refresh of
//! staleness.
//!
//! Backend errors stop the loop; the outbound channel closing is the signal
//! for consumers to refresh everything and re-subscribe.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, after, bounded, never, select, unbounded};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use walkdir::WalkDir;

use crate::error::IngestError;
use crate::model::{Event, WatchScope};

/// Collapsed notify event kind fed to classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Create,
    Write,
    Remove,
}

enum RawMsg {
    Fs(RawKind, PathBuf),
    Error(String),
}

/// Maps one raw notification to an outbound event, or drops it.
pub type Classifier = Box<dyn Fn(RawKind, &Path) -> Option<Event> + Send>;

pub struct WatchConfig {
    pub roots: Vec<(PathBuf, RecursiveMode)>,
    pub debounce: Duration,
    pub capacity: usize,
    pub scope: WatchScope,
    pub classify: Classifier,
    /// Date-partitioned stores create new year/month directories at
    /// midnight; subscribe them on creation and scan for files that raced
    /// the subscription.
    pub subscribe_created_dirs: bool,
}

impl WatchConfig {
    pub fn new(roots: Vec<(PathBuf, RecursiveMode)>, classify: Classifier) -> WatchConfig {
        WatchConfig {
            roots,
            debounce: Duration::from_millis(150),
            capacity: 32,
            scope: WatchScope::PerProject,
            classify,
            subscribe_created_dirs: false,
        }
    }
}

/// Live watch subscription: an event receiver plus its closer.
///
/// Dropping the handle (or calling [`close`](WatchHandle::close), which is
/// idempotent) stops the observer and closes the event channel.
pub struct WatchHandle {
    events: Receiver<Event>,
    scope: WatchScope,
    shutdown: Sender<()>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WatchHandle {
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    pub fn scope(&self) -> WatchScope {
        self.scope
    }

    pub fn close(&self) {
        let _ = self.shutdown.try_send(());
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Register the observer and start the debounce loop.
pub fn spawn(config: WatchConfig) -> anyhow::Result<WatchHandle> {
    let (raw_tx, raw_rx) = unbounded::<RawMsg>();
    let handler_tx = raw_tx.clone();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                let kind = match event.kind {
                    notify::EventKind::Create(_) => RawKind::Create,
                    notify::EventKind::Modify(_) => RawKind::Write,
                    notify::EventKind::Remove(_) => RawKind::Remove,
                    _ => return,
                };
                for path in event.paths {
                    let _ = handler_tx.send(RawMsg::Fs(kind, path));
                }
            }
            Err(e) => {
                let _ = handler_tx.send(RawMsg::Error(e.to_string()));
            }
        }
    })?;

    for (root, mode) in &config.roots {
        watcher
            .watch(root, *mode)
            .map_err(|e| IngestError::WatchSetup {
                path: root.clone(),
                reason: e.to_string(),
            })?;
    }

    let (out_tx, out_rx) = bounded::<Event>(config.capacity.max(1));
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    let scope = config.scope;

    let join = std::thread::Builder::new()
        .name("ingest-watch".into())
        .spawn(move || run_loop(watcher, config, raw_rx, shutdown_rx, out_tx))?;

    Ok(WatchHandle {
        events: out_rx,
        scope,
        shutdown: shutdown_tx,
        join: Mutex::new(Some(join)),
    })
}

fn run_loop(
    mut watcher: RecommendedWatcher,
    config: WatchConfig,
    raw_rx: Receiver<RawMsg>,
    shutdown_rx: Receiver<()>,
    out_tx: Sender<Event>,
) {
    let mut pending: Option<Event> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        let timer = match deadline {
            Some(d) => after(d.saturating_duration_since(Instant::now())),
            None => never(),
        };

        select! {
            recv(shutdown_rx) -> _ => break,
            recv(timer) -> _ => {
                deadline = None;
                if let Some(event) = pending.take()
                    && out_tx.try_send(event).is_err()
                {
                    tracing::debug!("watch channel full, dropping event");
                }
            }
            recv(raw_rx) -> msg => match msg {
                Err(_) => break,
                Ok(RawMsg::Error(reason)) => {
                    tracing::warn!(error = %reason, "watch backend error, stopping");
                    break;
                }
                Ok(RawMsg::Fs(kind, path)) => {
                    if kind == RawKind::Create && config.subscribe_created_dirs && path.is_dir() {
                        subscribe_and_scan(&mut watcher, &path, &config.classify, &out_tx);
                    } else if let Some(event) = (config.classify)(kind, &path) {
                        pending = Some(event);
                        deadline = Some(Instant::now() + config.debounce);
                    }
                }
            },
        }
    }
    // Dropping the watcher stops the observer; dropping out_tx closes the
    // event channel exactly once.
    drop(watcher);
}

/// Covers the create-before-subscribe race on new date directories: files
/// written between the directory's creation and our subscription are found
/// by an immediate scan and emitted directly (they are not a burst, so they
/// bypass the debounce slot).
fn subscribe_and_scan(
    watcher: &mut RecommendedWatcher,
    dir: &Path,
    classify: &Classifier,
    out_tx: &Sender<Event>,
) {
    if let Err(e) = watcher.watch(dir, RecursiveMode::Recursive) {
        tracing::debug!(dir = %dir.display(), error = %e, "failed to subscribe new directory");
        return;
    }
    for entry in WalkDir::new(dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(event) = classify(RawKind::Create, entry.path())
            && out_tx.try_send(event).is_err()
        {
            tracing::debug!("watch channel full, dropping scan event");
        }
    }
}

/// Watch roots for a date-partitioned store (`root/YYYY/MM/DD/...`): the
/// root itself, the current year directory (month rollovers create new `MM`
/// directories under it, so it must be observed), and the current and
/// previous month directories, skipping any that do not exist yet.
pub fn date_partition_roots(root: &Path) -> Vec<(PathBuf, RecursiveMode)> {
    use chrono::{Datelike, Utc};

    let mut roots = vec![(root.to_path_buf(), RecursiveMode::NonRecursive)];
    let now = Utc::now();
    let year_dir = root.join(format!("{:04}", now.year()));
    if year_dir.is_dir() {
        roots.push((year_dir, RecursiveMode::NonRecursive));
    }
    let current = root.join(format!("{:04}/{:02}", now.year(), now.month()));
    let previous = {
        let (year, month) = if now.month() == 1 {
            (now.year() - 1, 12)
        } else {
            (now.year(), now.month() - 1)
        };
        root.join(format!("{year:04}/{month:02}"))
    };
    for dir in [current, previous] {
        if dir.is_dir() {
            roots.push((dir, RecursiveMode::Recursive));
        }
    }
    roots
}
