//! File Watcher (spec C10 / section 4.10)
//!
//! Wraps `notify`'s native OS watcher with gitignore-style filtering and
//! debouncing: editors and build tools often emit several raw filesystem
//! events for what is conceptually one save, and the rest of the pipeline
//! only wants one [`ChangeEvent`] per quiet period.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::queue::{ChangeEvent as QueueEvent, ChangeKind, Priority};

/// How long a path must go quiet before its change is emitted (spec section
/// 4.10.b).
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);
/// How often the debounce loop checks for quiet paths.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("watcher setup failed: {0}")]
    Notify(#[from] notify::Error),
    #[error("invalid ignore pattern: {0}")]
    Ignore(#[from] ignore::Error),
    #[error("watcher channel closed")]
    Disconnected,
}

fn build_ignore(root: &Path, patterns: &[String]) -> Result<Gitignore, WatcherError> {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        builder.add_line(None, pattern)?;
    }
    builder.add_line(None, ".git/**")?;
    builder.add_line(None, "target/**")?;
    builder.add_line(None, "node_modules/**")?;
    Ok(builder.build()?)
}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

/// A live filesystem watch over a project root, yielding debounced,
/// ignore-filtered [`QueueEvent`]s.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    receiver: Receiver<QueueEvent>,
}

impl FileWatcher {
    /// Start watching `root` recursively, filtering out paths matched by
    /// `ignore_patterns` (gitignore syntax) plus the always-ignored `.git`,
    /// `target`, and `node_modules` directories.
    pub fn start(root: PathBuf, ignore_patterns: &[String]) -> Result<Self, WatcherError> {
        let ignore = build_ignore(&root, ignore_patterns)?;
        let (raw_tx, raw_rx) = mpsc::channel::<Event>();
        let (debounced_tx, debounced_rx) = mpsc::channel::<QueueEvent>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        spawn_debounce_loop(raw_rx, debounced_tx, ignore);

        Ok(Self {
            _watcher: watcher,
            receiver: debounced_rx,
        })
    }

    /// Block until the next debounced change event, or the watcher has shut
    /// down.
    pub fn recv(&self) -> Result<QueueEvent, WatcherError> {
        self.receiver.recv().map_err(|_| WatcherError::Disconnected)
    }

    /// Non-blocking poll for the next debounced change event.
    pub fn try_recv(&self) -> Option<QueueEvent> {
        self.receiver.try_recv().ok()
    }
}

fn spawn_debounce_loop(raw_rx: Receiver<Event>, out: Sender<QueueEvent>, ignore: Gitignore) {
    std::thread::spawn(move || {
        let mut pending: HashMap<PathBuf, (ChangeKind, Instant)> = HashMap::new();
        loop {
            match raw_rx.recv_timeout(POLL_INTERVAL) {
                Ok(event) => {
                    let Some(kind) = classify(&event.kind) else {
                        continue;
                    };
                    for path in event.paths {
                        if ignore.matched(&path, path.is_dir()).is_ignore() {
                            continue;
                        }
                        pending.insert(path, (kind, Instant::now()));
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }

            let ready: Vec<PathBuf> = pending
                .iter()
                .filter(|(_, (_, seen))| seen.elapsed() >= DEBOUNCE_WINDOW)
                .map(|(path, _)| path.clone())
                .collect();

            for path in ready {
                if let Some((kind, _)) = pending.remove(&path) {
                    let priority = if kind == ChangeKind::Removed {
                        Priority::High
                    } else {
                        Priority::Normal
                    };
                    if out.send(QueueEvent::new(path, kind, priority)).is_err() {
                        return;
                    }
                }
            }
        }
    });
}

/// One-shot directory walk respecting the same ignore rules as the live
/// watcher, used to seed the index or as the "disk" side of a drift check
/// (spec section 4.10.c / 4.13).
pub fn scan_existing_files(root: &Path, ignore_patterns: &[String]) -> Result<Vec<PathBuf>, WatcherError> {
    let ignore = build_ignore(root, ignore_patterns)?;
    let mut walker = WalkBuilder::new(root);
    walker.hidden(false).git_ignore(true).git_exclude(true);

    let mut files = Vec::new();
    for entry in walker.build() {
        let entry = entry?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if ignore.matched(entry.path(), is_dir).is_ignore() {
            continue;
        }
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_known_event_kinds() {
        assert_eq!(classify(&EventKind::Create(notify::event::CreateKind::File)), Some(ChangeKind::Created));
        assert_eq!(classify(&EventKind::Remove(notify::event::RemoveKind::File)), Some(ChangeKind::Removed));
        assert_eq!(classify(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }

    #[test]
    fn scan_existing_files_finds_files_and_skips_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "fn main() {}").unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/build_artifact.bin"), b"x").unwrap();

        let files = scan_existing_files(dir.path(), &[]).unwrap();
        assert!(files.iter().any(|p| p.ends_with("lib.rs")));
        assert!(!files.iter().any(|p| p.ends_with("build_artifact.bin")));
    }

    #[test]
    fn build_ignore_matches_custom_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let ignore = build_ignore(dir.path(), &["*.log".to_string()]).unwrap();
        assert!(ignore.matched(dir.path().join("debug.log"), false).is_ignore());
        assert!(!ignore.matched(dir.path().join("lib.rs"), false).is_ignore());
    }
}
