//! Sync Checker (spec C13 / section 4.13)
//!
//! Detects drift between the files on disk and what the store believes is
//! indexed, then drives a bounded, resumable resync within a deadline.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::store::{Storage, StoreError};

/// How many files `resync` reindexes or removes at once (spec section
/// 4.13.c: bounded concurrency, not a sequential scan).
const RESYNC_CONCURRENCY: usize = 25;

/// Sync checker error kinds (spec section 7)
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("resync cancelled")]
    Cancelled,
}

type Result<T> = std::result::Result<T, SyncError>;

/// A single path that disagrees between disk and the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// On disk, not indexed.
    Untracked(PathBuf),
    /// Indexed, no longer on disk.
    Orphaned(PathBuf),
    /// Indexed, but the on-disk content hash no longer matches.
    Stale(PathBuf),
}

/// Result of a drift scan: a sync score in `[0, 100]` plus the drift found.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub project_path: String,
    pub sync_score: u8,
    pub untracked: Vec<PathBuf>,
    pub orphaned: Vec<PathBuf>,
    pub stale: Vec<PathBuf>,
    pub files_scanned: usize,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.untracked.is_empty() && self.orphaned.is_empty() && self.stale.is_empty()
    }
}

/// Outcome of a bounded resync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResyncOutcome {
    pub reindexed: usize,
    pub removed: usize,
    /// Files that failed to reindex/remove but did not abort the pass.
    pub failed: usize,
    pub remaining: usize,
    pub hit_deadline: bool,
}

/// A project's sync-check history, for dashboards and alerting rather than
/// a single point-in-time drift scan (spec C13, `getSyncHealth`).
#[derive(Debug, Clone, Serialize)]
pub struct SyncHealth {
    pub project_path: String,
    pub latest_score: Option<u8>,
    pub average_score: Option<f32>,
    pub checks_recorded: usize,
    pub last_checked: Option<chrono::DateTime<chrono::Utc>>,
}

/// Computes drift reports and drives resync against a project's store.
pub struct SyncChecker<'a> {
    storage: &'a Storage,
}

impl<'a> SyncChecker<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Compare `indexed_files` (what the store has for `project_path`)
    /// against `disk_files` (what a fresh directory walk found), and compute
    /// a 0-100 sync score: `100 - (drifted / max(total, 1) * 100)`.
    pub fn check_drift(
        &self,
        project_path: &str,
        disk_files: &HashSet<PathBuf>,
        indexed: &[(PathBuf, String)],
    ) -> Result<DriftReport> {
        let indexed_paths: HashSet<PathBuf> = indexed.iter().map(|(p, _)| p.clone()).collect();

        let untracked: Vec<PathBuf> = disk_files.difference(&indexed_paths).cloned().collect();
        let orphaned: Vec<PathBuf> = indexed_paths.difference(disk_files).cloned().collect();

        let mut stale = Vec::new();
        for (path, indexed_hash) in indexed {
            if !disk_files.contains(path) {
                continue;
            }
            if let Ok(contents) = std::fs::read(path) {
                let current_hash = content_hash(&contents);
                if &current_hash != indexed_hash {
                    stale.push(path.clone());
                }
            }
        }

        let total = disk_files.len().max(indexed_paths.len()).max(1);
        let drifted = untracked.len() + orphaned.len() + stale.len();
        let sync_score = (100 - ((drifted * 100 / total).min(100))) as u8;

        Ok(DriftReport {
            project_path: project_path.to_string(),
            sync_score,
            untracked,
            orphaned,
            stale,
            files_scanned: disk_files.len(),
        })
    }

    /// Resync the drift in `report` within `deadline`, calling
    /// `reindex(path)` for untracked/stale files and `remove(path)` for
    /// orphaned ones, up to `RESYNC_CONCURRENCY` at a time. A per-file error
    /// is counted as `failed` and doesn't stop the pass; only running out of
    /// `deadline` does, reporting what's left for the next pass (spec
    /// section 4.13.c, "resumable").
    pub fn resync<R, X>(&self, report: &DriftReport, deadline: Duration, reindex: R, remove: X) -> Result<ResyncOutcome>
    where
        R: Fn(&Path) -> Result<()> + Sync,
        X: Fn(&Path) -> Result<()> + Sync,
    {
        let start = Instant::now();
        let to_reindex: Vec<PathBuf> = report.stale.iter().chain(report.untracked.iter()).cloned().collect();
        let to_remove: Vec<PathBuf> = report.orphaned.clone();

        let reindexed = AtomicUsize::new(0);
        let removed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let hit_deadline = AtomicBool::new(false);

        run_bounded(&to_reindex, start, deadline, &hit_deadline, |path| {
            match reindex(path) {
                Ok(()) => {
                    reindexed.fetch_add(1, Ordering::Relaxed);
                }
                Err(SyncError::DeadlineExceeded(_)) => {
                    hit_deadline.store(true, Ordering::Relaxed);
                }
                Err(_) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        run_bounded(&to_remove, start, deadline, &hit_deadline, |path| {
            match remove(path) {
                Ok(()) => {
                    removed.fetch_add(1, Ordering::Relaxed);
                }
                Err(SyncError::DeadlineExceeded(_)) => {
                    hit_deadline.store(true, Ordering::Relaxed);
                }
                Err(_) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        let reindexed = reindexed.into_inner();
        let removed = removed.into_inner();
        let failed = failed.into_inner();
        let processed = reindexed + removed + failed;
        let total_work = to_reindex.len() + to_remove.len();

        Ok(ResyncOutcome {
            reindexed,
            removed,
            failed,
            remaining: total_work.saturating_sub(processed),
            hit_deadline: hit_deadline.into_inner(),
        })
    }

    /// Persist a sync score to `sync_status_history` (spec section 3,
    /// persistent schema list).
    pub fn record_status(&self, project_path: &str, sync_score: u8) -> Result<()> {
        let conn = self.storage.conn()?;
        conn.execute(
            "INSERT INTO sync_status_history (project_path, sync_score, last_checked) VALUES (?1, ?2, ?3)",
            rusqlite::params![project_path, sync_score as i64, chrono::Utc::now()],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// Summarize a project's recorded sync history: its latest and average
    /// score, how many checks have been recorded, and when it was last
    /// checked (spec C13, `getSyncHealth`).
    pub fn sync_health(&self, project_path: &str) -> Result<SyncHealth> {
        let conn = self.storage.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT sync_score, last_checked FROM sync_status_history
             WHERE project_path = ?1 ORDER BY last_checked DESC",
            )
            .map_err(StoreError::from)?;
        let rows: Vec<(i64, chrono::DateTime<chrono::Utc>)> = stmt
            .query_map([project_path], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(StoreError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)?;

        let checks_recorded = rows.len();
        let latest_score = rows.first().map(|(s, _)| *s as u8);
        let last_checked = rows.first().map(|(_, t)| *t);
        let average_score = if rows.is_empty() {
            None
        } else {
            Some(rows.iter().map(|(s, _)| *s as f32).sum::<f32>() / rows.len() as f32)
        };

        Ok(SyncHealth {
            project_path: project_path.to_string(),
            latest_score,
            average_score,
            checks_recorded,
            last_checked,
        })
    }

    /// Write a machine-readable status file (spec section 4.13.d, explicit
    /// testable operation): a small JSON document other tools can poll
    /// without querying the store directly.
    pub fn write_status_file(&self, path: &Path, report: &DriftReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| SyncError::DeadlineExceeded(format!("could not serialize report: {e}")))?;
        std::fs::write(path, json).map_err(|e| StoreError::Io(e).into())
    }
}

fn content_hash(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Run `f` over `items` in batches of up to `RESYNC_CONCURRENCY`, one
/// `thread::scope` per batch so `f` can run concurrently without needing to
/// be `'static` or `Arc`-wrapped. Stops launching new batches once
/// `deadline` has elapsed or `hit_deadline` has already been set by a
/// worker in a prior batch.
fn run_bounded<F>(items: &[PathBuf], start: Instant, deadline: Duration, hit_deadline: &AtomicBool, f: F)
where
    F: Fn(&Path) + Sync,
{
    for chunk in items.chunks(RESYNC_CONCURRENCY) {
        if hit_deadline.load(Ordering::Relaxed) || start.elapsed() > deadline {
            hit_deadline.store(true, Ordering::Relaxed);
            return;
        }
        std::thread::scope(|scope| {
            for path in chunk {
                scope.spawn(|| f(path));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_report_has_perfect_score() {
        let storage = Storage::open_in_memory().unwrap();
        let checker = SyncChecker::new(&storage);
        let disk: HashSet<PathBuf> = ["a.rs", "b.rs"].iter().map(PathBuf::from).collect();
        let indexed = vec![
            (PathBuf::from("a.rs"), "h1".to_string()),
            (PathBuf::from("b.rs"), "h2".to_string()),
        ];
        let report = checker.check_drift("proj", &disk, &indexed).unwrap();
        assert_eq!(report.sync_score, 100);
        assert!(report.is_clean());
    }

    #[test]
    fn untracked_and_orphaned_files_are_detected() {
        let storage = Storage::open_in_memory().unwrap();
        let checker = SyncChecker::new(&storage);
        let disk: HashSet<PathBuf> = ["a.rs", "new.rs"].iter().map(PathBuf::from).collect();
        let indexed = vec![
            (PathBuf::from("a.rs"), "h1".to_string()),
            (PathBuf::from("gone.rs"), "h2".to_string()),
        ];
        let report = checker.check_drift("proj", &disk, &indexed).unwrap();
        assert_eq!(report.untracked, vec![PathBuf::from("new.rs")]);
        assert_eq!(report.orphaned, vec![PathBuf::from("gone.rs")]);
        assert!(report.sync_score < 100);
    }

    #[test]
    fn resync_reports_remaining_when_deadline_hits_immediately() {
        let storage = Storage::open_in_memory().unwrap();
        let checker = SyncChecker::new(&storage);
        let report = DriftReport {
            project_path: "proj".into(),
            sync_score: 50,
            untracked: vec![PathBuf::from("a.rs"), PathBuf::from("b.rs")],
            orphaned: vec![],
            stale: vec![],
            files_scanned: 2,
        };
        let outcome = checker
            .resync(
                &report,
                Duration::from_secs(0),
                |_| Ok(()),
                |_| Ok(()),
            )
            .unwrap();
        assert!(outcome.hit_deadline);
        assert_eq!(outcome.reindexed, 0);
        assert_eq!(outcome.remaining, 2);
    }
}
