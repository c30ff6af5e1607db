//! specmem-core: ingestion, indexing, and hybrid retrieval engine for a
//! per-project code and conversation memory store.
//!
//! [`SpecMem`] is the facade most callers want: it wires together the
//! dimension service, store, embedding cache, memory CRUD, hybrid search,
//! quadrant index, associative graph, forgetting engine, context
//! assembler, change queue/handler, and sync checker behind the handful of
//! operations a tool-calling layer needs.

pub mod config;
pub mod dimension;
pub mod embedding;
pub mod error;
pub mod forgetting;
pub mod graph;
pub mod handler;
pub mod memory;
pub mod quadrant;
pub mod queue;
pub mod retrieval;
pub mod search;
pub mod store;
pub mod sync;
mod vector;
pub mod watcher;

pub use config::SpecMemConfig;
pub use error::{Result, SpecMemError};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use embedding::{EmbeddingCache, EmbeddingProvider};
use forgetting::ForgettingEngine;
use graph::AssociativeGraph;
use handler::ChangeHandler;
use memory::{Importance, Memory, MemoryFilter, MemoryStore, NewMemory};
use quadrant::QuadrantIndex;
use queue::{ChangeEvent, ChangeQueue, Priority};
use retrieval::{AssembledContext, ContextAssembler};
use store::Storage;
use sync::{DriftReport, ResyncOutcome, SyncChecker};
use watcher::FileWatcher;

/// The facade most callers should reach for: one store, one project,
/// everything wired together.
pub struct SpecMem {
    storage: Storage,
    config: SpecMemConfig,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    embeddings: Option<EmbeddingCache>,
    watcher: Mutex<Option<FileWatcher>>,
    queue: Mutex<ChangeQueue>,
}

impl SpecMem {
    /// Open (or create) a store at `db_path` for `project_path`, with no
    /// embedding provider configured. Vectors passed explicitly to
    /// `save_memory` still work; nothing will be embedded automatically.
    pub fn open(db_path: PathBuf, config: SpecMemConfig) -> Result<Self> {
        let storage = Storage::open(db_path)?;
        Ok(Self::from_storage(storage, config, None))
    }

    /// Open an in-memory store, mainly for tests and short-lived sessions.
    pub fn open_in_memory(config: SpecMemConfig) -> Result<Self> {
        let storage = Storage::open_in_memory()?;
        Ok(Self::from_storage(storage, config, None))
    }

    /// Attach an embedding provider after construction, e.g. once a model
    /// has finished loading.
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings = Some(EmbeddingCache::new(provider.clone()));
        self.provider = Some(provider);
        self
    }

    fn from_storage(storage: Storage, config: SpecMemConfig, provider: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        let embeddings = provider.clone().map(EmbeddingCache::new);
        let queue = ChangeQueue::new(config.scan_max_files, 5, Duration::from_millis(500));
        Self {
            storage,
            config,
            provider,
            embeddings,
            watcher: Mutex::new(None),
            queue: Mutex::new(queue),
        }
    }

    /// Save a new memory, embedding its content if a provider is attached
    /// and no embedding was supplied, then assigning it into the project's
    /// quadrant index and initializing its forgetting-curve state.
    pub fn save_memory(&self, mut new: NewMemory) -> Result<Memory> {
        if new.embedding.is_none() {
            if let Some(cache) = &self.embeddings {
                new.embedding = cache.get_or_embed(&new.content).ok();
            }
        }

        let ms = MemoryStore::new(&self.storage);
        let memory = ms.insert(new)?;

        if memory.embedding.is_some() {
            let quadrant = QuadrantIndex::new(&self.storage);
            quadrant.assign(&memory)?;
        }

        let forgetting = ForgettingEngine::new(&self.storage);
        forgetting.initialize(&memory.id, memory.importance)?;

        Ok(memory)
    }

    /// Fetch a memory by id within `project_path`, recording the access
    /// against its forgetting curve and access count.
    pub fn get_memory(&self, project_path: &str, id: &str) -> Result<Memory> {
        let ms = MemoryStore::new(&self.storage);
        let memory = ms.require(project_path, id)?;
        ms.record_access(project_path, id)?;
        let forgetting = ForgettingEngine::new(&self.storage);
        forgetting.record_success(id)?;
        Ok(memory)
    }

    /// List memories for the current project matching `filter`.
    pub fn find_memory(&self, project_path: &str, filter: &MemoryFilter) -> Result<Vec<Memory>> {
        let ms = MemoryStore::new(&self.storage);
        Ok(ms.find_by_project(project_path, filter)?)
    }

    /// Soft-delete a memory (expires it immediately rather than erasing it).
    pub fn remove_memory(&self, project_path: &str, id: &str) -> Result<()> {
        let ms = MemoryStore::new(&self.storage);
        ms.soft_delete(project_path, id)?;
        Ok(())
    }

    /// Assemble adaptive context for `query` within `project_path`: the
    /// primary retrieval operation tool callers use (spec section 6).
    pub fn smart_context(
        &self,
        project_path: &str,
        query: &str,
        token_budget: Option<usize>,
    ) -> Result<AssembledContext> {
        let assembler = ContextAssembler::new(&self.storage);
        let provider = self.provider.as_deref();
        Ok(assembler.assemble(project_path, query, None, provider, token_budget)?)
    }

    /// Link two memories as having been used together, outside of a
    /// `smart_context` call (e.g. the caller already knows they're related).
    pub fn associate(&self, a: &str, b: &str, link_type: graph::LinkType) -> Result<()> {
        let graph = AssociativeGraph::new(&self.storage);
        graph.co_activate(a, b, link_type)?;
        Ok(())
    }

    /// Create an ordered reasoning chain over `memory_ids`.
    pub fn create_chain(&self, project_path: &str, name: &str, memory_ids: &[String]) -> Result<String> {
        let graph = AssociativeGraph::new(&self.storage);
        Ok(graph.create_chain(project_path, name, memory_ids, "reasoning")?)
    }

    /// Start watching `root` for filesystem changes, feeding normalized
    /// events into the internal change queue. Returns an error if a watch
    /// is already active.
    pub fn start_watching(&self, root: PathBuf) -> Result<()> {
        let mut guard = self.watcher.lock().unwrap();
        if guard.is_some() {
            return Err(SpecMemError::ValidationError("watcher already running".into()));
        }
        let watcher = FileWatcher::start(root, &self.config.scan_ignore_patterns)
            .map_err(|e| SpecMemError::ValidationError(e.to_string()))?;
        *guard = Some(watcher);
        Ok(())
    }

    /// Stop any active filesystem watch.
    pub fn stop_watching(&self) {
        *self.watcher.lock().unwrap() = None;
    }

    /// Drain queued filesystem change events into the store, up to
    /// `max_events` per call, using the attached embedding cache (if any)
    /// to embed changed file content.
    pub fn process_pending_changes(&self, project_path: &str, max_events: usize) -> Result<usize> {
        if let Some(watcher) = self.watcher.lock().unwrap().as_ref() {
            let mut queue = self.queue.lock().unwrap();
            while let Some(event) = watcher.try_recv() {
                let _ = queue.push(event);
            }
        }

        let handler = ChangeHandler::new(&self.storage, self.embeddings.as_ref());
        let mut processed = 0;
        let mut queue = self.queue.lock().unwrap();
        while processed < max_events {
            let Some(event) = queue.pop() else { break };
            if handler.handle(project_path, &event).is_err() {
                queue.retry(event);
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// Check drift between disk and the store for `project_path`.
    pub fn check_sync(&self, project_path: &str, root: &std::path::Path) -> Result<DriftReport> {
        let disk_files: std::collections::HashSet<PathBuf> =
            watcher::scan_existing_files(root, &self.config.scan_ignore_patterns)
                .map_err(|e| SpecMemError::ValidationError(e.to_string()))?
                .into_iter()
                .collect();

        let conn = self.storage.conn()?;
        let mut stmt = conn
            .prepare("SELECT file_path, content_hash FROM codebase_files WHERE project_path = ?1")
            .map_err(store::StoreError::from)?;
        let indexed: Vec<(PathBuf, String)> = stmt
            .query_map([project_path], |row| {
                Ok((PathBuf::from(row.get::<_, String>(0)?), row.get::<_, String>(1)?))
            })
            .map_err(store::StoreError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store::StoreError::from)?;
        drop(stmt);
        drop(conn);

        let checker = SyncChecker::new(&self.storage);
        let report = checker.check_drift(project_path, &disk_files, &indexed)?;
        checker.record_status(project_path, report.sync_score)?;
        Ok(report)
    }

    /// Force a bounded resync against the current drift report.
    pub fn force_resync(&self, project_path: &str, root: &std::path::Path, deadline: Duration) -> Result<ResyncOutcome> {
        let report = self.check_sync(project_path, root)?;
        let checker = SyncChecker::new(&self.storage);
        let handler = ChangeHandler::new(&self.storage, self.embeddings.as_ref());

        let outcome = checker.resync(
            &report,
            deadline,
            |path| {
                let event = ChangeEvent::new(path.to_path_buf(), queue::ChangeKind::Modified, Priority::Normal);
                handler.handle(project_path, &event).map_err(sync::SyncError::Store)
            },
            |path| {
                let event = ChangeEvent::new(path.to_path_buf(), queue::ChangeKind::Removed, Priority::Normal);
                handler.handle(project_path, &event).map_err(sync::SyncError::Store)
            },
        )?;
        Ok(outcome)
    }

    /// Summarize a project's sync-check history.
    pub fn sync_health(&self, project_path: &str) -> Result<sync::SyncHealth> {
        let checker = SyncChecker::new(&self.storage);
        Ok(checker.sync_health(project_path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_get_memory_round_trips() {
        let specmem = SpecMem::open_in_memory(SpecMemConfig::default()).unwrap();
        let saved = specmem
            .save_memory(NewMemory {
                project_path: "proj".into(),
                content: "retries use exponential backoff".into(),
                importance: Importance::High,
                ..Default::default()
            })
            .unwrap();
        let fetched = specmem.get_memory("proj", &saved.id).unwrap();
        assert_eq!(fetched.content, saved.content);
        assert_eq!(fetched.access_count, 1);
    }

    #[test]
    fn smart_context_surfaces_saved_memory() {
        let specmem = SpecMem::open_in_memory(SpecMemConfig::default()).unwrap();
        specmem
            .save_memory(NewMemory {
                project_path: "proj".into(),
                content: "the deploy pipeline runs on merge to main".into(),
                ..Default::default()
            })
            .unwrap();
        let context = specmem.smart_context("proj", "deploy pipeline", None).unwrap();
        assert!(!context.items.is_empty());
    }

    #[test]
    fn remove_memory_excludes_it_from_default_listing() {
        let specmem = SpecMem::open_in_memory(SpecMemConfig::default()).unwrap();
        let memory = specmem
            .save_memory(NewMemory {
                project_path: "proj".into(),
                content: "temporary note".into(),
                ..Default::default()
            })
            .unwrap();
        specmem.remove_memory("proj", &memory.id).unwrap();
        let found = specmem.find_memory("proj", &MemoryFilter::default()).unwrap();
        assert!(found.is_empty());
    }
}
