//! Change Handler (spec C12 / section 4.12)
//!
//! Turns one normalized filesystem change into a row in `codebase_files` and
//! a searchable `Memory`: hash the content, detect language and other
//! metadata, embed if a provider is available, and upsert both. Removals
//! delete the `codebase_files` row and soft-delete its memory.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::embedding::EmbeddingCache;
use crate::memory::{MemoryStore, MemoryType, NewMemory};
use crate::queue::{ChangeEvent, ChangeKind};
use crate::store::{Storage, StoreError};
use crate::vector;

type Result<T> = std::result::Result<T, StoreError>;

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Guess a language tag from a file extension. Good enough for metadata and
/// search filtering; not a substitute for a real language server.
fn detect_language(path: &std::path::Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    let lang = match ext {
        "rs" => "rust",
        "py" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "md" => "markdown",
        "toml" => "toml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        _ => return None,
    };
    Some(lang.to_string())
}

/// Auto-detected tags for a file's metadata, derived from its path (spec
/// section 4.12.a). Supplements language detection with coarse categories
/// useful for filtering later.
fn auto_tags(path: &std::path::Path) -> Vec<String> {
    let mut tags = Vec::new();
    let path_str = path.to_string_lossy();
    if path_str.contains("test") {
        tags.push("test".to_string());
    }
    if path_str.contains("/.github/") || path_str.contains("ci/") {
        tags.push("ci".to_string());
    }
    if path.file_name().and_then(|n| n.to_str()) == Some("Cargo.toml")
        || path.file_name().and_then(|n| n.to_str()) == Some("package.json")
    {
        tags.push("manifest".to_string());
    }
    if let Some(lang) = detect_language(path) {
        tags.push(lang);
    }
    tags
}

/// Processes a single change event against the codebase file index.
pub struct ChangeHandler<'a> {
    storage: &'a Storage,
    embeddings: Option<&'a EmbeddingCache>,
}

impl<'a> ChangeHandler<'a> {
    pub fn new(storage: &'a Storage, embeddings: Option<&'a EmbeddingCache>) -> Self {
        Self { storage, embeddings }
    }

    /// Apply `event` to the store for `project_path`.
    pub fn handle(&self, project_path: &str, event: &ChangeEvent) -> Result<()> {
        match event.kind {
            ChangeKind::Removed => self.remove(project_path, &event.path),
            ChangeKind::Created | ChangeKind::Modified => self.upsert(project_path, &event.path),
        }
    }

    fn upsert(&self, project_path: &str, path: &std::path::Path) -> Result<()> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Ok(()), // binary or unreadable file: skip, don't fail the batch
        };
        let hash = content_hash(&content);
        let language = detect_language(path);

        let existing_memory_id = self.existing_file(project_path, path)?;
        if let Some((existing_hash, _)) = &existing_memory_id {
            if existing_hash == &hash {
                return Ok(());
            }
        }
        let existing_memory_id = existing_memory_id.and_then(|(_, memory_id)| memory_id);

        let embedding = self
            .embeddings
            .and_then(|cache| cache.get_or_embed(&content).ok());
        let tags = auto_tags(path);

        let ms = MemoryStore::new(self.storage);
        let memory = match &existing_memory_id {
            Some(memory_id) => match ms.update(
                project_path,
                memory_id,
                Some(content.clone()),
                None,
                Some(tags.clone()),
                None,
                embedding.clone(),
            ) {
                Ok(memory) => memory,
                Err(_) => self.insert_file_memory(&ms, project_path, path, &content, tags.clone(), embedding.clone())?,
            },
            None => self.insert_file_memory(&ms, project_path, path, &content, tags.clone(), embedding.clone())?,
        };

        let conn = self.storage.conn()?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO codebase_files (id, project_path, file_path, content, content_hash, language, embedding, embedding_dim, last_indexed, memory_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(project_path, file_path) DO UPDATE SET
                content = excluded.content, content_hash = excluded.content_hash,
                language = excluded.language, embedding = excluded.embedding,
                embedding_dim = excluded.embedding_dim, last_indexed = excluded.last_indexed,
                memory_id = excluded.memory_id",
            params![
                id,
                project_path,
                path.to_string_lossy(),
                content,
                hash,
                language,
                embedding.as_ref().map(|e| vector::encode(e)),
                embedding.as_ref().map(|e| e.len() as i64),
                Utc::now(),
                memory.id,
            ],
        )?;
        tracing::trace!(path = %path.display(), tags = ?tags, "indexed file");
        Ok(())
    }

    fn insert_file_memory(
        &self,
        ms: &MemoryStore,
        project_path: &str,
        path: &std::path::Path,
        content: &str,
        tags: Vec<String>,
        embedding: Option<Vec<f32>>,
    ) -> Result<crate::memory::Memory> {
        Ok(ms.insert(NewMemory {
            project_path: project_path.to_string(),
            content: content.to_string(),
            memory_type: MemoryType::Semantic,
            tags,
            metadata: serde_json::json!({ "file_path": path.to_string_lossy() }),
            embedding,
            ..Default::default()
        })?)
    }

    fn remove(&self, project_path: &str, path: &std::path::Path) -> Result<()> {
        let memory_id = self.existing_file(project_path, path)?.and_then(|(_, memory_id)| memory_id);

        let conn = self.storage.conn()?;
        conn.execute(
            "DELETE FROM codebase_files WHERE project_path = ?1 AND file_path = ?2",
            params![project_path, path.to_string_lossy()],
        )?;
        drop(conn);

        if let Some(memory_id) = memory_id {
            let ms = MemoryStore::new(self.storage);
            match ms.soft_delete(project_path, &memory_id) {
                Ok(()) | Err(crate::memory::MemoryError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn existing_file(&self, project_path: &str, path: &std::path::Path) -> Result<Option<(String, Option<String>)>> {
        let conn = self.storage.conn()?;
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT content_hash, memory_id FROM codebase_files WHERE project_path = ?1 AND file_path = ?2",
                params![project_path, path.to_string_lossy()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Priority;
    use std::io::Write;

    #[test]
    fn upsert_indexes_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("lib.rs");
        std::fs::File::create(&file_path).unwrap().write_all(b"fn main() {}").unwrap();

        let storage = Storage::open_in_memory().unwrap();
        let handler = ChangeHandler::new(&storage, None);
        let event = ChangeEvent::new(file_path.clone(), ChangeKind::Created, Priority::Normal);
        handler.handle("proj", &event).unwrap();

        let conn = storage.conn().unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM codebase_files WHERE project_path = 'proj'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn unchanged_content_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("lib.rs");
        std::fs::File::create(&file_path).unwrap().write_all(b"fn main() {}").unwrap();

        let storage = Storage::open_in_memory().unwrap();
        let handler = ChangeHandler::new(&storage, None);
        let event = ChangeEvent::new(file_path.clone(), ChangeKind::Created, Priority::Normal);
        handler.handle("proj", &event).unwrap();
        handler.handle("proj", &event).unwrap();

        let conn = storage.conn().unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM codebase_files WHERE project_path = 'proj'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn removal_deletes_row() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("lib.rs");
        std::fs::File::create(&file_path).unwrap().write_all(b"fn main() {}").unwrap();

        let storage = Storage::open_in_memory().unwrap();
        let handler = ChangeHandler::new(&storage, None);
        handler
            .handle("proj", &ChangeEvent::new(file_path.clone(), ChangeKind::Created, Priority::Normal))
            .unwrap();
        handler
            .handle("proj", &ChangeEvent::new(file_path, ChangeKind::Removed, Priority::Normal))
            .unwrap();

        let conn = storage.conn().unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM codebase_files WHERE project_path = 'proj'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn upsert_creates_a_searchable_memory() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("lib.rs");
        std::fs::File::create(&file_path).unwrap().write_all(b"fn main() {}").unwrap();

        let storage = Storage::open_in_memory().unwrap();
        let handler = ChangeHandler::new(&storage, None);
        let event = ChangeEvent::new(file_path.clone(), ChangeKind::Created, Priority::Normal);
        handler.handle("proj", &event).unwrap();

        let ms = MemoryStore::new(&storage);
        let memories = ms.find_by_project("proj", &Default::default()).unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].content, "fn main() {}");
    }

    #[test]
    fn reindexing_updates_the_same_memory_instead_of_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("lib.rs");
        std::fs::File::create(&file_path).unwrap().write_all(b"fn main() {}").unwrap();

        let storage = Storage::open_in_memory().unwrap();
        let handler = ChangeHandler::new(&storage, None);
        handler
            .handle("proj", &ChangeEvent::new(file_path.clone(), ChangeKind::Created, Priority::Normal))
            .unwrap();

        std::fs::File::create(&file_path).unwrap().write_all(b"fn main() { loop {} }").unwrap();
        handler
            .handle("proj", &ChangeEvent::new(file_path, ChangeKind::Modified, Priority::Normal))
            .unwrap();

        let ms = MemoryStore::new(&storage);
        let memories = ms.find_by_project("proj", &Default::default()).unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].content, "fn main() { loop {} }");
    }

    #[test]
    fn removal_soft_deletes_the_memory() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("lib.rs");
        std::fs::File::create(&file_path).unwrap().write_all(b"fn main() {}").unwrap();

        let storage = Storage::open_in_memory().unwrap();
        let handler = ChangeHandler::new(&storage, None);
        handler
            .handle("proj", &ChangeEvent::new(file_path.clone(), ChangeKind::Created, Priority::Normal))
            .unwrap();
        handler
            .handle("proj", &ChangeEvent::new(file_path, ChangeKind::Removed, Priority::Normal))
            .unwrap();

        let ms = MemoryStore::new(&storage);
        let memories = ms.find_by_project("proj", &Default::default()).unwrap();
        assert!(memories.is_empty());
        let with_expired = ms
            .find_by_project("proj", &crate::memory::MemoryFilter { include_expired: true, ..Default::default() })
            .unwrap();
        assert_eq!(with_expired.len(), 1);
    }

    #[test]
    fn detects_language_from_extension() {
        assert_eq!(detect_language(std::path::Path::new("a.rs")), Some("rust".to_string()));
        assert_eq!(detect_language(std::path::Path::new("a.unknownext")), None);
    }
}
