//! Memory CRUD (spec C4 / section 4.4)

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::store::Storage;
use crate::vector;

use super::error::MemoryError;
use super::model::{Importance, Memory, MemoryFilter, MemoryType, NewMemory};

type Result<T> = std::result::Result<T, MemoryError>;

fn row_to_memory(row: &Row) -> rusqlite::Result<Memory> {
    let tags_json: String = row.get("tags")?;
    let metadata_json: String = row.get("metadata")?;
    let consolidated_json: String = row.get("consolidated_from")?;
    let embedding: Option<Vec<u8>> = row.get("embedding")?;
    let memory_type: String = row.get("memory_type")?;
    let importance: String = row.get("importance")?;

    Ok(Memory {
        id: row.get("id")?,
        project_path: row.get("project_path")?,
        content: row.get("content")?,
        memory_type: MemoryType::parse(&memory_type),
        importance: Importance::parse(&importance),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        embedding: embedding.map(|b| vector::decode(&b)),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        access_count: row.get::<_, i64>("access_count")? as u32,
        last_accessed_at: row.get("last_accessed_at")?,
        expires_at: row.get("expires_at")?,
        consolidated_from: serde_json::from_str(&consolidated_json).unwrap_or_default(),
    })
}

/// CRUD and query operations over the `memories` table.
pub struct MemoryStore<'a> {
    storage: &'a Storage,
}

impl<'a> MemoryStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Insert a new memory, returning its generated id.
    pub fn insert(&self, new: NewMemory) -> Result<Memory> {
        if new.content.trim().is_empty() {
            return Err(MemoryError::InvalidContent("content is empty".into()));
        }
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let tags_json = serde_json::to_string(&new.tags)?;
        let metadata_json = serde_json::to_string(&new.metadata)?;
        let embedding_bytes = new.embedding.as_ref().map(|v| vector::encode(v));
        let embedding_dim = new.embedding.as_ref().map(|v| v.len() as i64);

        let conn = self.storage.conn()?;
        conn.execute(
            "INSERT INTO memories (
                id, project_path, content, memory_type, importance, tags, metadata,
                embedding, embedding_dim, created_at, updated_at, access_count,
                last_accessed_at, expires_at, consolidated_from
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, NULL, ?12, '[]')",
            params![
                id,
                new.project_path,
                new.content,
                new.memory_type.as_str(),
                new.importance.as_str(),
                tags_json,
                metadata_json,
                embedding_bytes,
                embedding_dim,
                now,
                now,
                new.expires_at,
            ],
        )?;

        self.get(&new.project_path, &id)?.ok_or_else(|| MemoryError::NotFound(id))
    }

    /// Fetch a memory by id scoped to `project_path`, returning `Ok(None)`
    /// if it doesn't exist and `PermissionDenied` if it exists but belongs
    /// to a different project (spec section 4.4, cross-project reads are a
    /// bug, not a configuration option).
    pub fn get(&self, project_path: &str, id: &str) -> Result<Option<Memory>> {
        let conn = self.storage.conn()?;
        let memory = conn
            .query_row("SELECT * FROM memories WHERE id = ?1", [id], row_to_memory)
            .optional()?;
        match memory {
            None => Ok(None),
            Some(m) if m.project_path == project_path => Ok(Some(m)),
            Some(m) => Err(MemoryError::PermissionDenied(format!(
                "memory {id} belongs to project '{}', not '{project_path}'",
                m.project_path
            ))),
        }
    }

    /// Fetch a memory by id scoped to `project_path`, returning
    /// `MemoryError::NotFound` if missing.
    pub fn require(&self, project_path: &str, id: &str) -> Result<Memory> {
        self.get(project_path, id)?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }

    /// Replace mutable fields of a memory and bump `updated_at`.
    pub fn update(
        &self,
        project_path: &str,
        id: &str,
        content: Option<String>,
        importance: Option<Importance>,
        tags: Option<Vec<String>>,
        metadata: Option<serde_json::Value>,
        embedding: Option<Vec<f32>>,
    ) -> Result<Memory> {
        let existing = self.require(project_path, id)?;
        let content = content.unwrap_or(existing.content);
        if content.trim().is_empty() {
            return Err(MemoryError::InvalidContent("content is empty".into()));
        }
        let importance = importance.unwrap_or(existing.importance);
        let tags = tags.unwrap_or(existing.tags);
        let metadata = metadata.unwrap_or(existing.metadata);
        let embedding = embedding.or(existing.embedding);

        let tags_json = serde_json::to_string(&tags)?;
        let metadata_json = serde_json::to_string(&metadata)?;
        let embedding_bytes = embedding.as_ref().map(|v| vector::encode(v));
        let embedding_dim = embedding.as_ref().map(|v| v.len() as i64);

        let conn = self.storage.conn()?;
        conn.execute(
            "UPDATE memories SET content = ?1, importance = ?2, tags = ?3, metadata = ?4,
             embedding = ?5, embedding_dim = ?6, updated_at = ?7 WHERE id = ?8",
            params![
                content,
                importance.as_str(),
                tags_json,
                metadata_json,
                embedding_bytes,
                embedding_dim,
                Utc::now(),
                id,
            ],
        )?;

        self.require(project_path, id)
    }

    /// Record an access: bumps `access_count` and `last_accessed_at`. Called
    /// whenever a memory is surfaced by retrieval (spec section 4.4.d).
    pub fn record_access(&self, project_path: &str, id: &str) -> Result<()> {
        self.require(project_path, id)?;
        let conn = self.storage.conn()?;
        conn.execute(
            "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?1 WHERE id = ?2",
            params![Utc::now(), id],
        )?;
        Ok(())
    }

    /// Soft-delete: mark a memory as expired immediately rather than erasing
    /// it, so associations and chains referencing it remain resolvable
    /// until a maintenance pass prunes them (spec section 4.4.e).
    pub fn soft_delete(&self, project_path: &str, id: &str) -> Result<()> {
        self.require(project_path, id)?;
        let conn = self.storage.conn()?;
        let changed = conn.execute(
            "UPDATE memories SET expires_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Permanently remove a memory and its dependent rows (cascades via FK).
    pub fn hard_delete(&self, project_path: &str, id: &str) -> Result<()> {
        self.require(project_path, id)?;
        let conn = self.storage.conn()?;
        let changed = conn.execute("DELETE FROM memories WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// List memories for a project matching `filter`, newest first.
    pub fn find_by_project(&self, project_path: &str, filter: &MemoryFilter) -> Result<Vec<Memory>> {
        let conn = self.storage.conn()?;
        let mut sql = String::from("SELECT * FROM memories WHERE project_path = ?1");
        if let Some(mt) = filter.memory_type {
            sql.push_str(&format!(" AND memory_type = '{}'", mt.as_str()));
        }
        if let Some(min) = filter.importance_at_least {
            let levels: Vec<&str> = [
                Importance::Trivial,
                Importance::Low,
                Importance::Medium,
                Importance::High,
                Importance::Critical,
            ]
            .into_iter()
            .filter(|i| *i >= min)
            .map(|i| i.as_str())
            .collect();
            let list = levels
                .iter()
                .map(|s| format!("'{s}'"))
                .collect::<Vec<_>>()
                .join(",");
            sql.push_str(&format!(" AND importance IN ({list})"));
        }
        if !filter.include_expired {
            sql.push_str(" AND (expires_at IS NULL OR expires_at > datetime('now'))");
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([project_path], row_to_memory)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if filter.tags.is_empty() {
            Ok(rows)
        } else {
            Ok(rows
                .into_iter()
                .filter(|m| filter.tags.iter().any(|t| m.tags.contains(t)))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Storage {
        Storage::open_in_memory().unwrap()
    }

    #[test]
    fn insert_and_get_round_trips() {
        let storage = store();
        let ms = MemoryStore::new(&storage);
        let inserted = ms
            .insert(NewMemory {
                project_path: "proj".into(),
                content: "the api uses cursor pagination".into(),
                ..Default::default()
            })
            .unwrap();
        let fetched = ms.get("proj", &inserted.id).unwrap().unwrap();
        assert_eq!(fetched.content, "the api uses cursor pagination");
        assert_eq!(fetched.access_count, 0);
    }

    #[test]
    fn cross_project_get_is_permission_denied() {
        let storage = store();
        let ms = MemoryStore::new(&storage);
        let m = ms
            .insert(NewMemory {
                project_path: "proj-a".into(),
                content: "secret to proj-a".into(),
                ..Default::default()
            })
            .unwrap();
        let result = ms.get("proj-b", &m.id);
        assert!(matches!(result, Err(MemoryError::PermissionDenied(_))));
    }

    #[test]
    fn empty_content_is_rejected() {
        let storage = store();
        let ms = MemoryStore::new(&storage);
        let result = ms.insert(NewMemory {
            project_path: "proj".into(),
            content: "   ".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(MemoryError::InvalidContent(_))));
    }

    #[test]
    fn soft_delete_excludes_from_default_listing() {
        let storage = store();
        let ms = MemoryStore::new(&storage);
        let m = ms
            .insert(NewMemory {
                project_path: "proj".into(),
                content: "temp fact".into(),
                ..Default::default()
            })
            .unwrap();
        ms.soft_delete("proj", &m.id).unwrap();

        let visible = ms.find_by_project("proj", &MemoryFilter::default()).unwrap();
        assert!(visible.is_empty());

        let with_expired = ms
            .find_by_project(
                "proj",
                &MemoryFilter {
                    include_expired: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(with_expired.len(), 1);
    }

    #[test]
    fn record_access_increments_count() {
        let storage = store();
        let ms = MemoryStore::new(&storage);
        let m = ms
            .insert(NewMemory {
                project_path: "proj".into(),
                content: "fact".into(),
                ..Default::default()
            })
            .unwrap();
        ms.record_access("proj", &m.id).unwrap();
        ms.record_access("proj", &m.id).unwrap();
        let fetched = ms.get("proj", &m.id).unwrap().unwrap();
        assert_eq!(fetched.access_count, 2);
        assert!(fetched.last_accessed_at.is_some());
    }

    #[test]
    fn find_by_project_filters_by_importance_floor() {
        let storage = store();
        let ms = MemoryStore::new(&storage);
        ms.insert(NewMemory {
            project_path: "proj".into(),
            content: "low importance fact".into(),
            importance: Importance::Low,
            ..Default::default()
        })
        .unwrap();
        ms.insert(NewMemory {
            project_path: "proj".into(),
            content: "critical fact".into(),
            importance: Importance::Critical,
            ..Default::default()
        })
        .unwrap();

        let filtered = ms
            .find_by_project(
                "proj",
                &MemoryFilter {
                    importance_at_least: Some(Importance::High),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].importance, Importance::Critical);
    }
}
