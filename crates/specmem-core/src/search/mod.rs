//! Hybrid Search (spec C5 / section 4.5)
//!
//! Combines cosine-similarity vector search over embeddings with SQLite
//! FTS5 lexical search, fusing the two ranked lists by weighted score. Also
//! owns `findDuplicates`, a maintenance operation over near-identical
//! memories within a project.

use rusqlite::params;
use serde::Serialize;

use crate::memory::{Memory, MemoryStore};
use crate::store::{Storage, StoreError};
use crate::vector;

type Result<T> = std::result::Result<T, StoreError>;

/// Default weight given to vector similarity versus lexical score in fusion,
/// used when a caller doesn't supply its own `alpha` (spec section 4.5.b).
pub const DEFAULT_ALPHA: f32 = 0.6;

/// Default cosine similarity threshold above which two memories are
/// considered near-duplicates, used when a caller doesn't supply its own
/// `threshold` (spec section 4.5.e).
pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.97;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub memory_id: String,
    pub score: f32,
    pub vector_score: Option<f32>,
    pub text_score: Option<f32>,
}

/// Hybrid vector + lexical search over a project's memories.
pub struct SearchEngine<'a> {
    storage: &'a Storage,
}

impl<'a> SearchEngine<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Rank `candidates` (already narrowed, e.g. by a quadrant query) by
    /// cosine similarity to `query_vector`.
    pub fn vector_search(&self, query_vector: &[f32], candidates: &[Memory], limit: usize) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = candidates
            .iter()
            .filter_map(|m| {
                let embedding = m.embedding.as_ref()?;
                let score = vector::cosine_similarity(query_vector, embedding);
                Some(SearchHit {
                    memory_id: m.id.clone(),
                    score,
                    vector_score: Some(score),
                    text_score: None,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        hits
    }

    /// FTS5 lexical search scoped to a project, using SQLite's `bm25()`
    /// ranking function (lower is better; negated here so higher is
    /// better, matching the vector score's orientation).
    pub fn text_search(&self, project_path: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let conn = self.storage.conn()?;
        let mut stmt = conn.prepare(
            "SELECT m.id, -bm25(memories_fts) AS rank
             FROM memories_fts
             JOIN memories m ON m.id = memories_fts.id
             WHERE memories_fts MATCH ?1 AND m.project_path = ?2
             ORDER BY rank DESC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![query, project_path, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let max_rank = rows.iter().map(|(_, r)| *r).fold(f64::MIN, f64::max).max(1.0);
        Ok(rows
            .into_iter()
            .map(|(id, rank)| {
                let normalized = (rank / max_rank).clamp(0.0, 1.0) as f32;
                SearchHit {
                    memory_id: id,
                    score: normalized,
                    vector_score: None,
                    text_score: Some(normalized),
                }
            })
            .collect())
    }

    /// Fuse vector and text result lists by weighted score: vector hits are
    /// weighted `alpha`, text hits `1.0 - alpha`. A memory appearing in both
    /// lists gets the weighted sum; appearing in only one gets that list's
    /// weighted score alone, per spec section 4.5.c.
    pub fn fuse(&self, vector_hits: Vec<SearchHit>, text_hits: Vec<SearchHit>, alpha: f32, limit: usize) -> Vec<SearchHit> {
        use std::collections::HashMap;
        let mut merged: HashMap<String, SearchHit> = HashMap::new();

        for hit in vector_hits {
            merged.insert(
                hit.memory_id.clone(),
                SearchHit {
                    memory_id: hit.memory_id,
                    score: hit.score * alpha,
                    vector_score: hit.vector_score,
                    text_score: None,
                },
            );
        }

        for hit in text_hits {
            merged
                .entry(hit.memory_id.clone())
                .and_modify(|existing| {
                    existing.score += hit.score * (1.0 - alpha);
                    existing.text_score = Some(hit.score);
                })
                .or_insert(SearchHit {
                    memory_id: hit.memory_id,
                    score: hit.score * (1.0 - alpha),
                    vector_score: None,
                    text_score: Some(hit.score),
                });
        }

        let mut out: Vec<SearchHit> = merged.into_values().collect();
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(limit);
        out
    }

    /// Find near-duplicate memory pairs within a project: embeddings whose
    /// cosine similarity exceeds `threshold`. Scoped to a single project
    /// because cross-project duplication isn't meaningful (memories from
    /// different projects are never candidates for consolidation).
    pub fn find_duplicates(&self, project_path: &str, threshold: f32) -> Result<Vec<(String, String, f32)>> {
        let ms = MemoryStore::new(self.storage);
        let memories = ms.find_by_project(project_path, &Default::default())?;
        let with_embeddings: Vec<&Memory> = memories.iter().filter(|m| m.embedding.is_some()).collect();

        let mut pairs = Vec::new();
        for i in 0..with_embeddings.len() {
            for j in (i + 1)..with_embeddings.len() {
                let a = with_embeddings[i];
                let b = with_embeddings[j];
                let sim = vector::cosine_similarity(
                    a.embedding.as_ref().unwrap(),
                    b.embedding.as_ref().unwrap(),
                );
                if sim >= threshold {
                    pairs.push((a.id.clone(), b.id.clone(), sim));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NewMemory;

    #[test]
    fn vector_search_ranks_by_similarity() {
        let storage = Storage::open_in_memory().unwrap();
        let engine = SearchEngine::new(&storage);
        let close = Memory {
            embedding: Some(vec![1.0, 0.0, 0.0]),
            ..test_memory("close")
        };
        let far = Memory {
            embedding: Some(vec![0.0, 1.0, 0.0]),
            ..test_memory("far")
        };
        let hits = engine.vector_search(&[1.0, 0.0, 0.0], &[far, close], 10);
        assert_eq!(hits[0].memory_id, "close");
    }

    #[test]
    fn fuse_prefers_items_present_in_both_lists() {
        let storage = Storage::open_in_memory().unwrap();
        let engine = SearchEngine::new(&storage);
        let vector_hits = vec![
            SearchHit { memory_id: "a".into(), score: 0.9, vector_score: Some(0.9), text_score: None },
            SearchHit { memory_id: "b".into(), score: 0.85, vector_score: Some(0.85), text_score: None },
        ];
        let text_hits = vec![
            SearchHit { memory_id: "b".into(), score: 0.9, vector_score: None, text_score: Some(0.9) },
        ];
        let fused = engine.fuse(vector_hits, text_hits, DEFAULT_ALPHA, 10);
        assert_eq!(fused[0].memory_id, "b");
    }

    #[test]
    fn find_duplicates_flags_near_identical_embeddings() {
        let storage = Storage::open_in_memory().unwrap();
        let ms = MemoryStore::new(&storage);
        ms.insert(NewMemory {
            project_path: "proj".into(),
            content: "uses jwt for auth".into(),
            embedding: Some(vec![1.0, 0.0, 0.0]),
            ..Default::default()
        })
        .unwrap();
        ms.insert(NewMemory {
            project_path: "proj".into(),
            content: "uses jwt tokens for auth".into(),
            embedding: Some(vec![0.999, 0.001, 0.0]),
            ..Default::default()
        })
        .unwrap();
        let engine = SearchEngine::new(&storage);
        let dupes = engine.find_duplicates("proj", DEFAULT_DUPLICATE_THRESHOLD).unwrap();
        assert_eq!(dupes.len(), 1);
    }

    fn test_memory(id: &str) -> Memory {
        use chrono::Utc;
        Memory {
            id: id.to_string(),
            project_path: "proj".into(),
            content: "x".into(),
            memory_type: crate::memory::MemoryType::Semantic,
            importance: crate::memory::Importance::Medium,
            tags: vec![],
            metadata: serde_json::json!({}),
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            access_count: 0,
            last_accessed_at: None,
            expires_at: None,
            consolidated_from: vec![],
        }
    }
}
