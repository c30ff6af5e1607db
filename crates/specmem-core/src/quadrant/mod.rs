//! Quadrant Index (spec C6 / section 4.6)
//!
//! A hierarchical semantic k-means partition tree that bounds vector search
//! cost to roughly `O(log N)` descents plus a brute-force scan of one leaf,
//! instead of a full `O(N)` scan over every memory in a project.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::{Memory, MemoryStore};
use crate::store::{Storage, StoreError};
use crate::vector;

type Result<T> = std::result::Result<T, StoreError>;

/// A leaf splits into this many children once it exceeds `max_memories`.
const SPLIT_FANOUT: usize = 4;
/// K-means iterations used when splitting a leaf.
const KMEANS_ITERATIONS: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quadrant {
    pub id: String,
    pub project_path: String,
    pub name: String,
    pub level: u32,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
    pub centroid: Vec<f32>,
    pub radius: f32,
    pub keywords: Vec<String>,
    pub memory_count: u32,
    pub tags: Vec<String>,
    pub max_memories: u32,
    pub min_memories: u32,
    pub max_radius: f32,
}

impl Quadrant {
    pub fn is_leaf(&self) -> bool {
        self.child_ids.is_empty()
    }

    fn root(project_path: &str, dim: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_path: project_path.to_string(),
            name: "root".to_string(),
            level: 0,
            parent_id: None,
            child_ids: Vec::new(),
            centroid: vec![0.0; dim],
            radius: 0.0,
            keywords: Vec::new(),
            memory_count: 0,
            tags: Vec::new(),
            max_memories: 1000,
            min_memories: 50,
            max_radius: 1.0,
        }
    }
}

/// Manages the quadrant tree for a project: assignment, splitting, and
/// bounded candidate retrieval for hybrid search.
pub struct QuadrantIndex<'a> {
    storage: &'a Storage,
}

impl<'a> QuadrantIndex<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Assign `memory` to the nearest leaf quadrant, creating a root
    /// quadrant for the project if none exists yet, and splitting the leaf
    /// if it now exceeds `max_memories` (spec section 4.6.b).
    pub fn assign(&self, memory: &Memory) -> Result<String> {
        let Some(embedding) = memory.embedding.as_ref() else {
            return Ok(String::new());
        };

        let mut current = match self.root(&memory.project_path)? {
            Some(q) => q,
            None => {
                let root = Quadrant::root(&memory.project_path, embedding.len());
                self.save(&root)?;
                root
            }
        };

        while !current.is_leaf() {
            let children = self.children(&current)?;
            current = children
                .into_iter()
                .min_by(|a, b| {
                    vector::cosine_distance(embedding, &a.centroid)
                        .partial_cmp(&vector::cosine_distance(embedding, &b.centroid))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(current);
        }

        let distance = vector::cosine_distance(embedding, &current.centroid);
        self.update_centroid_incremental(&mut current, embedding);
        self.assign_row(&memory.id, &current.id, distance)?;
        self.save(&current)?;

        if current.memory_count >= current.max_memories {
            self.split(&current)?;
        }

        Ok(current.id)
    }

    /// Split a leaf quadrant into `k = min(SPLIT_FANOUT, ceil(count / min_memories))`
    /// children via k-means over its member embeddings, dissolving any
    /// resulting cluster that falls below `min_memories` by redistributing
    /// its members to the nearest surviving cluster (spec section 4.6.c). The
    /// parent stops holding memories of its own once split: all counting
    /// delegates to the children.
    fn split(&self, leaf: &Quadrant) -> Result<()> {
        let member_ids = self.members(&leaf.id)?;
        let ms = MemoryStore::new(self.storage);
        let embeddings: Vec<(String, Vec<f32>)> = member_ids
            .into_iter()
            .filter_map(|id| {
                ms.get(&leaf.project_path, &id)
                    .ok()
                    .flatten()
                    .and_then(|m| m.embedding.map(|e| (id, e)))
            })
            .collect();

        let min_memories = leaf.min_memories.max(1) as usize;
        let k = SPLIT_FANOUT.min(
            (embeddings.len() as f32 / min_memories as f32).ceil().max(1.0) as usize,
        );
        if k < 2 || embeddings.len() < min_memories * 2 {
            return Ok(());
        }

        let points: Vec<Vec<f32>> = embeddings.iter().map(|(_, e)| e.clone()).collect();
        let clusters = kmeans(&points, k);

        let mut children = Vec::new();
        for (i, centroid) in clusters.centroids.iter().enumerate() {
            let mut child = Quadrant::root(&leaf.project_path, centroid.len());
            child.name = format!("{}-{}", leaf.name, i);
            child.level = leaf.level + 1;
            child.parent_id = Some(leaf.id.clone());
            child.centroid = centroid.clone();
            child.max_memories = leaf.max_memories;
            child.min_memories = leaf.min_memories;
            child.max_radius = leaf.max_radius;
            children.push(child);
        }

        let mut assignments = clusters.assignments;

        // Dissolve undersized clusters: reassign their members to whichever
        // surviving cluster's centroid is closest.
        loop {
            let counts: Vec<usize> = (0..children.len())
                .map(|c| assignments.iter().filter(|&&a| a == c).count())
                .collect();
            let survivors: Vec<usize> = (0..children.len())
                .filter(|&c| counts[c] >= min_memories)
                .collect();
            if survivors.len() == counts.len() || survivors.is_empty() {
                break;
            }
            for (idx, a) in assignments.iter_mut().enumerate() {
                if survivors.contains(a) {
                    continue;
                }
                let embedding = &embeddings[idx].1;
                *a = survivors
                    .iter()
                    .copied()
                    .min_by(|&x, &y| {
                        vector::cosine_distance(embedding, &children[x].centroid)
                            .partial_cmp(&vector::cosine_distance(embedding, &children[y].centroid))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .expect("survivors is non-empty");
            }
            children = children
                .into_iter()
                .enumerate()
                .filter(|(c, _)| survivors.contains(c))
                .map(|(_, child)| child)
                .collect();
            let remap: std::collections::HashMap<usize, usize> =
                survivors.iter().enumerate().map(|(new, &old)| (old, new)).collect();
            for a in assignments.iter_mut() {
                *a = remap[a];
            }
        }

        for (idx, (memory_id, embedding)) in embeddings.iter().enumerate() {
            let cluster = assignments[idx];
            let child = &mut children[cluster];
            let distance = vector::cosine_distance(embedding, &child.centroid);
            child.memory_count += 1;
            child.radius = child.radius.max(distance);
            self.assign_row(memory_id, &child.id, distance)?;
        }

        let mut parent = leaf.clone();
        parent.child_ids = children.iter().map(|c| c.id.clone()).collect();
        parent.memory_count = 0;
        for child in &children {
            self.save(child)?;
        }
        self.save(&parent)?;
        Ok(())
    }

    /// Descend the tree collecting the leaf quadrants whose centroid lies
    /// within `fanout` nearest of `query_vector`, then return the member
    /// memories of those leaves as the candidate pool for vector search
    /// (spec section 4.6.d, bounding scan cost).
    pub fn candidates(&self, project_path: &str, query_vector: &[f32], fanout: usize) -> Result<Vec<Memory>> {
        let Some(root) = self.root(project_path)? else {
            return Ok(Vec::new());
        };

        let mut frontier = vec![root];
        loop {
            if frontier.iter().all(|q| q.is_leaf()) {
                break;
            }
            let mut next = Vec::new();
            for q in &frontier {
                if q.is_leaf() {
                    next.push(q.clone());
                    continue;
                }
                let mut children = self.children(q)?;
                children.sort_by(|a, b| {
                    vector::cosine_distance(query_vector, &a.centroid)
                        .partial_cmp(&vector::cosine_distance(query_vector, &b.centroid))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                children.truncate(fanout.max(1));
                next.extend(children);
            }
            frontier = next;
        }

        let ms = MemoryStore::new(self.storage);
        let mut out = Vec::new();
        for leaf in frontier {
            for id in self.members(&leaf.id)? {
                if let Some(m) = ms.get(project_path, &id)? {
                    out.push(m);
                }
            }
        }
        Ok(out)
    }

    fn root(&self, project_path: &str) -> Result<Option<Quadrant>> {
        let conn = self.storage.conn()?;
        let row = conn
            .query_row(
                "SELECT * FROM memory_quadrants WHERE project_path = ?1 AND parent_id IS NULL",
                [project_path],
                row_to_quadrant,
            )
            .optional()?;
        Ok(row)
    }

    fn children(&self, q: &Quadrant) -> Result<Vec<Quadrant>> {
        if q.child_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.storage.conn()?;
        let placeholders = q.child_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT * FROM memory_quadrants WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = q.child_ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(params.as_slice(), row_to_quadrant)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn members(&self, quadrant_id: &str) -> Result<Vec<String>> {
        let conn = self.storage.conn()?;
        let mut stmt = conn.prepare("SELECT memory_id FROM quadrant_assignments WHERE quadrant_id = ?1")?;
        let rows = stmt
            .query_map([quadrant_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn assign_row(&self, memory_id: &str, quadrant_id: &str, distance: f32) -> Result<()> {
        let conn = self.storage.conn()?;
        conn.execute(
            "INSERT INTO quadrant_assignments (memory_id, quadrant_id, distance_to_centroid, assigned_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(memory_id) DO UPDATE SET quadrant_id = excluded.quadrant_id,
                distance_to_centroid = excluded.distance_to_centroid, assigned_at = excluded.assigned_at",
            params![memory_id, quadrant_id, distance, chrono::Utc::now()],
        )?;
        Ok(())
    }

    fn update_centroid_incremental(&self, quadrant: &mut Quadrant, embedding: &[f32]) {
        let n = quadrant.memory_count as f32;
        if quadrant.centroid.len() != embedding.len() {
            quadrant.centroid = embedding.to_vec();
        } else {
            for (c, &x) in quadrant.centroid.iter_mut().zip(embedding) {
                *c = (*c * n + x) / (n + 1.0);
            }
        }
        quadrant.memory_count += 1;
        quadrant.radius = quadrant
            .radius
            .max(vector::cosine_distance(embedding, &quadrant.centroid));
    }

    fn save(&self, q: &Quadrant) -> Result<()> {
        let conn = self.storage.conn()?;
        conn.execute(
            "INSERT INTO memory_quadrants (
                id, project_path, name, level, parent_id, child_ids, centroid, centroid_dim,
                radius, keywords, memory_count, tags, max_memories, min_memories, max_radius
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
             ON CONFLICT(id) DO UPDATE SET name=excluded.name, level=excluded.level,
                parent_id=excluded.parent_id, child_ids=excluded.child_ids, centroid=excluded.centroid,
                centroid_dim=excluded.centroid_dim, radius=excluded.radius, keywords=excluded.keywords,
                memory_count=excluded.memory_count, tags=excluded.tags, max_memories=excluded.max_memories,
                min_memories=excluded.min_memories, max_radius=excluded.max_radius",
            params![
                q.id,
                q.project_path,
                q.name,
                q.level,
                q.parent_id,
                serde_json::to_string(&q.child_ids).unwrap_or_default(),
                vector::encode(&q.centroid),
                q.centroid.len() as i64,
                q.radius,
                serde_json::to_string(&q.keywords).unwrap_or_default(),
                q.memory_count,
                serde_json::to_string(&q.tags).unwrap_or_default(),
                q.max_memories,
                q.min_memories,
                q.max_radius,
            ],
        )?;
        Ok(())
    }
}

fn row_to_quadrant(row: &rusqlite::Row) -> rusqlite::Result<Quadrant> {
    let child_ids: String = row.get("child_ids")?;
    let keywords: String = row.get("keywords")?;
    let tags: String = row.get("tags")?;
    let centroid: Option<Vec<u8>> = row.get("centroid")?;
    Ok(Quadrant {
        id: row.get("id")?,
        project_path: row.get("project_path")?,
        name: row.get("name")?,
        level: row.get::<_, i64>("level")? as u32,
        parent_id: row.get("parent_id")?,
        child_ids: serde_json::from_str(&child_ids).unwrap_or_default(),
        centroid: centroid.map(|b| vector::decode(&b)).unwrap_or_default(),
        radius: row.get("radius")?,
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        memory_count: row.get::<_, i64>("memory_count")? as u32,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        max_memories: row.get::<_, i64>("max_memories")? as u32,
        min_memories: row.get::<_, i64>("min_memories")? as u32,
        max_radius: row.get("max_radius")?,
    })
}

struct KMeansResult {
    centroids: Vec<Vec<f32>>,
    assignments: Vec<usize>,
}

/// Lloyd's-algorithm k-means, seeded by taking every `n/k`-th point so the
/// result is deterministic for a given input ordering.
fn kmeans(points: &[Vec<f32>], k: usize) -> KMeansResult {
    let k = k.min(points.len()).max(1);
    let step = (points.len() / k).max(1);
    let mut centroids: Vec<Vec<f32>> = (0..k).map(|i| points[(i * step).min(points.len() - 1)].clone()).collect();
    let mut assignments = vec![0usize; points.len()];

    for _ in 0..KMEANS_ITERATIONS {
        for (i, p) in points.iter().enumerate() {
            let mut best = 0;
            let mut best_dist = f32::MAX;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = vector::cosine_distance(p, centroid);
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            assignments[i] = best;
        }

        for c in 0..k {
            let members: Vec<Vec<f32>> = points
                .iter()
                .zip(&assignments)
                .filter(|(_, &a)| a == c)
                .map(|(p, _)| p.clone())
                .collect();
            if !members.is_empty() {
                centroids[c] = vector::centroid(&members);
            }
        }
    }

    KMeansResult { centroids, assignments }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NewMemory;

    #[test]
    fn assign_creates_root_and_places_memory() {
        let storage = Storage::open_in_memory().unwrap();
        let ms = MemoryStore::new(&storage);
        let memory = ms
            .insert(NewMemory {
                project_path: "proj".into(),
                content: "fact".into(),
                embedding: Some(vec![1.0, 0.0, 0.0]),
                ..Default::default()
            })
            .unwrap();

        let index = QuadrantIndex::new(&storage);
        let quadrant_id = index.assign(&memory).unwrap();
        assert!(!quadrant_id.is_empty());

        let candidates = index.candidates("proj", &[1.0, 0.0, 0.0], 4).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, memory.id);
    }

    #[test]
    fn kmeans_separates_two_distinct_clusters() {
        // Cosine distance cares about direction, not magnitude, so these
        // clusters differ by angle rather than by how far they sit from the
        // origin.
        let points = vec![
            vec![1.0, 0.0],
            vec![0.9, 0.05],
            vec![0.0, 1.0],
            vec![0.05, 0.9],
        ];
        let result = kmeans(&points, 2);
        assert_eq!(result.assignments[0], result.assignments[1]);
        assert_eq!(result.assignments[2], result.assignments[3]);
        assert_ne!(result.assignments[0], result.assignments[2]);
    }
}
