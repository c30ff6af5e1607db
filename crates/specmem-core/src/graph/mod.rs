//! Associative Graph (spec C7 / section 4.7)
//!
//! Links between memories strengthen when they're retrieved together, decay
//! otherwise, and support spreading activation: a bounded-depth traversal
//! that multiplies link strength along each path to find what else a given
//! memory should bring to mind. Also owns ordered reasoning chains, whose
//! adjacent members imply a causal link (spec Open Question, resolved in
//! the design notes).

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{Storage, StoreError};

type Result<T> = std::result::Result<T, StoreError>;

/// How two memories came to be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Contextual,
    Causal,
    Semantic,
    Temporal,
    UserDefined,
}

impl LinkType {
    pub fn parse(s: &str) -> Self {
        match s {
            "causal" => LinkType::Causal,
            "semantic" => LinkType::Semantic,
            "temporal" => LinkType::Temporal,
            "user_defined" => LinkType::UserDefined,
            _ => LinkType::Contextual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Contextual => "contextual",
            LinkType::Causal => "causal",
            LinkType::Semantic => "semantic",
            LinkType::Temporal => "temporal",
            LinkType::UserDefined => "user_defined",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Association {
    pub source_id: String,
    pub target_id: String,
    pub link_type: LinkType,
    pub strength: f32,
    pub co_activation_count: u32,
}

/// A memory reached via spreading activation, with its cumulative strength
/// and the depth it was found at.
#[derive(Debug, Clone)]
pub struct Activation {
    pub memory_id: String,
    pub strength: f32,
    pub depth: u32,
}

const DEFAULT_DECAY_RATE: f32 = 0.05;
const DEFAULT_LINK_STRENGTH: f32 = 0.3;
const STRENGTH_INCREMENT: f32 = 0.1;

/// Persists and traverses the associative link graph.
pub struct AssociativeGraph<'a> {
    storage: &'a Storage,
}

impl<'a> AssociativeGraph<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Record that `a` and `b` were retrieved together, strengthening (or
    /// creating) the link between them. Links are undirected in strength but
    /// stored with a canonical ordering so updates aren't duplicated.
    pub fn co_activate(&self, a: &str, b: &str, link_type: LinkType) -> Result<()> {
        let (source, target) = if a <= b { (a, b) } else { (b, a) };
        let conn = self.storage.conn()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO memory_associations (source_id, target_id, link_type, strength, co_activation_count, last_co_activation, decay_rate)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)
             ON CONFLICT(source_id, target_id) DO UPDATE SET
                strength = MIN(1.0, strength + ?7),
                co_activation_count = co_activation_count + 1,
                last_co_activation = ?5",
            params![
                source,
                target,
                link_type.as_str(),
                DEFAULT_LINK_STRENGTH,
                now,
                DEFAULT_DECAY_RATE,
                STRENGTH_INCREMENT,
            ],
        )?;
        Ok(())
    }

    /// Apply time-based decay to every link whose `last_co_activation` is
    /// older than `now`, using each link's own `decay_rate` (spec section
    /// 4.7.d). Links decayed to near-zero strength are pruned.
    pub fn decay_all(&self) -> Result<u32> {
        let conn = self.storage.conn()?;
        conn.execute(
            "UPDATE memory_associations SET strength = MAX(0.0, strength - decay_rate *
                (CAST((julianday('now') - julianday(last_co_activation)) AS REAL)))",
            [],
        )?;
        let pruned = conn.execute("DELETE FROM memory_associations WHERE strength < 0.05", [])?;
        Ok(pruned as u32)
    }

    fn neighbors(&self, memory_id: &str) -> Result<Vec<(String, f32)>> {
        let conn = self.storage.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, strength FROM memory_associations WHERE source_id = ?1
             UNION
             SELECT source_id, strength FROM memory_associations WHERE target_id = ?1",
        )?;
        let rows = stmt
            .query_map([memory_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f32>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Spreading activation: starting from `seed`, follow links outward up
    /// to `max_depth` hops, multiplying strength along each path, stopping a
    /// branch once its accumulated strength drops below `min_strength`
    /// (spec section 4.7.c). Returns at most `limit` activations, strongest
    /// first.
    pub fn spread(&self, seed: &str, max_depth: u32, min_strength: f32, limit: usize) -> Result<Vec<Activation>> {
        use std::collections::HashMap;

        let mut best: HashMap<String, Activation> = HashMap::new();
        let mut frontier = vec![(seed.to_string(), 1.0_f32, 0_u32)];
        let mut visited_edges: std::collections::HashSet<(String, String)> = std::collections::HashSet::new();

        while let Some((current_id, strength, depth)) = frontier.pop() {
            if depth >= max_depth || strength < min_strength {
                continue;
            }
            for (neighbor, link_strength) in self.neighbors(&current_id)? {
                let edge = if current_id <= neighbor {
                    (current_id.clone(), neighbor.clone())
                } else {
                    (neighbor.clone(), current_id.clone())
                };
                if !visited_edges.insert(edge) {
                    continue;
                }
                let propagated = strength * link_strength;
                if propagated < min_strength {
                    continue;
                }
                let entry = best.entry(neighbor.clone()).or_insert(Activation {
                    memory_id: neighbor.clone(),
                    strength: 0.0,
                    depth: depth + 1,
                });
                if propagated > entry.strength {
                    entry.strength = propagated;
                    entry.depth = depth + 1;
                }
                frontier.push((neighbor, propagated, depth + 1));
            }
        }

        best.remove(seed);
        let mut out: Vec<Activation> = best.into_values().collect();
        out.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(limit);
        Ok(out)
    }

    /// Create a reasoning chain: an ordered sequence of memory ids where
    /// each consecutive pair is treated as causally linked.
    pub fn create_chain(
        &self,
        project_path: &str,
        name: &str,
        memory_ids: &[String],
        chain_type: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let conn = self.storage.conn()?;
        conn.execute(
            "INSERT INTO memory_chains (id, project_path, name, description, memory_ids, chain_type, importance, created_at, access_count)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, 'medium', ?6, 0)",
            params![
                id,
                project_path,
                name,
                serde_json::to_string(memory_ids).unwrap_or_default(),
                chain_type,
                Utc::now(),
            ],
        )?;

        for pair in memory_ids.windows(2) {
            self.co_activate(&pair[0], &pair[1], LinkType::Causal)?;
        }

        Ok(id)
    }

    /// Fetch the ordered memory ids of a chain.
    pub fn chain_members(&self, chain_id: &str) -> Result<Option<Vec<String>>> {
        let conn = self.storage.conn()?;
        let json: Option<String> = conn
            .query_row("SELECT memory_ids FROM memory_chains WHERE id = ?1", [chain_id], |r| r.get(0))
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j).unwrap_or_default()))
    }

    /// Other members of every chain that `memory_id` belongs to, in no
    /// particular order and with `memory_id` itself excluded. Chains are
    /// small and the `memory_ids` column isn't indexable, so this scans the
    /// project's chains rather than trying to query into the JSON array.
    pub fn fellow_chain_members(&self, project_path: &str, memory_id: &str) -> Result<Vec<String>> {
        let conn = self.storage.conn()?;
        let mut stmt = conn.prepare(
            "SELECT memory_ids FROM memory_chains WHERE project_path = ?1",
        )?;
        let rows = stmt.query_map([project_path], |r| r.get::<_, String>(0))?;

        let mut fellows = Vec::new();
        for row in rows {
            let json = row?;
            let ids: Vec<String> = serde_json::from_str(&json).unwrap_or_default();
            if ids.iter().any(|id| id == memory_id) {
                fellows.extend(ids.into_iter().filter(|id| id != memory_id));
            }
        }
        Ok(fellows)
    }
}
