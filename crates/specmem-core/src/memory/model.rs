//! Memory data model (spec section 3 / C4)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of experience a memory records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// A specific, time-bound event ("ran the migration at 14:02 and it failed").
    Episodic,
    /// A general fact or relationship that holds independent of when it was learned.
    Semantic,
    /// A how-to: steps, recipes, runbooks.
    Procedural,
    /// Short-lived scratch state relevant only to the current task.
    Working,
    /// A conclusion drawn from reviewing other memories, rather than observed directly.
    Reflection,
}

impl Default for MemoryType {
    fn default() -> Self {
        MemoryType::Semantic
    }
}

impl MemoryType {
    /// Parse from the string stored in the `memory_type` column.
    pub fn parse(s: &str) -> Self {
        match s {
            "episodic" => MemoryType::Episodic,
            "procedural" => MemoryType::Procedural,
            "working" => MemoryType::Working,
            "reflection" => MemoryType::Reflection,
            _ => MemoryType::Semantic,
        }
    }

    /// The string stored in the `memory_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Procedural => "procedural",
            MemoryType::Working => "working",
            MemoryType::Reflection => "reflection",
        }
    }
}

/// How much weight a memory should carry in retrieval and decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Trivial,
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Importance {
    fn default() -> Self {
        Importance::Medium
    }
}

impl Importance {
    /// Parse from the string stored in the `importance` column.
    pub fn parse(s: &str) -> Self {
        match s {
            "trivial" => Importance::Trivial,
            "low" => Importance::Low,
            "high" => Importance::High,
            "critical" => Importance::Critical,
            _ => Importance::Medium,
        }
    }

    /// The string stored in the `importance` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Trivial => "trivial",
            Importance::Low => "low",
            Importance::Medium => "medium",
            Importance::High => "high",
            Importance::Critical => "critical",
        }
    }
}

/// A single stored memory: the unit the rest of the system retrieves,
/// links, decays and consolidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub project_path: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub importance: Importance,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_count: u32,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// IDs of memories this one was consolidated from, if any (spec 4.4.e).
    pub consolidated_from: Vec<String>,
}

/// Fields accepted when creating a new memory. `embedding` is optional
/// because it may be filled in asynchronously after ingestion.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub project_path: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub importance: Importance,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Default for NewMemory {
    fn default() -> Self {
        Self {
            project_path: String::new(),
            content: String::new(),
            memory_type: MemoryType::default(),
            importance: Importance::default(),
            tags: Vec::new(),
            metadata: serde_json::json!({}),
            embedding: None,
            expires_at: None,
        }
    }
}

/// Filter shape for `findByProject` (spec section 4.4 supplemented: the
/// distilled spec names the operation but not its filter parameters).
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub memory_type: Option<MemoryType>,
    pub tags: Vec<String>,
    pub importance_at_least: Option<Importance>,
    pub include_expired: bool,
    pub limit: Option<usize>,
}
