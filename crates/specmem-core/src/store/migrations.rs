//! Database migrations (schema bootstrap for spec C2/section 6)

/// A single forward-only schema migration.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number, applied in order starting at 1.
    pub version: u32,
    /// Human-readable description.
    pub description: &'static str,
    /// SQL to apply.
    pub up: &'static str,
}

/// All migrations, applied in order against `user_version`.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "memories, codebase_files, schema_meta and FTS5 indexes",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "memory_strength, memory_associations, memory_chains",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "memory_quadrants, quadrant_assignments",
        up: MIGRATION_V3_UP,
    },
    Migration {
        version: 4,
        description: "code_explanations, code_prompt_links, code_access_patterns",
        up: MIGRATION_V4_UP,
    },
    Migration {
        version: 5,
        description: "sync status history",
        up: MIGRATION_V5_UP,
    },
];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    project_path TEXT NOT NULL,
    content TEXT NOT NULL,
    memory_type TEXT NOT NULL DEFAULT 'semantic',
    importance TEXT NOT NULL DEFAULT 'medium',
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    embedding BLOB,
    embedding_dim INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT,
    expires_at TEXT,
    consolidated_from TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_memories_project_type_created
    ON memories(project_path, memory_type, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_memories_expires ON memories(expires_at);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    id UNINDEXED,
    content,
    tags,
    content='memories',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, id, content, tags)
    VALUES (new.rowid, new.id, new.content, new.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content, tags)
    VALUES ('delete', old.rowid, old.id, old.content, old.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content, tags)
    VALUES ('delete', old.rowid, old.id, old.content, old.tags);
    INSERT INTO memories_fts(rowid, id, content, tags)
    VALUES (new.rowid, new.id, new.content, new.tags);
END;

CREATE TABLE IF NOT EXISTS codebase_files (
    id TEXT PRIMARY KEY,
    project_path TEXT NOT NULL,
    file_path TEXT NOT NULL,
    content TEXT,
    content_hash TEXT NOT NULL,
    language TEXT,
    embedding BLOB,
    embedding_dim INTEGER,
    last_indexed TEXT NOT NULL,
    memory_id TEXT REFERENCES memories(id) ON DELETE SET NULL,
    UNIQUE(project_path, file_path)
);

CREATE INDEX IF NOT EXISTS idx_codebase_files_lookup
    ON codebase_files(project_path, file_path);
"#;

const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memory_strength (
    memory_id TEXT PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    stability REAL NOT NULL DEFAULT 1.0,
    retrievability REAL NOT NULL DEFAULT 1.0,
    last_review TEXT NOT NULL,
    review_count INTEGER NOT NULL DEFAULT 0,
    interval_days INTEGER NOT NULL DEFAULT 1,
    ease_factor REAL NOT NULL DEFAULT 2.0,
    importance TEXT NOT NULL DEFAULT 'medium'
);

CREATE TABLE IF NOT EXISTS memory_associations (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    link_type TEXT NOT NULL DEFAULT 'contextual',
    strength REAL NOT NULL DEFAULT 0.3,
    co_activation_count INTEGER NOT NULL DEFAULT 1,
    last_co_activation TEXT NOT NULL,
    decay_rate REAL NOT NULL DEFAULT 0.05,
    PRIMARY KEY (source_id, target_id)
);

CREATE INDEX IF NOT EXISTS idx_associations_source ON memory_associations(source_id);
CREATE INDEX IF NOT EXISTS idx_associations_target ON memory_associations(target_id);

CREATE TABLE IF NOT EXISTS memory_chains (
    id TEXT PRIMARY KEY,
    project_path TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    memory_ids TEXT NOT NULL DEFAULT '[]',
    chain_type TEXT NOT NULL DEFAULT 'reasoning',
    importance TEXT NOT NULL DEFAULT 'medium',
    created_at TEXT NOT NULL,
    last_accessed_at TEXT,
    access_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_chains_project ON memory_chains(project_path);
"#;

const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memory_quadrants (
    id TEXT PRIMARY KEY,
    project_path TEXT NOT NULL,
    name TEXT NOT NULL,
    level INTEGER NOT NULL DEFAULT 0,
    parent_id TEXT,
    child_ids TEXT NOT NULL DEFAULT '[]',
    centroid BLOB,
    centroid_dim INTEGER,
    radius REAL NOT NULL DEFAULT 0.0,
    keywords TEXT NOT NULL DEFAULT '[]',
    memory_count INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',
    max_memories INTEGER NOT NULL DEFAULT 1000,
    min_memories INTEGER NOT NULL DEFAULT 50,
    max_radius REAL NOT NULL DEFAULT 1.0
);

CREATE INDEX IF NOT EXISTS idx_quadrants_project_level
    ON memory_quadrants(project_path, level);
CREATE INDEX IF NOT EXISTS idx_quadrants_parent ON memory_quadrants(parent_id);

CREATE TABLE IF NOT EXISTS quadrant_assignments (
    memory_id TEXT PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    quadrant_id TEXT NOT NULL,
    distance_to_centroid REAL NOT NULL,
    assigned_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_assignments_quadrant
    ON quadrant_assignments(quadrant_id);
"#;

const MIGRATION_V4_UP: &str = r#"
CREATE TABLE IF NOT EXISTS code_explanations (
    id TEXT PRIMARY KEY,
    project_path TEXT NOT NULL,
    file_path TEXT NOT NULL,
    explanation TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS code_prompt_links (
    id TEXT PRIMARY KEY,
    project_path TEXT NOT NULL,
    code_explanation_id TEXT NOT NULL REFERENCES code_explanations(id) ON DELETE CASCADE,
    prompt TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS code_access_patterns (
    id TEXT PRIMARY KEY,
    project_path TEXT NOT NULL,
    file_path TEXT NOT NULL,
    accessed_at TEXT NOT NULL,
    feedback TEXT
);
"#;

const MIGRATION_V5_UP: &str = r#"
CREATE TABLE IF NOT EXISTS sync_status_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_path TEXT NOT NULL,
    sync_score INTEGER NOT NULL,
    last_checked TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_status_project
    ON sync_status_history(project_path, last_checked DESC);
"#;

/// Apply all pending migrations (identified by SQLite's `user_version`
/// pragma) against `conn`, inside a transaction per migration.
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        conn.execute_batch(migration.up)?;
        conn.pragma_update(None, "user_version", migration.version)?;
        tracing::debug!(
            version = migration.version,
            description = migration.description,
            "applied migration"
        );
    }
    Ok(())
}
