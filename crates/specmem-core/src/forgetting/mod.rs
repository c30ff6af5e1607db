//! Forgetting Curve Engine (spec C8 / section 4.8)
//!
//! A simplified Ebbinghaus-style spaced-repetition model: each memory
//! carries a stability and an importance multiplier, and retrievability
//! decays exponentially with time since last review. Access acts as a
//! successful review; memories that go unaccessed past their interval are
//! candidates for consolidation or pruning.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::memory::Importance;
use crate::store::{Storage, StoreError};

type Result<T> = std::result::Result<T, StoreError>;

/// Initial stability (in days) seeded from a memory's importance: more
/// important memories start out harder to forget (spec section 4.8.a).
fn seed_stability(importance: Importance) -> f32 {
    match importance {
        Importance::Critical => 30.0,
        Importance::High => 20.0,
        Importance::Medium => 10.0,
        Importance::Low => 5.0,
        Importance::Trivial => 2.0,
    }
}

/// Retrievability multiplier applied per unit of importance: more important
/// memories decay more slowly at a given stability (spec section 4.8.a,
/// Open Question resolved in design notes: the multiplier table below).
fn importance_multiplier(importance: Importance) -> f32 {
    match importance {
        Importance::Critical => 2.0,
        Importance::High => 1.5,
        Importance::Medium => 1.0,
        Importance::Low => 0.75,
        Importance::Trivial => 0.5,
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStrength {
    pub memory_id: String,
    pub stability: f32,
    pub retrievability: f32,
    pub last_review: DateTime<Utc>,
    pub review_count: u32,
    pub interval_days: i64,
    pub ease_factor: f32,
    pub importance: Importance,
}

/// Reads and updates each memory's forgetting-curve state.
pub struct ForgettingEngine<'a> {
    storage: &'a Storage,
}

impl<'a> ForgettingEngine<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Initialize forgetting-curve state for a newly created memory,
    /// seeding stability from its importance.
    pub fn initialize(&self, memory_id: &str, importance: Importance) -> Result<()> {
        let conn = self.storage.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO memory_strength (memory_id, stability, retrievability, last_review, review_count, interval_days, ease_factor, importance)
             VALUES (?1, ?2, 1.0, ?3, 0, 1, 2.0, ?4)",
            params![memory_id, seed_stability(importance), Utc::now(), importance.as_str()],
        )?;
        Ok(())
    }

    pub fn get(&self, memory_id: &str) -> Result<Option<MemoryStrength>> {
        let conn = self.storage.conn()?;
        let row = conn
            .query_row(
                "SELECT memory_id, stability, retrievability, last_review, review_count, interval_days, ease_factor, importance
                 FROM memory_strength WHERE memory_id = ?1",
                [memory_id],
                |row| {
                    Ok(MemoryStrength {
                        memory_id: row.get(0)?,
                        stability: row.get(1)?,
                        retrievability: row.get(2)?,
                        last_review: row.get(3)?,
                        review_count: row.get::<_, i64>(4)? as u32,
                        interval_days: row.get(5)?,
                        ease_factor: row.get(6)?,
                        importance: Importance::parse(&row.get::<_, String>(7)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Retrievability at time `now`: `R = exp(-t / (S * I))`, where `t` is
    /// days since last review, `S` is stability and `I` is the importance
    /// multiplier (spec section 4.8.a).
    pub fn retrievability_at(strength: &MemoryStrength, now: DateTime<Utc>) -> f32 {
        let elapsed_days = (now - strength.last_review).num_seconds() as f32 / 86400.0;
        if elapsed_days <= 0.0 {
            return 1.0;
        }
        let denom = strength.stability.max(0.01) * importance_multiplier(strength.importance);
        (-elapsed_days / denom.max(0.01)).exp()
    }

    /// Record a successful access: `stability = min(100, stability + 5 *
    /// log2(max(1, days_since_review) + 1))` (spec section 4.8.b).
    pub fn record_success(&self, memory_id: &str) -> Result<MemoryStrength> {
        let now = Utc::now();
        let mut strength = self.get_or_init(memory_id)?;

        let days_since_review = ((now - strength.last_review).num_seconds() as f32 / 86400.0).max(1.0);
        strength.stability = (strength.stability + 5.0 * (days_since_review + 1.0).log2()).min(100.0);
        strength.retrievability = 1.0;
        strength.review_count += 1;
        strength.last_review = now;

        self.persist(&strength)?;
        Ok(strength)
    }

    /// Record a failed/ignored access attempt: `stability = max(1, stability
    /// * 0.8)` (spec section 4.8.c).
    pub fn record_failure(&self, memory_id: &str) -> Result<MemoryStrength> {
        let now = Utc::now();
        let mut strength = self.get_or_init(memory_id)?;

        strength.stability = (strength.stability * 0.8).max(1.0);
        strength.retrievability = Self::retrievability_at(&strength, now);
        strength.review_count += 1;
        strength.last_review = now;

        self.persist(&strength)?;
        Ok(strength)
    }

    fn get_or_init(&self, memory_id: &str) -> Result<MemoryStrength> {
        match self.get(memory_id)? {
            Some(s) => Ok(s),
            None => {
                self.initialize(memory_id, Importance::default())?;
                Ok(self.get(memory_id)?.expect("just initialized"))
            }
        }
    }

    fn persist(&self, strength: &MemoryStrength) -> Result<()> {
        let conn = self.storage.conn()?;
        conn.execute(
            "UPDATE memory_strength SET stability = ?1, retrievability = ?2, last_review = ?3,
             review_count = ?4, interval_days = ?5, ease_factor = ?6, importance = ?7 WHERE memory_id = ?8",
            params![
                strength.stability,
                strength.retrievability,
                strength.last_review,
                strength.review_count,
                strength.interval_days,
                strength.ease_factor,
                strength.importance.as_str(),
                strength.memory_id,
            ],
        )?;
        Ok(())
    }

    /// List memory ids in `project_path` whose current retrievability has
    /// fallen below `threshold` — candidates for resurfacing, consolidation,
    /// or pruning (spec section 4.8.d, `getFading`).
    pub fn fading(&self, project_path: &str, threshold: f32) -> Result<Vec<String>> {
        let conn = self.storage.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ms.memory_id, ms.stability, ms.last_review, ms.importance FROM memory_strength ms
             JOIN memories m ON m.id = ms.memory_id
             WHERE m.project_path = ?1",
        )?;
        let rows = stmt
            .query_map([project_path], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f32>(1)?,
                    row.get::<_, DateTime<Utc>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let now = Utc::now();
        Ok(rows
            .into_iter()
            .filter_map(|(id, stability, last_review, importance)| {
                let strength = MemoryStrength {
                    memory_id: id.clone(),
                    stability,
                    retrievability: 1.0,
                    last_review,
                    review_count: 0,
                    interval_days: 0,
                    ease_factor: 0.0,
                    importance: Importance::parse(&importance),
                };
                let r = Self::retrievability_at(&strength, now);
                (r < threshold).then_some(id)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrievability_decays_with_elapsed_time() {
        let strength = MemoryStrength {
            memory_id: "m".into(),
            stability: 5.0,
            retrievability: 1.0,
            last_review: Utc::now() - chrono::Duration::days(10),
            review_count: 1,
            interval_days: 1,
            ease_factor: 2.0,
            importance: Importance::Medium,
        };
        let r = ForgettingEngine::retrievability_at(&strength, Utc::now());
        assert!(r < 1.0 && r > 0.0);
    }

    #[test]
    fn higher_importance_decays_more_slowly() {
        let base = MemoryStrength {
            memory_id: "m".into(),
            stability: 5.0,
            retrievability: 1.0,
            last_review: Utc::now() - chrono::Duration::days(10),
            review_count: 1,
            interval_days: 1,
            ease_factor: 2.0,
            importance: Importance::Trivial,
        };
        let important = MemoryStrength {
            importance: Importance::Critical,
            ..base.clone()
        };
        let now = Utc::now();
        assert!(ForgettingEngine::retrievability_at(&important, now) > ForgettingEngine::retrievability_at(&base, now));
    }

    #[test]
    fn initialize_seeds_stability_from_importance() {
        let storage = Storage::open_in_memory().unwrap();
        let engine = ForgettingEngine::new(&storage);
        engine.initialize("m1", Importance::Critical).unwrap();
        let strength = engine.get("m1").unwrap().unwrap();
        assert_eq!(strength.stability, 30.0);
        assert_eq!(strength.importance, Importance::Critical);
    }

    #[test]
    fn success_increases_stability() {
        let storage = Storage::open_in_memory().unwrap();
        let engine = ForgettingEngine::new(&storage);
        engine.initialize("m1", Importance::Medium).unwrap();
        let before = engine.get("m1").unwrap().unwrap();
        let after = engine.record_success("m1").unwrap();
        assert!(after.stability > before.stability);
        assert_eq!(after.review_count, 1);
    }

    #[test]
    fn failure_shrinks_stability_by_20_percent() {
        let storage = Storage::open_in_memory().unwrap();
        let engine = ForgettingEngine::new(&storage);
        engine.initialize("m1", Importance::Medium).unwrap();
        let before = engine.get("m1").unwrap().unwrap();
        let after = engine.record_failure("m1").unwrap();
        assert!((after.stability - (before.stability * 0.8).max(1.0)).abs() < 1e-4);
    }

    #[test]
    fn fading_excludes_recently_reviewed_memories() {
        let storage = Storage::open_in_memory().unwrap();
        let ms = crate::memory::MemoryStore::new(&storage);
        let memory = ms
            .insert(crate::memory::NewMemory {
                project_path: "proj".into(),
                content: "fact".into(),
                ..Default::default()
            })
            .unwrap();
        let engine = ForgettingEngine::new(&storage);
        engine.initialize(&memory.id, Importance::Medium).unwrap();

        let fading = engine.fading("proj", 0.5).unwrap();
        assert!(fading.is_empty());
    }
}
