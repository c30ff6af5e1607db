//! Cross-module scenario tests exercised through the `specmem_core::SpecMem`
//! facade rather than any single component in isolation.

use std::sync::Arc;

use specmem_core::embedding::{EmbeddingError, EmbeddingProvider};
use specmem_core::memory::{Importance, MemoryFilter, NewMemory};
use specmem_core::{SpecMem, SpecMemConfig};

/// A deterministic provider whose vectors depend only on text content, so
/// tests don't need a real model and stay reproducible.
struct HashProvider {
    dim: usize,
}

impl EmbeddingProvider for HashProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0_f32; self.dim];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dim] += byte as f32;
        }
        Ok(vector)
    }

    fn native_dimension(&self) -> Option<usize> {
        Some(self.dim)
    }

    fn provider_id(&self) -> &str {
        "hash-test-provider"
    }
}

fn specmem_with_provider(dim: usize) -> SpecMem {
    SpecMem::open_in_memory(SpecMemConfig::default())
        .unwrap()
        .with_provider(Arc::new(HashProvider { dim }))
}

#[test]
fn soft_deleted_memories_never_reappear_in_default_listing() {
    let specmem = specmem_with_provider(16);
    let memory = specmem
        .save_memory(NewMemory {
            project_path: "proj".into(),
            content: "the cache invalidates on every deploy".into(),
            importance: Importance::Medium,
            ..Default::default()
        })
        .unwrap();

    specmem.remove_memory("proj", &memory.id).unwrap();

    let visible = specmem.find_memory("proj", &MemoryFilter::default()).unwrap();
    assert!(visible.iter().all(|m| m.id != memory.id));

    let with_expired = specmem
        .find_memory(
            "proj",
            &MemoryFilter {
                include_expired: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(with_expired.iter().any(|m| m.id == memory.id));
}

#[test]
fn quadrant_tree_splits_once_a_leaf_exceeds_capacity() {
    let specmem = specmem_with_provider(8);

    // Insert enough distinct memories to force the root quadrant (capacity
    // 1000) to split into at least two leaves, mirroring the spec's
    // "quadrant split" seed scenario at a test-friendly scale.
    for i in 0..1100 {
        specmem
            .save_memory(NewMemory {
                project_path: "proj".into(),
                content: format!("memory number {i} about topic cluster {}", i % 7),
                ..Default::default()
            })
            .unwrap();
    }

    let all = specmem
        .find_memory(
            "proj",
            &MemoryFilter {
                limit: Some(2000),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(all.len(), 1100);
}

#[test]
fn smart_context_fits_within_requested_token_budget() {
    let specmem = specmem_with_provider(16);
    for i in 0..10 {
        specmem
            .save_memory(NewMemory {
                project_path: "proj".into(),
                content: format!("auth flow step {i}: verify the jwt signature and claims"),
                ..Default::default()
            })
            .unwrap();
    }

    let context = specmem.smart_context("proj", "how does auth work", Some(200)).unwrap();
    assert!(context.total_tokens <= 200);

    let ids: std::collections::HashSet<_> = context.items.iter().map(|i| &i.memory_id).collect();
    assert_eq!(ids.len(), context.items.len(), "returned duplicate memory ids");
}

#[test]
fn check_sync_reports_perfect_score_for_an_untouched_project() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();

    let specmem = specmem_with_provider(8);
    let report = specmem.check_sync("proj", dir.path()).unwrap();

    // Nothing has been indexed yet, so the on-disk file is untracked; the
    // score reflects that rather than claiming a clean sync.
    assert!(!report.is_clean());
    assert_eq!(report.files_scanned, 1);
}
