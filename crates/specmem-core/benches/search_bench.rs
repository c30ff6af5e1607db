use criterion::{black_box, criterion_group, criterion_main, Criterion};
use specmem_core::memory::{Memory, MemoryType, Importance};
use specmem_core::search::SearchEngine;
use specmem_core::store::Storage;

fn fake_memory(id: usize, dim: usize) -> Memory {
    let mut embedding = vec![0.0_f32; dim];
    embedding[id % dim] = 1.0;
    Memory {
        id: id.to_string(),
        project_path: "bench".into(),
        content: format!("memory {id}"),
        memory_type: MemoryType::Semantic,
        importance: Importance::Medium,
        tags: vec![],
        metadata: serde_json::json!({}),
        embedding: Some(embedding),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        access_count: 0,
        last_accessed_at: None,
        expires_at: None,
        consolidated_from: vec![],
    }
}

fn bench_vector_search(c: &mut Criterion) {
    let storage = Storage::open_in_memory().unwrap();
    let engine = SearchEngine::new(&storage);
    let candidates: Vec<Memory> = (0..2000).map(|i| fake_memory(i, 128)).collect();
    let query = vec![1.0_f32; 128];

    c.bench_function("vector_search_2000_candidates", |b| {
        b.iter(|| engine.vector_search(black_box(&query), black_box(&candidates), black_box(20)))
    });
}

criterion_group!(benches, bench_vector_search);
criterion_main!(benches);
