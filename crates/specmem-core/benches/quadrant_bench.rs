use criterion::{criterion_group, criterion_main, Criterion};
use specmem_core::memory::{MemoryStore, NewMemory};
use specmem_core::quadrant::QuadrantIndex;
use specmem_core::store::Storage;

fn bench_assign(c: &mut Criterion) {
    c.bench_function("quadrant_assign_1000_memories", |b| {
        b.iter(|| {
            let storage = Storage::open_in_memory().unwrap();
            let ms = MemoryStore::new(&storage);
            let index = QuadrantIndex::new(&storage);
            for i in 0..1000 {
                let embedding = vec![(i % 16) as f32, ((i / 16) % 16) as f32, 0.0];
                let memory = ms
                    .insert(NewMemory {
                        project_path: "bench".into(),
                        content: format!("memory {i}"),
                        embedding: Some(embedding),
                        ..Default::default()
                    })
                    .unwrap();
                index.assign(&memory).unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_assign);
criterion_main!(benches);
