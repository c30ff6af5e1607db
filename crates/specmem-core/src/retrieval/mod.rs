//! Adaptive Context Retrieval (spec C9 / section 4.9)
//!
//! Assembles a context window for a query out of four buckets — the core
//! hybrid-search hits, memories reached by spreading activation from them,
//! memories sharing a reasoning chain with them, and loosely-related
//! contextual filler — trimmed to a token budget, then emits co-activation
//! back into the associative graph for whatever made the final cut.

use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::graph::{AssociativeGraph, LinkType};
use crate::memory::MemoryStore;
use crate::quadrant::QuadrantIndex;
use crate::search::SearchEngine;
use crate::store::{Storage, StoreError};

type Result<T> = std::result::Result<T, StoreError>;

/// Rough estimate of how many LLM tokens a string costs: about 4 characters
/// per token for English prose, which is the same heuristic most context
/// budgeting code uses when an exact tokenizer isn't available (spec
/// section 4.9.d, supplemented: named but not specified in the distillation).
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f32 / 4.0).ceil() as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextBucket {
    Core,
    Associated,
    Chain,
    Contextual,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    pub memory_id: String,
    pub content: String,
    pub bucket: ContextBucket,
    pub relevance: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub items: Vec<ContextItem>,
    pub total_tokens: usize,
}

const SPREADING_DEPTH: u32 = 2;
const MAX_ASSOCIATED_PER_CORE: usize = 3;
const ACTIVATION_FLOOR: f32 = 0.05;
const DEFAULT_TOKEN_BUDGET: usize = 4000;

/// Assembles adaptive context windows and feeds retrieval outcomes back
/// into the associative graph and forgetting engine.
pub struct ContextAssembler<'a> {
    storage: &'a Storage,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Build a context window for `query` within `project_path`, preferring
    /// hybrid search hits, then their associative neighbors, then fellow
    /// chain members, then trimming to `token_budget` (or the default).
    pub fn assemble(
        &self,
        project_path: &str,
        query: &str,
        query_vector: Option<&[f32]>,
        provider: Option<&dyn EmbeddingProvider>,
        token_budget: Option<usize>,
    ) -> Result<AssembledContext> {
        let budget = token_budget.unwrap_or(DEFAULT_TOKEN_BUDGET);
        let ms = MemoryStore::new(self.storage);
        let search = SearchEngine::new(self.storage);
        let quadrant = QuadrantIndex::new(self.storage);
        let graph = AssociativeGraph::new(self.storage);

        let query_vector: Option<Vec<f32>> = match query_vector {
            Some(v) => Some(v.to_vec()),
            None => provider.and_then(|p| p.embed(query).ok()),
        };

        let mut items: Vec<ContextItem> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        let core_hits = if let Some(qv) = &query_vector {
            let candidates = quadrant.candidates(project_path, qv, 4)?;
            search.vector_search(qv, &candidates, 8)
        } else {
            Vec::new()
        };
        let text_hits = search.text_search(project_path, query, 8)?;
        let fused = search.fuse(core_hits, text_hits, crate::search::DEFAULT_ALPHA, 8);

        for hit in &fused {
            if let Some(memory) = ms.get(project_path, &hit.memory_id)? {
                if seen.insert(memory.id.clone()) {
                    items.push(ContextItem {
                        memory_id: memory.id.clone(),
                        content: memory.content.clone(),
                        bucket: ContextBucket::Core,
                        relevance: hit.score,
                    });
                }
            }
        }

        let core_ids: Vec<String> = items.iter().map(|i| i.memory_id.clone()).collect();
        for core_id in &core_ids {
            for fellow_id in graph.fellow_chain_members(project_path, core_id)? {
                if seen.insert(fellow_id.clone()) {
                    if let Some(memory) = ms.get(project_path, &fellow_id)? {
                        items.push(ContextItem {
                            memory_id: memory.id,
                            content: memory.content,
                            bucket: ContextBucket::Chain,
                            relevance: 1.0,
                        });
                    }
                }
            }
        }

        for core_id in &core_ids {
            let activations = graph.spread(core_id, SPREADING_DEPTH, ACTIVATION_FLOOR, MAX_ASSOCIATED_PER_CORE)?;
            for activation in activations {
                if seen.insert(activation.memory_id.clone()) {
                    if let Some(memory) = ms.get(project_path, &activation.memory_id)? {
                        items.push(ContextItem {
                            memory_id: memory.id,
                            content: memory.content,
                            bucket: ContextBucket::Associated,
                            relevance: activation.strength,
                        });
                    }
                }
            }
        }

        // Contextual filler: recently touched memories from the same project
        // that neither the hybrid search nor spreading activation surfaced,
        // so the assembled window isn't purely query-driven.
        if items.len() < 8 {
            let filler = ms.find_by_project(
                project_path,
                &crate::memory::MemoryFilter {
                    limit: Some(8),
                    ..Default::default()
                },
            )?;
            for memory in filler {
                if items.len() >= 8 {
                    break;
                }
                if seen.insert(memory.id.clone()) {
                    items.push(ContextItem {
                        memory_id: memory.id,
                        content: memory.content,
                        bucket: ContextBucket::Contextual,
                        relevance: 0.1,
                    });
                }
            }
        }

        let mut total_tokens = 0;
        let mut trimmed = Vec::new();
        for item in items {
            let cost = estimate_tokens(&item.content);
            if total_tokens + cost > budget {
                continue;
            }
            total_tokens += cost;
            trimmed.push(item);
        }

        for pair in trimmed.windows(2) {
            graph.co_activate(&pair[0].memory_id, &pair[1].memory_id, LinkType::Contextual)?;
        }
        for item in &trimmed {
            ms.record_access(project_path, &item.memory_id)?;
        }

        Ok(AssembledContext {
            items: trimmed,
            total_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NewMemory;

    #[test]
    fn estimate_tokens_is_roughly_four_chars_per_token() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn assemble_surfaces_lexically_matching_memory() {
        let storage = Storage::open_in_memory().unwrap();
        let ms = MemoryStore::new(&storage);
        ms.insert(NewMemory {
            project_path: "proj".into(),
            content: "the retry backoff uses exponential jitter".into(),
            ..Default::default()
        })
        .unwrap();

        let assembler = ContextAssembler::new(&storage);
        let context = assembler
            .assemble("proj", "backoff jitter", None, None, None)
            .unwrap();
        assert!(!context.items.is_empty());
        assert_eq!(context.items[0].bucket, ContextBucket::Core);
    }

    #[test]
    fn assemble_surfaces_fellow_chain_members() {
        let storage = Storage::open_in_memory().unwrap();
        let ms = MemoryStore::new(&storage);
        let graph = AssociativeGraph::new(&storage);

        let step_one = ms
            .insert(NewMemory {
                project_path: "proj".into(),
                content: "parse the request body".into(),
                ..Default::default()
            })
            .unwrap();
        let step_two = ms
            .insert(NewMemory {
                project_path: "proj".into(),
                content: "unrelated filler about something else entirely".into(),
                ..Default::default()
            })
            .unwrap();
        graph
            .create_chain(
                "proj",
                "request handling",
                &[step_one.id.clone(), step_two.id.clone()],
                "causal",
            )
            .unwrap();

        let assembler = ContextAssembler::new(&storage);
        let context = assembler
            .assemble("proj", "parse the request body", None, None, None)
            .unwrap();
        assert!(context
            .items
            .iter()
            .any(|i| i.memory_id == step_two.id && i.bucket == ContextBucket::Chain));
    }

    #[test]
    fn assemble_respects_token_budget() {
        let storage = Storage::open_in_memory().unwrap();
        let ms = MemoryStore::new(&storage);
        for i in 0..5 {
            ms.insert(NewMemory {
                project_path: "proj".into(),
                content: format!("memory about retry logic number {i} with padding text here"),
                ..Default::default()
            })
            .unwrap();
        }

        let assembler = ContextAssembler::new(&storage);
        let context = assembler
            .assemble("proj", "retry logic", None, None, Some(10))
            .unwrap();
        assert!(context.total_tokens <= 10);
    }
}
