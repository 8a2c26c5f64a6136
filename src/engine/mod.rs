//! Indexing engine: keeps the vector store and graph store consistent
//! with the filesystem and serves hybrid queries.
//!
//! Reindex passes process skills in a stable order (repo id, then
//! relative path) and aggregate per-file failures instead of aborting;
//! the graph snapshot is written once at the end of the pass, which is
//! the cheapest crash-safety point for an in-memory graph. A crash
//! between a vector upsert and the graph write is recovered by the next
//! reindex, not by a log.

pub mod cache;
pub mod hybrid;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::SearchConfig;
use crate::error::{Result, SkilldexError};
use crate::graph::SkillGraph;
use crate::skill::discovery::SkillDiscovery;
use crate::skill::types::{ScoredSkill, Skill};
use crate::vector::{VectorFilters, VectorStore};
use cache::QueryCache;
pub use hybrid::{SearchFilters, SearchMode, SearchRequest};

/// Outcome of a reindex pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    pub total_skills: u64,
    pub indexed: u64,
    pub failed: u64,
    pub graph_nodes: u64,
    pub graph_edges: u64,
    pub last_indexed: DateTime<Utc>,
}

/// One per-file failure from a reindex pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Stats plus the (possibly empty) failure list; a pass with failures is
/// a partial index, not an error.
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    pub stats: IndexStats,
    pub failures: Vec<IndexFailure>,
}

pub struct IndexingEngine {
    vector: VectorStore,
    graph: RwLock<SkillGraph>,
    /// Cleared when the snapshot failed to load; search degrades to
    /// vector-only until the next reindex rebuilds the graph.
    graph_loaded: AtomicBool,
    discovery: SkillDiscovery,
    snapshot_path: PathBuf,
    search_config: SearchConfig,
    cache: QueryCache,
    last_indexed: RwLock<Option<DateTime<Utc>>>,
}

impl IndexingEngine {
    /// Assemble the engine, restoring the graph snapshot when present.
    /// A corrupt snapshot degrades search to vector-only instead of
    /// failing startup; the next reindex is the recovery tool.
    pub fn new(
        vector: VectorStore,
        discovery: SkillDiscovery,
        snapshot_path: PathBuf,
        search_config: SearchConfig,
    ) -> Self {
        let (graph, loaded) = if snapshot_path.exists() {
            match SkillGraph::load(&snapshot_path) {
                Ok(graph) => (graph, true),
                Err(err) => {
                    warn!(error = %err, "graph snapshot unusable, degrading to vector-only");
                    (SkillGraph::new(), false)
                }
            }
        } else {
            (SkillGraph::new(), true)
        };
        Self {
            vector,
            graph: RwLock::new(graph),
            graph_loaded: AtomicBool::new(loaded),
            discovery,
            snapshot_path,
            search_config,
            cache: QueryCache::default(),
            last_indexed: RwLock::new(None),
        }
    }

    pub fn vector_store(&self) -> &VectorStore {
        &self.vector
    }

    pub fn discovery(&self) -> &SkillDiscovery {
        &self.discovery
    }

    pub fn graph_stats(&self) -> crate::graph::GraphStats {
        self.graph.read().expect("graph lock poisoned").stats()
    }

    pub fn last_indexed(&self) -> Option<DateTime<Utc>> {
        *self.last_indexed.read().expect("last_indexed lock poisoned")
    }

    /// Upsert one skill into both indices: vector first, then graph. A
    /// graph failure leaves the vector record in place and is reported;
    /// the stores are eventually consistent within one reindex pass.
    pub fn index_skill(&self, skill: &Skill) -> Result<()> {
        self.index_one(skill)?;
        self.cache.clear();
        Ok(())
    }

    /// Remove a skill from both indices.
    pub fn remove_skill(&self, skill_id: &str) -> Result<bool> {
        let existed = self.vector.remove(skill_id)?;
        self.graph
            .write()
            .map_err(|_| SkilldexError::GraphUnavailable("graph lock poisoned".to_string()))?
            .remove_skill(skill_id);
        self.cache.clear();
        Ok(existed)
    }

    /// Rebuild the indices from the filesystem.
    ///
    /// `force` clears both stores first; otherwise records are upserted
    /// in place. Per-skill failures are counted and returned, never
    /// aborting the pass. The pass ends by persisting the graph snapshot
    /// and stamping `last_indexed`.
    pub fn reindex_all(&self, force: bool, cancel: &CancelToken) -> Result<IndexOutcome> {
        cancel.check()?;
        if force {
            self.vector.clear()?;
            self.graph
                .write()
                .map_err(|_| SkilldexError::GraphUnavailable("graph lock poisoned".to_string()))?
                .clear();
        }

        let files = self.discovery.discover_all()?;
        let total_skills = files.len() as u64;
        let mut indexed = 0u64;
        let mut failures = Vec::new();

        for file in &files {
            if let Err(err) = cancel.check() {
                // Partial vector writes stay durable; discard partial
                // graph state by reloading the last snapshot.
                self.reload_snapshot();
                return Err(err);
            }
            match self.discovery.parse(file) {
                Ok(parsed) => {
                    for warning in &parsed.warnings {
                        debug!(skill = %parsed.skill.id, %warning, "parse warning");
                    }
                    match self.index_one(&parsed.skill) {
                        Ok(()) => indexed += 1,
                        Err(err) => failures.push(IndexFailure {
                            path: file.path.clone(),
                            error: err.to_string(),
                        }),
                    }
                }
                Err(err) => failures.push(IndexFailure {
                    path: file.path.clone(),
                    error: err.to_string(),
                }),
            }
        }

        let graph_stats = {
            let graph = self
                .graph
                .read()
                .map_err(|_| SkilldexError::GraphUnavailable("graph lock poisoned".to_string()))?;
            graph.save(&self.snapshot_path)?;
            graph.stats()
        };
        self.graph_loaded.store(true, Ordering::SeqCst);
        self.cache.clear();

        let now = Utc::now();
        *self
            .last_indexed
            .write()
            .expect("last_indexed lock poisoned") = Some(now);

        let stats = IndexStats {
            total_skills,
            indexed,
            failed: failures.len() as u64,
            graph_nodes: graph_stats.skill_nodes as u64
                + graph_stats.tag_nodes as u64
                + graph_stats.category_nodes as u64,
            graph_edges: graph_stats.edges as u64,
            last_indexed: now,
        };
        info!(
            total = stats.total_skills,
            indexed = stats.indexed,
            failed = stats.failed,
            "reindex pass complete"
        );
        Ok(IndexOutcome { stats, failures })
    }

    /// Execute a search request. An empty corpus yields an empty list.
    pub fn search(&self, request: &SearchRequest, cancel: &CancelToken) -> Result<Vec<ScoredSkill>> {
        cancel.check()?;
        if request.top_k == 0 {
            return Ok(Vec::new());
        }
        let key = QueryCache::key(&request.cache_parts());
        if let Some(cached) = self.cache.get(key) {
            return Ok(cached);
        }

        let graph_usable = self.graph_loaded.load(Ordering::SeqCst);
        let mode = match (request.mode, graph_usable) {
            (SearchMode::VectorOnly, _) => SearchMode::VectorOnly,
            (wanted, false) => {
                warn!(?wanted, "graph store unavailable, degrading to vector-only");
                SearchMode::VectorOnly
            }
            (wanted, true) => wanted,
        };

        let results = match mode {
            SearchMode::VectorOnly => {
                let hits = self.vector_phase(request, request.top_k)?;
                hybrid::vector_only(hits, request.top_k)
            }
            SearchMode::GraphOnly => {
                let graph = self.graph.read().map_err(|_| {
                    SkilldexError::GraphUnavailable("graph lock poisoned".to_string())
                })?;
                hybrid::graph_only(&self.search_config, request, &graph)
            }
            SearchMode::Hybrid => {
                let overfetch = request
                    .top_k
                    .saturating_mul(self.search_config.expansion_factor);
                let hits = self.vector_phase(request, overfetch)?;
                cancel.check()?;
                let graph = self.graph.read().map_err(|_| {
                    SkilldexError::GraphUnavailable("graph lock poisoned".to_string())
                })?;
                hybrid::fuse(&self.search_config, request, &hits, Some(&*graph))
            }
        };

        cancel.check()?;
        self.cache.put(key, results.clone());
        Ok(results)
    }

    pub fn cache_stats(&self) -> cache::CacheStats {
        self.cache.stats()
    }

    fn vector_phase(
        &self,
        request: &SearchRequest,
        k: usize,
    ) -> Result<Vec<crate::vector::VectorHit>> {
        let filters = VectorFilters {
            category: request.filters.category,
            repo_ids: request.filters.repo_ids.clone(),
            // Tags are boost hints in fusion, not hard predicates.
            tags: Vec::new(),
        };
        self.vector
            .search(&request.query, k, &filters)
            .map_err(|err| match err {
                SkilldexError::QueryEmbeddingFailed(_) => err,
                other => SkilldexError::RetrievalFailed(other.to_string()),
            })
    }

    fn index_one(&self, skill: &Skill) -> Result<()> {
        self.vector.index(skill)?;
        self.graph
            .write()
            .map_err(|_| SkilldexError::GraphUnavailable("graph lock poisoned".to_string()))?
            .add_skill(skill);
        Ok(())
    }

    fn reload_snapshot(&self) {
        if let Ok(graph) = SkillGraph::load(&self.snapshot_path) {
            if let Ok(mut guard) = self.graph.write() {
                *guard = graph;
            }
        }
    }
}
