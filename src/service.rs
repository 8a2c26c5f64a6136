//! `SkillService`: the facade consumed by the tool-invocation server.
//!
//! Wires the metadata store, repository manager, and indexing engine
//! together and exposes the upward operations: search, recommend,
//! list/get, stats, reindex, repository lifecycle, and the advisory
//! auto-update check. All operations are synchronous from the caller's
//! view; the core never pushes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::engine::{
    IndexOutcome, IndexingEngine, SearchFilters, SearchMode, SearchRequest,
};
use crate::error::{Result, SkilldexError};
use crate::graph::GraphStats;
use crate::repos::{AddOptions, ProgressReporter, RepositoryManager};
use crate::skill::discovery::SkillDiscovery;
use crate::skill::types::{ParsedSkill, ScoredSkill, SkillCategory};
use crate::storage::{MetadataStore, Repository};
use crate::vector::{Embedder, HashEmbedder, StoredEmbedding, VectorFilters, VectorStore, VectorStoreStats};

/// Aggregate statistics reported upward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub repositories: u64,
    pub skills: u64,
    pub vector_records: u64,
    pub vector_disk_bytes: u64,
    pub graph: GraphStats,
    pub last_indexed: Option<DateTime<Utc>>,
}

pub struct SkillService {
    config: Config,
    metadata: Arc<MetadataStore>,
    repos: RepositoryManager,
    engine: IndexingEngine,
}

impl SkillService {
    /// Open the service with the default deterministic hash embedder.
    pub fn open(config: Config) -> Result<Self> {
        let dim = config.embedding.dim;
        Self::open_with_embedder(config, Box::new(HashEmbedder::new(dim)))
    }

    /// Open with a caller-supplied embedder (must have a stable dimension).
    pub fn open_with_embedder(config: Config, embedder: Box<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_root)?;

        let metadata = Arc::new(MetadataStore::open(&config.metadata_db_path())?);
        let repos = RepositoryManager::new(
            config.repos_dir(),
            Arc::clone(&metadata),
            config.parser.skill_filename.clone(),
        );
        let vector = VectorStore::open(&config.vector_dir(), embedder)?;
        let discovery = SkillDiscovery::new(config.repos_dir(), &config.parser);
        let engine = IndexingEngine::new(
            vector,
            discovery,
            config.graph_snapshot_path(),
            config.search.clone(),
        );

        Ok(Self {
            config,
            metadata,
            repos,
            engine,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -- retrieval ----------------------------------------------------------

    pub fn search(&self, request: &SearchRequest, cancel: &CancelToken) -> Result<Vec<ScoredSkill>> {
        self.engine.search(request, cancel)
    }

    /// Search with filters derived from external toolchain context: tokens
    /// naming a category become a category filter, the rest become tag
    /// hints, and the whole bag is the query text.
    pub fn recommend(
        &self,
        context_tokens: &[String],
        top_k: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<ScoredSkill>> {
        let mut filters = SearchFilters::default();
        for token in context_tokens {
            let category = SkillCategory::parse(token);
            if category != SkillCategory::Other && filters.category.is_none() {
                filters.category = Some(category);
            } else {
                filters.tags.push(token.to_lowercase());
            }
        }
        let request = SearchRequest::new(context_tokens.join(" "), top_k)
            .with_mode(SearchMode::Hybrid)
            .with_filters(filters);
        self.engine.search(&request, cancel)
    }

    /// Indexed skill records matching the filters, id order.
    pub fn list_skills(&self, filters: &VectorFilters) -> Result<Vec<StoredEmbedding>> {
        self.engine.vector_store().list(filters)
    }

    /// Re-parse the identified skill file from disk, so callers always
    /// see the full instructions body.
    pub fn get_skill(&self, skill_id: &str) -> Result<ParsedSkill> {
        self.engine.discovery().find_by_id(skill_id)
    }

    pub fn stats(&self) -> Result<ServiceStats> {
        let vector_stats: VectorStoreStats = self.engine.vector_store().stats()?;
        Ok(ServiceStats {
            repositories: self.metadata.repo_count()?,
            skills: vector_stats.records,
            vector_records: vector_stats.records,
            vector_disk_bytes: vector_stats.disk_bytes,
            graph: self.engine.graph_stats(),
            last_indexed: self.engine.last_indexed(),
        })
    }

    // -- indexing -----------------------------------------------------------

    pub fn reindex(&self, force: bool, cancel: &CancelToken) -> Result<IndexOutcome> {
        self.engine.reindex_all(force, cancel)
    }

    // -- repository lifecycle ----------------------------------------------

    pub fn repo_add(
        &self,
        url: &str,
        options: AddOptions,
        cancel: &CancelToken,
    ) -> Result<Repository> {
        self.repos.add(url, options, cancel)
    }

    pub fn repo_add_with_progress(
        &self,
        url: &str,
        options: AddOptions,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<Repository> {
        self.repos.add_with_progress(url, options, progress, cancel)
    }

    pub fn repo_update(&self, id: &str, cancel: &CancelToken) -> Result<Repository> {
        self.repos.update(id, cancel)
    }

    pub fn repo_update_with_progress(
        &self,
        id: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<Repository> {
        self.repos.update_with_progress(id, progress, cancel)
    }

    pub fn repo_remove(&self, id: &str) -> Result<()> {
        self.repos.remove(id)
    }

    pub fn repo_list(&self) -> Result<Vec<Repository>> {
        self.repos.list()
    }

    /// Register every declared repository that is not present yet.
    /// Failures are isolated per repository and reported, never aborting
    /// the loop.
    pub fn add_declared_repositories(
        &self,
        cancel: &CancelToken,
    ) -> Vec<(String, Result<Repository>)> {
        let declared = self.config.repositories.clone();
        let mut results = Vec::new();
        for repo in declared {
            if cancel.is_cancelled() {
                results.push((repo.url.clone(), Err(SkilldexError::Cancelled)));
                continue;
            }
            let options = AddOptions {
                priority: repo.priority,
                license: repo.license.clone(),
                auto_update: repo.auto_update,
            };
            let outcome = match self.repos.add(&repo.url, options, cancel) {
                Err(SkilldexError::RepoExists(_)) => continue,
                other => other,
            };
            if let Err(err) = &outcome {
                warn!(url = %repo.url, error = %err, "declared repository add failed");
            }
            results.push((repo.url, outcome));
        }
        results
    }

    /// Update every registered repository serially. A failure on one
    /// repository does not abort the loop.
    pub fn update_all(&self, cancel: &CancelToken) -> Vec<(String, Result<Repository>)> {
        let repos = match self.repos.list() {
            Ok(repos) => repos,
            Err(err) => return vec![("*".to_string(), Err(err))],
        };
        repos
            .into_iter()
            .map(|repo| {
                let outcome = self.repos.update(&repo.id, cancel);
                if let Err(err) = &outcome {
                    warn!(id = %repo.id, error = %err, "repository update failed");
                }
                (repo.id, outcome)
            })
            .collect()
    }

    /// Advisory: ids of auto-update repositories staler than `max_age`.
    /// Acting on the list is the hosting server's decision.
    pub fn check_auto_updates(&self, max_age: Option<Duration>) -> Result<Vec<String>> {
        let max_age = max_age.unwrap_or_else(|| {
            Duration::hours(self.config.update.auto_update_max_age_hours as i64)
        });
        let stale = self
            .repos
            .list()?
            .into_iter()
            .filter(|repo| repo.auto_update && RepositoryManager::should_update(repo, max_age))
            .map(|repo| repo.id)
            .collect();
        Ok(stale)
    }
}
