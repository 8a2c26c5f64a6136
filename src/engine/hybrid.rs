//! Hybrid fusion: dense-vector similarity combined with graph boosts.
//!
//! The vector phase over-fetches candidates, the graph phase computes a
//! per-candidate boost from tag hints, category match, and the
//! neighborhood of the top-ranked candidate, and fusion blends the two
//! score spaces with configurable weights.

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use crate::config::SearchConfig;
use crate::graph::SkillGraph;
use crate::skill::types::{MatchProvenance, ScoredSkill, SkillCategory};
use crate::vector::VectorHit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SearchMode {
    VectorOnly,
    GraphOnly,
    #[default]
    Hybrid,
}

/// Conjunctive filters plus tag hints.
///
/// `category` and `repo_ids` are hard predicates applied in the vector
/// phase. `tags` are hints: they drive the tag boost in hybrid mode
/// instead of excluding candidates, so an un-tagged but semantically
/// close skill can still surface (ranked lower).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub category: Option<SkillCategory>,
    pub repo_ids: Vec<String>,
    pub tags: Vec<String>,
}

impl Hash for SearchFilters {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.category.map(|c| c.as_str()).hash(state);
        self.repo_ids.hash(state);
        self.tags.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    pub filters: SearchFilters,
    pub mode: SearchMode,
    /// Override the configured fusion weights for this request.
    pub vector_weight: Option<f32>,
    pub graph_weight: Option<f32>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
            filters: SearchFilters::default(),
            mode: SearchMode::Hybrid,
            vector_weight: None,
            graph_weight: None,
        }
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub(crate) fn cache_parts(&self) -> impl Hash + '_ {
        (
            self.query.as_str(),
            self.top_k,
            &self.filters,
            self.mode,
            self.vector_weight.map(f32::to_bits),
            self.graph_weight.map(f32::to_bits),
        )
    }
}

/// Per-candidate graph signal, clamped to [0, 1].
fn graph_score(
    config: &SearchConfig,
    skill_tags: &BTreeSet<String>,
    skill_category: SkillCategory,
    tag_hints: &[String],
    category_filter: Option<SkillCategory>,
    in_neighborhood: bool,
) -> f32 {
    let tag_fraction = if tag_hints.is_empty() {
        0.0
    } else {
        let matched = tag_hints
            .iter()
            .filter(|hint| skill_tags.contains(hint.to_lowercase().as_str()))
            .count();
        matched as f32 / tag_hints.len().max(1) as f32
    };
    let category_match = category_filter.is_some_and(|wanted| wanted == skill_category);

    let mut score = config.tag_boost * tag_fraction;
    if category_match {
        score += config.category_boost;
    }
    if in_neighborhood {
        score += config.neighborhood_boost;
    }
    score.clamp(0.0, 1.0)
}

/// Fuse vector hits with graph boosts into the final ranking.
///
/// Ties break by raw similarity, then by skill id ascending, so rankings
/// are stable across runs.
pub fn fuse(
    config: &SearchConfig,
    request: &SearchRequest,
    hits: &[VectorHit],
    graph: Option<&SkillGraph>,
) -> Vec<ScoredSkill> {
    let vector_weight = request.vector_weight.unwrap_or(config.vector_weight);
    let graph_weight = request.graph_weight.unwrap_or(config.graph_weight);
    // A query with neither tag hints nor a category carries no graph
    // signal of its own; weighting similarity down against an empty leg
    // would just depress every score. Similarity passes through at full
    // weight and only the neighborhood boost applies on top.
    let query_has_graph_signal =
        !request.filters.tags.is_empty() || request.filters.category.is_some();

    // Neighborhood seed: the top-ranked vector candidate.
    let neighborhood: BTreeSet<String> = match (graph, hits.first()) {
        (Some(graph), Some(top)) => graph
            .neighbors(&top.record.skill_id, 1)
            .into_keys()
            .collect(),
        _ => BTreeSet::new(),
    };

    let mut fused: Vec<(ScoredSkill, f32)> = hits
        .iter()
        .map(|hit| {
            let boost = graph_score(
                config,
                &hit.record.tags,
                hit.record.category,
                &request.filters.tags,
                request.filters.category,
                neighborhood.contains(&hit.record.skill_id),
            );
            let final_score = if query_has_graph_signal {
                (vector_weight * hit.score + graph_weight * boost).clamp(0.0, 1.0)
            } else {
                (hit.score + graph_weight * boost).clamp(0.0, 1.0)
            };
            (
                ScoredSkill {
                    skill_id: hit.record.skill_id.clone(),
                    name: hit.record.name.clone(),
                    category: hit.record.category,
                    repo_id: hit.record.repo_id.clone(),
                    score: final_score,
                    provenance: MatchProvenance::Hybrid,
                },
                hit.score,
            )
        })
        .collect();

    fused.sort_by(|(a, sim_a), (b, sim_b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                sim_b
                    .partial_cmp(sim_a)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.skill_id.cmp(&b.skill_id))
    });
    fused.truncate(request.top_k);
    fused.into_iter().map(|(scored, _)| scored).collect()
}

/// Vector-only ranking: the vector phase verbatim.
pub fn vector_only(hits: Vec<VectorHit>, top_k: usize) -> Vec<ScoredSkill> {
    hits.into_iter()
        .take(top_k)
        .map(|hit| ScoredSkill {
            skill_id: hit.record.skill_id,
            name: hit.record.name,
            category: hit.record.category,
            repo_id: hit.record.repo_id,
            score: hit.score,
            provenance: MatchProvenance::Vector,
        })
        .collect()
}

/// Graph-only ranking: the query is interpreted as a tag/category
/// bag-of-words; candidates are the union of the HasTag and InCategory
/// preimages, scored by the graph signal alone.
pub fn graph_only(
    config: &SearchConfig,
    request: &SearchRequest,
    graph: &SkillGraph,
) -> Vec<ScoredSkill> {
    let tokens: Vec<String> = request
        .query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut candidates: BTreeSet<String> = BTreeSet::new();
    for token in &tokens {
        candidates.extend(graph.skills_with_tag(token));
        candidates.extend(graph.skills_in_category(token));
    }

    let mut scored: Vec<ScoredSkill> = candidates
        .into_iter()
        .filter_map(|id| {
            let node = graph.skill_node(&id)?;
            if node.placeholder {
                return None;
            }
            let category = graph
                .category_of(&id)
                .map(SkillCategory::parse)
                .unwrap_or_default();
            if let Some(wanted) = request.filters.category {
                if wanted != category {
                    return None;
                }
            }
            if !request.filters.repo_ids.is_empty()
                && !request.filters.repo_ids.contains(&node.repo_id)
            {
                return None;
            }
            let tags = graph.tags_of(&id);
            let score = graph_score(
                config,
                &tags,
                category,
                &tokens,
                Some(category).filter(|c| tokens.contains(&c.as_str().to_string())),
                false,
            );
            Some(ScoredSkill {
                skill_id: id,
                name: node.name.clone(),
                category,
                repo_id: node.repo_id.clone(),
                score,
                provenance: MatchProvenance::Graph,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.skill_id.cmp(&b.skill_id))
    });
    scored.truncate(request.top_k);
    scored
}
