//! Typed relationship graph over skills, tags, and categories.
//!
//! Nodes are skills, tags, and categories; edges are `HasTag`,
//! `InCategory`, and `DependsOn`. `SharesTag` is a derived projection of
//! the tag bipartite structure and is never stored. The graph is
//! in-memory and not thread-safe by construction; the indexing engine
//! serializes writes. Durability is a whole-graph snapshot: internals are
//! B-tree maps so identical corpora serialize to identical bytes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SkilldexError};
use crate::skill::types::Skill;

/// Attributes carried by a skill node. Placeholder nodes stand in for
/// declared dependency targets that have not been indexed (yet).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillNode {
    pub name: String,
    pub repo_id: String,
    pub placeholder: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub skill_nodes: usize,
    pub tag_nodes: usize,
    pub category_nodes: usize,
    pub edges: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SkillGraph {
    skills: BTreeMap<String, SkillNode>,
    // HasTag, kept with its preimage so tag lookups stay O(log n).
    skill_tags: BTreeMap<String, BTreeSet<String>>,
    tag_skills: BTreeMap<String, BTreeSet<String>>,
    // InCategory.
    skill_category: BTreeMap<String, String>,
    category_skills: BTreeMap<String, BTreeSet<String>>,
    // DependsOn, forward and reverse.
    depends_on: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl SkillGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a skill and its edges. Re-adding replaces the skill's
    /// previous tag, category, and dependency edges. Self-dependencies
    /// are rejected (skipped with a warning).
    pub fn add_skill(&mut self, skill: &Skill) {
        self.detach_edges(&skill.id);
        self.skills.insert(
            skill.id.clone(),
            SkillNode {
                name: skill.name.clone(),
                repo_id: skill.repo_id.clone(),
                placeholder: false,
            },
        );

        for tag in &skill.tags {
            self.skill_tags
                .entry(skill.id.clone())
                .or_default()
                .insert(tag.clone());
            self.tag_skills
                .entry(tag.clone())
                .or_default()
                .insert(skill.id.clone());
        }

        let category = skill.category.as_str().to_string();
        self.skill_category.insert(skill.id.clone(), category.clone());
        self.category_skills
            .entry(category)
            .or_default()
            .insert(skill.id.clone());

        for target in &skill.dependencies {
            if target == &skill.id {
                warn!(skill = %skill.id, "skipping self-dependency");
                continue;
            }
            self.skills.entry(target.clone()).or_insert_with(|| SkillNode {
                name: target.clone(),
                repo_id: target.split('/').next().unwrap_or(target).to_string(),
                placeholder: true,
            });
            self.depends_on
                .entry(skill.id.clone())
                .or_default()
                .insert(target.clone());
            self.dependents
                .entry(target.clone())
                .or_default()
                .insert(skill.id.clone());
        }
    }

    /// Remove a skill. If other skills still depend on it, the node is
    /// degraded to a placeholder so no edge is left dangling.
    pub fn remove_skill(&mut self, id: &str) -> bool {
        if !self.skills.contains_key(id) {
            return false;
        }
        self.detach_edges(id);
        let has_dependents = self
            .dependents
            .get(id)
            .is_some_and(|deps| !deps.is_empty());
        if has_dependents {
            if let Some(node) = self.skills.get_mut(id) {
                node.placeholder = true;
            }
        } else {
            self.skills.remove(id);
            self.dependents.remove(id);
        }
        true
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.skills.contains_key(id)
    }

    pub fn skill_node(&self, id: &str) -> Option<&SkillNode> {
        self.skills.get(id)
    }

    pub fn tags_of(&self, id: &str) -> BTreeSet<String> {
        self.skill_tags.get(id).cloned().unwrap_or_default()
    }

    pub fn category_of(&self, id: &str) -> Option<&str> {
        self.skill_category.get(id).map(String::as_str)
    }

    /// Skills carrying `tag` (the HasTag preimage).
    pub fn skills_with_tag(&self, tag: &str) -> BTreeSet<String> {
        self.tag_skills.get(tag).cloned().unwrap_or_default()
    }

    /// Skills in `category` (the InCategory preimage).
    pub fn skills_in_category(&self, category: &str) -> BTreeSet<String> {
        self.category_skills.get(category).cloned().unwrap_or_default()
    }

    /// Breadth-first neighborhood of a skill, up to `depth` skill-to-skill
    /// hops. Two skills are adjacent when they share a tag, share a
    /// category, or either depends on the other. Returns other skill ids
    /// with their shortest-path distance (the origin is excluded).
    pub fn neighbors(&self, id: &str, depth: usize) -> BTreeMap<String, usize> {
        let mut distances = BTreeMap::new();
        if depth == 0 || !self.skills.contains_key(id) {
            return distances;
        }
        let mut queue = VecDeque::new();
        queue.push_back((id.to_string(), 0usize));
        let mut seen = BTreeSet::new();
        seen.insert(id.to_string());

        while let Some((current, dist)) = queue.pop_front() {
            if dist == depth {
                continue;
            }
            for next in self.adjacent(&current) {
                if seen.insert(next.clone()) {
                    distances.insert(next.clone(), dist + 1);
                    queue.push_back((next, dist + 1));
                }
            }
        }
        distances
    }

    fn adjacent(&self, id: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(tags) = self.skill_tags.get(id) {
            for tag in tags {
                if let Some(peers) = self.tag_skills.get(tag) {
                    out.extend(peers.iter().cloned());
                }
            }
        }
        if let Some(category) = self.skill_category.get(id) {
            if let Some(peers) = self.category_skills.get(category) {
                out.extend(peers.iter().cloned());
            }
        }
        if let Some(targets) = self.depends_on.get(id) {
            out.extend(targets.iter().cloned());
        }
        if let Some(sources) = self.dependents.get(id) {
            out.extend(sources.iter().cloned());
        }
        out.remove(id);
        out
    }

    /// SharesTag projection: every other skill sharing at least
    /// `min_shared` tags with `id`, as `(other_id, shared_count)` sorted
    /// by count descending, ties by id ascending.
    pub fn related_by_tags(&self, id: &str, min_shared: usize) -> Vec<(String, usize)> {
        let Some(own_tags) = self.skill_tags.get(id) else {
            return Vec::new();
        };
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for tag in own_tags {
            if let Some(peers) = self.tag_skills.get(tag) {
                for peer in peers {
                    if peer != id {
                        *counts.entry(peer.clone()).or_insert(0) += 1;
                    }
                }
            }
        }
        let mut related: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_shared.max(1))
            .collect();
        related.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        related
    }

    /// Dependency targets of a skill, direct or transitive (BFS order
    /// flattened into a sorted set).
    pub fn dependencies_of(&self, id: &str, transitive: bool) -> BTreeSet<String> {
        let direct = self.depends_on.get(id).cloned().unwrap_or_default();
        if !transitive {
            return direct;
        }
        let mut all = BTreeSet::new();
        let mut queue: VecDeque<String> = direct.into_iter().collect();
        while let Some(current) = queue.pop_front() {
            if !all.insert(current.clone()) {
                continue;
            }
            if let Some(next) = self.depends_on.get(&current) {
                for target in next {
                    if !all.contains(target) {
                        queue.push_back(target.clone());
                    }
                }
            }
        }
        all.remove(id);
        all
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            skill_nodes: self.skills.len(),
            tag_nodes: self.tag_skills.len(),
            category_nodes: self.category_skills.len(),
            edges: self.edge_count(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.skills.len() + self.tag_skills.len() + self.category_skills.len()
    }

    pub fn edge_count(&self) -> usize {
        let has_tag: usize = self.skill_tags.values().map(BTreeSet::len).sum();
        let in_category = self.skill_category.len();
        let depends: usize = self.depends_on.values().map(BTreeSet::len).sum();
        has_tag + in_category + depends
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Serialize the whole graph to `path`. The write goes through a
    /// sibling temp file and an atomic rename so a crash never leaves a
    /// torn snapshot.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(self)?;
        let tmp = path.with_extension("snapshot.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Restore a snapshot written by [`SkillGraph::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|err| {
            SkilldexError::GraphUnavailable(format!("read snapshot {}: {err}", path.display()))
        })?;
        let graph = serde_json::from_slice(&raw)
            .map_err(|err| SkilldexError::Corrupt(format!("graph snapshot: {err}")))?;
        Ok(graph)
    }

    fn detach_edges(&mut self, id: &str) {
        if let Some(tags) = self.skill_tags.remove(id) {
            for tag in tags {
                if let Some(peers) = self.tag_skills.get_mut(&tag) {
                    peers.remove(id);
                    if peers.is_empty() {
                        self.tag_skills.remove(&tag);
                    }
                }
            }
        }
        if let Some(category) = self.skill_category.remove(id) {
            if let Some(peers) = self.category_skills.get_mut(&category) {
                peers.remove(id);
                if peers.is_empty() {
                    self.category_skills.remove(&category);
                }
            }
        }
        if let Some(targets) = self.depends_on.remove(id) {
            for target in targets {
                if let Some(sources) = self.dependents.get_mut(&target) {
                    sources.remove(id);
                    if sources.is_empty() {
                        self.dependents.remove(&target);
                        // An orphaned placeholder has no remaining reason to exist.
                        if self.skills.get(&target).is_some_and(|n| n.placeholder) {
                            self.skills.remove(&target);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use super::*;
    use crate::skill::types::SkillCategory;

    fn make_skill(id: &str, category: SkillCategory, tags: &[&str], deps: &[&str]) -> Skill {
        Skill {
            id: id.to_string(),
            name: id.rsplit('/').next().unwrap_or(id).to_string(),
            description: "Graph fixture skill description.".to_string(),
            instructions: "Long enough instructions for a graph fixture skill.".to_string(),
            category,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            examples: Vec::new(),
            file_path: PathBuf::from(format!("/repos/{id}/SKILL.md")),
            repo_id: id.split('/').next().unwrap_or(id).to_string(),
            version: None,
            author: None,
            updated_at: None,
        }
    }

    #[test]
    fn add_skill_creates_nodes_and_edges() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill(
            "r1/a",
            SkillCategory::Testing,
            &["tdd", "testing"],
            &[],
        ));

        let stats = graph.stats();
        assert_eq!(stats.skill_nodes, 1);
        assert_eq!(stats.tag_nodes, 2);
        assert_eq!(stats.category_nodes, 1);
        // 2 HasTag + 1 InCategory.
        assert_eq!(stats.edges, 3);
    }

    #[test]
    fn dependency_creates_placeholder_node() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill(
            "r1/a",
            SkillCategory::Testing,
            &[],
            &["r1/base"],
        ));

        let node = graph.skill_node("r1/base").unwrap();
        assert!(node.placeholder);
        assert!(graph.dependencies_of("r1/a", false).contains("r1/base"));
    }

    #[test]
    fn placeholder_upgrades_when_skill_indexed() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &[], &["r1/base"]));
        graph.add_skill(&make_skill("r1/base", SkillCategory::General, &[], &[]));
        assert!(!graph.skill_node("r1/base").unwrap().placeholder);
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &[], &["r1/a"]));
        assert!(graph.dependencies_of("r1/a", false).is_empty());
    }

    #[test]
    fn readd_replaces_edges() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &["old"], &[]));
        graph.add_skill(&make_skill("r1/a", SkillCategory::Debugging, &["new"], &[]));

        assert!(graph.skills_with_tag("old").is_empty());
        assert_eq!(graph.skills_with_tag("new").len(), 1);
        assert_eq!(graph.category_of("r1/a"), Some("debugging"));
        assert_eq!(graph.stats().tag_nodes, 1);
    }

    #[test]
    fn neighbors_via_shared_tag() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &["tdd"], &[]));
        graph.add_skill(&make_skill("r1/b", SkillCategory::Debugging, &["tdd"], &[]));
        graph.add_skill(&make_skill("r1/c", SkillCategory::Devops, &["k8s"], &[]));

        let hood = graph.neighbors("r1/a", 1);
        assert_eq!(hood.get("r1/b"), Some(&1));
        assert!(!hood.contains_key("r1/c"));
        assert!(!hood.contains_key("r1/a"));
    }

    #[test]
    fn neighbors_depth_two_reaches_transitively() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &["x"], &[]));
        graph.add_skill(&make_skill("r1/b", SkillCategory::Debugging, &["x", "y"], &[]));
        graph.add_skill(&make_skill("r1/c", SkillCategory::Devops, &["y"], &[]));

        let depth1 = graph.neighbors("r1/a", 1);
        assert!(!depth1.contains_key("r1/c"));

        let depth2 = graph.neighbors("r1/a", 2);
        assert_eq!(depth2.get("r1/b"), Some(&1));
        assert_eq!(depth2.get("r1/c"), Some(&2));
    }

    #[test]
    fn neighbors_follow_dependencies_both_ways() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &[], &["r1/b"]));
        graph.add_skill(&make_skill("r1/b", SkillCategory::Devops, &[], &[]));

        assert!(graph.neighbors("r1/a", 1).contains_key("r1/b"));
        assert!(graph.neighbors("r1/b", 1).contains_key("r1/a"));
    }

    #[test]
    fn neighbors_depth_zero_is_empty() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &["t"], &[]));
        assert!(graph.neighbors("r1/a", 0).is_empty());
    }

    #[test]
    fn related_by_tags_sorts_by_count_then_id() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &["x", "y", "z"], &[]));
        graph.add_skill(&make_skill("r1/two", SkillCategory::Testing, &["x", "y"], &[]));
        graph.add_skill(&make_skill("r1/one-b", SkillCategory::Testing, &["z"], &[]));
        graph.add_skill(&make_skill("r1/one-a", SkillCategory::Testing, &["x"], &[]));

        let related = graph.related_by_tags("r1/a", 1);
        assert_eq!(
            related,
            vec![
                ("r1/two".to_string(), 2),
                ("r1/one-a".to_string(), 1),
                ("r1/one-b".to_string(), 1),
            ]
        );

        let related = graph.related_by_tags("r1/a", 2);
        assert_eq!(related, vec![("r1/two".to_string(), 2)]);
    }

    #[test]
    fn transitive_dependencies_follow_chain() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &[], &["r1/b"]));
        graph.add_skill(&make_skill("r1/b", SkillCategory::Testing, &[], &["r1/c"]));
        graph.add_skill(&make_skill("r1/c", SkillCategory::Testing, &[], &[]));

        let direct = graph.dependencies_of("r1/a", false);
        assert_eq!(direct.len(), 1);

        let transitive = graph.dependencies_of("r1/a", true);
        assert!(transitive.contains("r1/b"));
        assert!(transitive.contains("r1/c"));
    }

    #[test]
    fn transitive_dependencies_tolerate_cycles() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &[], &["r1/b"]));
        graph.add_skill(&make_skill("r1/b", SkillCategory::Testing, &[], &["r1/a"]));

        let transitive = graph.dependencies_of("r1/a", true);
        assert_eq!(transitive, BTreeSet::from(["r1/b".to_string()]));
    }

    #[test]
    fn remove_skill_cleans_edges() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &["t"], &[]));
        graph.add_skill(&make_skill("r1/b", SkillCategory::Testing, &["t"], &[]));

        assert!(graph.remove_skill("r1/a"));
        assert!(!graph.contains("r1/a"));
        assert_eq!(graph.skills_with_tag("t"), BTreeSet::from(["r1/b".to_string()]));
        assert!(!graph.remove_skill("r1/a"));
    }

    #[test]
    fn remove_depended_on_skill_leaves_placeholder() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &[], &["r1/base"]));
        graph.add_skill(&make_skill("r1/base", SkillCategory::General, &[], &[]));

        graph.remove_skill("r1/base");
        let node = graph.skill_node("r1/base").unwrap();
        assert!(node.placeholder);
        assert!(graph.dependencies_of("r1/a", false).contains("r1/base"));
    }

    #[test]
    fn clear_empties_everything() {
        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &["t"], &["r1/b"]));
        graph.clear();
        assert!(graph.is_empty());
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn save_load_roundtrip_restores_exact_graph() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("graph.snapshot");

        let mut graph = SkillGraph::new();
        graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &["x", "y"], &["r1/b"]));
        graph.add_skill(&make_skill("r1/b", SkillCategory::Devops, &["y"], &[]));
        graph.save(&path).unwrap();

        let restored = SkillGraph::load(&path).unwrap();
        assert_eq!(restored, graph);
    }

    #[test]
    fn identical_graphs_serialize_to_identical_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let path_a = tmp.path().join("a.snapshot");
        let path_b = tmp.path().join("b.snapshot");

        let build = || {
            let mut graph = SkillGraph::new();
            // Insertion order differs; snapshots must not.
            graph.add_skill(&make_skill("r1/b", SkillCategory::Devops, &["y"], &[]));
            graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &["x", "y"], &[]));
            graph
        };
        let build_reversed = || {
            let mut graph = SkillGraph::new();
            graph.add_skill(&make_skill("r1/a", SkillCategory::Testing, &["x", "y"], &[]));
            graph.add_skill(&make_skill("r1/b", SkillCategory::Devops, &["y"], &[]));
            graph
        };

        build().save(&path_a).unwrap();
        build_reversed().save(&path_b).unwrap();
        assert_eq!(std::fs::read(&path_a).unwrap(), std::fs::read(&path_b).unwrap());
    }

    #[test]
    fn load_missing_snapshot_is_graph_unavailable() {
        let err = SkillGraph::load(Path::new("/nonexistent/graph.snapshot")).unwrap_err();
        assert!(matches!(err, SkilldexError::GraphUnavailable(_)));
    }

    #[test]
    fn load_corrupt_snapshot_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("graph.snapshot");
        std::fs::write(&path, "not json").unwrap();
        let err = SkillGraph::load(&path).unwrap_err();
        assert!(matches!(err, SkilldexError::Corrupt(_)));
    }
}
