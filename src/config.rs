use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkilldexError};

/// Top-level configuration for the discovery engine.
///
/// Read once at startup from a TOML file plus `SKILLDEX_*` environment
/// overrides; runtime mutation is explicit (no file watching).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of all persisted state (clones, vector files, snapshots, metadata).
    pub data_root: PathBuf,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

impl Config {
    /// Configuration rooted at `data_root` with defaults everywhere else.
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            parser: ParserConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            update: UpdateConfig::default(),
            repositories: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| SkilldexError::Config(format!("read config {}: {err}", path.display())))?;
        let mut config: Self = toml::from_str(&raw)
            .map_err(|err| SkilldexError::Config(format!("parse config {}: {err}", path.display())))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_string("SKILLDEX_DATA_ROOT") {
            self.data_root = PathBuf::from(value);
        }
        if let Some(value) = env_string("SKILLDEX_SKILL_FILENAME") {
            self.parser.skill_filename = value;
        }
        if let Some(value) = env_bool("SKILLDEX_STRICT_NAMES") {
            self.parser.strict_names = value;
        }
        if let Some(value) = env_usize("SKILLDEX_EMBEDDING_DIM")? {
            self.embedding.dim = value;
        }
        if let Some(value) = env_f32("SKILLDEX_VECTOR_WEIGHT")? {
            self.search.vector_weight = value;
        }
        if let Some(value) = env_f32("SKILLDEX_GRAPH_WEIGHT")? {
            self.search.graph_weight = value;
        }
        if let Some(value) = env_usize("SKILLDEX_EXPANSION_FACTOR")? {
            self.search.expansion_factor = value;
        }
        if let Some(value) = env_u64("SKILLDEX_AUTO_UPDATE_MAX_AGE_HOURS")? {
            self.update.auto_update_max_age_hours = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.parser.skill_filename.trim().is_empty() {
            return Err(SkilldexError::Config(
                "skill_filename must be non-empty".to_string(),
            ));
        }
        if self.embedding.dim == 0 {
            return Err(SkilldexError::Config(
                "embedding.dim must be positive".to_string(),
            ));
        }
        if self.search.vector_weight < 0.0 || self.search.graph_weight < 0.0 {
            return Err(SkilldexError::Config(
                "fusion weights must be non-negative".to_string(),
            ));
        }
        if self.search.expansion_factor < 3 {
            return Err(SkilldexError::Config(
                "expansion_factor must be at least 3".to_string(),
            ));
        }
        for repo in &self.repositories {
            if repo.priority > 100 {
                return Err(SkilldexError::Config(format!(
                    "repository priority out of range (0-100): {}",
                    repo.url
                )));
            }
        }
        Ok(())
    }

    // Component subtrees under data_root. No component writes outside its own.

    pub fn repos_dir(&self) -> PathBuf {
        self.data_root.join("repos")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_root.join("vector")
    }

    pub fn graph_snapshot_path(&self) -> PathBuf {
        self.data_root.join("graph.snapshot")
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.data_root.join("metadata.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// File basename recognized as a skill document.
    #[serde(default = "default_skill_filename")]
    pub skill_filename: String,
    /// Upgrade spec-shape name warnings to hard schema errors.
    #[serde(default)]
    pub strict_names: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            skill_filename: default_skill_filename(),
            strict_names: false,
        }
    }
}

fn default_skill_filename() -> String {
    "SKILL.md".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Vector dimension for a fresh store. Immutable once the store exists.
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dim: default_embedding_dim(),
        }
    }
}

fn default_embedding_dim() -> usize {
    384
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_graph_weight")]
    pub graph_weight: f32,
    /// Vector over-fetch multiplier in hybrid mode.
    #[serde(default = "default_expansion_factor")]
    pub expansion_factor: usize,
    #[serde(default = "default_tag_boost")]
    pub tag_boost: f32,
    #[serde(default = "default_category_boost")]
    pub category_boost: f32,
    #[serde(default = "default_neighborhood_boost")]
    pub neighborhood_boost: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            graph_weight: default_graph_weight(),
            expansion_factor: default_expansion_factor(),
            tag_boost: default_tag_boost(),
            category_boost: default_category_boost(),
            neighborhood_boost: default_neighborhood_boost(),
        }
    }
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_graph_weight() -> f32 {
    0.3
}

fn default_expansion_factor() -> usize {
    5
}

fn default_tag_boost() -> f32 {
    1.0
}

fn default_category_boost() -> f32 {
    1.0
}

fn default_neighborhood_boost() -> f32 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Staleness threshold for the advisory auto-update check.
    #[serde(default = "default_auto_update_max_age_hours")]
    pub auto_update_max_age_hours: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            auto_update_max_age_hours: default_auto_update_max_age_hours(),
        }
    }
}

fn default_auto_update_max_age_hours() -> u64 {
    24
}

/// A declared source repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub url: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub auto_update: bool,
}

fn default_priority() -> u8 {
    50
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    env_string(key)
        .map(|v| {
            v.parse()
                .map_err(|_| SkilldexError::Config(format!("{key} must be an integer, got {v:?}")))
        })
        .transpose()
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    env_string(key)
        .map(|v| {
            v.parse()
                .map_err(|_| SkilldexError::Config(format!("{key} must be an integer, got {v:?}")))
        })
        .transpose()
}

fn env_f32(key: &str) -> Result<Option<f32>> {
    env_string(key)
        .map(|v| {
            v.parse()
                .map_err(|_| SkilldexError::Config(format!("{key} must be a number, got {v:?}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::with_data_root("/tmp/dex");
        assert_eq!(config.parser.skill_filename, "SKILL.md");
        assert_eq!(config.embedding.dim, 384);
        assert_eq!(config.search.expansion_factor, 5);
        assert!((config.search.vector_weight + config.search.graph_weight - 1.0).abs() < 1e-6);
        assert_eq!(config.update.auto_update_max_age_hours, 24);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn subtree_paths_nest_under_data_root() {
        let config = Config::with_data_root("/srv/dex");
        assert_eq!(config.repos_dir(), PathBuf::from("/srv/dex/repos"));
        assert_eq!(config.vector_dir(), PathBuf::from("/srv/dex/vector"));
        assert_eq!(
            config.graph_snapshot_path(),
            PathBuf::from("/srv/dex/graph.snapshot")
        );
        assert_eq!(
            config.metadata_db_path(),
            PathBuf::from("/srv/dex/metadata.db")
        );
    }

    #[test]
    fn parses_minimal_toml() {
        let raw = r#"
            data_root = "/var/lib/skilldex"

            [[repositories]]
            url = "https://github.com/example/skills.git"
            priority = 80
            license = "MIT"
            auto_update = true
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/var/lib/skilldex"));
        assert_eq!(config.repositories.len(), 1);
        assert_eq!(config.repositories[0].priority, 80);
        assert!(config.repositories[0].auto_update);
    }

    #[test]
    fn repository_defaults_apply() {
        let raw = r#"
            data_root = "/tmp/d"

            [[repositories]]
            url = "https://github.com/example/skills.git"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.repositories[0].priority, 50);
        assert!(config.repositories[0].license.is_none());
        assert!(!config.repositories[0].auto_update);
    }

    #[test]
    fn rejects_zero_dimension() {
        let mut config = Config::with_data_root("/tmp/d");
        config.embedding.dim = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_small_expansion_factor() {
        let mut config = Config::with_data_root("/tmp/d");
        config.search.expansion_factor = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_weights() {
        let mut config = Config::with_data_root("/tmp/d");
        config.search.graph_weight = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let mut config = Config::with_data_root("/tmp/d");
        config.repositories.push(RepositoryConfig {
            url: "https://github.com/a/b.git".to_string(),
            priority: 101,
            license: None,
            auto_update: false,
        });
        assert!(config.validate().is_err());
    }
}
