//! Skill discovery: locating skill files inside cloned repositories.
//!
//! Walks every repository clone under the shared `repos/` subtree for
//! files whose basename matches the configured skill filename. Results
//! are returned in a stable order (repo id, then relative path) so index
//! rebuilds are reproducible.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::ParserConfig;
use crate::error::{ParseError, Result, SkilldexError};
use crate::skill::parser::SkillParser;
use crate::skill::types::ParsedSkill;

/// A skill file located on disk, not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscoveredFile {
    pub repo_id: String,
    pub path: PathBuf,
    pub repo_root: PathBuf,
}

pub struct SkillDiscovery {
    repos_dir: PathBuf,
    skill_filename: String,
    parser: SkillParser,
}

impl SkillDiscovery {
    pub fn new(repos_dir: impl Into<PathBuf>, config: &ParserConfig) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            skill_filename: config.skill_filename.clone(),
            parser: SkillParser::new(config),
        }
    }

    /// All skill files across all repository clones, sorted by repo id
    /// then relative path.
    pub fn discover_all(&self) -> Result<Vec<DiscoveredFile>> {
        let mut files = Vec::new();
        if !self.repos_dir.exists() {
            return Ok(files);
        }
        let mut repo_ids: Vec<String> = std::fs::read_dir(&self.repos_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        repo_ids.sort();
        for repo_id in repo_ids {
            files.extend(self.discover_repo(&repo_id)?);
        }
        Ok(files)
    }

    /// Skill files inside one repository clone, sorted by relative path.
    pub fn discover_repo(&self, repo_id: &str) -> Result<Vec<DiscoveredFile>> {
        let repo_root = self.repos_dir.join(repo_id);
        let mut files: Vec<DiscoveredFile> =
            find_skill_files(&repo_root, &self.skill_filename)
                .into_iter()
                .map(|path| DiscoveredFile {
                    repo_id: repo_id.to_string(),
                    path,
                    repo_root: repo_root.clone(),
                })
                .collect();
        files.sort();
        Ok(files)
    }

    /// Parse a discovered file.
    pub fn parse(&self, file: &DiscoveredFile) -> std::result::Result<ParsedSkill, ParseError> {
        self.parser.parse(&file.path, &file.repo_id, &file.repo_root)
    }

    /// Locate and parse the skill with the given identifier.
    ///
    /// The identifier encodes the location (`{repo_id}/{relative_dir}`),
    /// so no index lookup is needed; a missing or invalid file maps to
    /// `UnknownSkillId`.
    pub fn find_by_id(&self, skill_id: &str) -> Result<ParsedSkill> {
        let (repo_id, rel_dir) = match skill_id.split_once('/') {
            Some((repo, rest)) => (repo, rest),
            None => (skill_id, ""),
        };
        let repo_root = self.repos_dir.join(repo_id);
        let path = if rel_dir.is_empty() {
            repo_root.join(&self.skill_filename)
        } else {
            repo_root.join(rel_dir).join(&self.skill_filename)
        };
        if !path.is_file() {
            return Err(SkilldexError::UnknownSkillId(skill_id.to_string()));
        }
        self.parser
            .parse(&path, repo_id, &repo_root)
            .map_err(|_| SkilldexError::UnknownSkillId(skill_id.to_string()))
    }
}

/// Recursively collect files under `root` whose basename matches
/// `skill_filename`, skipping `.git`. Shared with the repository manager
/// for post-sync skill counting.
pub fn find_skill_files(root: &Path, skill_filename: &str) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy() == skill_filename)
        .map(|entry| entry.into_path())
        .collect()
}
