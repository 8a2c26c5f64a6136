use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of skill categories.
///
/// Unknown category strings parse to [`SkillCategory::Other`] so a single
/// misfiled skill never poisons an index pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum SkillCategory {
    Testing,
    Debugging,
    Refactoring,
    Architecture,
    Data,
    Security,
    Devops,
    Toolchain,
    #[default]
    General,
    Other,
}

impl SkillCategory {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "testing" => Self::Testing,
            "debugging" => Self::Debugging,
            "refactoring" => Self::Refactoring,
            "architecture" => Self::Architecture,
            "data" => Self::Data,
            "security" => Self::Security,
            "devops" => Self::Devops,
            "toolchain" => Self::Toolchain,
            "general" => Self::General,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Testing => "testing",
            Self::Debugging => "debugging",
            Self::Refactoring => "refactoring",
            Self::Architecture => "architecture",
            Self::Data => "data",
            Self::Security => "security",
            Self::Devops => "devops",
            Self::Toolchain => "toolchain",
            Self::General => "general",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for SkillCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated skill document.
///
/// Created by the parser, mutated only by re-parse, discarded when the
/// backing file disappears after a sync. The identifier is
/// `{repo_id}/{relative_path_without_filename}` and unique corpus-wide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Full markdown body.
    pub instructions: String,
    pub category: SkillCategory,
    pub tags: BTreeSet<String>,
    /// Identifiers of skills this one declares a dependency on.
    pub dependencies: BTreeSet<String>,
    pub examples: Vec<String>,
    pub file_path: PathBuf,
    pub repo_id: String,
    pub version: Option<String>,
    pub author: Option<String>,
    /// Derived from file modification time, UTC.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Skill {
    /// The fixed concatenation fed to the embedder: name, description,
    /// category, space-joined tags, and the first 1,000 characters of the
    /// body, newline-separated. Front-loaded descriptive fields dominate
    /// similarity; the body is clipped to bound embedding cost.
    pub fn embeddable_text(&self) -> String {
        let tags = self
            .tags
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        let body: String = self.instructions.chars().take(1_000).collect();
        format!(
            "{}\n{}\n{}\n{}\n{}",
            self.name, self.description, self.category, tags, body
        )
    }

    /// Tags as the comma-delimited string stored in vector metadata.
    pub fn tags_csv(&self) -> String {
        self.tags
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Non-fatal findings attached to a successfully parsed skill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    /// Front-matter above 400 chars or body above 20,000 chars.
    ProgressiveDisclosure { field: &'static str, size: usize },
    /// Name does not match the lowercase-hyphen spec shape (lenient mode).
    SpecShape { message: String },
    /// Potential secret or injection pattern found by the security scan.
    Security { pattern: String, context: String },
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProgressiveDisclosure { field, size } => {
                write!(f, "{field} is large ({size} chars); consider splitting")
            }
            Self::SpecShape { message } => write!(f, "spec shape: {message}"),
            Self::Security { pattern, context } => {
                write!(f, "possible {pattern} in {context}")
            }
        }
    }
}

/// Parser output: the validated skill plus its non-fatal warnings.
#[derive(Debug, Clone)]
pub struct ParsedSkill {
    pub skill: Skill,
    pub warnings: Vec<ParseWarning>,
}

/// Which retrieval component produced a score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchProvenance {
    Vector,
    Graph,
    Hybrid,
}

/// A retrieval hit: skill id, resolved display metadata, and a score in [0,1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSkill {
    pub skill_id: String,
    pub name: String,
    pub category: SkillCategory,
    pub repo_id: String,
    pub score: f32,
    pub provenance: MatchProvenance,
}
