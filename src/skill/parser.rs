//! Skill file parsing and schema validation.
//!
//! A skill file is YAML front-matter between `---` fences followed by a
//! markdown body. The parser produces a validated [`Skill`] or a typed
//! [`ParseError`]; everything downstream carries the strongly-typed record
//! and untyped maps never cross a component boundary.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ParserConfig;
use crate::error::ParseError;
use crate::skill::security::SecurityScanner;
use crate::skill::types::{ParseWarning, ParsedSkill, Skill, SkillCategory};

/// Front-matter fences: `---` at start of file, then the mapping, then `---`.
static FRONT_MATTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\A---\s*\n(.*?)\n---\s*\n?(.*)\z").expect("valid regex"));

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s").expect("valid regex"));

const MIN_DESCRIPTION_CHARS: usize = 10;
const MIN_INSTRUCTIONS_CHARS: usize = 50;
const MAX_NAME_CHARS: usize = 64;
const FRONT_MATTER_SIZE_WARNING: usize = 400;
const BODY_SIZE_WARNING: usize = 20_000;

pub struct SkillParser {
    strict_names: bool,
    scanner: SecurityScanner,
}

impl Default for SkillParser {
    fn default() -> Self {
        Self::new(&ParserConfig::default())
    }
}

impl SkillParser {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            strict_names: config.strict_names,
            scanner: SecurityScanner::default(),
        }
    }

    /// Parse the skill file at `path` belonging to the repository rooted at
    /// `repo_root`. The skill identifier is derived from `repo_id` plus the
    /// file's directory path relative to the repository root.
    pub fn parse(
        &self,
        path: &Path,
        repo_id: &str,
        repo_root: &Path,
    ) -> Result<ParsedSkill, ParseError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| ParseError::malformed(path, format!("read failed: {err}")))?;
        let updated_at = file_mtime_utc(path);
        self.parse_content(&content, path, repo_id, repo_root, updated_at)
    }

    /// Parse from an in-memory string. Pure with respect to time: the only
    /// non-determinism is the mtime, captured once by the caller.
    pub fn parse_content(
        &self,
        content: &str,
        path: &Path,
        repo_id: &str,
        repo_root: &Path,
        updated_at: Option<DateTime<Utc>>,
    ) -> Result<ParsedSkill, ParseError> {
        let captures = FRONT_MATTER_RE
            .captures(content)
            .ok_or_else(|| ParseError::malformed(path, "missing front-matter fences"))?;
        let front_matter = captures.get(1).map_or("", |m| m.as_str());
        let body = captures.get(2).map_or("", |m| m.as_str()).to_string();

        let raw: serde_yaml::Value = serde_yaml::from_str(front_matter)
            .map_err(|err| ParseError::malformed(path, format!("front-matter: {err}")))?;
        let mapping = match raw {
            serde_yaml::Value::Mapping(map) => map,
            _ => return Err(ParseError::malformed(path, "front-matter is not a mapping")),
        };
        let fields = normalize_front_matter(&mapping);

        let mut warnings = Vec::new();

        let name = fields
            .strings
            .get("name")
            .cloned()
            .ok_or_else(|| ParseError::schema(path, "missing required key: name"))?;
        let description = fields
            .strings
            .get("description")
            .cloned()
            .ok_or_else(|| ParseError::schema(path, "missing required key: description"))?;

        if name.trim().is_empty() {
            return Err(ParseError::schema(path, "name must be non-empty"));
        }
        if description.chars().count() < MIN_DESCRIPTION_CHARS {
            return Err(ParseError::schema(
                path,
                format!("description shorter than {MIN_DESCRIPTION_CHARS} chars"),
            ));
        }
        if body.chars().count() < MIN_INSTRUCTIONS_CHARS {
            return Err(ParseError::schema(
                path,
                format!("instructions shorter than {MIN_INSTRUCTIONS_CHARS} chars"),
            ));
        }
        self.check_name_shape(&name, path, &mut warnings)?;

        if front_matter.len() > FRONT_MATTER_SIZE_WARNING {
            warnings.push(ParseWarning::ProgressiveDisclosure {
                field: "front-matter",
                size: front_matter.len(),
            });
        }
        if body.len() > BODY_SIZE_WARNING {
            warnings.push(ParseWarning::ProgressiveDisclosure {
                field: "body",
                size: body.len(),
            });
        }

        let category = fields
            .strings
            .get("category")
            .map(|c| SkillCategory::parse(c))
            .unwrap_or_default();
        let tags: BTreeSet<String> = fields
            .lists
            .get("tags")
            .map(|list| {
                list.iter()
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let dependencies: BTreeSet<String> = fields
            .lists
            .get("dependencies")
            .map(|list| {
                list.iter()
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let id = derive_skill_id(repo_id, path, repo_root);
        let examples = extract_examples(&body);

        let skill = Skill {
            id,
            name,
            description,
            instructions: body,
            category,
            tags,
            dependencies,
            examples,
            file_path: path.to_path_buf(),
            repo_id: repo_id.to_string(),
            version: fields.strings.get("version").cloned(),
            author: fields.strings.get("author").cloned(),
            updated_at,
        };

        warnings.extend(self.scanner.scan(&skill));

        Ok(ParsedSkill { skill, warnings })
    }

    fn check_name_shape(
        &self,
        name: &str,
        path: &Path,
        warnings: &mut Vec<ParseWarning>,
    ) -> Result<(), ParseError> {
        let mut problems = Vec::new();
        if name.chars().count() > MAX_NAME_CHARS {
            problems.push(format!("name longer than {MAX_NAME_CHARS} chars"));
        }
        let normalized = normalize_name(name);
        if !normalized.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            problems.push("name contains characters outside [a-z0-9-]".to_string());
        }
        for problem in problems {
            if self.strict_names {
                return Err(ParseError::schema(path, problem));
            }
            warnings.push(ParseWarning::SpecShape { message: problem });
        }
        Ok(())
    }
}

/// Render a skill back to its file form. Together with the parser this is
/// the identity on the in-memory record, modulo ignored extra keys.
pub fn render_skill(skill: &Skill) -> String {
    let mut out = String::from("---\n");
    out.push_str(&format!("name: {}\n", skill.name));
    out.push_str(&format!("description: {}\n", skill.description));
    out.push_str(&format!("category: {}\n", skill.category));
    if !skill.tags.is_empty() {
        let tags = skill
            .tags
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("tags: [{tags}]\n"));
    }
    if !skill.dependencies.is_empty() {
        let deps = skill
            .dependencies
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("dependencies: [{deps}]\n"));
    }
    if let Some(version) = &skill.version {
        out.push_str(&format!("version: \"{version}\"\n"));
    }
    if let Some(author) = &skill.author {
        out.push_str(&format!("author: {author}\n"));
    }
    out.push_str("---\n");
    out.push_str(&skill.instructions);
    out
}

/// `{repo_id}/{relative_path_without_filename}`, forward slashes, no
/// trailing separator. A skill file at the repository root collapses to
/// the bare repo id.
pub fn derive_skill_id(repo_id: &str, path: &Path, repo_root: &Path) -> String {
    let relative = path.strip_prefix(repo_root).unwrap_or(path);
    let dir = relative.parent().unwrap_or_else(|| Path::new(""));
    let mut rel = dir
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if rel.is_empty() {
        repo_id.to_string()
    } else {
        rel.insert(0, '/');
        format!("{repo_id}{rel}")
    }
}

/// Normalized flat view of front-matter fields.
struct FrontMatterFields {
    strings: BTreeMap<String, String>,
    lists: BTreeMap<String, Vec<String>>,
}

/// Flatten both accepted shapes into one view: the native flat layout and
/// the agentskills.io layout with a nested `metadata` object carrying
/// version/author/tags. Unknown keys are ignored here and preserved in the
/// file untouched.
fn normalize_front_matter(mapping: &serde_yaml::Mapping) -> FrontMatterFields {
    let mut fields = FrontMatterFields {
        strings: BTreeMap::new(),
        lists: BTreeMap::new(),
    };
    collect_fields(mapping, &mut fields);

    let nested = mapping.iter().find_map(|(key, value)| match (key, value) {
        (serde_yaml::Value::String(k), serde_yaml::Value::Mapping(m)) if k == "metadata" => {
            Some(m)
        }
        _ => None,
    });
    if let Some(nested) = nested {
        // Top-level keys win over nested metadata on conflict.
        let mut nested_fields = FrontMatterFields {
            strings: BTreeMap::new(),
            lists: BTreeMap::new(),
        };
        collect_fields(nested, &mut nested_fields);
        for (key, value) in nested_fields.strings {
            fields.strings.entry(key).or_insert(value);
        }
        for (key, value) in nested_fields.lists {
            fields.lists.entry(key).or_insert(value);
        }
    }
    fields
}

fn collect_fields(mapping: &serde_yaml::Mapping, fields: &mut FrontMatterFields) {
    for (key, value) in mapping {
        let Some(key) = key.as_str() else { continue };
        match value {
            serde_yaml::Value::String(s) => {
                fields.strings.insert(key.to_string(), s.clone());
            }
            serde_yaml::Value::Number(n) => {
                fields.strings.insert(key.to_string(), n.to_string());
            }
            serde_yaml::Value::Bool(b) => {
                fields.strings.insert(key.to_string(), b.to_string());
            }
            serde_yaml::Value::Sequence(seq) => {
                let items = seq
                    .iter()
                    .filter_map(|v| match v {
                        serde_yaml::Value::String(s) => Some(s.clone()),
                        serde_yaml::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect();
                fields.lists.insert(key.to_string(), items);
            }
            _ => {}
        }
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}

/// Bullet lines under an `## Examples` heading, stopping at the next heading.
fn extract_examples(body: &str) -> Vec<String> {
    let mut examples = Vec::new();
    let mut in_examples = false;
    for line in body.lines() {
        let trimmed = line.trim();
        if HEADING_RE.is_match(line) {
            in_examples = trimmed
                .trim_start_matches('#')
                .trim()
                .eq_ignore_ascii_case("examples");
            continue;
        }
        if in_examples {
            if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
                let item = item.trim();
                if !item.is_empty() {
                    examples.push(item.to_string());
                }
            }
        }
    }
    examples
}

fn file_mtime_utc(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
