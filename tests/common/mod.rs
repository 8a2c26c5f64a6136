//! Shared fixtures for integration tests: skill files on disk and local
//! git upstreams to clone from.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use skilldex::{CancelToken, Config, SkillService};

/// Write a skill file under `root/rel_dir/SKILL.md`.
pub fn write_skill_file(root: &Path, rel_dir: &str, name: &str, category: &str, tags: &[&str]) {
    write_skill_file_with_body(
        root,
        rel_dir,
        name,
        category,
        tags,
        &"Body content long enough to satisfy the minimum length rule. ".repeat(4),
    );
}

pub fn write_skill_file_with_body(
    root: &Path,
    rel_dir: &str,
    name: &str,
    category: &str,
    tags: &[&str],
    body: &str,
) {
    let dir = root.join(rel_dir);
    std::fs::create_dir_all(&dir).unwrap();
    let tags = tags.join(", ");
    let content = format!(
        "---\nname: {name}\ndescription: {name} patterns and practices.\ncategory: {category}\ntags: [{tags}]\n---\n{body}"
    );
    std::fs::write(dir.join("SKILL.md"), content).unwrap();
}

/// Initialize a git repository at `dir` and commit everything in it.
pub fn init_upstream(dir: &Path) -> git2::Repository {
    let repo = git2::Repository::init(dir).unwrap();
    commit_all(&repo, "initial");
    repo
}

pub fn commit_all(repo: &git2::Repository, message: &str) {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = git2::Signature::now("Fixture", "fixture@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap();
}

/// Route tracing output through the test harness; safe to call from
/// every test, only the first call wins.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A service rooted in a fresh temp data dir with a small embedding
/// dimension to keep tests fast.
pub fn open_service(data_root: &Path) -> SkillService {
    init_test_logging();
    let mut config = Config::with_data_root(data_root);
    config.embedding.dim = 128;
    SkillService::open(config).unwrap()
}

/// Add a local upstream to the service, returning the repository id.
pub fn add_upstream(service: &SkillService, upstream_dir: &Path) -> String {
    let url = upstream_dir.to_string_lossy().to_string();
    service
        .repo_add(&url, Default::default(), &CancelToken::new())
        .unwrap()
        .id
}

pub fn data_root(tmp: &tempfile::TempDir) -> PathBuf {
    tmp.path().join("data")
}
