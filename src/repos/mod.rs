//! Repository lifecycle: clone, update, list, remove.
//!
//! Skill repositories are treated as read-only mirrors. Clones are
//! shallow; updates fetch origin and hard-reset the working tree to the
//! remote branch, which makes them idempotent regardless of any local
//! perturbation. Transfer progress is surfaced through a reporter
//! callback, throttled so listeners are not flooded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use git2::build::RepoBuilder;
use git2::{FetchOptions, RemoteCallbacks, ResetType};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Result, SkilldexError};
use crate::skill::discovery::find_skill_files;
use crate::storage::{MetadataStore, Repository};

/// Minimum byte delta between progress reports.
const PROGRESS_THROTTLE_BYTES: u64 = 100 * 1024;

/// Receives `(current, total, stage)` during git transfers. Must be cheap
/// and non-blocking; it is invoked from the transfer thread.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, current: u64, total: u64, stage: &str);
}

/// Reporter used by the non-`_with_progress` entry points.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _current: u64, _total: u64, _stage: &str) {}
}

/// Options for registering a repository.
#[derive(Debug, Clone)]
pub struct AddOptions {
    pub priority: u8,
    pub license: Option<String>,
    pub auto_update: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            priority: 50,
            license: None,
            auto_update: false,
        }
    }
}

pub struct RepositoryManager {
    base_dir: PathBuf,
    store: Arc<MetadataStore>,
    skill_filename: String,
    // One in-flight clone/update per repository.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RepositoryManager {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        store: Arc<MetadataStore>,
        skill_filename: impl Into<String>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            store,
            skill_filename: skill_filename.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn add(&self, url: &str, options: AddOptions, cancel: &CancelToken) -> Result<Repository> {
        self.add_with_progress(url, options, &NoProgress, cancel)
    }

    pub fn add_with_progress(
        &self,
        url: &str,
        options: AddOptions,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<Repository> {
        let normalized = normalize_url(url)?;
        let id = derive_repo_id(url)?;
        if self.store.get_repo(&id)?.is_some() {
            return Err(SkilldexError::RepoExists(id));
        }

        let guard = self.repo_lock(&id);
        let _held = guard.lock().expect("repo lock poisoned");

        let local_path = self.base_dir.join(&id);
        std::fs::create_dir_all(&self.base_dir)?;
        debug!(url = %normalized, id = %id, "cloning repository");

        if let Err(err) = self.clone_into(url, &local_path, progress, cancel) {
            // A half-written clone is useless; drop it before reporting.
            let _ = std::fs::remove_dir_all(&local_path);
            return Err(err);
        }

        let skill_count = find_skill_files(&local_path, &self.skill_filename).len() as u64;
        let repo = Repository {
            id: id.clone(),
            url: url.to_string(),
            local_path,
            priority: options.priority,
            license: options.license,
            skill_count,
            last_updated: Utc::now(),
            auto_update: options.auto_update,
        };
        self.store.add_repo(&repo)?;
        info!(id = %id, skills = skill_count, "repository added");
        Ok(repo)
    }

    pub fn update(&self, id: &str, cancel: &CancelToken) -> Result<Repository> {
        self.update_with_progress(id, &NoProgress, cancel)
    }

    pub fn update_with_progress(
        &self,
        id: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<Repository> {
        let mut repo = self
            .store
            .get_repo(id)?
            .ok_or_else(|| SkilldexError::UnknownRepoId(id.to_string()))?;

        let guard = self.repo_lock(id);
        let _held = guard.lock().expect("repo lock poisoned");

        self.fetch_and_reset(&repo, progress, cancel)?;

        repo.skill_count = find_skill_files(&repo.local_path, &self.skill_filename).len() as u64;
        repo.last_updated = Utc::now();
        self.store.update_repo(&repo)?;
        info!(id = %id, skills = repo.skill_count, "repository updated");
        Ok(repo)
    }

    pub fn list(&self) -> Result<Vec<Repository>> {
        self.store.list_repos()
    }

    /// Remove the record and the on-disk clone.
    pub fn remove(&self, id: &str) -> Result<()> {
        let repo = self
            .store
            .get_repo(id)?
            .ok_or_else(|| SkilldexError::UnknownRepoId(id.to_string()))?;

        let guard = self.repo_lock(id);
        let _held = guard.lock().expect("repo lock poisoned");

        self.store.remove_repo(id)?;
        if repo.local_path.exists() {
            std::fs::remove_dir_all(&repo.local_path)?;
        }
        info!(id = %id, "repository removed");
        Ok(())
    }

    /// Advisory staleness predicate; scheduling belongs to the host server.
    pub fn should_update(repo: &Repository, max_age: Duration) -> bool {
        Utc::now() - repo.last_updated > max_age
    }

    fn repo_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks.entry(id.to_string()).or_default().clone()
    }

    fn clone_into(
        &self,
        url: &str,
        dest: &Path,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut fetch_options = transfer_options(progress, cancel);
        if !is_local_url(url) {
            fetch_options.depth(1);
        }
        RepoBuilder::new()
            .fetch_options(fetch_options)
            // Route local mirrors through the transport too, so progress
            // and cancellation behave the same for every URL kind.
            .clone_local(git2::build::CloneLocal::None)
            .clone(url, dest)
            .map_err(|err| {
                if cancel.is_cancelled() {
                    SkilldexError::Cancelled
                } else {
                    SkilldexError::CloneFailed {
                        url: url.to_string(),
                        reason: err.message().to_string(),
                    }
                }
            })?;
        Ok(())
    }

    fn fetch_and_reset(
        &self,
        repo: &Repository,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<()> {
        let git = git2::Repository::open(&repo.local_path).map_err(|err| {
            SkilldexError::CorruptClone {
                path: repo.local_path.clone(),
                reason: err.message().to_string(),
            }
        })?;
        let branch = active_branch(&git)?;

        {
            let mut remote =
                git.find_remote("origin")
                    .map_err(|err| SkilldexError::CorruptClone {
                        path: repo.local_path.clone(),
                        reason: format!("missing origin remote: {}", err.message()),
                    })?;
            let mut fetch_options = transfer_options(progress, cancel);
            remote
                .fetch(&[branch.as_str()], Some(&mut fetch_options), None)
                .map_err(|err| {
                    if cancel.is_cancelled() {
                        SkilldexError::Cancelled
                    } else {
                        SkilldexError::FetchFailed {
                            repo_id: repo.id.clone(),
                            reason: err.message().to_string(),
                        }
                    }
                })?;
        }

        let target = git
            .revparse_single(&format!("origin/{branch}"))
            .map_err(|err| SkilldexError::FetchFailed {
                repo_id: repo.id.clone(),
                reason: format!("origin/{branch} not found after fetch: {}", err.message()),
            })?;
        git.reset(&target, ResetType::Hard, None)
            .map_err(|err| SkilldexError::CorruptClone {
                path: repo.local_path.clone(),
                reason: format!("hard reset failed: {}", err.message()),
            })?;
        Ok(())
    }
}

/// Fetch options wiring transfer progress through the reporter with
/// byte-delta throttling and cooperative cancellation.
fn transfer_options<'a>(
    progress: &'a dyn ProgressReporter,
    cancel: &'a CancelToken,
) -> FetchOptions<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut last_reported: u64 = 0;
    callbacks.transfer_progress(move |stats| {
        if cancel.is_cancelled() {
            return false;
        }
        let received = stats.received_bytes() as u64;
        let done = stats.received_objects() == stats.total_objects();
        if done || received.saturating_sub(last_reported) >= PROGRESS_THROTTLE_BYTES {
            last_reported = received;
            let stage = if done {
                format!("resolving deltas ({} KiB)", received / 1024)
            } else {
                format!("receiving objects ({} KiB)", received / 1024)
            };
            progress.report(
                stats.received_objects() as u64,
                stats.total_objects() as u64,
                &stage,
            );
        }
        true
    });
    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}

/// The branch updates track. HEAD after a clone points at the remote's
/// default branch; a detached HEAD falls back to main, then master.
fn active_branch(git: &git2::Repository) -> Result<String> {
    if let Ok(head) = git.head() {
        if head.is_branch() {
            if let Some(name) = head.shorthand() {
                return Ok(name.to_string());
            }
        }
    }
    for candidate in ["main", "master"] {
        if git
            .find_branch(&format!("origin/{candidate}"), git2::BranchType::Remote)
            .is_ok()
        {
            return Ok(candidate.to_string());
        }
    }
    Err(SkilldexError::CorruptClone {
        path: git.path().to_path_buf(),
        reason: "no active branch".to_string(),
    })
}

/// Deterministic repository id: first 12 hex chars of SHA-256 over the
/// normalized URL. Same URL always yields the same id; distinct
/// normalized URLs collide with negligible probability.
pub fn derive_repo_id(url: &str) -> Result<String> {
    let normalized = normalize_url(url)?;
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Ok(format!("{:x}", hasher.finalize())[..12].to_string())
}

/// Normalize a git URL: lowercase the scheme and host, strip userinfo,
/// strip a trailing `.git` and trailing slashes. Rejects anything that is
/// not a plausible git URL (scheme URL, scp-style remote, or an absolute
/// local path).
pub fn normalize_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(SkilldexError::InvalidUrl("empty url".to_string()));
    }

    // scp-style: git@host:org/repo(.git)
    if let Some(rest) = url.strip_prefix("git@") {
        let (host, path) = rest
            .split_once(':')
            .ok_or_else(|| SkilldexError::InvalidUrl(url.to_string()))?;
        if host.is_empty() || path.is_empty() {
            return Err(SkilldexError::InvalidUrl(url.to_string()));
        }
        let path = path.trim_end_matches('/').trim_end_matches(".git");
        return Ok(format!("ssh://{}/{}", host.to_lowercase(), path));
    }

    if let Some((scheme, rest)) = url.split_once("://") {
        let scheme = scheme.to_lowercase();
        if !matches!(scheme.as_str(), "http" | "https" | "ssh" | "git" | "file") {
            return Err(SkilldexError::InvalidUrl(url.to_string()));
        }
        if rest.is_empty() {
            return Err(SkilldexError::InvalidUrl(url.to_string()));
        }
        let rest = rest.rsplit_once('@').map_or(rest, |(_, after)| after);
        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
        let path = path.trim_end_matches('/').trim_end_matches(".git");
        if path.is_empty() {
            return Ok(format!("{scheme}://{}", host.to_lowercase()));
        }
        return Ok(format!("{scheme}://{}/{}", host.to_lowercase(), path));
    }

    // Absolute local path (used for mirrors and tests).
    if Path::new(url).is_absolute() {
        return Ok(format!("file://{}", url.trim_end_matches('/')));
    }

    Err(SkilldexError::InvalidUrl(url.to_string()))
}

fn is_local_url(url: &str) -> bool {
    url.starts_with("file://") || Path::new(url).is_absolute()
}
