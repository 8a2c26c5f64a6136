//! Embedded metadata store.
//!
//! Single source of truth for repository sync state: a SQLite database at
//! `<data_root>/metadata.db` with WAL journaling, single-writer
//! transactional semantics, and a one-time migration from the legacy
//! flat-file snapshot format.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SkilldexError};

/// A cloned source of skills.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Repository {
    /// Deterministic hash of the normalized URL.
    pub id: String,
    pub url: String,
    pub local_path: PathBuf,
    /// 0-100, default 50.
    pub priority: u8,
    pub license: Option<String>,
    /// Cached count of skill files in the clone.
    pub skill_count: u64,
    pub last_updated: DateTime<Utc>,
    pub auto_update: bool,
}

/// Legacy flat-file snapshot shape, migrated on first open.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyRepoFile {
    Wrapped { repositories: Vec<Repository> },
    Bare(Vec<Repository>),
}

impl LegacyRepoFile {
    fn into_repositories(self) -> Vec<Repository> {
        match self {
            Self::Wrapped { repositories } => repositories,
            Self::Bare(repositories) => repositories,
        }
    }
}

/// Bumped on any change to the logical schema below.
const SCHEMA_VERSION: u32 = 1;

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open (creating if needed) the store at `path` and run migrations.
    ///
    /// If a legacy `repositories.json` sits next to the database, its
    /// contents are imported in a single transaction and the file is
    /// renamed with a `.backup` suffix. A failed import leaves the legacy
    /// file untouched.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let existed = path.is_file();
        let conn = Connection::open(path)?;
        Self::configure_pragmas(&conn)?;

        // Snapshot the database before a schema change touches it.
        let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if existed && version != SCHEMA_VERSION {
            let backup = path.with_extension(format!("db.v{version}.bak"));
            std::fs::copy(path, &backup)?;
            info!(from = version, to = SCHEMA_VERSION, backup = %backup.display(),
                "metadata schema change, snapshot taken");
        }
        Self::run_migrations(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        if let Some(parent) = path.parent() {
            store.migrate_legacy_file(&parent.join("repositories.json"))?;
        }
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_pragmas(&conn)?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS repositories (
                 id           TEXT PRIMARY KEY,
                 url          TEXT NOT NULL UNIQUE,
                 local_path   TEXT NOT NULL,
                 priority     INTEGER NOT NULL DEFAULT 50,
                 license      TEXT,
                 skill_count  INTEGER NOT NULL DEFAULT 0,
                 last_updated TEXT NOT NULL,
                 auto_update  INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS skill_summaries (
                 skill_id    TEXT PRIMARY KEY,
                 repo_id     TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
                 name        TEXT NOT NULL,
                 description TEXT NOT NULL,
                 category    TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_skill_summaries_repo
                 ON skill_summaries(repo_id);",
        )?;
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        Ok(())
    }

    fn migrate_legacy_file(&self, legacy_path: &Path) -> Result<()> {
        if !legacy_path.is_file() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(legacy_path)?;
        let parsed: LegacyRepoFile = serde_json::from_str(&raw)
            .map_err(|err| SkilldexError::Corrupt(format!("legacy repository file: {err}")))?;
        let repositories = parsed.into_repositories();

        {
            let mut conn = self.conn.lock().expect("metadata store lock poisoned");
            let tx = conn.transaction()?;
            for repo in &repositories {
                insert_repo(&tx, repo)?;
            }
            tx.commit()?;
        }

        let backup = legacy_path.with_extension("json.backup");
        std::fs::rename(legacy_path, &backup)?;
        info!(
            count = repositories.len(),
            backup = %backup.display(),
            "migrated legacy repository file"
        );
        Ok(())
    }

    pub fn add_repo(&self, repo: &Repository) -> Result<()> {
        let conn = self.conn.lock().expect("metadata store lock poisoned");
        insert_repo(&conn, repo)
    }

    /// Overwrite the stored record for `repo.id`. `UnknownRepoId` if absent.
    pub fn update_repo(&self, repo: &Repository) -> Result<()> {
        let conn = self.conn.lock().expect("metadata store lock poisoned");
        let changed = conn.execute(
            "UPDATE repositories
             SET url = ?2, local_path = ?3, priority = ?4, license = ?5,
                 skill_count = ?6, last_updated = ?7, auto_update = ?8
             WHERE id = ?1",
            params![
                repo.id,
                repo.url,
                repo.local_path.to_string_lossy(),
                repo.priority,
                repo.license,
                repo.skill_count,
                repo.last_updated.to_rfc3339(),
                repo.auto_update,
            ],
        )?;
        if changed == 0 {
            return Err(SkilldexError::UnknownRepoId(repo.id.clone()));
        }
        Ok(())
    }

    pub fn remove_repo(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("metadata store lock poisoned");
        let changed = conn.execute("DELETE FROM repositories WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(SkilldexError::UnknownRepoId(id.to_string()));
        }
        Ok(())
    }

    pub fn get_repo(&self, id: &str) -> Result<Option<Repository>> {
        let conn = self.conn.lock().expect("metadata store lock poisoned");
        let repo = conn
            .query_row(
                "SELECT id, url, local_path, priority, license, skill_count,
                        last_updated, auto_update
                 FROM repositories WHERE id = ?1",
                params![id],
                row_to_repo,
            )
            .optional()?;
        Ok(repo)
    }

    /// All repositories, highest priority first, id as tiebreak.
    pub fn list_repos(&self) -> Result<Vec<Repository>> {
        let conn = self.conn.lock().expect("metadata store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, url, local_path, priority, license, skill_count,
                    last_updated, auto_update
             FROM repositories
             ORDER BY priority DESC, id ASC",
        )?;
        let repos = stmt
            .query_map([], row_to_repo)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(repos)
    }

    pub fn repo_count(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("metadata store lock poisoned");
        let count: u64 =
            conn.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn insert_repo(conn: &Connection, repo: &Repository) -> Result<()> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO repositories
             (id, url, local_path, priority, license, skill_count, last_updated, auto_update)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            repo.id,
            repo.url,
            repo.local_path.to_string_lossy(),
            repo.priority,
            repo.license,
            repo.skill_count,
            repo.last_updated.to_rfc3339(),
            repo.auto_update,
        ],
    )?;
    if inserted == 0 {
        return Err(SkilldexError::RepoExists(repo.id.clone()));
    }
    Ok(())
}

fn row_to_repo(row: &rusqlite::Row<'_>) -> rusqlite::Result<Repository> {
    let last_updated: String = row.get(6)?;
    let last_updated = DateTime::parse_from_rfc3339(&last_updated)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;
    Ok(Repository {
        id: row.get(0)?,
        url: row.get(1)?,
        local_path: PathBuf::from(row.get::<_, String>(2)?),
        priority: row.get(3)?,
        license: row.get(4)?,
        skill_count: row.get(5)?,
        last_updated,
        auto_update: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_repo(id: &str) -> Repository {
        Repository {
            id: id.to_string(),
            url: format!("https://github.com/example/{id}.git"),
            local_path: PathBuf::from(format!("/data/repos/{id}")),
            priority: 50,
            license: Some("MIT".to_string()),
            skill_count: 0,
            last_updated: Utc::now(),
            auto_update: false,
        }
    }

    #[test]
    fn add_get_roundtrip() {
        let store = MetadataStore::open_in_memory().unwrap();
        let repo = sample_repo("r1");
        store.add_repo(&repo).unwrap();

        let fetched = store.get_repo("r1").unwrap().unwrap();
        assert_eq!(fetched.url, repo.url);
        assert_eq!(fetched.priority, 50);
        assert_eq!(fetched.license.as_deref(), Some("MIT"));
        // RFC 3339 roundtrip keeps sub-second precision.
        assert_eq!(fetched.last_updated, repo.last_updated);
    }

    #[test]
    fn duplicate_add_is_repo_exists() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.add_repo(&sample_repo("r1")).unwrap();
        let err = store.add_repo(&sample_repo("r1")).unwrap_err();
        assert!(matches!(err, SkilldexError::RepoExists(_)));
    }

    #[test]
    fn update_refreshes_fields() {
        let store = MetadataStore::open_in_memory().unwrap();
        let mut repo = sample_repo("r1");
        store.add_repo(&repo).unwrap();

        repo.skill_count = 12;
        repo.priority = 90;
        store.update_repo(&repo).unwrap();

        let fetched = store.get_repo("r1").unwrap().unwrap();
        assert_eq!(fetched.skill_count, 12);
        assert_eq!(fetched.priority, 90);
    }

    #[test]
    fn update_unknown_is_typed_error() {
        let store = MetadataStore::open_in_memory().unwrap();
        let err = store.update_repo(&sample_repo("ghost")).unwrap_err();
        assert!(matches!(err, SkilldexError::UnknownRepoId(_)));
    }

    #[test]
    fn remove_unknown_is_typed_error() {
        let store = MetadataStore::open_in_memory().unwrap();
        let err = store.remove_repo("ghost").unwrap_err();
        assert!(matches!(err, SkilldexError::UnknownRepoId(_)));
    }

    #[test]
    fn list_orders_by_priority_then_id() {
        let store = MetadataStore::open_in_memory().unwrap();
        let mut low = sample_repo("bbb");
        low.priority = 10;
        let mut high = sample_repo("aaa");
        high.priority = 90;
        let mut mid_a = sample_repo("mmm");
        mid_a.priority = 50;
        let mut mid_b = sample_repo("nnn");
        mid_b.priority = 50;

        for repo in [&low, &mid_b, &high, &mid_a] {
            store.add_repo(repo).unwrap();
        }

        let listed = store.list_repos().unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "mmm", "nnn", "bbb"]);
    }

    #[test]
    fn remove_cascades_to_skill_summaries() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.add_repo(&sample_repo("r1")).unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO skill_summaries (skill_id, repo_id, name, description, category)
                 VALUES ('r1/a', 'r1', 'a', 'd', 'testing')",
                [],
            )
            .unwrap();
        }
        store.remove_repo("r1").unwrap();
        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM skill_summaries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn legacy_file_is_migrated_and_renamed() {
        let tmp = tempfile::tempdir().unwrap();
        let legacy = tmp.path().join("repositories.json");
        let repos = vec![sample_repo("legacy1"), sample_repo("legacy2")];
        std::fs::write(&legacy, serde_json::to_string(&repos).unwrap()).unwrap();

        let store = MetadataStore::open(&tmp.path().join("metadata.db")).unwrap();
        assert_eq!(store.repo_count().unwrap(), 2);
        assert!(!legacy.exists());
        assert!(tmp.path().join("repositories.json.backup").exists());
    }

    #[test]
    fn legacy_wrapped_shape_is_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let legacy = tmp.path().join("repositories.json");
        let wrapped = serde_json::json!({ "repositories": [sample_repo("legacy1")] });
        std::fs::write(&legacy, wrapped.to_string()).unwrap();

        let store = MetadataStore::open(&tmp.path().join("metadata.db")).unwrap();
        assert_eq!(store.repo_count().unwrap(), 1);
    }

    #[test]
    fn corrupt_legacy_file_is_left_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let legacy = tmp.path().join("repositories.json");
        std::fs::write(&legacy, "not json at all").unwrap();

        let result = MetadataStore::open(&tmp.path().join("metadata.db"));
        assert!(result.is_err());
        assert!(legacy.exists());
    }

    #[test]
    fn schema_change_takes_backup_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("metadata.db");
        {
            // A database from before schema versioning (user_version 0).
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch("CREATE TABLE relic (x INTEGER);").unwrap();
        }

        MetadataStore::open(&db_path).unwrap();
        assert!(tmp.path().join("metadata.db.v0.bak").exists());

        // Reopening at the current version takes no further snapshot.
        MetadataStore::open(&db_path).unwrap();
        let backups = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".bak")
            })
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn wal_mode_is_enabled_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&tmp.path().join("metadata.db")).unwrap();
        let conn = store.conn.lock().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
