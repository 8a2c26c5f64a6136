//! Dense-embedding index over skill text.
//!
//! The store owns its own SQLite database under `<data_root>/vector/` and
//! persists, per skill: the embedding vector (little-endian f32 BLOB),
//! the exact text that produced it, and the filterable metadata map.
//! Keeping the document text alongside the vector means switching
//! embedders never requires re-reading source files.

pub mod embedder;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, SkilldexError};
use crate::skill::types::{Skill, SkillCategory};
pub use embedder::{cosine_similarity, Embedder, HashEmbedder};

/// Conjunctive metadata predicates for vector queries.
#[derive(Debug, Clone, Default)]
pub struct VectorFilters {
    pub category: Option<SkillCategory>,
    /// Membership: record's repo_id must be one of these (empty = any).
    pub repo_ids: Vec<String>,
    /// Every listed tag must appear in the record's tag set. Implemented
    /// as delimiter-anchored substring match on the stored CSV, because
    /// the metadata map holds tags as a single delimited string.
    pub tags: Vec<String>,
}

/// A stored embedding record's metadata view (vector omitted).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub skill_id: String,
    pub name: String,
    pub category: SkillCategory,
    pub tags: BTreeSet<String>,
    pub repo_id: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub document: String,
}

/// A nearest-neighbor hit with similarity mapped into [0,1].
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub record: StoredEmbedding,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorStoreStats {
    pub records: u64,
    pub disk_bytes: u64,
}

pub struct VectorStore {
    conn: Mutex<Connection>,
    embedder: Box<dyn Embedder>,
    db_path: PathBuf,
    dim: usize,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("db_path", &self.db_path)
            .field("dim", &self.dim)
            .finish()
    }
}

impl VectorStore {
    /// Open (creating if needed) the store under `dir`.
    ///
    /// The embedder's dimension is pinned on first open; reopening with a
    /// different dimension is `EmbeddingDimensionMismatch` and requires a
    /// rebuild.
    pub fn open(dir: &Path, embedder: Box<dyn Embedder>) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("embeddings.db");
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS store_meta (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS embeddings (
                 skill_id   TEXT PRIMARY KEY,
                 vector     BLOB NOT NULL,
                 document   TEXT NOT NULL,
                 name       TEXT NOT NULL,
                 category   TEXT NOT NULL,
                 tags       TEXT NOT NULL,
                 repo_id    TEXT NOT NULL,
                 updated_at TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_embeddings_repo ON embeddings(repo_id);
             CREATE INDEX IF NOT EXISTS idx_embeddings_category ON embeddings(category);",
        )?;

        let dim = embedder.dim();
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dim'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match stored {
            Some(value) => {
                let stored_dim: usize = value
                    .parse()
                    .map_err(|_| SkilldexError::Corrupt(format!("bad stored dim: {value}")))?;
                if stored_dim != dim {
                    return Err(SkilldexError::EmbeddingDimensionMismatch {
                        stored: stored_dim,
                        configured: dim,
                    });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES ('dim', ?1)",
                    params![dim.to_string()],
                )?;
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            db_path,
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Upsert one skill. Overwrites any existing record with the same id;
    /// each upsert is a single transaction, so a crash leaves the record
    /// either fully committed or absent.
    pub fn index(&self, skill: &Skill) -> Result<()> {
        let document = skill.embeddable_text();
        let vector = self.embedder.embed(&document)?;
        let conn = self.conn.lock().expect("vector store lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO embeddings
                 (skill_id, vector, document, name, category, tags, repo_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                skill.id,
                vec_to_blob(&vector),
                document,
                skill.name,
                skill.category.as_str(),
                skill.tags_csv(),
                skill.repo_id,
                skill.updated_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Remove a record. Returns whether one existed.
    pub fn remove(&self, skill_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("vector store lock poisoned");
        let changed = conn.execute(
            "DELETE FROM embeddings WHERE skill_id = ?1",
            params![skill_id],
        )?;
        Ok(changed > 0)
    }

    /// Delete all records. Idempotent.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().expect("vector store lock poisoned");
        conn.execute("DELETE FROM embeddings", [])?;
        Ok(())
    }

    /// Nearest-neighbor search: embed the query, rank matching records by
    /// `(1 + cos) / 2` descending, ties by skill id ascending.
    pub fn search(
        &self,
        query_text: &str,
        top_k: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<VectorHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self
            .embedder
            .embed(query_text)
            .map_err(|err| SkilldexError::QueryEmbeddingFailed(err.to_string()))?;

        let mut hits = Vec::new();
        {
            let conn = self.conn.lock().expect("vector store lock poisoned");
            let (clause, params) = filters.to_sql();
            let sql = format!(
                "SELECT skill_id, vector, document, name, category, tags, repo_id, updated_at
                 FROM embeddings{clause}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_str())),
                |row| {
                    let blob: Vec<u8> = row.get(1)?;
                    Ok((row_to_stored(row)?, blob))
                },
            )?;
            for row in rows {
                let (record, blob) = row?;
                let vector = blob_to_vec(&blob);
                if vector.len() != self.dim {
                    return Err(SkilldexError::Corrupt(format!(
                        "record {} has dim {}, store has {}",
                        record.skill_id,
                        vector.len(),
                        self.dim
                    )));
                }
                let score = (1.0 + cosine_similarity(&query_vector, &vector)) / 2.0;
                hits.push(VectorHit { record, score });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.skill_id.cmp(&b.record.skill_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    pub fn get(&self, skill_id: &str) -> Result<Option<StoredEmbedding>> {
        let conn = self.conn.lock().expect("vector store lock poisoned");
        let record = conn
            .query_row(
                "SELECT skill_id, vector, document, name, category, tags, repo_id, updated_at
                 FROM embeddings WHERE skill_id = ?1",
                params![skill_id],
                row_to_stored,
            )
            .optional()?;
        Ok(record)
    }

    /// All records matching the filters, ordered by skill id.
    pub fn list(&self, filters: &VectorFilters) -> Result<Vec<StoredEmbedding>> {
        let conn = self.conn.lock().expect("vector store lock poisoned");
        let (clause, params) = filters.to_sql();
        let sql = format!(
            "SELECT skill_id, vector, document, name, category, tags, repo_id, updated_at
             FROM embeddings{clause} ORDER BY skill_id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_str())),
                row_to_stored,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn ids(&self) -> Result<BTreeSet<String>> {
        let conn = self.conn.lock().expect("vector store lock poisoned");
        let mut stmt = conn.prepare("SELECT skill_id FROM embeddings")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("vector store lock poisoned");
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn stats(&self) -> Result<VectorStoreStats> {
        let records = self.count()?;
        let disk_bytes = std::fs::metadata(&self.db_path)
            .map(|meta| meta.len())
            .unwrap_or(0);
        Ok(VectorStoreStats {
            records,
            disk_bytes,
        })
    }
}

impl VectorFilters {
    /// WHERE clause + positional string params for the predicates.
    fn to_sql(&self) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        if let Some(category) = self.category {
            params.push(category.as_str().to_string());
            conditions.push(format!("category = ?{}", params.len()));
        }
        if !self.repo_ids.is_empty() {
            let placeholders: Vec<String> = self
                .repo_ids
                .iter()
                .map(|id| {
                    params.push(id.clone());
                    format!("?{}", params.len())
                })
                .collect();
            conditions.push(format!("repo_id IN ({})", placeholders.join(", ")));
        }
        for tag in &self.tags {
            // Anchor on delimiters so "db" never matches "rdbms".
            params.push(format!("%,{},%", tag.to_lowercase()));
            conditions.push(format!("(',' || tags || ',') LIKE ?{}", params.len()));
        }
        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }
}

fn row_to_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEmbedding> {
    let tags_csv: String = row.get(5)?;
    let tags = tags_csv
        .split(',')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect();
    let updated_at: Option<String> = row.get(7)?;
    let updated_at = updated_at.and_then(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    });
    Ok(StoredEmbedding {
        skill_id: row.get(0)?,
        name: row.get(3)?,
        category: SkillCategory::parse(&row.get::<_, String>(4)?),
        tags,
        repo_id: row.get(6)?,
        updated_at,
        document: row.get(2)?,
    })
}

/// Little-endian f32 byte encoding for BLOB storage.
fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
