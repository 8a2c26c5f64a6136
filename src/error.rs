//! Error types for skilldex.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SkilldexError>;

/// Why a skill file was rejected by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The file lacks `---` front-matter fences or the front-matter is not a mapping.
    MalformedFile,
    /// The front-matter violates the skill schema (missing/short/overlong fields).
    SchemaViolation,
}

/// A per-file parse failure, carrying the offending path.
#[derive(Debug, Error)]
#[error("{kind:?} in {path}: {reason}", path = .path.display())]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub path: PathBuf,
    pub reason: String,
}

impl ParseError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::MalformedFile,
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn schema(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::SchemaViolation,
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SkilldexError {
    // -- input errors -------------------------------------------------------
    #[error("invalid repository url: {0}")]
    InvalidUrl(String),

    #[error("repository already exists: {0}")]
    RepoExists(String),

    #[error("unknown repository id: {0}")]
    UnknownRepoId(String),

    #[error("unknown skill id: {0}")]
    UnknownSkillId(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    // -- resource errors ----------------------------------------------------
    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage busy: {0}")]
    StorageBusy(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    // -- external errors ----------------------------------------------------
    #[error("clone failed for {url}: {reason}")]
    CloneFailed { url: String, reason: String },

    #[error("fetch failed for {repo_id}: {reason}")]
    FetchFailed { repo_id: String, reason: String },

    #[error("corrupt clone at {path}: {reason}", path = .path.display())]
    CorruptClone { path: PathBuf, reason: String },

    // -- consistency errors -------------------------------------------------
    #[error("query embedding failed: {0}")]
    QueryEmbeddingFailed(String),

    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),

    #[error("graph store unavailable: {0}")]
    GraphUnavailable(String),

    #[error("embedding dimension mismatch: store has {stored}, configured {configured}")]
    EmbeddingDimensionMismatch { stored: usize, configured: usize },

    // -- control ------------------------------------------------------------
    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for SkilldexError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg) => match code.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    Self::StorageBusy(msg.clone().unwrap_or_else(|| err.to_string()))
                }
                rusqlite::ErrorCode::ConstraintViolation => {
                    Self::ConstraintViolation(msg.clone().unwrap_or_else(|| err.to_string()))
                }
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                    Self::Corrupt(msg.clone().unwrap_or_else(|| err.to_string()))
                }
                _ => Self::Storage(err.to_string()),
            },
            _ => Self::Storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for SkilldexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display_includes_path_and_reason() {
        let err = ParseError::schema("/tmp/SKILL.md", "description too short");
        let text = err.to_string();
        assert!(text.contains("SchemaViolation"));
        assert!(text.contains("/tmp/SKILL.md"));
        assert!(text.contains("description too short"));
    }

    #[test]
    fn parse_error_converts_into_crate_error() {
        let err: SkilldexError = ParseError::malformed("x.md", "no fences").into();
        assert!(matches!(err, SkilldexError::Parse(_)));
    }

    #[test]
    fn sqlite_busy_maps_to_storage_busy() {
        let raw = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let err: SkilldexError = raw.into();
        assert!(matches!(err, SkilldexError::StorageBusy(_)));
    }

    #[test]
    fn sqlite_constraint_maps_to_constraint_violation() {
        let raw = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed".to_string()),
        );
        let err: SkilldexError = raw.into();
        assert!(matches!(err, SkilldexError::ConstraintViolation(_)));
    }

    #[test]
    fn dimension_mismatch_message_names_both_dims() {
        let err = SkilldexError::EmbeddingDimensionMismatch {
            stored: 384,
            configured: 512,
        };
        let text = err.to_string();
        assert!(text.contains("384"));
        assert!(text.contains("512"));
    }
}
