//! skilldex - local hybrid discovery engine for skill repositories.
//!
//! Indexes a corpus of skill documents (markdown with structured
//! front-matter) cloned from remote git repositories, keeps two coupled
//! indices consistent with the filesystem (a dense-embedding store and a
//! typed relationship graph), and serves hybrid retrieval - vector
//! similarity fused with graph-derived boosts - to a long-running
//! tool-invocation server.
//!
//! Entry point: [`service::SkillService`], which wires the components:
//!
//! - [`skill`]: parsing, validation, security scanning, discovery
//! - [`storage`]: transactional metadata store (repository records)
//! - [`repos`]: git-backed repository sync with progress reporting
//! - [`vector`]: durable dense-embedding index with filtered search
//! - [`graph`]: in-memory skill/tag/category graph with snapshots
//! - [`engine`]: reindex orchestration and hybrid fusion search

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod repos;
pub mod service;
pub mod skill;
pub mod storage;
pub mod vector;

pub use cancel::CancelToken;
pub use config::Config;
pub use engine::{IndexOutcome, IndexStats, SearchFilters, SearchMode, SearchRequest};
pub use error::{ParseError, ParseErrorKind, Result, SkilldexError};
pub use service::SkillService;
pub use skill::{ParsedSkill, ScoredSkill, Skill, SkillCategory};
pub use storage::Repository;
