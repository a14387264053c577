//! faceseek-core — Face matching engine.
//!
//! Pure, deterministic computation over in-memory face records: target face
//! selection, greedy one-to-one similarity assignment, and ranking of
//! candidate images. No I/O and no async; the cache store and the embedding
//! provider live in sibling crates.

pub mod matcher;
pub mod ranking;
pub mod selector;
pub mod types;

pub use matcher::{match_faces, MatchOutcome};
pub use ranking::{rank, ScopeImage, ScopeMatch};
pub use selector::{select, SelectorError, TargetPolicy};
pub use types::{BBox, DetectedFace, Embedding, FaceRecord, MatchPair};
