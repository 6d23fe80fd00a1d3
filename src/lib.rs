//! # kernel-search
//!
//! Structure discovery for composite covariance kernels.
//!
//! - **Tree**: `KernelTree` holds base kernels combined under `+` and `*`.
//! - **Canon**: `simplify` gives every equivalent tree one canonical string.
//! - **Grammar**: `Grammar::neighbors` proposes one-step mutations.
//! - **Search**: `SearchDriver` scores candidates through an injected
//!   `Scorer` and climbs greedily from the best one.

pub mod canon;
pub mod config;
pub mod error;
pub mod fitness;
pub mod grammar;
pub mod kernel;
pub mod search;
pub mod tree;

pub use canon::{canonical_form, canonical_string, simplify, summands};
pub use config::SearchConfig;
pub use error::{KernelError, ScoringError};
pub use grammar::{Grammar, Mutation, Neighbor, Neighbors, DEFAULT_GRAMMAR};
pub use kernel::{BaseKind, CombRule, EvalHandle, Leaf};
pub use search::{
    Candidate, CancelToken, RankedEntry, Scored, Scorer, SearchDriver, SearchOutcome, SearchReport,
    StepReport, StopReason,
};
pub use tree::{KernelTree, Node, NodeId, NodeKind, Parent, PostOrder, MAX_DEPTH};
