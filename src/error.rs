use thiserror::Error;

use crate::kernel::BaseKind;

/// Structural and construction errors raised by tree operations.
///
/// Every fallible operation validates before it mutates, so an `Err` always
/// leaves the tree exactly as it was.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("{kind} expects {expected} parameters, got {got}")]
    ArityMismatch {
        kind: BaseKind,
        expected: usize,
        got: usize,
    },
    #[error("Cannot detach the top-level node of a tree (replace it instead)")]
    CannotDetachRoot,
    #[error("Node is a leaf and cannot take children")]
    NotAnOperator,
    #[error("Node is detached and has no position to replace")]
    Detached,
    #[error("Move would make a node its own descendant")]
    WouldCycle,
    #[error("No leaf at post-order index {0}")]
    InvalidSite(usize),
    #[error("{0} parameters are fixed")]
    ParamsFixed(BaseKind),
    #[error("Parse error at byte {pos}: {message}")]
    Parse { pos: usize, message: String },
}

/// Failure reported by an external scorer (non-convergence, invalid
/// parameters, ...). Recoverable: the search drops the candidate.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Scoring failed: {0}")]
pub struct ScoringError(pub String);

impl ScoringError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
