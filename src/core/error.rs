// This module defines the error taxonomy of the intrinsic layer using thiserror. Every
// failure the subsystem can report is a compiler-internal defect: a node constructed with
// parameters that violate its invariants, a stub lookup for a combination that was never
// registered, a runtime-checked capability set that belongs to another architecture, or a
// backend that could not emit a requested operation. None of them describe the program
// being compiled, so callers are expected to propagate them with `?` and abort the
// compilation. Declining to fold a node is not an error and never shows up here.

//! Error types for the intrinsic layer.

use thiserror::Error;

use crate::core::graph::NodeId;
use crate::target::Architecture;

/// Main error type of the intrinsic layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntrinsicError {
    #[error("invariant violated ({invariant}): {detail}")]
    InvariantViolation {
        invariant: &'static str,
        detail: String,
    },

    #[error("no stub registered for {operation} with features [{features}]")]
    NoMatchingStub {
        operation: String,
        features: String,
    },

    #[error("capability set for {found} used with a {expected} target")]
    ArchitectureMismatch {
        expected: Architecture,
        found: Architecture,
    },

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("node {node} cannot be lowered: {reason}")]
    NotLowerable {
        node: NodeId,
        reason: String,
    },

    #[error("backend failure: {0}")]
    Backend(String),
}

impl IntrinsicError {
    /// Shorthand for construction-time invariant violations.
    pub fn invariant(invariant: &'static str, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            invariant,
            detail: detail.into(),
        }
    }
}

/// Result type alias for the intrinsic layer.
pub type IntrinsicResult<T> = Result<T, IntrinsicError>;

/// Fail with an [`IntrinsicError::InvariantViolation`] unless `cond` holds.
pub(crate) fn guarantee(
    cond: bool,
    invariant: &'static str,
    detail: impl FnOnce() -> String,
) -> IntrinsicResult<()> {
    if cond {
        Ok(())
    } else {
        Err(IntrinsicError::invariant(invariant, detail()))
    }
}
