// This module defines the error taxonomy for the instruction selector using the thiserror
// crate. CodegenError distinguishes the failure classes the evaluator framework can
// surface: Internal for compiler-inconsistency failures (an opcode/type combination that
// upstream IL well-formedness should have made impossible, or a reference-count underflow),
// UnimplementedOpCode for IL operations that are recognized but intentionally not lowered
// on this target, and FacilityRequired for evaluators invoked below the CPU facility level
// they were gated on. Heuristic pattern rejection is never an error: "try pattern X, else
// pattern Y" legality checks are pure predicates and fall through silently. The module also
// provides CodegenResult<T> as a convenience alias. Internal errors abort compilation of
// the current method; no partial instruction stream is ever considered valid output.

//! Error types for the z instruction selector.
//!
//! Using thiserror for idiomatic error handling. The taxonomy follows the
//! compiler-internal convention: an `Internal` error is a defect, not a
//! recoverable condition, while `UnimplementedOpCode` is a distinct,
//! tooling-recognizable "missing feature" marker.

use thiserror::Error;

use super::il::OpCode;
use super::target::ArchLevel;

/// Main error type for instruction selection.
#[derive(Error, Debug)]
pub enum CodegenError {
    /// Compiler internal-consistency failure. Equivalent to a fatal
    /// assertion: the IL violated an invariant the selector relies on.
    #[error("internal assertion failed in {location}: {reason}")]
    Internal {
        location: &'static str,
        reason: String,
    },

    /// Opcode recognized by the IL but intentionally not lowered on this
    /// target. Distinct from `Internal` so tooling can tell "missing
    /// feature" from "broken invariant".
    #[error("opcode {opcode:?} is not implemented on this target")]
    UnimplementedOpCode { opcode: OpCode },

    /// An evaluator required a CPU facility the compilation target lacks.
    #[error("{what} requires {required:?}, target is {actual:?}")]
    FacilityRequired {
        what: &'static str,
        required: ArchLevel,
        actual: ArchLevel,
    },

    /// A node's reference count was decremented more times than its initial
    /// count. Always a defect in an evaluator's consumption protocol.
    #[error("reference count underflow on node {node_id} in {location}")]
    RefCountUnderflow { node_id: u32, location: &'static str },
}

impl CodegenError {
    /// Build an internal-consistency error with a formatted reason.
    pub fn internal(location: &'static str, reason: impl Into<String>) -> Self {
        Self::Internal {
            location,
            reason: reason.into(),
        }
    }
}

/// Result type alias for selection operations.
pub type CodegenResult<T> = Result<T, CodegenError>;

/// Assert an IL invariant, surfacing violations as `CodegenError::Internal`.
///
/// The selector treats these as fatal for the current method; they are not
/// recoverable and never produce partial output.
macro_rules! il_assert {
    ($cond:expr, $location:expr, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::core::error::CodegenError::internal(
                $location,
                format!($($arg)*),
            ));
        }
    };
}

pub(crate) use il_assert;
