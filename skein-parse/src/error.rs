//! Error taxonomy for the parser and macro/restriction pipeline (§7).

use crate::instruction::DecodeError;
use skein_core::Atom;
use thiserror::Error;

/// Errors raised while expanding a bundle tree node (§4.B).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BundleTreeError {
    /// Resolves Open Question 2: a `RESERVED_10..15` instruction is an
    /// internal error with a controlled abort, not a
    /// continue-with-corrupted-state.
    #[error("reserved parsing instruction opcode {0} encountered; this is an internal error")]
    ReservedInstruction(u8),
    #[error("unknown parsing instruction opcode {0}")]
    UnknownOpcode(u8),
}

impl From<DecodeError> for BundleTreeError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Reserved(op) => Self::ReservedInstruction(op),
            DecodeError::Unknown(op) => Self::UnknownOpcode(op),
        }
    }
}

/// A deferred, describer-style rejection message (§4.C "Error
/// recording"). Cheap to construct; only rendered when it ends up at
/// the rightmost reached position.
pub type Describer = std::sync::Arc<dyn Fn() -> String + Send + Sync>;

/// Errors surfaced by the parser engine (§4.C, §7).
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no solution found; rightmost position {position}: {}", describers.join("; "))]
    NoSolution {
        position: usize,
        describers: Vec<String>,
    },
    #[error("ambiguous parse at position {position}: {} candidates", candidate_count)]
    Ambiguous {
        position: usize,
        candidate_count: usize,
        diff_description: String,
    },
    #[error("{0}")]
    BundleTree(#[from] BundleTreeError),
    /// The distinguished reject-parsing signal (§4.D step 5, Open
    /// Question 3): a semantic restriction, or a macro body running
    /// with `can-reject-parse`, rejected this send outright.
    #[error("{message}")]
    RejectedByRestriction { message: String },
    #[error("send validation failed for '{bundle_name}': {reason}")]
    SendValidationFailed { bundle_name: Atom, reason: String },
    #[error("scheduler reported an internal error: {0}")]
    Internal(String),
}

impl Clone for ParseError {
    fn clone(&self) -> Self {
        match self {
            ParseError::NoSolution {
                position,
                describers,
            } => ParseError::NoSolution {
                position: *position,
                describers: describers.clone(),
            },
            ParseError::Ambiguous {
                position,
                candidate_count,
                diff_description,
            } => ParseError::Ambiguous {
                position: *position,
                candidate_count: *candidate_count,
                diff_description: diff_description.clone(),
            },
            ParseError::BundleTree(e) => ParseError::BundleTree(e.clone()),
            ParseError::RejectedByRestriction { message } => ParseError::RejectedByRestriction {
                message: message.clone(),
            },
            ParseError::SendValidationFailed { bundle_name, reason } => {
                ParseError::SendValidationFailed {
                    bundle_name: bundle_name.clone(),
                    reason: reason.clone(),
                }
            }
            ParseError::Internal(s) => ParseError::Internal(s.clone()),
        }
    }
}

/// Outcome of invoking a macro body or a semantic restriction (§4.D,
/// Open Question 3): the cleaned-up, `Result`-based replacement for
/// the original source's distinguished reject-parsing exception.
#[derive(Debug, Error, Clone)]
pub enum RestrictionOutcome {
    #[error("rejected: {message}")]
    Rejected { message: String },
    #[error("restriction body failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error, Clone)]
pub enum MacroOutcome {
    #[error("rejected: {message}")]
    Rejected { message: String },
    #[error("macro body failed: {0}")]
    Failed(String),
}
