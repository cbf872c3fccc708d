//! Typed error tags surfaced by the search core (see spec §7).

use thiserror::Error;

/// Errors the search core can raise. Each variant is a distinct tag; callers
/// are expected to match on the variant rather than inspect the message.
#[derive(Debug, Error)]
pub enum SearchError {
    /// `search_continue` could not walk `forward_moves` entirely within the
    /// prior tree. The caller falls back to a fresh search transparently;
    /// this variant is retained on `SearchOutcome` only for diagnostics.
    #[error("prior tree does not contain the requested continuation")]
    NotReusable,

    /// The node or child-slot pool is full. The search that triggered this
    /// is aborted; the tree built so far remains internally consistent.
    #[error("node store exhausted: capacity {capacity} nodes")]
    StoreExhausted {
        /// Capacity of the pool that was exceeded.
        capacity: usize,
    },

    /// The prior search's starting position/move line does not share an
    /// initial position with the new search. Fatal to the session: the
    /// caller must start a new `Search`.
    #[error("continuation's starting position does not match the prior search")]
    InconsistentContinuation,

    /// The NN evaluator returned an error or an ill-formed batch. The
    /// in-flight batch is discarded and virtual losses rolled back before
    /// this is surfaced.
    #[error("evaluator failure: {reason}")]
    EvaluatorFailure {
        /// Human-readable reason reported by the evaluator.
        reason: String,
    },

    /// The root position has no legal moves. Best move is reported as
    /// `None`; this is not really a failure, just a terminal-at-root report.
    #[error("root position has no legal moves")]
    TerminalAtRoot,
}

pub type Result<T> = std::result::Result<T, SearchError>;
