//! The neural-network evaluator contract (spec §6). The core submits
//! batches of positions and consumes `value`/`wdl`/`moves_left`/`policy`;
//! it never computes any of these itself.

use crate::position::{EvaluatorIdentity, Position};

/// One position's worth of NN output.
#[derive(Clone, Debug)]
pub struct EvalOutput {
    /// Value in `[-1, 1]` from the perspective of the side to move.
    pub value: f32,
    /// Win/draw/loss probabilities, summing to 1 (approximately).
    pub wdl: (f32, f32, f32),
    /// Predicted remaining plies until game end.
    pub moves_left: f32,
    /// Dense policy vector indexed by the evaluator's move encoding. The
    /// leaf evaluator chain extracts and renormalizes the legal subset.
    pub policy: Vec<f32>,
}

/// Aggregate statistics an evaluator may expose so the search can size its
/// batches (spec §6, and `BatchParamsManager` in SPEC_FULL.md §B).
#[derive(Clone, Copy, Debug, Default)]
pub struct EvaluatorStats {
    /// Mean wall-clock time, in microseconds, to evaluate one batch.
    pub mean_batch_latency_us: f32,
    /// Throughput in positions/second sustained over recent batches.
    pub positions_per_second: f32,
}

/// A batch NN evaluator. Implementations own their own worker pool /
/// device placement; the core only ever calls `evaluate_batch`.
pub trait Evaluator<P: Position>: Send + Sync {
    /// Evaluates a batch of positions, returning one `EvalOutput` per
    /// input position in the same order. Implementations should return an
    /// `Err` (surfaced to the caller as `SearchError::EvaluatorFailure`)
    /// rather than panicking on a malformed batch.
    fn evaluate_batch(&self, positions: &[P]) -> Result<Vec<EvalOutput>, String>;

    /// Identity used to decide peer-reuse compatibility (spec §4.10).
    fn identity(&self) -> EvaluatorIdentity;

    /// Width of the dense policy vector this evaluator produces.
    fn policy_width(&self) -> usize;

    /// Optional warmup hook, e.g. to prime a GPU kernel cache.
    fn warmup(&self) {}

    /// Optional statistics hook used to size batches.
    fn calc_statistics(&self) -> EvaluatorStats {
        EvaluatorStats::default()
    }
}

/// Extracts and renormalizes the legal-move priors from a dense policy
/// vector. Values in `raw` are treated as nonnegative relative likelihoods
/// (already exponentiated, as typical policy heads emit); the legal subset
/// is summed and divided through. Falls back to a uniform distribution if
/// the extracted mass is zero (e.g. a policy head that hasn't trained past
/// a degenerate state yet), so callers never receive NaNs.
pub fn extract_legal_priors<P: Position>(
    position: &P,
    moves: &[P::Move],
    raw_policy: &[f32],
) -> Vec<f32> {
    let mut priors: Vec<f32> = moves
        .iter()
        .map(|mv| {
            let idx = position.move_policy_index(mv);
            raw_policy.get(idx).copied().unwrap_or(0.0).max(0.0)
        })
        .collect();

    let total: f32 = priors.iter().sum();
    if total > 0.0 {
        for p in priors.iter_mut() {
            *p /= total;
        }
    } else if !priors.is_empty() {
        let uniform = 1.0 / priors.len() as f32;
        priors.iter_mut().for_each(|p| *p = uniform);
    }
    priors
}
