//! The search flow (C7, spec §4.7): drives one or two lanes, each an
//! independent (select → classify/evaluate → apply) loop, until told to
//! stop. Two lanes genuinely overlap by each running on its own thread —
//! lane 1 keeps selecting while lane 0 is blocked inside the evaluator —
//! rather than through a hand-rolled submission queue, since `Tree` and
//! `PositionCache` are already safe to share by reference across threads
//! and `std::thread::scope` gives us that overlap for free.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::applier::{apply_leaf, rollback_inflight};
use crate::config::Config;
use crate::error::SearchError;
use crate::evaluator::{Evaluator, EvaluatorStats};
use crate::leaf_chain::LeafClassification;
use crate::node::MAX_LANES;
use crate::position::Position;
use crate::selector::select_batch;
use crate::tree::Tree;

/// Learns a `target_batch_size` per lane from the evaluator's own reported
/// throughput (spec §4.5 "set by the Batch Params Manager from historic NN
/// throughput"). Deliberately simple: an exponential moving average toward
/// the size of the last fully-collected batch, rather than modeling the
/// evaluator's latency curve directly.
pub struct BatchParamsManager {
    target_batch_size: usize,
}

impl BatchParamsManager {
    pub fn new(initial: usize) -> Self {
        BatchParamsManager {
            target_batch_size: initial.max(1),
        }
    }

    pub fn target_batch_size(&self) -> usize {
        self.target_batch_size
    }

    fn record_batch(&mut self, config: &Config, leaves_collected: usize, _stats: EvaluatorStats) {
        if !config.smart_size_batches || leaves_collected == 0 {
            return;
        }
        let observed = leaves_collected as f32;
        let smoothed = 0.8 * self.target_batch_size as f32 + 0.2 * observed;
        self.target_batch_size = (smoothed.round() as usize).max(1);
    }
}

/// Runs one (select, classify/evaluate, apply) round for `lane` and returns
/// the number of leaves it processed.
fn run_round<P>(
    tree: &Tree<P>,
    config: &Config,
    lane: usize,
    primary: &dyn Evaluator<P>,
    secondary: Option<&dyn Evaluator<P>>,
    params: &mut BatchParamsManager,
) -> Result<usize, SearchError>
where
    P: Position,
    P::Move: PartialEq,
{
    let batch = select_batch(tree, config, lane, params.target_batch_size())?;
    if batch.is_empty() {
        return Ok(0);
    }

    let needs_eval: Vec<usize> = batch
        .iter()
        .enumerate()
        .filter(|(_, leaf)| matches!(leaf.classification, LeafClassification::NeedsEvaluation))
        .map(|(i, _)| i)
        .collect();

    let (primary_outputs, secondary_outputs) = if needs_eval.is_empty() {
        (Vec::new(), None)
    } else {
        let positions: Vec<P> = needs_eval.iter().map(|&i| batch[i].position.clone()).collect();
        let primary_outputs = match primary.evaluate_batch(&positions) {
            Ok(outputs) => outputs,
            Err(reason) => {
                rollback_batch(tree, &batch, lane);
                return Err(SearchError::EvaluatorFailure { reason });
            }
        };
        let secondary_outputs = match secondary {
            Some(ev) => match ev.evaluate_batch(&positions) {
                Ok(outputs) => Some(outputs),
                Err(reason) => {
                    rollback_batch(tree, &batch, lane);
                    return Err(SearchError::EvaluatorFailure { reason });
                }
            },
            None => None,
        };
        (primary_outputs, secondary_outputs)
    };

    let mut cursor = 0usize;
    for (i, leaf) in batch.iter().enumerate() {
        let (p, s) = if needs_eval.get(cursor) == Some(&i) {
            let p = &primary_outputs[cursor];
            let s = secondary_outputs.as_ref().map(|v| &v[cursor]);
            cursor += 1;
            (Some(p), s)
        } else {
            (None, None)
        };
        apply_leaf(tree, config, leaf, lane, p, s)?;
    }

    params.record_batch(config, batch.len(), primary.calc_statistics());
    Ok(batch.len())
}

/// Undoes every leaf's virtual loss from a batch that's being discarded
/// because the evaluator failed partway through (spec §7).
fn rollback_batch<P: Position>(tree: &Tree<P>, batch: &[crate::selector::BatchLeaf<P>], lane: usize) {
    for leaf in batch {
        rollback_inflight(tree.store(), &leaf.inflight_path, lane);
    }
}

/// Drives a single lane's rounds until `stop` is set or a round returns an
/// error (which is propagated after also setting `stop`, so a sibling lane
/// notices promptly).
fn drive_lane<P>(
    tree: &Tree<P>,
    config: &Config,
    lane: usize,
    primary: &dyn Evaluator<P>,
    secondary: Option<&dyn Evaluator<P>>,
    stop: &AtomicBool,
) -> Result<u64, SearchError>
where
    P: Position,
    P::Move: PartialEq,
{
    let mut params = BatchParamsManager::new(config.initial_batch_size);
    let mut total = 0u64;
    while !stop.load(Ordering::Relaxed) {
        match run_round(tree, config, lane, primary, secondary, &mut params) {
            Ok(0) => std::thread::yield_now(),
            Ok(n) => total += n as u64,
            Err(err) => {
                stop.store(true, Ordering::Relaxed);
                return Err(err);
            }
        }
    }
    Ok(total)
}

/// Drives one or two lanes (per `config.flow_direct_overlapped`) until
/// `stop` is observed set, returning the number of leaves each lane
/// processed. The caller (the Search Manager) is responsible for setting
/// `stop` once the Limit Manager says to.
pub fn drive<P>(
    tree: &Tree<P>,
    config: &Config,
    primary: &dyn Evaluator<P>,
    secondary: Option<&dyn Evaluator<P>>,
    stop: &AtomicBool,
) -> Result<[u64; MAX_LANES], SearchError>
where
    P: Position,
    P::Move: PartialEq,
{
    if !config.flow_direct_overlapped {
        let leaves = drive_lane(tree, config, 0, primary, secondary, stop)?;
        return Ok([leaves, 0]);
    }

    std::thread::scope(|scope| {
        let h0 = scope.spawn(|| drive_lane(tree, config, 0, primary, secondary, stop));
        let h1 = scope.spawn(|| drive_lane(tree, config, 1, primary, secondary, stop));
        let r0 = h0.join().expect("search lane 0 panicked");
        let r1 = h1.join().expect("search lane 1 panicked");
        Ok([r0?, r1?])
    })
}
