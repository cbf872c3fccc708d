//! The search manager (C8, spec §4.8): owns one per-move search — root
//! preloading, driving the search flow until the limit manager's budget is
//! exhausted (or futility fires), progress callbacks, and best-move choice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use rand::distributions::{Distribution, WeightedIndex};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheMode};
use crate::config::Config;
use crate::error::SearchError;
use crate::evaluator::{extract_legal_priors, Evaluator};
use crate::flow;
use crate::limits::MoveBudget;
use crate::node::{ChildSlot, Node, NodeIndex};
use crate::position::{BasicTerminal, Position, Terminal};
use crate::tree::Tree;

/// `cp = round(CP_SCALE * tan(CP_COEFF * Q))` (spec §6; the exact constants
/// are an open question the source leaves unresolved — SPEC_FULL.md fixes
/// these as the documented mapping).
const CP_SCALE: f32 = 111.714640912;
const CP_COEFF: f32 = 1.5620688421;

pub fn q_to_centipawns(q: f32) -> i32 {
    (CP_SCALE * (CP_COEFF * q).tan()).round() as i32
}

/// One progress-callback payload (spec §6 "UCI front-end contract").
#[derive(Clone, Debug)]
pub struct ProgressSnapshot<M> {
    pub nodes: u64,
    pub nps: f64,
    /// Length of the current most-visited descent from the root, used as
    /// an average-selection-depth proxy.
    pub depth: f32,
    pub score_cp: i32,
    pub pv: Vec<M>,
    pub time_ms: u64,
    pub wdl: (f32, f32, f32),
}

/// One row of the root's child table, for diagnostics/UI (SPEC_FULL.md §B).
#[derive(Clone, Debug)]
pub struct RootChildSummary<M> {
    pub mv: M,
    pub n: u32,
    pub q: Option<f32>,
    pub p: f32,
}

pub struct SearchOutcome<P: Position> {
    pub best_move: Option<P::Move>,
    pub best_move_root: Option<NodeIndex>,
    pub root_n_when_search_started: u64,
    pub final_root_n: u64,
    pub root_child_summary: Vec<RootChildSummary<P::Move>>,
}

/// Runs one per-move search to completion: expands the root if needed,
/// drives the search flow until `budget` (or futility) says stop, and
/// returns the chosen move plus diagnostics.
pub fn run_search<P>(
    tree: &Tree<P>,
    config: &Config,
    primary: &dyn Evaluator<P>,
    secondary: Option<&dyn Evaluator<P>>,
    budget: MoveBudget,
    first_move_of_game: bool,
    mut progress_callback: Option<Box<dyn FnMut(ProgressSnapshot<P::Move>) + Send>>,
) -> Result<SearchOutcome<P>, SearchError>
where
    P: Position,
    P::Move: PartialEq,
{
    if tree.current_position().basic_terminal() != BasicTerminal::NonTerminal {
        return Err(SearchError::TerminalAtRoot);
    }

    let root_n_when_search_started = tree.node(tree.root()).visits() as u64;

    if !tree.node(tree.root()).is_expanded() {
        synchronous_preload(tree, config, primary)?;
    }

    let stop = AtomicBool::new(false);
    let start = Instant::now();

    // Progress dispatch runs on its own thread reading a bounded
    // single-slot channel, so the callback is never invoked concurrently
    // with itself (spec §9 "Callback ordering") and a slow consumer simply
    // causes `try_send` to drop a stale snapshot rather than backing up
    // the monitor loop.
    let (progress_tx, progress_rx) = bounded::<ProgressSnapshot<P::Move>>(1);
    let dispatcher = progress_callback.take().map(|mut cb| {
        thread::spawn(move || {
            while let Ok(snapshot) = progress_rx.recv() {
                cb(snapshot);
            }
        })
    });

    let flow_result = thread::scope(|scope| {
        let poll_interval = Duration::from_millis(config.progress_interval_ms.max(1));
        let monitor = scope.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(poll_interval);
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let elapsed = start.elapsed();
                let n = tree.node(tree.root()).visits() as u64;

                if budget.target_nodes.is_some_and(|target| n >= target) {
                    debug!(nodes = n, "node budget reached");
                    stop.store(true, Ordering::Relaxed);
                } else if budget.target_duration.is_some_and(|target| elapsed >= target) {
                    debug!(?elapsed, "time budget reached");
                    stop.store(true, Ordering::Relaxed);
                } else if config.futility_pruning_stop_search_enabled {
                    if let Some(remaining) = remaining_budget_nodes(&budget, n, elapsed) {
                        if futility_triggered(tree, remaining) {
                            debug!(remaining, "futility stop: leading move cannot be caught");
                            stop.store(true, Ordering::Relaxed);
                        }
                    }
                }

                let _ = progress_tx.try_send(build_snapshot(tree, elapsed, n));
            }
        });

        let result = flow::drive(tree, config, primary, secondary, &stop);
        stop.store(true, Ordering::Relaxed);
        let _ = monitor.join();
        result
    });

    drop(progress_tx);
    if let Some(handle) = dispatcher {
        let _ = handle.join();
    }

    let lane_leaves = flow_result?;
    let final_root_n = tree.node(tree.root()).visits() as u64;
    info!(
        nodes = final_root_n,
        lane0 = lane_leaves[0],
        lane1 = lane_leaves[1],
        "search complete"
    );

    let (best_move, best_move_root, root_child_summary) = select_best_move(tree, config, first_move_of_game);
    if best_move.is_none() {
        warn!("search produced no legal root child; position may be terminal");
    }

    debug_assert_search_invariants(tree, &root_child_summary);

    Ok(SearchOutcome {
        best_move,
        best_move_root,
        root_n_when_search_started,
        final_root_n,
        root_child_summary,
    })
}

/// Debug-only sanity checks run once at the end of every search (no effect
/// in release builds): the virtual-loss invariant (both lanes' in-flight
/// counters settle back to zero at the root once the flow threads have
/// joined) and the policy-mass invariant (an expanded root's renormalized
/// priors sum to ~1).
fn debug_assert_search_invariants<P: Position>(tree: &Tree<P>, root_child_summary: &[RootChildSummary<P::Move>]) {
    debug_assert_eq!(tree.node(tree.root()).inflight(0), 0, "lane 0 virtual loss must be cleared by search end");
    debug_assert_eq!(tree.node(tree.root()).inflight(1), 0, "lane 1 virtual loss must be cleared by search end");

    if !root_child_summary.is_empty() {
        let total: f32 = root_child_summary.iter().map(|c| c.p).sum();
        debug_assert!((total - 1.0).abs() < 1e-3, "root priors summed to {total}, expected ~1.0");
    }
}

fn remaining_budget_nodes(budget: &MoveBudget, current_n: u64, elapsed: Duration) -> Option<u64> {
    if let Some(target) = budget.target_nodes {
        return Some(target.saturating_sub(current_n));
    }
    let target_duration = budget.target_duration?;
    let remaining_secs = (target_duration.as_secs_f64() - elapsed.as_secs_f64()).max(0.0);
    let nps = if elapsed.as_secs_f64() > 0.0 {
        current_n as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    Some((remaining_secs * nps).round() as u64)
}

fn futility_triggered<P: Position>(tree: &Tree<P>, remaining: u64) -> bool {
    let children = tree.children(tree.root());
    let mut visits: Vec<u32> = children
        .iter()
        .filter_map(|c| c.get().child().map(|idx| tree.node(idx).visits()))
        .collect();
    if visits.len() < 2 {
        return false;
    }
    visits.sort_unstable_by(|a, b| b.cmp(a));
    let lead = visits[0].saturating_sub(visits[1]) as u64;
    lead > remaining
}

fn build_snapshot<P: Position>(tree: &Tree<P>, elapsed: Duration, nodes: u64) -> ProgressSnapshot<P::Move> {
    let root = tree.node(tree.root());
    let q = root.q().unwrap_or(0.0);
    let pv = principal_variation(tree);
    let depth = pv.len() as f32;
    let time_ms = elapsed.as_millis() as u64;
    let nps = if elapsed.as_secs_f64() > 0.0 {
        nodes as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    ProgressSnapshot {
        nodes,
        nps,
        depth,
        score_cp: q_to_centipawns(q),
        pv,
        time_ms,
        wdl: wdl_avg(root),
    }
}

fn wdl_avg<M>(node: &Node<M>) -> (f32, f32, f32) {
    let n = node.visits().max(1) as f32;
    let draw = node.w_draw.load(Ordering::Acquire) / n;
    let loss = node.w_loss.load(Ordering::Acquire) / n;
    let win = (1.0 - draw - loss).max(0.0);
    (win, draw, loss)
}

fn principal_variation<P: Position>(tree: &Tree<P>) -> Vec<P::Move> {
    let mut pv = Vec::new();
    let mut cursor = tree.root();
    for _ in 0..64 {
        if !tree.node(cursor).is_expanded() {
            break;
        }
        let children = tree.children(cursor);
        let mut best: Option<(usize, u32)> = None;
        for (i, slot_ref) in children.iter().enumerate() {
            if let Some(idx) = slot_ref.get().child() {
                let n = tree.node(idx).visits();
                if best.map(|(_, best_n)| n > best_n).unwrap_or(true) {
                    best = Some((i, n));
                }
            }
        }
        match best {
            Some((i, _)) => {
                let slot = children[i].get();
                pv.push(slot.mv);
                match slot.child() {
                    Some(idx) => cursor = idx,
                    None => break,
                }
            }
            None => break,
        }
    }
    pv
}

fn select_best_move<P: Position>(
    tree: &Tree<P>,
    config: &Config,
    first_move_of_game: bool,
) -> (Option<P::Move>, Option<NodeIndex>, Vec<RootChildSummary<P::Move>>) {
    let children = tree.children(tree.root());
    let mut summary = Vec::with_capacity(children.len());
    for slot_ref in children {
        let slot = slot_ref.get();
        let (n, q) = match slot.child() {
            Some(idx) => {
                let node = tree.node(idx);
                // `node.q()` is from the child's own side to move; negate
                // it back to the root's perspective before it's exposed or
                // used for tie-breaking (spec §4.6 "Sign convention").
                (node.visits(), node.q().map(|q| -q))
            }
            None => (0, None),
        };
        summary.push(RootChildSummary { mv: slot.mv, n, q, p: slot.prior });
    }

    if summary.is_empty() {
        return (None, None, summary);
    }

    if first_move_of_game {
        if let Some(temperature) = config.first_move_sampler_temperature {
            if let Some(i) = sample_first_move_index(&summary, temperature) {
                let idx = children[i].get().child();
                return (Some(summary[i].mv), idx, summary);
            }
        }
    }

    let mut best_i = 0usize;
    for i in 1..summary.len() {
        let better = summary[i].n > summary[best_i].n
            || (summary[i].n == summary[best_i].n
                && summary[i].q.unwrap_or(f32::NEG_INFINITY) > summary[best_i].q.unwrap_or(f32::NEG_INFINITY));
        if better {
            best_i = i;
        }
    }
    let idx = children[best_i].get().child();
    (Some(summary[best_i].mv), idx, summary)
}

/// Softmax-samples among root children weighted by visit count, for
/// opening diversity on the first move of a game (spec §4.8).
fn sample_first_move_index<M>(summary: &[RootChildSummary<M>], temperature: f32) -> Option<usize> {
    let temperature = temperature.max(1e-3);
    let weights: Vec<f64> = summary
        .iter()
        .map(|c| (c.n as f64).max(0.0).powf(1.0 / temperature as f64))
        .collect();
    if weights.iter().all(|&w| w <= 0.0) {
        return None;
    }
    let dist = WeightedIndex::new(&weights).ok()?;
    let mut rng = rand::thread_rng();
    Some(dist.sample(&mut rng))
}

fn synchronous_preload<P: Position>(tree: &Tree<P>, config: &Config, primary: &dyn Evaluator<P>) -> Result<(), SearchError> {
    if config.root_preload_depth == 0 {
        return Ok(());
    }
    expand_node_synchronously(tree, tree.root(), tree.current_position().clone(), primary)?;

    if config.root_preload_depth >= 2 {
        let frontier: Vec<(NodeIndex, P)> = tree
            .children(tree.root())
            .iter()
            .filter_map(|slot_ref| {
                let slot = slot_ref.get();
                slot.child().map(|idx| (idx, tree.current_position().make_move(slot.mv)))
            })
            .collect();
        for (idx, position) in frontier {
            expand_node_synchronously(tree, idx, position, primary)?;
        }
    }
    Ok(())
}

/// Synchronously evaluates and expands one node (used only by root
/// preloading — during normal search, expansion happens lazily through the
/// leaf selector/applier pair instead).
fn expand_node_synchronously<P: Position>(
    tree: &Tree<P>,
    index: NodeIndex,
    position: P,
    primary: &dyn Evaluator<P>,
) -> Result<(), SearchError> {
    let node = tree.node(index);
    if node.is_expanded() {
        return Ok(());
    }
    match position.basic_terminal() {
        BasicTerminal::Checkmate => {
            node.set_terminal(Terminal::Checkmate);
            return Ok(());
        }
        BasicTerminal::Stalemate => {
            node.set_terminal(Terminal::Stalemate);
            return Ok(());
        }
        BasicTerminal::NonTerminal => {}
    }

    let outputs = primary
        .evaluate_batch(std::slice::from_ref(&position))
        .map_err(|reason| SearchError::EvaluatorFailure { reason })?;
    let eval = &outputs[0];
    node.set_v(eval.value);

    let moves = position.legal_moves();
    if moves.is_empty() {
        return Err(SearchError::InconsistentContinuation);
    }
    let priors = extract_legal_priors(&position, &moves, &eval.policy);
    let slots: Vec<ChildSlot<P::Move>> = moves.into_iter().zip(priors).map(|(mv, p)| ChildSlot::new(mv, p)).collect();
    let count = slots.len() as u32;
    let start = tree.store().alloc_children(slots)?;
    node.expand(start, count);

    if tree.cache.mode() == CacheMode::ReadWrite {
        tree.cache.insert(node.zobrist_hash, CacheEntry::from(eval));
    }
    Ok(())
}
