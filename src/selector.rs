//! The leaf selector (C5, spec §4.5): PUCT descent with virtual loss,
//! producing one batch of leaves per call. Node creation is lazy — a child
//! slot has no `Node` behind it until the first descent that chooses it,
//! at which point that freshly allocated node *is* the leaf for this
//! descent (mirrors the teacher's own "expand on first visit" MCTS).

use std::collections::HashSet;

use crate::config::Config;
use crate::error::SearchError;
use crate::leaf_chain::{classify_leaf, LeafClassification};
use crate::node::{Node, NodeIndex};
use crate::position::{Position, Terminal};
use crate::store::{ChildSlotRef, NodeStore};
use crate::tree::Tree;

/// One selected leaf: its index, the reconstructed position at that node,
/// how the leaf evaluator chain classified it, and every node this descent
/// added virtual loss to (in the order it was added), so a failed batch can
/// roll the lane's virtual loss back exactly (spec §7).
pub struct BatchLeaf<P: Position> {
    pub index: NodeIndex,
    pub position: P,
    pub classification: LeafClassification,
    pub inflight_path: Vec<NodeIndex>,
}

/// Runs PUCT descents from the root until `target_batch_size` distinct
/// leaves are collected or `config.max_descents_per_batch` is reached,
/// applying virtual loss (lane `lane`) along each descended path.
pub fn select_batch<P>(
    tree: &Tree<P>,
    config: &Config,
    lane: usize,
    target_batch_size: usize,
) -> Result<Vec<BatchLeaf<P>>, SearchError>
where
    P: Position,
    P::Move: PartialEq,
{
    let mut batch = Vec::new();
    let mut seen = HashSet::new();
    let mut descents = 0usize;

    while batch.len() < target_batch_size && descents < config.max_descents_per_batch {
        descents += 1;

        let mut cursor = tree.root();
        let mut position = tree.current_position().clone();
        let mut path_hashes = Vec::new();
        let mut inflight_path = Vec::new();

        loop {
            let node = tree.node(cursor);
            path_hashes.push(node.zobrist_hash);

            let terminal = node.terminal();
            if terminal.is_terminal() {
                let value = terminal.value().unwrap();
                batch.push(BatchLeaf {
                    index: cursor,
                    position,
                    classification: LeafClassification::Terminal {
                        terminal,
                        value,
                        wdl: terminal_wdl(terminal),
                    },
                    inflight_path,
                });
                break;
            }

            if !node.is_expanded() {
                if !seen.insert(cursor) {
                    // Another descent in this same batch already claimed
                    // this pending leaf; don't collide with it (spec §8 P6
                    // / scenario 6, "virtual-loss suppression").
                    break;
                }
                node.add_inflight(lane);
                inflight_path.push(cursor);
                let window = full_window(&path_hashes, &tree.position_history.hash_history);
                let classification = classify_leaf(tree, cursor, &position, &window);
                batch.push(BatchLeaf {
                    index: cursor,
                    position,
                    classification,
                    inflight_path,
                });
                break;
            }

            let children = tree.children(cursor);
            if children.is_empty() {
                // A non-terminal, expanded node with no children is a
                // fatal consistency error (spec §4.5 edge cases).
                return Err(SearchError::InconsistentContinuation);
            }
            let chosen = select_child(node, children, tree.store(), config);
            let slot = children[chosen].get();

            let (child_index, next_position) = match slot.child() {
                Some(idx) => (idx, position.make_move(slot.mv)),
                None => {
                    let next_position = position.make_move(slot.mv);
                    let hash = next_position.zobrist_hash();
                    let new_node = Node::new_child(cursor, chosen as u32, slot.mv, slot.prior, hash);
                    let idx = tree.store().alloc_node(new_node)?;
                    slot.publish_child(idx);
                    tree.register_position(hash, idx);
                    (idx, next_position)
                }
            };

            tree.node(child_index).add_inflight(lane);
            inflight_path.push(child_index);
            position = next_position;
            cursor = child_index;
        }
    }

    Ok(batch)
}

fn terminal_wdl(terminal: Terminal) -> (f32, f32, f32) {
    match terminal {
        Terminal::Checkmate => (0.0, 0.0, 1.0),
        Terminal::Draw | Terminal::Stalemate => (0.0, 1.0, 0.0),
        Terminal::NonTerminal => unreachable!("terminal_wdl called on a non-terminal node"),
    }
}

fn full_window(path_hashes: &[u64], pre_root_history: &[u64]) -> Vec<u64> {
    let mut window = Vec::with_capacity(path_hashes.len() + pre_root_history.len());
    window.extend_from_slice(path_hashes);
    window.extend_from_slice(pre_root_history);
    window
}

/// `cpuct` grows logarithmically with the parent's total visit count, the
/// usual AlphaZero-style schedule (spec §4.5 "`cpuct` follows a configured
/// schedule (may depend on `sum_N`)").
fn cpuct_for(sum_n: f32, config: &Config) -> f32 {
    config.cpuct_init + config.cpuct_factor * ((sum_n + config.cpuct_base + 1.0) / config.cpuct_base).ln()
}

/// Picks the highest-PUCT-score child of `node`, given its `children`
/// slots. Ties broken by higher prior, then by lower index (spec §4.5).
fn select_child<M: Copy>(
    node: &Node<M>,
    children: &[ChildSlotRef<M>],
    store: &NodeStore<M>,
    config: &Config,
) -> usize {
    let sum_n: f32 = children
        .iter()
        .map(|c| match c.get().child() {
            Some(idx) => store.node(idx).effective_n() as f32,
            None => 0.0,
        })
        .sum();
    let cpuct = cpuct_for(sum_n, config);
    let sqrt_sum_n = sum_n.sqrt();
    let parent_q = node.q().unwrap_or(0.0);

    let mut best_idx = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    let mut best_prior = f32::NEG_INFINITY;

    for (i, slot_ref) in children.iter().enumerate() {
        let slot = slot_ref.get();
        let (child_q, effective_n) = match slot.child() {
            Some(idx) => {
                let child_node = store.node(idx);
                (child_node.effective_q(config.virtual_loss), child_node.effective_n())
            }
            None => (None, 0),
        };
        // `child_q` is from the child's own side-to-move perspective;
        // negate it to score from the parent's perspective. Unvisited
        // children fall back to FPU: the parent's own Q, discounted.
        let q_for_parent = match child_q {
            Some(q) => -q,
            None => parent_q - config.fpu_reduction,
        };
        let score = q_for_parent + cpuct * slot.prior * sqrt_sum_n / (1.0 + effective_n as f32);

        if score > best_score || (score == best_score && slot.prior > best_prior) {
            best_score = score;
            best_prior = slot.prior;
            best_idx = i;
        }
    }

    best_idx
}

#[cfg(test)]
mod tests;
