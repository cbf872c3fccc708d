//! The batch applier (C6, spec §4.6): writes NN (or cache/transposition/
//! terminal) results into the tree and backs up statistics from leaf to
//! root, clearing the virtual loss laid down by the selector.

use crate::cache::CacheEntry;
use crate::config::Config;
use crate::error::SearchError;
use crate::evaluator::{extract_legal_priors, EvalOutput};
use crate::leaf_chain::LeafClassification;
use crate::node::{ChildSlot, NodeIndex};
use crate::position::Position;
use crate::selector::BatchLeaf;
use crate::store::NodeStore;
use crate::tree::Tree;

/// Applies one resolved leaf. `primary`/`secondary` are only consulted
/// (and must be `Some`) when `leaf.classification` is
/// [`LeafClassification::NeedsEvaluation`]; the leaf selector already
/// resolved every other classification down to a value at selection time.
pub fn apply_leaf<P: Position>(
    tree: &Tree<P>,
    config: &Config,
    leaf: &BatchLeaf<P>,
    lane: usize,
    primary: Option<&EvalOutput>,
    secondary: Option<&EvalOutput>,
) -> Result<(), SearchError> {
    match &leaf.classification {
        LeafClassification::Terminal { terminal, value, wdl } => {
            tree.node(leaf.index).set_terminal(*terminal);
            backup_path(tree.store(), leaf.index, *value, *wdl, 0.0, lane);
        }

        LeafClassification::CacheHit(entry) => {
            expand_from_entry(tree, leaf, entry)?;
            backup_path(tree.store(), leaf.index, entry.value, entry.wdl, entry.moves_left, lane);
        }

        LeafClassification::PeerCacheHit(entry) => {
            expand_from_entry(tree, leaf, entry)?;
            // Mirror the borrowed evaluation into this tree's own cache so
            // a later visit (or a third peer) doesn't need to re-ask the
            // peer (spec §8 scenario 5: fewer evaluator calls under reuse).
            let hash = tree.node(leaf.index).zobrist_hash;
            tree.cache.insert(hash, entry.clone());
            backup_path(tree.store(), leaf.index, entry.value, entry.wdl, entry.moves_left, lane);
        }

        LeafClassification::TranspositionLinked(target) => {
            let target_node = tree.node(*target);
            tree.node(leaf.index).set_transposition_link(*target);
            // Borrow the target's current aggregate statistics as this
            // visit's result; no children are allocated for the leaf (spec
            // §4.6 item 3), so future descents keep re-resolving through
            // the transposition chain rather than growing a duplicate
            // subtree.
            let value = target_node.q().unwrap_or(0.0);
            let n = target_node.visits().max(1) as f32;
            let wdl = (
                (1.0 - target_node.w_draw.load(std::sync::atomic::Ordering::Acquire) / n
                    - target_node.w_loss.load(std::sync::atomic::Ordering::Acquire) / n)
                    .max(0.0),
                target_node.w_draw.load(std::sync::atomic::Ordering::Acquire) / n,
                target_node.w_loss.load(std::sync::atomic::Ordering::Acquire) / n,
            );
            let moves_left = target_node.moves_left_avg().unwrap_or(0.0);
            backup_path(tree.store(), leaf.index, value, wdl, moves_left, lane);
        }

        LeafClassification::NeedsEvaluation => {
            let primary = primary.expect("NeedsEvaluation leaf must carry a primary eval result");
            expand_from_eval(tree, leaf, primary)?;
            if config.secondary_network_id.is_some() {
                if let Some(secondary) = secondary {
                    tree.node(leaf.index).set_v_secondary(secondary.value);
                }
            }
            if tree.cache.mode() == crate::cache::CacheMode::ReadWrite {
                let hash = tree.node(leaf.index).zobrist_hash;
                tree.cache.insert(hash, CacheEntry::from(primary));
            }
            backup_path(
                tree.store(),
                leaf.index,
                primary.value,
                primary.wdl,
                primary.moves_left,
                lane,
            );
        }
    }
    Ok(())
}

fn expand_from_entry<P: Position>(
    tree: &Tree<P>,
    leaf: &BatchLeaf<P>,
    entry: &CacheEntry,
) -> Result<(), SearchError> {
    let node = tree.node(leaf.index);
    if node.is_expanded() {
        return Ok(());
    }
    node.set_v(entry.value);
    let moves = leaf.position.legal_moves();
    let priors = extract_legal_priors(&leaf.position, &moves, &entry.policy);
    allocate_children(tree.store(), leaf.index, moves, priors)
}

fn expand_from_eval<P: Position>(
    tree: &Tree<P>,
    leaf: &BatchLeaf<P>,
    eval: &EvalOutput,
) -> Result<(), SearchError> {
    let node = tree.node(leaf.index);
    if node.is_expanded() {
        return Ok(());
    }
    node.set_v(eval.value);
    let moves = leaf.position.legal_moves();
    let priors = extract_legal_priors(&leaf.position, &moves, &eval.policy);
    allocate_children(tree.store(), leaf.index, moves, priors)
}

fn allocate_children<M: Copy>(
    store: &NodeStore<M>,
    index: NodeIndex,
    moves: Vec<M>,
    priors: Vec<f32>,
) -> Result<(), SearchError> {
    let count = moves.len() as u32;
    if count == 0 {
        // A non-terminal position with no legal moves should never reach
        // here (terminal detection in the leaf chain would have claimed
        // it first); treat it as the fatal consistency error spec §4.5
        // calls out.
        return Err(SearchError::InconsistentContinuation);
    }
    let slots: Vec<ChildSlot<M>> = moves
        .into_iter()
        .zip(priors)
        .map(|(mv, p)| ChildSlot::new(mv, p))
        .collect();
    let start = store.alloc_children(slots)?;
    store.node(index).expand(start, count);
    Ok(())
}

/// Walks from `leaf` to the root along `parent_index`, backing up one visit
/// at each ancestor and removing this lane's virtual loss. The value/WDL
/// are expressed from the leaf's own side-to-move perspective and flipped
/// at every ply on the way up (spec §4.6 "Sign convention"). The root never
/// has virtual loss of its own to clear — the selector only marks a node
/// in-flight when it's chosen as *someone's child* (`select_batch` never
/// calls `add_inflight` on the root itself) — so it's skipped here too.
fn backup_path<M>(
    store: &NodeStore<M>,
    leaf: NodeIndex,
    value: f32,
    wdl: (f32, f32, f32),
    moves_left: f32,
    lane: usize,
) {
    let mut cursor = Some(leaf);
    let mut value = value;
    let mut wdl = wdl;
    while let Some(index) = cursor {
        let node = store.node(index);
        node.backup(value, wdl, moves_left);
        if node.parent_index.is_some() {
            node.remove_inflight(lane);
        }
        cursor = node.parent_index;
        value = -value;
        wdl = (wdl.2, wdl.1, wdl.0);
    }
}

/// Removes this lane's virtual loss from every node a descent marked
/// in-flight, without touching N/W/WDL. Used when a batch's evaluator call
/// fails after selection already laid virtual loss down along the path, so
/// the discarded batch leaves the tree exactly as it was before selection
/// (spec §7 "the in-flight batch is discarded, virtual losses are rolled
/// back").
pub(crate) fn rollback_inflight<M>(store: &NodeStore<M>, inflight_path: &[NodeIndex], lane: usize) {
    for &index in inflight_path {
        store.node(index).remove_inflight(lane);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheMode, PositionCache};
    use crate::node::Node;
    use crate::position::{BasicTerminal, PositionWithHistory};
    use std::sync::Arc;

    #[derive(Clone)]
    struct FlatPosition {
        moves: Vec<u8>,
    }

    impl Position for FlatPosition {
        type Move = u8;

        fn legal_moves(&self) -> Vec<u8> {
            self.moves.clone()
        }

        fn make_move(&self, _mv: u8) -> Self {
            FlatPosition { moves: vec![] }
        }

        fn zobrist_hash(&self) -> u64 {
            0
        }

        fn halfmove_clock(&self) -> u32 {
            0
        }

        fn basic_terminal(&self) -> BasicTerminal {
            BasicTerminal::NonTerminal
        }

        fn move_policy_index(&self, mv: &u8) -> usize {
            *mv as usize
        }
    }

    fn fresh_tree() -> Tree<FlatPosition> {
        let cache = Arc::new(PositionCache::new(1000, CacheMode::ReadWrite));
        let root_position = FlatPosition { moves: vec![0, 1] };
        Tree::new(PositionWithHistory::new(root_position), cache, 1000, 2000).unwrap()
    }

    fn leaf_at(tree: &Tree<FlatPosition>, index: NodeIndex, classification: LeafClassification) -> BatchLeaf<FlatPosition> {
        BatchLeaf {
            index,
            position: tree.current_position().clone(),
            classification,
            inflight_path: Vec::new(),
        }
    }

    #[test]
    fn backup_path_flips_sign_and_wdl_at_every_ply() {
        let tree = fresh_tree();
        let root = tree.root();
        let child = tree
            .store()
            .alloc_node(Node::new_child(root, 0, 0u8, 0.5, 1))
            .unwrap();
        tree.node(child).add_inflight(0);

        backup_path(tree.store(), child, 0.8, (0.1, 0.2, 0.7), 15.0, 0);

        assert!((tree.node(child).q().unwrap() - 0.8).abs() < 1e-6);
        assert!((tree.node(root).q().unwrap() - (-0.8)).abs() < 1e-6);
        assert_eq!(tree.node(child).inflight(0), 0, "virtual loss must be cleared on the way up");

        // WDL is mirrored (win/loss swap, draw stays put) for the parent.
        let n = tree.node(root).visits().max(1) as f32;
        let root_w_loss = tree.node(root).w_loss.load(std::sync::atomic::Ordering::Acquire) / n;
        assert!((root_w_loss - 0.1).abs() < 1e-6, "child's win share becomes the parent's loss share");
    }

    #[test]
    fn backup_path_never_touches_the_roots_own_inflight_counter() {
        let tree = fresh_tree();
        let root = tree.root();
        let child = tree
            .store()
            .alloc_node(Node::new_child(root, 0, 0u8, 0.5, 1))
            .unwrap();
        tree.node(child).add_inflight(0);

        // The root never gets its own virtual loss marked by the selector,
        // so backing up through it must not decrement (and underflow) a
        // counter that was never incremented.
        backup_path(tree.store(), child, 0.3, (0.4, 0.3, 0.3), 10.0, 0);
        assert_eq!(tree.node(root).inflight(0), 0);
    }

    #[test]
    fn rollback_inflight_clears_every_recorded_node_without_writing_stats() {
        let tree = fresh_tree();
        let root = tree.root();
        let child = tree
            .store()
            .alloc_node(Node::new_child(root, 0, 0u8, 0.5, 1))
            .unwrap();
        // Mirrors what a single select_batch descent actually does: the
        // intermediate node on the way down gets one virtual loss, and the
        // freshly claimed pending leaf gets marked twice (once as someone's
        // child, once as the leaf itself).
        tree.node(child).add_inflight(0);
        tree.node(child).add_inflight(0);
        let path = vec![child, child];

        rollback_inflight(tree.store(), &path, 0);

        assert_eq!(tree.node(child).inflight(0), 0);
        assert_eq!(tree.node(child).visits(), 0, "rollback must not back up a never-evaluated leaf");
    }

    #[test]
    fn terminal_leaf_is_backed_up_without_expanding_children() {
        let tree = fresh_tree();
        let config = Config::default();
        let leaf = leaf_at(
            &tree,
            tree.root(),
            LeafClassification::Terminal {
                terminal: crate::position::Terminal::Checkmate,
                value: -1.0,
                wdl: (0.0, 0.0, 1.0),
            },
        );

        apply_leaf(&tree, &config, &leaf, 0, None, None).unwrap();

        assert!(!tree.node(tree.root()).is_expanded());
        assert_eq!(tree.node(tree.root()).visits(), 1);
        assert_eq!(tree.node(tree.root()).terminal(), crate::position::Terminal::Checkmate);
    }

    #[test]
    fn needs_evaluation_leaf_expands_children_and_populates_the_cache() {
        let tree = fresh_tree();
        let config = Config::default();
        let leaf = leaf_at(&tree, tree.root(), LeafClassification::NeedsEvaluation);
        let eval = EvalOutput {
            value: 0.3,
            wdl: (0.5, 0.3, 0.2),
            moves_left: 30.0,
            policy: vec![1.0, 1.0],
        };

        apply_leaf(&tree, &config, &leaf, 0, Some(&eval), None).unwrap();

        assert!(tree.node(tree.root()).is_expanded());
        assert_eq!(tree.node(tree.root()).num_policy_moves(), 2);
        assert_eq!(tree.node(tree.root()).visits(), 1);
        assert!(tree.cache.lookup(tree.node(tree.root()).zobrist_hash).is_some());
    }

    #[test]
    fn transposition_linked_leaf_borrows_the_targets_stats_without_allocating_children() {
        let tree = fresh_tree();
        let config = Config::default();
        let root = tree.root();
        tree.node(root).backup(0.4, (0.5, 0.3, 0.2), 18.0);

        let child = tree
            .store()
            .alloc_node(Node::new_child(root, 0, 0u8, 0.5, 1))
            .unwrap();
        let leaf = leaf_at(&tree, child, LeafClassification::TranspositionLinked(root));

        apply_leaf(&tree, &config, &leaf, 0, None, None).unwrap();

        assert!(!tree.node(child).is_expanded());
        assert_eq!(tree.node(child).visits(), 1);
        assert!((tree.node(child).q().unwrap() - 0.4).abs() < 1e-6);
    }
}
