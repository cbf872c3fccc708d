//! The leaf evaluator chain (C4, spec §4.4): a finite, ordered list of
//! recognized evaluator kinds, applied to each candidate leaf until one of
//! them claims it. Implemented as a tagged enum rather than open
//! inheritance, per spec §9 "Dynamic dispatch on evaluators".
//!
//! "Own-tree reuse" (spec §4.4 item 4) needs no separate stage here: a
//! node that survived `Tree::re_root` from the prior search already has
//! its policy/children populated by the compacting copy, so it is never a
//! leaf in the first place — the selector simply descends through it like
//! any other expanded node.

use crate::cache::CacheEntry;
use crate::node::NodeIndex;
use crate::position::{BasicTerminal, Position, Terminal};
use crate::tree::Tree;

#[derive(Clone, Debug)]
pub enum LeafClassification {
    /// Claimed by the terminal stage: the value/WDL are fixed forever.
    Terminal {
        terminal: Terminal,
        value: f32,
        wdl: (f32, f32, f32),
    },
    /// Claimed by the position cache (this tree's own).
    CacheHit(CacheEntry),
    /// Claimed by a peer tree's cache.
    PeerCacheHit(CacheEntry),
    /// Claimed by the transposition stage: borrow another node's stats.
    TranspositionLinked(NodeIndex),
    /// Not claimed by any local stage; must go to the NN evaluator(s).
    NeedsEvaluation,
}

/// Runs the leaf evaluator chain for a single candidate leaf. `leaf_position`
/// is the already-reconstructed position at `leaf` (the selector builds it
/// incrementally as it descends, so this avoids re-deriving it here).
/// `ancestor_hashes` is the hash of every node from the leaf up to (and
/// including, for repetition purposes) the root, followed by the externally
/// supplied pre-root game history — i.e. exactly the window the terminal
/// stage's repetition check needs (spec §4.4 item 1).
pub fn classify_leaf<P: Position>(
    tree: &Tree<P>,
    leaf: NodeIndex,
    leaf_position: &P,
    ancestor_hashes: &[u64],
) -> LeafClassification {
    let node = tree.node(leaf);

    // 1. Terminal.
    let basic = leaf_position.basic_terminal();
    let terminal = match basic {
        BasicTerminal::Checkmate => Terminal::Checkmate,
        BasicTerminal::Stalemate => Terminal::Stalemate,
        BasicTerminal::NonTerminal => {
            if leaf_position.halfmove_clock() >= 100 || is_repetition(node.zobrist_hash, ancestor_hashes) {
                Terminal::Draw
            } else {
                Terminal::NonTerminal
            }
        }
    };
    if terminal.is_terminal() {
        let value = terminal.value().unwrap();
        let wdl = match terminal {
            Terminal::Checkmate => (0.0, 0.0, 1.0),
            _ => (0.0, 1.0, 0.0),
        };
        return LeafClassification::Terminal { terminal, value, wdl };
    }

    // 2. Cache (this tree's own).
    if let Some(entry) = tree.cache.lookup(node.zobrist_hash) {
        return LeafClassification::CacheHit(entry);
    }

    // 3. Transposition (another in-tree node with N > 0).
    if let Some(target) = tree.find_transposition(node.zobrist_hash, leaf) {
        return LeafClassification::TranspositionLinked(target);
    }

    // 5. Peer-tree reuse.
    if let Some(peer) = tree.peer_cache() {
        if let Some(entry) = peer.lookup(node.zobrist_hash) {
            return LeafClassification::PeerCacheHit(entry);
        }
    }

    // 6/7. Falls through to NN primary (and secondary, if configured) —
    // handled by the caller, which owns the evaluator handles.
    LeafClassification::NeedsEvaluation
}

/// A position repeats if its hash appears anywhere in the supplied window
/// (ancestor path in the current tree plus the pre-root game history);
/// threefold repetition is conventionally a draw once the *third*
/// occurrence is reached, but since the window already includes the
/// leaf's own hash pushed by the caller before calling this, a second
/// match here is the third occurrence overall.
fn is_repetition(hash: u64, window: &[u64]) -> bool {
    window.iter().filter(|&&h| h == hash).count() >= 2
}
