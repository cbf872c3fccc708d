use std::collections::HashSet;
use std::sync::Arc;

use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position as ShakmatyPosition, Square};

use super::*;
use crate::cache::{CacheMode, PositionCache};
use crate::position::{BasicTerminal, PositionWithHistory};

#[derive(Clone)]
struct ChessPosition(Chess);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct ChessMove {
    from: Square,
    to: Square,
}

impl Position for ChessPosition {
    type Move = ChessMove;

    fn legal_moves(&self) -> Vec<ChessMove> {
        self.0
            .legal_moves()
            .into_iter()
            .map(|m| ChessMove {
                from: m.from().expect("no null moves"),
                to: m.to(),
            })
            .collect()
    }

    fn make_move(&self, mv: ChessMove) -> Self {
        let full = self
            .0
            .legal_moves()
            .into_iter()
            .find(|m| m.from() == Some(mv.from) && m.to() == mv.to)
            .expect("move must be legal");
        let mut pos = self.0.clone();
        pos.play_unchecked(full);
        ChessPosition(pos)
    }

    fn zobrist_hash(&self) -> u64 {
        self.0.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0
    }

    fn halfmove_clock(&self) -> u32 {
        self.0.halfmoves()
    }

    fn basic_terminal(&self) -> BasicTerminal {
        if self.0.legal_moves().is_empty() {
            if self.0.is_checkmate() {
                BasicTerminal::Checkmate
            } else {
                BasicTerminal::Stalemate
            }
        } else {
            BasicTerminal::NonTerminal
        }
    }

    fn move_policy_index(&self, mv: &ChessMove) -> usize {
        mv.from as usize * 64 + mv.to as usize
    }
}

fn fresh_tree() -> Tree<ChessPosition> {
    let fen: shakmaty::fen::Fen = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        .parse()
        .unwrap();
    let chess: Chess = fen.into_position(CastlingMode::Standard).unwrap();
    let position = ChessPosition(chess);
    let cache = Arc::new(PositionCache::new(10_000, CacheMode::ReadWrite));
    Tree::new(PositionWithHistory::new(position), cache, 10_000, 50_000).unwrap()
}

/// Every leaf still pending evaluation within a single `select_batch` call is
/// a distinct node index: the within-batch `HashSet` dedup is what keeps two
/// descents in the same (single-lane) batch from racing to expand the same
/// pending child twice.
#[test]
fn select_batch_never_returns_duplicate_pending_leaves() {
    let tree = fresh_tree();
    let config = Config::default();

    let batch = select_batch(&tree, &config, 0, 64).unwrap();

    let mut seen = HashSet::new();
    for leaf in &batch {
        if matches!(leaf.classification, LeafClassification::NeedsEvaluation) {
            assert!(seen.insert(leaf.index), "duplicate pending leaf index {:?} within one batch", leaf.index);
        }
    }
    assert!(!batch.is_empty(), "the starting position has plenty of room for 64 distinct leaves");
}

#[test]
fn select_batch_leaves_virtual_loss_on_the_path_back_to_root() {
    let tree = fresh_tree();
    let config = Config::default();

    let batch = select_batch(&tree, &config, 0, 8).unwrap();
    assert!(!batch.is_empty());

    // Every claimed leaf's own in-flight counter on lane 0 must be nonzero
    // until the applier resolves and backs it up.
    for leaf in &batch {
        if matches!(leaf.classification, LeafClassification::NeedsEvaluation) {
            assert!(tree.node(leaf.index).inflight(0) >= 1);
        }
    }
}
