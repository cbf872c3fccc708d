//! Shared test fixtures: a `shakmaty`-backed `Position` implementation and a
//! couple of small evaluators, used by both the scenario and property tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shakmaty::fen::Fen;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position as ShakmatyPosition, Role, Square};

use mcts_chess_core::{BasicTerminal, EvalOutput, Evaluator, EvaluatorIdentity, Position};

/// Installs a `tracing-subscriber` fmt layer for this test binary, so the
/// crate's own `tracing` calls (it never installs a subscriber itself —
/// that's left to whatever front-end embeds it) show up under
/// `cargo test -- --nocapture`. Safe to call from every test; only the
/// first call actually installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A `Copy`-friendly move handle: `shakmaty::Move` itself owns a `Role` enum
/// for captures/en-passant and isn't `Copy`, so moves are re-resolved against
/// `legal_moves()` by this `(from, to, promotion)` triple whenever they need
/// to be replayed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TestMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
}

impl TestMove {
    pub fn uci(&self) -> String {
        let promo = match self.promotion {
            Some(Role::Queen) => "q",
            Some(Role::Rook) => "r",
            Some(Role::Bishop) => "b",
            Some(Role::Knight) => "n",
            Some(_) | None => "",
        };
        format!("{}{}{}", self.from, self.to, promo)
    }
}

#[derive(Clone)]
pub struct TestPosition {
    pos: Chess,
}

impl TestPosition {
    pub fn startpos() -> Self {
        TestPosition { pos: Chess::default() }
    }

    pub fn from_fen(fen: &str) -> Self {
        let fen: Fen = fen.parse().expect("valid FEN");
        let pos: Chess = fen
            .into_position(CastlingMode::Standard)
            .expect("legal starting position");
        TestPosition { pos }
    }

    fn shakmaty_move(&self, mv: TestMove) -> shakmaty::Move {
        self.pos
            .legal_moves()
            .into_iter()
            .find(|m| m.from() == Some(mv.from) && m.to() == mv.to && m.promotion() == mv.promotion)
            .expect("TestMove must come from this position's legal_moves()")
    }
}

impl Position for TestPosition {
    type Move = TestMove;

    fn legal_moves(&self) -> Vec<TestMove> {
        self.pos
            .legal_moves()
            .into_iter()
            .map(|m| TestMove {
                from: m.from().expect("no null moves in standard chess"),
                to: m.to(),
                promotion: m.promotion(),
            })
            .collect()
    }

    fn make_move(&self, mv: TestMove) -> Self {
        let full_move = self.shakmaty_move(mv);
        let mut pos = self.pos.clone();
        pos.play_unchecked(full_move);
        TestPosition { pos }
    }

    fn zobrist_hash(&self) -> u64 {
        self.pos.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0
    }

    fn halfmove_clock(&self) -> u32 {
        self.pos.halfmoves()
    }

    fn basic_terminal(&self) -> BasicTerminal {
        if self.pos.legal_moves().is_empty() {
            if self.pos.is_checkmate() {
                BasicTerminal::Checkmate
            } else {
                BasicTerminal::Stalemate
            }
        } else {
            BasicTerminal::NonTerminal
        }
    }

    fn move_policy_index(&self, mv: &TestMove) -> usize {
        mv.from as usize * 64 + mv.to as usize
    }
}

/// Dense policy width for the `from*64 + to` index scheme above. Promotions
/// collide on the same index as their underlying non-promotion move; this is
/// harmless since `extract_legal_priors` renormalizes over the legal move
/// list regardless of index collisions.
pub const POLICY_WIDTH: usize = 64 * 64;

/// Assigns `value = 0` and a uniform policy to every position, matching the
/// "mock evaluator" framing used throughout these tests.
pub struct MockEvaluator {
    identity: EvaluatorIdentity,
}

impl MockEvaluator {
    pub fn new() -> Self {
        MockEvaluator {
            identity: EvaluatorIdentity {
                network_id: "mock".to_string(),
                data_type: "f32".to_string(),
                input_encoding: "test".to_string(),
            },
        }
    }
}

impl Evaluator<TestPosition> for MockEvaluator {
    fn evaluate_batch(&self, positions: &[TestPosition]) -> Result<Vec<EvalOutput>, String> {
        Ok(positions
            .iter()
            .map(|_| EvalOutput {
                value: 0.0,
                wdl: (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0),
                moves_left: 40.0,
                policy: vec![1.0; POLICY_WIDTH],
            })
            .collect())
    }

    fn identity(&self) -> EvaluatorIdentity {
        self.identity.clone()
    }

    fn policy_width(&self) -> usize {
        POLICY_WIDTH
    }
}

/// Wraps another evaluator and counts how many positions were ever handed to
/// `evaluate_batch`, used to check that cache/peer reuse actually avoids
/// redundant evaluator calls.
pub struct CountingEvaluator<E> {
    inner: E,
    calls: Arc<AtomicUsize>,
}

impl<E> CountingEvaluator<E> {
    pub fn new(inner: E) -> Self {
        CountingEvaluator {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<P: Position, E: Evaluator<P>> Evaluator<P> for CountingEvaluator<E> {
    fn evaluate_batch(&self, positions: &[P]) -> Result<Vec<EvalOutput>, String> {
        self.calls.fetch_add(positions.len(), Ordering::SeqCst);
        self.inner.evaluate_batch(positions)
    }

    fn identity(&self) -> EvaluatorIdentity {
        self.inner.identity()
    }

    fn policy_width(&self) -> usize {
        self.inner.policy_width()
    }

    fn warmup(&self) {
        self.inner.warmup()
    }
}
