//! The position / move-gen contract (spec §6). The core never implements
//! chess rules itself; it is generic over any type satisfying [`Position`].
//! A real front-end plugs in a real move generator (shakmaty, in this
//! crate's own tests); the core only ever calls through this trait.

use std::fmt::Debug;

/// Outcome of `Position::basic_terminal`, before the tree layer folds in
/// repetition/50-move detection (which needs ancestor history the bare
/// position does not carry on its own).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BasicTerminal {
    NonTerminal,
    Checkmate,
    Stalemate,
}

/// The full terminal classification stored on a `Node` (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terminal {
    NonTerminal,
    Checkmate,
    Draw,
    Stalemate,
}

impl Terminal {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Terminal::NonTerminal)
    }

    /// Value of this outcome from the perspective of the side to move at
    /// the terminal node. Checkmate is a loss for the side to move (they
    /// have no escape), draws/stalemates are 0.
    pub fn value(self) -> Option<f32> {
        match self {
            Terminal::NonTerminal => None,
            Terminal::Checkmate => Some(-1.0),
            Terminal::Draw | Terminal::Stalemate => Some(0.0),
        }
    }
}

/// Identity of an evaluator, used to decide whether two sessions may share
/// cached evaluations (spec §4.10 peer-reuse compatibility).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvaluatorIdentity {
    pub network_id: String,
    pub data_type: String,
    pub input_encoding: String,
}

/// The position / move-gen contract external collaborators must satisfy.
///
/// Implementations must provide a stable move ordering (the order
/// `legal_moves` returns must match the ordering used by
/// `move_policy_index`, and must be deterministic for a given position) so
/// that child slots, policy extraction, and property tests (spec §8, P5)
/// all agree on "the" ordering of a position's children.
pub trait Position: Clone + Send + Sync + 'static {
    /// Opaque move handle. Does not need to carry SAN/UCI notation — the
    /// core never prints moves, it only compares and re-applies them.
    type Move: Copy + Eq + Debug + Send + Sync;

    /// Enumerates legal moves in a stable order.
    fn legal_moves(&self) -> Vec<Self::Move>;

    /// Applies `mv`, returning the resulting position. `mv` must have come
    /// from `self.legal_moves()`.
    fn make_move(&self, mv: Self::Move) -> Self;

    /// 64-bit Zobrist-style position key, including side to move, castling
    /// rights and en-passant square. Collisions are treated as equal for
    /// caching purposes only (spec §3 invariant).
    fn zobrist_hash(&self) -> u64;

    /// Half-moves since the last capture or pawn push, for 50-move
    /// detection at the tree layer.
    fn halfmove_clock(&self) -> u32;

    /// Checkmate/stalemate/non-terminal classification that does not
    /// require ancestor history (draws by repetition/50-move are folded in
    /// by the terminal evaluator, which has access to the search's
    /// supplied history and the tree's ancestor chain).
    fn basic_terminal(&self) -> BasicTerminal;

    /// Maps a legal move to its index in the evaluator's dense policy
    /// vector. Must be consistent with the evaluator's `policy_width()`.
    fn move_policy_index(&self, mv: &Self::Move) -> usize;
}

/// A position plus the hash history of the game line leading to it,
/// supplied once at the start of a search (spec §3 "Tree" and §4.4 item 1).
/// The history is oldest-first and does not include `current`'s own hash.
#[derive(Clone, Debug)]
pub struct PositionWithHistory<P: Position> {
    pub current: P,
    pub hash_history: Vec<u64>,
}

impl<P: Position> PositionWithHistory<P> {
    pub fn new(current: P) -> Self {
        PositionWithHistory {
            current,
            hash_history: Vec::new(),
        }
    }

    pub fn with_history(current: P, hash_history: Vec<u64>) -> Self {
        PositionWithHistory {
            current,
            hash_history,
        }
    }
}
