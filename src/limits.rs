//! The limit manager (C9, spec §4.9): apportions a game-level search budget
//! across individual moves.

use std::time::Duration;

/// A budget as the caller (UCI front-end, in the out-of-scope sense of
/// spec §1) expresses it.
#[derive(Clone, Copy, Debug)]
pub enum SearchLimit {
    NodesPerMove(u64),
    SecondsPerMove(f64),
    /// `(total_nodes_for_the_game, increment_per_move)`.
    NodesForAllMoves(u64, u64),
    /// `(total_seconds_for_the_game, increment_per_move_seconds)`.
    SecondsForAllGame(f64, f64),
}

/// What a `LimitManager` hands back for one move: a target (nodes and/or
/// wall-clock), plus a multiplier a caller may use to extend the budget
/// further when the position looks unstable.
#[derive(Clone, Copy, Debug)]
pub struct MoveBudget {
    pub target_nodes: Option<u64>,
    pub target_duration: Option<Duration>,
    pub think_harder: f32,
}

/// Per-game state a `LimitManager` consults to apportion the next move
/// (spec §4.9 "game history (times per prior move, root N, root Q)").
#[derive(Clone, Debug, Default)]
pub struct GameHistory {
    pub moves_played: u32,
    pub time_per_move: Vec<Duration>,
    pub nodes_per_move: Vec<u64>,
    pub last_root_q: f32,
}

impl GameHistory {
    pub fn record_move(&mut self, duration: Duration, nodes: u64, root_q: f32) {
        self.moves_played += 1;
        self.time_per_move.push(duration);
        self.nodes_per_move.push(nodes);
        self.last_root_q = root_q;
    }
}

/// Apportions a game-level budget to individual moves. The apportioning
/// must be deterministic given its inputs (spec §4.9); callers may supply
/// a custom implementation in place of [`DefaultLimitManager`].
pub trait LimitManager: Send + Sync {
    fn apportion(&self, limit: SearchLimit, history: &GameHistory) -> MoveBudget;
}

/// Assumes a game lasts roughly `ASSUMED_TOTAL_MOVES` plies and apportions
/// the remaining budget evenly over the moves not yet played, then scales
/// by how unsettled the last move's root `Q` was (closer to 0 — a
/// contested position — earns a larger multiplier; closer to +-1 — a
/// position already decided — earns a smaller one). This is the "logistic
/// allocation ... scaled by Q volatility" default spec §4.9 calls for.
pub struct DefaultLimitManager;

const ASSUMED_TOTAL_MOVES: f64 = 60.0;
const MIN_REMAINING_MOVES: f64 = 8.0;

impl DefaultLimitManager {
    fn expected_remaining_moves(&self, history: &GameHistory) -> f64 {
        (ASSUMED_TOTAL_MOVES - history.moves_played as f64).max(MIN_REMAINING_MOVES)
    }

    /// In `[1.0, 1.5]`: 1.5 at a perfectly balanced root (`Q == 0`), decaying
    /// toward 1.0 as the position becomes more one-sided.
    fn instability_multiplier(&self, history: &GameHistory) -> f64 {
        1.0 + 0.5 * (1.0 - history.last_root_q.abs() as f64)
    }
}

impl LimitManager for DefaultLimitManager {
    fn apportion(&self, limit: SearchLimit, history: &GameHistory) -> MoveBudget {
        let think_harder = self.instability_multiplier(history) as f32;
        match limit {
            SearchLimit::NodesPerMove(n) => MoveBudget {
                target_nodes: Some(n),
                target_duration: None,
                think_harder: 1.0,
            },
            SearchLimit::SecondsPerMove(s) => MoveBudget {
                target_nodes: None,
                target_duration: Some(Duration::from_secs_f64(s.max(0.0))),
                think_harder: 1.0,
            },
            SearchLimit::NodesForAllMoves(total, inc) => {
                let remaining = self.expected_remaining_moves(history);
                let per_move = total as f64 / remaining + inc as f64;
                let nodes = (per_move * self.instability_multiplier(history)).round().max(1.0) as u64;
                MoveBudget {
                    target_nodes: Some(nodes),
                    target_duration: None,
                    think_harder,
                }
            }
            SearchLimit::SecondsForAllGame(total, inc) => {
                let remaining = self.expected_remaining_moves(history);
                let per_move = total / remaining + inc;
                let seconds = (per_move * self.instability_multiplier(history)).max(0.0);
                MoveBudget {
                    target_nodes: None,
                    target_duration: Some(Duration::from_secs_f64(seconds)),
                    think_harder,
                }
            }
        }
    }
}
