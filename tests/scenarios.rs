//! End-to-end scenarios run against a mock evaluator (value=0, uniform
//! policy), exercising the full session/search-manager/flow pipeline through
//! the public API only.

mod common;

use shakmaty::Square;

use common::{CountingEvaluator, MockEvaluator, TestMove, TestPosition};
use mcts_chess_core::{Config, EvaluatorIdentity, SearchLimit, Session};

fn identity() -> EvaluatorIdentity {
    EvaluatorIdentity {
        network_id: "mock".to_string(),
        data_type: "f32".to_string(),
        input_encoding: "test".to_string(),
    }
}

#[test]
fn fresh_start_hits_the_node_budget_and_visits_every_root_child() {
    common::init_tracing();
    let evaluator = MockEvaluator::new();
    let mut session = Session::new(TestPosition::startpos(), Config::default(), identity()).unwrap();

    let outcome = session
        .search(SearchLimit::NodesPerMove(100), &evaluator, None, None)
        .unwrap();

    assert!(outcome.final_root_n >= 100);
    assert!(outcome.best_move.is_some());
    assert_eq!(outcome.root_child_summary.len(), 20, "20 legal moves from the start position");
    for child in &outcome.root_child_summary {
        assert!(child.n >= 1, "root preloading should give every legal move at least one visit");
    }
}

#[test]
fn forced_mate_in_one_is_found_and_the_root_converges_to_a_win() {
    let evaluator = MockEvaluator::new();
    let position = TestPosition::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1");
    let mut session = Session::new(position, Config::default(), identity()).unwrap();

    let outcome = session
        .search(SearchLimit::NodesPerMove(1000), &evaluator, None, None)
        .unwrap();

    let best = outcome.best_move.expect("a legal move must be chosen");
    assert_eq!(best.uci(), "a1a8");

    let best_summary = outcome
        .root_child_summary
        .iter()
        .find(|c| c.mv.uci() == "a1a8")
        .expect("a1a8 must appear among the root's children");
    assert!(best_summary.q.unwrap_or(0.0) > 0.9, "the mating move should converge close to Q=1.0");
}

#[test]
fn stalemate_trick_is_recognized_and_avoided() {
    let evaluator = MockEvaluator::new();
    // White king h6, rook a1, black king alone on h8. Ra8# mates; Rg1 instead
    // seals off every flight square without check, stalemating black.
    let position = TestPosition::from_fen("7k/8/7K/8/8/8/8/R7 w - - 0 1");
    let mut session = Session::new(position, Config::default(), identity()).unwrap();

    let outcome = session
        .search(SearchLimit::NodesPerMove(1000), &evaluator, None, None)
        .unwrap();

    let mating_move = outcome
        .root_child_summary
        .iter()
        .find(|c| c.mv.uci() == "a1a8")
        .expect("a1a8 (mate) must be among the legal root moves");
    let stalemate_move = outcome
        .root_child_summary
        .iter()
        .find(|c| c.mv.uci() == "a1g1")
        .expect("a1g1 (stalemate) must be among the legal root moves");

    assert!(stalemate_move.q.unwrap_or(1.0) <= 0.01, "the stalemating move must be valued as a draw");
    assert!(mating_move.q.unwrap_or(-1.0) > stalemate_move.q.unwrap_or(0.0));

    let best = outcome.best_move.expect("a legal move must be chosen");
    assert_ne!(best.uci(), "a1g1", "search must not choose the move that stalemates its own opponent");
}

#[test]
fn continuation_either_reuses_enough_of_the_prior_tree_or_falls_back_cleanly() {
    let evaluator = MockEvaluator::new();
    let mut session = Session::new(TestPosition::startpos(), Config::default(), identity()).unwrap();

    let outcome_a = session
        .search(SearchLimit::NodesPerMove(10_000), &evaluator, None, None)
        .unwrap();

    let e2e4 = TestMove {
        from: Square::E2,
        to: Square::E4,
        promotion: None,
    };

    let outcome_b = session
        .search_continue(&[e2e4], SearchLimit::NodesPerMove(1_000), &evaluator, None, None)
        .unwrap();

    let threshold = session_reuse_threshold();
    let reused_n = outcome_b.root_n_when_search_started;
    assert!(
        reused_n == 0 || reused_n as f32 >= threshold * outcome_a.final_root_n as f32,
        "continuation must either fall back to a fresh tree (reused_n == 0) or retain at least the \
         configured fraction of the prior search (reused_n = {reused_n}, prior_n = {})",
        outcome_a.final_root_n
    );
}

fn session_reuse_threshold() -> f32 {
    Config::default().reuse_threshold_fraction
}

#[test]
fn peer_reuse_reduces_total_evaluator_calls_across_an_identical_pair_of_games() {
    let config = Config {
        reuse_position_evaluations_from_other_tree: true,
        ..Config::default()
    };
    let budget = SearchLimit::NodesPerMove(300);

    // Baseline: two independent sessions on the same starting position, no
    // peer binding.
    let eval1 = CountingEvaluator::new(MockEvaluator::new());
    let eval2 = CountingEvaluator::new(MockEvaluator::new());
    let mut baseline_a = Session::new(TestPosition::startpos(), config.clone(), identity()).unwrap();
    let mut baseline_b = Session::new(TestPosition::startpos(), config.clone(), identity()).unwrap();
    baseline_a.search(budget, &eval1, None, None).unwrap();
    baseline_b.search(budget, &eval2, None, None).unwrap();
    let baseline_total = eval1.call_count() + eval2.call_count();

    // With reuse: the second session binds the first session's cache as a
    // peer before searching the same starting position.
    let eval1_reuse = CountingEvaluator::new(MockEvaluator::new());
    let eval2_reuse = CountingEvaluator::new(MockEvaluator::new());
    let mut session_a = Session::new(TestPosition::startpos(), config.clone(), identity()).unwrap();
    let mut session_b = Session::new(TestPosition::startpos(), config, identity()).unwrap();
    session_a.search(budget, &eval1_reuse, None, None).unwrap();
    assert!(session_b.bind_peer(&session_a, &identity()), "compatible sessions must bind");
    session_b.search(budget, &eval2_reuse, None, None).unwrap();
    let reused_total = eval1_reuse.call_count() + eval2_reuse.call_count();

    assert!(
        reused_total < baseline_total,
        "peer-reuse total calls ({reused_total}) should be lower than the no-reuse baseline ({baseline_total})"
    );
}
