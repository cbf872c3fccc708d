//! The search session (C10, spec §4.10): the long-lived, per-game object a
//! caller holds across moves. Owns the tree, wires in a limit manager, and
//! decides whether the next move's search can continue the prior tree or
//! must start fresh.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::cache::{CacheMode, PositionCache};
use crate::config::Config;
use crate::error::SearchError;
use crate::evaluator::Evaluator;
use crate::limits::{DefaultLimitManager, GameHistory, LimitManager, SearchLimit};
use crate::manager::{self, ProgressSnapshot, SearchOutcome};
use crate::position::{EvaluatorIdentity, Position, PositionWithHistory};
use crate::tree::Tree;

pub struct Session<P: Position> {
    tree: Tree<P>,
    config: Config,
    limit_manager: Box<dyn LimitManager>,
    history: GameHistory,
    evaluator_identity: EvaluatorIdentity,
    first_move_of_game: bool,
}

impl<P: Position> Session<P>
where
    P::Move: PartialEq,
{
    pub fn new(position: P, config: Config, evaluator_identity: EvaluatorIdentity) -> Result<Self, SearchError> {
        let cache = Arc::new(PositionCache::new(config.node_pool_capacity, config.cache_mode));
        let tree = Tree::new(
            PositionWithHistory::new(position),
            cache,
            config.node_pool_capacity,
            config.child_pool_capacity,
        )?;
        Ok(Session {
            tree,
            config,
            limit_manager: Box::new(DefaultLimitManager),
            history: GameHistory::default(),
            evaluator_identity,
            first_move_of_game: true,
        })
    }

    pub fn set_limit_manager(&mut self, limit_manager: Box<dyn LimitManager>) {
        self.limit_manager = limit_manager;
    }

    pub fn tree(&self) -> &Tree<P> {
        &self.tree
    }

    pub fn history(&self) -> &GameHistory {
        &self.history
    }

    /// Binds `peer`'s cache for cross-engine reuse, provided its evaluator
    /// identity matches and both sides have caching enabled (spec §4.10
    /// peer-reuse compatibility). Clears the peer's own back-reference
    /// first, so a chain of `bind_peer` calls can never pin ancestor trees
    /// indefinitely (spec §9 "Two-way peer reuse without leaks").
    pub fn bind_peer<Q: Position>(&mut self, peer: &Session<Q>, peer_identity: &EvaluatorIdentity) -> bool {
        if !self.config.reuse_position_evaluations_from_other_tree {
            return false;
        }
        if &self.evaluator_identity != peer_identity {
            return false;
        }
        if self.config.cache_mode == CacheMode::Off || peer.config.cache_mode == CacheMode::Off {
            return false;
        }
        peer.tree.clear_shared_context();
        self.tree.set_peer_cache(Some(peer.tree.cache.clone()));
        true
    }

    pub fn unbind_peer(&mut self) {
        self.tree.clear_shared_context();
    }

    /// Runs a fresh search from the session's current position, discarding
    /// any existing tree content but keeping the cache (spec §4.10).
    pub fn search(
        &mut self,
        limit: SearchLimit,
        primary: &dyn Evaluator<P>,
        secondary: Option<&dyn Evaluator<P>>,
        progress_callback: Option<Box<dyn FnMut(ProgressSnapshot<P::Move>) + Send>>,
    ) -> Result<SearchOutcome<P>, SearchError> {
        let position = self.tree.current_position().clone();
        let hash_history = self.tree.position_history.hash_history.clone();
        let cache = self.tree.cache.clone();
        self.tree = Tree::new(
            PositionWithHistory::with_history(position, hash_history),
            cache,
            self.config.node_pool_capacity,
            self.config.child_pool_capacity,
        )?;
        self.run(limit, primary, secondary, progress_callback)
    }

    /// Attempts to continue the prior tree forward by `forward_moves` (the
    /// opponent's reply, and our own prior move if applicable), re-rooting
    /// to keep whatever subtree survives. Falls back to a fresh search
    /// transparently if the prior tree can't supply the continuation, or
    /// doesn't retain enough of it past `config.reuse_threshold_fraction`
    /// (spec §4.10).
    pub fn search_continue(
        &mut self,
        forward_moves: &[P::Move],
        limit: SearchLimit,
        primary: &dyn Evaluator<P>,
        secondary: Option<&dyn Evaluator<P>>,
        progress_callback: Option<Box<dyn FnMut(ProgressSnapshot<P::Move>) + Send>>,
    ) -> Result<SearchOutcome<P>, SearchError> {
        let prior_root_n = self.tree.node(self.tree.root()).visits().max(1);

        match self.try_reuse(forward_moves, prior_root_n) {
            Ok(()) => {}
            Err(SearchError::NotReusable) => {
                warn!("continuation not reusable from prior tree, starting fresh search");
                let mut position = self.tree.current_position().clone();
                for &mv in forward_moves {
                    position = position.make_move(mv);
                }
                let cache = self.tree.cache.clone();
                self.tree = Tree::new(
                    PositionWithHistory::new(position),
                    cache,
                    self.config.node_pool_capacity,
                    self.config.child_pool_capacity,
                )?;
            }
            Err(other) => return Err(other),
        }

        self.run(limit, primary, secondary, progress_callback)
    }

    fn try_reuse(&mut self, forward_moves: &[P::Move], prior_root_n: u32) -> Result<(), SearchError> {
        self.tree.re_root(forward_moves)?;
        let reused_n = self.tree.node(self.tree.root()).visits();
        let fraction = reused_n as f32 / prior_root_n as f32;
        if fraction < self.config.reuse_threshold_fraction {
            return Err(SearchError::NotReusable);
        }
        info!(reused_n, fraction, "continuing prior tree");
        Ok(())
    }

    fn run(
        &mut self,
        limit: SearchLimit,
        primary: &dyn Evaluator<P>,
        secondary: Option<&dyn Evaluator<P>>,
        progress_callback: Option<Box<dyn FnMut(ProgressSnapshot<P::Move>) + Send>>,
    ) -> Result<SearchOutcome<P>, SearchError> {
        let budget = self.limit_manager.apportion(limit, &self.history);
        let started = Instant::now();
        let outcome = manager::run_search(
            &self.tree,
            &self.config,
            primary,
            secondary,
            budget,
            self.first_move_of_game,
            progress_callback,
        )?;
        self.first_move_of_game = false;
        let root_q = self.tree.node(self.tree.root()).q().unwrap_or(0.0);
        let nodes_spent = outcome.final_root_n.saturating_sub(outcome.root_n_when_search_started);
        self.history.record_move(started.elapsed(), nodes_spent, root_q);
        Ok(outcome)
    }

    /// Resets the session to a fresh game at `position`: new tree, new
    /// cache, cleared history, and the first-move sampler re-armed (spec
    /// §4.10 "reset_game"). Any peer binding is dropped along with the old
    /// tree.
    pub fn reset_game(&mut self, position: P) -> Result<(), SearchError> {
        let cache = Arc::new(PositionCache::new(self.config.node_pool_capacity, self.config.cache_mode));
        self.tree = Tree::new(
            PositionWithHistory::new(position),
            cache,
            self.config.node_pool_capacity,
            self.config.child_pool_capacity,
        )?;
        self.history = GameHistory::default();
        self.first_move_of_game = true;
        Ok(())
    }
}
