//! The tree (C3, spec §4.3): owns a node store, a position cache, the
//! current root, and the position+history the root corresponds to.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};

use crate::cache::PositionCache;
use crate::error::SearchError;
use crate::node::{ChildSlot, Node, NodeIndex};
use crate::position::{Position, PositionWithHistory};
use crate::store::NodeStore;

pub struct Tree<P: Position> {
    store: NodeStore<P::Move>,
    root: NodeIndex,
    pub position_history: PositionWithHistory<P>,
    pub cache: Arc<PositionCache>,
    /// A peer tree's cache, consulted (read-only) for cross-engine reuse
    /// (spec §4.10). Cleared by `clear_shared_context`.
    peer_cache: RwLock<Option<Arc<PositionCache>>>,
    /// First-seen node for each hash value visited so far in this tree,
    /// used by the transposition leaf-evaluator stage (spec §4.4 item 3).
    transposition_index: RwLock<HashMap<u64, NodeIndex>>,
}

impl<P: Position> Tree<P> {
    pub fn new(
        position_history: PositionWithHistory<P>,
        cache: Arc<PositionCache>,
        node_capacity: usize,
        child_capacity: usize,
    ) -> Result<Self, SearchError> {
        let store = NodeStore::with_capacity(node_capacity, child_capacity);
        let root_hash = position_history.current.zobrist_hash();
        let root = store.alloc_node(Node::new_root(root_hash))?;
        let transposition_index = RwLock::new(HashMap::new());
        transposition_index.write().unwrap().insert(root_hash, root);
        Ok(Tree {
            store,
            root,
            position_history,
            cache,
            peer_cache: RwLock::new(None),
            transposition_index,
        })
    }

    /// Registers `index` as (one of, possibly the first) node(s) seen with
    /// `hash`, for later transposition lookups. Idempotent: the first
    /// registrant for a hash wins and is never displaced.
    pub fn register_position(&self, hash: u64, index: NodeIndex) {
        self.transposition_index
            .write()
            .unwrap()
            .entry(hash)
            .or_insert(index);
    }

    /// Finds another in-tree node with the same hash that already has at
    /// least one completed visit, excluding `exclude` itself.
    pub fn find_transposition(&self, hash: u64, exclude: NodeIndex) -> Option<NodeIndex> {
        let candidate = *self.transposition_index.read().unwrap().get(&hash)?;
        if candidate == exclude {
            return None;
        }
        if self.store.node(candidate).visits() > 0 {
            Some(candidate)
        } else {
            None
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub(crate) fn store(&self) -> &NodeStore<P::Move> {
        &self.store
    }

    pub(crate) fn node(&self, index: NodeIndex) -> &Node<P::Move> {
        self.store.node(index)
    }

    pub(crate) fn children(&self, index: NodeIndex) -> &[crate::store::ChildSlotRef<P::Move>] {
        let node = self.store.node(index);
        self.store.children(node.children_start(), node.num_policy_moves())
    }

    pub fn current_position(&self) -> &P {
        &self.position_history.current
    }

    /// Sets (or clears, with `None`) the peer tree whose cache this tree
    /// may read from. Before accepting a new peer, the session is expected
    /// to have already called `clear_shared_context` on that peer so a
    /// chain `A -> B -> A' -> B' -> ...` can never pin ancestor trees
    /// indefinitely (spec §9 "Two-way peer reuse without leaks").
    pub fn set_peer_cache(&self, peer: Option<Arc<PositionCache>>) {
        *self.peer_cache.write().unwrap() = peer;
    }

    pub fn peer_cache(&self) -> Option<Arc<PositionCache>> {
        self.peer_cache.read().unwrap().clone()
    }

    /// Severs any peer back-reference this tree holds.
    pub fn clear_shared_context(&self) {
        *self.peer_cache.write().unwrap() = None;
    }

    /// Walks `move_sequence` from the current root, selecting the
    /// resulting child as the new root. On success, the retained subtree
    /// is compacted into a freshly allocated arena (this is the "cheap"
    /// part: the copy is bounded by the size of the subtree that survives,
    /// not the whole prior tree) and transposition links are dropped (they
    /// will simply be re-established by the next search).
    pub fn re_root(&mut self, move_sequence: &[P::Move]) -> Result<(), SearchError>
    where
        P::Move: PartialEq,
    {
        let mut cursor = self.root;
        for mv in move_sequence {
            let node = self.store.node(cursor);
            if node.num_policy_moves() == 0 {
                return Err(SearchError::NotReusable);
            }
            let slots = self.store.children(node.children_start(), node.num_policy_moves());
            let mut next = None;
            for slot_ref in slots {
                let slot = slot_ref.get();
                if &slot.mv == mv {
                    next = slot.child();
                    break;
                }
            }
            match next {
                Some(child) => cursor = child,
                None => return Err(SearchError::NotReusable),
            }
        }

        let new_store = NodeStore::with_capacity(self.store.node_capacity(), self.store.child_capacity());
        let new_root = copy_subtree(&self.store, &new_store, cursor, None, 0)?;
        self.store = new_store;
        self.root = new_root;
        let new_root_hash = self.store.node(new_root).zobrist_hash;
        self.position_history.hash_history.push(new_root_hash);
        *self.transposition_index.write().unwrap() = {
            let mut map = HashMap::new();
            map.insert(new_root_hash, new_root);
            map
        };
        Ok(())
    }

    pub fn nodes_in_subtree(&self, index: NodeIndex) -> u32 {
        let node = self.store.node(index);
        let mut total = 1u32;
        if node.num_policy_moves() > 0 {
            for slot_ref in self.store.children(node.children_start(), node.num_policy_moves()) {
                if let Some(child) = slot_ref.get().child() {
                    total += self.nodes_in_subtree(child);
                }
            }
        }
        total
    }
}

fn copy_subtree<M: Copy>(
    old: &NodeStore<M>,
    new: &NodeStore<M>,
    old_index: NodeIndex,
    new_parent: Option<NodeIndex>,
    index_in_parent: u32,
) -> Result<NodeIndex, SearchError> {
    let old_node = old.node(old_index);

    let mut fresh = match new_parent {
        None => Node::new_root(old_node.zobrist_hash),
        Some(_) => Node::new_child(
            new_parent.unwrap(),
            index_in_parent,
            old_node.in_move.expect("non-root node must carry its in-move"),
            old_node.p,
            old_node.zobrist_hash,
        ),
    };
    // Carry over accumulated search statistics; in-flight counters are not
    // copied since re-rooting only ever happens between searches.
    fresh.n.store(old_node.visits(), Ordering::Relaxed);
    fresh.w.store(old_node.w.load(Ordering::Relaxed), Ordering::Relaxed);
    fresh.w_draw.store(old_node.w_draw.load(Ordering::Relaxed), Ordering::Relaxed);
    fresh.w_loss.store(old_node.w_loss.load(Ordering::Relaxed), Ordering::Relaxed);
    fresh.m_sum.store(old_node.m_sum.load(Ordering::Relaxed), Ordering::Relaxed);
    fresh.set_v(old_node.v());
    if let Some(v_secondary) = old_node.v_secondary() {
        fresh.set_v_secondary(v_secondary);
    }
    fresh.set_terminal(old_node.terminal());

    let old_num_policy_moves = old_node.num_policy_moves();
    let old_slots = if old_num_policy_moves > 0 {
        Some(old.children(old_node.children_start(), old_num_policy_moves))
    } else {
        None
    };

    if let Some(old_slots) = old_slots {
        let new_slots: Vec<ChildSlot<M>> = old_slots
            .iter()
            .map(|s| ChildSlot::new(s.get().mv, s.get().prior))
            .collect();
        let start = new.alloc_children(new_slots)?;
        fresh.expand(start, old_num_policy_moves);

        let new_index = new.alloc_node(fresh)?;

        let new_slots_view = new.children(start, old_num_policy_moves);
        for (i, old_slot_ref) in old_slots.iter().enumerate() {
            if let Some(old_child) = old_slot_ref.get().child() {
                let copied_child = copy_subtree(old, new, old_child, Some(new_index), i as u32)?;
                new_slots_view[i].get().publish_child(copied_child);
            }
        }
        Ok(new_index)
    } else {
        new.alloc_node(fresh)
    }
}
