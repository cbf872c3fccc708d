//! The node data model (spec §3) and the packed, atomically-mutable fields
//! that let many selector/applier threads touch a node concurrently without
//! a lock (spec §4.1, §5, "Concurrency primitives").

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::position::Terminal;

fn terminal_to_tag(t: Terminal) -> u8 {
    match t {
        Terminal::NonTerminal => 0,
        Terminal::Checkmate => 1,
        Terminal::Draw => 2,
        Terminal::Stalemate => 3,
    }
}

fn tag_to_terminal(tag: u8) -> Terminal {
    match tag {
        1 => Terminal::Checkmate,
        2 => Terminal::Draw,
        3 => Terminal::Stalemate,
        _ => Terminal::NonTerminal,
    }
}

/// Number of concurrent selector/applier lanes the core supports (spec
/// §4.5 "Dual-selector overlap" never names more than two).
pub const MAX_LANES: usize = 2;

/// A 32-bit, arena-relative node handle. `0` is reserved as "null" (spec
/// §4.1), so valid indices start at 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub const NULL: NodeIndex = NodeIndex(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A lock-free float accumulator. Standard library has no `AtomicF32`;
/// values are stored as the bit pattern of an `f32` and updated with a
/// compare-and-swap retry loop, which is the usual way to get a
/// fetch-add on a float without a mutex.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        AtomicF32(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    pub fn store(&self, value: f32, order: Ordering) {
        self.0.store(value.to_bits(), order)
    }

    /// Atomically adds `delta` and returns the previous value.
    pub fn fetch_add(&self, delta: f32, order: Ordering) -> f32 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let new = f32::from_bits(current) + delta;
            match self
                .0
                .compare_exchange_weak(current, new.to_bits(), order, Ordering::Relaxed)
            {
                Ok(prev) => return f32::from_bits(prev),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Clone for AtomicF32 {
    fn clone(&self) -> Self {
        AtomicF32::new(self.load(Ordering::Relaxed))
    }
}

/// A node in the search tree (spec §3 "Node"). Fields that may be mutated
/// concurrently during search use atomics; structural/policy fields are
/// written once at expansion time and read-only afterward (publication is
/// via the parent's child slot, see `ChildSlot`).
#[derive(Debug)]
pub struct Node<M> {
    /// Completed visits.
    pub n: AtomicU32,
    /// Pending (in-flight) visits per selector lane.
    pub n_inflight: [AtomicU32; MAX_LANES],
    /// Sum of backed-up values, in `[-1, 1]` after sign-flipping.
    pub w: AtomicF32,
    pub w_draw: AtomicF32,
    pub w_loss: AtomicF32,
    /// Sum of backed-up moves-left estimates.
    pub m_sum: AtomicF32,

    /// Prior probability from the parent's policy. Written once, before
    /// this node is ever shared across threads (it is part of the owned
    /// `Node` value passed to `alloc_node`, and is only reachable by other
    /// threads afterward via the `Release`-published `ChildSlot`), so a
    /// plain field is sound here without further synchronization.
    pub p: f32,
    /// Immediate NN value at this node. Unlike `p`, this is written by the
    /// applier *after* the node may already be visible to other lanes (it
    /// was published as soon as it was allocated, so a concurrent selector
    /// can already hold a `&Node` to it), so it needs the same publish
    /// discipline as `terminal`/`num_policy_moves`.
    v: AtomicF32,
    v_secondary: AtomicF32,
    has_v_secondary: AtomicU8,

    /// Terminal classification, discovered the first time this node is
    /// selected as a leaf and published from then on (spec §3 "terminal").
    /// Atomic for the same reason as `num_policy_moves`/`children_start`.
    terminal: AtomicU8,
    /// Set exactly once, by whichever applier first expands this node
    /// (spec §3 "Lifecycle"); `0` until then. Atomic because many threads
    /// may hold a shared `&Node` concurrently (the store hands out `&Node`,
    /// never `&mut Node`, once allocated) — the same publish discipline as
    /// `ChildSlot::child_index`.
    num_policy_moves: AtomicU32,
    children_start: AtomicU32,

    pub parent_index: Option<NodeIndex>,
    pub index_in_parent: u32,
    /// The move that led from the parent to this node.
    pub in_move: Option<M>,

    pub transposition_link: AtomicU64,
    pub zobrist_hash: u64,
}

/// Sentinel stored in `transposition_link` meaning "no link".
const NO_TRANSPOSITION_LINK: u64 = u64::MAX;

impl<M> Node<M> {
    pub fn new_root(zobrist_hash: u64) -> Self {
        Node {
            n: AtomicU32::new(0),
            n_inflight: [AtomicU32::new(0), AtomicU32::new(0)],
            w: AtomicF32::new(0.0),
            w_draw: AtomicF32::new(0.0),
            w_loss: AtomicF32::new(0.0),
            m_sum: AtomicF32::new(0.0),
            p: 1.0,
            v: AtomicF32::new(0.0),
            v_secondary: AtomicF32::new(0.0),
            has_v_secondary: AtomicU8::new(0),
            terminal: AtomicU8::new(terminal_to_tag(Terminal::NonTerminal)),
            num_policy_moves: AtomicU32::new(0),
            children_start: AtomicU32::new(0),
            parent_index: None,
            index_in_parent: 0,
            in_move: None,
            transposition_link: AtomicU64::new(NO_TRANSPOSITION_LINK),
            zobrist_hash,
        }
    }

    pub fn new_child(
        parent_index: NodeIndex,
        index_in_parent: u32,
        in_move: M,
        prior: f32,
        zobrist_hash: u64,
    ) -> Self {
        Node {
            n: AtomicU32::new(0),
            n_inflight: [AtomicU32::new(0), AtomicU32::new(0)],
            w: AtomicF32::new(0.0),
            w_draw: AtomicF32::new(0.0),
            w_loss: AtomicF32::new(0.0),
            m_sum: AtomicF32::new(0.0),
            p: prior,
            v: AtomicF32::new(0.0),
            v_secondary: AtomicF32::new(0.0),
            has_v_secondary: AtomicU8::new(0),
            terminal: AtomicU8::new(terminal_to_tag(Terminal::NonTerminal)),
            num_policy_moves: AtomicU32::new(0),
            children_start: AtomicU32::new(0),
            parent_index: Some(parent_index),
            index_in_parent,
            in_move: Some(in_move),
            transposition_link: AtomicU64::new(NO_TRANSPOSITION_LINK),
            zobrist_hash,
        }
    }

    pub fn visits(&self) -> u32 {
        self.n.load(Ordering::Acquire)
    }

    pub fn inflight(&self, lane: usize) -> u32 {
        self.n_inflight[lane].load(Ordering::Acquire)
    }

    pub fn total_inflight(&self) -> u32 {
        self.n_inflight.iter().map(|c| c.load(Ordering::Acquire)).sum()
    }

    pub fn is_expanded(&self) -> bool {
        self.num_policy_moves.load(Ordering::Acquire) > 0 || self.terminal().is_terminal()
    }

    pub fn terminal(&self) -> Terminal {
        tag_to_terminal(self.terminal.load(Ordering::Acquire))
    }

    /// Publishes this node's terminal classification. Idempotent in
    /// practice (every classifier of the same position agrees), but only
    /// ever called with a terminal value.
    pub fn set_terminal(&self, terminal: Terminal) {
        self.terminal.store(terminal_to_tag(terminal), Ordering::Release);
    }

    pub fn v(&self) -> f32 {
        self.v.load(Ordering::Acquire)
    }

    pub fn set_v(&self, value: f32) {
        self.v.store(value, Ordering::Release);
    }

    pub fn v_secondary(&self) -> Option<f32> {
        if self.has_v_secondary.load(Ordering::Acquire) == 0 {
            None
        } else {
            Some(self.v_secondary.load(Ordering::Acquire))
        }
    }

    pub fn set_v_secondary(&self, value: f32) {
        self.v_secondary.store(value, Ordering::Release);
        self.has_v_secondary.store(1, Ordering::Release);
    }

    pub fn num_policy_moves(&self) -> u32 {
        self.num_policy_moves.load(Ordering::Acquire)
    }

    pub fn children_start(&self) -> u32 {
        self.children_start.load(Ordering::Acquire)
    }

    /// Publishes this node's child range. Must be called at most once per
    /// node (by whichever applier wins the race to expand it); the
    /// `Release` ordering pairs with the `Acquire` loads in
    /// `num_policy_moves`/`children_start`/`is_expanded` so a reader that
    /// observes a nonzero count also observes the fully-populated child
    /// slots underneath it.
    pub fn expand(&self, children_start: u32, num_policy_moves: u32) {
        self.children_start.store(children_start, Ordering::Release);
        self.num_policy_moves.store(num_policy_moves, Ordering::Release);
    }

    /// Atomic effective Q used by the selector: in-flight visits are
    /// counted against this node as if they were losses (the usual virtual
    /// loss trick), so concurrent lanes spread out across siblings instead
    /// of piling onto the same child. `None` when the node has had no
    /// completed or in-flight visits yet (the caller should fall back to
    /// FPU). The selector negates this node's own `Q` to score it from the
    /// parent's perspective, so raising `w` here (this node's own side)
    /// lowers the parent-side score, which is what discourages a second
    /// descent from re-selecting the same in-flight child.
    pub fn effective_q(&self, virtual_loss: f32) -> Option<f32> {
        let n = self.visits();
        let inflight = self.total_inflight();
        let total = n + inflight;
        if total == 0 {
            return None;
        }
        let w = self.w.load(Ordering::Acquire) + virtual_loss * inflight as f32;
        Some(w / total as f32)
    }

    pub fn effective_n(&self) -> u32 {
        self.visits() + self.total_inflight()
    }

    /// `Q = W / N`; `None` when unvisited (spec §3 "Derived quantities").
    pub fn q(&self) -> Option<f32> {
        let n = self.visits();
        if n == 0 {
            None
        } else {
            Some(self.w.load(Ordering::Acquire) / n as f32)
        }
    }

    pub fn moves_left_avg(&self) -> Option<f32> {
        let n = self.visits();
        if n == 0 {
            None
        } else {
            Some(self.m_sum.load(Ordering::Acquire) / n as f32)
        }
    }

    pub fn transposition_link(&self) -> Option<NodeIndex> {
        let raw = self.transposition_link.load(Ordering::Acquire);
        if raw == NO_TRANSPOSITION_LINK {
            None
        } else {
            Some(NodeIndex(raw as u32))
        }
    }

    pub fn set_transposition_link(&self, target: NodeIndex) {
        self.transposition_link
            .store(target.0 as u64, Ordering::Release);
    }

    pub fn add_inflight(&self, lane: usize) {
        self.n_inflight[lane].fetch_add(1, Ordering::AcqRel);
    }

    pub fn remove_inflight(&self, lane: usize) {
        self.n_inflight[lane].fetch_sub(1, Ordering::AcqRel);
    }

    /// Backs up one visit with signed value `value` and WDL/M components.
    pub fn backup(&self, value: f32, wdl: (f32, f32, f32), moves_left: f32) {
        self.n.fetch_add(1, Ordering::AcqRel);
        self.w.fetch_add(value, Ordering::AcqRel);
        self.w_draw.fetch_add(wdl.1, Ordering::AcqRel);
        self.w_loss.fetch_add(wdl.2, Ordering::AcqRel);
        self.m_sum.fetch_add(moves_left, Ordering::AcqRel);
    }
}

/// A `(move, prior, child_index_or_null)` child slot (spec §3).
#[derive(Debug)]
pub struct ChildSlot<M> {
    pub mv: M,
    pub prior: f32,
    /// `0` until the child is allocated; published via `Release` so a
    /// selector reading `Acquire` either sees the fully-initialized child
    /// node or sees it as not-yet-expanded.
    pub child_index: AtomicU32,
}

impl<M: Copy> ChildSlot<M> {
    pub fn new(mv: M, prior: f32) -> Self {
        ChildSlot {
            mv,
            prior,
            child_index: AtomicU32::new(0),
        }
    }

    pub fn child(&self) -> Option<NodeIndex> {
        let raw = self.child_index.load(Ordering::Acquire);
        if raw == 0 {
            None
        } else {
            Some(NodeIndex(raw))
        }
    }

    pub fn publish_child(&self, index: NodeIndex) {
        self.child_index.store(index.0, Ordering::Release);
    }
}
