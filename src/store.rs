//! The node store (C1, spec §4.1): a pre-allocated, index-addressed pool of
//! nodes and a parallel pool of child slots, both bump-allocated with a
//! single atomic counter. This is the one place in the crate that carries
//! real `unsafe`, mirroring how the source stack's own thread pool reaches
//! for raw pointers to share one arena across worker threads rather than
//! paying for a lock on every node touch.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::SearchError;
use crate::node::{ChildSlot, Node, NodeIndex};

/// A pre-allocated arena of `Node<M>` plus a parallel arena of child slots.
///
/// Safety invariant: once `alloc_node`/`alloc_children` hands back an
/// index/range, the caller has exclusive write access to that slot until
/// it publishes it (by storing the index into some other slot's
/// `child_index`, see `ChildSlot::publish_child`). No two callers are ever
/// handed overlapping ranges, because allocation is a single atomic
/// fetch-add past the high-water mark; the arena never reallocates, so
/// indices and the slices built from them stay valid for the arena's
/// lifetime.
pub struct NodeStore<M> {
    nodes: Box<[UnsafeCell<Option<Node<M>>>]>,
    children: Box<[UnsafeCell<Option<ChildSlot<M>>>]>,
    next_node: AtomicU32,
    next_child: AtomicU32,
}

// SAFETY: all concurrent access to the interiors goes through the
// allocation discipline described on `NodeStore`: a slot is written by
// exactly one thread (the thread that allocated it) before any other
// thread can observe its index (via a `Release`-ordered publish), and is
// read-only (for structural fields) or atomics-only (for hot fields thereafter.
unsafe impl<M: Send> Send for NodeStore<M> {}
unsafe impl<M: Send> Sync for NodeStore<M> {}

impl<M> NodeStore<M> {
    pub fn with_capacity(node_capacity: usize, child_capacity: usize) -> Self {
        let mut nodes = Vec::with_capacity(node_capacity);
        nodes.resize_with(node_capacity, || UnsafeCell::new(None));
        let mut children = Vec::with_capacity(child_capacity);
        children.resize_with(child_capacity, || UnsafeCell::new(None));

        NodeStore {
            nodes: nodes.into_boxed_slice(),
            children: children.into_boxed_slice(),
            // index 0 is reserved as null; start the bump counter at 1.
            next_node: AtomicU32::new(1),
            next_child: AtomicU32::new(0),
        }
    }

    pub fn node_capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn child_capacity(&self) -> usize {
        self.children.len()
    }

    /// Reserves a node slot and writes `node` into it. O(1), thread-safe.
    pub fn alloc_node(&self, node: Node<M>) -> Result<NodeIndex, SearchError> {
        let idx = self.next_node.fetch_add(1, Ordering::AcqRel);
        if idx as usize >= self.nodes.len() {
            return Err(SearchError::StoreExhausted {
                capacity: self.nodes.len(),
            });
        }
        // SAFETY: `idx` was just reserved exclusively by this fetch_add; no
        // other call can have received the same index.
        unsafe {
            *self.nodes[idx as usize].get() = Some(node);
        }
        Ok(NodeIndex(idx))
    }

    /// Reserves `count` contiguous child slots, returning the start index.
    pub fn alloc_children(&self, slots: Vec<ChildSlot<M>>) -> Result<u32, SearchError> {
        let count = slots.len() as u32;
        if count == 0 {
            return Ok(0);
        }
        let start = self.next_child.fetch_add(count, Ordering::AcqRel);
        if (start + count) as usize > self.children.len() {
            return Err(SearchError::StoreExhausted {
                capacity: self.children.len(),
            });
        }
        for (i, slot) in slots.into_iter().enumerate() {
            // SAFETY: `[start, start+count)` was exclusively reserved above.
            unsafe {
                *self.children[start as usize + i].get() = Some(slot);
            }
        }
        Ok(start)
    }

    pub fn node(&self, index: NodeIndex) -> &Node<M> {
        assert!(!index.is_null(), "attempted to dereference the null node index");
        // SAFETY: indices handed out by `alloc_node` are always initialized
        // before being published, and the arena never moves or frees slots.
        unsafe {
            (*self.nodes[index.as_usize()].get())
                .as_ref()
                .expect("node index pointed at an unallocated slot")
        }
    }

    pub fn children(&self, start: u32, count: u32) -> &[ChildSlotRef<M>] {
        // Reinterpret the contiguous range as a slice of initialized slots.
        // SAFETY: callers only ever pass `(start, count)` pairs derived from
        // a node's own `children_start`/`num_policy_moves`, which were set
        // exactly once by `alloc_children` for that range.
        let raw: &[UnsafeCell<Option<ChildSlot<M>>>] =
            &self.children[start as usize..(start + count) as usize];
        unsafe { std::mem::transmute(raw) }
    }

    /// Number of nodes allocated so far (monotonic, used for diagnostics
    /// and for sizing the reusable-fraction check in continuation).
    pub fn allocated_nodes(&self) -> u32 {
        self.next_node.load(Ordering::Acquire).saturating_sub(1)
    }

    /// Resets the bump counters so the arena can be reused by a fresh
    /// search. Only valid when no search is in progress and no live
    /// references into the arena remain (the `Tree` enforces this by only
    /// calling it from its own constructors, never mid-search).
    pub fn reset(&self) {
        self.next_node.store(1, Ordering::Release);
        self.next_child.store(0, Ordering::Release);
    }
}

/// A transparent wrapper so `children()` can return `&[ChildSlotRef<M>]`
/// with the same field layout as `ChildSlot<M>`, letting callers treat
/// slots read-only without exposing the `UnsafeCell`/`Option` wrapping.
#[repr(transparent)]
pub struct ChildSlotRef<M>(UnsafeCell<Option<ChildSlot<M>>>);

impl<M> ChildSlotRef<M> {
    pub fn get(&self) -> &ChildSlot<M> {
        // SAFETY: see `NodeStore::children`.
        unsafe { (*self.0.get()).as_ref().expect("child slot not allocated") }
    }
}
