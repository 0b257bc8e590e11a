#![forbid(unsafe_code)]
//! Arena of in-memory node records with generational ids.
//!
//! The pool only manages slot lifetime. A retired slot goes back on the free
//! list and its generation is bumped on reuse, so an id issued before the
//! retirement can never resolve to the new occupant. Once the free list
//! grows past `max_free_slots`, empty slots at the end of the arena are
//! released.

use std::fmt;

use tracing::trace;

use crate::error::{IavlError, Result};
use crate::node::Node;

/// Stable identifier of a pool slot.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Slot index inside the pool.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}g{}", self.index, self.generation)
    }
}

/// Sizing knobs for a [`NodePool`].
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Slots reserved up front.
    pub initial_capacity: usize,
    /// Empty slots kept once the arena shrinks back; trailing empty slots
    /// beyond this are released.
    pub max_free_slots: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            max_free_slots: 64 * 1024,
        }
    }
}

impl PoolOptions {
    /// Sets the number of slots reserved up front.
    pub fn initial_capacity(mut self, slots: usize) -> Self {
        self.initial_capacity = slots;
        self
    }

    /// Sets how many retired slots are kept for reuse.
    pub fn max_free_slots(mut self, slots: usize) -> Self {
        self.max_free_slots = slots;
        self
    }
}

/// Counters describing pool activity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    /// Slots currently holding a node.
    pub live: usize,
    /// Allocations served by growing the arena.
    pub fresh: u64,
    /// Allocations served from the free list.
    pub reused: u64,
    /// Slots retired.
    pub retired: u64,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of node records.
pub struct NodePool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Generation given to newly pushed slots. Raised past every released
    /// slot so ids into a truncated tail never match a re-created slot.
    generation_floor: u32,
    options: PoolOptions,
    stats: PoolStats,
}

impl Default for NodePool {
    fn default() -> Self {
        Self::new(PoolOptions::default())
    }
}

impl NodePool {
    /// Creates a pool with the given sizing.
    pub fn new(options: PoolOptions) -> Self {
        Self {
            slots: Vec::with_capacity(options.initial_capacity),
            free: Vec::new(),
            generation_floor: 0,
            options,
            stats: PoolStats::default(),
        }
    }

    /// Creates a pool reserving `slots` entries.
    pub fn with_capacity(slots: usize) -> Self {
        Self::new(PoolOptions::default().initial_capacity(slots))
    }

    /// Stores `node` in a free or fresh slot.
    pub fn allocate(&mut self, node: Node) -> NodeId {
        self.stats.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.node.is_none(), "free list held a live slot");
            slot.generation = slot.generation.wrapping_add(1);
            slot.node = Some(node);
            self.stats.reused += 1;
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        let generation = self.generation_floor;
        self.slots.push(Slot {
            generation,
            node: Some(node),
        });
        self.stats.fresh += 1;
        NodeId { index, generation }
    }

    /// Looks up a live node.
    pub fn resolve(&self, id: NodeId) -> Result<&Node> {
        match self.slots.get(id.index as usize) {
            Some(Slot {
                generation,
                node: Some(node),
            }) if *generation == id.generation => Ok(node),
            _ => Err(IavlError::NotFound("node id")),
        }
    }

    /// Looks up a live node for in-place bookkeeping (hash caching, node keys).
    pub fn resolve_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        match self.slots.get_mut(id.index as usize) {
            Some(Slot {
                generation,
                node: Some(node),
            }) if *generation == id.generation => Ok(node),
            _ => Err(IavlError::NotFound("node id")),
        }
    }

    /// Returns true if `id` refers to a live slot.
    pub fn contains(&self, id: NodeId) -> bool {
        self.resolve(id).is_ok()
    }

    /// Frees the slot and hands the record back to the caller.
    pub fn retire(&mut self, id: NodeId) -> Result<Node> {
        let slot = match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.node.is_some() => slot,
            _ => return Err(IavlError::NotFound("node id")),
        };
        let node = slot.node.take().ok_or(IavlError::NotFound("node id"))?;
        self.stats.live -= 1;
        self.stats.retired += 1;
        self.free.push(id.index);
        if self.free.len() > self.options.max_free_slots {
            self.release_tail();
        }
        Ok(node)
    }

    /// Drops trailing empty slots while the free list is over its cap.
    ///
    /// Empty slots below the highest live one stay on the free list; they are
    /// handed out again before any fresh slot is pushed.
    fn release_tail(&mut self) {
        let mut excess = self.free.len().saturating_sub(self.options.max_free_slots);
        let before = self.slots.len();
        while excess > 0 {
            match self.slots.last() {
                Some(slot) if slot.node.is_none() => {
                    self.generation_floor =
                        self.generation_floor.max(slot.generation.wrapping_add(1));
                    self.slots.pop();
                    excess -= 1;
                }
                _ => break,
            }
        }
        if self.slots.len() == before {
            return;
        }
        let len = self.slots.len();
        self.free.retain(|&index| (index as usize) < len);
        self.slots.shrink_to(self.options.initial_capacity.max(len));
        trace!(released = before - len, capacity = len, "pool.release");
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.stats.live
    }

    /// Returns true if no node is live.
    pub fn is_empty(&self) -> bool {
        self.stats.live == 0
    }

    /// Number of slots held, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Activity counters.
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Drops every node and releases the slots beyond `initial_capacity`.
    pub fn clear(&mut self) {
        for slot in self.slots.drain(..) {
            if slot.node.is_some() {
                self.stats.retired += 1;
            }
            self.generation_floor = self.generation_floor.max(slot.generation.wrapping_add(1));
        }
        self.free.clear();
        self.slots.shrink_to(self.options.initial_capacity);
        self.stats.live = 0;
    }
}
