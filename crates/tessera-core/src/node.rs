//! In-memory tree nodes
//!
//! Each node owns an array of child slots that are either unloaded (committed
//! bytes only), loaded and clean, or loaded and dirty. Dirty content replaces
//! the committed bytes at the next commit. There are no parent
//! back-references; mutation walks down from the root and dirtiness
//! propagates up through the return path, so a dirty descendant always sits
//! under a chain of dirty slots.

use crate::codec::NodeIndex;
use bytes::Bytes;

/// A hydrated child: a subtree for path nodes, a payload for leaf nodes
#[derive(Clone, Debug)]
pub(crate) enum Child<T> {
    Node(Box<TreeNode<T>>),
    Data(T),
}

/// One child slot of a tree node
///
/// The committed bytes kept by `Stored` and `Clean` are the child's digest
/// for path nodes and the raw payload bytes for leaf nodes.
#[derive(Clone, Debug)]
pub(crate) enum Slot<T> {
    Empty,
    Stored(Bytes),
    Clean(Child<T>, Bytes),
    Dirty(Child<T>),
}

impl<T> Slot<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self, Slot::Dirty(_))
    }
}

/// One node of a Merkle sort tree
///
/// Covers ids in `[offset, offset + step * width)`, delegating `step` ids to
/// each child slot. `step == 1` makes this a leaf whose slots hold payloads.
#[derive(Clone, Debug)]
pub(crate) struct TreeNode<T> {
    pub offset: u64,
    pub step: u64,
    /// Logical item count under each slot
    pub counts: Vec<u64>,
    pub slots: Vec<Slot<T>>,
}

impl<T> TreeNode<T> {
    /// Create an empty node covering `[offset, offset + step * width)`
    pub fn new(offset: u64, step: u64, width: u64) -> Self {
        debug_assert_eq!(offset % (step * width), 0);
        Self {
            offset,
            step,
            counts: vec![0; width as usize],
            slots: (0..width).map(|_| Slot::Empty).collect(),
        }
    }

    /// Number of child slots
    pub fn width(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Total id span covered by this node
    pub fn span(&self) -> u64 {
        self.step * self.width()
    }

    /// Whether slots hold payloads rather than subtrees
    pub fn is_leaf(&self) -> bool {
        self.step == 1
    }

    /// Whether `id` falls inside this node's span
    pub fn contains(&self, id: u64) -> bool {
        id >= self.offset && id - self.offset < self.span()
    }

    /// Child slot index responsible for `id`
    pub fn slot_of(&self, id: u64) -> usize {
        debug_assert!(self.contains(id));
        ((id - self.offset) / self.step) as usize
    }

    /// Smallest id delegated to `slot`
    pub fn slot_base(&self, slot: usize) -> u64 {
        self.offset + slot as u64 * self.step
    }

    /// Total logical item count under this node
    pub fn total_count(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Whether any slot holds uncommitted content
    pub fn has_dirty(&self) -> bool {
        self.slots.iter().any(Slot::is_dirty)
    }

    /// Index of the highest occupied slot
    pub fn highest_occupied(&self) -> Option<usize> {
        self.slots.iter().rposition(|slot| !slot.is_empty())
    }

    /// Rebuild a node from its persisted shape; every occupied slot starts
    /// out unloaded
    pub fn from_index(index: NodeIndex) -> Self {
        let slots = index
            .entries
            .into_iter()
            .map(|entry| {
                if entry.is_empty() {
                    Slot::Empty
                } else {
                    Slot::Stored(entry)
                }
            })
            .collect();
        Self {
            offset: index.offset,
            step: index.step,
            counts: index.counts,
            slots,
        }
    }

    /// Persisted shape of this node. Every dirty slot must have been
    /// resolved to clean bytes first (commit does this bottom-up).
    pub fn to_index(&self) -> NodeIndex {
        let entries = self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Empty => Bytes::new(),
                Slot::Stored(bytes) | Slot::Clean(_, bytes) => bytes.clone(),
                Slot::Dirty(_) => {
                    panic!("dirty slot survived commit resolution")
                }
            })
            .collect();
        NodeIndex {
            offset: self.offset,
            step: self.step,
            counts: self.counts.clone(),
            entries,
        }
    }
}

/// Truncate `id` down to a multiple of `span`
pub(crate) fn align(id: u64, span: u64) -> u64 {
    id - id % span
}

/// Smallest aligned span (a power of `width`, at least `width`) whose block
/// contains both `a` and `b`
pub(crate) fn common_span(a: u64, b: u64, width: u64) -> u64 {
    let mut span = width;
    while align(a, span) != align(b, span) {
        span *= width;
    }
    span
}

/// A subtree about to be installed under a new common ancestor
pub(crate) struct Subtree<T> {
    pub offset: u64,
    pub count: u64,
    pub slot: Slot<T>,
}

/// Join two disjoint subtrees under their minimal common-ancestor path node.
///
/// This is the "tree grows upward" operation: neither operand is modified,
/// both are installed as children of a freshly synthesized parent whose span
/// is the smallest aligned block covering them both.
pub(crate) fn join_subtrees<T>(a: Subtree<T>, b: Subtree<T>, width: u64) -> TreeNode<T> {
    let span = common_span(a.offset, b.offset, width);
    let mut parent = TreeNode::new(align(a.offset, span), span / width, width);

    let a_slot = parent.slot_of(a.offset);
    let b_slot = parent.slot_of(b.offset);
    debug_assert_ne!(a_slot, b_slot);

    parent.counts[a_slot] = a.count;
    parent.slots[a_slot] = a.slot;
    parent.counts[b_slot] = b.count;
    parent.slots[b_slot] = b.slot;
    parent
}
