//! Lazy ascending iteration over a Merkle sort tree
//!
//! The cursor keeps an explicit descent stack. In-memory nodes are walked by
//! reference; unloaded children are fetched from the store on demand and
//! owned by their stack frame. Per-child item counts let `skip` jump over
//! whole subtrees without materializing anything under them.

use crate::error::{Result, TreeError};
use crate::node::{Child, Slot, TreeNode};
use crate::policy::DataPolicy;
use crate::tree::MerkleSortTree;
use bytes::Bytes;
use std::collections::VecDeque;
use tessera_store::NodeStore;

enum NodeRef<'a, T> {
    Mem(&'a TreeNode<T>),
    Owned(TreeNode<T>),
}

struct Frame<'a, T> {
    node: NodeRef<'a, T>,
    next_slot: usize,
}

enum State {
    NotStarted,
    Running,
    Done,
}

/// What the cursor decided to do with the next occupied slot
enum Step<'a, T> {
    /// Current frame has no occupied slots left
    Pop,
    /// Enter a hydrated child subtree
    DescendMem(&'a TreeNode<T>),
    /// Load and enter an unloaded child subtree
    DescendStored(Bytes),
    /// Expand a hydrated leaf payload
    ExpandMem(u64, &'a T),
    /// Decode and expand an unloaded leaf payload
    ExpandStored(u64, Bytes),
    /// Whole child skipped via its item count
    Skipped(u64),
}

/// Lazy, ascending, finite cursor over `(id, item)` pairs.
///
/// Not restartable: once exhausted it stays exhausted.
pub struct TreeIter<'a, P: DataPolicy, S: NodeStore> {
    tree: &'a MerkleSortTree<P, S>,
    stack: Vec<Frame<'a, P::Payload>>,
    buffer: VecDeque<(u64, P::Item)>,
    state: State,
}

impl<'a, P: DataPolicy, S: NodeStore> TreeIter<'a, P, S> {
    pub(crate) fn new(tree: &'a MerkleSortTree<P, S>) -> Self {
        Self {
            tree,
            stack: Vec::new(),
            buffer: VecDeque::new(),
            state: State::NotStarted,
        }
    }

    /// Next `(id, item)` pair in ascending id order, or `None` once the
    /// sequence is exhausted
    pub async fn next(&mut self) -> Result<Option<(u64, P::Item)>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            match self.state {
                State::Done => return Ok(None),
                State::NotStarted => self.start().await?,
                State::Running => {
                    self.advance(None).await?;
                }
            }
        }
    }

    /// Skip up to `n` items without materializing them, using per-child
    /// counts to jump over whole subtrees. Returns the number skipped, which
    /// is less than `n` only if the sequence ran out.
    pub async fn skip(&mut self, n: u64) -> Result<u64> {
        let mut remaining = n;
        while remaining > 0 {
            if !self.buffer.is_empty() {
                let take = (self.buffer.len() as u64).min(remaining) as usize;
                self.buffer.drain(..take);
                remaining -= take as u64;
                continue;
            }
            match self.state {
                State::Done => break,
                State::NotStarted => self.start().await?,
                State::Running => {
                    let skipped = self.advance(Some(remaining)).await?;
                    remaining -= skipped;
                }
            }
        }
        Ok(n - remaining)
    }

    async fn start(&mut self) -> Result<()> {
        let tree = self.tree;
        self.state = State::Running;
        match (&tree.root, &tree.root_digest) {
            (Some(root), _) => self.stack.push(Frame {
                node: NodeRef::Mem(root),
                next_slot: 0,
            }),
            (None, Some(digest)) => {
                let root = tree.load_node(digest).await?;
                self.stack.push(Frame {
                    node: NodeRef::Owned(root),
                    next_slot: 0,
                });
            }
            (None, None) => self.state = State::Done,
        }
        Ok(())
    }

    /// Take one cursor step. With a skip `budget`, whole children whose item
    /// count fits in the budget are consumed without descending; the number
    /// of items consumed that way is returned.
    async fn advance(&mut self, budget: Option<u64>) -> Result<u64> {
        let step = match self.plan_step(budget)? {
            Some(step) => step,
            None => {
                self.state = State::Done;
                return Ok(0);
            }
        };
        match step {
            Step::Pop => {
                self.stack.pop();
            }
            Step::DescendMem(child) => self.stack.push(Frame {
                node: NodeRef::Mem(child),
                next_slot: 0,
            }),
            Step::DescendStored(entry) => {
                let child = self.tree.load_child(&entry).await?;
                self.stack.push(Frame {
                    node: NodeRef::Owned(child),
                    next_slot: 0,
                });
            }
            Step::ExpandMem(id, payload) => {
                let items = self.tree.policy.expand(id, payload).await?;
                self.buffer.extend(items.into_iter().map(|item| (id, item)));
            }
            Step::ExpandStored(id, entry) => {
                let payload = self.tree.policy.decode(id, &entry)?;
                let items = self.tree.policy.expand(id, &payload).await?;
                self.buffer.extend(items.into_iter().map(|item| (id, item)));
            }
            Step::Skipped(count) => return Ok(count),
        }
        Ok(0)
    }

    /// Inspect the top frame's next occupied slot and decide what to do,
    /// advancing the frame's slot cursor for consumed slots
    fn plan_step(&mut self, budget: Option<u64>) -> Result<Option<Step<'a, P::Payload>>> {
        let Some(frame) = self.stack.last_mut() else {
            return Ok(None);
        };
        let Frame { node, next_slot } = frame;
        match &*node {
            NodeRef::Mem(node) => {
                let node: &'a TreeNode<P::Payload> = *node;
                let Some(slot) = next_occupied(node, *next_slot) else {
                    return Ok(Some(Step::Pop));
                };
                if let Some(budget) = budget {
                    if node.counts[slot] <= budget {
                        *next_slot = slot + 1;
                        return Ok(Some(Step::Skipped(node.counts[slot])));
                    }
                }
                *next_slot = slot + 1;
                if node.is_leaf() {
                    let id = node.slot_base(slot);
                    match &node.slots[slot] {
                        Slot::Stored(bytes) => Ok(Some(Step::ExpandStored(id, bytes.clone()))),
                        Slot::Clean(Child::Data(payload), _) | Slot::Dirty(Child::Data(payload)) => {
                            Ok(Some(Step::ExpandMem(id, payload)))
                        }
                        _ => Err(TreeError::Decode(
                            "subtree stored under a leaf node slot".into(),
                        )),
                    }
                } else {
                    match &node.slots[slot] {
                        Slot::Stored(bytes) => Ok(Some(Step::DescendStored(bytes.clone()))),
                        Slot::Clean(Child::Node(child), _) | Slot::Dirty(Child::Node(child)) => {
                            Ok(Some(Step::DescendMem(child.as_ref())))
                        }
                        _ => Err(TreeError::Decode(
                            "payload stored under a path node slot".into(),
                        )),
                    }
                }
            }
            NodeRef::Owned(node) => {
                let Some(slot) = next_occupied(node, *next_slot) else {
                    return Ok(Some(Step::Pop));
                };
                if let Some(budget) = budget {
                    if node.counts[slot] <= budget {
                        let count = node.counts[slot];
                        *next_slot = slot + 1;
                        return Ok(Some(Step::Skipped(count)));
                    }
                }
                let entry = match &node.slots[slot] {
                    Slot::Stored(bytes) => bytes.clone(),
                    // Loaded nodes only ever hold unloaded slots
                    _ => unreachable!("hydrated slot in a store-loaded node"),
                };
                let step = if node.is_leaf() {
                    Step::ExpandStored(node.slot_base(slot), entry)
                } else {
                    Step::DescendStored(entry)
                };
                *next_slot = slot + 1;
                Ok(Some(step))
            }
        }
    }
}

fn next_occupied<T>(node: &TreeNode<T>, from: usize) -> Option<usize> {
    (from..node.slots.len()).find(|&slot| !node.slots[slot].is_empty())
}
