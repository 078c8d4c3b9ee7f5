//! The SSA graph: nodes with ordered input edges and an inverse usage view.
//!
//! Fixed nodes are pinned to a block in a single total control-flow order;
//! floating nodes have no position and are scheduled between their last
//! input and first usage. The `state_after` snapshot edge is kept separate
//! from ordinary inputs because it legitimately participates in cycles
//! (a snapshot may reference the node it is attached to) and must be
//! excluded from cycle checking.

use cranelift_entity::{entity_impl, packed_option::PackedOption, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Node(pub u32);
entity_impl!(Node);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(pub u32);
entity_impl!(Block);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Start,
    /// Control-flow join. Its inputs are the [`NodeKind::End`] nodes of the
    /// joining branches, in predecessor order.
    Merge,
    /// Exit out of a loop; anchor for [`NodeKind::Proxy`] nodes.
    LoopExit,
    /// End of a branch feeding a merge. Its value inputs are empty; the
    /// values it selects live in the merge's phis.
    End,
    /// Value selection at a merge. One value input per merge end, in the
    /// same order.
    Phi { merge: Node },
    /// Re-materialization of a loop-defined value at a loop exit.
    Proxy { exit: Node },
    /// A deopt/debug snapshot, referenced through `state_after` edges.
    FrameState,
    Ret,
    Op { name: &'static str },
}

#[derive(Debug, Clone)]
pub struct NodeData {
    pub kind: NodeKind,
    inputs: SmallVec<[Node; 2]>,
    state_after: PackedOption<Node>,
    /// Fixed nodes carry their block; floating nodes carry none.
    block: PackedOption<Block>,
}

impl NodeData {
    pub fn inputs(&self) -> &[Node] {
        &self.inputs
    }

    pub fn state_after(&self) -> Option<Node> {
        self.state_after.expand()
    }

    pub fn block(&self) -> Option<Block> {
        self.block.expand()
    }

    pub fn is_fixed(&self) -> bool {
        self.block.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlockData {
    /// Fixed nodes in program order.
    fixed: Vec<Node>,
    preds: SmallVec<[Block; 2]>,
    succs: SmallVec<[Block; 2]>,
}

pub struct SsaGraph {
    nodes: PrimaryMap<Node, NodeData>,
    usages: SecondaryMap<Node, SmallVec<[Node; 4]>>,
    blocks: PrimaryMap<Block, BlockData>,
    /// Program order; the entry block comes first and the order is a
    /// reverse post-order of the block graph.
    block_order: Vec<Block>,
    /// Phis keyed by their merge, proxies keyed by their loop exit.
    selectors: SecondaryMap<Node, SmallVec<[Node; 2]>>,
}

impl Default for SsaGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SsaGraph {
    pub fn new() -> Self {
        Self {
            nodes: PrimaryMap::new(),
            usages: SecondaryMap::new(),
            blocks: PrimaryMap::new(),
            block_order: Vec::new(),
            selectors: SecondaryMap::new(),
        }
    }

    pub fn make_block(&mut self) -> Block {
        let block = self.blocks.push(BlockData::default());
        self.block_order.push(block);
        block
    }

    pub fn add_block_edge(&mut self, from: Block, to: Block) {
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    /// Append a fixed node to `block`'s program order.
    pub fn add_fixed(&mut self, block: Block, kind: NodeKind) -> Node {
        let node = self.nodes.push(NodeData {
            kind,
            inputs: SmallVec::new(),
            state_after: None.into(),
            block: block.into(),
        });
        self.blocks[block].fixed.push(node);
        node
    }

    pub fn add_floating(&mut self, kind: NodeKind) -> Node {
        self.nodes.push(NodeData {
            kind,
            inputs: SmallVec::new(),
            state_after: None.into(),
            block: None.into(),
        })
    }

    pub fn append_input(&mut self, node: Node, input: Node) {
        self.nodes[node].inputs.push(input);
        self.usages[input].push(node);
    }

    pub fn set_state_after(&mut self, node: Node, state: Node) {
        debug_assert!(matches!(self.nodes[state].kind, NodeKind::FrameState));
        self.nodes[node].state_after = state.into();
        self.usages[state].push(node);
    }

    /// Create a phi at `merge` selecting `values`, one per merge end in
    /// predecessor order.
    pub fn add_phi(&mut self, merge: Node, values: &[Node]) -> Node {
        debug_assert!(matches!(self.nodes[merge].kind, NodeKind::Merge));
        let phi = self.add_floating(NodeKind::Phi { merge });
        for &value in values {
            self.append_input(phi, value);
        }
        self.selectors[merge].push(phi);
        phi
    }

    /// Create a proxy re-materializing `value` at the loop exit `exit`.
    pub fn add_proxy(&mut self, exit: Node, value: Node) -> Node {
        debug_assert!(matches!(self.nodes[exit].kind, NodeKind::LoopExit));
        let proxy = self.add_floating(NodeKind::Proxy { exit });
        self.append_input(proxy, value);
        self.selectors[exit].push(proxy);
        proxy
    }

    pub fn node(&self, node: Node) -> &NodeData {
        &self.nodes[node]
    }

    pub fn usages(&self, node: Node) -> &[Node] {
        &self.usages[node]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn block_order(&self) -> &[Block] {
        &self.block_order
    }

    pub fn fixed_nodes(&self, block: Block) -> &[Node] {
        &self.blocks[block].fixed
    }

    pub fn preds_of(&self, block: Block) -> &[Block] {
        &self.blocks[block].preds
    }

    pub fn succs_of(&self, block: Block) -> &[Block] {
        &self.blocks[block].succs
    }

    /// Phis of a merge, or proxies of a loop exit.
    pub fn selectors_of(&self, node: Node) -> &[Node] {
        &self.selectors[node]
    }

    /// The position of `end` among its merge's branches.
    pub fn branch_index(&self, merge: Node, end: Node) -> usize {
        self.nodes[merge]
            .inputs
            .iter()
            .position(|&n| n == end)
            .unwrap_or_else(|| panic!("{end:?} is not a branch of {merge:?}"))
    }

    /// The merge a branch end feeds, if it is connected yet.
    pub fn merge_of_end(&self, end: Node) -> Option<Node> {
        debug_assert!(matches!(self.nodes[end].kind, NodeKind::End));
        self.usages[end]
            .iter()
            .copied()
            .find(|&u| matches!(self.nodes[u].kind, NodeKind::Merge))
    }
}
