use cranelift_entity::{entity_impl, packed_option::PackedOption, PrimaryMap, SecondaryMap};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{cfg::ControlFlowGraph, domtree::DomTree, function::Block};

#[derive(Debug, Default)]
pub struct LoopTree {
    /// Stores loops.
    /// The index of an outer loop is guaranteed to be lower than its inner
    /// loops because loops are found in RPO.
    loops: PrimaryMap<Loop, LoopData>,

    /// Maps blocks to its contained loop.
    /// If the block is contained by multiple nested loops, then the block is
    /// mapped to the innermost loop.
    block_to_loop: SecondaryMap<Block, PackedOption<Loop>>,
}

impl LoopTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the `LoopTree` of the function.
    pub fn compute(&mut self, cfg: &ControlFlowGraph, domtree: &DomTree) {
        self.clear();

        // Find loop headers in RPO, this means outer loops are guaranteed to
        // be inserted first, then its inner loops are inserted.
        for &block in domtree.rpo() {
            for &pred in cfg.preds_of(block) {
                if domtree.dominates(block, pred) {
                    let loop_data = LoopData {
                        header: block,
                        parent: None.into(),
                        children: SmallVec::new(),
                    };

                    self.loops.push(loop_data);
                    break;
                }
            }
        }

        self.analyze_loops(cfg, domtree);
    }

    /// Returns all loops.
    /// The result iterator guarantees outer loops are returned before its
    /// inner loops.
    pub fn loops(&self) -> impl DoubleEndedIterator<Item = Loop> {
        self.loops.keys()
    }

    /// Returns all blocks in the loop, inner-loop blocks included.
    pub fn iter_blocks_post_order<'a, 'b>(
        &'a self,
        cfg: &'b ControlFlowGraph,
        lp: Loop,
    ) -> BlocksInLoopPostOrder<'a, 'b> {
        BlocksInLoopPostOrder::new(self, cfg, lp)
    }

    /// Returns `true` if the `block` is in the `lp`.
    pub fn is_in_loop(&self, block: Block, lp: Loop) -> bool {
        let mut loop_of_block = self.loop_of_block(block);
        while let Some(cur_lp) = loop_of_block {
            if lp == cur_lp {
                return true;
            }
            loop_of_block = self.parent_loop(cur_lp);
        }
        false
    }

    /// Returns number of loops found.
    pub fn loop_num(&self) -> usize {
        self.loops.len()
    }

    /// Clear the internal state of `LoopTree`.
    pub fn clear(&mut self) {
        self.loops.clear();
        self.block_to_loop.clear();
    }

    /// Returns header block of the `lp`.
    pub fn loop_header(&self, lp: Loop) -> Block {
        self.loops[lp].header
    }

    /// Returns `true` if `block` is the header of some loop.
    pub fn is_loop_header(&self, block: Block) -> Option<Loop> {
        let lp = self.loop_of_block(block)?;
        (self.loop_header(lp) == block).then_some(lp)
    }

    /// Get parent loop of the `lp` if exists.
    pub fn parent_loop(&self, lp: Loop) -> Option<Loop> {
        self.loops[lp].parent.expand()
    }

    /// Returns the loop that the `block` belongs to.
    /// If the `block` belongs to multiple loops, then returns the innermost
    /// loop.
    pub fn loop_of_block(&self, block: Block) -> Option<Loop> {
        self.block_to_loop[block].expand()
    }

    fn map_block(&mut self, block: Block, lp: Loop) {
        self.block_to_loop[block] = lp.into();
    }

    /// Analyze loops. This method does
    /// 1. Mapping each block to its contained loop.
    /// 2. Setting parent and child of the loops.
    fn analyze_loops(&mut self, cfg: &ControlFlowGraph, domtree: &DomTree) {
        let mut worklist = vec![];

        // Iterate loops reversely to ensure analyze inner loops first.
        for cur_lp in self.loops.keys().rev() {
            let cur_lp_header = self.loop_header(cur_lp);

            // Add predecessors of the loop header to worklist.
            for &block in cfg.preds_of(cur_lp_header) {
                if domtree.dominates(cur_lp_header, block) {
                    worklist.push(block);
                }
            }

            while let Some(block) = worklist.pop() {
                match self.block_to_loop[block].expand() {
                    Some(lp_of_block) => {
                        let outermost_parent = self.outermost_parent(lp_of_block);

                        // If outermost parent is current loop, then the block
                        // is already visited.
                        if outermost_parent == cur_lp {
                            continue;
                        } else {
                            self.loops[cur_lp].children.push(outermost_parent);
                            self.loops[outermost_parent].parent = cur_lp.into();

                            let lp_header_of_block = self.loop_header(lp_of_block);
                            worklist.extend(cfg.preds_of(lp_header_of_block));
                        }
                    }

                    // If the block is not mapped to any loops, then map it to
                    // the loop.
                    None => {
                        self.map_block(block, cur_lp);
                        // If block is not loop header, then add its
                        // predecessors to the worklist.
                        if block != cur_lp_header {
                            worklist.extend(cfg.preds_of(block));
                        }
                    }
                }
            }
        }
    }

    /// Returns the outermost parent loop of `lp`. If `lp` doesn't have any
    /// parent, then returns `lp` itself.
    fn outermost_parent(&self, mut lp: Loop) -> Loop {
        while let Some(parent) = self.parent_loop(lp) {
            lp = parent;
        }
        lp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loop(u32);
entity_impl!(Loop);

#[derive(Debug, Clone, PartialEq, Eq)]
struct LoopData {
    /// A header of the loop.
    header: Block,

    /// A parent loop that includes the loop.
    parent: PackedOption<Loop>,

    /// Child loops that the loop includes.
    children: SmallVec<[Loop; 4]>,
}

pub struct BlocksInLoopPostOrder<'a, 'b> {
    lpt: &'a LoopTree,
    cfg: &'b ControlFlowGraph,
    lp: Loop,
    stack: Vec<Block>,
    block_state: FxHashMap<Block, BlockState>,
}

impl<'a, 'b> BlocksInLoopPostOrder<'a, 'b> {
    fn new(lpt: &'a LoopTree, cfg: &'b ControlFlowGraph, lp: Loop) -> Self {
        let loop_header = lpt.loop_header(lp);

        Self {
            lpt,
            cfg,
            lp,
            stack: vec![loop_header],
            block_state: FxHashMap::default(),
        }
    }
}

impl Iterator for BlocksInLoopPostOrder<'_, '_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(&block) = self.stack.last() {
            match self.block_state.get(&block) {
                // The block is already visited, but not returned from the
                // iterator, so mark the block as `Finished` and return it.
                Some(BlockState::Visited) => {
                    let block = self.stack.pop().unwrap();
                    self.block_state.insert(block, BlockState::Finished);
                    return Some(block);
                }

                // The block is already returned, so just remove it.
                Some(BlockState::Finished) => {
                    self.stack.pop().unwrap();
                }

                // The block is not visited yet, so push its unvisited in-loop
                // successors to the stack and mark the block as `Visited`.
                None => {
                    self.block_state.insert(block, BlockState::Visited);
                    for &succ in self.cfg.succs_of(block) {
                        if !self.block_state.contains_key(&succ) && self.lpt.is_in_loop(succ, self.lp)
                        {
                            self.stack.push(succ);
                        }
                    }
                }
            }
        }

        None
    }
}

enum BlockState {
    Visited,
    Finished,
}
