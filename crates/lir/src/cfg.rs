use std::collections::BTreeSet;

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};

use crate::function::{Block, Lir};

#[derive(Default, Debug, PartialEq, Eq)]
pub struct ControlFlowGraph {
    entry: PackedOption<Block>,
    blocks: SecondaryMap<Block, BlockNode>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, lir: &Lir) {
        self.blocks.clear();

        self.entry = lir.entry_block().into();

        for block in lir.iter_block() {
            if let Some(term) = lir.terminator_of(block) {
                for dest in lir.inst(term).branch_dests() {
                    self.add_edge(block, dest);
                }
            }
        }
    }

    pub fn preds_of(&self, block: Block) -> impl Iterator<Item = &Block> {
        self.blocks[block].preds.iter()
    }

    pub fn succs_of(&self, block: Block) -> impl Iterator<Item = &Block> {
        self.blocks[block].succs.iter()
    }

    pub fn pred_num_of(&self, block: Block) -> usize {
        self.blocks[block].preds.len()
    }

    pub fn succ_num_of(&self, block: Block) -> usize {
        self.blocks[block].succs.len()
    }

    pub fn entry(&self) -> Option<Block> {
        self.entry.expand()
    }

    pub fn post_order(&self) -> CfgPostOrder {
        CfgPostOrder::new(self)
    }

    pub fn add_edge(&mut self, from: Block, to: Block) {
        self.blocks[to].preds.insert(from);
        self.blocks[from].succs.insert(to);
    }
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
struct BlockNode {
    preds: BTreeSet<Block>,
    succs: BTreeSet<Block>,
}

pub struct CfgPostOrder<'a> {
    cfg: &'a ControlFlowGraph,
    node_state: SecondaryMap<Block, NodeState>,
    stack: Vec<Block>,
}

impl<'a> CfgPostOrder<'a> {
    fn new(cfg: &'a ControlFlowGraph) -> Self {
        let mut stack = Vec::new();

        if let Some(entry) = cfg.entry() {
            stack.push(entry);
        }

        Self {
            cfg,
            node_state: SecondaryMap::default(),
            stack,
        }
    }
}

impl Iterator for CfgPostOrder<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        while let Some(&block) = self.stack.last() {
            if self.node_state[block].is_unvisited() {
                self.node_state[block].set_visited();
                for &succ in self.cfg.succs_of(block) {
                    if self.node_state[succ].is_unvisited() {
                        self.stack.push(succ);
                    }
                }
            } else {
                self.stack.pop().unwrap();
                if !self.node_state[block].has_finished() {
                    self.node_state[block].set_finished();
                    return Some(block);
                }
            }
        }

        None
    }
}

#[derive(Default, Debug, Clone, Copy)]
struct NodeState(u8);

impl NodeState {
    fn is_unvisited(self) -> bool {
        self.0 == 0
    }

    fn has_finished(self) -> bool {
        self.0 == 2
    }

    fn set_visited(&mut self) {
        self.0 = 1;
    }

    fn set_finished(&mut self) {
        self.0 = 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::InstData;

    #[test]
    fn diamond_post_order() {
        let mut lir = Lir::new();
        let b0 = lir.make_block();
        let b1 = lir.make_block();
        let b2 = lir.make_block();
        let b3 = lir.make_block();

        let cond = crate::Operand::Imm(0);
        lir.append_inst(b0, InstData::branch(cond, b1, b2));
        lir.append_inst(b1, InstData::jump(b3));
        lir.append_inst(b2, InstData::jump(b3));
        lir.append_inst(b3, InstData::ret());

        let mut cfg = ControlFlowGraph::new();
        cfg.compute(&lir);

        assert_eq!(cfg.entry(), Some(b0));
        assert_eq!(cfg.pred_num_of(b3), 2);
        assert_eq!(cfg.succ_num_of(b0), 2);

        let po: Vec<_> = cfg.post_order().collect();
        assert_eq!(po.len(), 4);
        assert_eq!(*po.last().unwrap(), b0);
        assert_eq!(po[0], b3);
    }
}
