//! Dominator tree over the LIR control-flow graph, used by loop analysis.
//!
//! The algorithm is based on Keith D. Cooper., Timothy J. Harvey., and Ken
//! Kennedy.: A Simple, Fast Dominance Algorithm:
//! <https://www.cs.rice.edu/~keith/EMBED/dom.pdf>

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};

use crate::{cfg::ControlFlowGraph, function::Block};

#[derive(Default, Debug)]
pub struct DomTree {
    doms: SecondaryMap<Block, PackedOption<Block>>,
    rpo: Vec<Block>,
}

impl DomTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.doms.clear();
        self.rpo.clear();
    }

    /// Returns the immediate dominator of the `block`.
    /// Returns None if the `block` is unreachable from the entry block, or
    /// the `block` is the entry block itself.
    pub fn idom_of(&self, block: Block) -> Option<Block> {
        if self.rpo[0] == block {
            return None;
        }
        self.doms[block].expand()
    }

    /// Returns `true` if block1 strictly dominates block2.
    pub fn strictly_dominates(&self, block1: Block, block2: Block) -> bool {
        let mut current_block = block2;
        while let Some(block) = self.idom_of(current_block) {
            if block == block1 {
                return true;
            }
            current_block = block;
        }

        false
    }

    /// Returns `true` if block1 dominates block2.
    pub fn dominates(&self, block1: Block, block2: Block) -> bool {
        if block1 == block2 {
            return true;
        }

        self.strictly_dominates(block1, block2)
    }

    /// Returns blocks in reverse post-order.
    pub fn rpo(&self) -> &[Block] {
        &self.rpo
    }

    pub fn compute(&mut self, cfg: &ControlFlowGraph) {
        self.clear();

        self.rpo = cfg.post_order().collect();
        self.rpo.reverse();

        let block_num = self.rpo.len();

        let mut rpo_nums = SecondaryMap::with_capacity(block_num);
        for (i, &block) in self.rpo.iter().enumerate() {
            rpo_nums[block] = (block_num - i) as u32;
        }

        match self.rpo.first() {
            Some(&entry) => self.doms[entry] = entry.into(),
            None => return,
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.rpo.iter().skip(1) {
                let processed_pred =
                    match cfg.preds_of(block).find(|&&pred| self.doms[pred].is_some()) {
                        Some(pred) => *pred,
                        _ => continue,
                    };
                let mut new_dom = processed_pred;

                for &pred in cfg.preds_of(block) {
                    if pred != processed_pred && self.doms[pred].is_some() {
                        new_dom = self.intersect(new_dom, pred, &rpo_nums);
                    }
                }
                if Some(new_dom) != self.doms[block].expand() {
                    changed = true;
                    self.doms[block] = new_dom.into();
                }
            }
        }
    }

    fn intersect(
        &self,
        mut b1: Block,
        mut b2: Block,
        rpo_nums: &SecondaryMap<Block, u32>,
    ) -> Block {
        while b1 != b2 {
            while rpo_nums[b1] < rpo_nums[b2] {
                b1 = self.doms[b1].unwrap();
            }
            while rpo_nums[b2] < rpo_nums[b1] {
                b2 = self.doms[b2].unwrap();
            }
        }

        b1
    }
}
