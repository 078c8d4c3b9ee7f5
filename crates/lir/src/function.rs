//! Function-level LIR container: blocks, instructions and layout order.

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::{
    inst::{Inst, InstData},
    value::{ValueKind, VReg},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(pub u32);
entity_impl!(Block);

#[derive(Debug, Clone, Default)]
pub struct BlockData {
    insts: Vec<Inst>,
}

/// A single function's LIR.
///
/// `block_order` is the layout order produced by the upstream instruction
/// selector; the entry block comes first and the order is topological for
/// reducible control flow, which the fast SSI builder relies on.
pub struct Lir {
    pub blocks: PrimaryMap<Block, BlockData>,
    pub insts: PrimaryMap<Inst, InstData>,
    vregs: PrimaryMap<VReg, ValueKind>,
    block_order: Vec<Block>,
}

impl Default for Lir {
    fn default() -> Self {
        Self::new()
    }
}

impl Lir {
    pub fn new() -> Self {
        Self {
            blocks: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            vregs: PrimaryMap::new(),
            block_order: Vec::new(),
        }
    }

    pub fn make_vreg(&mut self, kind: ValueKind) -> VReg {
        self.vregs.push(kind)
    }

    pub fn vreg_kind(&self, vreg: VReg) -> ValueKind {
        self.vregs[vreg]
    }

    /// Append a new block to the layout. The block starts out with its
    /// leading label already in place.
    pub fn make_block(&mut self) -> Block {
        let block = self.blocks.push(BlockData::default());
        self.block_order.push(block);
        let label = self.insts.push(InstData::label());
        self.blocks[block].insts.push(label);
        block
    }

    pub fn append_inst(&mut self, block: Block, data: InstData) -> Inst {
        debug_assert!(
            !self.is_terminated(block),
            "appending to terminated {block:?}"
        );
        let inst = self.insts.push(data);
        self.blocks[block].insts.push(inst);
        inst
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.block_order.first().copied()
    }

    pub fn iter_block(&self) -> impl Iterator<Item = Block> + '_ {
        self.block_order.iter().copied()
    }

    pub fn block_insts(&self, block: Block) -> &[Inst] {
        &self.blocks[block].insts
    }

    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst]
    }

    pub fn inst_mut(&mut self, inst: Inst) -> &mut InstData {
        &mut self.insts[inst]
    }

    /// The block's leading label pseudo-instruction.
    pub fn label_of(&self, block: Block) -> Inst {
        let inst = self.blocks[block].insts[0];
        debug_assert!(self.insts[inst].is_label());
        inst
    }

    /// The block's trailing control-transfer instruction, if the block is
    /// already terminated.
    pub fn terminator_of(&self, block: Block) -> Option<Inst> {
        let &inst = self.blocks[block].insts.last()?;
        self.insts[inst].is_terminator().then_some(inst)
    }

    pub fn is_terminated(&self, block: Block) -> bool {
        self.terminator_of(block).is_some()
    }
}
