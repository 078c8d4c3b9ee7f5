//! LIR instructions.
//!
//! Every block starts with a [`InstKind::Label`] pseudo-instruction and ends
//! with a terminator. The label carries the block's incoming value list, the
//! terminator its outgoing value list; both are empty until SSI construction
//! populates them.

use cranelift_entity::entity_impl;
use smallvec::SmallVec;

use crate::{
    function::Block,
    value::{Operand, OperandRole},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Inst(pub u32);
entity_impl!(Inst);

pub type OperandList = SmallVec<[Operand; 2]>;
pub type ValueList = SmallVec<[Operand; 4]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    /// Block-leading pseudo-instruction; holds the incoming value list.
    Label { incoming: ValueList },
    Jump {
        dest: Block,
        outgoing: ValueList,
    },
    Branch {
        then_dest: Block,
        else_dest: Block,
        outgoing: ValueList,
    },
    Ret { outgoing: ValueList },
    /// An ordinary operation. The name is only used in diagnostics.
    Op { name: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstData {
    pub kind: InstKind,
    pub outputs: OperandList,
    pub temps: OperandList,
    pub alives: OperandList,
    pub uses: OperandList,
    pub states: OperandList,
}

impl InstData {
    fn new(kind: InstKind) -> Self {
        Self {
            kind,
            outputs: SmallVec::new(),
            temps: SmallVec::new(),
            alives: SmallVec::new(),
            uses: SmallVec::new(),
            states: SmallVec::new(),
        }
    }

    pub fn label() -> Self {
        Self::new(InstKind::Label {
            incoming: SmallVec::new(),
        })
    }

    pub fn jump(dest: Block) -> Self {
        Self::new(InstKind::Jump {
            dest,
            outgoing: SmallVec::new(),
        })
    }

    pub fn branch(cond: Operand, then_dest: Block, else_dest: Block) -> Self {
        Self::new(InstKind::Branch {
            then_dest,
            else_dest,
            outgoing: SmallVec::new(),
        })
        .with_use(cond)
    }

    pub fn ret() -> Self {
        Self::new(InstKind::Ret {
            outgoing: SmallVec::new(),
        })
    }

    pub fn op(name: &'static str) -> Self {
        Self::new(InstKind::Op { name })
    }

    pub fn with_output(mut self, op: Operand) -> Self {
        self.outputs.push(op);
        self
    }

    pub fn with_temp(mut self, op: Operand) -> Self {
        self.temps.push(op);
        self
    }

    pub fn with_alive(mut self, op: Operand) -> Self {
        self.alives.push(op);
        self
    }

    pub fn with_use(mut self, op: Operand) -> Self {
        self.uses.push(op);
        self
    }

    pub fn with_state(mut self, op: Operand) -> Self {
        self.states.push(op);
        self
    }

    pub fn is_label(&self) -> bool {
        matches!(self.kind, InstKind::Label { .. })
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            InstKind::Jump { .. } | InstKind::Branch { .. } | InstKind::Ret { .. }
        )
    }

    /// Successor blocks this instruction can transfer control to.
    pub fn branch_dests(&self) -> SmallVec<[Block; 2]> {
        match self.kind {
            InstKind::Jump { dest, .. } => [dest].into_iter().collect(),
            InstKind::Branch {
                then_dest,
                else_dest,
                ..
            } => [then_dest, else_dest].into_iter().collect(),
            _ => SmallVec::new(),
        }
    }

    pub fn incoming(&self) -> Option<&ValueList> {
        match &self.kind {
            InstKind::Label { incoming } => Some(incoming),
            _ => None,
        }
    }

    pub fn incoming_mut(&mut self) -> Option<&mut ValueList> {
        match &mut self.kind {
            InstKind::Label { incoming } => Some(incoming),
            _ => None,
        }
    }

    pub fn outgoing(&self) -> Option<&ValueList> {
        match &self.kind {
            InstKind::Jump { outgoing, .. }
            | InstKind::Branch { outgoing, .. }
            | InstKind::Ret { outgoing } => Some(outgoing),
            _ => None,
        }
    }

    pub fn outgoing_mut(&mut self) -> Option<&mut ValueList> {
        match &mut self.kind {
            InstKind::Jump { outgoing, .. }
            | InstKind::Branch { outgoing, .. }
            | InstKind::Ret { outgoing } => Some(outgoing),
            _ => None,
        }
    }

    /// Visit every operand together with its role, defs first.
    ///
    /// The def-before-use order within one instruction is relied on by the
    /// backward block-local scan: an instruction that both defines and uses
    /// the same vreg must leave the use live before the instruction.
    pub fn for_each_operand(&self, mut f: impl FnMut(OperandRole, Operand)) {
        for &op in &self.outputs {
            f(OperandRole::Output, op);
        }
        for &op in &self.temps {
            f(OperandRole::Temp, op);
        }
        for &op in &self.alives {
            f(OperandRole::Alive, op);
        }
        for &op in &self.uses {
            f(OperandRole::Use, op);
        }
        for &op in &self.states {
            f(OperandRole::State, op);
        }
    }
}
