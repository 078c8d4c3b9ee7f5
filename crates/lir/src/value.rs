//! Operands of LIR instructions.
//!
//! Liveness and SSI construction only track [`Operand::Virtual`] values;
//! everything else (physical registers, frame slots, immediates) is assumed
//! correct by construction and silently skipped by the analyses.

use cranelift_entity::entity_impl;

/// A virtual register.
///
/// Virtual registers are numbered densely from zero at LIR construction
/// time, so sets of them can be represented as bit vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VReg(pub u32);
entity_impl!(VReg);

/// The width/kind of the value a virtual register holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Word,
    Long,
    Float,
    Double,
    Ref,
}

/// A physical register number. Opaque to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysReg(pub u16);

/// A fixed frame slot, already placed by an earlier phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackSlot(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// A liveness-tracked virtual register.
    Virtual(VReg),
    /// A physical register. Not tracked.
    Reg(PhysReg),
    /// A fixed stack slot. Not tracked.
    Slot(StackSlot),
    /// A virtual stack slot. Not tracked, and legal to read without a
    /// tracked definition; its lifetime is managed by the stack allocator.
    VirtualSlot(u32),
    /// An immediate constant.
    Imm(i64),
    /// The "no value on this edge" sentinel used in incoming value lists
    /// when a vreg is live out of some-but-not-all predecessors.
    Absent,
}

impl Operand {
    pub fn as_virtual(self) -> Option<VReg> {
        match self {
            Self::Virtual(vreg) => Some(vreg),
            _ => None,
        }
    }

    pub fn is_virtual(self) -> bool {
        matches!(self, Self::Virtual(_))
    }

    pub fn is_absent(self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// The role an operand plays in its instruction.
///
/// `Output` and `Temp` are definitions; `Use`, `Alive` and `State` are uses.
/// `Alive` marks a value that must stay live across the whole instruction
/// (e.g. both inputs of a compare-and-swap), `State` a value referenced only
/// by the instruction's deopt/frame state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandRole {
    Output,
    Temp,
    Alive,
    Use,
    State,
}

impl OperandRole {
    pub fn is_def(self) -> bool {
        matches!(self, Self::Output | Self::Temp)
    }

    pub fn is_use(self) -> bool {
        !self.is_def()
    }
}
