//! Independent re-check of a finished SSI LIR.
//!
//! This pass is read-only and must find nothing on correct input. Every
//! violation it can report means the upstream construction is broken, never
//! the user's program, so callers normally go through
//! [`verify_ssi_or_panic`] or the [`debug_verify_ssi!`](crate::debug_verify_ssi)
//! macro rather than inspecting the error.

use std::fmt;

use opal_lir::{Block, ControlFlowGraph, Inst, InstKind, Lir, Operand, VReg};

use crate::bitset::BitSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsiError {
    /// A Use/Alive/State operand reads a vreg with no earlier definition in
    /// the block and no incoming slot.
    UseWithoutDef {
        block: Block,
        inst: Inst,
        vreg: VReg,
    },
    /// A second definition of a vreg inside one block; SSI forbids
    /// re-assignment.
    Redefinition {
        block: Block,
        inst: Inst,
        vreg: VReg,
    },
    /// An outgoing value with no definition reaching the terminator.
    UndefinedOutgoing { block: Block, vreg: VReg },
    /// Outgoing and incoming lists of one edge differ in length.
    EdgeLengthMismatch {
        from: Block,
        to: Block,
        outgoing: usize,
        incoming: usize,
    },
    /// A matched incoming/outgoing pair refers to values of different kinds.
    EdgeKindMismatch {
        from: Block,
        to: Block,
        index: usize,
        outgoing: Operand,
        incoming: Operand,
    },
}

impl fmt::Display for SsiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UseWithoutDef { block, inst, vreg } => write!(
                f,
                "{vreg:?} used by {inst:?} in {block:?} without a reaching definition"
            ),
            Self::Redefinition { block, inst, vreg } => {
                write!(f, "{vreg:?} redefined by {inst:?} in {block:?}")
            }
            Self::UndefinedOutgoing { block, vreg } => {
                write!(f, "{vreg:?} is outgoing from {block:?} but never defined")
            }
            Self::EdgeLengthMismatch {
                from,
                to,
                outgoing,
                incoming,
            } => write!(
                f,
                "edge {from:?} -> {to:?}: outgoing list has {outgoing} values, \
                 incoming list has {incoming}"
            ),
            Self::EdgeKindMismatch {
                from,
                to,
                index,
                outgoing,
                incoming,
            } => write!(
                f,
                "edge {from:?} -> {to:?}: slot {index} pairs {outgoing:?} with {incoming:?}"
            ),
        }
    }
}

impl std::error::Error for SsiError {}

/// Check the SSI invariants of a finished LIR.
pub fn verify_ssi(lir: &Lir, cfg: &ControlFlowGraph) -> Result<(), SsiError> {
    for block in lir.iter_block() {
        verify_block(lir, block)?;
    }
    for block in lir.iter_block() {
        for &succ in cfg.succs_of(block) {
            verify_edge(lir, block, succ)?;
        }
    }
    Ok(())
}

/// Like [`verify_ssi`], but aborts the compilation on the first violation.
pub fn verify_ssi_or_panic(lir: &Lir, cfg: &ControlFlowGraph) {
    if let Err(err) = verify_ssi(lir, cfg) {
        panic!("SSI verification failed: {err}");
    }
}

fn verify_block(lir: &Lir, block: Block) -> Result<(), SsiError> {
    let mut defined: BitSet<VReg> = BitSet::new();

    // Incoming slots are the block's cross-block definitions.
    let label = lir.label_of(block);
    if let Some(incoming) = lir.inst(label).incoming() {
        for op in incoming {
            if let Some(vreg) = op.as_virtual() {
                defined.insert(vreg);
            }
        }
    }

    for &inst in lir.block_insts(block) {
        let data = lir.inst(inst);

        // Uses are checked against the definitions accumulated *before* this
        // instruction; its own outputs must not satisfy them. Virtual stack
        // slots are a separate operand variant and naturally exempt.
        let mut err = None;
        data.for_each_operand(|role, op| {
            if err.is_some() || !role.is_use() {
                return;
            }
            if let Some(vreg) = op.as_virtual() {
                if !defined.contains(vreg) {
                    err = Some(SsiError::UseWithoutDef { block, inst, vreg });
                }
            }
        });
        if let Some(err) = err {
            return Err(err);
        }

        let mut err = None;
        data.for_each_operand(|role, op| {
            if err.is_some() || !role.is_def() {
                return;
            }
            if let Some(vreg) = op.as_virtual() {
                if !defined.insert(vreg) {
                    err = Some(SsiError::Redefinition { block, inst, vreg });
                }
            }
        });
        if let Some(err) = err {
            return Err(err);
        }
    }

    // Everything the block passes along an edge must have a definition.
    if let Some(term) = lir.terminator_of(block) {
        if let Some(outgoing) = lir.inst(term).outgoing() {
            for op in outgoing {
                if let Some(vreg) = op.as_virtual() {
                    if !defined.contains(vreg) {
                        return Err(SsiError::UndefinedOutgoing { block, vreg });
                    }
                }
            }
        }
    }

    Ok(())
}

fn verify_edge(lir: &Lir, from: Block, to: Block) -> Result<(), SsiError> {
    let term = lir
        .terminator_of(from)
        .unwrap_or_else(|| panic!("{from:?} has a successor but no terminator"));
    let outgoing = match &lir.inst(term).kind {
        InstKind::Jump { outgoing, .. }
        | InstKind::Branch { outgoing, .. }
        | InstKind::Ret { outgoing } => outgoing,
        _ => unreachable!("terminator without an outgoing list"),
    };
    let incoming = lir
        .inst(lir.label_of(to))
        .incoming()
        .expect("label carries an incoming list");

    if outgoing.len() != incoming.len() {
        return Err(SsiError::EdgeLengthMismatch {
            from,
            to,
            outgoing: outgoing.len(),
            incoming: incoming.len(),
        });
    }

    for (index, (&out, &inn)) in outgoing.iter().zip(incoming.iter()).enumerate() {
        // The absent sentinel pairs with anything.
        if out.is_absent() || inn.is_absent() {
            continue;
        }
        let compatible = match (out, inn) {
            (Operand::Virtual(a), Operand::Virtual(b)) => {
                lir.vreg_kind(a) == lir.vreg_kind(b)
            }
            _ => out == inn,
        };
        if !compatible {
            return Err(SsiError::EdgeKindMismatch {
                from,
                to,
                index,
                outgoing: out,
                incoming: inn,
            });
        }
    }

    Ok(())
}
