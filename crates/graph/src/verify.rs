//! Expensive schedulability cross-check of a created order.
//!
//! Re-walks the scheduled blocks in program order keeping a per-block set of
//! available nodes, and checks operand-by-operand that every input of every
//! scheduled node was available at that point. Merge control inputs, phi
//! inputs (checked per-branch at the ends) and loop-exit proxy values
//! (re-materializations of loop-interior values) are the special-cased
//! pre-conditions, not generic inputs.
//!
//! This costs another full graph walk, so it only runs under
//! [`debug_verify_graph!`](crate::debug_verify_graph).

use std::fmt;

use bit_set::BitSet;
use cranelift_entity::{EntityRef, SecondaryMap};

use crate::{
    node::{Block, Node, NodeKind, SsaGraph},
    order::Schedule,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// `input` was not available when `node` was reached in `block`.
    OperandUnavailable {
        block: Block,
        node: Node,
        input: Node,
    },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperandUnavailable { block, node, input } => write!(
                f,
                "{node:?} in {block:?} uses {input:?}, which is not available \
                 at that point"
            ),
        }
    }
}

impl std::error::Error for ScheduleError {}

pub fn verify_schedule(graph: &SsaGraph, schedule: &Schedule) -> Result<(), ScheduleError> {
    let mut avail_out: SecondaryMap<Block, BitSet> = SecondaryMap::new();
    let mut processed = BitSet::new();

    for &block in graph.block_order() {
        // Meet over predecessors. Back edges are unprocessed at this point;
        // the values they carry re-enter through phis and proxies, which are
        // handled below.
        let mut avail: Option<BitSet> = None;
        for &pred in graph.preds_of(block) {
            if !processed.contains(pred.index()) {
                continue;
            }
            match &mut avail {
                None => avail = Some(avail_out[pred].clone()),
                Some(set) => set.intersect_with(&avail_out[pred]),
            }
        }
        let mut avail = avail.unwrap_or_default();

        for &node in schedule.nodes_of(block) {
            let data = graph.node(node);
            match data.kind {
                // Control inputs of joins are branch ends, one per
                // predecessor; they are never all available at once.
                NodeKind::Merge | NodeKind::LoopExit => {}
                // Phi values are checked per-branch at the ends below.
                NodeKind::Phi { .. } => {}
                // A proxy re-materializes a loop-interior value at the
                // exit; its input lives on a path the meet above discarded.
                NodeKind::Proxy { .. } => {}
                NodeKind::End => {
                    if let Some(merge) = graph.merge_of_end(node) {
                        let index = graph.branch_index(merge, node);
                        for &phi in graph.selectors_of(merge) {
                            let value = graph.node(phi).inputs()[index];
                            if !avail.contains(value.index()) {
                                return Err(ScheduleError::OperandUnavailable {
                                    block,
                                    node,
                                    input: value,
                                });
                            }
                        }
                    }
                }
                _ => {
                    for &input in data.inputs() {
                        if !avail.contains(input.index()) {
                            return Err(ScheduleError::OperandUnavailable {
                                block,
                                node,
                                input,
                            });
                        }
                    }
                }
            }

            avail.insert(node.index());
            // state_after is exempt: the snapshot may reference the node it
            // is attached to and is scheduled right after it anyway.
        }

        avail_out[block] = avail;
        processed.insert(block.index());
    }

    Ok(())
}

pub fn verify_schedule_or_panic(graph: &SsaGraph, schedule: &Schedule) {
    if let Err(err) = verify_schedule(graph, schedule) {
        panic!("schedule verification failed: {err}");
    }
}
