//! SSI construction: make every value that is live across a block boundary
//! an explicit entry of that boundary's value list.
//!
//! After `build()`, each block's `live_in`/`live_out` is available; `finish()`
//! then attaches an outgoing value list to every terminator whose block has a
//! non-empty `live_out`, and an incoming value list to every label whose
//! predecessors make anything live-out.
//!
//! The incoming list is driven by the *union* of the predecessors' live-out
//! sets, not by this block's own `live_in`: a sibling predecessor may keep a
//! value live-out that this block never reads (a loop-exit edge under the
//! conservative loop rule, for instance). Such a slot holds the
//! [`Operand::Absent`] sentinel, which keeps incoming and outgoing list
//! lengths equal across every edge.

use opal_lir::{Block, ControlFlowGraph, Lir, LoopTree, Operand, VReg};
use tracing::debug;

use crate::{bitset::BitSet, liveness::AnalysisState};

/// How `live_in`/`live_out` are obtained before `finish()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SsiStrategy {
    /// Full iterate-to-fixpoint liveness. Exact on any CFG.
    Exact,
    /// One backward pass, no fixpoint. Over-approximates on irreducible
    /// control flow; much cheaper in compile time.
    #[default]
    Fast,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SsiConfig {
    pub strategy: SsiStrategy,
}

impl SsiConfig {
    pub fn exact() -> Self {
        Self {
            strategy: SsiStrategy::Exact,
        }
    }

    pub fn fast() -> Self {
        Self {
            strategy: SsiStrategy::Fast,
        }
    }
}

/// Builds SSI form for one function. One builder per compilation; callers
/// are strategy-agnostic once constructed.
pub struct SsiBuilder {
    config: SsiConfig,
    state: AnalysisState,
}

impl SsiBuilder {
    pub fn new(config: SsiConfig) -> Self {
        Self {
            config,
            state: AnalysisState::new(),
        }
    }

    /// Compute per-block live sets according to the configured strategy.
    ///
    /// # Panics
    ///
    /// Panics if the analysis leaves the entry block with a non-empty
    /// `live_in`, or (exact strategy) the fixpoint fails to converge. Both
    /// signal a compiler bug upstream.
    pub fn build(&mut self, lir: &Lir, cfg: &ControlFlowGraph, lpt: &LoopTree) {
        self.state.clear();
        self.state.compute_local_live_sets(lir);

        debug!(strategy = ?self.config.strategy, "building liveness");
        match self.config.strategy {
            SsiStrategy::Exact => self.state.solve_fixpoint(cfg, lpt),
            SsiStrategy::Fast => self.state.solve_single_pass(cfg, lpt),
        }
    }

    pub fn live_in(&self, block: Block) -> &BitSet<VReg> {
        self.state.live_in(block)
    }

    pub fn live_out(&self, block: Block) -> &BitSet<VReg> {
        self.state.live_out(block)
    }

    /// Materialize the boundary value lists. Runs once per compilation; the
    /// live sets computed by `build()` are read-only from here on.
    pub fn finish(&self, lir: &mut Lir, cfg: &ControlFlowGraph) {
        for block in cfg.post_order().collect::<Vec<_>>() {
            self.build_outgoing(lir, block);
            self.build_incoming(lir, cfg, block);
        }
    }

    fn build_outgoing(&self, lir: &mut Lir, block: Block) {
        let live_out = self.state.live_out(block);
        if live_out.is_empty() {
            return;
        }

        let term = lir
            .terminator_of(block)
            .unwrap_or_else(|| panic!("{block:?} has live-out values but no terminator"));
        let values: Vec<_> = live_out.iter().map(Operand::Virtual).collect();

        let outgoing = lir
            .inst_mut(term)
            .outgoing_mut()
            .expect("terminator carries an outgoing list");
        debug_assert!(outgoing.is_empty(), "outgoing list populated twice");
        outgoing.extend(values);
    }

    fn build_incoming(&self, lir: &mut Lir, cfg: &ControlFlowGraph, block: Block) {
        let mut pred_live_out = BitSet::new();
        for &pred in cfg.preds_of(block) {
            pred_live_out.union_with(self.state.live_out(pred));
        }
        if pred_live_out.is_empty() {
            return;
        }

        let live_in = self.state.live_in(block);
        let values: Vec<_> = pred_live_out
            .iter()
            .map(|vreg| {
                if live_in.contains(vreg) {
                    Operand::Virtual(vreg)
                } else {
                    // Live out of some-but-not-all predecessors; this block
                    // never reads it.
                    Operand::Absent
                }
            })
            .collect();

        let label = lir.label_of(block);
        let incoming = lir
            .inst_mut(label)
            .incoming_mut()
            .expect("label carries an incoming list");
        debug_assert!(incoming.is_empty(), "incoming list populated twice");
        incoming.extend(values);
    }
}
