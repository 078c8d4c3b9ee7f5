//! Block-local and global liveness over the LIR.
//!
//! This is the classic backward iterative dataflow formulation:
//!
//! > live_in(B)  = live_gen(B) ∪ (live_out(B) − live_kill(B))
//! > live_out(B) = ∪ live_in(S) over successors S of B
//!
//! with a conservative loop rule: everything live into a loop header is
//! treated as live throughout the loop, because the back edge would carry it
//! around anyway. This avoids a second fixpoint for loop-carried values at
//! the cost of some precision inside loop bodies; the downstream register
//! allocator is validated against exactly this result, so the trade-off is
//! deliberate and must not be "improved".

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};
use opal_lir::{Block, ControlFlowGraph, Inst, Lir, LoopTree, VReg};
use tracing::{debug, trace};

use crate::bitset::BitSet;

/// Hard cap on full backward sweeps. Liveness is monotonic, so this bound is
/// never reached unless the transfer function itself is buggy; hitting it is
/// a permanent bailout, not something to retry.
pub const MAX_FIXPOINT_ITERATIONS: usize = 50;

/// All mutable state of one liveness computation.
///
/// Owned exclusively by a single `build()` call; independent compilations
/// each carry their own `AnalysisState`, so there is nothing to share or
/// lock across threads.
#[derive(Default)]
pub struct AnalysisState {
    live_gen: SecondaryMap<Block, BitSet<VReg>>,
    live_kill: SecondaryMap<Block, BitSet<VReg>>,
    live_in: SecondaryMap<Block, BitSet<VReg>>,
    live_out: SecondaryMap<Block, BitSet<VReg>>,

    /// The canonical defining instruction of each vreg, recorded the first
    /// time a definition is seen. Used when materializing boundary value
    /// lists.
    def_inst: SecondaryMap<VReg, PackedOption<Inst>>,
}

impl AnalysisState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.live_gen.clear();
        self.live_kill.clear();
        self.live_in.clear();
        self.live_out.clear();
        self.def_inst.clear();
    }

    pub fn live_in(&self, block: Block) -> &BitSet<VReg> {
        &self.live_in[block]
    }

    pub fn live_out(&self, block: Block) -> &BitSet<VReg> {
        &self.live_out[block]
    }

    pub fn live_gen(&self, block: Block) -> &BitSet<VReg> {
        &self.live_gen[block]
    }

    pub fn live_kill(&self, block: Block) -> &BitSet<VReg> {
        &self.live_kill[block]
    }

    pub fn def_inst(&self, vreg: VReg) -> Option<Inst> {
        self.def_inst[vreg].expand()
    }

    /// Compute `live_gen`/`live_kill` for every block, independent of
    /// control flow.
    ///
    /// Instructions are scanned in reverse program order. Within one
    /// instruction, definitions are processed before uses, so an
    /// instruction that reads and writes the same vreg (compare-and-swap
    /// style) leaves the pre-instruction use live.
    pub fn compute_local_live_sets(&mut self, lir: &Lir) {
        for block in lir.iter_block() {
            let mut gen = BitSet::new();
            let mut kill = BitSet::new();

            let def_inst = &mut self.def_inst;
            for &inst in lir.block_insts(block).iter().rev() {
                lir.inst(inst).for_each_operand(|role, op| {
                    // Only virtual registers are tracked; physical registers,
                    // stack slots and immediates are skipped by design.
                    let Some(vreg) = op.as_virtual() else {
                        return;
                    };
                    if role.is_def() {
                        kill.insert(vreg);
                        gen.remove(vreg);
                        if def_inst[vreg].is_none() {
                            def_inst[vreg] = inst.into();
                        }
                    } else {
                        gen.insert(vreg);
                    }
                });
            }

            trace!(?block, ?gen, ?kill, "local live sets");
            self.live_gen[block] = gen;
            self.live_kill[block] = kill;
        }
    }

    /// Run backward sweeps over the CFG until `live_out` stops changing.
    ///
    /// Blocks are visited in post order so that successors are usually
    /// resolved before their predecessors; back edges are what forces the
    /// iteration.
    ///
    /// # Panics
    ///
    /// Panics if the sweep count exceeds [`MAX_FIXPOINT_ITERATIONS`] or the
    /// entry block ends up with a non-empty `live_in`. Both are internal
    /// compiler defects, not recoverable conditions.
    pub fn solve_fixpoint(&mut self, cfg: &ControlFlowGraph, lpt: &LoopTree) {
        let mut iteration = 0;
        loop {
            let mut changed = false;
            for block in cfg.post_order() {
                changed |= self.update_block(cfg, lpt, block, iteration == 0);
            }
            trace!(iteration, changed, "liveness sweep");

            if !changed {
                break;
            }
            iteration += 1;
            if iteration >= MAX_FIXPOINT_ITERATIONS {
                panic!(
                    "liveness fixpoint did not converge after {MAX_FIXPOINT_ITERATIONS} sweeps; \
                     the transfer function is not monotonic (permanent bailout)"
                );
            }
        }
        debug!(sweeps = iteration + 1, "liveness fixpoint reached");

        self.assert_entry_live_in_empty(cfg);
    }

    /// Single backward pass with no fixpoint iteration.
    ///
    /// Valid when the post-order visit resolves every successor before its
    /// predecessors, i.e. for reducible control flow with loop-carried
    /// values covered by the loop-header propagation. Irreducible flow only
    /// loses precision (sets are over-approximated), never soundness.
    pub fn solve_single_pass(&mut self, cfg: &ControlFlowGraph, lpt: &LoopTree) {
        for block in cfg.post_order() {
            self.update_block(cfg, lpt, block, true);
        }
        debug!("single-pass liveness done");

        self.assert_entry_live_in_empty(cfg);
    }

    /// Recompute `live_out` of one block from its successors, and `live_in`
    /// whenever `live_out` moved. Sets only ever grow. Returns whether
    /// `live_out` changed.
    fn update_block(
        &mut self,
        cfg: &ControlFlowGraph,
        lpt: &LoopTree,
        block: Block,
        force: bool,
    ) -> bool {
        let mut out = self.live_out[block].clone();
        for &succ in cfg.succs_of(block) {
            out.union_with(&self.live_in[succ]);
        }
        let changed = out != self.live_out[block];

        // Convergence is judged on `live_out` alone, and `live_in` is left
        // untouched while `live_out` holds still. Recomputing it anyway
        // would strip the loop-propagated values of a block that redefines
        // a loop-carried vreg, which the header below restores, sweep after
        // sweep, forever.
        if changed || force {
            let mut live_in = out.clone();
            self.live_out[block] = out;
            live_in.difference_with(&self.live_kill[block]);
            live_in.union_with(&self.live_gen[block]);
            self.live_in[block] = live_in;
        }

        // Anything live into a loop header is conservatively live throughout
        // the whole loop, inner loops included.
        if let Some(lp) = lpt.is_loop_header(block) {
            self.propagate_loop_live_set(cfg, lpt, lp, block);
        }

        changed
    }

    /// Union the loop header's `live_in` into the live sets of every block
    /// transitively contained in the loop.
    fn propagate_loop_live_set(
        &mut self,
        cfg: &ControlFlowGraph,
        lpt: &LoopTree,
        lp: opal_lir::Loop,
        header: Block,
    ) {
        let header_live_in = self.live_in[header].clone();
        if header_live_in.is_empty() {
            return;
        }

        for block in lpt.iter_blocks_post_order(cfg, lp) {
            let live_in = &mut self.live_in[block];
            if !header_live_in.is_subset(live_in) {
                live_in.union_with(&header_live_in);
            }
            let live_out = &mut self.live_out[block];
            if !header_live_in.is_subset(live_out) {
                live_out.union_with(&header_live_in);
            }
        }
    }

    fn assert_entry_live_in_empty(&self, cfg: &ControlFlowGraph) {
        let Some(entry) = cfg.entry() else {
            return;
        };
        let live_in = &self.live_in[entry];
        assert!(
            live_in.is_empty(),
            "liveness analysis is broken: {live_in:?} live-in at entry {entry:?} \
             (some value is used before any definition)"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_lir::{DomTree, InstData, Operand, ValueKind};

    fn analyze(lir: &Lir) -> (AnalysisState, ControlFlowGraph) {
        let mut cfg = ControlFlowGraph::new();
        cfg.compute(lir);
        let mut domtree = DomTree::new();
        domtree.compute(&cfg);
        let mut lpt = LoopTree::new();
        lpt.compute(&cfg, &domtree);

        let mut state = AnalysisState::new();
        state.compute_local_live_sets(lir);
        state.solve_fixpoint(&cfg, &lpt);
        (state, cfg)
    }

    #[test]
    fn local_sets_def_before_use() {
        // def(a); use(a); def(b) => gen = {}, kill = {a, b}
        let mut lir = Lir::new();
        let b0 = lir.make_block();
        let a = lir.make_vreg(ValueKind::Word);
        let b = lir.make_vreg(ValueKind::Word);

        lir.append_inst(b0, InstData::op("def_a").with_output(Operand::Virtual(a)));
        lir.append_inst(b0, InstData::op("use_a").with_use(Operand::Virtual(a)));
        lir.append_inst(b0, InstData::op("def_b").with_output(Operand::Virtual(b)));
        lir.append_inst(b0, InstData::ret());

        let mut state = AnalysisState::new();
        state.compute_local_live_sets(&lir);

        assert!(state.live_gen(b0).is_empty());
        assert_eq!(state.live_kill(b0), &[a, b].as_ref().into());
    }

    #[test]
    fn local_sets_use_before_def() {
        // use(a); def(a) => gen = {a}, kill = {a}
        let mut lir = Lir::new();
        let b0 = lir.make_block();
        let a = lir.make_vreg(ValueKind::Word);

        lir.append_inst(b0, InstData::op("use_a").with_use(Operand::Virtual(a)));
        lir.append_inst(b0, InstData::op("def_a").with_output(Operand::Virtual(a)));
        lir.append_inst(b0, InstData::ret());

        let mut state = AnalysisState::new();
        state.compute_local_live_sets(&lir);

        assert_eq!(state.live_gen(b0), &[a].as_ref().into());
        assert_eq!(state.live_kill(b0), &[a].as_ref().into());
    }

    #[test]
    fn self_referential_inst_keeps_input_live() {
        // A CAS-style instruction both defines and keeps alive the same
        // vreg: the pre-instruction value must stay live.
        let mut lir = Lir::new();
        let b0 = lir.make_block();
        let a = lir.make_vreg(ValueKind::Word);

        lir.append_inst(
            b0,
            InstData::op("cas")
                .with_output(Operand::Virtual(a))
                .with_alive(Operand::Virtual(a)),
        );
        lir.append_inst(b0, InstData::ret());

        let mut state = AnalysisState::new();
        state.compute_local_live_sets(&lir);

        assert_eq!(state.live_gen(b0), &[a].as_ref().into());
        assert_eq!(state.live_kill(b0), &[a].as_ref().into());
    }

    #[test]
    fn first_definition_is_representative() {
        let mut lir = Lir::new();
        let b0 = lir.make_block();
        let a = lir.make_vreg(ValueKind::Word);

        let def = lir.append_inst(b0, InstData::op("def_a").with_output(Operand::Virtual(a)));
        lir.append_inst(b0, InstData::op("use_a").with_use(Operand::Virtual(a)));
        lir.append_inst(b0, InstData::ret());

        let mut state = AnalysisState::new();
        state.compute_local_live_sets(&lir);

        assert_eq!(state.def_inst(a), Some(def));
    }

    #[test]
    fn straight_line_liveness() {
        let mut lir = Lir::new();
        let b0 = lir.make_block();
        let b1 = lir.make_block();
        let a = lir.make_vreg(ValueKind::Word);

        lir.append_inst(b0, InstData::op("def_a").with_output(Operand::Virtual(a)));
        lir.append_inst(b0, InstData::jump(b1));
        lir.append_inst(b1, InstData::op("use_a").with_use(Operand::Virtual(a)));
        lir.append_inst(b1, InstData::ret());

        let (state, _) = analyze(&lir);

        assert!(state.live_in(b0).is_empty());
        assert_eq!(state.live_out(b0), &[a].as_ref().into());
        assert_eq!(state.live_in(b1), &[a].as_ref().into());
        assert!(state.live_out(b1).is_empty());
    }

    #[test]
    fn loop_conservatism() {
        // header -> body -> header, header -> exit; `a` is live into the
        // header, so it must be live in/out of every loop block.
        let mut lir = Lir::new();
        let b0 = lir.make_block();
        let header = lir.make_block();
        let body = lir.make_block();
        let exit = lir.make_block();

        let a = lir.make_vreg(ValueKind::Word);
        let c = lir.make_vreg(ValueKind::Word);

        lir.append_inst(b0, InstData::op("def_a").with_output(Operand::Virtual(a)));
        lir.append_inst(b0, InstData::op("def_c").with_output(Operand::Virtual(c)));
        lir.append_inst(b0, InstData::jump(header));

        lir.append_inst(
            header,
            InstData::op("use_a").with_use(Operand::Virtual(a)),
        );
        lir.append_inst(header, InstData::branch(Operand::Virtual(c), body, exit));

        // The body neither uses nor defines `a`.
        lir.append_inst(body, InstData::op("work"));
        lir.append_inst(body, InstData::jump(header));

        lir.append_inst(exit, InstData::ret());

        let (state, _) = analyze(&lir);

        for block in [header, body] {
            assert!(state.live_in(block).contains(a), "{block:?} live_in");
            assert!(state.live_out(block).contains(a), "{block:?} live_out");
        }
        assert!(!state.live_in(exit).contains(a));
    }

    #[test]
    fn loop_body_redefinition_converges() {
        // The body clobbers a loop-carried value: recomputing the body's
        // live_in kills `v`, the header's loop rule restores it. The solver
        // must still reach a fixpoint, with `v` live throughout the loop.
        let mut lir = Lir::new();
        let b0 = lir.make_block();
        let header = lir.make_block();
        let body = lir.make_block();
        let exit = lir.make_block();

        let v = lir.make_vreg(ValueKind::Word);
        let c = lir.make_vreg(ValueKind::Word);

        lir.append_inst(b0, InstData::op("def_v").with_output(Operand::Virtual(v)));
        lir.append_inst(b0, InstData::op("def_c").with_output(Operand::Virtual(c)));
        lir.append_inst(b0, InstData::jump(header));

        lir.append_inst(header, InstData::op("use_v").with_use(Operand::Virtual(v)));
        lir.append_inst(header, InstData::branch(Operand::Virtual(c), body, exit));

        lir.append_inst(
            body,
            InstData::op("redef_v").with_output(Operand::Virtual(v)),
        );
        lir.append_inst(body, InstData::jump(header));

        lir.append_inst(exit, InstData::ret());

        let (state, _) = analyze(&lir);

        assert!(state.live_in(body).contains(v));
        assert!(state.live_out(body).contains(v));
        assert!(state.live_in(b0).is_empty());
    }

    #[test]
    fn fixpoint_is_idempotent() {
        let mut lir = Lir::new();
        let b0 = lir.make_block();
        let header = lir.make_block();
        let body = lir.make_block();
        let exit = lir.make_block();

        let a = lir.make_vreg(ValueKind::Word);
        let c = lir.make_vreg(ValueKind::Word);

        lir.append_inst(b0, InstData::op("def_a").with_output(Operand::Virtual(a)));
        lir.append_inst(b0, InstData::op("def_c").with_output(Operand::Virtual(c)));
        lir.append_inst(b0, InstData::jump(header));
        lir.append_inst(header, InstData::branch(Operand::Virtual(c), body, exit));
        lir.append_inst(body, InstData::op("use_a").with_use(Operand::Virtual(a)));
        lir.append_inst(body, InstData::jump(header));
        lir.append_inst(exit, InstData::ret());

        let mut cfg = ControlFlowGraph::new();
        cfg.compute(&lir);
        let mut domtree = DomTree::new();
        domtree.compute(&cfg);
        let mut lpt = LoopTree::new();
        lpt.compute(&cfg, &domtree);

        let mut state = AnalysisState::new();
        state.compute_local_live_sets(&lir);
        state.solve_fixpoint(&cfg, &lpt);

        let before: Vec<_> = lir
            .iter_block()
            .map(|b| (state.live_in(b).clone(), state.live_out(b).clone()))
            .collect();

        // Re-running the solver on its own output must change nothing.
        state.solve_fixpoint(&cfg, &lpt);

        for (b, (live_in, live_out)) in lir.iter_block().zip(before) {
            assert_eq!(state.live_in(b), &live_in);
            assert_eq!(state.live_out(b), &live_out);
        }
    }

    #[test]
    #[should_panic(expected = "live-in at entry")]
    fn use_without_any_def_is_fatal() {
        let mut lir = Lir::new();
        let b0 = lir.make_block();
        let a = lir.make_vreg(ValueKind::Word);

        lir.append_inst(b0, InstData::op("use_a").with_use(Operand::Virtual(a)));
        lir.append_inst(b0, InstData::ret());

        analyze(&lir);
    }
}
