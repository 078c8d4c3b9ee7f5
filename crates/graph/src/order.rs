//! Total ordering of the SSA graph.
//!
//! Every later phase (scheduling, register allocation) assumes a single
//! total order of fixed nodes with floating nodes placed between their last
//! input and first usage. This pass produces such an order and, in doing so,
//! proves that the graph has no illegal cycle: a floating data-dependency
//! chain must never reach a fixed node that is not already ordered.
//!
//! The traversal is an explicit-stack DFS (deep expression trees would
//! overflow the call stack otherwise), it skips `state_after` edges (those
//! may legally cycle and are re-visited separately after the node), and it
//! emits, per fixed node: the node's floating inputs in dependency order,
//! then branch-selected phi values for ends, then the node itself, then a
//! join's phis, then its state snapshot.

use std::fmt;

use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::node::{Block, Node, NodeKind, SsaGraph};

/// The block-to-ordered-node-list mapping consumed by the scheduler.
#[derive(Debug, Default)]
pub struct Schedule {
    order: SecondaryMap<Block, Vec<Node>>,
}

impl Schedule {
    pub fn nodes_of(&self, block: Block) -> &[Node] {
        &self.order[block]
    }

    /// Replace a block's node list; used by downstream schedulers that
    /// re-arrange floating nodes before re-verification.
    pub fn set_nodes(&mut self, block: Block, nodes: Vec<Node>) {
        self.order[block] = nodes;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphOrderError {
    /// A floating data-dependency chain reached a node that must already be
    /// ordered (a fixed node, a phi, or a proxy) but is not: the graph
    /// violates the total-order invariant.
    Cycle { node: Node },
}

impl fmt::Display for GraphOrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cycle { node } => write!(
                f,
                "unexpected cycle: {node:?} is reachable through data inputs \
                 before it is ordered"
            ),
        }
    }
}

impl std::error::Error for GraphOrderError {}

pub fn create_order(graph: &SsaGraph) -> Result<Schedule, GraphOrderError> {
    GraphOrder::default().compute(graph)
}

/// Like [`create_order`], but treats a malformed graph as the fatal internal
/// defect it is.
pub fn create_order_or_panic(graph: &SsaGraph) -> Schedule {
    match create_order(graph) {
        Ok(schedule) => schedule,
        Err(err) => panic!("graph order verification failed: {err}"),
    }
}

#[derive(Default)]
pub struct GraphOrder {
    state: SecondaryMap<Node, NodeState>,
}

impl GraphOrder {
    pub fn compute(&mut self, graph: &SsaGraph) -> Result<Schedule, GraphOrderError> {
        let mut schedule = Schedule::default();

        for &block in graph.block_order() {
            let mut order = Vec::new();
            for &fixed in graph.fixed_nodes(block) {
                self.emit_fixed(graph, fixed, &mut order)?;
            }
            schedule.order[block] = order;
        }

        debug!(
            blocks = graph.block_order().len(),
            nodes = graph.num_nodes(),
            "graph order created"
        );
        Ok(schedule)
    }

    fn emit_fixed(
        &mut self,
        graph: &SsaGraph,
        fixed: Node,
        order: &mut Vec<Node>,
    ) -> Result<(), GraphOrderError> {
        // (1) floating inputs, transitively, in dependency order. A join's
        // inputs are its branch ends: forward ends are already scheduled in
        // their own blocks, and a loop's back-edge end legitimately comes
        // later, so joins skip this step.
        if !matches!(graph.node(fixed).kind, NodeKind::Merge | NodeKind::LoopExit) {
            self.emit_inputs(graph, fixed, order)?;
        }

        // (2) for a branch end, the values its destination's phis select for
        // this branch.
        if matches!(graph.node(fixed).kind, NodeKind::End) {
            if let Some(merge) = graph.merge_of_end(fixed) {
                let index = graph.branch_index(merge, fixed);
                for &phi in graph.selectors_of(merge) {
                    let value = graph.node(phi).inputs()[index];
                    self.emit_value(graph, value, order)?;
                }
            }
        }

        // (3) the fixed node itself.
        self.mark_ordered(fixed, order);

        // (4) a join's phis (or a loop exit's proxies) become available at
        // the join; their values were emitted at the branch ends or inside
        // the loop.
        if matches!(graph.node(fixed).kind, NodeKind::Merge | NodeKind::LoopExit) {
            for &selector in graph.selectors_of(fixed) {
                self.mark_ordered(selector, order);
            }
        }

        // (5) the state snapshot last; it may reference the node itself.
        if let Some(state) = graph.node(fixed).state_after() {
            self.emit_value(graph, state, order)?;
        }

        Ok(())
    }

    /// Emit one floating node after its transitive floating inputs; no-op if
    /// it is already ordered.
    fn emit_value(
        &mut self,
        graph: &SsaGraph,
        value: Node,
        order: &mut Vec<Node>,
    ) -> Result<(), GraphOrderError> {
        if self.state[value].is_ordered() {
            return Ok(());
        }
        if is_pinned(graph, value) {
            return Err(GraphOrderError::Cycle { node: value });
        }

        self.state[value].set_visiting();
        self.emit_inputs(graph, value, order)?;
        self.mark_ordered(value, order);
        Ok(())
    }

    /// DFS over `root`'s data inputs with an explicit stack, emitting every
    /// floating node on the way in dependency order. `root` itself is not
    /// emitted. `state_after` edges are not inputs and are never followed
    /// here.
    fn emit_inputs(
        &mut self,
        graph: &SsaGraph,
        root: Node,
        order: &mut Vec<Node>,
    ) -> Result<(), GraphOrderError> {
        let mut stack: SmallVec<[(Node, usize); 8]> = SmallVec::new();
        stack.push((root, 0));

        while let Some((node, idx)) = stack.last_mut() {
            let node = *node;
            let inputs = graph.node(node).inputs();
            if *idx < inputs.len() {
                let input = inputs[*idx];
                *idx += 1;

                if self.state[input].is_ordered() {
                    continue;
                }
                // A pinned node (fixed, phi, proxy) reached through pure
                // data edges before it is ordered, or a floating node still
                // on the DFS stack: either way the total order is violated.
                if is_pinned(graph, input) || self.state[input].is_visiting() {
                    return Err(GraphOrderError::Cycle { node: input });
                }

                self.state[input].set_visiting();
                stack.push((input, 0));
            } else {
                stack.pop();
                if node != root {
                    self.mark_ordered(node, order);
                }
            }
        }

        Ok(())
    }

    fn mark_ordered(&mut self, node: Node, order: &mut Vec<Node>) {
        debug_assert!(!self.state[node].is_ordered(), "{node:?} ordered twice");
        self.state[node].set_ordered();
        order.push(node);
    }
}

/// Nodes that may only be consumed once some fixed node has ordered them:
/// fixed nodes themselves, phis (ordered at their merge), and proxies
/// (ordered at their loop exit).
fn is_pinned(graph: &SsaGraph, node: Node) -> bool {
    graph.node(node).is_fixed()
        || matches!(
            graph.node(node).kind,
            NodeKind::Phi { .. } | NodeKind::Proxy { .. }
        )
}

#[derive(Default, Debug, Clone, Copy)]
struct NodeState(u8);

impl NodeState {
    fn is_visiting(self) -> bool {
        self.0 == 1
    }

    fn is_ordered(self) -> bool {
        self.0 == 2
    }

    fn set_visiting(&mut self) {
        self.0 = 1;
    }

    fn set_ordered(&mut self) {
        self.0 = 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// start(b0) -> if with a floating condition chain.
    #[test]
    fn floating_inputs_in_dependency_order() {
        let mut graph = SsaGraph::new();
        let b0 = graph.make_block();

        graph.add_fixed(b0, NodeKind::Start);
        let a = graph.add_floating(NodeKind::Op { name: "const" });
        let b = graph.add_floating(NodeKind::Op { name: "neg" });
        graph.append_input(b, a);
        let ret = graph.add_fixed(b0, NodeKind::Ret);
        graph.append_input(ret, b);

        let schedule = create_order(&graph).unwrap();
        let order = schedule.nodes_of(b0);

        let pos = |n: Node| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(ret));
    }

    #[test]
    fn diamond_with_phi() {
        let mut graph = SsaGraph::new();
        let b0 = graph.make_block();
        let b1 = graph.make_block();
        let b2 = graph.make_block();
        let b3 = graph.make_block();
        graph.add_block_edge(b0, b1);
        graph.add_block_edge(b0, b2);
        graph.add_block_edge(b1, b3);
        graph.add_block_edge(b2, b3);

        graph.add_fixed(b0, NodeKind::Start);
        let cond = graph.add_floating(NodeKind::Op { name: "cond" });
        let branch = graph.add_fixed(b0, NodeKind::Op { name: "if" });
        graph.append_input(branch, cond);

        let end1 = graph.add_fixed(b1, NodeKind::End);
        let end2 = graph.add_fixed(b2, NodeKind::End);

        let merge = graph.add_fixed(b3, NodeKind::Merge);
        graph.append_input(merge, end1);
        graph.append_input(merge, end2);

        let v1 = graph.add_floating(NodeKind::Op { name: "c1" });
        let v2 = graph.add_floating(NodeKind::Op { name: "c2" });
        let phi = graph.add_phi(merge, &[v1, v2]);

        let ret = graph.add_fixed(b3, NodeKind::Ret);
        graph.append_input(ret, phi);

        let schedule = create_order(&graph).unwrap();

        // Each branch end is preceded by the value its phi selects.
        let order1 = schedule.nodes_of(b1);
        assert_eq!(order1, &[v1, end1]);
        let order2 = schedule.nodes_of(b2);
        assert_eq!(order2, &[v2, end2]);

        // The phi becomes available at the merge, before its usages.
        let order3 = schedule.nodes_of(b3);
        assert_eq!(order3, &[merge, phi, ret]);
    }

    #[test]
    fn loop_carried_phi_orders() {
        // b1 is a loop header: its merge joins the forward end from b0 with
        // its own back-edge end, and the phi's second value feeds on the
        // phi itself. This back edge is legal and must not be reported as a
        // cycle.
        let mut graph = SsaGraph::new();
        let b0 = graph.make_block();
        let b1 = graph.make_block();
        let b2 = graph.make_block();
        graph.add_block_edge(b0, b1);
        graph.add_block_edge(b1, b1);
        graph.add_block_edge(b1, b2);

        graph.add_fixed(b0, NodeKind::Start);
        let end0 = graph.add_fixed(b0, NodeKind::End);

        let merge = graph.add_fixed(b1, NodeKind::Merge);
        graph.append_input(merge, end0);

        let init = graph.add_floating(NodeKind::Op { name: "zero" });
        let step = graph.add_floating(NodeKind::Op { name: "add" });
        let phi = graph.add_phi(merge, &[init, step]);
        // The increment reads the phi it flows back into.
        graph.append_input(step, phi);

        let back_end = graph.add_fixed(b1, NodeKind::End);
        graph.append_input(merge, back_end);

        let exit = graph.add_fixed(b2, NodeKind::LoopExit);
        let proxy = graph.add_proxy(exit, phi);
        let ret = graph.add_fixed(b2, NodeKind::Ret);
        graph.append_input(ret, proxy);

        let schedule = create_order(&graph).unwrap();

        // The initial value travels on the forward edge, the increment on
        // the back edge, after the phi it reads.
        assert!(schedule.nodes_of(b0).contains(&init));
        let order1 = schedule.nodes_of(b1);
        let pos = |n: Node| order1.iter().position(|&x| x == n).unwrap();
        assert!(pos(merge) < pos(phi));
        assert!(pos(phi) < pos(step));
        assert!(pos(step) < pos(back_end));

        assert_eq!(crate::verify::verify_schedule(&graph, &schedule), Ok(()));
    }

    #[test]
    fn cycle_through_fixed_node_is_reported() {
        let mut graph = SsaGraph::new();
        let b0 = graph.make_block();
        let b1 = graph.make_block();
        graph.add_block_edge(b0, b1);

        graph.add_fixed(b0, NodeKind::Start);
        // A floating node depending on a fixed node of a *later* block.
        let later = graph.add_fixed(b1, NodeKind::Op { name: "late" });
        let floating = graph.add_floating(NodeKind::Op { name: "f" });
        graph.append_input(floating, later);
        let user = graph.add_fixed(b0, NodeKind::Op { name: "early" });
        graph.append_input(user, floating);
        graph.add_fixed(b1, NodeKind::Ret);

        assert_eq!(
            create_order(&graph).map(|_| ()),
            Err(GraphOrderError::Cycle { node: later })
        );
    }

    #[test]
    fn floating_cycle_is_reported() {
        let mut graph = SsaGraph::new();
        let b0 = graph.make_block();

        graph.add_fixed(b0, NodeKind::Start);
        let f1 = graph.add_floating(NodeKind::Op { name: "f1" });
        let f2 = graph.add_floating(NodeKind::Op { name: "f2" });
        graph.append_input(f1, f2);
        graph.append_input(f2, f1);
        let user = graph.add_fixed(b0, NodeKind::Ret);
        graph.append_input(user, f1);

        assert!(matches!(
            create_order(&graph),
            Err(GraphOrderError::Cycle { .. })
        ));
    }

    #[test]
    fn state_after_may_cycle() {
        let mut graph = SsaGraph::new();
        let b0 = graph.make_block();

        graph.add_fixed(b0, NodeKind::Start);
        let op = graph.add_fixed(b0, NodeKind::Op { name: "call" });
        let state = graph.add_floating(NodeKind::FrameState);
        // The snapshot references the node it is attached to; this is the
        // one legal kind of cycle.
        graph.append_input(state, op);
        graph.set_state_after(op, state);
        graph.add_fixed(b0, NodeKind::Ret);

        let schedule = create_order(&graph).unwrap();
        let order = schedule.nodes_of(b0);
        let pos = |n: Node| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(op) < pos(state));
    }

    #[test]
    #[should_panic(expected = "graph order verification failed")]
    fn or_panic_aborts() {
        let mut graph = SsaGraph::new();
        let b0 = graph.make_block();

        graph.add_fixed(b0, NodeKind::Start);
        let f1 = graph.add_floating(NodeKind::Op { name: "f1" });
        graph.append_input(f1, f1);
        let user = graph.add_fixed(b0, NodeKind::Ret);
        graph.append_input(user, f1);

        create_order_or_panic(&graph);
    }
}
