pub mod cfg;
pub mod domtree;
pub mod function;
pub mod inst;
pub mod loop_analysis;
pub mod value;

pub use cfg::ControlFlowGraph;
pub use domtree::DomTree;
pub use function::{Block, BlockData, Lir};
pub use inst::{Inst, InstData, InstKind};
pub use loop_analysis::{Loop, LoopTree};
pub use value::{Operand, OperandRole, PhysReg, StackSlot, VReg, ValueKind};
