pub mod node;
pub mod order;
pub mod verify;

pub use node::{Block, Node, NodeData, NodeKind, SsaGraph};
pub use order::{create_order, create_order_or_panic, GraphOrder, GraphOrderError, Schedule};
pub use verify::{verify_schedule, verify_schedule_or_panic, ScheduleError};

/// Create and cross-check a graph order in debug builds (or always, with
/// the `verify-graph` feature), panicking on any violation.
#[macro_export]
macro_rules! debug_verify_graph {
    ($graph:expr) => {{
        if cfg!(debug_assertions) || cfg!(feature = "verify-graph") {
            let schedule = $crate::create_order_or_panic($graph);
            $crate::verify_schedule_or_panic($graph, &schedule);
        }
    }};
}
