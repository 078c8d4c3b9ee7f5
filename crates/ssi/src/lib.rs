pub mod bitset;
pub mod builder;
pub mod liveness;
pub mod verify;

pub use bitset::BitSet;
pub use builder::{SsiBuilder, SsiConfig, SsiStrategy};
pub use liveness::{AnalysisState, MAX_FIXPOINT_ITERATIONS};
pub use verify::{verify_ssi, verify_ssi_or_panic, SsiError};

/// Re-check SSI invariants after construction in debug builds (or always,
/// with the `verify-ssi` feature).
#[macro_export]
macro_rules! debug_verify_ssi {
    ($lir:expr, $cfg:expr) => {{
        if cfg!(debug_assertions) || cfg!(feature = "verify-ssi") {
            $crate::verify_ssi_or_panic($lir, $cfg);
        }
    }};
}
