#![forbid(unsafe_code)]
//! slotforge: lowers optimizer ABT plans into slot-based stage trees.
//!
//! This crate only re-exports the workspace crates so integration tests and
//! benches can depend on one name.

pub use slotforge_core;
pub use slotforge_lower;
pub use slotforge_stage;

pub use slotforge_core::error::{Error, Result};
pub use slotforge_lower::{lower_plan, LoweredPlan, LoweringOptions};
