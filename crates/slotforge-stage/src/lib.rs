#![forbid(unsafe_code)]
//! slotforge-stage: the executable side of lowering.
//!
//! Design intent:
//! - Stages and scalar expressions are plain data; nothing here executes
//!   against storage.
//! - Slots are the only way values flow between stages. The runtime
//!   environment owns the globally named ones (shard filterer, parameters).
//! - `eval` is a small reference interpreter for storage-free stages, used to
//!   check stage semantics in tests and diagnostics.

pub mod builtins;
pub mod eval;
pub mod expr;
pub mod printer;
pub mod runtime;
pub mod stage;

pub use eval::{EvalError, Evaluator, Row};
pub use expr::{EExpr, EPrimBinary, EPrimUnary};
pub use printer::{strip_uuids, DebugPrinter};
pub use runtime::{InputParamToSlotMap, NoYield, RuntimeEnvironment, YieldPolicy};
pub use stage::{SortDirection, Stage, StageKind};
