#![forbid(unsafe_code)]
//! slotforge-lower: optimizer ABT -> slot-based stage tree.
//!
//! Pipeline:
//!   * `rewrite`: path lowering and constant evaluation, alternated until a
//!     full round changes nothing (bounded by `max_rewrite_rounds`)
//!   * `node_lower`: bottom-up translation of physical nodes into stages,
//!     allocating slots as projections come into scope
//!   * `expr_lower`: path-free expressions -> `EExpr`, resolving variables
//!     to slots and deduplicating `getParam` references
//!
//! All state (name/slot/frame generators, runtime environment, parameter map)
//! lives in one `CompilationContext` per invocation.

pub mod context;
pub mod dsl;
pub mod env;
pub mod expr_lower;
pub mod lower;
pub mod node_lower;
pub mod physical;
pub mod rewrite;
pub mod trace;

pub use context::{CompilationContext, LoweringOptions};
pub use dsl::plan::{parse_plan_json, PlanDocument};
pub use dsl::yaml::parse_yaml_catalog;
pub use env::VariableEnvironment;
pub use expr_lower::{lower_expression, ExprLowering};
pub use lower::{lower_plan, lower_plan_with_context, optimize_expression};
pub use node_lower::{NodeLowering, SlotVarMap};
pub use physical::LoweredPlan;
pub use rewrite::{rewrite_to_fixpoint, RewriteOutcome, Transformed};
