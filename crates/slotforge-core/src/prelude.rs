//! Convenient re-exports for downstream crates.

pub use crate::abt::{
    CollationOp, CompoundBound, CompoundInterval, DistributionType, Expr, FieldProjectionMap,
    GroupNodeType, JoinType, LimitSkipRequirement, Node, NodeKind, Operations, Path, PlanBuilder,
    ProjectionName, ProjectionSet, SpoolConsumerType, SpoolProducerType,
};
pub use crate::config::LoweringConfig;
pub use crate::error::{Error, Result};
pub use crate::id::{FrameId, InputParamId, NodeId, PlanNodeId, SlotId, SpoolId};
pub use crate::names::NameGenerator;
pub use crate::props::{NodeProps, NodePropsTable};
pub use crate::scan_def::{IndexCollationEntry, ScanDefinition, ScanDefinitions};
pub use crate::value::{TypeTag, Value};
