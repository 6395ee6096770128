//! Plan nodes.
//!
//! Every `Node` carries the `NodeId` it was registered under; per-node
//! lowering properties live in a side table keyed by that id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    CollationSpec, DistributionType, Expr, FieldName, GroupNodeType, JoinType, ProjectionName,
    ProjectionSet, SpoolConsumerType, SpoolProducerType,
};
use crate::error::Result;
use crate::id::{NodeId, SpoolId};

/// Which projections a scan-like node binds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldProjectionMap {
    pub rid_projection: Option<ProjectionName>,
    pub root_projection: Option<ProjectionName>,
    /// Top-level field name -> projection.
    pub field_projections: BTreeMap<FieldName, ProjectionName>,
}

impl FieldProjectionMap {
    pub fn root(name: impl Into<ProjectionName>) -> Self {
        Self {
            root_projection: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_rid(mut self, name: impl Into<ProjectionName>) -> Self {
        self.rid_projection = Some(name.into());
        self
    }

    pub fn with_field(
        mut self,
        field: impl Into<FieldName>,
        name: impl Into<ProjectionName>,
    ) -> Self {
        self.field_projections.insert(field.into(), name.into());
        self
    }

    /// Every projection this map binds, rid first, then root, then fields.
    pub fn projections(&self) -> Vec<ProjectionName> {
        let mut out = Vec::new();
        out.extend(self.rid_projection.iter().cloned());
        out.extend(self.root_projection.iter().cloned());
        out.extend(self.field_projections.values().cloned());
        out
    }
}

/// One side of an index interval: a value per indexed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundBound {
    pub inclusive: bool,
    pub bound: Vec<Expr>,
}

impl CompoundBound {
    pub fn new(inclusive: bool, bound: Vec<Expr>) -> Self {
        Self { inclusive, bound }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundInterval {
    pub low: CompoundBound,
    pub high: CompoundBound,
}

/// Limit/skip amounts; `None` means "not set", which differs from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSkipRequirement {
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

impl LimitSkipRequirement {
    pub fn new(limit: Option<u64>, skip: Option<u64>) -> Self {
        Self { limit, skip }
    }

    /// Interprets zero as "not set" for both amounts.
    pub fn from_raw(limit: u64, skip: u64) -> Self {
        Self {
            limit: (limit != 0).then_some(limit),
            skip: (skip != 0).then_some(skip),
        }
    }

    /// Rows a top-k consumer has to keep: limit plus skip.
    pub fn absolute_limit(&self) -> Option<u64> {
        self.limit.map(|l| l.saturating_add(self.skip.unwrap_or(0)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    PhysicalScan {
        fpm: FieldProjectionMap,
        scan_def_name: String,
        parallel: bool,
    },
    IndexScan {
        fpm: FieldProjectionMap,
        scan_def_name: String,
        index_def_name: String,
        interval: CompoundInterval,
        reversed: bool,
    },
    Seek {
        rid_projection: ProjectionName,
        fpm: FieldProjectionMap,
        scan_def_name: String,
    },
    CoScan,
    Filter {
        filter: Expr,
        child: Box<Node>,
    },
    Evaluation {
        projection: ProjectionName,
        expr: Expr,
        child: Box<Node>,
    },
    GroupBy {
        group_keys: Vec<ProjectionName>,
        agg_projections: Vec<ProjectionName>,
        agg_exprs: Vec<Expr>,
        group_type: GroupNodeType,
        child: Box<Node>,
    },
    HashJoin {
        join_type: JoinType,
        left_keys: Vec<ProjectionName>,
        right_keys: Vec<ProjectionName>,
        left: Box<Node>,
        right: Box<Node>,
    },
    MergeJoin {
        left_keys: Vec<ProjectionName>,
        right_keys: Vec<ProjectionName>,
        collation: Vec<super::CollationOp>,
        left: Box<Node>,
        right: Box<Node>,
    },
    NestedLoopJoin {
        join_type: JoinType,
        correlated: ProjectionSet,
        filter: Expr,
        left: Box<Node>,
        right: Box<Node>,
    },
    Collation {
        spec: CollationSpec,
        child: Box<Node>,
    },
    LimitSkip {
        req: LimitSkipRequirement,
        child: Box<Node>,
    },
    Union {
        projections: Vec<ProjectionName>,
        children: Vec<Node>,
    },
    SortedMerge {
        collation: CollationSpec,
        projections: Vec<ProjectionName>,
        children: Vec<Node>,
    },
    Unique {
        keys: Vec<ProjectionName>,
        child: Box<Node>,
    },
    Unwind {
        projection: ProjectionName,
        pid_projection: ProjectionName,
        retain_non_arrays: bool,
        child: Box<Node>,
    },
    SpoolProducer {
        kind: SpoolProducerType,
        spool_id: SpoolId,
        projections: Vec<ProjectionName>,
        filter: Expr,
        child: Box<Node>,
    },
    SpoolConsumer {
        kind: SpoolConsumerType,
        spool_id: SpoolId,
        projections: Vec<ProjectionName>,
    },
    Exchange {
        distribution: DistributionType,
        child: Box<Node>,
    },
    Root {
        projections: ProjectionSet,
        child: Box<Node>,
    },
    /// Logical collection scan; replaced by the optimizer before lowering.
    Scan {
        projection: ProjectionName,
        scan_def_name: String,
    },
    /// Logical rid intersection; replaced by the optimizer before lowering.
    RidIntersect {
        scan_projection: ProjectionName,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::PhysicalScan { .. } => "PhysicalScan",
            NodeKind::IndexScan { .. } => "IndexScan",
            NodeKind::Seek { .. } => "Seek",
            NodeKind::CoScan => "CoScan",
            NodeKind::Filter { .. } => "Filter",
            NodeKind::Evaluation { .. } => "Evaluation",
            NodeKind::GroupBy { .. } => "GroupBy",
            NodeKind::HashJoin { .. } => "HashJoin",
            NodeKind::MergeJoin { .. } => "MergeJoin",
            NodeKind::NestedLoopJoin { .. } => "NestedLoopJoin",
            NodeKind::Collation { .. } => "Collation",
            NodeKind::LimitSkip { .. } => "LimitSkip",
            NodeKind::Union { .. } => "Union",
            NodeKind::SortedMerge { .. } => "SortedMerge",
            NodeKind::Unique { .. } => "Unique",
            NodeKind::Unwind { .. } => "Unwind",
            NodeKind::SpoolProducer { .. } => "SpoolProducer",
            NodeKind::SpoolConsumer { .. } => "SpoolConsumer",
            NodeKind::Exchange { .. } => "Exchange",
            NodeKind::Root { .. } => "Root",
            NodeKind::Scan { .. } => "Scan",
            NodeKind::RidIntersect { .. } => "RidIntersect",
        }
    }

    pub fn is_physical(&self) -> bool {
        !matches!(self, NodeKind::Scan { .. } | NodeKind::RidIntersect { .. })
    }
}

impl Node {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::PhysicalScan { .. }
            | NodeKind::IndexScan { .. }
            | NodeKind::Seek { .. }
            | NodeKind::CoScan
            | NodeKind::SpoolConsumer { .. }
            | NodeKind::Scan { .. } => Vec::new(),
            NodeKind::Filter { child, .. }
            | NodeKind::Evaluation { child, .. }
            | NodeKind::GroupBy { child, .. }
            | NodeKind::Collation { child, .. }
            | NodeKind::LimitSkip { child, .. }
            | NodeKind::Unique { child, .. }
            | NodeKind::Unwind { child, .. }
            | NodeKind::SpoolProducer { child, .. }
            | NodeKind::Exchange { child, .. }
            | NodeKind::Root { child, .. } => vec![child.as_ref()],
            NodeKind::HashJoin { left, right, .. }
            | NodeKind::MergeJoin { left, right, .. }
            | NodeKind::NestedLoopJoin { left, right, .. }
            | NodeKind::RidIntersect { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            NodeKind::Union { children, .. } | NodeKind::SortedMerge { children, .. } => {
                children.iter().collect()
            }
        }
    }

    /// Pre-order walk over this node and all its descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Expressions owned directly by this node (not its children).
    pub fn exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            NodeKind::Filter { filter, .. } => vec![filter],
            NodeKind::Evaluation { expr, .. } => vec![expr],
            NodeKind::GroupBy { agg_exprs, .. } => agg_exprs.iter().collect(),
            NodeKind::NestedLoopJoin { filter, .. } | NodeKind::SpoolProducer { filter, .. } => {
                vec![filter]
            }
            NodeKind::IndexScan { interval, .. } => interval
                .low
                .bound
                .iter()
                .chain(interval.high.bound.iter())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Rebuild this tree bottom-up, applying `f` to every expression.
    ///
    /// Node ids are preserved so the properties table stays valid.
    pub fn try_map_exprs(self, f: &mut dyn FnMut(Expr) -> Result<Expr>) -> Result<Node> {
        let Node { id, kind } = self;
        fn map_child(
            c: Box<Node>,
            f: &mut dyn FnMut(Expr) -> Result<Expr>,
        ) -> Result<Box<Node>> {
            Ok(Box::new(c.try_map_exprs(f)?))
        }
        let kind = match kind {
            NodeKind::Filter { filter, child } => {
                let child = map_child(child, f)?;
                NodeKind::Filter {
                    filter: f(filter)?,
                    child,
                }
            }
            NodeKind::Evaluation {
                projection,
                expr,
                child,
            } => {
                let child = map_child(child, f)?;
                NodeKind::Evaluation {
                    projection,
                    expr: f(expr)?,
                    child,
                }
            }
            NodeKind::GroupBy {
                group_keys,
                agg_projections,
                agg_exprs,
                group_type,
                child,
            } => {
                let child = map_child(child, f)?;
                NodeKind::GroupBy {
                    group_keys,
                    agg_projections,
                    agg_exprs: agg_exprs.into_iter().map(|e| f(e)).collect::<Result<_>>()?,
                    group_type,
                    child,
                }
            }
            NodeKind::HashJoin {
                join_type,
                left_keys,
                right_keys,
                left,
                right,
            } => NodeKind::HashJoin {
                join_type,
                left_keys,
                right_keys,
                left: map_child(left, f)?,
                right: map_child(right, f)?,
            },
            NodeKind::MergeJoin {
                left_keys,
                right_keys,
                collation,
                left,
                right,
            } => NodeKind::MergeJoin {
                left_keys,
                right_keys,
                collation,
                left: map_child(left, f)?,
                right: map_child(right, f)?,
            },
            NodeKind::NestedLoopJoin {
                join_type,
                correlated,
                filter,
                left,
                right,
            } => {
                let left = map_child(left, f)?;
                let right = map_child(right, f)?;
                NodeKind::NestedLoopJoin {
                    join_type,
                    correlated,
                    filter: f(filter)?,
                    left,
                    right,
                }
            }
            NodeKind::Collation { spec, child } => NodeKind::Collation {
                spec,
                child: map_child(child, f)?,
            },
            NodeKind::LimitSkip { req, child } => NodeKind::LimitSkip {
                req,
                child: map_child(child, f)?,
            },
            NodeKind::Union {
                projections,
                children,
            } => NodeKind::Union {
                projections,
                children: children
                    .into_iter()
                    .map(|c| c.try_map_exprs(f))
                    .collect::<Result<_>>()?,
            },
            NodeKind::SortedMerge {
                collation,
                projections,
                children,
            } => NodeKind::SortedMerge {
                collation,
                projections,
                children: children
                    .into_iter()
                    .map(|c| c.try_map_exprs(f))
                    .collect::<Result<_>>()?,
            },
            NodeKind::Unique { keys, child } => NodeKind::Unique {
                keys,
                child: map_child(child, f)?,
            },
            NodeKind::Unwind {
                projection,
                pid_projection,
                retain_non_arrays,
                child,
            } => NodeKind::Unwind {
                projection,
                pid_projection,
                retain_non_arrays,
                child: map_child(child, f)?,
            },
            NodeKind::SpoolProducer {
                kind,
                spool_id,
                projections,
                filter,
                child,
            } => {
                let child = map_child(child, f)?;
                NodeKind::SpoolProducer {
                    kind,
                    spool_id,
                    projections,
                    filter: f(filter)?,
                    child,
                }
            }
            NodeKind::Exchange {
                distribution,
                child,
            } => NodeKind::Exchange {
                distribution,
                child: map_child(child, f)?,
            },
            NodeKind::Root { projections, child } => NodeKind::Root {
                projections,
                child: map_child(child, f)?,
            },
            NodeKind::RidIntersect {
                scan_projection,
                left,
                right,
            } => NodeKind::RidIntersect {
                scan_projection,
                left: map_child(left, f)?,
                right: map_child(right, f)?,
            },
            NodeKind::IndexScan {
                fpm,
                scan_def_name,
                index_def_name,
                interval,
                reversed,
            } => {
                let low = CompoundBound {
                    inclusive: interval.low.inclusive,
                    bound: interval.low.bound.into_iter().map(|e| f(e)).collect::<Result<_>>()?,
                };
                let high = CompoundBound {
                    inclusive: interval.high.inclusive,
                    bound: interval.high.bound.into_iter().map(|e| f(e)).collect::<Result<_>>()?,
                };
                NodeKind::IndexScan {
                    fpm,
                    scan_def_name,
                    index_def_name,
                    interval: CompoundInterval { low, high },
                    reversed,
                }
            }
            leaf @ (NodeKind::PhysicalScan { .. }
            | NodeKind::Seek { .. }
            | NodeKind::CoScan
            | NodeKind::SpoolConsumer { .. }
            | NodeKind::Scan { .. }) => leaf,
        };
        Ok(Node { id, kind })
    }

    /// Total path nodes left anywhere in this tree.
    pub fn path_node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |n| {
            count += n.exprs().iter().map(|e| e.path_node_count()).sum::<usize>();
        });
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_unset_in_raw_limit_skip() {
        assert_eq!(
            LimitSkipRequirement::from_raw(5, 0),
            LimitSkipRequirement::new(Some(5), None)
        );
        assert_eq!(
            LimitSkipRequirement::from_raw(0, 4),
            LimitSkipRequirement::new(None, Some(4))
        );
        assert_eq!(LimitSkipRequirement::new(Some(5), Some(2)).absolute_limit(), Some(7));
    }

    #[test]
    fn fpm_lists_rid_root_then_fields() {
        let fpm = FieldProjectionMap::root("root")
            .with_rid("rid")
            .with_field("b", "pb")
            .with_field("a", "pa");
        let names: Vec<String> = fpm.projections().iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["rid", "root", "pa", "pb"]);
    }

    #[test]
    fn path_count_sums_each_path_once() {
        use crate::abt::{Operations, Path, PlanBuilder};

        let mut b = PlanBuilder::new();
        let scan = b.physical_scan(FieldProjectionMap::root("root"), "c1", false);
        let nested = Expr::eval_path(Path::get("b", Path::Identity), Expr::var("root"));
        let pred = Expr::eval_filter(
            Path::get("a", Path::compare(Operations::Eq, nested)),
            Expr::var("root"),
        );
        let filter = b.filter(pred, scan);
        let value = Expr::eval_path(Path::Identity, Expr::var("root"));
        let eval = b.evaluation("p", value, filter);
        assert_eq!(eval.path_node_count(), 5);
    }
}
