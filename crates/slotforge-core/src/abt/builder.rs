//! Tree construction with id assignment and property registration.

use super::{
    CollationOp, CollationSpec, CompoundInterval, DistributionType, Expr, FieldProjectionMap,
    GroupNodeType, JoinType, LimitSkipRequirement, Node, NodeKind, ProjectionName, ProjectionSet,
    SpoolConsumerType, SpoolProducerType,
};
use crate::id::{NodeId, NodeIdGenerator, PlanNodeId, SpoolId};
use crate::props::{NodeProps, NodePropsTable};

/// Builds plan trees for one compilation.
///
/// Each constructor assigns a fresh `NodeId`, stamps the next sequential
/// plan-node id and registers default properties for it.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    ids: NodeIdGenerator,
    next_plan_node_id: u64,
    props: NodePropsTable,
}

fn names<N: Into<ProjectionName>>(it: impl IntoIterator<Item = N>) -> Vec<ProjectionName> {
    it.into_iter().map(Into::into).collect()
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `kind` with default properties.
    pub fn node(&mut self, kind: NodeKind) -> Node {
        let id = self.ids.generate();
        let plan_node_id = PlanNodeId::new(self.next_plan_node_id);
        self.next_plan_node_id += 1;
        self.props.insert(id, NodeProps::new(plan_node_id));
        Node { id, kind }
    }

    /// A node with an id but no properties entry.
    pub fn detached(&mut self, kind: NodeKind) -> Node {
        Node {
            id: self.ids.generate(),
            kind,
        }
    }

    /// Adjust the properties of an already registered node.
    pub fn update_props(&mut self, node: &Node, f: impl FnOnce(NodeProps) -> NodeProps) {
        if let Some(p) = self.props.get_mut(node.id) {
            *p = f(std::mem::take(p));
        }
    }

    pub fn props(&self) -> &NodePropsTable {
        &self.props
    }

    pub fn props_for(&self, id: NodeId) -> Option<&NodeProps> {
        self.props.get(id)
    }

    pub fn finish(self) -> NodePropsTable {
        self.props
    }

    pub fn physical_scan(
        &mut self,
        fpm: FieldProjectionMap,
        scan_def_name: impl Into<String>,
        parallel: bool,
    ) -> Node {
        self.node(NodeKind::PhysicalScan {
            fpm,
            scan_def_name: scan_def_name.into(),
            parallel,
        })
    }

    pub fn index_scan(
        &mut self,
        fpm: FieldProjectionMap,
        scan_def_name: impl Into<String>,
        index_def_name: impl Into<String>,
        interval: CompoundInterval,
        reversed: bool,
    ) -> Node {
        self.node(NodeKind::IndexScan {
            fpm,
            scan_def_name: scan_def_name.into(),
            index_def_name: index_def_name.into(),
            interval,
            reversed,
        })
    }

    pub fn seek(
        &mut self,
        rid_projection: impl Into<ProjectionName>,
        fpm: FieldProjectionMap,
        scan_def_name: impl Into<String>,
    ) -> Node {
        self.node(NodeKind::Seek {
            rid_projection: rid_projection.into(),
            fpm,
            scan_def_name: scan_def_name.into(),
        })
    }

    pub fn co_scan(&mut self) -> Node {
        self.node(NodeKind::CoScan)
    }

    pub fn filter(&mut self, filter: Expr, child: Node) -> Node {
        self.node(NodeKind::Filter {
            filter,
            child: Box::new(child),
        })
    }

    pub fn evaluation(
        &mut self,
        projection: impl Into<ProjectionName>,
        expr: Expr,
        child: Node,
    ) -> Node {
        self.node(NodeKind::Evaluation {
            projection: projection.into(),
            expr,
            child: Box::new(child),
        })
    }

    pub fn group_by<N: Into<ProjectionName>, A: Into<ProjectionName>>(
        &mut self,
        group_keys: impl IntoIterator<Item = N>,
        aggs: impl IntoIterator<Item = (A, Expr)>,
        group_type: GroupNodeType,
        child: Node,
    ) -> Node {
        let (agg_projections, agg_exprs): (Vec<ProjectionName>, Vec<Expr>) =
            aggs.into_iter().map(|(p, e)| (p.into(), e)).unzip();
        self.node(NodeKind::GroupBy {
            group_keys: names(group_keys),
            agg_projections,
            agg_exprs,
            group_type,
            child: Box::new(child),
        })
    }

    pub fn hash_join<N: Into<ProjectionName>>(
        &mut self,
        join_type: JoinType,
        left_keys: impl IntoIterator<Item = N>,
        right_keys: impl IntoIterator<Item = N>,
        left: Node,
        right: Node,
    ) -> Node {
        self.node(NodeKind::HashJoin {
            join_type,
            left_keys: names(left_keys),
            right_keys: names(right_keys),
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn merge_join<N: Into<ProjectionName>>(
        &mut self,
        left_keys: impl IntoIterator<Item = N>,
        right_keys: impl IntoIterator<Item = N>,
        collation: Vec<CollationOp>,
        left: Node,
        right: Node,
    ) -> Node {
        self.node(NodeKind::MergeJoin {
            left_keys: names(left_keys),
            right_keys: names(right_keys),
            collation,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn nested_loop_join<N: Into<ProjectionName>>(
        &mut self,
        join_type: JoinType,
        correlated: impl IntoIterator<Item = N>,
        filter: Expr,
        left: Node,
        right: Node,
    ) -> Node {
        self.node(NodeKind::NestedLoopJoin {
            join_type,
            correlated: correlated.into_iter().collect::<ProjectionSet>(),
            filter,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn collation(&mut self, spec: CollationSpec, child: Node) -> Node {
        self.node(NodeKind::Collation {
            spec,
            child: Box::new(child),
        })
    }

    /// `0` leaves the corresponding amount unset.
    pub fn limit_skip(&mut self, limit: u64, skip: u64, child: Node) -> Node {
        self.node(NodeKind::LimitSkip {
            req: LimitSkipRequirement::from_raw(limit, skip),
            child: Box::new(child),
        })
    }

    pub fn union<N: Into<ProjectionName>>(
        &mut self,
        projections: impl IntoIterator<Item = N>,
        children: Vec<Node>,
    ) -> Node {
        self.node(NodeKind::Union {
            projections: names(projections),
            children,
        })
    }

    pub fn sorted_merge<N: Into<ProjectionName>>(
        &mut self,
        collation: CollationSpec,
        projections: impl IntoIterator<Item = N>,
        children: Vec<Node>,
    ) -> Node {
        self.node(NodeKind::SortedMerge {
            collation,
            projections: names(projections),
            children,
        })
    }

    pub fn unique<N: Into<ProjectionName>>(
        &mut self,
        keys: impl IntoIterator<Item = N>,
        child: Node,
    ) -> Node {
        self.node(NodeKind::Unique {
            keys: names(keys),
            child: Box::new(child),
        })
    }

    pub fn unwind(
        &mut self,
        projection: impl Into<ProjectionName>,
        pid_projection: impl Into<ProjectionName>,
        retain_non_arrays: bool,
        child: Node,
    ) -> Node {
        self.node(NodeKind::Unwind {
            projection: projection.into(),
            pid_projection: pid_projection.into(),
            retain_non_arrays,
            child: Box::new(child),
        })
    }

    pub fn spool_producer<N: Into<ProjectionName>>(
        &mut self,
        kind: SpoolProducerType,
        spool_id: SpoolId,
        projections: impl IntoIterator<Item = N>,
        filter: Expr,
        child: Node,
    ) -> Node {
        self.node(NodeKind::SpoolProducer {
            kind,
            spool_id,
            projections: names(projections),
            filter,
            child: Box::new(child),
        })
    }

    pub fn spool_consumer<N: Into<ProjectionName>>(
        &mut self,
        kind: SpoolConsumerType,
        spool_id: SpoolId,
        projections: impl IntoIterator<Item = N>,
    ) -> Node {
        self.node(NodeKind::SpoolConsumer {
            kind,
            spool_id,
            projections: names(projections),
        })
    }

    pub fn exchange(&mut self, distribution: DistributionType, child: Node) -> Node {
        self.node(NodeKind::Exchange {
            distribution,
            child: Box::new(child),
        })
    }

    pub fn root<N: Into<ProjectionName>>(
        &mut self,
        projections: impl IntoIterator<Item = N>,
        child: Node,
    ) -> Node {
        self.node(NodeKind::Root {
            projections: projections.into_iter().collect(),
            child: Box::new(child),
        })
    }

    /// Logical scan; only useful to exercise the "physical only" check.
    pub fn logical_scan(
        &mut self,
        projection: impl Into<ProjectionName>,
        scan_def_name: impl Into<String>,
    ) -> Node {
        self.node(NodeKind::Scan {
            projection: projection.into(),
            scan_def_name: scan_def_name.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_node_ids_follow_construction_order() {
        let mut b = PlanBuilder::new();
        let scan = b.physical_scan(FieldProjectionMap::root("root"), "c1", false);
        let limit = b.limit_skip(5, 0, scan);
        let props = b.finish();
        assert_eq!(
            props.get(limit.id).map(|p| p.plan_node_id),
            Some(PlanNodeId::new(1))
        );
        match &limit.kind {
            NodeKind::LimitSkip { req, child } => {
                assert_eq!(req.limit, Some(5));
                assert_eq!(req.skip, None);
                assert_eq!(props.get(child.id).map(|p| p.plan_node_id), Some(PlanNodeId::new(0)));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn detached_nodes_have_no_props() {
        let mut b = PlanBuilder::new();
        let n = b.detached(NodeKind::CoScan);
        assert!(b.props_for(n.id).is_none());
    }
}
