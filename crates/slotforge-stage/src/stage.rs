//! The physical stage tree handed to the execution engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use slotforge_core::abt::{DistributionType, GroupNodeType, JoinType};
use slotforge_core::id::{PlanNodeId, SlotId, SpoolId};
use uuid::Uuid;

use crate::expr::EExpr;
use crate::runtime::YieldPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn short(self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

/// One stage plus the plan-node id it was lowered from.
#[derive(Debug, Clone)]
pub struct Stage {
    pub plan_node_id: PlanNodeId,
    pub kind: StageKind,
}

#[derive(Debug, Clone)]
pub enum StageKind {
    /// Collection scan, or a point fetch when `seek_rid_slot` is set.
    Scan {
        collection: String,
        uuid: Option<Uuid>,
        rid_slot: Option<SlotId>,
        record_slot: Option<SlotId>,
        fields: Vec<(String, SlotId)>,
        seek_rid_slot: Option<SlotId>,
        forward: bool,
        /// Worker count when eligible for partitioned execution.
        partitions: Option<usize>,
        yield_policy: Option<Arc<dyn YieldPolicy>>,
    },
    IndexScan {
        collection: String,
        uuid: Option<Uuid>,
        index_name: String,
        rid_slot: Option<SlotId>,
        record_slot: Option<SlotId>,
        /// Index key position -> slot.
        key_slots: Vec<(usize, SlotId)>,
        low_key: EExpr,
        high_key: EExpr,
        forward: bool,
        yield_policy: Option<Arc<dyn YieldPolicy>>,
    },
    CoScan,
    Filter {
        child: Box<Stage>,
        predicate: EExpr,
        /// Predicate reads no slots; evaluated once.
        is_const: bool,
    },
    Project {
        child: Box<Stage>,
        projections: Vec<(SlotId, EExpr)>,
    },
    HashAgg {
        child: Box<Stage>,
        group_slots: Vec<SlotId>,
        aggs: Vec<(SlotId, EExpr)>,
        phase: GroupNodeType,
    },
    HashJoin {
        join_type: JoinType,
        outer: Box<Stage>,
        outer_keys: Vec<SlotId>,
        outer_projects: Vec<SlotId>,
        inner: Box<Stage>,
        inner_keys: Vec<SlotId>,
        inner_projects: Vec<SlotId>,
    },
    MergeJoin {
        outer: Box<Stage>,
        outer_keys: Vec<SlotId>,
        outer_projects: Vec<SlotId>,
        inner: Box<Stage>,
        inner_keys: Vec<SlotId>,
        inner_projects: Vec<SlotId>,
        dirs: Vec<SortDirection>,
    },
    LoopJoin {
        join_type: JoinType,
        outer: Box<Stage>,
        inner: Box<Stage>,
        outer_projects: Vec<SlotId>,
        correlated: Vec<SlotId>,
        predicate: Option<EExpr>,
    },
    Sort {
        child: Box<Stage>,
        order_by: Vec<SlotId>,
        dirs: Vec<SortDirection>,
        values: Vec<SlotId>,
        limit: Option<u64>,
    },
    LimitSkip {
        child: Box<Stage>,
        limit: Option<u64>,
        skip: Option<u64>,
    },
    Union {
        children: Vec<Stage>,
        input_slots: Vec<Vec<SlotId>>,
        output_slots: Vec<SlotId>,
    },
    SortedMerge {
        children: Vec<Stage>,
        input_keys: Vec<Vec<SlotId>>,
        dirs: Vec<SortDirection>,
        input_vals: Vec<Vec<SlotId>>,
        output_vals: Vec<SlotId>,
    },
    Unique {
        child: Box<Stage>,
        keys: Vec<SlotId>,
    },
    Unwind {
        child: Box<Stage>,
        input_slot: SlotId,
        output_slot: SlotId,
        index_slot: SlotId,
        preserve_non_arrays: bool,
    },
    SpoolEagerProducer {
        child: Box<Stage>,
        spool_id: SpoolId,
        vals: Vec<SlotId>,
    },
    SpoolLazyProducer {
        child: Box<Stage>,
        spool_id: SpoolId,
        vals: Vec<SlotId>,
        predicate: EExpr,
    },
    SpoolConsumer {
        spool_id: SpoolId,
        vals: Vec<SlotId>,
        stack: bool,
    },
    Exchange {
        child: Box<Stage>,
        distribution: DistributionType,
        partitions: usize,
        fields: Vec<SlotId>,
        partition_slots: Vec<SlotId>,
    },
}

impl Stage {
    pub fn new(plan_node_id: PlanNodeId, kind: StageKind) -> Self {
        Self { plan_node_id, kind }
    }

    /// Short engine name, as printed by the debug printer.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            StageKind::Scan {
                seek_rid_slot: Some(_),
                ..
            } => "seek",
            StageKind::Scan { partitions: Some(_), .. } => "pscan",
            StageKind::Scan { .. } => "scan",
            StageKind::IndexScan { .. } => "ixseek",
            StageKind::CoScan => "coscan",
            StageKind::Filter { is_const: true, .. } => "cfilter",
            StageKind::Filter { .. } => "filter",
            StageKind::Project { .. } => "project",
            StageKind::HashAgg { .. } => "group",
            StageKind::HashJoin { .. } => "hj",
            StageKind::MergeJoin { .. } => "mj",
            StageKind::LoopJoin { .. } => "nlj",
            StageKind::Sort { .. } => "sort",
            StageKind::LimitSkip { .. } => "limitskip",
            StageKind::Union { .. } => "union",
            StageKind::SortedMerge { .. } => "smerge",
            StageKind::Unique { .. } => "unique",
            StageKind::Unwind { .. } => "unwind",
            StageKind::SpoolEagerProducer { .. } => "espool",
            StageKind::SpoolLazyProducer { .. } => "lspool",
            StageKind::SpoolConsumer { stack: true, .. } => "sspool",
            StageKind::SpoolConsumer { .. } => "cspool",
            StageKind::Exchange { .. } => "exchange",
        }
    }

    pub fn children(&self) -> Vec<&Stage> {
        match &self.kind {
            StageKind::Scan { .. }
            | StageKind::IndexScan { .. }
            | StageKind::CoScan
            | StageKind::SpoolConsumer { .. } => Vec::new(),
            StageKind::Filter { child, .. }
            | StageKind::Project { child, .. }
            | StageKind::HashAgg { child, .. }
            | StageKind::Sort { child, .. }
            | StageKind::LimitSkip { child, .. }
            | StageKind::Unique { child, .. }
            | StageKind::Unwind { child, .. }
            | StageKind::SpoolEagerProducer { child, .. }
            | StageKind::SpoolLazyProducer { child, .. }
            | StageKind::Exchange { child, .. } => vec![child.as_ref()],
            StageKind::HashJoin { outer, inner, .. }
            | StageKind::MergeJoin { outer, inner, .. }
            | StageKind::LoopJoin { outer, inner, .. } => vec![outer.as_ref(), inner.as_ref()],
            StageKind::Union { children, .. } | StageKind::SortedMerge { children, .. } => {
                children.iter().collect()
            }
        }
    }

    /// Pre-order walk.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Stage)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Slots this stage itself defines (not those of its children).
    pub fn defined_slots(&self) -> Vec<SlotId> {
        match &self.kind {
            StageKind::Scan {
                rid_slot,
                record_slot,
                fields,
                ..
            } => rid_slot
                .iter()
                .chain(record_slot.iter())
                .copied()
                .chain(fields.iter().map(|(_, s)| *s))
                .collect(),
            StageKind::IndexScan {
                rid_slot,
                record_slot,
                key_slots,
                ..
            } => rid_slot
                .iter()
                .chain(record_slot.iter())
                .copied()
                .chain(key_slots.iter().map(|(_, s)| *s))
                .collect(),
            StageKind::Project { projections, .. } => projections.iter().map(|(s, _)| *s).collect(),
            StageKind::HashAgg { aggs, .. } => aggs.iter().map(|(s, _)| *s).collect(),
            StageKind::Union { output_slots, .. } => output_slots.clone(),
            StageKind::SortedMerge { output_vals, .. } => output_vals.clone(),
            StageKind::Unwind {
                output_slot,
                index_slot,
                ..
            } => vec![*output_slot, *index_slot],
            StageKind::SpoolConsumer { vals, .. } => vals.clone(),
            _ => Vec::new(),
        }
    }

    /// Every expression owned by this stage.
    pub fn exprs(&self) -> Vec<&EExpr> {
        match &self.kind {
            StageKind::IndexScan {
                low_key, high_key, ..
            } => vec![low_key, high_key],
            StageKind::Filter { predicate, .. }
            | StageKind::SpoolLazyProducer { predicate, .. } => vec![predicate],
            StageKind::Project { projections, .. } => projections.iter().map(|(_, e)| e).collect(),
            StageKind::HashAgg { aggs, .. } => aggs.iter().map(|(_, e)| e).collect(),
            StageKind::LoopJoin { predicate, .. } => predicate.iter().collect(),
            _ => Vec::new(),
        }
    }
}
