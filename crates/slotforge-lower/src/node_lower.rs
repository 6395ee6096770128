//! Physical `Node` -> `Stage`, bottom-up.
//!
//! Each handler lowers its children first, then extends (or replaces) the
//! projection -> slot map it was handed. Slots are only ever allocated from
//! the compilation's generator, so no two bindings share an id.

use std::collections::{BTreeMap, BTreeSet};

use slotforge_core::abt::{
    CollationOp, CollationSpec, CompoundBound, DistributionType, Expr, FieldProjectionMap, Node,
    NodeKind, ProjectionName, ProjectionSet, SpoolConsumerType, SpoolProducerType,
};
use slotforge_core::error::{Error, Result};
use slotforge_core::id::{PlanNodeId, SlotId};
use slotforge_core::props::{NodeProps, NodePropsTable};
use slotforge_core::scan_def::{
    require_scan_def, ScanDefinition, ScanDefinitions, INDEX_VERSION, ORDERING_BITS,
};
use slotforge_core::value::Value;
use slotforge_stage::builtins;
use slotforge_stage::{EExpr, SortDirection, Stage, StageKind};

use crate::context::{CompilationContext, LoweringOptions};
use crate::expr_lower::ExprLowering;
use crate::trace;

/// Projection name -> slot bound to it at the current point of lowering.
pub type SlotVarMap = BTreeMap<ProjectionName, SlotId>;

/// Field-name prefix an index scan uses for index key components.
const INDEX_KEY_PREFIX: &str = "<indexKey> ";

pub struct NodeLowering<'a> {
    ctx: &'a mut CompilationContext,
    props: &'a NodePropsTable,
    scan_defs: &'a ScanDefinitions,
    options: &'a LoweringOptions,
}

impl<'a> NodeLowering<'a> {
    pub fn new(
        ctx: &'a mut CompilationContext,
        props: &'a NodePropsTable,
        scan_defs: &'a ScanDefinitions,
        options: &'a LoweringOptions,
    ) -> Self {
        Self {
            ctx,
            props,
            scan_defs,
            options,
        }
    }

    /// Lower `node`, binding its outputs into `slots`.
    pub fn lower(&mut self, node: &Node, slots: &mut SlotVarMap) -> Result<Stage> {
        let table: &'a NodePropsTable = self.props;
        let props = table.require(node.id)?;
        let id = props.plan_node_id;

        let stage = match &node.kind {
            NodeKind::PhysicalScan {
                fpm,
                scan_def_name,
                parallel,
            } => self.lower_physical_scan(id, fpm, scan_def_name, *parallel, slots)?,
            NodeKind::IndexScan {
                fpm,
                scan_def_name,
                index_def_name,
                interval,
                reversed,
            } => {
                let def = require_scan_def(self.scan_defs, scan_def_name)?;
                let mut low_key = self.key_string(&interval.low, true, slots)?;
                let mut high_key = self.key_string(&interval.high, false, slots)?;
                if *reversed {
                    std::mem::swap(&mut low_key, &mut high_key);
                }
                let (rid_slot, record_slot, fields) = bind_fpm(self.ctx, fpm, slots)?;
                let key_slots = fields
                    .into_iter()
                    .map(|(field, slot)| index_key_position(&field).map(|pos| (pos, slot)))
                    .collect::<Result<Vec<_>>>()?;
                Stage::new(
                    id,
                    StageKind::IndexScan {
                        collection: scan_def_name.clone(),
                        uuid: def.uuid,
                        index_name: index_def_name.clone(),
                        rid_slot,
                        record_slot,
                        key_slots,
                        low_key,
                        high_key,
                        forward: !*reversed,
                        yield_policy: self.options.yield_policy.clone(),
                    },
                )
            }
            NodeKind::Seek {
                rid_projection,
                fpm,
                scan_def_name,
            } => {
                let def = require_scan_def(self.scan_defs, scan_def_name)?;
                let seek_rid = resolve(slots, rid_projection)?;
                let (rid_slot, record_slot, fields) = bind_fpm(self.ctx, fpm, slots)?;
                Stage::new(
                    id,
                    StageKind::Scan {
                        collection: scan_def_name.clone(),
                        uuid: def.uuid,
                        rid_slot,
                        record_slot,
                        fields,
                        seek_rid_slot: Some(seek_rid),
                        forward: true,
                        partitions: None,
                        yield_policy: self.options.yield_policy.clone(),
                    },
                )
            }
            NodeKind::CoScan => Stage::new(id, StageKind::CoScan),
            NodeKind::Filter { filter, child } => {
                let child = self.lower(child, slots)?;
                let shard_def = self.shard_scan_def(props)?;
                let predicate = self.lower_expr(filter, slots, shard_def)?;
                let is_const = predicate.slots().is_empty();
                Stage::new(
                    id,
                    StageKind::Filter {
                        child: Box::new(child),
                        predicate,
                        is_const,
                    },
                )
            }
            NodeKind::Evaluation { .. } => self.lower_evaluations(node, id, slots)?,
            NodeKind::GroupBy {
                group_keys,
                agg_projections,
                agg_exprs,
                group_type,
                child,
            } => {
                if agg_projections.len() != agg_exprs.len() {
                    return Err(Error::Invariant(format!(
                        "group by has {} aggregate projection(s) for {} expression(s)",
                        agg_projections.len(),
                        agg_exprs.len()
                    )));
                }
                let child = self.lower(child, slots)?;
                let group_slots = resolve_all(slots, group_keys)?;

                let mut out = SlotVarMap::new();
                for (key, slot) in group_keys.iter().zip(&group_slots) {
                    out.insert(key.clone(), *slot);
                }
                let mut aggs = Vec::with_capacity(agg_exprs.len());
                for (proj, e) in agg_projections.iter().zip(agg_exprs) {
                    let agg = self.lower_aggregate(e, slots)?;
                    let slot = bind(self.ctx, &mut out, proj)?;
                    aggs.push((slot, agg));
                }
                *slots = out;
                Stage::new(
                    id,
                    StageKind::HashAgg {
                        child: Box::new(child),
                        group_slots,
                        aggs,
                        phase: *group_type,
                    },
                )
            }
            NodeKind::HashJoin {
                join_type,
                left_keys,
                right_keys,
                left,
                right,
            } => {
                let sides = self.lower_join_sides(left_keys, right_keys, left, right, slots)?;
                Stage::new(
                    id,
                    StageKind::HashJoin {
                        join_type: *join_type,
                        outer: Box::new(sides.outer),
                        outer_keys: sides.outer_keys,
                        outer_projects: sides.outer_projects,
                        inner: Box::new(sides.inner),
                        inner_keys: sides.inner_keys,
                        inner_projects: sides.inner_projects,
                    },
                )
            }
            NodeKind::MergeJoin {
                left_keys,
                right_keys,
                collation,
                left,
                right,
            } => {
                if collation.len() != left_keys.len() {
                    return Err(Error::Invariant(format!(
                        "merge join has {} key(s) but {} collation entr(ies)",
                        left_keys.len(),
                        collation.len()
                    )));
                }
                let dirs = collation
                    .iter()
                    .map(|op| sort_direction(*op))
                    .collect::<Result<Vec<_>>>()?;
                let sides = self.lower_join_sides(left_keys, right_keys, left, right, slots)?;
                Stage::new(
                    id,
                    StageKind::MergeJoin {
                        outer: Box::new(sides.outer),
                        outer_keys: sides.outer_keys,
                        outer_projects: sides.outer_projects,
                        inner: Box::new(sides.inner),
                        inner_keys: sides.inner_keys,
                        inner_projects: sides.inner_projects,
                        dirs,
                    },
                )
            }
            NodeKind::NestedLoopJoin {
                join_type,
                correlated,
                filter,
                left,
                right,
            } => {
                let outer = self.lower(left, slots)?;
                let left_props = table.require(left.id)?;
                let outer_projects = projected_slots(slots, left_props.projections.as_ref(), &[]);
                let correlated = correlated
                    .iter()
                    .map(|name| resolve(slots, name))
                    .collect::<Result<Vec<_>>>()?;

                // The inner side sees every outer binding.
                let mut inner_slots = slots.clone();
                let inner = self.lower(right, &mut inner_slots)?;
                let predicate = if filter.is_constant_true() {
                    None
                } else {
                    let shard_def = self.shard_scan_def(props)?;
                    Some(self.lower_expr(filter, &inner_slots, shard_def)?)
                };
                *slots = inner_slots;
                Stage::new(
                    id,
                    StageKind::LoopJoin {
                        join_type: *join_type,
                        outer: Box::new(outer),
                        inner: Box::new(inner),
                        outer_projects,
                        correlated,
                        predicate,
                    },
                )
            }
            NodeKind::Collation { spec, child } => {
                let child = self.lower(child, slots)?;
                let (order_by, dirs) = collation_slots(slots, spec)?;

                if let Some(required) = &props.projections {
                    let keep: BTreeSet<&ProjectionName> = spec
                        .iter()
                        .map(|(name, _)| name)
                        .chain(required.iter())
                        .collect();
                    slots.retain(|name, _| keep.contains(name));
                }
                let values = slots
                    .values()
                    .copied()
                    .filter(|s| !order_by.contains(s))
                    .collect();
                let limit = props.limit_skip.and_then(|req| req.absolute_limit());
                Stage::new(
                    id,
                    StageKind::Sort {
                        child: Box::new(child),
                        order_by,
                        dirs,
                        values,
                        limit,
                    },
                )
            }
            NodeKind::LimitSkip { req, child } => {
                let child = self.lower(child, slots)?;
                Stage::new(
                    id,
                    StageKind::LimitSkip {
                        child: Box::new(child),
                        limit: req.limit,
                        skip: req.skip,
                    },
                )
            }
            NodeKind::Union {
                projections,
                children,
            } => {
                let mut stages = Vec::with_capacity(children.len());
                let mut input_slots = Vec::with_capacity(children.len());
                for child in non_empty(children, "Union")? {
                    let mut child_slots = slots.clone();
                    stages.push(self.lower(child, &mut child_slots)?);
                    input_slots.push(resolve_all(&child_slots, projections)?);
                }
                let output_slots = rebind_all(self.ctx, slots, projections);
                Stage::new(
                    id,
                    StageKind::Union {
                        children: stages,
                        input_slots,
                        output_slots,
                    },
                )
            }
            NodeKind::SortedMerge {
                collation,
                projections,
                children,
            } => {
                let mut stages = Vec::with_capacity(children.len());
                let mut input_keys = Vec::with_capacity(children.len());
                let mut input_vals = Vec::with_capacity(children.len());
                let mut dirs = Vec::new();
                for child in non_empty(children, "SortedMerge")? {
                    let mut child_slots = slots.clone();
                    stages.push(self.lower(child, &mut child_slots)?);
                    let (keys, child_dirs) = collation_slots(&child_slots, collation)?;
                    input_keys.push(keys);
                    input_vals.push(resolve_all(&child_slots, projections)?);
                    dirs = child_dirs;
                }
                let output_vals = rebind_all(self.ctx, slots, projections);
                Stage::new(
                    id,
                    StageKind::SortedMerge {
                        children: stages,
                        input_keys,
                        dirs,
                        input_vals,
                        output_vals,
                    },
                )
            }
            NodeKind::Unique { keys, child } => {
                let child = self.lower(child, slots)?;
                let keys = resolve_all(slots, keys)?;
                Stage::new(
                    id,
                    StageKind::Unique {
                        child: Box::new(child),
                        keys,
                    },
                )
            }
            NodeKind::Unwind {
                projection,
                pid_projection,
                retain_non_arrays,
                child,
            } => {
                let child = self.lower(child, slots)?;
                let input_slot = resolve(slots, projection)?;
                // The unwound value replaces the array under the same name.
                let output_slot = self.ctx.slot_ids.generate();
                slots.insert(projection.clone(), output_slot);
                let index_slot = bind(self.ctx, slots, pid_projection)?;
                Stage::new(
                    id,
                    StageKind::Unwind {
                        child: Box::new(child),
                        input_slot,
                        output_slot,
                        index_slot,
                        preserve_non_arrays: *retain_non_arrays,
                    },
                )
            }
            NodeKind::SpoolProducer {
                kind,
                spool_id,
                projections,
                filter,
                child,
            } => {
                let child = Box::new(self.lower(child, slots)?);
                let vals = resolve_all(slots, projections)?;
                let kind = match kind {
                    SpoolProducerType::Eager => {
                        if !filter.is_constant_true() {
                            return Err(Error::Invariant(
                                "eager spool producer cannot filter".into(),
                            ));
                        }
                        StageKind::SpoolEagerProducer {
                            child,
                            spool_id: *spool_id,
                            vals,
                        }
                    }
                    SpoolProducerType::Lazy => {
                        let predicate = self.lower_expr(filter, slots, None)?;
                        StageKind::SpoolLazyProducer {
                            child,
                            spool_id: *spool_id,
                            vals,
                            predicate,
                        }
                    }
                };
                Stage::new(id, kind)
            }
            NodeKind::SpoolConsumer {
                kind,
                spool_id,
                projections,
            } => {
                let vals = projections
                    .iter()
                    .map(|name| bind(self.ctx, slots, name))
                    .collect::<Result<Vec<_>>>()?;
                Stage::new(
                    id,
                    StageKind::SpoolConsumer {
                        spool_id: *spool_id,
                        vals,
                        stack: matches!(kind, SpoolConsumerType::Stack),
                    },
                )
            }
            NodeKind::Exchange {
                distribution,
                child,
            } => {
                let child = self.lower(child, slots)?;
                let partition_slots = match distribution {
                    DistributionType::HashPartitioning(names) => resolve_all(slots, names)?,
                    _ => Vec::new(),
                };
                Stage::new(
                    id,
                    StageKind::Exchange {
                        child: Box::new(child),
                        distribution: distribution.clone(),
                        partitions: self.options.config.partitions,
                        fields: slots.values().copied().collect(),
                        partition_slots,
                    },
                )
            }
            NodeKind::Root { projections, child } => {
                let stage = self.lower(child, slots)?;
                for name in projections.iter() {
                    resolve(slots, name)?;
                }
                stage
            }
            NodeKind::Scan { .. } | NodeKind::RidIntersect { .. } => {
                return Err(Error::LogicalNode(node.name()))
            }
        };

        if let Some(required) = &props.projections {
            for name in required.iter() {
                resolve(slots, name)?;
            }
        }
        trace::lowered_node(node.name(), id.get(), slots.len());
        Ok(stage)
    }

    fn lower_expr(
        &mut self,
        e: &Expr,
        slots: &SlotVarMap,
        scan_def: Option<&ScanDefinition>,
    ) -> Result<EExpr> {
        ExprLowering::new(slots, self.ctx)
            .with_scan_def(scan_def)
            .lower(e)
    }

    /// Scan definition named by the node's shard-filter context, if any.
    fn shard_scan_def(&self, props: &NodeProps) -> Result<Option<&'a ScanDefinition>> {
        let defs: &'a ScanDefinitions = self.scan_defs;
        props
            .index_scan_def_name
            .as_deref()
            .map(|name| require_scan_def(defs, name))
            .transpose()
    }

    fn lower_physical_scan(
        &mut self,
        id: PlanNodeId,
        fpm: &FieldProjectionMap,
        scan_def_name: &str,
        parallel: bool,
        slots: &mut SlotVarMap,
    ) -> Result<Stage> {
        let def = require_scan_def(self.scan_defs, scan_def_name)?;
        if !def.exists {
            // A missing collection yields no rows; its projections are
            // still bound so the parent lowers normally.
            let projections = fpm
                .projections()
                .iter()
                .map(|name| -> Result<(SlotId, EExpr)> {
                    Ok((bind(self.ctx, slots, name)?, EExpr::constant(Value::Nothing)))
                })
                .collect::<Result<Vec<_>>>()?;
            let empty = Stage::new(
                id,
                StageKind::Filter {
                    child: Box::new(Stage::new(id, StageKind::CoScan)),
                    predicate: EExpr::constant(Value::Bool(false)),
                    is_const: true,
                },
            );
            return Ok(Stage::new(
                id,
                StageKind::Project {
                    child: Box::new(empty),
                    projections,
                },
            ));
        }

        let (rid_slot, record_slot, fields) = bind_fpm(self.ctx, fpm, slots)?;
        Ok(Stage::new(
            id,
            StageKind::Scan {
                collection: scan_def_name.to_string(),
                uuid: def.uuid,
                rid_slot,
                record_slot,
                fields,
                seek_rid_slot: None,
                forward: true,
                partitions: parallel.then_some(self.options.config.partitions),
                yield_policy: self.options.yield_policy.clone(),
            },
        ))
    }

    /// `ks(version, ordering, values..., discriminator)`.
    ///
    /// The discriminator places the key before or after equal index keys so
    /// that exclusive bounds skip them.
    fn key_string(
        &mut self,
        bound: &CompoundBound,
        low: bool,
        slots: &SlotVarMap,
    ) -> Result<EExpr> {
        let discriminator = match (low, bound.inclusive) {
            (true, true) | (false, false) => 1,
            (true, false) | (false, true) => 2,
        };
        let mut args = Vec::with_capacity(bound.bound.len() + 3);
        args.push(EExpr::constant(Value::Int64(INDEX_VERSION)));
        args.push(EExpr::constant(Value::Int32(ORDERING_BITS)));
        for e in &bound.bound {
            args.push(self.lower_expr(e, slots, None)?);
        }
        args.push(EExpr::constant(Value::Int32(discriminator)));
        Ok(EExpr::function("ks", args))
    }

    /// Lower a run of Evaluation nodes as one project stage.
    ///
    /// A child Evaluation joins the run while nothing collected so far
    /// reads its projection; projections are emitted child first.
    fn lower_evaluations(
        &mut self,
        top: &Node,
        id: PlanNodeId,
        slots: &mut SlotVarMap,
    ) -> Result<Stage> {
        let mut run: Vec<(&ProjectionName, &Expr)> = Vec::new();
        let mut current = top;
        loop {
            match &current.kind {
                NodeKind::Evaluation {
                    projection,
                    expr,
                    child,
                } => {
                    let reads_it = run
                        .iter()
                        .any(|(_, e)| e.free_variables().contains(projection));
                    if reads_it {
                        break;
                    }
                    self.props.require(current.id)?;
                    run.push((projection, expr));
                    current = child;
                }
                _ => break,
            }
        }

        let child = self.lower(current, slots)?;
        let mut lowered = Vec::with_capacity(run.len());
        for (projection, e) in run.iter().rev() {
            lowered.push((*projection, self.lower_expr(e, slots, None)?));
        }
        let mut projections = Vec::with_capacity(lowered.len());
        for (projection, e) in lowered {
            projections.push((bind(self.ctx, slots, projection)?, e));
        }
        Ok(Stage::new(
            id,
            StageKind::Project {
                child: Box::new(child),
                projections,
            },
        ))
    }

    fn lower_aggregate(&mut self, e: &Expr, slots: &SlotVarMap) -> Result<EExpr> {
        let Expr::FunctionCall { name, args } = e else {
            return Err(Error::Invariant(format!(
                "aggregate must be a function call, got {}",
                e.kind_name()
            )));
        };
        let agg = builtins::lookup_aggregate(name)
            .ok_or_else(|| Error::UnknownFunction(name.clone()))?;
        if !agg.arity.accepts(args.len()) {
            return Err(Error::FunctionArity {
                name: name.clone(),
                expected: agg.arity.describe(),
                actual: args.len(),
            });
        }
        let args = args
            .iter()
            .map(|a| self.lower_expr(a, slots, None))
            .collect::<Result<Vec<_>>>()?;
        Ok(EExpr::function(agg.name, args))
    }

    fn lower_join_sides(
        &mut self,
        left_keys: &[ProjectionName],
        right_keys: &[ProjectionName],
        left: &Node,
        right: &Node,
        slots: &mut SlotVarMap,
    ) -> Result<JoinSides> {
        if left_keys.len() != right_keys.len() {
            return Err(Error::Invariant(format!(
                "join has {} left key(s) and {} right key(s)",
                left_keys.len(),
                right_keys.len()
            )));
        }
        let mut left_slots = slots.clone();
        let outer = self.lower(left, &mut left_slots)?;
        let mut right_slots = slots.clone();
        let inner = self.lower(right, &mut right_slots)?;

        let outer_keys = resolve_all(&left_slots, left_keys)?;
        let inner_keys = resolve_all(&right_slots, right_keys)?;
        let left_props = self.props.require(left.id)?;
        let right_props = self.props.require(right.id)?;
        let outer_projects =
            projected_slots(&left_slots, left_props.projections.as_ref(), &outer_keys);
        let inner_projects =
            projected_slots(&right_slots, right_props.projections.as_ref(), &inner_keys);

        for (name, slot) in right_slots {
            match left_slots.get(&name) {
                Some(existing) if *existing != slot => {
                    return Err(Error::DuplicateSlot(name.to_string()))
                }
                _ => {
                    left_slots.insert(name, slot);
                }
            }
        }
        *slots = left_slots;
        Ok(JoinSides {
            outer,
            outer_keys,
            outer_projects,
            inner,
            inner_keys,
            inner_projects,
        })
    }
}

struct JoinSides {
    outer: Stage,
    outer_keys: Vec<SlotId>,
    outer_projects: Vec<SlotId>,
    inner: Stage,
    inner_keys: Vec<SlotId>,
    inner_projects: Vec<SlotId>,
}

fn resolve(slots: &SlotVarMap, name: &ProjectionName) -> Result<SlotId> {
    slots
        .get(name)
        .copied()
        .ok_or_else(|| Error::UnboundVariable(name.to_string()))
}

fn resolve_all(slots: &SlotVarMap, names: &[ProjectionName]) -> Result<Vec<SlotId>> {
    names.iter().map(|n| resolve(slots, n)).collect()
}

/// Allocate a fresh slot for a projection that must not be bound yet.
fn bind(
    ctx: &mut CompilationContext,
    slots: &mut SlotVarMap,
    name: &ProjectionName,
) -> Result<SlotId> {
    if slots.contains_key(name) {
        return Err(Error::DuplicateSlot(name.to_string()));
    }
    let slot = ctx.slot_ids.generate();
    slots.insert(name.clone(), slot);
    Ok(slot)
}

/// Fresh output slots that shadow any existing binding of the same names.
fn rebind_all(
    ctx: &mut CompilationContext,
    slots: &mut SlotVarMap,
    names: &[ProjectionName],
) -> Vec<SlotId> {
    names
        .iter()
        .map(|name| {
            let slot = ctx.slot_ids.generate();
            slots.insert(name.clone(), slot);
            slot
        })
        .collect()
}

/// Slots for rid, root and fields, allocated in that order.
fn bind_fpm(
    ctx: &mut CompilationContext,
    fpm: &FieldProjectionMap,
    slots: &mut SlotVarMap,
) -> Result<(Option<SlotId>, Option<SlotId>, Vec<(String, SlotId)>)> {
    let rid = fpm
        .rid_projection
        .as_ref()
        .map(|name| bind(ctx, slots, name))
        .transpose()?;
    let root = fpm
        .root_projection
        .as_ref()
        .map(|name| bind(ctx, slots, name))
        .transpose()?;
    let fields = fpm
        .field_projections
        .iter()
        .map(|(field, name)| -> Result<(String, SlotId)> {
            Ok((field.clone(), bind(ctx, slots, name)?))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((rid, root, fields))
}

fn index_key_position(field: &str) -> Result<usize> {
    field
        .strip_prefix(INDEX_KEY_PREFIX)
        .and_then(|n| n.trim().parse().ok())
        .ok_or_else(|| Error::Invariant(format!("index scan field '{field}' is not an index key")))
}

fn sort_direction(op: CollationOp) -> Result<SortDirection> {
    match op {
        CollationOp::Ascending => Ok(SortDirection::Ascending),
        CollationOp::Descending => Ok(SortDirection::Descending),
        CollationOp::Clustered => Err(Error::Invariant(
            "clustered collation cannot order rows".into(),
        )),
    }
}

fn collation_slots(
    slots: &SlotVarMap,
    spec: &CollationSpec,
) -> Result<(Vec<SlotId>, Vec<SortDirection>)> {
    let mut order_by = Vec::with_capacity(spec.len());
    let mut dirs = Vec::with_capacity(spec.len());
    for (name, op) in spec {
        order_by.push(resolve(slots, name)?);
        dirs.push(sort_direction(*op)?);
    }
    Ok((order_by, dirs))
}

/// Non-key slots a join side passes up, limited to what the side's
/// properties require when they say.
fn projected_slots(
    slots: &SlotVarMap,
    required: Option<&ProjectionSet>,
    keys: &[SlotId],
) -> Vec<SlotId> {
    slots
        .iter()
        .filter(|(name, _)| required.map_or(true, |r| r.contains(name)))
        .map(|(_, slot)| *slot)
        .filter(|slot| !keys.contains(slot))
        .collect()
}

fn non_empty<'n>(children: &'n [Node], kind: &str) -> Result<&'n [Node]> {
    if children.is_empty() {
        return Err(Error::Invariant(format!("{kind} needs at least one child")));
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotforge_core::abt::{
        CompoundInterval, GroupNodeType, JoinType, LimitSkipRequirement, Operations, PlanBuilder,
    };
    use slotforge_core::config::LoweringConfig;
    use slotforge_core::scan_def::ScanDefinition;
    use slotforge_stage::EPrimBinary;

    fn defs() -> ScanDefinitions {
        let mut defs = ScanDefinitions::new();
        defs.insert("c1".into(), ScanDefinition::new("test.c1"));
        defs.insert("c2".into(), ScanDefinition::new("test.c2"));
        let mut gone = ScanDefinition::new("test.gone");
        gone.exists = false;
        defs.insert("gone".into(), gone);
        defs
    }

    fn lower(props: &NodePropsTable, root: &Node) -> Result<(Stage, SlotVarMap)> {
        lower_with(&LoweringOptions::default(), props, root)
    }

    fn lower_with(
        options: &LoweringOptions,
        props: &NodePropsTable,
        root: &Node,
    ) -> Result<(Stage, SlotVarMap)> {
        let mut ctx = CompilationContext::new(&options.config)?;
        let defs = defs();
        let mut slots = SlotVarMap::new();
        let stage = NodeLowering::new(&mut ctx, props, &defs, options).lower(root, &mut slots)?;
        Ok((stage, slots))
    }

    fn scan(b: &mut PlanBuilder, coll: &str, root: &str) -> Node {
        b.physical_scan(FieldProjectionMap::root(root), coll, false)
    }

    #[test]
    fn limit_skip_keeps_unset_distinct_from_zero() {
        let mut b = PlanBuilder::new();
        let s = scan(&mut b, "c1", "root");
        let limited = b.limit_skip(5, 0, s);
        let s = scan(&mut b, "c2", "other");
        let skipped = b.limit_skip(0, 4, s);
        let props = b.finish();

        let (stage, _) = lower(&props, &limited).unwrap();
        assert!(matches!(
            stage.kind,
            StageKind::LimitSkip { limit: Some(5), skip: None, .. }
        ));
        let (stage, _) = lower(&props, &skipped).unwrap();
        assert!(matches!(
            stage.kind,
            StageKind::LimitSkip { limit: None, skip: Some(4), .. }
        ));
    }

    #[test]
    fn logical_nodes_and_missing_props_are_fatal() {
        let mut b = PlanBuilder::new();
        let logical = b.logical_scan("root", "c1");
        let child = scan(&mut b, "c1", "root");
        let orphan = b.detached(NodeKind::LimitSkip {
            req: LimitSkipRequirement::from_raw(1, 0),
            child: Box::new(child),
        });
        let props = b.finish();

        assert!(matches!(lower(&props, &logical), Err(Error::LogicalNode("Scan"))));
        assert!(matches!(
            lower(&props, &orphan),
            Err(Error::MissingNodeProps(id)) if id == orphan.id
        ));
    }

    #[test]
    fn join_sides_never_share_slots() {
        let mut b = PlanBuilder::new();
        let left = b.physical_scan(
            FieldProjectionMap::root("l").with_rid("lrid").with_field("a", "la"),
            "c1",
            false,
        );
        let right = b.physical_scan(
            FieldProjectionMap::root("r").with_field("a", "ra"),
            "c2",
            false,
        );
        let join = b.hash_join(JoinType::Inner, ["la"], ["ra"], left, right);
        let props = b.finish();

        let (stage, slots) = lower(&props, &join).unwrap();
        let distinct: BTreeSet<SlotId> = slots.values().copied().collect();
        assert_eq!(distinct.len(), slots.len());
        assert_eq!(slots.len(), 5);
        match stage.kind {
            StageKind::HashJoin {
                outer_keys,
                outer_projects,
                inner_keys,
                ..
            } => {
                assert_eq!(outer_keys, vec![slots[&ProjectionName::from("la")]]);
                assert_eq!(inner_keys, vec![slots[&ProjectionName::from("ra")]]);
                assert!(!outer_projects.contains(&outer_keys[0]));
                assert_eq!(outer_projects.len(), 2);
            }
            other => panic!("expected hash join, got {other:?}"),
        }
    }

    #[test]
    fn independent_evaluations_share_one_project() {
        let mut b = PlanBuilder::new();
        let s = scan(&mut b, "c1", "root");
        let e1 = b.evaluation("x", Expr::constant(Value::int32(1)), s);
        let e2 = b.evaluation("y", Expr::var("root"), e1);
        // Reads `y`, so it cannot join the run below it.
        let e3 = b.evaluation("z", Expr::var("y"), e2);
        let props = b.finish();

        let (stage, slots) = lower(&props, &e3).unwrap();
        let StageKind::Project { child, projections } = stage.kind else {
            panic!("expected project");
        };
        assert_eq!(projections.len(), 1);
        assert_eq!(projections[0].1, EExpr::slot(slots[&ProjectionName::from("y")]));
        let StageKind::Project { projections, .. } = child.kind else {
            panic!("expected merged project");
        };
        let bound: Vec<SlotId> = projections.iter().map(|(s, _)| *s).collect();
        assert_eq!(
            bound,
            vec![slots[&ProjectionName::from("x")], slots[&ProjectionName::from("y")]]
        );
    }

    #[test]
    fn group_by_rebinds_keys_and_aggregates_only() {
        let mut b = PlanBuilder::new();
        let s = b.physical_scan(
            FieldProjectionMap::root("root").with_field("k", "k").with_field("v", "v"),
            "c1",
            false,
        );
        let g = b.group_by(
            ["k"],
            [("total", Expr::fcall("$sum", vec![Expr::var("v")]))],
            GroupNodeType::Local,
            s,
        );
        let s = scan(&mut b, "c2", "root");
        let bad = b.group_by(
            Vec::<&str>::new(),
            [("m", Expr::fcall("$median", vec![Expr::var("root")]))],
            GroupNodeType::Complete,
            s,
        );
        let props = b.finish();

        let (stage, slots) = lower(&props, &g).unwrap();
        assert_eq!(
            slots.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            vec!["k", "total"]
        );
        match stage.kind {
            StageKind::HashAgg { aggs, phase, .. } => {
                assert_eq!(phase, GroupNodeType::Local);
                assert!(matches!(&aggs[0].1, EExpr::Function { name, .. } if name == "sum"));
            }
            other => panic!("expected group, got {other:?}"),
        }
        assert!(matches!(lower(&props, &bad), Err(Error::UnknownFunction(_))));
    }

    #[test]
    fn top_k_sort_prunes_to_required_projections() {
        let mut b = PlanBuilder::new();
        let s = b.physical_scan(
            FieldProjectionMap::root("root").with_field("a", "a").with_field("b", "b"),
            "c1",
            false,
        );
        let sort = b.collation(vec![("a".into(), CollationOp::Descending)], s);
        b.update_props(&sort, |p| {
            p.with_projections(["a", "root"])
                .with_limit_skip(LimitSkipRequirement::new(Some(10), Some(5)))
        });
        let props = b.finish();

        let (stage, slots) = lower(&props, &sort).unwrap();
        assert_eq!(slots.len(), 2);
        assert!(!slots.contains_key(&ProjectionName::from("b")));
        match stage.kind {
            StageKind::Sort { limit, dirs, values, .. } => {
                assert_eq!(limit, Some(15));
                assert_eq!(dirs, vec![SortDirection::Descending]);
                assert_eq!(values, vec![slots[&ProjectionName::from("root")]]);
            }
            other => panic!("expected sort, got {other:?}"),
        }
    }

    #[test]
    fn unwind_replaces_the_array_binding() {
        let mut b = PlanBuilder::new();
        let s = b.physical_scan(
            FieldProjectionMap::root("root").with_field("arr", "p0"),
            "c1",
            false,
        );
        let before = 2;
        let u = b.unwind("p0", "p0_pid", false, s);
        let props = b.finish();

        let (stage, slots) = lower(&props, &u).unwrap();
        match stage.kind {
            StageKind::Unwind {
                input_slot,
                output_slot,
                index_slot,
                preserve_non_arrays,
                ..
            } => {
                assert_eq!(input_slot, SlotId::new(before));
                assert_ne!(output_slot, input_slot);
                assert_eq!(slots[&ProjectionName::from("p0")], output_slot);
                assert_eq!(slots[&ProjectionName::from("p0_pid")], index_slot);
                assert!(!preserve_non_arrays);
            }
            other => panic!("expected unwind, got {other:?}"),
        }
    }

    #[test]
    fn missing_collection_lowers_to_an_empty_project() {
        let mut b = PlanBuilder::new();
        let s = scan(&mut b, "gone", "root");
        let props = b.finish();

        let (stage, slots) = lower(&props, &s).unwrap();
        assert_eq!(slots.len(), 1);
        let StageKind::Project { child, projections } = stage.kind else {
            panic!("expected project");
        };
        assert_eq!(projections[0].1, EExpr::constant(Value::Nothing));
        assert_eq!(child.name(), "cfilter");
    }

    #[test]
    fn reversed_index_scan_swaps_bounds() {
        let mut b = PlanBuilder::new();
        let interval = CompoundInterval {
            low: CompoundBound::new(true, vec![Expr::constant(Value::int32(1))]),
            high: CompoundBound::new(false, vec![Expr::constant(Value::int32(9))]),
        };
        let ix = b.index_scan(
            FieldProjectionMap::default().with_rid("rid").with_field("<indexKey> 0", "k0"),
            "c1",
            "idx_a",
            interval,
            true,
        );
        let props = b.finish();

        let (stage, slots) = lower(&props, &ix).unwrap();
        match stage.kind {
            StageKind::IndexScan {
                key_slots,
                low_key,
                high_key,
                forward,
                ..
            } => {
                assert!(!forward);
                assert_eq!(key_slots, vec![(0, slots[&ProjectionName::from("k0")])]);
                let EExpr::Function { args, .. } = low_key else {
                    panic!("expected ks()");
                };
                // High bound, exclusive: value 9 then discriminator 1.
                assert_eq!(args[2], EExpr::constant(Value::int32(9)));
                assert_eq!(args[3], EExpr::constant(Value::int32(1)));
                let EExpr::Function { args, .. } = high_key else {
                    panic!("expected ks()");
                };
                assert_eq!(args[0], EExpr::constant(Value::int64(1)));
                assert_eq!(args[3], EExpr::constant(Value::int32(1)));
            }
            other => panic!("expected index scan, got {other:?}"),
        }
    }

    #[test]
    fn nested_loop_join_drops_trivial_predicates() {
        let mut b = PlanBuilder::new();
        let ix = b.physical_scan(FieldProjectionMap::default().with_rid("rid"), "c1", false);
        let seek = b.seek("rid", FieldProjectionMap::root("doc"), "c1");
        let nlj = b.nested_loop_join(JoinType::Inner, ["rid"], Expr::boolean(true), ix, seek);
        let props = b.finish();

        let (stage, slots) = lower(&props, &nlj).unwrap();
        match stage.kind {
            StageKind::LoopJoin {
                inner,
                correlated,
                predicate,
                ..
            } => {
                assert!(predicate.is_none());
                assert_eq!(correlated, vec![slots[&ProjectionName::from("rid")]]);
                assert_eq!(inner.name(), "seek");
            }
            other => panic!("expected nlj, got {other:?}"),
        }
    }

    #[test]
    fn eager_spools_reject_filters() {
        let mut b = PlanBuilder::new();
        let s = scan(&mut b, "c1", "root");
        let filter = Expr::binary(
            Operations::Eq,
            Expr::var("root"),
            Expr::constant(Value::int32(1)),
        );
        let spool = b.spool_producer(SpoolProducerType::Eager, 3, ["root"], filter, s);
        let props = b.finish();
        assert!(matches!(lower(&props, &spool), Err(Error::Invariant(_))));
    }

    #[test]
    fn parallel_scans_record_partitions() {
        let mut b = PlanBuilder::new();
        let s = b.physical_scan(FieldProjectionMap::root("root"), "c1", true);
        let props = b.finish();

        let (stage, _) = lower_with(&four_partitions(), &props, &s).unwrap();
        assert!(matches!(stage.kind, StageKind::Scan { partitions: Some(4), .. }));
        assert_eq!(stage.name(), "pscan");
    }

    fn four_partitions() -> LoweringOptions {
        LoweringOptions::new(LoweringConfig {
            partitions: 4,
            ..LoweringConfig::default()
        })
    }

    fn keyed_scan(b: &mut PlanBuilder, coll: &str, root: &str, key: &str) -> Node {
        b.physical_scan(FieldProjectionMap::root(root).with_field("k", key), coll, false)
    }

    #[test]
    fn merge_join_maps_collation_to_directions() {
        let mut b = PlanBuilder::new();
        let l = keyed_scan(&mut b, "c1", "l", "lk");
        let r = keyed_scan(&mut b, "c2", "r", "rk");
        let mj = b.merge_join(["lk"], ["rk"], vec![CollationOp::Descending], l, r);
        let props = b.finish();

        let (stage, slots) = lower(&props, &mj).unwrap();
        match stage.kind {
            StageKind::MergeJoin {
                outer_keys,
                inner_keys,
                dirs,
                ..
            } => {
                assert_eq!(outer_keys, vec![slots[&ProjectionName::from("lk")]]);
                assert_eq!(inner_keys, vec![slots[&ProjectionName::from("rk")]]);
                assert_eq!(dirs, vec![SortDirection::Descending]);
            }
            other => panic!("expected merge join, got {other:?}"),
        }
    }

    #[test]
    fn merge_join_needs_one_orderable_collation_per_key() {
        let mut b = PlanBuilder::new();
        let l = keyed_scan(&mut b, "c1", "l", "lk");
        let r = keyed_scan(&mut b, "c2", "r", "rk");
        let short = b.merge_join(["lk"], ["rk"], vec![], l, r);
        let l = keyed_scan(&mut b, "c1", "l", "lk");
        let r = keyed_scan(&mut b, "c2", "r", "rk");
        let clustered = b.merge_join(["lk"], ["rk"], vec![CollationOp::Clustered], l, r);
        let props = b.finish();

        assert!(matches!(lower(&props, &short), Err(Error::Invariant(_))));
        assert!(matches!(lower(&props, &clustered), Err(Error::Invariant(_))));
    }

    #[test]
    fn exchange_takes_partitions_from_config() {
        let mut b = PlanBuilder::new();
        let s = keyed_scan(&mut b, "c1", "root", "k");
        let hashed = b.exchange(DistributionType::HashPartitioning(vec!["k".into()]), s);
        let s = keyed_scan(&mut b, "c2", "root", "k");
        let round_robin = b.exchange(DistributionType::RoundRobin, s);
        let props = b.finish();

        let (stage, slots) = lower_with(&four_partitions(), &props, &hashed).unwrap();
        match stage.kind {
            StageKind::Exchange {
                partitions,
                fields,
                partition_slots,
                ..
            } => {
                assert_eq!(partitions, 4);
                assert_eq!(fields.len(), slots.len());
                assert_eq!(partition_slots, vec![slots[&ProjectionName::from("k")]]);
            }
            other => panic!("expected exchange, got {other:?}"),
        }

        let (stage, _) = lower(&props, &round_robin).unwrap();
        match stage.kind {
            StageKind::Exchange {
                partitions,
                partition_slots,
                ..
            } => {
                assert_eq!(partitions, 1);
                assert!(partition_slots.is_empty());
            }
            other => panic!("expected exchange, got {other:?}"),
        }
    }

    #[test]
    fn lazy_spools_lower_their_predicate() {
        let mut b = PlanBuilder::new();
        let s = scan(&mut b, "c1", "root");
        let filter = Expr::binary(
            Operations::Eq,
            Expr::var("root"),
            Expr::constant(Value::int32(1)),
        );
        let spool = b.spool_producer(SpoolProducerType::Lazy, 3, ["root"], filter, s);
        let props = b.finish();

        let (stage, slots) = lower(&props, &spool).unwrap();
        let root = slots[&ProjectionName::from("root")];
        match stage.kind {
            StageKind::SpoolLazyProducer { vals, predicate, .. } => {
                assert_eq!(vals, vec![root]);
                assert_eq!(
                    predicate,
                    EExpr::PrimBinary {
                        op: EPrimBinary::Eq,
                        lhs: Box::new(EExpr::slot(root)),
                        rhs: Box::new(EExpr::constant(Value::int32(1))),
                    }
                );
            }
            other => panic!("expected lazy spool, got {other:?}"),
        }
    }

    #[test]
    fn unique_reads_its_key_slots() {
        let mut b = PlanBuilder::new();
        let s = keyed_scan(&mut b, "c1", "root", "k");
        let u = b.unique(["k"], s);
        let s = scan(&mut b, "c2", "root");
        let unbound = b.unique(["k"], s);
        let props = b.finish();

        let (stage, slots) = lower(&props, &u).unwrap();
        assert!(matches!(
            stage.kind,
            StageKind::Unique { ref keys, .. } if *keys == vec![slots[&ProjectionName::from("k")]]
        ));
        assert!(matches!(lower(&props, &unbound), Err(Error::UnboundVariable(_))));
    }
}
