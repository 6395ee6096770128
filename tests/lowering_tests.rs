//! End-to-end lowering: ABT plan in, stage tree and slot bindings out.

mod fixtures;

use std::collections::BTreeSet;

use slotforge::slotforge_core::abt::{
    CollationOp, Expr, FieldProjectionMap, GroupNodeType, JoinType, NodeKind, Operations,
    PlanBuilder, SpoolConsumerType, SpoolProducerType,
};
use slotforge::slotforge_core::config::LoweringConfig;
use slotforge::slotforge_core::error::Error;
use slotforge::slotforge_core::id::SlotId;
use slotforge::slotforge_core::value::{TypeTag, Value};
use slotforge::slotforge_lower::CompilationContext;
use slotforge::slotforge_lower::lower_plan_with_context;
use slotforge::slotforge_stage::runtime::SHARD_FILTERER_SLOT_NAME;
use slotforge::slotforge_stage::{EExpr, Stage, StageKind};
use slotforge::{lower_plan, LoweredPlan, LoweringOptions};

fn lower(
    root: slotforge::slotforge_core::abt::Node,
    b: PlanBuilder,
) -> slotforge::Result<LoweredPlan> {
    let props = b.finish();
    lower_plan(root, &props, &fixtures::catalog(), &LoweringOptions::default())
}

fn all_exprs(stage: &Stage) -> Vec<EExpr> {
    let mut out = Vec::new();
    stage.walk(&mut |s| out.extend(s.exprs().into_iter().cloned()));
    out
}

#[test]
fn every_binding_gets_its_own_slot() {
    let mut b = PlanBuilder::new();
    let left = b.physical_scan(
        FieldProjectionMap::root("l").with_rid("lrid").with_field("k", "lk"),
        "c1",
        false,
    );
    let left = b.evaluation("lx", Expr::get_param(1, TypeTag::NumberInt32), left);
    let right = b.physical_scan(FieldProjectionMap::root("r").with_field("k", "rk"), "c2", false);
    let right = b.evaluation("ry", Expr::constant(Value::int32(2)), right);
    let join = b.hash_join(JoinType::Inner, ["lk"], ["rk"], left, right);
    let grouped = b.group_by(
        ["lk"],
        [("n", Expr::fcall("$count", vec![]))],
        GroupNodeType::Complete,
        join,
    );
    let root = b.root(["lk", "n"], grouped);

    let plan = lower(root, b).unwrap();
    let mut seen = BTreeSet::new();
    let mut total = 0;
    plan.stage.walk(&mut |s| {
        for slot in s.defined_slots() {
            total += 1;
            seen.insert(slot);
        }
    });
    for slot in plan.runtime_env.slots() {
        total += 1;
        seen.insert(slot.id);
    }
    assert_eq!(seen.len(), total);
    assert_eq!(total, 9);
}

#[test]
fn repeated_parameters_share_one_slot() {
    let mut b = PlanBuilder::new();
    let scan = b.physical_scan(FieldProjectionMap::root("root").with_field("a", "a"), "c1", false);
    let filter = b.filter(
        Expr::binary(Operations::Gt, Expr::var("a"), Expr::get_param(7, TypeTag::NumberInt64)),
        scan,
    );
    let eval = b.evaluation(
        "x",
        Expr::binary(
            Operations::Add,
            Expr::get_param(7, TypeTag::NumberInt64),
            Expr::constant(Value::int64(1)),
        ),
        filter,
    );
    let root = b.root(["x"], eval);

    let plan = lower(root, b).unwrap();
    assert_eq!(plan.input_params.len(), 1);
    let slot = plan.input_params.get(7).unwrap();
    let readers = all_exprs(&plan.stage)
        .iter()
        .filter(|e| e.slots().contains(&slot))
        .count();
    assert_eq!(readers, 2);
}

fn shard_filter_plan(collection: &str) -> (slotforge::slotforge_core::abt::Node, PlanBuilder) {
    let mut b = PlanBuilder::new();
    let scan = b.physical_scan(
        FieldProjectionMap::root("root")
            .with_field("a", "pa")
            .with_field("b", "pb")
            .with_field("d", "pd"),
        collection,
        false,
    );
    let filter = b.filter(
        Expr::fcall(
            "shardFilter",
            vec![Expr::var("pa"), Expr::var("pb"), Expr::var("pd")],
        ),
        scan,
    );
    b.update_props(&filter, |p| p.with_index_scan_def(collection));
    let root = b.root(["root"], filter);
    (root, b)
}

#[test]
fn shard_filter_reads_the_filterer_slot() {
    let config = LoweringConfig {
        register_shard_filterer: true,
        ..LoweringConfig::default()
    };
    let options = LoweringOptions::new(config);

    let (root, b) = shard_filter_plan("sharded");
    let props = b.finish();
    let plan = lower_plan(root, &props, &fixtures::catalog(), &options).unwrap();
    let filterer = plan.runtime_env.get_slot(SHARD_FILTERER_SLOT_NAME).unwrap();
    match &plan.stage.kind {
        StageKind::Filter { predicate, is_const, .. } => {
            assert!(!is_const);
            assert!(predicate.slots().contains(&filterer));
            let text = predicate.to_string();
            assert!(text.starts_with("shardFilter("));
            assert!(text.contains("\"b.c\""));
            assert!(text.contains("shardHash("));
        }
        other => panic!("expected filter, got {other:?}"),
    }

    let (root, b) = shard_filter_plan("unsharded");
    let props = b.finish();
    let err = lower_plan(root, &props, &fixtures::catalog(), &options).unwrap_err();
    assert!(matches!(err, Error::ShardKey(_)));
}

#[test]
fn shard_filter_with_a_caller_registered_filterer() {
    let options = LoweringOptions::default();
    let mut ctx = CompilationContext::new(&options.config).unwrap();
    let filterer = ctx.register_shard_filterer().unwrap();

    let (root, b) = shard_filter_plan("sharded");
    let props = b.finish();
    let plan = lower_plan_with_context(root, &props, &fixtures::catalog(), &options, ctx).unwrap();
    assert_eq!(plan.runtime_env.get_slot(SHARD_FILTERER_SLOT_NAME), Some(filterer));
}

#[test]
fn int64_constants_stay_int64() {
    let mut b = PlanBuilder::new();
    let scan = b.co_scan();
    let eval = b.evaluation("x", Expr::constant(Value::int64(100)), scan);
    let root = b.root(["x"], eval);

    let plan = lower(root, b).unwrap();
    match &plan.stage.kind {
        StageKind::Project { projections, .. } => {
            let (_, e) = &projections[0];
            assert_eq!(e.as_constant(), Some(&Value::Int64(100)));
            assert_eq!(e.to_string(), "100ll");
        }
        other => panic!("expected project, got {other:?}"),
    }
}

#[test]
fn limit_and_skip_are_independent() {
    let mut b = PlanBuilder::new();
    let scan = b.physical_scan(FieldProjectionMap::root("root"), "c1", false);
    let ls = b.limit_skip(5, 0, scan);
    let root = b.root(["root"], ls);
    let plan = lower(root, b).unwrap();
    assert!(matches!(
        plan.stage.kind,
        StageKind::LimitSkip { limit: Some(5), skip: None, .. }
    ));

    let mut b = PlanBuilder::new();
    let scan = b.physical_scan(FieldProjectionMap::root("root"), "c1", false);
    let ls = b.limit_skip(0, 4, scan);
    let root = b.root(["root"], ls);
    let plan = lower(root, b).unwrap();
    assert!(matches!(
        plan.stage.kind,
        StageKind::LimitSkip { limit: None, skip: Some(4), .. }
    ));
}

#[test]
fn logical_nodes_abort_lowering() {
    let mut b = PlanBuilder::new();
    let scan = b.logical_scan("root", "c1");
    let root = b.root(["root"], scan);
    let err = lower(root, b).unwrap_err();
    assert!(matches!(err, Error::LogicalNode("Scan")));
    assert_eq!(err.user_message(), "unable to plan this query");
}

#[test]
fn nodes_without_properties_abort_lowering() {
    let mut b = PlanBuilder::new();
    let scan = b.detached(NodeKind::CoScan);
    let root = b.root(Vec::<&str>::new(), scan);
    assert!(matches!(lower(root, b), Err(Error::MissingNodeProps(_))));
}

#[test]
fn unions_and_spools_bind_fresh_outputs() {
    let mut b = PlanBuilder::new();
    let s1 = b.physical_scan(FieldProjectionMap::root("x"), "c1", false);
    let s2 = b.physical_scan(FieldProjectionMap::root("x"), "c2", false);
    let union = b.union(["x"], vec![s1, s2]);
    let producer = b.spool_producer(SpoolProducerType::Eager, 1, ["x"], Expr::boolean(true), union);
    let consumer = b.spool_consumer(SpoolConsumerType::Stack, 1, ["y"]);
    let merged = b.sorted_merge(
        vec![("x".into(), CollationOp::Ascending)],
        ["x"],
        vec![producer],
    );
    let join = b.nested_loop_join(
        JoinType::Left,
        Vec::<&str>::new(),
        Expr::boolean(true),
        merged,
        consumer,
    );
    let root = b.root(["x", "y"], join);

    let plan = lower(root, b).unwrap();
    let names: Vec<&str> = {
        let mut v = Vec::new();
        plan.stage.walk(&mut |s| v.push(s.name()));
        v
    };
    assert_eq!(names, vec!["nlj", "smerge", "espool", "union", "scan", "scan", "sspool"]);
    let x = plan.output_slot("x").unwrap();
    let y = plan.output_slot("y").unwrap();
    assert_ne!(x, y);
    assert!(x > SlotId::new(2));
}

#[test]
fn explain_is_stable_and_masks_uuids() {
    let build = || {
        let mut b = PlanBuilder::new();
        let root = fixtures::filtered_scan(&mut b, fixtures::field_eq("a", "b", Value::int32(1)));
        lower(root, b).unwrap()
    };
    let first = build();
    let second = build();
    assert_eq!(first.explain(), second.explain());
    assert_eq!(first.fingerprint(), second.fingerprint());

    let uuid = fixtures::uuid_for(1).to_string();
    assert!(first.explain().contains(&uuid));
    let stripped = first.explain_stripped();
    assert!(!stripped.contains(&uuid));
    assert!(stripped.contains("<collUUID>"));
}
