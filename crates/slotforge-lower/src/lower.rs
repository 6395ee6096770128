//! Entry points: rewrite a plan to its path-free fixpoint, then lower it.

use slotforge_core::abt::{Expr, Node, NodeKind};
use slotforge_core::error::{Error, Result};
use slotforge_core::names::NameGenerator;
use slotforge_core::props::NodePropsTable;
use slotforge_core::scan_def::ScanDefinitions;

use crate::context::{CompilationContext, LoweringOptions};
use crate::node_lower::{NodeLowering, SlotVarMap};
use crate::physical::LoweredPlan;
use crate::rewrite::{rewrite_expr_to_fixpoint, rewrite_to_fixpoint, RewriteOutcome};
use crate::trace;

/// Lower `root` with a fresh compilation context.
pub fn lower_plan(
    root: Node,
    props: &NodePropsTable,
    scan_defs: &ScanDefinitions,
    options: &LoweringOptions,
) -> Result<LoweredPlan> {
    options.config.validate()?;
    let ctx = CompilationContext::new(&options.config)?;
    lower_plan_with_context(root, props, scan_defs, options, ctx)
}

/// Lower `root` using a caller-prepared context (pre-registered runtime
/// slots, parameters). The context is consumed; its runtime environment and
/// parameter map move into the result.
pub fn lower_plan_with_context(
    root: Node,
    props: &NodePropsTable,
    scan_defs: &ScanDefinitions,
    options: &LoweringOptions,
    mut ctx: CompilationContext,
) -> Result<LoweredPlan> {
    options.config.validate()?;
    let outcome = rewrite_to_fixpoint(root, &mut ctx.names, options.config.max_rewrite_rounds)?;
    let rewritten = outcome.value;

    let mut slots = SlotVarMap::new();
    let stage =
        NodeLowering::new(&mut ctx, props, scan_defs, options).lower(&rewritten, &mut slots)?;

    let output_slots = match &rewritten.kind {
        NodeKind::Root { projections, .. } => projections
            .iter()
            .map(|name| {
                slots
                    .get(name)
                    .map(|slot| (name.clone(), *slot))
                    .ok_or_else(|| Error::UnboundVariable(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?,
        _ => slots.iter().map(|(n, s)| (n.clone(), *s)).collect(),
    };
    let rid_slot = match props.require(rewritten.id)?.rid_projection.as_ref() {
        Some(name) => Some(
            slots
                .get(name)
                .copied()
                .ok_or_else(|| Error::UnboundVariable(name.to_string()))?,
        ),
        None => None,
    };

    trace::emit_span(
        "lowered",
        &[
            ("root_stage", stage.name().to_string()),
            ("rounds", outcome.rounds.to_string()),
            ("slots", ctx.slot_ids.allocated().to_string()),
            ("params", ctx.input_params.len().to_string()),
        ],
    );

    Ok(LoweredPlan {
        stage,
        output_slots,
        rid_slot,
        input_params: ctx.input_params,
        runtime_env: ctx.runtime_env,
        rewritten,
        rounds: outcome.rounds,
    })
}

/// Run the path-lowering/const-eval fixpoint over a standalone expression.
pub fn optimize_expression(
    expr: Expr,
    names: &mut NameGenerator,
    max_rounds: usize,
) -> Result<RewriteOutcome<Expr>> {
    rewrite_expr_to_fixpoint(expr, names, max_rounds)
}
