//! Deterministic text rendering of ABT trees.
//!
//! Output depends only on tree contents, so two renderings of equal trees
//! are byte-identical and can be compared or hashed.

use std::fmt::Write as _;

use crate::abt::{CollationSpec, Expr, FieldProjectionMap, Node, NodeKind, Path, ProjectionName};

/// Render an expression on a single line.
pub fn explain_expr(e: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, e);
    out
}

pub fn explain_path(p: &Path) -> String {
    let mut out = String::new();
    write_path(&mut out, p);
    out
}

/// Render a plan tree, one node per line, children indented.
pub fn explain_abt(node: &Node) -> String {
    let mut out = String::new();
    write_node(&mut out, node, 0);
    out
}

fn join_exprs(out: &mut String, args: &[Expr]) {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(out, a);
    }
}

fn write_expr(out: &mut String, e: &Expr) {
    match e {
        Expr::Constant(v) => {
            let _ = write!(out, "{v}");
        }
        Expr::Variable(name) => out.push_str(name.as_str()),
        Expr::UnaryOp { op, arg } => {
            let _ = write!(out, "{}(", op.name());
            write_expr(out, arg);
            out.push(')');
        }
        Expr::BinaryOp { op, lhs, rhs } => {
            let _ = write!(out, "{}(", op.name());
            write_expr(out, lhs);
            out.push_str(", ");
            write_expr(out, rhs);
            out.push(')');
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => {
            out.push_str("If(");
            write_expr(out, cond);
            out.push_str(", ");
            write_expr(out, then_branch);
            out.push_str(", ");
            write_expr(out, else_branch);
            out.push(')');
        }
        Expr::Let { var, bind, body } => {
            let _ = write!(out, "Let({var} = ");
            write_expr(out, bind);
            out.push_str(" in ");
            write_expr(out, body);
            out.push(')');
        }
        Expr::LambdaAbstraction { var, body } => {
            let _ = write!(out, "Lambda({var} -> ");
            write_expr(out, body);
            out.push(')');
        }
        Expr::LambdaApplication { lambda, arg } => {
            out.push_str("Apply(");
            write_expr(out, lambda);
            out.push_str(", ");
            write_expr(out, arg);
            out.push(')');
        }
        Expr::FunctionCall { name, args } => {
            let _ = write!(out, "{name}(");
            join_exprs(out, args);
            out.push(')');
        }
        Expr::EvalPath { path, input } | Expr::EvalFilter { path, input } => {
            let _ = write!(out, "{}(", e.kind_name());
            write_path(out, path);
            out.push_str(", ");
            write_expr(out, input);
            out.push(')');
        }
    }
}

fn write_path(out: &mut String, p: &Path) {
    match p {
        Path::Identity => out.push_str("Id"),
        Path::Constant(e) => {
            out.push_str("Const(");
            write_expr(out, e);
            out.push(')');
        }
        Path::Get { field, inner } => {
            let _ = write!(out, "Get[{field:?}] ");
            write_path(out, inner);
        }
        Path::Traverse { inner } => {
            out.push_str("Traverse(");
            write_path(out, inner);
            out.push(')');
        }
        Path::Compare { op, value } => {
            let _ = write!(out, "Compare[{}] ", op.name());
            write_expr(out, value);
        }
        Path::ComposeM(l, r) => {
            out.push_str("ComposeM(");
            write_path(out, l);
            out.push_str(", ");
            write_path(out, r);
            out.push(')');
        }
    }
}

fn names(list: &[ProjectionName]) -> String {
    let parts: Vec<&str> = list.iter().map(ProjectionName::as_str).collect();
    format!("[{}]", parts.join(", "))
}

fn fpm(map: &FieldProjectionMap) -> String {
    let mut parts = Vec::new();
    if let Some(rid) = &map.rid_projection {
        parts.push(format!("<rid>: {rid}"));
    }
    if let Some(root) = &map.root_projection {
        parts.push(format!("<root>: {root}"));
    }
    for (field, proj) in &map.field_projections {
        parts.push(format!("{field}: {proj}"));
    }
    format!("{{{}}}", parts.join(", "))
}

fn collation(spec: &CollationSpec) -> String {
    let parts: Vec<String> = spec
        .iter()
        .map(|(p, op)| format!("{p}: {}", op.name()))
        .collect();
    format!("[{}]", parts.join(", "))
}

fn write_node(out: &mut String, node: &Node, depth: usize) {
    let pad = "  ".repeat(depth);
    let _ = write!(out, "{pad}{}", node.name());
    match &node.kind {
        NodeKind::PhysicalScan {
            fpm: m,
            scan_def_name,
            parallel,
        } => {
            let _ = write!(out, " {scan_def_name} {}", fpm(m));
            if *parallel {
                out.push_str(" parallel");
            }
        }
        NodeKind::IndexScan {
            fpm: m,
            scan_def_name,
            index_def_name,
            interval,
            reversed,
        } => {
            let _ = write!(out, " {scan_def_name}.{index_def_name} {}", fpm(m));
            out.push_str(if interval.low.inclusive { " [" } else { " (" });
            join_exprs(out, &interval.low.bound);
            out.push_str(" | ");
            join_exprs(out, &interval.high.bound);
            out.push_str(if interval.high.inclusive { "]" } else { ")" });
            if *reversed {
                out.push_str(" reversed");
            }
        }
        NodeKind::Seek {
            rid_projection,
            fpm: m,
            scan_def_name,
        } => {
            let _ = write!(out, " {scan_def_name} rid={rid_projection} {}", fpm(m));
        }
        NodeKind::CoScan => {}
        NodeKind::Filter { filter, .. } => {
            out.push(' ');
            write_expr(out, filter);
        }
        NodeKind::Evaluation {
            projection, expr, ..
        } => {
            let _ = write!(out, " {projection} = ");
            write_expr(out, expr);
        }
        NodeKind::GroupBy {
            group_keys,
            agg_projections,
            agg_exprs,
            group_type,
            ..
        } => {
            let _ = write!(out, " {group_type} keys={}", names(group_keys));
            for (p, e) in agg_projections.iter().zip(agg_exprs) {
                let _ = write!(out, " {p}=");
                write_expr(out, e);
            }
        }
        NodeKind::HashJoin {
            join_type,
            left_keys,
            right_keys,
            ..
        } => {
            let _ = write!(out, " {join_type} {} = {}", names(left_keys), names(right_keys));
        }
        NodeKind::MergeJoin {
            left_keys,
            right_keys,
            collation: ops,
            ..
        } => {
            let ops: Vec<&str> = ops.iter().map(|o| o.name()).collect();
            let _ = write!(
                out,
                " {} = {} [{}]",
                names(left_keys),
                names(right_keys),
                ops.join(", ")
            );
        }
        NodeKind::NestedLoopJoin {
            join_type,
            correlated,
            filter,
            ..
        } => {
            let corr: Vec<ProjectionName> = correlated.iter().cloned().collect();
            let _ = write!(out, " {join_type} correlated={} ", names(&corr));
            write_expr(out, filter);
        }
        NodeKind::Collation { spec, .. } => {
            let _ = write!(out, " {}", collation(spec));
        }
        NodeKind::LimitSkip { req, .. } => {
            let show = |v: Option<u64>| v.map_or_else(|| "none".to_string(), |v| v.to_string());
            let _ = write!(out, " limit={} skip={}", show(req.limit), show(req.skip));
        }
        NodeKind::Union { projections, .. } => {
            let _ = write!(out, " {}", names(projections));
        }
        NodeKind::SortedMerge {
            collation: spec,
            projections,
            ..
        } => {
            let _ = write!(out, " {} {}", collation(spec), names(projections));
        }
        NodeKind::Unique { keys, .. } => {
            let _ = write!(out, " {}", names(keys));
        }
        NodeKind::Unwind {
            projection,
            pid_projection,
            retain_non_arrays,
            ..
        } => {
            let _ = write!(
                out,
                " {projection} pid={pid_projection} retainNonArrays={retain_non_arrays}"
            );
        }
        NodeKind::SpoolProducer {
            kind,
            spool_id,
            projections,
            filter,
            ..
        } => {
            let _ = write!(out, " {kind} id={spool_id} {} ", names(projections));
            write_expr(out, filter);
        }
        NodeKind::SpoolConsumer {
            kind,
            spool_id,
            projections,
        } => {
            let _ = write!(out, " {kind} id={spool_id} {}", names(projections));
        }
        NodeKind::Exchange { distribution, .. } => {
            let _ = write!(out, " {distribution:?}");
        }
        NodeKind::Root { projections, .. } => {
            let list: Vec<ProjectionName> = projections.iter().cloned().collect();
            let _ = write!(out, " {}", names(&list));
        }
        NodeKind::Scan {
            projection,
            scan_def_name,
        } => {
            let _ = write!(out, " {scan_def_name} -> {projection}");
        }
        NodeKind::RidIntersect {
            scan_projection, ..
        } => {
            let _ = write!(out, " {scan_projection}");
        }
    }
    out.push('\n');
    for child in node.children() {
        write_node(out, child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abt::{Operations, PlanBuilder};
    use crate::value::Value;

    #[test]
    fn renders_nested_plan() {
        let mut b = PlanBuilder::new();
        let scan = b.physical_scan(FieldProjectionMap::root("root"), "c1", false);
        let filter = b.filter(
            Expr::eval_filter(
                Path::get("a", Path::compare(Operations::Eq, Expr::constant(Value::int64(1)))),
                Expr::var("root"),
            ),
            scan,
        );
        let root = b.root(["root"], filter);
        let text = explain_abt(&root);
        assert_eq!(
            text,
            concat!(
                "Root [root]\n",
                "  Filter EvalFilter(Get[\"a\"] Compare[Eq] 1ll, root)\n",
                "    PhysicalScan c1 {<root>: root}\n",
            )
        );
    }
}
