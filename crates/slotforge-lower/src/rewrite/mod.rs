//! Path elimination and constant folding, driven to a fixpoint.
//!
//! Each pass is a pure function from a tree to `Transformed<tree>`. The
//! driver alternates path lowering and constant evaluation until a whole
//! round reports no change, and fails with `RewriteLimit` instead of looping
//! forever.

pub mod const_eval;
pub mod path_lower;

use slotforge_core::abt::{Expr, Node};
use slotforge_core::error::{Error, Result};
use slotforge_core::names::NameGenerator;

use crate::env::VariableEnvironment;
use crate::trace;

/// Result of one rewrite: the (possibly new) value and whether it changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed<T> {
    pub value: T,
    pub changed: bool,
}

impl<T> Transformed<T> {
    pub fn yes(value: T) -> Self {
        Self {
            value,
            changed: true,
        }
    }

    pub fn no(value: T) -> Self {
        Self {
            value,
            changed: false,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Transformed<U> {
        Transformed {
            value: f(self.value),
            changed: self.changed,
        }
    }

    /// Chain another rewrite, accumulating the changed flag.
    pub fn and_then(self, f: impl FnOnce(T) -> Transformed<T>) -> Transformed<T> {
        let next = f(self.value);
        Transformed {
            value: next.value,
            changed: self.changed || next.changed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RewriteOutcome<T> {
    pub value: T,
    /// Rounds executed, including the final no-change round.
    pub rounds: usize,
}

/// Rewrite every expression in `root` until no path remains and nothing
/// folds further.
pub fn rewrite_to_fixpoint(
    root: Node,
    names: &mut NameGenerator,
    max_rounds: usize,
) -> Result<RewriteOutcome<Node>> {
    let mut current = root;
    for round in 1..=max_rounds {
        let lowered = path_lower::lower_paths(current, names)?;
        let env = VariableEnvironment::build(&lowered.value)?;
        let folded = const_eval::fold_node(lowered.value, &env)?;
        current = folded.value;

        trace::rewrite_round(
            round,
            lowered.changed,
            folded.changed,
            current.path_node_count(),
        );
        if !lowered.changed && !folded.changed {
            return Ok(RewriteOutcome {
                value: current,
                rounds: round,
            });
        }
    }
    Err(Error::RewriteLimit { rounds: max_rounds })
}

/// Same fixpoint for a standalone expression.
pub fn rewrite_expr_to_fixpoint(
    expr: Expr,
    names: &mut NameGenerator,
    max_rounds: usize,
) -> Result<RewriteOutcome<Expr>> {
    let mut current = expr;
    for round in 1..=max_rounds {
        let lowered = path_lower::lower_expr_paths(current, names);
        let env = VariableEnvironment::for_expr(&lowered.value)?;
        let folded = const_eval::fold_expr(lowered.value, &env)?;
        current = folded.value;

        trace::rewrite_round(
            round,
            lowered.changed,
            folded.changed,
            current.path_node_count(),
        );
        if !lowered.changed && !folded.changed {
            return Ok(RewriteOutcome {
                value: current,
                rounds: round,
            });
        }
    }
    Err(Error::RewriteLimit { rounds: max_rounds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotforge_core::abt::{FieldProjectionMap, Operations, Path, PlanBuilder};
    use slotforge_core::value::Value;

    fn nested_filter_path() -> Path {
        Path::compose_m(
            Path::get(
                "a",
                Path::traverse(Path::compare(Operations::Gt, Expr::constant(Value::int64(1)))),
            ),
            Path::get(
                "b",
                Path::get(
                    "c",
                    Path::compare(Operations::Eq, Expr::constant(Value::str("x"))),
                ),
            ),
        )
    }

    #[test]
    fn fixpoint_removes_every_path() {
        let mut b = PlanBuilder::new();
        let scan = b.physical_scan(FieldProjectionMap::root("root"), "c1", false);
        let filter = b.filter(Expr::eval_filter(nested_filter_path(), Expr::var("root")), scan);
        let eval = b.evaluation(
            "p",
            Expr::eval_path(Path::get("a", Path::Identity), Expr::var("root")),
            filter,
        );
        assert!(eval.path_node_count() > 0);

        let mut names = NameGenerator::new();
        let out = rewrite_to_fixpoint(eval, &mut names, 100).unwrap();
        assert_eq!(out.value.path_node_count(), 0);
        assert!(out.rounds > 1);
    }

    #[test]
    fn round_cap_is_enforced() {
        let e = Expr::eval_filter(nested_filter_path(), Expr::var("root"));
        let mut names = NameGenerator::new();
        assert!(matches!(
            rewrite_expr_to_fixpoint(e, &mut names, 1),
            Err(Error::RewriteLimit { rounds: 1 })
        ));
    }

    #[test]
    fn identity_and_constant_paths_disappear() {
        let mut names = NameGenerator::new();
        let e = Expr::eval_path(Path::Identity, Expr::var("x"));
        let out = rewrite_expr_to_fixpoint(e, &mut names, 10).unwrap();
        assert_eq!(out.value, Expr::var("x"));

        let e = Expr::eval_path(Path::constant(Expr::constant(Value::int32(3))), Expr::var("x"));
        let out = rewrite_expr_to_fixpoint(e, &mut names, 10).unwrap();
        assert_eq!(out.value, Expr::constant(Value::int32(3)));
    }

    #[test]
    fn get_lowers_to_field_access() {
        let mut names = NameGenerator::new();
        let e = Expr::eval_path(Path::get("a", Path::Identity), Expr::var("root"));
        let out = rewrite_expr_to_fixpoint(e, &mut names, 10).unwrap();
        assert_eq!(
            out.value,
            Expr::fcall(
                "getField",
                vec![Expr::var("root"), Expr::constant(Value::str("a"))]
            )
        );
    }

    #[test]
    fn repeated_compilation_is_deterministic() {
        let run = || {
            let mut names = NameGenerator::new();
            let e = Expr::eval_filter(nested_filter_path(), Expr::var("root"));
            rewrite_expr_to_fixpoint(e, &mut names, 100).unwrap().value
        };
        assert_eq!(run(), run());
    }
}
