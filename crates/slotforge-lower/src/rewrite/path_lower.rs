//! One step of path elimination.
//!
//! Each `EvalPath` / `EvalFilter` is replaced by a lambda applied to its
//! input. The lambda body unwraps exactly one level of the path; the inner
//! path is left in a fresh `EvalPath` / `EvalFilter` for the next round.
//! Constant evaluation then beta-reduces the application.

use slotforge_core::abt::{Expr, Node, Operations, Path};
use slotforge_core::error::Result;
use slotforge_core::names::NameGenerator;
use slotforge_core::value::Value;

use super::Transformed;

const PATH_INPUT_PREFIX: &str = "valIn";
const ELEMENT_PREFIX: &str = "valElem";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathContext {
    /// `EvalPath`: the path computes a value.
    Value,
    /// `EvalFilter`: the path computes a predicate.
    Filter,
}

pub fn lower_paths(node: Node, names: &mut NameGenerator) -> Result<Transformed<Node>> {
    let mut changed = false;
    let value = node.try_map_exprs(&mut |e| {
        let t = lower_expr_paths(e, names);
        changed |= t.changed;
        Ok(t.value)
    })?;
    Ok(Transformed { value, changed })
}

pub fn lower_expr_paths(e: Expr, names: &mut NameGenerator) -> Transformed<Expr> {
    let mut changed = false;
    let value = rewrite(e, names, &mut changed);
    Transformed { value, changed }
}

fn boxed(e: Expr, names: &mut NameGenerator, changed: &mut bool) -> Box<Expr> {
    Box::new(rewrite(e, names, changed))
}

fn rewrite(e: Expr, names: &mut NameGenerator, changed: &mut bool) -> Expr {
    match e {
        Expr::EvalPath { path, input } => {
            let input = rewrite(*input, names, changed);
            let path = rewrite_path_exprs(*path, names, changed);
            *changed = true;
            lower_one(PathContext::Value, path, input, names)
        }
        Expr::EvalFilter { path, input } => {
            let input = rewrite(*input, names, changed);
            let path = rewrite_path_exprs(*path, names, changed);
            *changed = true;
            lower_one(PathContext::Filter, path, input, names)
        }
        Expr::Constant(_) | Expr::Variable(_) => e,
        Expr::UnaryOp { op, arg } => Expr::UnaryOp {
            op,
            arg: boxed(*arg, names, changed),
        },
        Expr::BinaryOp { op, lhs, rhs } => {
            let lhs = boxed(*lhs, names, changed);
            Expr::BinaryOp {
                op,
                lhs,
                rhs: boxed(*rhs, names, changed),
            }
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let cond = boxed(*cond, names, changed);
            let then_branch = boxed(*then_branch, names, changed);
            Expr::If {
                cond,
                then_branch,
                else_branch: boxed(*else_branch, names, changed),
            }
        }
        Expr::Let { var, bind, body } => {
            let bind = boxed(*bind, names, changed);
            Expr::Let {
                var,
                bind,
                body: boxed(*body, names, changed),
            }
        }
        Expr::LambdaAbstraction { var, body } => Expr::LambdaAbstraction {
            var,
            body: boxed(*body, names, changed),
        },
        Expr::LambdaApplication { lambda, arg } => {
            let lambda = boxed(*lambda, names, changed);
            Expr::LambdaApplication {
                lambda,
                arg: boxed(*arg, names, changed),
            }
        }
        Expr::FunctionCall { name, args } => Expr::FunctionCall {
            name,
            args: args
                .into_iter()
                .map(|a| rewrite(a, names, changed))
                .collect(),
        },
    }
}

/// Lower paths nested inside the expressions a path embeds.
fn rewrite_path_exprs(p: Path, names: &mut NameGenerator, changed: &mut bool) -> Path {
    match p {
        Path::Identity => Path::Identity,
        Path::Constant(e) => Path::Constant(boxed(*e, names, changed)),
        Path::Get { field, inner } => Path::Get {
            field,
            inner: Box::new(rewrite_path_exprs(*inner, names, changed)),
        },
        Path::Traverse { inner } => Path::Traverse {
            inner: Box::new(rewrite_path_exprs(*inner, names, changed)),
        },
        Path::Compare { op, value } => Path::Compare {
            op,
            value: boxed(*value, names, changed),
        },
        Path::ComposeM(l, r) => {
            let l = rewrite_path_exprs(*l, names, changed);
            Path::ComposeM(Box::new(l), Box::new(rewrite_path_exprs(*r, names, changed)))
        }
    }
}

fn eval_in(ctx: PathContext, path: Path, input: Expr) -> Expr {
    match ctx {
        PathContext::Value => Expr::eval_path(path, input),
        PathContext::Filter => Expr::eval_filter(path, input),
    }
}

/// Replace `Eval*(path, input)` with `(lambda v. body)(input)` where `body`
/// handles the outermost path constructor.
fn lower_one(ctx: PathContext, path: Path, input: Expr, names: &mut NameGenerator) -> Expr {
    let v = names.generate(PATH_INPUT_PREFIX);
    let val = || Expr::Variable(v.clone());
    let body = match path {
        Path::Identity => match ctx {
            PathContext::Value => val(),
            // An identity predicate accepts every input.
            PathContext::Filter => Expr::boolean(true),
        },
        Path::Constant(c) => *c,
        Path::Get { field, inner } => eval_in(
            ctx,
            *inner,
            Expr::fcall("getField", vec![val(), Expr::constant(Value::str(field))]),
        ),
        Path::Traverse { inner } => {
            let elem = names.generate(ELEMENT_PREFIX);
            let per_element =
                Expr::lambda(elem.clone(), eval_in(ctx, *inner, Expr::Variable(elem)));
            match ctx {
                PathContext::Value => Expr::fcall(
                    "traverseP",
                    vec![val(), per_element, Expr::constant(Value::Nothing)],
                ),
                PathContext::Filter => Expr::fcall(
                    "traverseF",
                    vec![val(), per_element, Expr::boolean(false)],
                ),
            }
        }
        Path::Compare { op, value } => {
            let cmp = Expr::binary(op, val(), *value);
            match ctx {
                PathContext::Value => cmp,
                PathContext::Filter => {
                    Expr::binary(Operations::FillEmpty, cmp, Expr::boolean(false))
                }
            }
        }
        Path::ComposeM(l, r) => Expr::binary(
            Operations::And,
            eval_in(ctx, *l, val()),
            eval_in(ctx, *r, val()),
        ),
    };
    Expr::apply(Expr::lambda(v, body), input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_unwraps_one_level_per_pass() {
        let mut names = NameGenerator::new();
        let e = Expr::eval_path(
            Path::get("a", Path::get("b", Path::Identity)),
            Expr::var("root"),
        );
        let t = lower_expr_paths(e, &mut names);
        assert!(t.changed);
        let expected = Expr::apply(
            Expr::lambda(
                "valIn_0",
                Expr::eval_path(
                    Path::get("b", Path::Identity),
                    Expr::fcall(
                        "getField",
                        vec![Expr::var("valIn_0"), Expr::constant(Value::str("a"))],
                    ),
                ),
            ),
            Expr::var("root"),
        );
        assert_eq!(t.value, expected);
    }

    #[test]
    fn filter_compare_defaults_to_false() {
        let mut names = NameGenerator::new();
        let e = Expr::eval_filter(
            Path::compare(Operations::Lt, Expr::constant(Value::int32(3))),
            Expr::var("x"),
        );
        let t = lower_expr_paths(e, &mut names);
        let expected = Expr::apply(
            Expr::lambda(
                "valIn_0",
                Expr::binary(
                    Operations::FillEmpty,
                    Expr::binary(
                        Operations::Lt,
                        Expr::var("valIn_0"),
                        Expr::constant(Value::int32(3)),
                    ),
                    Expr::boolean(false),
                ),
            ),
            Expr::var("x"),
        );
        assert_eq!(t.value, expected);
    }

    #[test]
    fn filter_identity_is_true() {
        let mut names = NameGenerator::new();
        let t = lower_expr_paths(Expr::eval_filter(Path::Identity, Expr::var("x")), &mut names);
        assert_eq!(
            t.value,
            Expr::apply(Expr::lambda("valIn_0", Expr::boolean(true)), Expr::var("x"))
        );

        let mut names = NameGenerator::new();
        let t = lower_expr_paths(Expr::eval_path(Path::Identity, Expr::var("x")), &mut names);
        assert_eq!(
            t.value,
            Expr::apply(Expr::lambda("valIn_0", Expr::var("valIn_0")), Expr::var("x"))
        );
    }

    #[test]
    fn path_free_expressions_are_untouched() {
        let mut names = NameGenerator::new();
        let e = Expr::binary(Operations::Add, Expr::var("a"), Expr::var("b"));
        let t = lower_expr_paths(e.clone(), &mut names);
        assert!(!t.changed);
        assert_eq!(t.value, e);
    }
}
