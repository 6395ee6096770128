//! Constant evaluation: beta reduction, let inlining, literal folding and
//! trivial path simplification.
//!
//! Let inlining that depends on use counts consults the `VariableEnvironment`
//! built for the tree at the start of the pass. The first rewrite that
//! changes use counts makes that environment stale, so count-based rules are
//! suspended for the rest of the pass; the next round rebuilds it.

use std::cmp::Ordering;

use slotforge_core::abt::{Expr, Node, Operations, Path, ProjectionName};
use slotforge_core::error::Result;
use slotforge_core::value::{ArithOp, Value};

use super::Transformed;
use crate::env::{binders, VariableEnvironment};

pub fn fold_node(node: Node, env: &VariableEnvironment) -> Result<Transformed<Node>> {
    let mut folder = ConstFolder::new(env, env.is_current_for(&node)?);
    let value = node.try_map_exprs(&mut |e| Ok(folder.fold(e)))?;
    Ok(Transformed {
        value,
        changed: folder.changed,
    })
}

pub fn fold_expr(e: Expr, env: &VariableEnvironment) -> Result<Transformed<Expr>> {
    let mut folder = ConstFolder::new(env, env.is_current_for_expr(&e)?);
    let value = folder.fold(e);
    Ok(Transformed {
        value,
        changed: folder.changed,
    })
}

struct ConstFolder<'a> {
    env: &'a VariableEnvironment,
    env_usable: bool,
    changed: bool,
}

impl<'a> ConstFolder<'a> {
    fn new(env: &'a VariableEnvironment, env_usable: bool) -> Self {
        Self {
            env,
            env_usable,
            changed: false,
        }
    }

    fn fold(&mut self, e: Expr) -> Expr {
        let mut e = self.fold_children(e);
        loop {
            let t = self.step(e);
            if !t.changed {
                return t.value;
            }
            self.changed = true;
            e = t.value;
        }
    }

    fn fold_box(&mut self, e: Box<Expr>) -> Box<Expr> {
        Box::new(self.fold(*e))
    }

    fn fold_children(&mut self, e: Expr) -> Expr {
        match e {
            Expr::Constant(_) | Expr::Variable(_) => e,
            Expr::UnaryOp { op, arg } => Expr::UnaryOp {
                op,
                arg: self.fold_box(arg),
            },
            Expr::BinaryOp { op, lhs, rhs } => {
                let lhs = self.fold_box(lhs);
                Expr::BinaryOp {
                    op,
                    lhs,
                    rhs: self.fold_box(rhs),
                }
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.fold_box(cond);
                let then_branch = self.fold_box(then_branch);
                Expr::If {
                    cond,
                    then_branch,
                    else_branch: self.fold_box(else_branch),
                }
            }
            Expr::Let { var, bind, body } => {
                let bind = self.fold_box(bind);
                Expr::Let {
                    var,
                    bind,
                    body: self.fold_box(body),
                }
            }
            Expr::LambdaAbstraction { var, body } => Expr::LambdaAbstraction {
                var,
                body: self.fold_box(body),
            },
            Expr::LambdaApplication { lambda, arg } => {
                let lambda = self.fold_box(lambda);
                Expr::LambdaApplication {
                    lambda,
                    arg: self.fold_box(arg),
                }
            }
            Expr::FunctionCall { name, args } => Expr::FunctionCall {
                name,
                args: args.into_iter().map(|a| self.fold(a)).collect(),
            },
            Expr::EvalPath { path, input } => {
                let path = self.fold_path(*path, false);
                Expr::EvalPath {
                    path: Box::new(path),
                    input: self.fold_box(input),
                }
            }
            Expr::EvalFilter { path, input } => {
                let path = self.fold_path(*path, true);
                Expr::EvalFilter {
                    path: Box::new(path),
                    input: self.fold_box(input),
                }
            }
        }
    }

    /// Fold embedded expressions, then drop trivial `ComposeM` operands.
    /// The boolean identities only hold for predicates, hence `filter`.
    fn fold_path(&mut self, p: Path, filter: bool) -> Path {
        match p {
            Path::Identity => Path::Identity,
            Path::Constant(e) => Path::Constant(self.fold_box(e)),
            Path::Get { field, inner } => Path::Get {
                field,
                inner: Box::new(self.fold_path(*inner, filter)),
            },
            Path::Traverse { inner } => Path::Traverse {
                inner: Box::new(self.fold_path(*inner, filter)),
            },
            Path::Compare { op, value } => Path::Compare {
                op,
                value: self.fold_box(value),
            },
            Path::ComposeM(l, r) => {
                let l = self.fold_path(*l, filter);
                let r = self.fold_path(*r, filter);
                if !filter {
                    return Path::ComposeM(Box::new(l), Box::new(r));
                }
                match (filter_path_bool(&l), filter_path_bool(&r)) {
                    (Some(false), _) | (_, Some(false)) => {
                        self.changed = true;
                        Path::constant(Expr::boolean(false))
                    }
                    (Some(true), _) => {
                        self.changed = true;
                        r
                    }
                    (_, Some(true)) => {
                        self.changed = true;
                        l
                    }
                    _ => Path::ComposeM(Box::new(l), Box::new(r)),
                }
            }
        }
    }

    /// Apply at most one rule at the root of `e`.
    fn step(&mut self, e: Expr) -> Transformed<Expr> {
        match e {
            Expr::LambdaApplication { lambda, arg } => match *lambda {
                Expr::LambdaAbstraction { var, body } => Transformed::yes(Expr::Let {
                    var,
                    bind: arg,
                    body,
                }),
                other => Transformed::no(Expr::LambdaApplication {
                    lambda: Box::new(other),
                    arg,
                }),
            },
            Expr::Let { var, bind, body } => self.step_let(var, *bind, *body),
            Expr::BinaryOp { op, lhs, rhs } => fold_binary(op, *lhs, *rhs),
            Expr::UnaryOp { op, arg } => match (op, arg.as_constant()) {
                (Operations::Not, Some(Value::Bool(b))) => Transformed::yes(Expr::boolean(!b)),
                (Operations::Neg, Some(v)) => match v.negate() {
                    Some(n) => Transformed::yes(Expr::constant(n)),
                    None => Transformed::no(Expr::UnaryOp { op, arg }),
                },
                _ => Transformed::no(Expr::UnaryOp { op, arg }),
            },
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => match cond.as_constant() {
                Some(Value::Bool(true)) => Transformed::yes(*then_branch),
                Some(Value::Bool(false)) => Transformed::yes(*else_branch),
                _ => Transformed::no(Expr::If {
                    cond,
                    then_branch,
                    else_branch,
                }),
            },
            Expr::EvalPath { path, input } => trivial_eval(*path, input, false),
            Expr::EvalFilter { path, input } => trivial_eval(*path, input, true),
            other => Transformed::no(other),
        }
    }

    fn step_let(&mut self, var: ProjectionName, bind: Expr, body: Expr) -> Transformed<Expr> {
        if self.env_usable && self.env.use_count(&var) == 0 {
            self.env_usable = false;
            return Transformed::yes(body);
        }
        let trivial = matches!(bind, Expr::Variable(_) | Expr::Constant(_));
        let single_use = self.env_usable && self.env.use_count(&var) == 1;
        if (trivial || single_use) && capture_safe(&bind, &body) {
            self.env_usable = false;
            return Transformed::yes(substitute(body, &var, &bind));
        }
        Transformed::no(Expr::Let {
            var,
            bind: Box::new(bind),
            body: Box::new(body),
        })
    }
}

/// `EvalPath`/`EvalFilter` over `Identity` or a constant path. As a filter,
/// `Identity` accepts every input.
fn trivial_eval(path: Path, input: Box<Expr>, filter: bool) -> Transformed<Expr> {
    match path {
        Path::Identity if filter => Transformed::yes(Expr::boolean(true)),
        Path::Identity => Transformed::yes(*input),
        Path::Constant(c) => Transformed::yes(*c),
        other => {
            let path = Box::new(other);
            Transformed::no(if filter {
                Expr::EvalFilter { path, input }
            } else {
                Expr::EvalPath { path, input }
            })
        }
    }
}

/// The known outcome of a filter path, if any.
fn filter_path_bool(p: &Path) -> Option<bool> {
    match p {
        Path::Identity => Some(true),
        Path::Constant(e) => e.as_constant().and_then(Value::as_bool),
        _ => None,
    }
}

fn fold_binary(op: Operations, lhs: Expr, rhs: Expr) -> Transformed<Expr> {
    use Operations::*;

    match (op, lhs.as_constant()) {
        (FillEmpty, Some(Value::Nothing)) => return Transformed::yes(rhs),
        (FillEmpty, Some(_)) => return Transformed::yes(lhs),
        (And, Some(Value::Bool(false))) | (Or, Some(Value::Bool(true))) => {
            return Transformed::yes(lhs)
        }
        (And, Some(Value::Bool(true))) | (Or, Some(Value::Bool(false))) => {
            return Transformed::yes(rhs)
        }
        _ => {}
    }

    let folded = match (lhs.as_constant(), rhs.as_constant()) {
        // Only same-type literals fold; mixed types keep their runtime
        // comparison semantics and operand order.
        (Some(l), Some(r)) if l.type_tag() == r.type_tag() => match op {
            Eq | Neq | Gt | Gte | Lt | Lte => l.compare(r).map(|ord| {
                Value::Bool(match op {
                    Eq => ord == Ordering::Equal,
                    Neq => ord != Ordering::Equal,
                    Gt => ord == Ordering::Greater,
                    Gte => ord != Ordering::Less,
                    Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                })
            }),
            Cmp3w => l.compare(r).map(|ord| {
                Value::Int32(match ord {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                })
            }),
            Add => l.arith(ArithOp::Add, r),
            Sub => l.arith(ArithOp::Sub, r),
            Mult => l.arith(ArithOp::Mul, r),
            // Integer and decimal division differ between folding and the
            // engine (truncation, precision), so only doubles fold.
            Div if matches!(l, Value::Double(_)) => l.arith(ArithOp::Div, r),
            _ => None,
        },
        _ => None,
    };

    match folded {
        Some(v) => Transformed::yes(Expr::constant(v)),
        None => Transformed::no(Expr::binary(op, lhs, rhs)),
    }
}

/// Substituting `bind` into `body` must not capture its free variables.
fn capture_safe(bind: &Expr, body: &Expr) -> bool {
    let bound = binders(body);
    bind.free_variables().iter().all(|v| !bound.contains(v))
}

/// Replace free occurrences of `var` in `e` with `repl`.
fn substitute(e: Expr, var: &ProjectionName, repl: &Expr) -> Expr {
    let sub = |e: Box<Expr>| Box::new(substitute(*e, var, repl));
    match e {
        Expr::Variable(ref v) if v == var => repl.clone(),
        Expr::Constant(_) | Expr::Variable(_) => e,
        Expr::UnaryOp { op, arg } => Expr::UnaryOp { op, arg: sub(arg) },
        Expr::BinaryOp { op, lhs, rhs } => Expr::BinaryOp {
            op,
            lhs: sub(lhs),
            rhs: sub(rhs),
        },
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => Expr::If {
            cond: sub(cond),
            then_branch: sub(then_branch),
            else_branch: sub(else_branch),
        },
        Expr::Let { var: v, bind, body } => {
            let bind = sub(bind);
            let body = if &v == var { body } else { sub(body) };
            Expr::Let { var: v, bind, body }
        }
        Expr::LambdaAbstraction { var: v, body } => {
            let body = if &v == var { body } else { sub(body) };
            Expr::LambdaAbstraction { var: v, body }
        }
        Expr::LambdaApplication { lambda, arg } => Expr::LambdaApplication {
            lambda: sub(lambda),
            arg: sub(arg),
        },
        Expr::FunctionCall { name, args } => Expr::FunctionCall {
            name,
            args: args.into_iter().map(|a| substitute(a, var, repl)).collect(),
        },
        Expr::EvalPath { path, input } => Expr::EvalPath {
            path: Box::new(substitute_path(*path, var, repl)),
            input: sub(input),
        },
        Expr::EvalFilter { path, input } => Expr::EvalFilter {
            path: Box::new(substitute_path(*path, var, repl)),
            input: sub(input),
        },
    }
}

fn substitute_path(p: Path, var: &ProjectionName, repl: &Expr) -> Path {
    match p {
        Path::Identity => Path::Identity,
        Path::Constant(e) => Path::Constant(Box::new(substitute(*e, var, repl))),
        Path::Get { field, inner } => Path::Get {
            field,
            inner: Box::new(substitute_path(*inner, var, repl)),
        },
        Path::Traverse { inner } => Path::Traverse {
            inner: Box::new(substitute_path(*inner, var, repl)),
        },
        Path::Compare { op, value } => Path::Compare {
            op,
            value: Box::new(substitute(*value, var, repl)),
        },
        Path::ComposeM(l, r) => Path::ComposeM(
            Box::new(substitute_path(*l, var, repl)),
            Box::new(substitute_path(*r, var, repl)),
        ),
    }
}
