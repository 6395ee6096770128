//! Scalar expressions and the path sublanguage.
//!
//! Paths only ever appear under `EvalPath` / `EvalFilter`; the rewrite
//! fixpoint in `slotforge-lower` eliminates them before scalar lowering.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{FieldName, Operations, ProjectionName};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant(Value),
    Variable(ProjectionName),
    UnaryOp {
        op: Operations,
        arg: Box<Expr>,
    },
    BinaryOp {
        op: Operations,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Let {
        var: ProjectionName,
        bind: Box<Expr>,
        body: Box<Expr>,
    },
    LambdaAbstraction {
        var: ProjectionName,
        body: Box<Expr>,
    },
    LambdaApplication {
        lambda: Box<Expr>,
        arg: Box<Expr>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
    },
    /// Evaluate `path` against `input`, producing a value.
    EvalPath {
        path: Box<Path>,
        input: Box<Expr>,
    },
    /// Evaluate `path` against `input` as a predicate.
    EvalFilter {
        path: Box<Path>,
        input: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Path {
    Identity,
    Constant(Box<Expr>),
    Get {
        field: FieldName,
        inner: Box<Path>,
    },
    Traverse {
        inner: Box<Path>,
    },
    Compare {
        op: Operations,
        value: Box<Expr>,
    },
    ComposeM(Box<Path>, Box<Path>),
}

impl Expr {
    pub fn constant(v: Value) -> Self {
        Expr::Constant(v)
    }

    pub fn boolean(b: bool) -> Self {
        Expr::Constant(Value::Bool(b))
    }

    pub fn var(name: impl Into<ProjectionName>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn unary(op: Operations, arg: Expr) -> Self {
        Expr::UnaryOp {
            op,
            arg: Box::new(arg),
        }
    }

    pub fn binary(op: Operations, lhs: Expr, rhs: Expr) -> Self {
        Expr::BinaryOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn if_then_else(cond: Expr, then_branch: Expr, else_branch: Expr) -> Self {
        Expr::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }
    }

    pub fn let_in(var: impl Into<ProjectionName>, bind: Expr, body: Expr) -> Self {
        Expr::Let {
            var: var.into(),
            bind: Box::new(bind),
            body: Box::new(body),
        }
    }

    pub fn lambda(var: impl Into<ProjectionName>, body: Expr) -> Self {
        Expr::LambdaAbstraction {
            var: var.into(),
            body: Box::new(body),
        }
    }

    pub fn apply(lambda: Expr, arg: Expr) -> Self {
        Expr::LambdaApplication {
            lambda: Box::new(lambda),
            arg: Box::new(arg),
        }
    }

    pub fn fcall(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::FunctionCall {
            name: name.into(),
            args,
        }
    }

    /// `getParam(<param id>, <type tag>)`.
    pub fn get_param(param_id: i32, tag: crate::value::TypeTag) -> Self {
        Expr::fcall(
            "getParam",
            vec![
                Expr::Constant(Value::Int32(param_id)),
                Expr::Constant(Value::Int32(tag.as_i32())),
            ],
        )
    }

    pub fn eval_path(path: Path, input: Expr) -> Self {
        Expr::EvalPath {
            path: Box::new(path),
            input: Box::new(input),
        }
    }

    pub fn eval_filter(path: Path, input: Expr) -> Self {
        Expr::EvalFilter {
            path: Box::new(path),
            input: Box::new(input),
        }
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Expr::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_constant_true(&self) -> bool {
        matches!(self, Expr::Constant(Value::Bool(true)))
    }

    /// Short kind name used by explain output and error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Constant(_) => "Const",
            Expr::Variable(_) => "Variable",
            Expr::UnaryOp { .. } => "UnaryOp",
            Expr::BinaryOp { .. } => "BinaryOp",
            Expr::If { .. } => "If",
            Expr::Let { .. } => "Let",
            Expr::LambdaAbstraction { .. } => "LambdaAbstraction",
            Expr::LambdaApplication { .. } => "LambdaApplication",
            Expr::FunctionCall { .. } => "FunctionCall",
            Expr::EvalPath { .. } => "EvalPath",
            Expr::EvalFilter { .. } => "EvalFilter",
        }
    }

    /// Number of path nodes anywhere under this expression.
    pub fn path_node_count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |e| {
            if let Expr::EvalPath { path, .. } | Expr::EvalFilter { path, .. } = e {
                count += path.node_count();
            }
        });
        count
    }

    /// Pre-order visit of this expression and every expression nested in it,
    /// including expressions embedded in paths.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Constant(_) | Expr::Variable(_) => {}
            Expr::UnaryOp { arg, .. } => arg.visit(f),
            Expr::BinaryOp { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.visit(f);
                then_branch.visit(f);
                else_branch.visit(f);
            }
            Expr::Let { bind, body, .. } => {
                bind.visit(f);
                body.visit(f);
            }
            Expr::LambdaAbstraction { body, .. } => body.visit(f),
            Expr::LambdaApplication { lambda, arg } => {
                lambda.visit(f);
                arg.visit(f);
            }
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.visit(f);
                }
            }
            Expr::EvalPath { path, input } | Expr::EvalFilter { path, input } => {
                path.visit_exprs(f);
                input.visit(f);
            }
        }
    }

    /// Variables referenced but not bound by an enclosing let/lambda.
    pub fn free_variables(&self) -> BTreeSet<ProjectionName> {
        let mut out = BTreeSet::new();
        let mut bound = Vec::new();
        collect_free(self, &mut bound, &mut out);
        out
    }

    /// Count of `Variable(name)` occurrences, ignoring scoping.
    pub fn occurrences_of(&self, name: &ProjectionName) -> usize {
        let mut count = 0;
        self.visit(&mut |e| {
            if let Expr::Variable(v) = e {
                if v == name {
                    count += 1;
                }
            }
        });
        count
    }
}

fn collect_free(e: &Expr, bound: &mut Vec<ProjectionName>, out: &mut BTreeSet<ProjectionName>) {
    match e {
        Expr::Constant(_) => {}
        Expr::Variable(v) => {
            if !bound.contains(v) {
                out.insert(v.clone());
            }
        }
        Expr::UnaryOp { arg, .. } => collect_free(arg, bound, out),
        Expr::BinaryOp { lhs, rhs, .. } => {
            collect_free(lhs, bound, out);
            collect_free(rhs, bound, out);
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => {
            collect_free(cond, bound, out);
            collect_free(then_branch, bound, out);
            collect_free(else_branch, bound, out);
        }
        Expr::Let { var, bind, body } => {
            collect_free(bind, bound, out);
            bound.push(var.clone());
            collect_free(body, bound, out);
            bound.pop();
        }
        Expr::LambdaAbstraction { var, body } => {
            bound.push(var.clone());
            collect_free(body, bound, out);
            bound.pop();
        }
        Expr::LambdaApplication { lambda, arg } => {
            collect_free(lambda, bound, out);
            collect_free(arg, bound, out);
        }
        Expr::FunctionCall { args, .. } => {
            for arg in args {
                collect_free(arg, bound, out);
            }
        }
        Expr::EvalPath { path, input } | Expr::EvalFilter { path, input } => {
            path.visit_exprs(&mut |pe| {
                // Expressions embedded in paths see the same scope as the path.
                for v in pe.free_variables() {
                    if !bound.contains(&v) {
                        out.insert(v);
                    }
                }
            });
            collect_free(input, bound, out);
        }
    }
}

impl Path {
    pub fn get(field: impl Into<FieldName>, inner: Path) -> Self {
        Path::Get {
            field: field.into(),
            inner: Box::new(inner),
        }
    }

    pub fn traverse(inner: Path) -> Self {
        Path::Traverse {
            inner: Box::new(inner),
        }
    }

    pub fn compare(op: Operations, value: Expr) -> Self {
        Path::Compare {
            op,
            value: Box::new(value),
        }
    }

    pub fn constant(e: Expr) -> Self {
        Path::Constant(Box::new(e))
    }

    pub fn compose_m(lhs: Path, rhs: Path) -> Self {
        Path::ComposeM(Box::new(lhs), Box::new(rhs))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Path::Identity => "PathIdentity",
            Path::Constant(_) => "PathConstant",
            Path::Get { .. } => "PathGet",
            Path::Traverse { .. } => "PathTraverse",
            Path::Compare { .. } => "PathCompare",
            Path::ComposeM(..) => "PathComposeM",
        }
    }

    /// Number of path nodes in this path. Paths inside embedded expressions
    /// are not included; `Expr::path_node_count` reaches those.
    pub fn node_count(&self) -> usize {
        match self {
            Path::Identity | Path::Constant(_) | Path::Compare { .. } => 1,
            Path::Get { inner, .. } | Path::Traverse { inner } => 1 + inner.node_count(),
            Path::ComposeM(l, r) => 1 + l.node_count() + r.node_count(),
        }
    }

    /// Visit every expression embedded in this path (pre-order).
    pub fn visit_exprs(&self, f: &mut impl FnMut(&Expr)) {
        match self {
            Path::Identity => {}
            Path::Constant(e) | Path::Compare { value: e, .. } => e.visit(f),
            Path::Get { inner, .. } | Path::Traverse { inner } => inner.visit_exprs(f),
            Path::ComposeM(l, r) => {
                l.visit_exprs(f);
                r.visit_exprs(f);
            }
        }
    }

    /// Dotted field name for a path built only from Get/Traverse/Identity.
    pub fn dotted_field_name(&self) -> Option<String> {
        let mut parts: Vec<&str> = Vec::new();
        let mut cur = self;
        loop {
            match cur {
                Path::Identity => break,
                Path::Get { field, inner } => {
                    parts.push(field);
                    cur = inner;
                }
                Path::Traverse { inner } => cur = inner,
                _ => return None,
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("."))
        }
    }
}
