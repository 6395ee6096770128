//! Scalar expressions as the execution engine consumes them.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use slotforge_core::id::{FrameId, SlotId};
use slotforge_core::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EPrimUnary {
    LogicNot,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EPrimBinary {
    Eq,
    Neq,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Cmp3w,
    Add,
    Sub,
    Mul,
    Div,
    LogicAnd,
    LogicOr,
    FillEmpty,
}

impl EPrimUnary {
    pub fn symbol(self) -> &'static str {
        match self {
            EPrimUnary::LogicNot => "!",
            EPrimUnary::Negate => "-",
        }
    }
}

impl EPrimBinary {
    pub fn symbol(self) -> &'static str {
        match self {
            EPrimBinary::Eq => "==",
            EPrimBinary::Neq => "!=",
            EPrimBinary::Greater => ">",
            EPrimBinary::GreaterEq => ">=",
            EPrimBinary::Less => "<",
            EPrimBinary::LessEq => "<=",
            EPrimBinary::Cmp3w => "<=>",
            EPrimBinary::Add => "+",
            EPrimBinary::Sub => "-",
            EPrimBinary::Mul => "*",
            EPrimBinary::Div => "/",
            EPrimBinary::LogicAnd => "&&",
            EPrimBinary::LogicOr => "||",
            EPrimBinary::FillEmpty => "?:",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EExpr {
    Constant(Value),
    /// Slot read.
    Variable(SlotId),
    /// Read of a let/lambda binding: `frame` plus position in that frame.
    LocalVariable {
        frame: FrameId,
        index: usize,
    },
    PrimUnary {
        op: EPrimUnary,
        arg: Box<EExpr>,
    },
    PrimBinary {
        op: EPrimBinary,
        lhs: Box<EExpr>,
        rhs: Box<EExpr>,
    },
    If {
        cond: Box<EExpr>,
        then_branch: Box<EExpr>,
        else_branch: Box<EExpr>,
    },
    Let {
        frame: FrameId,
        binds: Vec<EExpr>,
        body: Box<EExpr>,
    },
    Lambda {
        frame: FrameId,
        body: Box<EExpr>,
    },
    Function {
        name: String,
        args: Vec<EExpr>,
    },
}

impl EExpr {
    pub fn constant(v: Value) -> Self {
        EExpr::Constant(v)
    }

    pub fn slot(id: SlotId) -> Self {
        EExpr::Variable(id)
    }

    pub fn function(name: impl Into<String>, args: Vec<EExpr>) -> Self {
        EExpr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn binary(op: EPrimBinary, lhs: EExpr, rhs: EExpr) -> Self {
        EExpr::PrimBinary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            EExpr::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Slots read anywhere in this expression.
    pub fn slots(&self) -> BTreeSet<SlotId> {
        let mut out = BTreeSet::new();
        self.collect_slots(&mut out);
        out
    }

    fn collect_slots(&self, out: &mut BTreeSet<SlotId>) {
        match self {
            EExpr::Constant(_) | EExpr::LocalVariable { .. } => {}
            EExpr::Variable(s) => {
                out.insert(*s);
            }
            EExpr::PrimUnary { arg, .. } => arg.collect_slots(out),
            EExpr::PrimBinary { lhs, rhs, .. } => {
                lhs.collect_slots(out);
                rhs.collect_slots(out);
            }
            EExpr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.collect_slots(out);
                then_branch.collect_slots(out);
                else_branch.collect_slots(out);
            }
            EExpr::Let { binds, body, .. } => {
                for b in binds {
                    b.collect_slots(out);
                }
                body.collect_slots(out);
            }
            EExpr::Lambda { body, .. } => body.collect_slots(out),
            EExpr::Function { args, .. } => {
                for a in args {
                    a.collect_slots(out);
                }
            }
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[EExpr]) -> fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

impl fmt::Display for EExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EExpr::Constant(v) => write!(f, "{v}"),
            EExpr::Variable(s) => write!(f, "{s}"),
            EExpr::LocalVariable { frame, index } => write!(f, "{frame}.{index}"),
            EExpr::PrimUnary { op, arg } => write!(f, "{}({arg})", op.symbol()),
            EExpr::PrimBinary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            EExpr::If {
                cond,
                then_branch,
                else_branch,
            } => write!(f, "if {cond} then {then_branch} else {else_branch}"),
            EExpr::Let { frame, binds, body } => {
                write!(f, "let [")?;
                for (i, b) in binds.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{frame}.{i} = {b}")?;
                }
                write!(f, "] {body}")
            }
            EExpr::Lambda { frame, body } => write!(f, "lambda({frame}.0) {{ {body} }}"),
            EExpr::Function { name, args } => {
                write!(f, "{name}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
        }
    }
}
