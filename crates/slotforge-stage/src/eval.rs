//! Reference interpreter for storage-free stages.
//!
//! Rows are slot -> value maps. Only the stages that need no storage engine
//! are supported (co-scan, in-memory scan, filter, project, limit/skip,
//! unwind, unique, union); anything else is reported, not guessed.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use slotforge_core::id::{FrameId, SlotId};
use slotforge_core::value::{ArithOp, Value};
use thiserror::Error;

use crate::expr::{EExpr, EPrimBinary, EPrimUnary};
use crate::runtime::RuntimeEnvironment;
use crate::stage::{Stage, StageKind};

pub type Row = BTreeMap<SlotId, Value>;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("stage '{0}' is not supported by the reference evaluator")]
    UnsupportedStage(&'static str),

    #[error("function '{0}' is not supported by the reference evaluator")]
    UnsupportedFunction(String),

    #[error("no in-memory collection named '{0}'")]
    UnknownCollection(String),

    #[error("local variable {0} is not bound")]
    UnboundLocal(String),

    #[error("evaluation error: {0}")]
    Type(String),
}

type Frames = Vec<(FrameId, Vec<Value>)>;

/// Runs stage trees over in-memory documents.
#[derive(Debug)]
pub struct Evaluator<'a> {
    env: &'a RuntimeEnvironment,
    collections: BTreeMap<String, Vec<Value>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(env: &'a RuntimeEnvironment) -> Self {
        Self {
            env,
            collections: BTreeMap::new(),
        }
    }

    /// Documents returned by scans of `name`, in order.
    pub fn with_collection(mut self, name: impl Into<String>, docs: Vec<Value>) -> Self {
        self.collections.insert(name.into(), docs);
        self
    }

    pub fn run(&self, stage: &Stage) -> Result<Vec<Row>, EvalError> {
        match &stage.kind {
            StageKind::CoScan => Ok(vec![Row::new()]),
            StageKind::Scan {
                collection,
                rid_slot,
                record_slot,
                fields,
                seek_rid_slot: None,
                ..
            } => {
                let docs = self
                    .collections
                    .get(collection)
                    .ok_or_else(|| EvalError::UnknownCollection(collection.clone()))?;
                Ok(docs
                    .iter()
                    .enumerate()
                    .map(|(i, doc)| {
                        let mut row = Row::new();
                        if let Some(s) = rid_slot {
                            row.insert(*s, Value::RecordId(i as i64));
                        }
                        if let Some(s) = record_slot {
                            row.insert(*s, doc.clone());
                        }
                        for (field, s) in fields {
                            row.insert(*s, doc.get_field(field));
                        }
                        row
                    })
                    .collect())
            }
            StageKind::Filter {
                child,
                predicate,
                is_const,
            } => {
                if *is_const {
                    if !is_true(&self.eval(predicate, &Row::new())?) {
                        return Ok(Vec::new());
                    }
                    return self.run(child);
                }
                let mut out = Vec::new();
                for row in self.run(child)? {
                    if is_true(&self.eval(predicate, &row)?) {
                        out.push(row);
                    }
                }
                Ok(out)
            }
            StageKind::Project { child, projections } => {
                let mut rows = self.run(child)?;
                for row in rows.iter_mut() {
                    for (slot, e) in projections {
                        let v = self.eval(e, row)?;
                        row.insert(*slot, v);
                    }
                }
                Ok(rows)
            }
            StageKind::LimitSkip { child, limit, skip } => {
                let rows = self.run(child)?.into_iter().skip(skip.unwrap_or(0) as usize);
                Ok(match limit {
                    Some(l) => rows.take(*l as usize).collect(),
                    None => rows.collect(),
                })
            }
            StageKind::Unwind {
                child,
                input_slot,
                output_slot,
                index_slot,
                preserve_non_arrays,
            } => {
                let mut out = Vec::new();
                for row in self.run(child)? {
                    let input = row.get(input_slot).cloned().unwrap_or(Value::Nothing);
                    match input {
                        Value::Array(items) if !items.is_empty() => {
                            for (i, item) in items.into_iter().enumerate() {
                                let mut r = row.clone();
                                r.insert(*output_slot, item);
                                r.insert(*index_slot, Value::Int64(i as i64));
                                out.push(r);
                            }
                        }
                        Value::Array(_) => {
                            if *preserve_non_arrays {
                                let mut r = row.clone();
                                r.insert(*output_slot, Value::Nothing);
                                r.insert(*index_slot, Value::Nothing);
                                out.push(r);
                            }
                        }
                        other => {
                            if *preserve_non_arrays {
                                let mut r = row.clone();
                                r.insert(*output_slot, other);
                                r.insert(*index_slot, Value::Nothing);
                                out.push(r);
                            }
                        }
                    }
                }
                Ok(out)
            }
            StageKind::Unique { child, keys } => {
                let mut seen: Vec<Vec<Value>> = Vec::new();
                let mut out = Vec::new();
                for row in self.run(child)? {
                    let key: Vec<Value> = keys
                        .iter()
                        .map(|k| row.get(k).cloned().unwrap_or(Value::Nothing))
                        .collect();
                    let dup = seen.iter().any(|s| {
                        s.iter()
                            .zip(&key)
                            .all(|(a, b)| a.total_cmp(b) == Ordering::Equal)
                    });
                    if !dup {
                        seen.push(key);
                        out.push(row);
                    }
                }
                Ok(out)
            }
            StageKind::Union {
                children,
                input_slots,
                output_slots,
            } => {
                let mut out = Vec::new();
                for (child, inputs) in children.iter().zip(input_slots) {
                    for row in self.run(child)? {
                        let mapped: Row = output_slots
                            .iter()
                            .zip(inputs)
                            .map(|(o, i)| (*o, row.get(i).cloned().unwrap_or(Value::Nothing)))
                            .collect();
                        out.push(mapped);
                    }
                }
                Ok(out)
            }
            _ => Err(EvalError::UnsupportedStage(stage.name())),
        }
    }

    /// Evaluate `e` against one row. Slots missing from the row fall back to
    /// the runtime environment, then to `Nothing`.
    pub fn eval(&self, e: &EExpr, row: &Row) -> Result<Value, EvalError> {
        let mut frames = Frames::new();
        self.eval_in(e, row, &mut frames)
    }

    fn eval_in(&self, e: &EExpr, row: &Row, frames: &mut Frames) -> Result<Value, EvalError> {
        match e {
            EExpr::Constant(v) => Ok(v.clone()),
            EExpr::Variable(s) => Ok(row
                .get(s)
                .or_else(|| self.env.value_of(*s))
                .cloned()
                .unwrap_or(Value::Nothing)),
            EExpr::LocalVariable { frame, index } => frames
                .iter()
                .rev()
                .find(|(f, _)| f == frame)
                .and_then(|(_, vals)| vals.get(*index))
                .cloned()
                .ok_or_else(|| EvalError::UnboundLocal(format!("{frame}.{index}"))),
            EExpr::PrimUnary { op, arg } => {
                let v = self.eval_in(arg, row, frames)?;
                Ok(match op {
                    EPrimUnary::LogicNot => v.as_bool().map_or(Value::Nothing, |b| Value::Bool(!b)),
                    EPrimUnary::Negate => v.negate().unwrap_or(Value::Nothing),
                })
            }
            EExpr::PrimBinary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, row, frames),
            EExpr::If {
                cond,
                then_branch,
                else_branch,
            } => match self.eval_in(cond, row, frames)? {
                Value::Bool(true) => self.eval_in(then_branch, row, frames),
                Value::Bool(false) => self.eval_in(else_branch, row, frames),
                _ => Ok(Value::Nothing),
            },
            EExpr::Let { frame, binds, body } => {
                let vals = binds
                    .iter()
                    .map(|b| self.eval_in(b, row, frames))
                    .collect::<Result<Vec<_>, _>>()?;
                frames.push((*frame, vals));
                let out = self.eval_in(body, row, frames);
                frames.pop();
                out
            }
            EExpr::Lambda { .. } => Err(EvalError::Type(
                "lambda is only valid as a traverse argument".into(),
            )),
            EExpr::Function { name, args } => self.eval_function(name, args, row, frames),
        }
    }

    fn eval_binary(
        &self,
        op: EPrimBinary,
        lhs: &EExpr,
        rhs: &EExpr,
        row: &Row,
        frames: &mut Frames,
    ) -> Result<Value, EvalError> {
        let l = self.eval_in(lhs, row, frames)?;
        match op {
            EPrimBinary::LogicAnd => {
                return match l {
                    Value::Bool(false) => Ok(Value::Bool(false)),
                    Value::Bool(true) => self.eval_in(rhs, row, frames),
                    _ => Ok(Value::Nothing),
                }
            }
            EPrimBinary::LogicOr => {
                return match l {
                    Value::Bool(true) => Ok(Value::Bool(true)),
                    Value::Bool(false) => self.eval_in(rhs, row, frames),
                    _ => Ok(Value::Nothing),
                }
            }
            EPrimBinary::FillEmpty => {
                return if l.is_nothing() {
                    self.eval_in(rhs, row, frames)
                } else {
                    Ok(l)
                }
            }
            _ => {}
        }
        let r = self.eval_in(rhs, row, frames)?;
        if l.is_nothing() || r.is_nothing() {
            return Ok(Value::Nothing);
        }
        let arith = |a: ArithOp| l.arith(a, &r).unwrap_or(Value::Nothing);
        Ok(match op {
            EPrimBinary::Add => arith(ArithOp::Add),
            EPrimBinary::Sub => arith(ArithOp::Sub),
            EPrimBinary::Mul => arith(ArithOp::Mul),
            EPrimBinary::Div => arith(ArithOp::Div),
            EPrimBinary::Cmp3w => Value::Int32(match l.total_cmp(&r) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            }),
            cmp => match l.compare(&r) {
                None => Value::Nothing,
                Some(ord) => Value::Bool(match cmp {
                    EPrimBinary::Eq => ord == Ordering::Equal,
                    EPrimBinary::Neq => ord != Ordering::Equal,
                    EPrimBinary::Greater => ord == Ordering::Greater,
                    EPrimBinary::GreaterEq => ord != Ordering::Less,
                    EPrimBinary::Less => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                }),
            },
        })
    }

    fn apply_lambda(
        &self,
        lambda: &EExpr,
        arg: Value,
        row: &Row,
        frames: &mut Frames,
    ) -> Result<Value, EvalError> {
        match lambda {
            EExpr::Lambda { frame, body } => {
                frames.push((*frame, vec![arg]));
                let out = self.eval_in(body, row, frames);
                frames.pop();
                out
            }
            other => Err(EvalError::Type(format!("expected lambda, got {other}"))),
        }
    }

    fn eval_function(
        &self,
        name: &str,
        args: &[EExpr],
        row: &Row,
        frames: &mut Frames,
    ) -> Result<Value, EvalError> {
        match (name, args) {
            ("traverseP", [input, lambda, _]) => {
                match self.eval_in(input, row, frames)? {
                    Value::Array(items) => {
                        let mut out = Vec::with_capacity(items.len());
                        for item in items {
                            out.push(self.apply_lambda(lambda, item, row, frames)?);
                        }
                        Ok(Value::Array(out))
                    }
                    v => self.apply_lambda(lambda, v, row, frames),
                }
            }
            ("traverseF", [input, lambda, compare_array]) => {
                let input = self.eval_in(input, row, frames)?;
                if let Value::Array(items) = &input {
                    for item in items {
                        if is_true(&self.apply_lambda(lambda, item.clone(), row, frames)?) {
                            return Ok(Value::Bool(true));
                        }
                    }
                    if !is_true(&self.eval_in(compare_array, row, frames)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                let v = self.apply_lambda(lambda, input, row, frames)?;
                Ok(Value::Bool(is_true(&v)))
            }
            _ => {
                let vals = args
                    .iter()
                    .map(|a| self.eval_in(a, row, frames))
                    .collect::<Result<Vec<_>, _>>()?;
                scalar_function(name, vals)
            }
        }
    }
}

fn is_true(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

fn scalar_function(name: &str, vals: Vec<Value>) -> Result<Value, EvalError> {
    let arity = |n: usize| -> Result<(), EvalError> {
        if vals.len() == n {
            Ok(())
        } else {
            Err(EvalError::Type(format!("{name} expects {n} argument(s)")))
        }
    };
    match name {
        "getField" => {
            arity(2)?;
            Ok(match &vals[1] {
                Value::Str(f) => vals[0].get_field(f),
                _ => Value::Nothing,
            })
        }
        "getElement" => {
            arity(2)?;
            Ok(match (&vals[0], vals[1].as_i64()) {
                (Value::Array(items), Some(i)) if i >= 0 => {
                    items.get(i as usize).cloned().unwrap_or(Value::Nothing)
                }
                _ => Value::Nothing,
            })
        }
        "getArraySize" => {
            arity(1)?;
            Ok(match &vals[0] {
                Value::Array(items) => Value::Int64(items.len() as i64),
                _ => Value::Nothing,
            })
        }
        "exists" => {
            arity(1)?;
            Ok(Value::Bool(!vals[0].is_nothing()))
        }
        "isArray" | "isObject" | "isString" | "isNumber" | "isNull" => {
            arity(1)?;
            let v = &vals[0];
            if v.is_nothing() {
                return Ok(Value::Nothing);
            }
            Ok(Value::Bool(match name {
                "isArray" => matches!(v, Value::Array(_)),
                "isObject" => matches!(v, Value::Object(_)),
                "isString" => matches!(v, Value::Str(_)),
                "isNumber" => v.is_number(),
                _ => matches!(v, Value::Null),
            }))
        }
        "isMember" => {
            arity(2)?;
            Ok(match &vals[1] {
                Value::Array(items) => Value::Bool(
                    items
                        .iter()
                        .any(|i| vals[0].compare(i) == Some(Ordering::Equal)),
                ),
                _ => Value::Nothing,
            })
        }
        "coerceToBool" => {
            arity(1)?;
            Ok(match &vals[0] {
                Value::Nothing => Value::Nothing,
                Value::Null => Value::Bool(false),
                Value::Bool(b) => Value::Bool(*b),
                v if v.is_number() => Value::Bool(
                    v.compare(&Value::Int32(0)) != Some(Ordering::Equal),
                ),
                _ => Value::Bool(true),
            })
        }
        "abs" => {
            arity(1)?;
            let v = &vals[0];
            Ok(match v.compare(&Value::Int32(0)) {
                Some(Ordering::Less) => v.negate().unwrap_or(Value::Nothing),
                Some(_) => v.clone(),
                None => Value::Nothing,
            })
        }
        "newArray" => Ok(Value::Array(vals)),
        "newObj" => {
            if vals.len() % 2 != 0 {
                return Err(EvalError::Type("newObj expects name/value pairs".into()));
            }
            let mut fields = Vec::with_capacity(vals.len() / 2);
            let mut it = vals.into_iter();
            while let (Some(k), Some(v)) = (it.next(), it.next()) {
                match k {
                    Value::Str(k) if !v.is_nothing() => fields.push((k, v)),
                    Value::Str(_) => {}
                    other => {
                        return Err(EvalError::Type(format!("newObj field name {other}")))
                    }
                }
            }
            Ok(Value::Object(fields))
        }
        other => Err(EvalError::UnsupportedFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotforge_core::id::PlanNodeId;

    fn stage(kind: StageKind) -> Stage {
        Stage::new(PlanNodeId::new(0), kind)
    }

    fn scan(record: SlotId) -> Stage {
        stage(StageKind::Scan {
            collection: "c".into(),
            uuid: None,
            rid_slot: None,
            record_slot: Some(record),
            fields: vec![],
            seek_rid_slot: None,
            forward: true,
            partitions: None,
            yield_policy: None,
        })
    }

    #[test]
    fn filter_then_limit_over_memory_scan() {
        let env = RuntimeEnvironment::new();
        let s1 = SlotId::new(1);
        let docs = (0..5)
            .map(|i| Value::Object(vec![("a".into(), Value::int32(i))]))
            .collect();
        let filter = stage(StageKind::Filter {
            child: Box::new(scan(s1)),
            predicate: EExpr::binary(
                EPrimBinary::GreaterEq,
                EExpr::function(
                    "getField",
                    vec![EExpr::slot(s1), EExpr::constant(Value::str("a"))],
                ),
                EExpr::constant(Value::int32(1)),
            ),
            is_const: false,
        });
        let limit = stage(StageKind::LimitSkip {
            child: Box::new(filter),
            limit: Some(2),
            skip: Some(1),
        });
        let rows = Evaluator::new(&env)
            .with_collection("c", docs)
            .run(&limit)
            .unwrap();
        let got: Vec<Value> = rows.iter().map(|r| r[&s1].get_field("a")).collect();
        assert_eq!(got, vec![Value::int32(2), Value::int32(3)]);
    }

    #[test]
    fn traverse_filter_matches_any_element() {
        let env = RuntimeEnvironment::new();
        let frame = FrameId::new(100);
        let pred = EExpr::function(
            "traverseF",
            vec![
                EExpr::constant(Value::Array(vec![Value::int32(1), Value::int32(7)])),
                EExpr::Lambda {
                    frame,
                    body: Box::new(EExpr::binary(
                        EPrimBinary::Eq,
                        EExpr::LocalVariable { frame, index: 0 },
                        EExpr::constant(Value::int32(7)),
                    )),
                },
                EExpr::constant(Value::boolean(false)),
            ],
        );
        assert_eq!(Evaluator::new(&env).eval(&pred, &Row::new()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn unsupported_stage_is_reported() {
        let env = RuntimeEnvironment::new();
        let sort = stage(StageKind::Sort {
            child: Box::new(stage(StageKind::CoScan)),
            order_by: vec![],
            dirs: vec![],
            values: vec![],
            limit: None,
        });
        assert!(matches!(
            Evaluator::new(&env).run(&sort),
            Err(EvalError::UnsupportedStage("sort"))
        ));
    }
}
