//! Path-free `Expr` -> executable `EExpr`.

use slotforge_core::abt::{CollationOp, Expr, Operations, ProjectionName};
use slotforge_core::error::{Error, Result};
use slotforge_core::explain::explain_path;
use slotforge_core::id::{FrameId, SlotId};
use slotforge_core::scan_def::ScanDefinition;
use slotforge_core::value::Value;
use slotforge_stage::builtins;
use slotforge_stage::{EExpr, EPrimBinary, EPrimUnary};

use crate::context::CompilationContext;
use crate::node_lower::SlotVarMap;

/// Lowers scalar expressions against one slot binding map.
///
/// Let and lambda variables shadow slot bindings and become frame-local
/// variables. `getParam` references are deduplicated through the
/// compilation's parameter map, so every occurrence of one parameter id
/// reads the same slot.
pub struct ExprLowering<'a> {
    slots: &'a SlotVarMap,
    ctx: &'a mut CompilationContext,
    scan_def: Option<&'a ScanDefinition>,
    locals: Vec<(ProjectionName, FrameId)>,
}

impl<'a> ExprLowering<'a> {
    pub fn new(slots: &'a SlotVarMap, ctx: &'a mut CompilationContext) -> Self {
        Self {
            slots,
            ctx,
            scan_def: None,
            locals: Vec::new(),
        }
    }

    /// Scan definition consulted by `shardFilter` calls.
    pub fn with_scan_def(mut self, def: Option<&'a ScanDefinition>) -> Self {
        self.scan_def = def;
        self
    }

    pub fn lower(&mut self, e: &Expr) -> Result<EExpr> {
        match e {
            Expr::Constant(v) => Ok(EExpr::constant(v.clone())),
            Expr::Variable(name) => self.resolve(name),
            Expr::UnaryOp { op, arg } => {
                let arg = self.lower(arg)?;
                let op = match op {
                    Operations::Not => EPrimUnary::LogicNot,
                    Operations::Neg => EPrimUnary::Negate,
                    other => {
                        return Err(Error::Invariant(format!(
                            "{} is not a unary operation",
                            other.name()
                        )))
                    }
                };
                Ok(EExpr::PrimUnary {
                    op,
                    arg: Box::new(arg),
                })
            }
            Expr::BinaryOp { op, lhs, rhs } => {
                let lhs = self.lower(lhs)?;
                let rhs = self.lower(rhs)?;
                lower_binary(*op, lhs, rhs)
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.lower(cond)?;
                let then_branch = self.lower(then_branch)?;
                let else_branch = self.lower(else_branch)?;
                Ok(EExpr::If {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                })
            }
            Expr::Let { var, bind, body } => self.lower_let(var, bind, body),
            Expr::LambdaAbstraction { var, body } => {
                let frame = self.ctx.frame_ids.generate();
                let body = self.scoped(var, frame, body)?;
                Ok(EExpr::Lambda {
                    frame,
                    body: Box::new(body),
                })
            }
            Expr::LambdaApplication { lambda, arg } => match lambda.as_ref() {
                Expr::LambdaAbstraction { var, body } => self.lower_let(var, arg, body),
                other => Err(Error::Invariant(format!(
                    "cannot apply non-lambda {}",
                    other.kind_name()
                ))),
            },
            Expr::FunctionCall { name, args } => self.lower_call(name, args),
            Expr::EvalPath { path, .. } | Expr::EvalFilter { path, .. } => {
                Err(Error::PathNotLowered(explain_path(path)))
            }
        }
    }

    fn resolve(&self, name: &ProjectionName) -> Result<EExpr> {
        if let Some((_, frame)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(EExpr::LocalVariable {
                frame: *frame,
                index: 0,
            });
        }
        self.slots
            .get(name)
            .map(|slot| EExpr::slot(*slot))
            .ok_or_else(|| Error::UnboundVariable(name.to_string()))
    }

    fn scoped(&mut self, var: &ProjectionName, frame: FrameId, body: &Expr) -> Result<EExpr> {
        self.locals.push((var.clone(), frame));
        let lowered = self.lower(body);
        self.locals.pop();
        lowered
    }

    fn lower_let(&mut self, var: &ProjectionName, bind: &Expr, body: &Expr) -> Result<EExpr> {
        let bind = self.lower(bind)?;
        let frame = self.ctx.frame_ids.generate();
        let body = self.scoped(var, frame, body)?;
        Ok(EExpr::Let {
            frame,
            binds: vec![bind],
            body: Box::new(body),
        })
    }

    fn lower_call(&mut self, name: &str, args: &[Expr]) -> Result<EExpr> {
        match name {
            "getParam" => return self.lower_get_param(args),
            "shardFilter" => return self.lower_shard_filter(args),
            _ => {}
        }
        let builtin = builtins::lookup(name).ok_or_else(|| Error::UnknownFunction(name.into()))?;
        if !builtin.arity.accepts(args.len()) {
            return Err(Error::FunctionArity {
                name: name.into(),
                expected: builtin.arity.describe(),
                actual: args.len(),
            });
        }
        let args = args
            .iter()
            .map(|a| self.lower(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(EExpr::function(name, args))
    }

    fn lower_get_param(&mut self, args: &[Expr]) -> Result<EExpr> {
        let id = match args {
            [id, tag] => match (id.as_constant(), tag.as_constant()) {
                (Some(Value::Int32(id)), Some(Value::Int32(_))) => *id,
                _ => {
                    return Err(Error::Invariant(
                        "getParam expects constant int32 id and type tag".into(),
                    ))
                }
            },
            _ => {
                return Err(Error::FunctionArity {
                    name: "getParam".into(),
                    expected: "2".into(),
                    actual: args.len(),
                })
            }
        };
        Ok(EExpr::slot(self.param_slot(id)?))
    }

    fn param_slot(&mut self, id: i32) -> Result<SlotId> {
        if let Some(slot) = self.ctx.input_params.get(id) {
            return Ok(slot);
        }
        let slot = self
            .ctx
            .runtime_env
            .register_slot(None, Value::Nothing, &mut self.ctx.slot_ids)?;
        self.ctx.input_params.insert(id, slot);
        Ok(slot)
    }

    /// `shardFilter(<filterer>, newObj("a.b", v0, ...))`, one field per
    /// shard key component. Hashed components go through `shardHash`.
    fn lower_shard_filter(&mut self, args: &[Expr]) -> Result<EExpr> {
        let def = self
            .scan_def
            .ok_or_else(|| Error::ShardKey("no scan definition in scope".into()))?;
        if def.shard_key.is_empty() {
            return Err(Error::ShardKey(format!(
                "collection '{}' has no shard key",
                def.db_name
            )));
        }
        if args.len() != def.shard_key.len() {
            return Err(Error::ShardKey(format!(
                "shard key has {} component(s), predicate supplies {}",
                def.shard_key.len(),
                args.len()
            )));
        }
        let filterer = self
            .ctx
            .shard_filterer_slot()
            .ok_or_else(|| Error::ShardKey("shard filterer slot is not registered".into()))?;

        let mut fields = Vec::with_capacity(args.len() * 2);
        for (entry, arg) in def.shard_key.iter().zip(args) {
            let field = entry.path.dotted_field_name().ok_or_else(|| {
                Error::ShardKey(format!(
                    "shard key path {} names no field",
                    explain_path(&entry.path)
                ))
            })?;
            let mut value = self.lower(arg)?;
            if matches!(entry.op, CollationOp::Clustered) {
                value = EExpr::function("shardHash", vec![value]);
            }
            fields.push(EExpr::constant(Value::str(field)));
            fields.push(value);
        }
        Ok(EExpr::function(
            "shardFilter",
            vec![EExpr::slot(filterer), EExpr::function("newObj", fields)],
        ))
    }
}

/// Operand order is kept as given; no operation is commuted.
fn lower_binary(op: Operations, lhs: EExpr, rhs: EExpr) -> Result<EExpr> {
    let prim = match op {
        Operations::Eq => EPrimBinary::Eq,
        Operations::Neq => EPrimBinary::Neq,
        Operations::Gt => EPrimBinary::Greater,
        Operations::Gte => EPrimBinary::GreaterEq,
        Operations::Lt => EPrimBinary::Less,
        Operations::Lte => EPrimBinary::LessEq,
        Operations::Cmp3w => EPrimBinary::Cmp3w,
        Operations::Add => EPrimBinary::Add,
        Operations::Sub => EPrimBinary::Sub,
        Operations::Mult => EPrimBinary::Mul,
        Operations::Div => EPrimBinary::Div,
        Operations::And => EPrimBinary::LogicAnd,
        Operations::Or => EPrimBinary::LogicOr,
        Operations::FillEmpty => EPrimBinary::FillEmpty,
        Operations::EqMember => return Ok(EExpr::function("isMember", vec![lhs, rhs])),
        Operations::Neg | Operations::Not => {
            return Err(Error::Invariant(format!(
                "{} is not a binary operation",
                op.name()
            )))
        }
    };
    Ok(EExpr::binary(prim, lhs, rhs))
}

/// Lower one expression with no shard context.
pub fn lower_expression(
    e: &Expr,
    slots: &SlotVarMap,
    ctx: &mut CompilationContext,
) -> Result<EExpr> {
    ExprLowering::new(slots, ctx).lower(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotforge_core::abt::Path;
    use slotforge_core::config::LoweringConfig;
    use slotforge_core::scan_def::IndexCollationEntry;
    use slotforge_core::value::TypeTag;

    fn ctx() -> CompilationContext {
        CompilationContext::new(&LoweringConfig::default()).unwrap()
    }

    fn slots(names: &[(&str, u64)]) -> SlotVarMap {
        names
            .iter()
            .map(|(n, s)| (ProjectionName::from(*n), SlotId::new(*s)))
            .collect()
    }

    #[test]
    fn constants_keep_their_type() {
        let mut c = ctx();
        let out = lower_expression(
            &Expr::constant(Value::int64(100)),
            &SlotVarMap::new(),
            &mut c,
        )
        .unwrap();
        assert_eq!(out.as_constant(), Some(&Value::Int64(100)));
        assert_ne!(out.as_constant(), Some(&Value::Int32(100)));
    }

    #[test]
    fn operands_are_not_commuted() {
        let mut c = ctx();
        let map = slots(&[("a", 3)]);
        let e = Expr::binary(
            Operations::Lt,
            Expr::constant(Value::str("x")),
            Expr::var("a"),
        );
        let out = lower_expression(&e, &map, &mut c).unwrap();
        assert_eq!(
            out,
            EExpr::binary(
                EPrimBinary::Less,
                EExpr::constant(Value::str("x")),
                EExpr::slot(SlotId::new(3))
            )
        );

        let member = Expr::binary(Operations::EqMember, Expr::var("a"), Expr::var("a"));
        let out = lower_expression(&member, &map, &mut c).unwrap();
        assert_eq!(
            out,
            EExpr::function("isMember", vec![EExpr::slot(SlotId::new(3)); 2])
        );
    }

    #[test]
    fn unbound_and_unknown_are_fatal() {
        let mut c = ctx();
        let err = lower_expression(&Expr::var("nope"), &SlotVarMap::new(), &mut c).unwrap_err();
        assert!(matches!(err, Error::UnboundVariable(ref n) if n == "nope"));

        let err = lower_expression(&Expr::fcall("frobnicate", vec![]), &SlotVarMap::new(), &mut c)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(_)));

        let err = lower_expression(
            &Expr::fcall("getField", vec![Expr::boolean(true)]),
            &SlotVarMap::new(),
            &mut c,
        )
        .unwrap_err();
        assert!(matches!(err, Error::FunctionArity { actual: 1, .. }));
    }

    #[test]
    fn paths_are_rejected() {
        let mut c = ctx();
        let map = slots(&[("root", 1)]);
        let e = Expr::eval_path(Path::get("a", Path::Identity), Expr::var("root"));
        let err = lower_expression(&e, &map, &mut c).unwrap_err();
        assert!(matches!(err, Error::PathNotLowered(_)));
    }

    #[test]
    fn get_param_is_deduplicated() {
        let mut c = ctx();
        let e = Expr::binary(
            Operations::Add,
            Expr::get_param(7, TypeTag::NumberInt64),
            Expr::get_param(7, TypeTag::NumberInt64),
        );
        let out = lower_expression(&e, &SlotVarMap::new(), &mut c).unwrap();
        assert_eq!(c.input_params.len(), 1);
        let slot = c.input_params.get(7).unwrap();
        assert_eq!(out, EExpr::binary(EPrimBinary::Add, EExpr::slot(slot), EExpr::slot(slot)));
        assert_eq!(c.runtime_env.value_of(slot), Some(&Value::Nothing));
    }

    #[test]
    fn let_binds_a_frame_local() {
        let mut c = ctx();
        let map = slots(&[("v", 4)]);
        // The let variable shadows the slot binding of the same name.
        let e = Expr::let_in(
            "v",
            Expr::constant(Value::int32(1)),
            Expr::binary(Operations::Add, Expr::var("v"), Expr::var("v")),
        );
        let out = lower_expression(&e, &map, &mut c).unwrap();
        let local = EExpr::LocalVariable {
            frame: FrameId::new(100),
            index: 0,
        };
        assert_eq!(
            out,
            EExpr::Let {
                frame: FrameId::new(100),
                binds: vec![EExpr::constant(Value::int32(1))],
                body: Box::new(EExpr::binary(EPrimBinary::Add, local.clone(), local)),
            }
        );
    }

    #[test]
    fn shard_filter_needs_a_shard_key_and_filterer() {
        let call = Expr::fcall("shardFilter", vec![Expr::var("a"), Expr::var("b")]);
        let map = slots(&[("a", 10), ("b", 11)]);
        let def = ScanDefinition::new("test.c1").with_shard_key(vec![
            IndexCollationEntry::new(Path::get("a", Path::Identity), CollationOp::Ascending),
            IndexCollationEntry::new(
                Path::get("b", Path::get("c", Path::Identity)),
                CollationOp::Clustered,
            ),
        ]);

        let mut c = ctx();
        let filterer = c.register_shard_filterer().unwrap();
        let out = ExprLowering::new(&map, &mut c)
            .with_scan_def(Some(&def))
            .lower(&call)
            .unwrap();
        assert_eq!(
            out,
            EExpr::function(
                "shardFilter",
                vec![
                    EExpr::slot(filterer),
                    EExpr::function(
                        "newObj",
                        vec![
                            EExpr::constant(Value::str("a")),
                            EExpr::slot(SlotId::new(10)),
                            EExpr::constant(Value::str("b.c")),
                            EExpr::function("shardHash", vec![EExpr::slot(SlotId::new(11))]),
                        ]
                    ),
                ]
            )
        );

        let unsharded = ScanDefinition::new("test.c1");
        let err = ExprLowering::new(&map, &mut c)
            .with_scan_def(Some(&unsharded))
            .lower(&call)
            .unwrap_err();
        assert!(matches!(err, Error::ShardKey(_)));

        let mut bare = ctx();
        let err = ExprLowering::new(&map, &mut bare)
            .with_scan_def(Some(&def))
            .lower(&call)
            .unwrap_err();
        assert!(matches!(err, Error::ShardKey(_)));
    }
}
