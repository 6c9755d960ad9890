//! Lowering of sugar nodes to primitive ones.

use std::sync::Arc;

use super::node::{ExprKind, IncrementKind, MemberBinding};
use super::{BinaryOp, Expr, ExprError, Parameter, Rewriter};
use crate::types::{Type, array_push};
use crate::values::Value;

type Result<T> = core::result::Result<T, ExprError>;

impl Expr {
    /// Performs one reduction step. Non-reducible nodes are returned as is.
    pub fn reduce(&self) -> Result<Expr> {
        match self.kind() {
            ExprKind::MemberInit { new, bindings } => reduce_member_init(new, bindings),
            ExprKind::ListInit { array, items } => reduce_list_init(self.ty(), array, items),
            ExprKind::Increment { kind, operand } => reduce_increment(*kind, operand),
            ExprKind::CompoundAssign { op, target, value } => reduce_compound(*op, target, value),
            ExprKind::Extension(ext) if ext.can_reduce() => {
                let reduced = ext.reduce()?;
                if let ExprKind::Extension(other) = reduced.kind()
                    && Arc::ptr_eq(other, ext)
                {
                    return Err(ExprError::ReducedToSelf(ext.name().into()));
                }
                if reduced.ty() != self.ty() {
                    return Err(ExprError::ReducedTypeChanged {
                        name: ext.name().into(),
                        expected: self.ty().clone(),
                        found: reduced.ty().clone(),
                    });
                }
                Ok(reduced)
            }
            _ => Ok(self.clone()),
        }
    }

    /// Reduces this node until it is no longer reducible. Children are left
    /// alone.
    pub fn reduce_extensions(&self) -> Result<Expr> {
        let mut current = self.clone();
        while current.can_reduce() {
            current = current.reduce()?;
        }
        Ok(current)
    }

    /// Reduces every node of the tree to a fixed point.
    pub fn reduce_all(&self) -> Result<Expr> {
        DeepReducer.rewrite(self)
    }
}

struct DeepReducer;

impl Rewriter for DeepReducer {
    type Error = ExprError;

    fn rewrite(&mut self, expr: &Expr) -> Result<Expr> {
        let reduced = expr.reduce_extensions()?;
        self.rewrite_children(&reduced)
    }
}

fn reduce_member_init(new: &Expr, bindings: &[MemberBinding]) -> Result<Expr> {
    let temp = Parameter::temp(new.ty(), "init");
    let mut exprs = vec![Expr::assign(temp.to_expr(), new.clone())?];
    for binding in bindings {
        let target = Expr::member(temp.to_expr(), binding.field.clone())?;
        exprs.push(Expr::assign(target, binding.value.clone())?);
    }
    exprs.push(temp.to_expr());
    Expr::block_with(vec![temp], exprs)
}

fn reduce_list_init(ty: &Type, array: &Expr, items: &[Expr]) -> Result<Expr> {
    let elem = ty.element_type().cloned().unwrap_or(Type::Object);
    let push = array_push(&elem);
    let temp = Parameter::temp(ty, "list");
    let mut exprs = vec![Expr::assign(temp.to_expr(), array.clone())?];
    for item in items {
        exprs.push(Expr::call_static(&push, vec![temp.to_expr(), item.clone()])?);
    }
    exprs.push(temp.to_expr());
    Expr::block_with(vec![temp], exprs)
}

/// Evaluates the receiver and index of an assignable target into
/// temporaries, so the target can be read and written without evaluating
/// its operands twice.
struct StableTarget {
    temps: Vec<Parameter>,
    setup: Vec<Expr>,
    target: Expr,
}

fn stabilize(target: &Expr) -> Result<StableTarget> {
    let mut temps = Vec::new();
    let mut setup = Vec::new();
    let mut spill = |operand: &Expr, name: &str| -> Result<Expr> {
        let temp = Parameter::temp(operand.ty(), name);
        setup.push(Expr::assign(temp.to_expr(), operand.clone())?);
        let read = temp.to_expr();
        temps.push(temp);
        Ok(read)
    };
    let target = match target.kind() {
        ExprKind::Member { object, field } => Expr::member(spill(object, "obj")?, field.clone())?,
        ExprKind::Index { object, index } => {
            let object = spill(object, "obj")?;
            let index = spill(index, "idx")?;
            Expr::make_index(object, index)?
        }
        _ => target.clone(),
    };
    Ok(StableTarget {
        temps,
        setup,
        target,
    })
}

fn finish(stable: StableTarget, mut tail: Vec<Expr>, mut temps: Vec<Parameter>) -> Result<Expr> {
    let mut exprs = stable.setup;
    exprs.append(&mut tail);
    let mut variables = stable.temps;
    variables.append(&mut temps);
    if variables.is_empty() && exprs.len() == 1 {
        return Ok(exprs.remove(0));
    }
    Expr::block_with(variables, exprs)
}

fn one(ty: &Type) -> Expr {
    match ty {
        Type::Float => Expr::constant(Value::Float(1.0)),
        _ => Expr::constant(Value::Int(1)),
    }
}

fn reduce_increment(kind: IncrementKind, operand: &Expr) -> Result<Expr> {
    let stable = stabilize(operand)?;
    let target = stable.target.clone();
    let ty = target.ty().clone();

    if !kind.is_post() {
        let updated = Expr::make_binary(kind.op(), target.clone(), one(&ty))?;
        let tail = vec![Expr::assign(target, updated)?];
        return finish(stable, tail, Vec::new());
    }

    let old = Parameter::temp(&ty, "old");
    let updated = Expr::make_binary(kind.op(), old.to_expr(), one(&ty))?;
    let tail = vec![
        Expr::assign(old.to_expr(), target.clone())?,
        Expr::assign(target, updated)?,
        old.to_expr(),
    ];
    finish(stable, tail, vec![old])
}

fn reduce_compound(op: BinaryOp, target: &Expr, value: &Expr) -> Result<Expr> {
    let stable = stabilize(target)?;
    let target = stable.target.clone();
    let combined = Expr::make_binary(op, target.clone(), value.clone())?;
    let tail = vec![Expr::assign(target, combined)?];
    finish(stable, tail, Vec::new())
}
