//! Stack spilling.
//!
//! The VM cannot enter a protected region or take a jump while operands are
//! pending on the evaluation stack: a `Leave` does not know how to repair
//! them and a label reached from two places must see the same depth. This
//! pass rewrites a lambda so that every `Try`, `Loop`, `Switch`, `Label`
//! and `Goto` runs on an empty stack. Operands evaluated before such a
//! construct are first stored into temporaries inside a `Block`, in their
//! original order.

use std::sync::Arc;

use super::CompileError;
use crate::expr::{BinaryOp, Expr, ExprKind, Lambda, LambdaNode, Parameter};
use crate::types::Type;

/// Stack state in which an expression is evaluated.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Stack {
    Empty,
    NonEmpty,
}

/// What happened to a subtree, ordered by severity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
enum Action {
    /// Unchanged.
    None,
    /// Rebuilt, but safe where it stands.
    Copy,
    /// Contains a construct that needs an empty stack, and is evaluated on
    /// a non-empty one. The parent must spill.
    SpillStack,
}

struct Spilled {
    expr: Expr,
    action: Action,
}

impl Spilled {
    fn unchanged(expr: &Expr) -> Self {
        Spilled {
            expr: expr.clone(),
            action: Action::None,
        }
    }
}

/// Rewrites `lambda` so that it can be lowered to the VM.
///
/// Reducible nodes are reduced on the way. The result has the same
/// signature and the same observable behavior, including the order of
/// side effects. Spilling an already spilled lambda returns it unchanged.
pub fn spill(lambda: &Lambda) -> Result<Lambda, CompileError> {
    let body = rewrite(lambda.body(), Stack::Empty)?;
    if body.action == Action::None {
        return Ok(lambda.clone());
    }
    let params = lambda.params().to_vec();
    Ok(Expr::lambda_typed(lambda.name(), params, lambda.return_type().clone(), body.expr)?)
}

fn rewrite(expr: &Expr, stack: Stack) -> Result<Spilled, CompileError> {
    if expr.can_reduce() {
        let reduced = expr.reduce_extensions()?;
        let mut result = rewrite(&reduced, stack)?;
        result.action = result.action.max(Action::Copy);
        return Ok(result);
    }

    match expr.kind() {
        ExprKind::Constant(_) | ExprKind::Parameter(_) | ExprKind::Default | ExprKind::Extension(_) => {
            Ok(Spilled::unchanged(expr))
        }

        ExprKind::Lambda(node) => rewrite_lambda(expr, node),

        // Only one branch runs, on the stack the node itself sees. The
        // right operand of a short-circuit operator runs after the left
        // one was consumed by the jump.
        ExprKind::Conditional { .. }
        | ExprKind::Block { .. }
        | ExprKind::Throw { .. }
        | ExprKind::Binary {
            op: BinaryOp::AndAlso | BinaryOp::OrElse,
            ..
        } => rewrite_in_place(expr, stack),

        ExprKind::Try { .. }
        | ExprKind::Loop { .. }
        | ExprKind::Switch { .. }
        | ExprKind::Label { .. }
        | ExprKind::Goto { .. } => {
            let mut result = rewrite_in_place(expr, Stack::Empty)?;
            result.action = match stack {
                Stack::NonEmpty => Action::SpillStack,
                Stack::Empty => result.action.min(Action::Copy),
            };
            Ok(result)
        }

        ExprKind::Binary {
            op: BinaryOp::Assign,
            left,
            right,
        } => rewrite_assign(expr, left, right, stack),

        ExprKind::Invoke { target, args } => {
            let pinned = by_ref_positions(target, args.len());
            rewrite_operands(expr, expr.children().into_iter().cloned().collect(), &pinned, stack, |ops| {
                Ok(expr.with_children(ops))
            })
        }

        _ => {
            let operands: Vec<Expr> = expr.children().into_iter().cloned().collect();
            let pinned = vec![false; operands.len()];
            rewrite_operands(expr, operands, &pinned, stack, |ops| Ok(expr.with_children(ops)))
        }
    }
}

/// Every child is evaluated on `stack`; the node never spills itself.
fn rewrite_in_place(expr: &Expr, stack: Stack) -> Result<Spilled, CompileError> {
    let children = expr.children();
    let mut action = Action::None;
    let mut rewritten = Vec::with_capacity(children.len());
    for child in children {
        let result = rewrite(child, stack)?;
        action = action.max(result.action);
        rewritten.push(result.expr);
    }
    Ok(Spilled {
        expr: if action == Action::None {
            expr.clone()
        } else {
            expr.with_children(rewritten)
        },
        action,
    })
}

/// Nested lambdas run in their own activation, starting on an empty stack.
fn rewrite_lambda(expr: &Expr, node: &Arc<LambdaNode>) -> Result<Spilled, CompileError> {
    let body = rewrite(&node.body, Stack::Empty)?;
    if body.action == Action::None {
        return Ok(Spilled::unchanged(expr));
    }
    Ok(Spilled {
        expr: expr.with_children(vec![body.expr]),
        action: Action::Copy,
    })
}

/// The operands of an assignment depend on its target: a variable store
/// only evaluates the value, field and element stores evaluate the
/// receiver (and index) first.
fn rewrite_assign(expr: &Expr, target: &Expr, value: &Expr, stack: Stack) -> Result<Spilled, CompileError> {
    match target.kind() {
        ExprKind::Member { object, field } => {
            let field = field.clone();
            let operands = vec![object.clone(), value.clone()];
            rewrite_operands(expr, operands, &[false, false], stack, move |mut ops| {
                let value = ops.pop().expect("two operands");
                let object = ops.pop().expect("two operands");
                Ok(Expr::assign(Expr::member(object, field)?, value)?)
            })
        }
        ExprKind::Index { object, index } => {
            let operands = vec![object.clone(), index.clone(), value.clone()];
            rewrite_operands(expr, operands, &[false, false, false], stack, |mut ops| {
                let value = ops.pop().expect("three operands");
                let index = ops.pop().expect("three operands");
                let object = ops.pop().expect("three operands");
                Ok(Expr::assign(Expr::make_index(object, index)?, value)?)
            })
        }
        _ => {
            let result = rewrite(value, stack)?;
            Ok(Spilled {
                expr: if result.action == Action::None {
                    expr.clone()
                } else {
                    Expr::assign(target.clone(), result.expr)?
                },
                action: result.action,
            })
        }
    }
}

/// Arguments passed by reference must stay variable reads.
fn by_ref_positions(target: &Expr, argc: usize) -> Vec<bool> {
    let mut pinned = vec![false; argc + 1];
    if let Type::Function(signature) = target.ty() {
        for (i, param) in signature.params.iter().enumerate() {
            pinned[i + 1] = param.by_ref;
        }
    }
    pinned
}

/// Rewrites operands evaluated left to right, each pushing a value.
///
/// The first operand sees the parent's stack, later ones a non-empty one.
/// When an operand needs an empty stack, it and every operand before it
/// are assigned to temporaries at statement position, and the node is
/// rebuilt over the temporaries.
fn rewrite_operands(
    expr: &Expr,
    operands: Vec<Expr>,
    pinned: &[bool],
    stack: Stack,
    rebuild: impl FnOnce(Vec<Expr>) -> Result<Expr, CompileError>,
) -> Result<Spilled, CompileError> {
    let mut results = Vec::with_capacity(operands.len());
    for (i, operand) in operands.iter().enumerate() {
        let operand_stack = if i == 0 { stack } else { Stack::NonEmpty };
        results.push(rewrite(operand, operand_stack)?);
    }

    let action = results.iter().map(|r| r.action).max().unwrap_or(Action::None);
    if action == Action::None {
        return Ok(Spilled::unchanged(expr));
    }

    let Some(last_spilled) = results.iter().rposition(|r| r.action == Action::SpillStack) else {
        return Ok(Spilled {
            expr: rebuild(results.into_iter().map(|r| r.expr).collect())?,
            action,
        });
    };

    let mut temps = Vec::new();
    let mut statements = Vec::new();
    let mut rebuilt = Vec::with_capacity(results.len());
    for (i, result) in results.into_iter().enumerate() {
        let operand = result.expr;
        if i > last_spilled || pinned[i] || is_stable(&operand) {
            rebuilt.push(operand);
        } else if operand.ty().is_void() {
            statements.push(operand);
            rebuilt.push(Expr::empty());
        } else {
            let temp = Parameter::temp(operand.ty(), "spill");
            statements.push(Expr::assign(temp.to_expr(), operand)?);
            rebuilt.push(temp.to_expr());
            temps.push(temp);
        }
    }
    statements.push(rebuild(rebuilt)?);

    Ok(Spilled {
        expr: Expr::block_with(temps, statements)?,
        action: match stack {
            Stack::NonEmpty => Action::SpillStack,
            Stack::Empty => Action::Copy,
        },
    })
}

/// Values that no later operand can change.
fn is_stable(expr: &Expr) -> bool {
    matches!(expr.kind(), ExprKind::Constant(_) | ExprKind::Default)
}
