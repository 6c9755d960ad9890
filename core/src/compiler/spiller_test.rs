use pretty_assertions::assert_eq;

use super::*;
use crate::expr::{BinaryOp, Expr, ExprKind, LabelTarget, NodeKind, Parameter};
use crate::types::{ClassBuilder, ClassId};
use crate::values::Value;

fn int(i: i64) -> Expr {
    Expr::constant(Value::Int(i))
}

fn var(name: &str) -> Parameter {
    Parameter::new(Type::Int, name).unwrap()
}

fn assign(target: &Parameter, value: Expr) -> Expr {
    Expr::assign(target.to_expr(), value).unwrap()
}

/// `try { 10 / divisor } catch (DivideByZeroException) { fallback }`
fn guarded_div(divisor: Expr, fallback: i64) -> Expr {
    Expr::try_catch(
        Expr::make_binary(BinaryOp::Divide, int(10), divisor).unwrap(),
        vec![Expr::catch(Type::Class(ClassId::DIVIDE_BY_ZERO), int(fallback)).unwrap()],
    )
    .unwrap()
}

/// `log = log * 10 + digit`
fn append(log: &Parameter, digit: i64) -> Expr {
    let shifted = Expr::multiply(log.to_expr(), int(10)).unwrap();
    assign(log, Expr::add(shifted, int(digit)).unwrap())
}

fn run(lambda: &Lambda) -> Value {
    compile(lambda, &CompileOptions::default())
        .unwrap()
        .invoke(&[])
        .unwrap()
}

#[test]
fn test_tree_without_control_flow_is_unchanged() {
    let x = var("x");
    let lambda = Expr::lambda(None, vec![x.clone()], Expr::add(x.to_expr(), int(1)).unwrap()).unwrap();
    let spilled = spill(&lambda).unwrap();
    assert!(Expr::ptr_eq(spilled.body(), lambda.body()));
}

#[test]
fn test_control_flow_on_empty_stack_is_unchanged() {
    let brk = LabelTarget::void("brk");
    let body = Expr::block(vec![
        Expr::make_loop(Expr::break_(&brk, None).unwrap(), Some(brk), None).unwrap(),
        guarded_div(int(2), 0),
    ])
    .unwrap();
    let lambda = Expr::lambda(None, vec![], body).unwrap();
    let spilled = spill(&lambda).unwrap();
    assert!(Expr::ptr_eq(spilled.body(), lambda.body()));
}

#[test]
fn test_operands_before_try_move_to_temporaries() {
    let x = var("x");
    let body = Expr::add(x.to_expr(), guarded_div(x.to_expr(), 5)).unwrap();
    let lambda = Expr::lambda(None, vec![x], body).unwrap();

    let spilled = spill(&lambda).unwrap();
    assert_eq!(spilled.body().node_kind(), NodeKind::Block);
    assert_eq!(spilled.return_type(), &Type::Int);
    let ExprKind::Block { variables, exprs } = spilled.body().kind() else {
        unreachable!()
    };
    assert_eq!(variables.len(), 2);
    assert_eq!(exprs.len(), 3);
    assert_eq!(exprs[2].node_kind(), NodeKind::Binary);
}

#[test]
fn test_spilling_is_idempotent() {
    let x = var("x");
    let body = Expr::add(x.to_expr(), guarded_div(x.to_expr(), 5)).unwrap();
    let lambda = Expr::lambda(None, vec![x], body).unwrap();

    let once = spill(&lambda).unwrap();
    let twice = spill(&once).unwrap();
    assert!(Expr::ptr_eq(once.body(), twice.body()));
}

#[test]
fn test_side_effects_keep_their_order() {
    let log = var("log");
    // (log = log*10 + 1) + try { log = log*10 + 2 } ...
    let guarded = Expr::try_catch(
        append(&log, 2),
        vec![Expr::catch(Type::Class(ClassId::EXCEPTION), int(0)).unwrap()],
    )
    .unwrap();
    let sum = Expr::add(append(&log, 1), guarded).unwrap();

    let lambda = Expr::lambda(None, vec![], Expr::block_with(vec![log.clone()], vec![sum.clone()]).unwrap()).unwrap();
    assert_eq!(run(&lambda), Value::Int(1 + 12));

    let lambda = Expr::lambda(
        None,
        vec![],
        Expr::block_with(vec![log.clone()], vec![sum, log.to_expr()]).unwrap(),
    )
    .unwrap();
    assert_eq!(run(&lambda), Value::Int(12));
}

#[test]
fn test_only_operands_up_to_the_spill_are_moved() {
    let log = var("log");
    // The right-most operand runs after the try and stays in place.
    let args = vec![append(&log, 1), guarded_div(int(0), 2), append(&log, 3)];
    let array = Expr::new_array(Type::Int, args).unwrap();
    let sum = Expr::add(
        Expr::make_index(array.clone(), int(1)).unwrap(),
        Expr::make_index(array, int(2)).unwrap(),
    )
    .unwrap();
    let body = Expr::block_with(vec![log.clone()], vec![sum]).unwrap();
    let lambda = Expr::lambda(None, vec![], body).unwrap();

    // Each index expression rebuilds the array: the first yields 2, the
    // second sees log = 13 and appends 1 and 3 again.
    assert_eq!(run(&lambda), Value::Int(2 + 13_13));
}

#[test]
fn test_field_store_evaluates_receiver_first() {
    let class = ClassBuilder::new("SpillTarget")
        .field("value", Type::Int)
        .register()
        .unwrap();
    let target = Parameter::new(Type::Class(class), "target").unwrap();

    let store = Expr::assign(Expr::field(target.to_expr(), "value").unwrap(), guarded_div(int(0), 7)).unwrap();
    let body = Expr::block_with(
        vec![target.clone()],
        vec![
            assign(&target, Expr::new_object(class, vec![int(1)]).unwrap()),
            store,
            Expr::field(target.to_expr(), "value").unwrap(),
        ],
    )
    .unwrap();
    let lambda = Expr::lambda(None, vec![], body).unwrap();
    assert_eq!(run(&lambda), Value::Int(7));
}

#[test]
fn test_by_ref_argument_is_not_spilled() {
    let r = Parameter::by_ref(Type::Int, "r").unwrap();
    let k = var("k");
    let add_to = Expr::lambda(
        Some("add_to"),
        vec![r.clone(), k.clone()],
        assign(&r, Expr::add(r.to_expr(), k.to_expr()).unwrap()),
    )
    .unwrap();

    let v = var("v");
    let call = Expr::invoke(add_to.into_expr(), vec![v.to_expr(), guarded_div(int(1), 0)]).unwrap();
    let body = Expr::block_with(vec![v.clone()], vec![assign(&v, int(3)), call, v.to_expr()]).unwrap();
    let lambda = Expr::lambda(None, vec![], body).unwrap();
    assert_eq!(run(&lambda), Value::Int(13));
}

#[test]
fn test_nested_lambda_bodies_are_spilled() {
    let x = var("x");
    let inner = Expr::lambda(None, vec![], Expr::add(x.to_expr(), guarded_div(int(0), 4)).unwrap()).unwrap();
    let outer = Expr::lambda(
        None,
        vec![x.clone()],
        Expr::invoke(inner.into_expr(), vec![]).unwrap(),
    )
    .unwrap();

    let f = compile(&outer, &CompileOptions::default()).unwrap();
    assert_eq!(f.invoke(&[Value::Int(1)]).unwrap(), Value::Int(5));
}
