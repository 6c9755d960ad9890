//! Tests for the tree comparer.

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use pretty_assertions::assert_eq;

use super::*;

use crate::binder::{DefaultBinder, Operation};
use crate::expr::{BinaryOp, Expr, GotoKind, IncrementKind, LabelTarget, NodeKind, Parameter};
use crate::types::{ClassBuilder, ClassId, Type, builtin_method, exception, registry};
use crate::values::Value;

fn int(i: i64) -> Expr {
    Expr::constant(Value::Int(i))
}

fn add_tree(x: &Parameter, constant: i64) -> Expr {
    Expr::add(x.to_expr(), int(constant)).unwrap()
}

#[test]
fn test_identical_trees_are_compatible() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    let tree = Expr::multiply(add_tree(&x, 1), int(3)).unwrap();

    let result = compare(&tree, &tree);
    assert_eq!(result.outcome, Compatibility::Compatible);
    assert!(result.replacements.is_empty());
    assert_eq!(result.mismatch, None);
}

#[test]
fn test_differing_constant_is_reported() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    let five = add_tree(&x, 5);
    let seven = add_tree(&x, 7);

    let result = compare(&five, &seven);
    assert!(result.is_compatible());
    assert!(result.is_too_specific());
    let constants: Vec<String> = result.differing_constants().map(|c| c.to_string()).collect();
    assert_eq!(constants, vec!["5"]);
    assert_eq!(result.positions(), BTreeSet::from([0]));
}

#[test]
fn test_templated_position_is_always_replaced() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    let tree = Expr::add(add_tree(&x, 5), int(9)).unwrap();
    let representative = Expr::add(add_tree(&x, 5), int(9)).unwrap();

    let result = compare_templated(&tree, &representative, &BTreeSet::from([0]));
    assert_eq!(result.outcome, Compatibility::Compatible);
    assert_eq!(result.replacements.len(), 1);
    assert_eq!(result.replacements[0].position, 0);

    let other = Expr::add(add_tree(&x, 6), int(10)).unwrap();
    let result = compare_templated(&other, &representative, &BTreeSet::from([0]));
    assert_eq!(result.outcome, Compatibility::TooSpecific);
    assert_eq!(result.positions(), BTreeSet::from([0, 1]));
}

#[test]
fn test_type_difference_reports_mismatch_index() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    let y = Parameter::new(Type::Float, "y").unwrap();
    let ints = add_tree(&x, 1);
    let floats = Expr::add(y.to_expr(), Expr::constant(Value::Float(1.0))).unwrap();

    let result = compare(&ints, &floats);
    assert!(!result.is_compatible());
    assert_eq!(
        result.mismatch,
        Some(Mismatch {
            index: 0,
            reason: MismatchReason::Type
        })
    );

    let left = flatten(&ints);
    let right = flatten(&floats);
    let index = result.mismatch.unwrap().index;
    assert_ne!(left[index].ty(), right[index].ty());
}

#[test]
fn test_operator_difference_is_incompatible() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    let sum = add_tree(&x, 1);
    let product = Expr::multiply(x.to_expr(), int(1)).unwrap();

    let result = compare(&sum, &product);
    assert_eq!(
        result.mismatch,
        Some(Mismatch {
            index: 0,
            reason: MismatchReason::Node
        })
    );
}

#[test]
fn test_length_difference() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    let result = compare(&x.to_expr(), &add_tree(&x, 1));
    assert_eq!(result.mismatch.map(|m| m.reason), Some(MismatchReason::Length));
}

#[test]
fn test_block_variables_compare_by_numbering() {
    let block = |name: &str| {
        let v = Parameter::new(Type::Int, name).unwrap();
        Expr::block_with(
            vec![v.clone()],
            vec![Expr::assign(v.to_expr(), int(1)).unwrap(), v.to_expr()],
        )
        .unwrap()
    };
    assert_eq!(compare(&block("a"), &block("b")).outcome, Compatibility::Compatible);

    let free_a = Parameter::new(Type::Int, "a").unwrap();
    let free_b = Parameter::new(Type::Int, "b").unwrap();
    assert!(!compare(&free_a.to_expr(), &free_b.to_expr()).is_compatible());
}

#[test]
fn test_lambda_parameters_are_alpha_equivalent() {
    let lambda = |swap: bool| {
        let a = Parameter::new(Type::Int, "a").unwrap();
        let b = Parameter::new(Type::Int, "b").unwrap();
        let (l, r) = if swap { (b.clone(), a.clone()) } else { (a.clone(), b.clone()) };
        Expr::lambda(None, vec![a, b], Expr::subtract(l.to_expr(), r.to_expr()).unwrap())
            .unwrap()
            .into_expr()
    };
    assert!(compare(&lambda(false), &lambda(false)).is_compatible());
    assert!(!compare(&lambda(false), &lambda(true)).is_compatible());
}

#[test]
fn test_dynamic_nodes_compare_binder_identity() {
    let x = Parameter::new(Type::Object, "x").unwrap();
    let dynamic = |op: BinaryOp| {
        Expr::make_dynamic(
            Arc::new(DefaultBinder::new(Operation::Binary(op))),
            Type::Object,
            vec![x.to_expr(), x.to_expr()],
        )
        .unwrap()
    };
    assert!(compare(&dynamic(BinaryOp::Add), &dynamic(BinaryOp::Add)).is_compatible());
    assert!(!compare(&dynamic(BinaryOp::Add), &dynamic(BinaryOp::Subtract)).is_compatible());
}

static POINT: Lazy<ClassId> = Lazy::new(|| {
    ClassBuilder::new("CompareTestPoint")
        .field("x", Type::Int)
        .register()
        .unwrap()
});

/// Object constants compare by identity, so every tree throws this one.
static THROWN: Lazy<Value> = Lazy::new(|| exception(ClassId::EXCEPTION, "E"));

fn text(s: &str) -> Expr {
    Expr::constant(Value::str(s))
}

/// One tree rooted at each node kind, reading the free variable `x`.
/// Labels and inner variables are fresh on every call.
fn one_of_each_kind(x: &Parameter) -> Vec<(NodeKind, Expr)> {
    let point = *POINT;
    let field_x = registry().find_field(point, "x").unwrap();
    let concat = builtin_method("str.concat").unwrap();
    let y = Parameter::new(Type::Int, "y").unwrap();
    let v = Parameter::new(Type::Int, "v").unwrap();
    let e = Parameter::new(Type::Class(ClassId::EXCEPTION), "e").unwrap();
    let inner = Expr::lambda(None, vec![y.clone()], Expr::add(y.to_expr(), int(1)).unwrap())
        .unwrap()
        .into_expr();
    let done = LabelTarget::new(Type::Int, Some("done"));
    let jump = LabelTarget::void("jump");
    let brk = LabelTarget::new(Type::Int, Some("brk"));
    let cont = LabelTarget::void("cont");
    let new_point = || Expr::new_object(point, vec![int(0)]).unwrap();
    let array = || Expr::new_array(Type::Int, vec![x.to_expr(), int(1)]).unwrap();
    let thrown = Expr::constant(THROWN.clone());

    vec![
        (NodeKind::Constant, int(3)),
        (NodeKind::Parameter, x.to_expr()),
        (NodeKind::Default, Expr::default(Type::Int)),
        (NodeKind::Unary, Expr::negate(x.to_expr()).unwrap()),
        (NodeKind::Binary, add_tree(x, 1)),
        (NodeKind::TypeBinary, Expr::type_is(x.to_expr(), Type::Int).unwrap()),
        (NodeKind::MemberAccess, Expr::field(new_point(), "x").unwrap()),
        (NodeKind::Index, Expr::make_index(array(), int(0)).unwrap()),
        (
            NodeKind::Call,
            Expr::call_static(&concat, vec![text("a"), text("b")]).unwrap(),
        ),
        (NodeKind::Invoke, Expr::invoke(inner.clone(), vec![x.to_expr()]).unwrap()),
        (NodeKind::New, new_point()),
        (NodeKind::NewArray, array()),
        (
            NodeKind::Conditional,
            Expr::condition(Expr::less_than(x.to_expr(), int(0)).unwrap(), int(1), int(2)).unwrap(),
        ),
        (
            NodeKind::Loop,
            Expr::make_loop(
                Expr::block(vec![
                    Expr::if_then(Expr::less_than(x.to_expr(), int(10)).unwrap(), Expr::continue_(&cont).unwrap())
                        .unwrap(),
                    Expr::break_(&brk, Some(x.to_expr())).unwrap(),
                ])
                .unwrap(),
                Some(brk.clone()),
                Some(cont.clone()),
            )
            .unwrap(),
        ),
        (
            NodeKind::Block,
            Expr::block_with(
                vec![v.clone()],
                vec![Expr::assign(v.to_expr(), x.to_expr()).unwrap(), v.to_expr()],
            )
            .unwrap(),
        ),
        (NodeKind::Goto, Expr::goto(&jump).unwrap()),
        (NodeKind::Label, Expr::label(&done, Some(int(2))).unwrap()),
        (
            NodeKind::Switch,
            Expr::switch(
                x.to_expr(),
                Some(text("z")),
                vec![
                    Expr::switch_case(text("a"), vec![Value::Int(1), Value::Int(2)]),
                    Expr::switch_case(text("b"), vec![Value::Int(3)]),
                ],
            )
            .unwrap(),
        ),
        (
            NodeKind::Try,
            Expr::try_catch(
                Expr::throw(thrown.clone()).unwrap(),
                vec![Expr::catch_var(&e, Expr::rethrow()).unwrap()],
            )
            .unwrap(),
        ),
        (NodeKind::Throw, Expr::throw(thrown).unwrap()),
        (NodeKind::Lambda, inner),
        (
            NodeKind::Dynamic,
            Expr::make_dynamic(
                Arc::new(DefaultBinder::binary(BinaryOp::Add)),
                Type::Object,
                vec![x.to_expr(), int(1)],
            )
            .unwrap(),
        ),
        (
            NodeKind::MemberInit,
            Expr::member_init(new_point(), vec![(field_x, x.to_expr())]).unwrap(),
        ),
        (
            NodeKind::ListInit,
            Expr::list_init(Expr::new_array(Type::Int, vec![]).unwrap(), vec![x.to_expr()]).unwrap(),
        ),
        (
            NodeKind::Increment,
            Expr::increment(IncrementKind::PreIncrement, x.to_expr()).unwrap(),
        ),
        (
            NodeKind::CompoundAssign,
            Expr::compound_assign(BinaryOp::Add, x.to_expr(), int(2)).unwrap(),
        ),
        (
            NodeKind::Block,
            Expr::block(vec![
                Expr::make_goto(GotoKind::Goto, done.clone(), Some(x.to_expr())).unwrap(),
                Expr::label(&done, Some(int(0))).unwrap(),
            ])
            .unwrap(),
        ),
    ]
}

fn wrap(x: Parameter, tree: Expr) -> Expr {
    Expr::lambda(None, vec![x], tree).unwrap().into_expr()
}

#[test]
fn test_every_node_kind_compares_equal_to_itself() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    for (kind, tree) in one_of_each_kind(&x) {
        assert_eq!(tree.node_kind(), kind);
        let result = compare(&tree, &tree);
        assert_eq!(result.outcome, Compatibility::Compatible, "{kind:?}: {:?}", result.mismatch);
        assert_eq!(result.differing_constants().count(), 0, "{kind:?}");
    }
}

#[test]
fn test_separately_built_trees_are_alpha_equivalent() {
    let x1 = Parameter::new(Type::Int, "x").unwrap();
    let x2 = Parameter::new(Type::Int, "x").unwrap();
    let left = one_of_each_kind(&x1);
    let right = one_of_each_kind(&x2);
    for ((kind, l), (_, r)) in left.into_iter().zip(right) {
        let result = compare(&wrap(x1.clone(), l), &wrap(x2.clone(), r));
        assert_eq!(result.outcome, Compatibility::Compatible, "{kind:?}: {:?}", result.mismatch);
    }
}

#[test]
fn test_label_and_switch_shapes_must_match() {
    let void = LabelTarget::void("l");
    let valued = LabelTarget::new(Type::Int, Some("l"));
    let bare = Expr::label(&void, None).unwrap();
    assert!(compare(&bare, &bare).is_compatible());
    let result = compare(&bare, &Expr::label(&valued, Some(int(1))).unwrap());
    assert_eq!(result.mismatch.map(|m| m.reason), Some(MismatchReason::Length));

    let x = Parameter::new(Type::Int, "x").unwrap();
    let switch = |values: Vec<Value>, default: Option<Expr>| {
        Expr::switch(x.to_expr(), default, vec![Expr::switch_case(text("a"), values)]).unwrap()
    };
    let base = switch(vec![Value::Int(1)], Some(text("z")));
    assert!(compare(&base, &switch(vec![Value::Int(1)], Some(text("y")))).is_too_specific());

    let other_case = compare(&base, &switch(vec![Value::Int(2)], Some(text("z"))));
    assert_eq!(
        other_case.mismatch,
        Some(Mismatch {
            index: 0,
            reason: MismatchReason::Node
        })
    );
    assert!(!compare(&base, &switch(vec![Value::Int(1), Value::Int(2)], Some(text("z")))).is_compatible());
}

#[test]
fn test_reference_equality_constants_are_not_templated() {
    let o = Parameter::new(Type::Object, "o").unwrap();
    let test = |value: i64| {
        let constant = Expr::constant_typed(Value::Int(value), Type::Object).unwrap();
        Expr::equal(o.to_expr(), constant).unwrap()
    };
    assert!(!compare(&test(1), &test(2)).is_compatible());
    assert!(compare(&test(1), &test(1)).is_compatible());
}

#[test]
fn test_reducible_nodes_compare_by_reduction() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    let sugar = Expr::compound_assign(BinaryOp::Add, x.to_expr(), int(2)).unwrap();
    let plain = Expr::assign(x.to_expr(), add_tree(&x, 2)).unwrap();

    let result = compare(&sugar, &plain);
    assert_eq!(result.outcome, Compatibility::Compatible);
    assert_eq!(flatten(&sugar)[0].node_kind(), NodeKind::Binary);
    assert_eq!(constants(&sugar).len(), 1);
}
