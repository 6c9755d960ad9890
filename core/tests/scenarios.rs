//! End-to-end scenarios through the public API: build trees with the
//! factories, compile them, and drive call sites directly.

use std::sync::Arc;

use dynex_core::compare::compare;
use dynex_core::expr::BinaryOp;
use dynex_core::types::exception;
use dynex_core::{
    CacheOptions, CallSite, ClassId, CompileOptions, DefaultBinder, Expr, LabelTarget, Parameter, Signature,
    SiteState, StrongBox, Type, Value, compile,
};
use pretty_assertions::assert_eq;

fn int(i: i64) -> Expr {
    Expr::constant(Value::Int(i))
}

fn text(s: &str) -> Expr {
    Expr::constant(Value::str(s))
}

#[test]
fn test_throw_is_caught_by_matching_handler() {
    let exception_type = Type::Class(ClassId::EXCEPTION);
    let body = Expr::try_catch(
        Expr::throw_as(Expr::constant(exception(ClassId::EXCEPTION, "E")), Type::Str).unwrap(),
        vec![Expr::catch(exception_type, text("caught")).unwrap()],
    )
    .unwrap();
    let lambda = Expr::lambda(None, vec![], body).unwrap();

    let f = compile(&lambda, &CompileOptions::default()).unwrap();
    assert_eq!(f.invoke(&[]).unwrap(), Value::str("caught"));
}

#[test]
fn test_return_value_is_captured_before_finally_runs() {
    let observer = Parameter::by_ref(Type::Int, "observer").unwrap();
    let x = Parameter::new(Type::Int, "x").unwrap();
    let ret = LabelTarget::new(Type::Int, Some("return"));

    let finally = Expr::block(vec![
        Expr::assign(x.to_expr(), int(2)).unwrap(),
        Expr::assign(observer.to_expr(), x.to_expr()).unwrap(),
    ])
    .unwrap();
    let body = Expr::block_with(
        vec![x.clone()],
        vec![
            Expr::assign(x.to_expr(), int(1)).unwrap(),
            Expr::try_finally(Expr::return_(&ret, Some(x.to_expr())).unwrap(), finally).unwrap(),
            Expr::label(&ret, Some(x.to_expr())).unwrap(),
        ],
    )
    .unwrap();
    let lambda = Expr::lambda(Some("scenario"), vec![observer], body).unwrap();
    let f = compile(&lambda, &CompileOptions::default()).unwrap();

    let cell = StrongBox::new(Value::Int(0));
    assert_eq!(f.invoke(&[Value::Box(cell.clone())]).unwrap(), Value::Int(1));
    assert_eq!(cell.get(), Value::Int(2));
}

#[test]
fn test_switch_selects_case_or_default() {
    let value = Parameter::new(Type::Int, "value").unwrap();
    let cases = vec![
        Expr::switch_case(text("a"), vec![Value::Int(1)]),
        Expr::switch_case(text("b"), vec![Value::Int(2)]),
        Expr::switch_case(text("c"), vec![Value::Int(3)]),
    ];
    let body = Expr::switch(value.to_expr(), Some(text("z")), cases).unwrap();
    let lambda = Expr::lambda(None, vec![value], body).unwrap();
    let f = compile(&lambda, &CompileOptions::default()).unwrap();

    assert_eq!(f.invoke(&[Value::Int(3)]).unwrap(), Value::str("c"));
    assert_eq!(f.invoke(&[Value::Int(99)]).unwrap(), Value::str("z"));
}

#[test]
fn test_call_site_adds_rule_per_shape() {
    let site = CallSite::new(
        Arc::new(DefaultBinder::binary(BinaryOp::Add)),
        Signature::new([Type::Object, Type::Object], Type::Object),
        CacheOptions::default(),
        None,
    );

    assert_eq!(site.invoke(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
    assert_eq!(site.invoke(&[Value::Int(3), Value::Int(4)]).unwrap(), Value::Int(7));
    assert_eq!(site.rule_count(), 1);
    assert_eq!(site.state(), SiteState::Monomorphic);

    assert_eq!(
        site.invoke(&[Value::Float(1.5), Value::Float(2.5)]).unwrap(),
        Value::Float(4.0)
    );
    assert_eq!(site.rule_count(), 2);
    assert_eq!(site.state(), SiteState::Polymorphic);
    assert_eq!(site.invoke(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
    assert_eq!(site.stats().binds, 2);
}

#[test]
fn test_comparer_reports_differing_constant() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    let left = Expr::add(int(5), x.to_expr()).unwrap();
    let right = Expr::add(int(7), x.to_expr()).unwrap();

    let comparison = compare(&left, &right);
    assert!(comparison.is_compatible());
    let differing: Vec<Value> = comparison
        .differing_constants()
        .filter_map(|constant| constant.as_constant().cloned())
        .collect();
    assert_eq!(differing, vec![Value::Int(5)]);

    let same = compare(&left, &left);
    assert!(same.is_compatible());
    assert_eq!(same.differing_constants().count(), 0);
}

#[test]
fn test_comparer_names_first_mismatch() {
    let left = Expr::add(int(1), int(2)).unwrap();
    let right = Expr::multiply(int(1), int(2)).unwrap();
    let comparison = compare(&left, &right);
    assert!(!comparison.is_compatible());
    assert_eq!(comparison.mismatch.map(|m| m.index), Some(0));
}
