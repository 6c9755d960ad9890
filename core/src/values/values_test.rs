use pretty_assertions::assert_eq;

use super::*;
use crate::types::exception;

#[test]
fn test_primitives_compare_by_value() {
    assert_eq!(Value::Int(3), Value::from(3));
    assert_eq!(Value::str("a"), Value::from("a"));
    assert_ne!(Value::Int(1), Value::Float(1.0));
    assert_ne!(Value::Null, Value::Void);
}

#[test]
fn test_references_compare_by_identity() {
    let a = Value::Array(ArrayData::new(Type::Int, vec![Value::Int(1)]));
    let b = Value::Array(ArrayData::new(Type::Int, vec![Value::Int(1)]));
    assert_eq!(a, a.clone());
    assert_ne!(a, b);

    let cell = StrongBox::new(Value::Int(1));
    assert_eq!(Value::Box(cell.clone()), Value::Box(cell.clone()));
    assert_ne!(Value::Box(cell), Value::Box(StrongBox::new(Value::Int(1))));
}

#[test]
fn test_identical_compares_float_bits() {
    let nan = Value::Float(f64::NAN);
    assert_ne!(nan, nan.clone());
    assert!(nan.identical(&nan.clone()));
    assert!(!Value::Float(0.0).identical(&Value::Float(-0.0)));
}

#[test]
fn test_runtime_types() {
    assert_eq!(Value::Int(1).runtime_type(), Type::Int);
    assert_eq!(Value::Type(Type::Str).runtime_type(), Type::TypeRef);
    assert_eq!(
        Value::Array(ArrayData::new(Type::Str, vec![])).runtime_type(),
        Type::array(Type::Str)
    );
    // A box reports the type of what it holds.
    assert_eq!(Value::Box(StrongBox::new(Value::Bool(true))).runtime_type(), Type::Bool);
}

#[test]
fn test_defaults() {
    assert_eq!(Value::default_for(&Type::Int), Value::Int(0));
    assert_eq!(Value::default_for(&Type::Bool), Value::Bool(false));
    assert_eq!(Value::default_for(&Type::Void), Value::Void);
    assert_eq!(Value::default_for(&Type::Str), Value::Null);
    assert_eq!(Value::default_for(&Type::Class(ClassId::EXCEPTION)), Value::Null);
}

#[test]
fn test_keys_cover_hashable_values() {
    assert_eq!(Value::Int(4).key(), Some(ValueKey::Int(4)));
    assert_eq!(Value::str("k").key(), Value::str("k").key());
    assert_ne!(Value::Float(0.0).key(), Value::Float(-0.0).key());
    assert_eq!(Value::Array(ArrayData::new(Type::Int, vec![])).key(), None);
}

#[test]
fn test_instances_and_exceptions() {
    let error = exception(ClassId::DIVIDE_BY_ZERO, "division by zero");
    assert_eq!(error.exception_message().as_deref(), Some("division by zero"));
    assert_eq!(error.to_string(), "DivideByZeroException: division by zero");

    let instance = error.as_object().unwrap();
    assert_eq!(instance.class(), ClassId::DIVIDE_BY_ZERO);
    instance.set(0, Value::str("changed"));
    assert_eq!(instance.get(0), Value::str("changed"));

    assert_eq!(Value::Int(1).exception_message(), None);
}

#[test]
fn test_display() {
    assert_eq!(Value::Float(2.0).to_string(), "2.0");
    assert_eq!(Value::Float(2.5).to_string(), "2.5");
    let array = Value::Array(ArrayData::new(Type::Str, vec![Value::str("a"), Value::Null]));
    assert_eq!(array.to_string(), "[\"a\", null]");
    assert_eq!(Value::Box(StrongBox::new(Value::Int(7))).to_string(), "7");
}
