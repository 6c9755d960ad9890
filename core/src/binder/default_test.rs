use pretty_assertions::assert_eq;

use super::*;
use crate::expr::{BinaryOp, ExprKind, NodeKind, UnaryOp};
use crate::types::{ClassBuilder, ClassId, Type};
use crate::values::{Instance, Value};

struct Fixture {
    shapes: Vec<ArgumentShape>,
    parameters: Vec<Parameter>,
    ret: Type,
}

impl Fixture {
    /// Object-typed site parameters observing `values`.
    fn new(values: &[Value]) -> Self {
        Self::typed(values, Type::Object)
    }

    fn typed(values: &[Value], ret: Type) -> Self {
        let parameters: Vec<Parameter> = (0..values.len())
            .map(|i| Parameter::new(Type::Object, &format!("arg{i}")).unwrap())
            .collect();
        let shapes = values
            .iter()
            .map(|v| ArgumentShape::of(v, &Type::Object, false))
            .collect();
        Self {
            shapes,
            parameters,
            ret,
        }
    }

    fn bind(&self, operation: Operation) -> Result<Rule, BindError> {
        let request = BindRequest {
            shapes: &self.shapes,
            parameters: &self.parameters,
            return_type: &self.ret,
        };
        let rule = DefaultBinder::new(operation).bind(&request)?;
        assert!(rule.restrictions.matches(&self.shapes), "rule must match its own shapes");
        Ok(rule)
    }
}

#[test]
fn test_int_addition() {
    let rule = Fixture::new(&[Value::Int(1), Value::Int(2)])
        .bind(Operation::Binary(BinaryOp::Add))
        .unwrap();
    assert_eq!(rule.body.ty(), &Type::Int);
    assert_eq!(
        rule.restrictions,
        Restrictions::new([Restriction::Type(Type::Int), Restriction::Type(Type::Int)])
    );
}

#[test]
fn test_mixed_numeric_promotes_to_float() {
    let rule = Fixture::new(&[Value::Int(1), Value::Float(2.5)])
        .bind(Operation::Binary(BinaryOp::Multiply))
        .unwrap();
    assert_eq!(rule.body.ty(), &Type::Float);
}

#[test]
fn test_string_addition_concatenates() {
    let rule = Fixture::new(&[Value::str("a"), Value::str("b")])
        .bind(Operation::Binary(BinaryOp::Add))
        .unwrap();
    assert_eq!(rule.body.node_kind(), NodeKind::Call);
    assert_eq!(rule.body.ty(), &Type::Str);
}

#[test]
fn test_equality_of_unrelated_types_is_constant() {
    let rule = Fixture::new(&[Value::Int(1), Value::str("1")])
        .bind(Operation::Binary(BinaryOp::Equal))
        .unwrap();
    assert_eq!(rule.body.as_constant(), Some(&Value::Bool(false)));

    let rule = Fixture::new(&[Value::Null, Value::Null])
        .bind(Operation::Binary(BinaryOp::NotEqual))
        .unwrap();
    assert_eq!(rule.body.as_constant(), Some(&Value::Bool(false)));
}

#[test]
fn test_undefined_binary_is_error() {
    let err = Fixture::new(&[Value::Bool(true), Value::Int(1)])
        .bind(Operation::Binary(BinaryOp::Subtract))
        .unwrap_err();
    assert!(matches!(err, BindError::NoApplicableOperation { .. }));
    assert!(err.to_string().contains("bool, int"), "{err}");
}

#[test]
fn test_type_of_applies_to_anything() {
    let rule = Fixture::new(&[Value::Int(1)])
        .bind(Operation::Unary(UnaryOp::TypeOf))
        .unwrap();
    assert_eq!(rule.restrictions, Restrictions::new([Restriction::Any]));
    assert_eq!(rule.body.ty(), &Type::TypeRef);
}

#[test]
fn test_conversions() {
    let fixture = Fixture::typed(&[Value::Int(3)], Type::Float);
    let rule = fixture
        .bind(Operation::Convert {
            to: Type::Float,
            explicit: false,
        })
        .unwrap();
    assert_eq!(rule.body.ty(), &Type::Float);

    let err = Fixture::new(&[Value::Float(3.5)])
        .bind(Operation::Convert {
            to: Type::Int,
            explicit: false,
        })
        .unwrap_err();
    assert!(matches!(err, BindError::NoApplicableOperation { .. }));

    let rule = Fixture::new(&[Value::Int(3)])
        .bind(Operation::Convert {
            to: Type::Str,
            explicit: true,
        })
        .unwrap();
    assert_eq!(rule.body.ty(), &Type::Str);
}

fn account_class() -> ClassId {
    ClassBuilder::new("BinderAccount")
        .field("balance", Type::Int)
        .field("owner", Type::Str)
        .method("deposit", vec![Type::Int], Type::Int, |args| {
            let Value::Object(this) = &args[0] else {
                unreachable!("receiver is an account");
            };
            let balance = this.get(0).as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0);
            this.set(0, Value::Int(balance));
            Ok(Value::Int(balance))
        })
        .register()
        .unwrap()
}

fn account(class: ClassId) -> Value {
    Value::Object(Instance::new(class, class.def().default_fields()))
}

#[test]
fn test_member_operations() {
    let class = account_class();
    let obj = account(class);

    let get = Fixture::new(&[obj.clone()])
        .bind(Operation::GetMember {
            name: "balance".into(),
        })
        .unwrap();
    assert_eq!(get.body.node_kind(), NodeKind::MemberAccess);
    assert_eq!(get.body.ty(), &Type::Int);

    let set = Fixture::new(&[obj.clone(), Value::Int(5)])
        .bind(Operation::SetMember {
            name: "balance".into(),
        })
        .unwrap();
    assert!(matches!(set.body.kind(), ExprKind::Binary { op: BinaryOp::Assign, .. }));

    let err = Fixture::new(&[obj.clone(), Value::str("x")])
        .bind(Operation::SetMember {
            name: "balance".into(),
        })
        .unwrap_err();
    assert!(matches!(err, BindError::NoApplicableOperation { .. }));

    let missing = Fixture::new(&[obj.clone()])
        .bind(Operation::GetMember {
            name: "missing".into(),
        })
        .unwrap_err();
    assert!(matches!(missing, BindError::MemberNotFound { .. }));

    let call = Fixture::new(&[obj, Value::Int(10)])
        .bind(Operation::InvokeMember {
            name: "deposit".into(),
        })
        .unwrap();
    assert_eq!(call.body.node_kind(), NodeKind::Call);
}

#[test]
fn test_null_receiver_throws() {
    let rule = Fixture::new(&[Value::Null])
        .bind(Operation::GetMember { name: "x".into() })
        .unwrap();
    assert_eq!(rule.body.node_kind(), NodeKind::Throw);
    assert_eq!(rule.body.ty(), &Type::Object);
    assert_eq!(
        rule.restrictions,
        Restrictions::new([Restriction::Type(Type::Null)])
    );
}

#[test]
fn test_indexing() {
    let array = Value::Array(crate::values::ArrayData::new(
        Type::Int,
        vec![Value::Int(1), Value::Int(2)],
    ));
    let rule = Fixture::new(&[array.clone(), Value::Int(0)])
        .bind(Operation::GetIndex)
        .unwrap();
    assert_eq!(rule.body.node_kind(), NodeKind::Index);

    let rule = Fixture::new(&[Value::str("abc"), Value::Int(0)])
        .bind(Operation::GetIndex)
        .unwrap();
    assert_eq!(rule.body.ty(), &Type::Str);

    assert!(Fixture::new(&[array, Value::Int(0), Value::str("x")])
        .bind(Operation::SetIndex)
        .is_err());
}

#[test]
fn test_create_instance_restricts_token() {
    let class = account_class();
    let token = Value::Type(Type::Class(class));
    let rule = Fixture::new(&[token, Value::Int(1), Value::str("ann")])
        .bind(Operation::CreateInstance)
        .unwrap();
    assert_eq!(rule.body.ty(), &Type::Class(class));
    assert_eq!(
        rule.restrictions.iter().next(),
        Some(&Restriction::Token(Type::Class(class)))
    );
}

#[test]
fn test_restrictions_to_test() {
    let x = Parameter::new(Type::Object, "x").unwrap();
    let y = Parameter::new(Type::Object, "y").unwrap();
    let params = [x, y];

    let test = Restrictions::new([Restriction::Type(Type::Int), Restriction::Any])
        .to_test(&params)
        .unwrap();
    assert_eq!(test.ty(), &Type::Bool);
    assert_eq!(test.node_kind(), NodeKind::Binary);

    let none = Restrictions::new([Restriction::Any, Restriction::Any])
        .to_test(&params)
        .unwrap();
    assert_eq!(none.as_constant(), Some(&Value::Bool(true)));
}

#[test]
fn test_cache_identity_distinguishes_operations() {
    let add = DefaultBinder::new(Operation::Binary(BinaryOp::Add));
    let sub = DefaultBinder::new(Operation::Binary(BinaryOp::Subtract));
    assert_eq!(add.cache_identity(), add.clone().cache_identity());
    assert_ne!(add.cache_identity(), sub.cache_identity());
    assert_eq!(add.operation().kind(), OperationKind::BinaryOp);
    assert_eq!(add.operation().to_string(), "binary '+'");
}
