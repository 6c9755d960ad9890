//! Tests for tree construction and validation.

use pretty_assertions::assert_eq;

use super::*;
use crate::types::{Access, ClassBuilder, ClassId, Type, builtin_method};
use crate::values::Value;

fn int(i: i64) -> Expr {
    Expr::constant(Value::Int(i))
}

fn text(s: &str) -> Expr {
    Expr::constant(Value::str(s))
}

#[test]
fn test_constant_types() {
    assert_eq!(int(5).ty(), &Type::Int);
    assert_eq!(text("a").ty(), &Type::Str);
    assert_eq!(Expr::constant(Value::Null).ty(), &Type::Null);
    assert_eq!(Expr::type_token(Type::Int).ty(), &Type::TypeRef);

    let typed_null = Expr::constant_typed(Value::Null, Type::Str).unwrap();
    assert_eq!(typed_null.ty(), &Type::Str);
    assert!(Expr::constant_typed(Value::Int(1), Type::Str).is_err());
}

#[test]
fn test_binary_type_checking() {
    let sum = Expr::add(int(1), int(2)).unwrap();
    assert_eq!(sum.ty(), &Type::Int);
    assert_eq!(sum.node_kind(), NodeKind::Binary);

    let err = Expr::add(int(1), Expr::constant(Value::Float(2.0))).unwrap_err();
    assert!(matches!(err, ExprError::UndefinedBinary { op: BinaryOp::Add, .. }));

    let cmp = Expr::less_than(text("a"), text("b")).unwrap();
    assert_eq!(cmp.ty(), &Type::Bool);

    assert!(Expr::make_binary(BinaryOp::AndAlso, int(1), int(2)).is_err());
    assert!(Expr::equal(Expr::constant(Value::Null), text("x")).is_ok());
}

#[test]
fn test_void_operand_rejected() {
    let err = Expr::add(Expr::empty(), int(1)).unwrap_err();
    assert_eq!(err, ExprError::VoidOperand("left operand"));
}

#[test]
fn test_assign_requires_writable_target() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    assert!(Expr::assign(x.to_expr(), int(1)).is_ok());
    assert!(matches!(
        Expr::assign(int(1), int(2)),
        Err(ExprError::NotWritable(_))
    ));
    assert!(matches!(
        Expr::assign(x.to_expr(), text("s")),
        Err(ExprError::TypeMismatch { .. })
    ));
}

#[test]
fn test_field_access_flags() {
    let class = ClassBuilder::new("AccessProbe")
        .field_with_access("ro", Type::Int, Access::ReadOnly)
        .field_with_access("wo", Type::Int, Access::WriteOnly)
        .register()
        .unwrap();
    let obj = Parameter::new(Type::Class(class), "obj").unwrap();

    let ro = Expr::field(obj.to_expr(), "ro").unwrap();
    assert!(matches!(Expr::assign(ro.clone(), int(1)), Err(ExprError::NotWritable(_))));
    assert!(Expr::add(ro, int(1)).is_ok());

    let wo = Expr::field(obj.to_expr(), "wo").unwrap();
    assert!(Expr::assign(wo.clone(), int(1)).is_ok());
    assert!(matches!(Expr::add(wo, int(1)), Err(ExprError::NotReadable(_))));

    assert!(matches!(
        Expr::field(obj.to_expr(), "missing"),
        Err(ExprError::MemberNotFound { .. })
    ));
}

#[test]
fn test_call_arity_and_types() {
    let concat = builtin_method("str.concat").unwrap();
    let call = Expr::call_static(&concat, vec![text("a"), text("b")]).unwrap();
    assert_eq!(call.ty(), &Type::Str);

    assert_eq!(
        Expr::call_static(&concat, vec![text("a")]).unwrap_err(),
        ExprError::ArgumentCount {
            context: "call",
            expected: 2,
            found: 1
        }
    );
    assert!(Expr::call(Some(text("a")), &concat, vec![text("a"), text("b")]).is_err());
}

#[test]
fn test_invoke_by_ref_requires_variable() {
    let r = Parameter::by_ref(Type::Int, "r").unwrap();
    let f = Expr::lambda(None, vec![r.clone()], r.to_expr()).unwrap();
    let x = Parameter::new(Type::Int, "x").unwrap();

    assert!(Expr::invoke(f.as_expr().clone(), vec![x.to_expr()]).is_ok());
    assert!(matches!(
        Expr::invoke(f.as_expr().clone(), vec![int(1)]),
        Err(ExprError::ByRefMisuse(_))
    ));
    assert!(matches!(
        Expr::invoke(int(1), vec![]),
        Err(ExprError::NotInvocable(Type::Int))
    ));
}

#[test]
fn test_block_rejects_by_ref_and_duplicates() {
    let r = Parameter::by_ref(Type::Int, "r").unwrap();
    assert!(matches!(
        Expr::block_with(vec![r], vec![int(1)]),
        Err(ExprError::ByRefMisuse(_))
    ));

    let x = Parameter::new(Type::Int, "x").unwrap();
    assert!(matches!(
        Expr::block_with(vec![x.clone(), x], vec![int(1)]),
        Err(ExprError::DuplicateVariable(_))
    ));
    assert_eq!(Expr::block(vec![]).unwrap_err(), ExprError::EmptyBlock);
}

#[test]
fn test_switch_validation() {
    let cases = || {
        vec![
            Expr::switch_case(text("a"), vec![Value::Int(1)]),
            Expr::switch_case(text("b"), vec![Value::Int(2)]),
        ]
    };
    let switch = Expr::switch(int(1), Some(text("z")), cases()).unwrap();
    assert_eq!(switch.ty(), &Type::Str);

    assert_eq!(
        Expr::switch(int(1), None, cases()).unwrap_err(),
        ExprError::MissingSwitchDefault(Type::Str)
    );

    let duplicate = vec![
        Expr::switch_case(text("a"), vec![Value::Int(1)]),
        Expr::switch_case(text("b"), vec![Value::Int(3), Value::Int(1)]),
    ];
    assert!(matches!(
        Expr::switch(int(1), Some(text("z")), duplicate),
        Err(ExprError::DuplicateCaseValue(_))
    ));

    let wrong_type = vec![Expr::switch_case(text("a"), vec![Value::str("1")])];
    assert!(matches!(
        Expr::switch(int(1), Some(text("z")), wrong_type),
        Err(ExprError::TypeMismatch { .. })
    ));

    let float_switch = vec![Expr::switch_case(text("a"), vec![Value::Float(1.0)])];
    assert!(matches!(
        Expr::switch(Expr::constant(Value::Float(1.0)), Some(text("z")), float_switch),
        Err(ExprError::UnsupportedSwitchType(Type::Float))
    ));
}

#[test]
fn test_try_shapes() {
    let catch = Expr::catch(Type::Class(ClassId::EXCEPTION), int(0)).unwrap();

    assert_eq!(
        Expr::make_try(None, int(1), None, None, vec![]).unwrap_err(),
        ExprError::TryWithoutHandler
    );
    assert_eq!(
        Expr::make_try(None, int(1), None, Some(Expr::empty()), vec![catch.clone()]).unwrap_err(),
        ExprError::FaultWithOtherHandlers
    );
    assert_eq!(
        Expr::make_try(None, int(1), Some(Expr::empty()), Some(Expr::empty()), vec![]).unwrap_err(),
        ExprError::FaultWithOtherHandlers
    );

    let ok = Expr::try_catch_finally(int(1), Expr::empty(), vec![catch]).unwrap();
    assert_eq!(ok.ty(), &Type::Int);

    assert!(matches!(
        Expr::catch(Type::Int, int(0)),
        Err(ExprError::NotAnExceptionType(Type::Int))
    ));
    assert!(matches!(
        Expr::try_catch(int(1), vec![Expr::catch(Type::Object, text("x")).unwrap()]),
        Err(ExprError::TypeMismatch { .. })
    ));
}

#[test]
fn test_labels_and_gotos() {
    let void_label = LabelTarget::void("done");
    assert!(Expr::goto(&void_label).is_ok());
    assert!(matches!(
        Expr::return_(&void_label, Some(int(1))),
        Err(ExprError::LabelValue { .. })
    ));

    let int_label = LabelTarget::new(Type::Int, Some("result"));
    assert!(matches!(
        Expr::return_(&int_label, None),
        Err(ExprError::LabelValue { .. })
    ));
    assert!(matches!(
        Expr::label(&int_label, None),
        Err(ExprError::LabelValue { .. })
    ));
    let label = Expr::label(&int_label, Some(int(0))).unwrap();
    assert_eq!(label.ty(), &Type::Int);

    assert!(matches!(
        Expr::make_loop(Expr::empty(), None, Some(int_label)),
        Err(ExprError::ContinueLabelType(Type::Int))
    ));
}

#[test]
fn test_lambda_signature() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    let r = Parameter::by_ref(Type::Str, "r").unwrap();
    let lambda = Expr::lambda(Some("f"), vec![x.clone(), r], x.to_expr()).unwrap();

    assert_eq!(lambda.name(), Some("f"));
    assert_eq!(lambda.return_type(), &Type::Int);
    assert_eq!(lambda.signature().params.len(), 2);
    assert!(lambda.signature().params[1].by_ref);
    assert_eq!(lambda.ty(), &Type::Function(lambda.signature().clone()));

    assert!(matches!(
        Expr::lambda(None, vec![x.clone(), x], int(1)),
        Err(ExprError::DuplicateVariable(_))
    ));
    assert!(Parameter::new(Type::Void, "v").is_err());
}

#[test]
fn test_children_follow_evaluation_order() {
    let a = Parameter::new(Type::Int, "a").unwrap();
    let call = Expr::call_static(
        &builtin_method("str.concat").unwrap(),
        vec![text("l"), text("r")],
    )
    .unwrap();
    let cond = Expr::condition(
        Expr::less_than(a.to_expr(), int(3)).unwrap(),
        call.clone(),
        text("e"),
    )
    .unwrap();

    let kinds: Vec<NodeKind> = cond.children().iter().map(|c| c.node_kind()).collect();
    assert_eq!(kinds, vec![NodeKind::Binary, NodeKind::Call, NodeKind::Constant]);

    let args: Vec<String> = call.children().iter().map(|c| c.to_string()).collect();
    assert_eq!(args, vec!["\"l\"", "\"r\""]);
}

#[test]
fn test_with_children_preserves_node() {
    let sum = Expr::add(int(1), int(2)).unwrap();
    let rebuilt = sum.with_children(vec![int(3), int(4)]);
    assert_eq!(rebuilt.ty(), &Type::Int);
    assert_eq!(rebuilt.to_string(), "(3 + 4)");
}

#[test]
fn test_display_renders_block() {
    let x = Parameter::new(Type::Int, "x").unwrap();
    let block = Expr::block_with(
        vec![x.clone()],
        vec![Expr::assign(x.to_expr(), int(1)).unwrap(), x.to_expr()],
    )
    .unwrap();
    let text = block.to_string();
    assert!(text.starts_with(".Block(int $x) {"), "{text}");
    assert!(text.contains("$x = 1;"), "{text}");
}

#[test]
fn test_visitor_counts_nodes() {
    struct Counter(usize);
    impl Visitor for Counter {
        fn visit(&mut self, expr: &Expr) {
            self.0 += 1;
            self.walk(expr);
        }
    }

    let tree = Expr::add(int(1), Expr::multiply(int(2), int(3)).unwrap()).unwrap();
    let mut counter = Counter(0);
    counter.visit(&tree);
    assert_eq!(counter.0, 5);
}
