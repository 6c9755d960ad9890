//! Validating constructors.
//!
//! Every node is built here. Each factory checks operand types, arity,
//! readability and writability before allocating, so no tree in an invalid
//! state can exist.

use std::sync::Arc;

use ecow::EcoString;
use hashbrown::HashSet;

use super::node::{
    Args, CatchBlock, ExprKind, ExtensionNode, GotoKind, IncrementKind, LambdaNode, MemberBinding,
    SwitchCase, TypeTestOp,
};
use super::{BinaryOp, Expr, ExprError, LabelTarget, Lambda, Parameter, UnaryOp};
use crate::binder::CallSiteBinder;
use crate::types::{ClassId, FieldRef, MethodInfo, ParamType, Signature, Type, registry};
use crate::values::Value;

type Result<T> = core::result::Result<T, ExprError>;

fn require_value(expr: &Expr, context: &'static str) -> Result<()> {
    if expr.ty().is_void() {
        return Err(ExprError::VoidOperand(context));
    }
    if let ExprKind::Member { field, .. } = expr.kind()
        && !field.access().can_read()
    {
        return Err(ExprError::NotReadable(format!("field '{}'", field.name())));
    }
    Ok(())
}

fn require_writable(expr: &Expr) -> Result<()> {
    match expr.kind() {
        ExprKind::Parameter(_) | ExprKind::Index { .. } => Ok(()),
        ExprKind::Member { field, .. } if field.access().can_write() => Ok(()),
        ExprKind::Member { field, .. } => {
            Err(ExprError::NotWritable(format!("read-only field '{}'", field.name())))
        }
        _ => Err(ExprError::NotWritable(format!("{:?} expression", expr.node_kind()))),
    }
}

fn require_assignable(expected: &Type, expr: &Expr, context: &'static str) -> Result<()> {
    require_value(expr, context)?;
    if expected.is_assignable_from(expr.ty()) {
        Ok(())
    } else {
        Err(ExprError::TypeMismatch {
            context,
            expected: expected.clone(),
            found: expr.ty().clone(),
        })
    }
}

fn require_exact(expected: &Type, found: &Type, context: &'static str) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(ExprError::TypeMismatch {
            context,
            expected: expected.clone(),
            found: found.clone(),
        })
    }
}

/// A branch of a node with result type `ty`. Void nodes discard values.
fn require_branch(ty: &Type, explicit: bool, branch: &Expr, context: &'static str) -> Result<()> {
    if ty.is_void() {
        Ok(())
    } else if explicit {
        require_assignable(ty, branch, context)
    } else {
        require_exact(ty, branch.ty(), context)
    }
}

fn require_arity(context: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(ExprError::ArgumentCount {
            context,
            expected,
            found,
        })
    }
}

fn check_unique<'a>(params: impl IntoIterator<Item = &'a Parameter>) -> Result<()> {
    let mut seen = HashSet::new();
    for param in params {
        if !seen.insert(param.id()) {
            return Err(ExprError::DuplicateVariable(param.display_name()));
        }
    }
    Ok(())
}

fn can_convert(from: &Type, to: &Type) -> bool {
    from == to
        || to.is_void()
        || (from.is_numeric() && to.is_numeric())
        || to.is_assignable_from(from)
        || (!from.is_void() && from.is_assignable_from(to))
}

impl Expr {
    // === Leaves ===

    /// A constant of the value's runtime type.
    pub fn constant(value: Value) -> Expr {
        Expr::new(value.runtime_type(), ExprKind::Constant(value))
    }

    /// A constant with an explicit static type, e.g. `null` typed as `str`.
    pub fn constant_typed(value: Value, ty: Type) -> Result<Expr> {
        let actual = value.runtime_type();
        if !ty.is_assignable_from(&actual) {
            return Err(ExprError::TypeMismatch {
                context: "constant",
                expected: ty,
                found: actual,
            });
        }
        Ok(Expr::new(ty, ExprKind::Constant(value)))
    }

    /// A type token constant.
    pub fn type_token(ty: Type) -> Expr {
        Expr::new(Type::TypeRef, ExprKind::Constant(Value::Type(ty)))
    }

    pub fn default(ty: Type) -> Expr {
        Expr::new(ty, ExprKind::Default)
    }

    /// A void no-op.
    pub fn empty() -> Expr {
        Expr::default(Type::Void)
    }

    // === Operators ===

    pub fn unary(op: UnaryOp, operand: Expr) -> Result<Expr> {
        require_value(&operand, "unary operand")?;
        let ty = match (op, operand.ty()) {
            (UnaryOp::Negate, Type::Int | Type::Float) => operand.ty().clone(),
            (UnaryOp::Not, Type::Bool | Type::Int) => operand.ty().clone(),
            (UnaryOp::OnesComplement, Type::Int) => Type::Int,
            (UnaryOp::TypeOf, _) => Type::TypeRef,
            _ => {
                return Err(ExprError::UndefinedUnary {
                    op,
                    operand: operand.ty().clone(),
                });
            }
        };
        Ok(Expr::new(ty, ExprKind::Unary { op, operand }))
    }

    pub fn negate(operand: Expr) -> Result<Expr> {
        Expr::unary(UnaryOp::Negate, operand)
    }

    pub fn not(operand: Expr) -> Result<Expr> {
        Expr::unary(UnaryOp::Not, operand)
    }

    pub fn type_of(operand: Expr) -> Result<Expr> {
        Expr::unary(UnaryOp::TypeOf, operand)
    }

    /// Converts `operand` to `ty`. Numeric conversions, up-casts and boxing
    /// always succeed; down-casts are checked at run time and raise
    /// `InvalidCastException`. Converting to `void` discards the value.
    pub fn convert(operand: Expr, ty: Type) -> Result<Expr> {
        require_value(&operand, "converted operand")?;
        if !can_convert(operand.ty(), &ty) {
            return Err(ExprError::NoConversion {
                from: operand.ty().clone(),
                to: ty,
            });
        }
        Ok(Expr::new(
            ty,
            ExprKind::Unary {
                op: UnaryOp::Convert,
                operand,
            },
        ))
    }

    pub fn make_binary(op: BinaryOp, left: Expr, right: Expr) -> Result<Expr> {
        if op == BinaryOp::Assign {
            return Expr::assign(left, right);
        }
        require_value(&left, "left operand")?;
        require_value(&right, "right operand")?;

        let undefined = || ExprError::UndefinedBinary {
            op,
            left: left.ty().clone(),
            right: right.ty().clone(),
        };
        let ty = match (left.ty(), right.ty()) {
            (Type::Int, Type::Int) if op.is_arithmetic() || op.is_bitwise() => Type::Int,
            (Type::Float, Type::Float) if op.is_arithmetic() => Type::Float,
            (Type::Bool, Type::Bool)
                if matches!(op, BinaryOp::And | BinaryOp::Or | BinaryOp::ExclusiveOr)
                    || op.is_short_circuit() =>
            {
                Type::Bool
            }
            (Type::Int, Type::Int) | (Type::Float, Type::Float) | (Type::Str, Type::Str)
                if op.is_ordering() =>
            {
                Type::Bool
            }
            (l, r)
                if op.is_equality() && (l.is_assignable_from(r) || r.is_assignable_from(l)) =>
            {
                Type::Bool
            }
            _ => return Err(undefined()),
        };
        Ok(Expr::new(ty, ExprKind::Binary { op, left, right }))
    }

    pub fn add(left: Expr, right: Expr) -> Result<Expr> {
        Expr::make_binary(BinaryOp::Add, left, right)
    }

    pub fn subtract(left: Expr, right: Expr) -> Result<Expr> {
        Expr::make_binary(BinaryOp::Subtract, left, right)
    }

    pub fn multiply(left: Expr, right: Expr) -> Result<Expr> {
        Expr::make_binary(BinaryOp::Multiply, left, right)
    }

    pub fn equal(left: Expr, right: Expr) -> Result<Expr> {
        Expr::make_binary(BinaryOp::Equal, left, right)
    }

    pub fn less_than(left: Expr, right: Expr) -> Result<Expr> {
        Expr::make_binary(BinaryOp::LessThan, left, right)
    }

    pub fn and_also(left: Expr, right: Expr) -> Result<Expr> {
        Expr::make_binary(BinaryOp::AndAlso, left, right)
    }

    /// `target = value`; evaluates to the assigned value.
    pub fn assign(target: Expr, value: Expr) -> Result<Expr> {
        require_writable(&target)?;
        require_assignable(target.ty(), &value, "assigned value")?;
        Ok(Expr::new(
            target.ty().clone(),
            ExprKind::Binary {
                op: BinaryOp::Assign,
                left: target,
                right: value,
            },
        ))
    }

    pub fn type_is(operand: Expr, test: Type) -> Result<Expr> {
        Expr::type_test(TypeTestOp::TypeIs, operand, test)
    }

    pub fn type_equal(operand: Expr, test: Type) -> Result<Expr> {
        Expr::type_test(TypeTestOp::TypeEqual, operand, test)
    }

    fn type_test(op: TypeTestOp, operand: Expr, test: Type) -> Result<Expr> {
        require_value(&operand, "type test operand")?;
        Ok(Expr::new(Type::Bool, ExprKind::TypeBinary { op, operand, test }))
    }

    // === Members, indexing, calls ===

    /// Instance field access by name.
    pub fn field(object: Expr, name: &str) -> Result<Expr> {
        let found = match object.ty() {
            Type::Class(class) => registry().find_field(*class, name),
            _ => None,
        };
        match found {
            Some(field) => Expr::member(object, field),
            None => Err(ExprError::MemberNotFound {
                class: object.ty().to_string(),
                member: name.into(),
            }),
        }
    }

    pub fn member(object: Expr, field: FieldRef) -> Result<Expr> {
        require_value(&object, "member receiver")?;
        let on_type = match object.ty() {
            Type::Class(class) => registry().derives_from(*class, field.declaring_class()),
            _ => false,
        };
        if !on_type {
            return Err(ExprError::FieldNotOnType {
                field: field.name().into(),
                ty: object.ty().clone(),
            });
        }
        Ok(Expr::new(field.ty().clone(), ExprKind::Member { object, field }))
    }

    pub fn make_index(object: Expr, index: Expr) -> Result<Expr> {
        require_value(&object, "indexed object")?;
        require_assignable(&Type::Int, &index, "array index")?;
        let elem = object.ty().element_type().cloned().ok_or_else(|| ExprError::TypeMismatch {
            context: "indexed object",
            expected: Type::array(Type::Object),
            found: object.ty().clone(),
        })?;
        Ok(Expr::new(elem, ExprKind::Index { object, index }))
    }

    pub fn call(object: Option<Expr>, method: &Arc<MethodInfo>, args: Vec<Expr>) -> Result<Expr> {
        match (method.declaring_class(), &object) {
            (None, Some(_)) => return Err(ExprError::UnexpectedInstance(method.name().into())),
            (Some(_), None) => return Err(ExprError::InstanceRequired(method.name().into())),
            (Some(class), Some(receiver)) => {
                require_assignable(&Type::Class(class), receiver, "method receiver")?
            }
            (None, None) => {}
        }
        require_arity("call", method.params().len(), args.len())?;
        for (param, arg) in method.params().iter().zip(&args) {
            require_assignable(param, arg, "call argument")?;
        }
        Ok(Expr::new(
            method.return_type().clone(),
            ExprKind::Call {
                object,
                method: method.clone(),
                args: args.into_iter().collect(),
            },
        ))
    }

    pub fn call_static(method: &Arc<MethodInfo>, args: Vec<Expr>) -> Result<Expr> {
        Expr::call(None, method, args)
    }

    /// Invokes a function value. Arguments for by-ref parameters must be
    /// variables of exactly the parameter type.
    pub fn invoke(target: Expr, args: Vec<Expr>) -> Result<Expr> {
        require_value(&target, "invoked expression")?;
        let Type::Function(signature) = target.ty() else {
            return Err(ExprError::NotInvocable(target.ty().clone()));
        };
        let signature = signature.clone();
        require_arity("invoke", signature.params.len(), args.len())?;
        for (param, arg) in signature.params.iter().zip(&args) {
            if !param.by_ref {
                require_assignable(&param.ty, arg, "invoke argument")?;
                continue;
            }
            match arg.as_parameter() {
                Some(var) if var.ty() == &param.ty => {}
                Some(var) => {
                    return Err(ExprError::ByRefMisuse(format!(
                        "variable '{}' of type '{}' passed for a by-ref '{}' parameter",
                        var.display_name(),
                        var.ty(),
                        param.ty
                    )));
                }
                None => {
                    return Err(ExprError::ByRefMisuse(
                        "by-ref arguments must be variables".into(),
                    ));
                }
            }
        }
        Ok(Expr::new(
            signature.ret.clone(),
            ExprKind::Invoke {
                target,
                args: args.into_iter().collect(),
            },
        ))
    }

    /// Creates an instance; one argument per field of the layout.
    pub fn new_object(class: ClassId, args: Vec<Expr>) -> Result<Expr> {
        let def = class.def();
        require_arity("new", def.fields.len(), args.len())?;
        for (field, arg) in def.fields.iter().zip(&args) {
            require_assignable(field.ty(), arg, "constructor argument")?;
        }
        Ok(Expr::new(
            Type::Class(class),
            ExprKind::New {
                class,
                args: args.into_iter().collect(),
            },
        ))
    }

    pub fn new_array(elem: Type, items: Vec<Expr>) -> Result<Expr> {
        for item in &items {
            require_assignable(&elem, item, "array item")?;
        }
        Ok(Expr::new(
            Type::array(elem),
            ExprKind::NewArray {
                items: items.into_iter().collect(),
            },
        ))
    }

    // === Control flow ===

    /// `test ? if_true : if_false`; both branches must have the same type.
    pub fn condition(test: Expr, if_true: Expr, if_false: Expr) -> Result<Expr> {
        let ty = if_true.ty().clone();
        Expr::make_condition(test, if_true, if_false, ty, false)
    }

    pub fn condition_typed(test: Expr, if_true: Expr, if_false: Expr, ty: Type) -> Result<Expr> {
        Expr::make_condition(test, if_true, if_false, ty, true)
    }

    pub fn if_then(test: Expr, if_true: Expr) -> Result<Expr> {
        Expr::make_condition(test, if_true, Expr::empty(), Type::Void, true)
    }

    pub fn if_then_else(test: Expr, if_true: Expr, if_false: Expr) -> Result<Expr> {
        Expr::make_condition(test, if_true, if_false, Type::Void, true)
    }

    fn make_condition(test: Expr, if_true: Expr, if_false: Expr, ty: Type, explicit: bool) -> Result<Expr> {
        require_assignable(&Type::Bool, &test, "condition test")?;
        require_branch(&ty, explicit, &if_true, "conditional branch")?;
        require_branch(&ty, explicit, &if_false, "conditional branch")?;
        Ok(Expr::new(
            ty,
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            },
        ))
    }

    /// An infinite loop, left by jumping to `break_label`. The loop's value
    /// is the value carried by that jump.
    pub fn make_loop(
        body: Expr,
        break_label: Option<LabelTarget>,
        continue_label: Option<LabelTarget>,
    ) -> Result<Expr> {
        if let Some(label) = &continue_label
            && !label.ty().is_void()
        {
            return Err(ExprError::ContinueLabelType(label.ty().clone()));
        }
        let ty = break_label.as_ref().map_or(Type::Void, |label| label.ty().clone());
        Ok(Expr::new(
            ty,
            ExprKind::Loop {
                body,
                break_label,
                continue_label,
            },
        ))
    }

    pub fn block(exprs: Vec<Expr>) -> Result<Expr> {
        Expr::block_with(Vec::new(), exprs)
    }

    /// A sequence with scoped variables. Variables start at their type's
    /// default each time the block is entered. The value is the last
    /// expression's value.
    pub fn block_with(variables: Vec<Parameter>, exprs: Vec<Expr>) -> Result<Expr> {
        let ty = exprs.last().ok_or(ExprError::EmptyBlock)?.ty().clone();
        Expr::make_block(ty, variables, exprs)
    }

    pub fn block_typed(ty: Type, variables: Vec<Parameter>, exprs: Vec<Expr>) -> Result<Expr> {
        let last = exprs.last().ok_or(ExprError::EmptyBlock)?;
        require_branch(&ty, true, last, "block result")?;
        Expr::make_block(ty, variables, exprs)
    }

    fn make_block(ty: Type, variables: Vec<Parameter>, exprs: Vec<Expr>) -> Result<Expr> {
        if let Some(var) = variables.iter().find(|var| var.is_by_ref()) {
            return Err(ExprError::ByRefMisuse(format!(
                "block variable '{}' cannot be by-ref",
                var.display_name()
            )));
        }
        check_unique(&variables)?;
        Ok(Expr::new(
            ty,
            ExprKind::Block {
                variables,
                exprs: exprs.into_iter().collect(),
            },
        ))
    }

    pub fn make_goto(kind: GotoKind, target: LabelTarget, value: Option<Expr>) -> Result<Expr> {
        let label_error = |reason| ExprError::LabelValue {
            label: target.display_name(),
            ty: target.ty().clone(),
            reason,
        };
        match (&value, target.ty().is_void()) {
            (Some(_), true) => return Err(label_error("a void label cannot receive a value")),
            (None, false) => return Err(label_error("jumps to this label must carry a value")),
            (Some(value), false) => require_assignable(target.ty(), value, "jump value")?,
            (None, true) => {}
        }
        Ok(Expr::new(
            Type::Void,
            ExprKind::Goto {
                kind,
                target,
                value,
            },
        ))
    }

    pub fn goto(target: &LabelTarget) -> Result<Expr> {
        Expr::make_goto(GotoKind::Goto, target.clone(), None)
    }

    pub fn return_(target: &LabelTarget, value: Option<Expr>) -> Result<Expr> {
        Expr::make_goto(GotoKind::Return, target.clone(), value)
    }

    pub fn break_(target: &LabelTarget, value: Option<Expr>) -> Result<Expr> {
        Expr::make_goto(GotoKind::Break, target.clone(), value)
    }

    pub fn continue_(target: &LabelTarget) -> Result<Expr> {
        Expr::make_goto(GotoKind::Continue, target.clone(), None)
    }

    /// Defines `target` at this point. Falling through yields `default`;
    /// a jump yields the jump's value.
    pub fn label(target: &LabelTarget, default: Option<Expr>) -> Result<Expr> {
        match (&default, target.ty().is_void()) {
            (None, false) => {
                return Err(ExprError::LabelValue {
                    label: target.display_name(),
                    ty: target.ty().clone(),
                    reason: "a non-void label needs a default value",
                });
            }
            (Some(default), false) => require_assignable(target.ty(), default, "label default")?,
            _ => {}
        }
        Ok(Expr::new(
            target.ty().clone(),
            ExprKind::Label {
                target: target.clone(),
                default,
            },
        ))
    }

    pub fn switch_case(body: Expr, values: Vec<Value>) -> SwitchCase {
        SwitchCase { values, body }
    }

    pub fn switch(value: Expr, default: Option<Expr>, cases: Vec<SwitchCase>) -> Result<Expr> {
        let ty = cases.first().ok_or(ExprError::EmptySwitch)?.body.ty().clone();
        Expr::make_switch(ty, false, value, default, cases)
    }

    pub fn switch_typed(
        ty: Type,
        value: Expr,
        default: Option<Expr>,
        cases: Vec<SwitchCase>,
    ) -> Result<Expr> {
        Expr::make_switch(ty, true, value, default, cases)
    }

    fn make_switch(
        ty: Type,
        explicit: bool,
        value: Expr,
        default: Option<Expr>,
        cases: Vec<SwitchCase>,
    ) -> Result<Expr> {
        require_value(&value, "switch value")?;
        let value_ty = value.ty().clone();
        if !matches!(value_ty, Type::Int | Type::Str | Type::Bool | Type::TypeRef) {
            return Err(ExprError::UnsupportedSwitchType(value_ty));
        }
        if cases.is_empty() || cases.iter().any(|case| case.values.is_empty()) {
            return Err(ExprError::EmptySwitch);
        }

        let mut seen = HashSet::new();
        for case in &cases {
            for test in &case.values {
                require_exact(&value_ty, &test.runtime_type(), "switch case value")?;
                let key = test.key().ok_or_else(|| ExprError::UnsupportedSwitchType(test.runtime_type()))?;
                if !seen.insert(key) {
                    return Err(ExprError::DuplicateCaseValue(format!("{test:?}")));
                }
            }
            require_branch(&ty, explicit, &case.body, "switch case body")?;
        }
        match &default {
            Some(default) => require_branch(&ty, explicit, default, "switch default")?,
            None if !ty.is_void() => return Err(ExprError::MissingSwitchDefault(ty)),
            None => {}
        }

        Ok(Expr::new(
            ty,
            ExprKind::Switch {
                value,
                cases,
                default,
            },
        ))
    }

    // === Exceptions ===

    /// Catches exceptions of class `test` and its subclasses. `object`
    /// catches everything.
    pub fn catch(test: Type, body: Expr) -> Result<CatchBlock> {
        if !(test.is_exception() || test == Type::Object) {
            return Err(ExprError::NotAnExceptionType(test));
        }
        Ok(CatchBlock {
            test,
            variable: None,
            body,
        })
    }

    /// Like [`catch`](Expr::catch), binding the exception to `variable`.
    pub fn catch_var(variable: &Parameter, body: Expr) -> Result<CatchBlock> {
        if variable.is_by_ref() {
            return Err(ExprError::ByRefMisuse(format!(
                "catch variable '{}' cannot be by-ref",
                variable.display_name()
            )));
        }
        let mut block = Expr::catch(variable.ty().clone(), body)?;
        block.variable = Some(variable.clone());
        Ok(block)
    }

    pub fn make_try(
        ty: Option<Type>,
        body: Expr,
        finally: Option<Expr>,
        fault: Option<Expr>,
        handlers: Vec<CatchBlock>,
    ) -> Result<Expr> {
        if handlers.is_empty() && finally.is_none() && fault.is_none() {
            return Err(ExprError::TryWithoutHandler);
        }
        if fault.is_some() && (finally.is_some() || !handlers.is_empty()) {
            return Err(ExprError::FaultWithOtherHandlers);
        }
        let explicit = ty.is_some();
        let ty = ty.unwrap_or_else(|| body.ty().clone());
        require_branch(&ty, explicit, &body, "try body")?;
        for handler in &handlers {
            require_branch(&ty, explicit, &handler.body, "catch body")?;
        }
        Ok(Expr::new(
            ty,
            ExprKind::Try {
                body,
                handlers,
                finally,
                fault,
            },
        ))
    }

    pub fn try_catch(body: Expr, handlers: Vec<CatchBlock>) -> Result<Expr> {
        Expr::make_try(None, body, None, None, handlers)
    }

    pub fn try_finally(body: Expr, finally: Expr) -> Result<Expr> {
        Expr::make_try(None, body, Some(finally), None, Vec::new())
    }

    pub fn try_catch_finally(body: Expr, finally: Expr, handlers: Vec<CatchBlock>) -> Result<Expr> {
        Expr::make_try(None, body, Some(finally), None, handlers)
    }

    /// `fault` runs only when an exception leaves `body`.
    pub fn try_fault(body: Expr, fault: Expr) -> Result<Expr> {
        Expr::make_try(None, body, None, Some(fault), Vec::new())
    }

    pub fn throw(value: Expr) -> Result<Expr> {
        Expr::throw_as(value, Type::Void)
    }

    /// A throw usable where a value of type `ty` is expected.
    pub fn throw_as(value: Expr, ty: Type) -> Result<Expr> {
        require_value(&value, "thrown value")?;
        if !value.ty().is_exception() {
            return Err(ExprError::NotAnExceptionType(value.ty().clone()));
        }
        Ok(Expr::new(ty, ExprKind::Throw { value: Some(value) }))
    }

    /// Rethrows the exception being handled. Only valid inside a catch
    /// body; the compiler rejects it elsewhere.
    pub fn rethrow() -> Expr {
        Expr::rethrow_as(Type::Void)
    }

    pub fn rethrow_as(ty: Type) -> Expr {
        Expr::new(ty, ExprKind::Throw { value: None })
    }

    // === Lambdas and dynamic operations ===

    pub fn lambda(name: Option<&str>, params: Vec<Parameter>, body: Expr) -> Result<Lambda> {
        let ret = body.ty().clone();
        Expr::lambda_typed(name, params, ret, body)
    }

    /// A lambda returning `ret`. A void lambda discards the body's value.
    pub fn lambda_typed(name: Option<&str>, params: Vec<Parameter>, ret: Type, body: Expr) -> Result<Lambda> {
        check_unique(&params)?;
        require_branch(&ret, true, &body, "lambda body")?;
        let signature = Arc::new(Signature {
            params: params
                .iter()
                .map(|param| ParamType {
                    ty: param.ty().clone(),
                    by_ref: param.is_by_ref(),
                })
                .collect(),
            ret,
        });
        let node = LambdaNode {
            name: name.map(EcoString::from),
            params,
            body,
            signature: signature.clone(),
        };
        let expr = Expr::new(Type::Function(signature), ExprKind::Lambda(Arc::new(node)));
        Ok(Lambda::from_expr(expr).expect("lambda node was just built"))
    }

    /// An operation resolved at run time by `binder` through a call site.
    pub fn make_dynamic(binder: Arc<dyn CallSiteBinder>, ret: Type, args: Vec<Expr>) -> Result<Expr> {
        for arg in &args {
            require_value(arg, "dynamic argument")?;
        }
        Ok(Expr::new(
            ret,
            ExprKind::Dynamic {
                binder,
                args: args.into_iter().collect(),
            },
        ))
    }

    // === Reducible sugar ===

    /// `new T(...) { field = value, ... }`.
    pub fn member_init(new: Expr, bindings: Vec<(FieldRef, Expr)>) -> Result<Expr> {
        let ExprKind::New { class, .. } = new.kind() else {
            return Err(ExprError::MemberInitRequiresNew);
        };
        let class = *class;
        let mut checked = Vec::with_capacity(bindings.len());
        for (field, value) in bindings {
            if !registry().derives_from(class, field.declaring_class()) {
                return Err(ExprError::FieldNotOnType {
                    field: field.name().into(),
                    ty: Type::Class(class),
                });
            }
            if !field.access().can_write() {
                return Err(ExprError::NotWritable(format!("read-only field '{}'", field.name())));
            }
            require_assignable(field.ty(), &value, "member initializer")?;
            checked.push(MemberBinding { field, value });
        }
        Ok(Expr::new(
            new.ty().clone(),
            ExprKind::MemberInit {
                new,
                bindings: checked,
            },
        ))
    }

    /// Appends `items` to the array produced by `array`.
    pub fn list_init(array: Expr, items: Vec<Expr>) -> Result<Expr> {
        require_value(&array, "list initializer target")?;
        let elem = array.ty().element_type().cloned().ok_or_else(|| ExprError::TypeMismatch {
            context: "list initializer target",
            expected: Type::array(Type::Object),
            found: array.ty().clone(),
        })?;
        for item in &items {
            require_assignable(&elem, item, "list initializer item")?;
        }
        Ok(Expr::new(
            array.ty().clone(),
            ExprKind::ListInit {
                array,
                items: items.into_iter().collect::<Args>(),
            },
        ))
    }

    pub fn increment(kind: IncrementKind, operand: Expr) -> Result<Expr> {
        require_writable(&operand)?;
        require_value(&operand, "increment operand")?;
        if !operand.ty().is_numeric() {
            return Err(ExprError::UndefinedBinary {
                op: kind.op(),
                left: operand.ty().clone(),
                right: operand.ty().clone(),
            });
        }
        Ok(Expr::new(operand.ty().clone(), ExprKind::Increment { kind, operand }))
    }

    /// `target op= value`.
    pub fn compound_assign(op: BinaryOp, target: Expr, value: Expr) -> Result<Expr> {
        if !(op.is_arithmetic() || op.is_bitwise()) {
            return Err(ExprError::UndefinedBinary {
                op,
                left: target.ty().clone(),
                right: value.ty().clone(),
            });
        }
        require_writable(&target)?;
        let combined = Expr::make_binary(op, target.clone(), value.clone())?;
        require_exact(target.ty(), combined.ty(), "compound assignment")?;
        Ok(Expr::new(
            target.ty().clone(),
            ExprKind::CompoundAssign { op, target, value },
        ))
    }

    pub fn extension(node: Arc<dyn ExtensionNode>) -> Expr {
        Expr::new(node.ty(), ExprKind::Extension(node))
    }
}
