//! The built-in binder for the crate's own type system.

use std::sync::Arc;

use super::{BindError, BindRequest, CallSiteBinder, Operation, Restriction, Restrictions, Rule};
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::types::{ClassId, MethodInfo, Type, array_length, array_push, builtin_method, registry};
use crate::values::Value;

type Result<T> = core::result::Result<T, BindError>;

/// Resolves operations against the built-in types and registered classes.
///
/// Rules restrict every inspected argument to its exact runtime type, so a
/// site sees one rule per combination of argument types. Numeric operands
/// are promoted (`int` op `float` computes in `float`), `str + str`
/// concatenates, and equality between values of unrelated types is `false`.
/// Member operations on a `null` receiver produce a rule that throws
/// `NullReferenceException`.
#[derive(Debug, Clone)]
pub struct DefaultBinder {
    operation: Operation,
}

impl DefaultBinder {
    pub fn new(operation: Operation) -> Self {
        Self { operation }
    }

    pub fn get_member(name: &str) -> Self {
        Self::new(Operation::GetMember { name: name.into() })
    }

    pub fn set_member(name: &str) -> Self {
        Self::new(Operation::SetMember { name: name.into() })
    }

    pub fn invoke_member(name: &str) -> Self {
        Self::new(Operation::InvokeMember { name: name.into() })
    }

    pub fn binary(op: BinaryOp) -> Self {
        Self::new(Operation::Binary(op))
    }

    pub fn convert(to: Type, explicit: bool) -> Self {
        Self::new(Operation::Convert { to, explicit })
    }
}

impl CallSiteBinder for DefaultBinder {
    fn operation(&self) -> &Operation {
        &self.operation
    }

    fn bind(&self, request: &BindRequest<'_>) -> Result<Rule> {
        let expected = match &self.operation {
            Operation::GetMember { .. }
            | Operation::DeleteMember { .. }
            | Operation::Convert { .. }
            | Operation::Unary(_) => Some(1),
            Operation::SetMember { .. } | Operation::GetIndex | Operation::Binary(_) => Some(2),
            Operation::SetIndex => Some(3),
            Operation::Invoke | Operation::InvokeMember { .. } | Operation::CreateInstance => None,
        };
        let arity_ok = match expected {
            Some(n) => request.arity() == n,
            None => request.arity() >= 1,
        };
        if !arity_ok {
            return Err(self.no_operation(request));
        }

        let binder = Binding {
            operation: &self.operation,
            request,
        };
        let rule = match &self.operation {
            Operation::Binary(op) => binder.binary(*op),
            Operation::Unary(op) => binder.unary(*op),
            Operation::Convert { to, explicit } => binder.convert(to, *explicit),
            Operation::GetMember { name } => binder.get_member(name),
            Operation::SetMember { name } => binder.set_member(name),
            Operation::DeleteMember { name } => binder.delete_member(name),
            Operation::GetIndex => binder.get_index(),
            Operation::SetIndex => binder.set_index(),
            Operation::Invoke => binder.invoke(),
            Operation::InvokeMember { name } => binder.invoke_member(name),
            Operation::CreateInstance => binder.create_instance(),
        }?;
        tracing::trace!(operation = %self.operation, body = %rule.body, "Bound rule");
        Ok(rule)
    }
}

impl DefaultBinder {
    fn no_operation(&self, request: &BindRequest<'_>) -> BindError {
        BindError::NoApplicableOperation {
            operation: self.operation.to_string(),
            args: request.runtime_types(),
        }
    }
}

/// Whether a value of type `from` can be passed where `to` is expected,
/// allowing the implicit `int` to `float` widening.
fn convertible(from: &Type, to: &Type) -> bool {
    to.is_assignable_from(from) || (*from == Type::Int && *to == Type::Float)
}

struct Binding<'r, 'a> {
    operation: &'r Operation,
    request: &'r BindRequest<'a>,
}

impl Binding<'_, '_> {
    fn no_operation(&self) -> BindError {
        BindError::NoApplicableOperation {
            operation: self.operation.to_string(),
            args: self.request.runtime_types(),
        }
    }

    fn runtime(&self, index: usize) -> Type {
        self.request.runtime_type(index).clone()
    }

    /// Argument `index` viewed at type `ty`, converting from the static
    /// type when they differ.
    fn arg_as(&self, index: usize, ty: &Type) -> Result<Expr> {
        let arg = self.request.arg(index);
        if arg.ty() == ty {
            return Ok(arg);
        }
        Ok(Expr::convert(arg, ty.clone())?)
    }

    /// Argument `index` at its runtime type, then widened to `to`.
    fn arg_to(&self, index: usize, to: &Type) -> Result<Expr> {
        let arg = self.arg_as(index, &self.runtime(index))?;
        coerce(arg, to)
    }

    fn exact(&self) -> Restrictions {
        Restrictions::exact(self.request.shapes)
    }

    /// A rule for a `null` receiver in position 0: throws
    /// `NullReferenceException` whatever the other arguments are.
    fn null_receiver(&self) -> Result<Rule> {
        let restrictions = std::iter::once(Restriction::Type(Type::Null))
            .chain((1..self.request.arity()).map(|_| Restriction::Any))
            .collect();
        let message = format!("cannot {} on a null reference", self.operation);
        let exception = Expr::new_object(
            ClassId::NULL_REFERENCE,
            vec![Expr::constant(Value::Str(message.into()))],
        )?;
        let body = Expr::throw_as(exception, self.request.return_type.clone())?;
        Ok(Rule::new(restrictions, body))
    }

    fn binary(&self, op: BinaryOp) -> Result<Rule> {
        if op == BinaryOp::Assign {
            return Err(self.no_operation());
        }
        let (left, right) = (self.runtime(0), self.runtime(1));

        if op == BinaryOp::Add && left == Type::Str && right == Type::Str {
            let concat = builtin("str.concat")?;
            let body = Expr::call_static(&concat, vec![self.arg_as(0, &left)?, self.arg_as(1, &right)?])?;
            return Ok(Rule::new(self.exact(), body));
        }

        let operand = match (&left, &right) {
            (Type::Int, Type::Int) => Some(Type::Int),
            (Type::Int | Type::Float, Type::Int | Type::Float) => Some(Type::Float),
            (Type::Bool, Type::Bool) => Some(Type::Bool),
            (Type::Str, Type::Str) => Some(Type::Str),
            _ => None,
        };
        if let Some(operand) = operand {
            let body = Expr::make_binary(op, self.arg_to(0, &operand)?, self.arg_to(1, &operand)?)
                .map_err(|_| self.no_operation())?;
            return Ok(Rule::new(self.exact(), body));
        }

        if !op.is_equality() {
            return Err(self.no_operation());
        }
        let body = if left == right && left != Type::Null {
            Expr::make_binary(op, self.arg_as(0, &left)?, self.arg_as(1, &right)?)?
        } else {
            // Values of different runtime types are never equal; two nulls
            // always are.
            let equal = left == right;
            Expr::constant(Value::Bool(equal == (op == BinaryOp::Equal)))
        };
        Ok(Rule::new(self.exact(), body))
    }

    fn unary(&self, op: UnaryOp) -> Result<Rule> {
        match op {
            UnaryOp::TypeOf => Ok(Rule::new(
                Restrictions::new([Restriction::Any]),
                Expr::type_of(self.request.arg(0))?,
            )),
            UnaryOp::Convert => Err(self.no_operation()),
            _ => {
                let operand = self.arg_as(0, &self.runtime(0))?;
                let body = Expr::unary(op, operand).map_err(|_| self.no_operation())?;
                Ok(Rule::new(self.exact(), body))
            }
        }
    }

    fn convert(&self, to: &Type, explicit: bool) -> Result<Rule> {
        let from = self.runtime(0);
        let operand = self.arg_as(0, &from)?;
        let body = if from == *to {
            operand
        } else if convertible(&from, to) || (explicit && from == Type::Float && *to == Type::Int) {
            Expr::convert(operand, to.clone())?
        } else if explicit && *to == Type::Str {
            let method = match from {
                Type::Int => builtin("int.to_string")?,
                Type::Float => builtin("float.to_string")?,
                _ => builtin("object.to_string")?,
            };
            let operand = coerce(operand, &method.params()[0])?;
            Expr::call_static(&method, vec![operand])?
        } else {
            return Err(self.no_operation());
        };
        Ok(Rule::new(self.exact(), body))
    }

    fn get_member(&self, name: &str) -> Result<Rule> {
        let receiver_ty = self.runtime(0);
        let receiver = || self.arg_as(0, &receiver_ty);
        let body = match &receiver_ty {
            Type::Null => return self.null_receiver(),
            Type::Class(class) => match registry().find_field(*class, name) {
                Some(field) if field.access().can_read() => Expr::member(receiver()?, field)?,
                _ => return Err(self.member_not_found(name)),
            },
            Type::Str if name == "length" => {
                Expr::call_static(&builtin("str.length")?, vec![receiver()?])?
            }
            Type::Array(elem) if name == "length" => {
                Expr::call_static(&array_length(elem), vec![receiver()?])?
            }
            _ => return Err(self.member_not_found(name)),
        };
        Ok(Rule::new(self.exact(), body))
    }

    fn writable_field(&self, name: &str) -> Result<Expr> {
        let receiver_ty = self.runtime(0);
        let Type::Class(class) = &receiver_ty else {
            return Err(self.member_not_found(name));
        };
        match registry().find_field(*class, name) {
            Some(field) if field.access().can_write() => {
                Ok(Expr::member(self.arg_as(0, &receiver_ty)?, field)?)
            }
            _ => Err(self.member_not_found(name)),
        }
    }

    fn set_member(&self, name: &str) -> Result<Rule> {
        if self.runtime(0) == Type::Null {
            return self.null_receiver();
        }
        let target = self.writable_field(name)?;
        if !convertible(&self.runtime(1), target.ty()) {
            return Err(self.no_operation());
        }
        let value = self.arg_to(1, target.ty())?;
        Ok(Rule::new(self.exact(), Expr::assign(target, value)?))
    }

    /// Resets the field to its type's default.
    fn delete_member(&self, name: &str) -> Result<Rule> {
        if self.runtime(0) == Type::Null {
            return self.null_receiver();
        }
        let target = self.writable_field(name)?;
        let reset = Expr::default(target.ty().clone());
        Ok(Rule::new(self.exact(), Expr::assign(target, reset)?))
    }

    fn get_index(&self) -> Result<Rule> {
        let (receiver_ty, index_ty) = (self.runtime(0), self.runtime(1));
        if receiver_ty == Type::Null {
            return self.null_receiver();
        }
        if index_ty != Type::Int {
            return Err(self.no_operation());
        }
        let receiver = self.arg_as(0, &receiver_ty)?;
        let index = self.arg_as(1, &Type::Int)?;
        let body = match &receiver_ty {
            Type::Array(_) => Expr::make_index(receiver, index)?,
            Type::Str => Expr::call_static(&builtin("str.char_at")?, vec![receiver, index])?,
            _ => return Err(self.no_operation()),
        };
        Ok(Rule::new(self.exact(), body))
    }

    fn set_index(&self) -> Result<Rule> {
        let (receiver_ty, index_ty, value_ty) = (self.runtime(0), self.runtime(1), self.runtime(2));
        if receiver_ty == Type::Null {
            return self.null_receiver();
        }
        let Type::Array(elem) = &receiver_ty else {
            return Err(self.no_operation());
        };
        if index_ty != Type::Int || !convertible(&value_ty, elem) {
            return Err(self.no_operation());
        }
        let target = Expr::make_index(self.arg_as(0, &receiver_ty)?, self.arg_as(1, &Type::Int)?)?;
        let body = Expr::assign(target, self.arg_to(2, elem)?)?;
        Ok(Rule::new(self.exact(), body))
    }

    /// Converted arguments `1..` for parameters `params`, or `None` when the
    /// runtime types do not fit.
    fn call_args(&self, params: &[Type]) -> Result<Option<Vec<Expr>>> {
        if params.len() + 1 != self.request.arity() {
            return Ok(None);
        }
        if !params
            .iter()
            .enumerate()
            .all(|(i, param)| convertible(self.request.runtime_type(i + 1), param))
        {
            return Ok(None);
        }
        params
            .iter()
            .enumerate()
            .map(|(i, param)| self.arg_to(i + 1, param))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    fn invoke(&self) -> Result<Rule> {
        let callee_ty = self.runtime(0);
        let signature = match &callee_ty {
            Type::Null => return self.null_receiver(),
            Type::Function(signature) if signature.params.iter().all(|p| !p.by_ref) => signature.clone(),
            _ => return Err(self.no_operation()),
        };
        let params: Vec<Type> = signature.params.iter().map(|p| p.ty.clone()).collect();
        let args = self.call_args(&params)?.ok_or_else(|| self.no_operation())?;
        let body = Expr::invoke(self.arg_as(0, &callee_ty)?, args)?;
        Ok(Rule::new(self.exact(), body))
    }

    fn invoke_member(&self, name: &str) -> Result<Rule> {
        let receiver_ty = self.runtime(0);
        let receiver = || self.arg_as(0, &receiver_ty);
        let body = match &receiver_ty {
            Type::Null => return self.null_receiver(),
            Type::Class(class) => {
                let mut found = None;
                for method in registry().find_methods(*class, name) {
                    if let Some(args) = self.call_args(method.params())? {
                        found = Some(Expr::call(Some(receiver()?), &method, args)?);
                        break;
                    }
                }
                match found {
                    Some(body) => body,
                    None => return Err(self.member_not_found(name)),
                }
            }
            Type::Str => {
                let method = match name {
                    "length" => builtin("str.length")?,
                    "concat" => builtin("str.concat")?,
                    "char_at" => builtin("str.char_at")?,
                    _ => return Err(self.member_not_found(name)),
                };
                self.static_with_receiver(&method, receiver()?)?
            }
            Type::Array(elem) => {
                let method = match name {
                    "length" => array_length(elem),
                    "push" => array_push(elem),
                    _ => return Err(self.member_not_found(name)),
                };
                self.static_with_receiver(&method, receiver()?)?
            }
            _ => return Err(self.member_not_found(name)),
        };
        Ok(Rule::new(self.exact(), body))
    }

    /// Calls a static method whose first parameter is the receiver.
    fn static_with_receiver(&self, method: &Arc<MethodInfo>, receiver: Expr) -> Result<Expr> {
        let args = self
            .call_args(&method.params()[1..])?
            .ok_or_else(|| self.no_operation())?;
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(receiver);
        all.extend(args);
        Ok(Expr::call_static(method, all)?)
    }

    fn create_instance(&self) -> Result<Rule> {
        let Some(Type::Class(class)) = self.request.shapes[0].token.clone() else {
            return Err(self.no_operation());
        };
        let field_types: Vec<Type> = class.def().fields.iter().map(|f| f.ty().clone()).collect();
        let args = self.call_args(&field_types)?.ok_or_else(|| self.no_operation())?;
        let restrictions = std::iter::once(Restriction::Token(Type::Class(class)))
            .chain(
                self.request.shapes[1..]
                    .iter()
                    .map(|shape| Restriction::Type(shape.effective_type().clone())),
            )
            .collect();
        Ok(Rule::new(restrictions, Expr::new_object(class, args)?))
    }

    fn member_not_found(&self, name: &str) -> BindError {
        BindError::MemberNotFound {
            ty: self.runtime(0),
            member: name.into(),
        }
    }
}

fn builtin(name: &str) -> Result<Arc<MethodInfo>> {
    builtin_method(name).ok_or_else(|| BindError::Custom(format!("missing built-in method '{name}'")))
}

/// Widens `expr` to `to` when its type differs.
fn coerce(expr: Expr, to: &Type) -> Result<Expr> {
    if expr.ty() == to {
        Ok(expr)
    } else {
        Ok(Expr::convert(expr, to.clone())?)
    }
}
