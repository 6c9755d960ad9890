//! The binder protocol.
//!
//! A call site describes *what* it does with an [`Operation`] and delegates
//! *how* to a [`CallSiteBinder`]. On a cache miss the site hands the binder
//! the shapes of the actual arguments; the binder answers with a [`Rule`]:
//! restrictions saying which shapes the rule applies to, and a body tree
//! computing the result in terms of the site's parameters.
//!
//! Binders must be pure functions of the operation and the argument shapes
//! (never the values), so a rule produced once can be reused for every call
//! with matching shapes.

mod default;
mod error;

#[cfg(test)]
mod default_test;

use core::fmt;

use ecow::EcoString;
use smallvec::SmallVec;

pub use default::DefaultBinder;
pub use error::BindError;

use crate::expr::{BinaryOp, Expr, ExprError, Parameter, UnaryOp};
use crate::types::Type;
use crate::values::Value;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum OperationKind {
    GetMember,
    SetMember,
    DeleteMember,
    GetIndex,
    SetIndex,
    Invoke,
    InvokeMember,
    CreateInstance,
    Convert,
    UnaryOp,
    BinaryOp,
}

/// What a dynamic operation does. Argument conventions:
///
/// | operation        | arguments                      |
/// |------------------|--------------------------------|
/// | `GetMember`      | receiver                       |
/// | `SetMember`      | receiver, value                |
/// | `DeleteMember`   | receiver                       |
/// | `GetIndex`       | receiver, index                |
/// | `SetIndex`       | receiver, index, value         |
/// | `Invoke`         | callee, arguments...           |
/// | `InvokeMember`   | receiver, arguments...         |
/// | `CreateInstance` | type token, arguments...       |
/// | `Convert`        | operand                        |
/// | `Unary`          | operand                        |
/// | `Binary`         | left, right                    |
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Operation {
    GetMember { name: EcoString },
    SetMember { name: EcoString },
    DeleteMember { name: EcoString },
    GetIndex,
    SetIndex,
    Invoke,
    InvokeMember { name: EcoString },
    CreateInstance,
    Convert { to: Type, explicit: bool },
    Unary(UnaryOp),
    Binary(BinaryOp),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::GetMember { .. } => OperationKind::GetMember,
            Operation::SetMember { .. } => OperationKind::SetMember,
            Operation::DeleteMember { .. } => OperationKind::DeleteMember,
            Operation::GetIndex => OperationKind::GetIndex,
            Operation::SetIndex => OperationKind::SetIndex,
            Operation::Invoke => OperationKind::Invoke,
            Operation::InvokeMember { .. } => OperationKind::InvokeMember,
            Operation::CreateInstance => OperationKind::CreateInstance,
            Operation::Convert { .. } => OperationKind::Convert,
            Operation::Unary(_) => OperationKind::UnaryOp,
            Operation::Binary(_) => OperationKind::BinaryOp,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::GetMember { name } => write!(f, "get member '{name}'"),
            Operation::SetMember { name } => write!(f, "set member '{name}'"),
            Operation::DeleteMember { name } => write!(f, "delete member '{name}'"),
            Operation::GetIndex => f.write_str("get index"),
            Operation::SetIndex => f.write_str("set index"),
            Operation::Invoke => f.write_str("invoke"),
            Operation::InvokeMember { name } => write!(f, "invoke member '{name}'"),
            Operation::CreateInstance => f.write_str("create instance"),
            Operation::Convert { to, explicit: true } => write!(f, "explicit convert to '{to}'"),
            Operation::Convert { to, explicit: false } => write!(f, "convert to '{to}'"),
            Operation::Unary(op) => write!(f, "unary '{op}'"),
            Operation::Binary(op) => write!(f, "binary '{op}'"),
        }
    }
}

/// Identifies "the same kind of operation" across binders. Compared by the
/// tree comparer for `Dynamic` nodes and used to key the shared rule cache.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CacheIdentity {
    family: &'static str,
    operation: Operation,
}

impl CacheIdentity {
    pub fn new(family: &'static str, operation: Operation) -> Self {
        Self { family, operation }
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }
}

/// What a binder may know about one argument.
#[derive(Clone, PartialEq, Debug)]
pub struct ArgumentShape {
    pub static_type: Type,
    pub runtime_type: Option<Type>,
    pub by_ref: bool,
    /// The type carried by a type-token argument.
    pub token: Option<Type>,
}

impl ArgumentShape {
    pub fn of(value: &Value, static_type: &Type, by_ref: bool) -> Self {
        Self {
            static_type: static_type.clone(),
            runtime_type: Some(value.runtime_type()),
            by_ref,
            token: match value {
                Value::Type(token) => Some(token.clone()),
                _ => None,
            },
        }
    }

    /// The runtime type when known, the static type otherwise.
    pub fn effective_type(&self) -> &Type {
        self.runtime_type.as_ref().unwrap_or(&self.static_type)
    }
}

/// A predicate over one argument's shape.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Restriction {
    Any,
    /// The argument's runtime type is exactly this type.
    Type(Type),
    /// The argument is a type token for exactly this type.
    Token(Type),
}

impl Restriction {
    pub fn matches(&self, shape: &ArgumentShape) -> bool {
        match self {
            Restriction::Any => true,
            Restriction::Type(ty) => shape.effective_type() == ty,
            Restriction::Token(ty) => shape.token.as_ref() == Some(ty),
        }
    }

    /// The restriction as a tree over `param`, used when comparing rules.
    /// Type tokens are constants, so rules differing only in the types they
    /// test differ only in constants.
    fn test(&self, param: &Parameter) -> Result<Option<Expr>, ExprError> {
        Ok(Some(match self {
            Restriction::Any => return Ok(None),
            Restriction::Type(ty) => {
                Expr::equal(Expr::type_of(param.to_expr())?, Expr::type_token(ty.clone()))?
            }
            Restriction::Token(ty) if param.ty() == &Type::TypeRef => {
                Expr::equal(param.to_expr(), Expr::type_token(ty.clone()))?
            }
            Restriction::Token(ty) => Expr::and_also(
                Expr::type_equal(param.to_expr(), Type::TypeRef)?,
                Expr::equal(
                    Expr::convert(param.to_expr(), Type::TypeRef)?,
                    Expr::type_token(ty.clone()),
                )?,
            )?,
        }))
    }
}

/// One restriction per site argument.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Restrictions(SmallVec<[Restriction; 4]>);

impl Restrictions {
    pub fn new(restrictions: impl IntoIterator<Item = Restriction>) -> Self {
        Restrictions(restrictions.into_iter().collect())
    }

    /// Restricts every argument to its observed runtime type.
    pub fn exact(shapes: &[ArgumentShape]) -> Self {
        Restrictions::new(
            shapes
                .iter()
                .map(|shape| Restriction::Type(shape.effective_type().clone())),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Restriction> {
        self.0.iter()
    }

    pub fn matches(&self, shapes: &[ArgumentShape]) -> bool {
        self.0.len() == shapes.len() && self.0.iter().zip(shapes).all(|(r, s)| r.matches(s))
    }

    /// The conjunction of all restrictions as a boolean tree; `true` when
    /// nothing is restricted.
    pub fn to_test(&self, params: &[Parameter]) -> Result<Expr, ExprError> {
        let mut test: Option<Expr> = None;
        for (restriction, param) in self.0.iter().zip(params) {
            if let Some(next) = restriction.test(param)? {
                test = Some(match test {
                    Some(prev) => Expr::and_also(prev, next)?,
                    None => next,
                });
            }
        }
        Ok(test.unwrap_or_else(|| Expr::constant(Value::Bool(true))))
    }
}

impl FromIterator<Restriction> for Restrictions {
    fn from_iter<I: IntoIterator<Item = Restriction>>(iter: I) -> Self {
        Restrictions::new(iter)
    }
}

/// A binder's answer: when it applies, and what it computes.
#[derive(Clone, Debug)]
pub struct Rule {
    pub restrictions: Restrictions,
    /// Written in terms of [`BindRequest::parameters`].
    pub body: Expr,
}

impl Rule {
    pub fn new(restrictions: Restrictions, body: Expr) -> Self {
        Self { restrictions, body }
    }
}

/// Input to [`CallSiteBinder::bind`].
pub struct BindRequest<'a> {
    pub shapes: &'a [ArgumentShape],
    /// One parameter per site argument, typed with the static argument
    /// types. Rule bodies refer to arguments through these.
    pub parameters: &'a [Parameter],
    pub return_type: &'a Type,
}

impl BindRequest<'_> {
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// Read of argument `index`.
    pub fn arg(&self, index: usize) -> Expr {
        self.parameters[index].to_expr()
    }

    pub fn runtime_type(&self, index: usize) -> &Type {
        self.shapes[index].effective_type()
    }

    pub fn runtime_types(&self) -> Vec<Type> {
        self.shapes.iter().map(|s| s.effective_type().clone()).collect()
    }
}

/// Resolves one dynamic operation.
pub trait CallSiteBinder: Send + Sync + fmt::Debug {
    fn operation(&self) -> &Operation;

    /// Produces a rule for the given argument shapes. The rule's
    /// restrictions must match those shapes. Errors propagate to the caller
    /// of the site unchanged.
    fn bind(&self, request: &BindRequest<'_>) -> Result<Rule, BindError>;

    fn cache_identity(&self) -> CacheIdentity {
        CacheIdentity::new(core::any::type_name::<Self>(), self.operation().clone())
    }
}
