use thiserror::Error;

use super::{BinaryOp, UnaryOp};
use crate::types::Type;

/// Tree construction failures. Raised by the factory methods on
/// [`Expr`](super::Expr) before any node is built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("{context}: expected '{expected}', found '{found}'")]
    TypeMismatch {
        context: &'static str,
        expected: Type,
        found: Type,
    },

    #[error("{context}: expected {expected} argument(s), found {found}")]
    ArgumentCount {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{0}: a 'void' expression cannot be used as a value")]
    VoidOperand(&'static str),

    #[error("{0} is not readable")]
    NotReadable(String),

    #[error("{0} cannot be assigned to")]
    NotWritable(String),

    #[error("operator '{op}' is not defined for '{left}' and '{right}'")]
    UndefinedBinary { op: BinaryOp, left: Type, right: Type },

    #[error("operator '{op}' is not defined for '{operand}'")]
    UndefinedUnary { op: UnaryOp, operand: Type },

    #[error("no conversion from '{from}' to '{to}'")]
    NoConversion { from: Type, to: Type },

    #[error("parameters cannot have type 'void'")]
    VoidParameter,

    #[error("by-ref misuse: {0}")]
    ByRefMisuse(String),

    #[error("variable '{0}' is declared more than once in the same scope")]
    DuplicateVariable(String),

    #[error("type '{class}' already declares a member named '{member}'")]
    DuplicateMember { class: String, member: String },

    #[error("type '{class}' has no member named '{member}'")]
    MemberNotFound { class: String, member: String },

    #[error("field '{field}' is not defined on '{ty}'")]
    FieldNotOnType { field: String, ty: Type },

    #[error("values of type '{0}' cannot be invoked")]
    NotInvocable(Type),

    #[error("method '{0}' requires an instance")]
    InstanceRequired(String),

    #[error("static method '{0}' cannot be called on an instance")]
    UnexpectedInstance(String),

    #[error("a block must contain at least one expression")]
    EmptyBlock,

    #[error("switch values of type '{0}' are not supported")]
    UnsupportedSwitchType(Type),

    #[error("a switch needs at least one case and every case at least one value")]
    EmptySwitch,

    #[error("duplicate switch case value {0}")]
    DuplicateCaseValue(String),

    #[error("a switch producing '{0}' needs a default body")]
    MissingSwitchDefault(Type),

    #[error("a try expression needs a catch, finally or fault block")]
    TryWithoutHandler,

    #[error("a fault block cannot be combined with catch or finally blocks")]
    FaultWithOtherHandlers,

    #[error("'{0}' is not an exception type")]
    NotAnExceptionType(Type),

    #[error("label '{label}' of type '{ty}': {reason}")]
    LabelValue {
        label: String,
        ty: Type,
        reason: &'static str,
    },

    #[error("a continue label must have type 'void', found '{0}'")]
    ContinueLabelType(Type),

    #[error("member initialization requires a 'new' expression")]
    MemberInitRequiresNew,

    #[error("extension '{0}' cannot be reduced")]
    NotReducible(String),

    #[error("extension '{0}' reduced to itself")]
    ReducedToSelf(String),

    #[error("extension '{name}' reduced to '{found}' but has type '{expected}'")]
    ReducedTypeChanged {
        name: String,
        expected: Type,
        found: Type,
    },
}
