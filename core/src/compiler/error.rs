use thiserror::Error;

use crate::expr::{ExprError, NodeKind};
use crate::types::Signature;

/// Internal-consistency failures while lowering a tree.
#[derive(Error, Debug, Clone)]
pub enum CompileError {
    #[error("extension node '{0}' cannot be reduced and cannot be compiled")]
    UnreducibleExtension(String),

    #[error("reduction failed: {0}")]
    Reduce(#[from] ExprError),

    #[error("{0:?} requires an empty evaluation stack, found depth {1}")]
    StackNotEmpty(NodeKind, usize),

    #[error("cannot jump into a try region (label '{0}')")]
    JumpIntoTry(String),

    #[error("cannot jump out of a finally block (label '{0}')")]
    JumpOutOfFinally(String),

    #[error("label '{0}' is referenced but never defined")]
    UndefinedLabel(String),

    #[error("label '{0}' is defined more than once")]
    LabelRedefined(String),

    #[error("variable '{0}' is used outside of its scope")]
    UnboundVariable(String),

    #[error("rethrow is only valid inside a catch block")]
    RethrowOutsideCatch,

    #[error("lambda signature {found} does not match method signature {expected}")]
    SignatureMismatch { expected: Signature, found: Signature },

    #[error("method body '{0}' has not been compiled")]
    MethodNotDefined(String),

    #[error("{0} exceeds the limits of the instruction encoding")]
    TooLarge(&'static str),
}
