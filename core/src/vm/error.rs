use thiserror::Error;

use crate::binder::BindError;
use crate::types::{ClassId, Type, exception};
use crate::values::Value;

/// Failure while running compiled code.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    /// An exception raised by a `Throw` node, by a native method, or by the
    /// VM itself (division by zero, null receiver, failed cast, index out of
    /// range). Catchable by `Try` nodes.
    #[error("unhandled exception: {0}")]
    Thrown(Value),

    /// A call site's binder failed. Aborts the invocation without running
    /// handlers.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// A delegate or call site was invoked with arguments that do not match
    /// its signature.
    #[error("argument mismatch: {0}")]
    ArgumentMismatch(String),

    /// Compiled code violated an invariant the compiler guarantees, e.g. an
    /// operand of the wrong kind.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// A catchable exception of a built-in or user exception class.
    pub fn throw(class: ClassId, message: &str) -> Self {
        RuntimeError::Thrown(exception(class, message))
    }

    /// The class of a thrown exception object.
    pub fn thrown_class(&self) -> Option<ClassId> {
        match self {
            RuntimeError::Thrown(Value::Object(instance)) => Some(instance.class()),
            _ => None,
        }
    }

    pub fn is_thrown(&self, class: ClassId) -> bool {
        self.thrown_class()
            .is_some_and(|thrown| Type::Class(class).is_assignable_from(&Type::Class(thrown)))
    }
}
