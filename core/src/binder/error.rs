use thiserror::Error;

use crate::compiler::CompileError;
use crate::expr::ExprError;
use crate::types::Type;

/// Failure to resolve a dynamic operation. Never retried by the call site.
#[derive(Error, Debug, Clone)]
pub enum BindError {
    #[error("{operation} is not defined for ({})", display_types(.args))]
    NoApplicableOperation { operation: String, args: Vec<Type> },

    #[error("'{ty}' has no member named '{member}'")]
    MemberNotFound { ty: Type, member: String },

    #[error("rule restrictions cover {found} argument(s), the site passes {expected}")]
    RestrictionArity { expected: usize, found: usize },

    #[error("rule does not apply to the arguments it was produced for")]
    RuleNotApplicable,

    #[error("rule produces '{found}', the site expects '{expected}'")]
    ResultTypeMismatch { expected: Type, found: Type },

    #[error("invalid rule body: {0}")]
    InvalidRule(#[from] ExprError),

    #[error("rule body failed to compile: {0}")]
    Compile(#[from] CompileError),

    #[error("{0}")]
    Custom(String),
}

fn display_types(types: &[Type]) -> String {
    types
        .iter()
        .map(|ty| ty.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
