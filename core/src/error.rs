//! Error taxonomy.
//!
//! - [`ExprError`]: a tree could not be constructed.
//! - [`BindError`]: a binder could not resolve an operation.
//! - [`CompileError`]: a tree could not be lowered. Indicates a bug in tree
//!   construction or in a rewriting pass, never a user error.
//! - [`RuntimeError`]: compiled code failed. `Thrown` is ordinary control
//!   flow for the running program; the other variants abort.

use thiserror::Error;

pub use crate::binder::BindError;
pub use crate::compiler::CompileError;
pub use crate::expr::ExprError;
pub use crate::vm::RuntimeError;

/// Any error produced by this crate.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
