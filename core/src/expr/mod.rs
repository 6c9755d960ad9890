//! The expression tree.
//!
//! Trees are immutable and shareable across threads. Variables
//! ([`Parameter`]) and jump targets ([`LabelTarget`]) are identity tokens;
//! everything else is compared structurally.

mod display;
mod error;
mod factory;
mod node;
mod reduce;
mod visit;

#[cfg(test)]
mod expr_test;

pub use error::ExprError;
pub use node::{
    Args, CatchBlock, Expr, ExprKind, ExtensionNode, GotoKind, IncrementKind, LabelId, LabelTarget,
    Lambda, LambdaNode, MemberBinding, Node, NodeKind, ParamId, Parameter, SwitchCase, TypeTestOp,
};
pub use node::{BinaryOp, UnaryOp};
pub use visit::{Rewriter, Visitor};
