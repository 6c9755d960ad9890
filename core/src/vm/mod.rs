//! The instruction set and the interpreter that runs compiled lambdas.

mod code;
mod error;
mod instruction;
mod stack;
#[allow(clippy::module_inception)]
mod vm;


pub use code::{CatchClause, Code, DebugInfo, LambdaCode, Region, SwitchTable};
pub use error::RuntimeError;
pub use instruction::{ArithOp, CmpOp, Instruction};
pub use vm::{VM, execute};

pub(crate) use stack::Stack;
