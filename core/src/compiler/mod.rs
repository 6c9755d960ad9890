//! Compilation of lambdas to VM code.
//!
//! A lambda is first [spilled](spill) so that control flow never crosses
//! pending operands, then lowered by a per-lambda compiler. Nested lambdas
//! are compiled recursively and become closures over strong boxes.

mod error;
mod hoist;
mod lambda;
mod spiller;
mod switch;

#[cfg(test)]
mod spiller_test;

use std::sync::Arc;

use ecow::EcoString;

pub use error::CompileError;
pub use spiller::spill;

use crate::expr::Lambda;
use crate::options::CompileOptions;
use crate::types::{MethodInfo, Signature, Type};
use crate::values::Delegate;

/// Compiles `lambda` into an invocable delegate.
pub fn compile(lambda: &Lambda, options: &CompileOptions) -> Result<Delegate, CompileError> {
    let spilled = spill(lambda)?;
    let code = lambda::compile_lambda(options, spilled.node(), &[])?;
    tracing::debug!(
        name = lambda.name().unwrap_or("<lambda>"),
        params = lambda.params().len(),
        "Compiled"
    );
    Ok(Delegate::new(Arc::new(code), Vec::new()))
}

/// A method whose name and signature are fixed before its body is
/// compiled.
///
/// ```
/// use dynex_core::{compile_to_method, CompileOptions, Expr, MethodBody, Parameter, Type, Value};
///
/// let mut body = MethodBody::new("twice", vec![Type::Int], Type::Int);
/// let x = Parameter::new(Type::Int, "x").unwrap();
/// let lambda = Expr::lambda(None, vec![x.clone()], Expr::add(x.to_expr(), x.to_expr()).unwrap()).unwrap();
/// compile_to_method(&lambda, &mut body, &CompileOptions::default()).unwrap();
///
/// let method = body.finish().unwrap();
/// assert_eq!(method.name(), "twice");
/// ```
#[derive(Debug)]
pub struct MethodBody {
    name: EcoString,
    params: Vec<Type>,
    ret: Type,
    delegate: Option<Delegate>,
}

impl MethodBody {
    pub fn new(name: &str, params: Vec<Type>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            delegate: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> Signature {
        Signature::new(self.params.iter().cloned(), self.ret.clone())
    }

    pub fn is_defined(&self) -> bool {
        self.delegate.is_some()
    }

    /// Turns the compiled body into a static method usable by `Call` nodes.
    pub fn finish(self) -> Result<Arc<MethodInfo>, CompileError> {
        let Some(delegate) = self.delegate else {
            return Err(CompileError::MethodNotDefined(self.name.to_string()));
        };
        Ok(MethodInfo::compiled(self.name, self.params, self.ret, delegate))
    }
}

/// Compiles `lambda` as the body of `method`. The lambda's signature must
/// match the method's exactly; compiling again replaces the body.
pub fn compile_to_method(lambda: &Lambda, method: &mut MethodBody, options: &CompileOptions) -> Result<(), CompileError> {
    let expected = method.signature();
    if **lambda.signature() != expected {
        return Err(CompileError::SignatureMismatch {
            expected,
            found: (**lambda.signature()).clone(),
        });
    }
    let delegate = compile(lambda, options)?;
    tracing::debug!(method = %method.name, "Compiled method body");
    method.delegate = Some(delegate);
    Ok(())
}
