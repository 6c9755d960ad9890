use core::fmt;
use std::sync::Arc;

use super::{StrongBox, Value};
use crate::error::RuntimeError;
use crate::types::Signature;
use crate::vm::{self, Code, LambdaCode};

/// An invocable compiled lambda together with the variables it captured.
#[derive(Clone)]
pub struct Delegate(Arc<Closure>);

pub struct Closure {
    pub(crate) code: Arc<LambdaCode>,
    pub(crate) captures: Box<[StrongBox]>,
}

impl Delegate {
    pub(crate) fn new(code: Arc<LambdaCode>, captures: Vec<StrongBox>) -> Self {
        debug_assert_eq!(code.num_captures as usize, captures.len());
        Delegate(Arc::new(Closure {
            code,
            captures: captures.into_boxed_slice(),
        }))
    }

    pub fn signature(&self) -> &Arc<Signature> {
        &self.0.code.signature
    }

    pub fn name(&self) -> Option<&str> {
        self.0.code.name.as_deref()
    }

    /// The compiled body, e.g. for [`Code::disassemble`].
    pub fn code(&self) -> &Code {
        &self.0.code.code
    }

    pub fn ptr_eq(&self, other: &Delegate) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Invokes the delegate after checking the arguments against its
    /// signature.
    ///
    /// Arguments for by-ref parameters may be passed as [`Value::Box`] to
    /// observe writes made by the callee; other values are boxed on the fly.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        let signature = self.signature();
        if args.len() != signature.params.len() {
            return Err(RuntimeError::ArgumentMismatch(format!(
                "expected {} argument(s), found {}",
                signature.params.len(),
                args.len()
            )));
        }

        let mut checked = Vec::with_capacity(args.len());
        for (i, (arg, param)) in args.iter().zip(&signature.params).enumerate() {
            let actual = arg.runtime_type();
            if !param.ty.is_assignable_from(&actual) {
                return Err(RuntimeError::ArgumentMismatch(format!(
                    "argument {i}: expected '{}', found '{actual}'",
                    param.ty
                )));
            }
            checked.push(match (param.by_ref, arg) {
                (true, Value::Box(_)) => arg.clone(),
                (true, _) => Value::Box(StrongBox::new(arg.clone())),
                (false, Value::Box(cell)) => cell.get(),
                (false, _) => arg.clone(),
            });
        }
        self.call(checked)
    }

    /// Invokes without checking. Callers guarantee the arguments match.
    pub(crate) fn call(&self, args: Vec<Value>) -> Result<Value, RuntimeError> {
        vm::execute(&self.0.code, &self.0.captures, args)
    }
}

impl fmt::Debug for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Delegate({} {})",
            self.name().unwrap_or("lambda"),
            self.signature()
        )
    }
}
