use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ecow::EcoString;

use super::{ClassId, Type};
use crate::error::RuntimeError;
use crate::values::{Delegate, Value};

/// Native method body. Instance methods receive the receiver first.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

static NEXT_METHOD_ID: AtomicU32 = AtomicU32::new(0);

/// Stable identity of a method, compared by `Call` nodes in tree
/// comparison.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MethodId(u32);

impl MethodId {
    fn next() -> Self {
        MethodId(NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub enum MethodImpl {
    Native(NativeFn),
    /// Produced by [`compile_to_method`](crate::compile_to_method).
    Compiled(Delegate),
}

pub struct MethodInfo {
    id: MethodId,
    name: EcoString,
    declaring: Option<ClassId>,
    params: Vec<Type>,
    ret: Type,
    body: MethodImpl,
}

impl MethodInfo {
    /// A static native method.
    pub fn native<F>(name: &str, params: Vec<Type>, ret: Type, body: F) -> Arc<Self>
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            id: MethodId::next(),
            name: name.into(),
            declaring: None,
            params,
            ret,
            body: MethodImpl::Native(Arc::new(body)),
        })
    }

    pub(crate) fn instance(
        class: ClassId,
        name: EcoString,
        params: Vec<Type>,
        ret: Type,
        body: NativeFn,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: MethodId::next(),
            name,
            declaring: Some(class),
            params,
            ret,
            body: MethodImpl::Native(body),
        })
    }

    pub(crate) fn compiled(name: EcoString, params: Vec<Type>, ret: Type, delegate: Delegate) -> Arc<Self> {
        Arc::new(Self {
            id: MethodId::next(),
            name,
            declaring: None,
            params,
            ret,
            body: MethodImpl::Compiled(delegate),
        })
    }

    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The class declaring an instance method; `None` for static methods.
    pub fn declaring_class(&self) -> Option<ClassId> {
        self.declaring
    }

    pub fn is_static(&self) -> bool {
        self.declaring.is_none()
    }

    /// Declared parameters, excluding the receiver.
    pub fn params(&self) -> &[Type] {
        &self.params
    }

    pub fn return_type(&self) -> &Type {
        &self.ret
    }

    /// Number of values the caller supplies, receiver included.
    pub fn stack_arity(&self) -> usize {
        self.params.len() + usize::from(!self.is_static())
    }

    pub fn body(&self) -> &MethodImpl {
        &self.body
    }

    /// Calls the method. Arguments are trusted to match the signature; the
    /// compiler only emits calls that were validated at tree construction.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        match &self.body {
            MethodImpl::Native(f) => f(args),
            MethodImpl::Compiled(delegate) => delegate.call(args.to_vec()),
        }
    }
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(class) = self.declaring {
            write!(f, "{}.", Type::Class(class))?;
        }
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}
