//! Static types and the process-wide class metadata.

mod builtins;
mod class;
mod method;


use core::fmt;
use std::sync::Arc;

pub use builtins::{array_length, array_push, builtin_method, exception};
pub use class::{Access, ClassBuilder, ClassDef, ClassId, ClassRegistry, FieldDef, FieldRef, registry};
pub use method::{MethodId, MethodImpl, MethodInfo, NativeFn};

/// The static type of an expression or value.
///
/// `Null` is the type of the `null` literal; it is assignable to every
/// reference type. `TypeRef` is the type of type tokens (`Value::Type`),
/// used by `TypeOf` and by `CreateInstance` operations.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Null,
    Bool,
    Int,
    Float,
    Str,
    Object,
    TypeRef,
    Class(ClassId),
    Array(Arc<Type>),
    Function(Arc<Signature>),
}

/// A function signature. By-ref parameters receive a strong box that the
/// callee reads and writes through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<ParamType>,
    pub ret: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamType {
    pub ty: Type,
    pub by_ref: bool,
}

impl ParamType {
    pub fn by_value(ty: Type) -> Self {
        Self { ty, by_ref: false }
    }
}

impl Signature {
    pub fn new(params: impl IntoIterator<Item = Type>, ret: Type) -> Self {
        Self {
            params: params.into_iter().map(ParamType::by_value).collect(),
            ret,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl Type {
    pub fn array(elem: Type) -> Type {
        Type::Array(Arc::new(elem))
    }

    pub fn function(params: impl IntoIterator<Item = Type>, ret: Type) -> Type {
        Type::Function(Arc::new(Signature::new(params, ret)))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    /// Reference types accept `null`.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Type::Null
                | Type::Str
                | Type::Object
                | Type::TypeRef
                | Type::Class(_)
                | Type::Array(_)
                | Type::Function(_)
        )
    }

    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn class_id(&self) -> Option<ClassId> {
        match self {
            Type::Class(id) => Some(*id),
            _ => None,
        }
    }

    /// True for `Class` types deriving from the built-in `Exception`.
    pub fn is_exception(&self) -> bool {
        match self {
            Type::Class(id) => registry().derives_from(*id, ClassId::EXCEPTION),
            _ => false,
        }
    }

    /// Whether a value of type `source` can be stored where `self` is
    /// expected without a conversion.
    ///
    /// Arrays and functions are invariant. `Object` accepts everything that
    /// produces a value.
    pub fn is_assignable_from(&self, source: &Type) -> bool {
        if self == source {
            return true;
        }
        match self {
            Type::Object => !source.is_void(),
            Type::Class(base) => match source {
                Type::Class(derived) => registry().derives_from(*derived, *base),
                Type::Null => true,
                _ => false,
            },
            Type::Str | Type::TypeRef | Type::Array(_) | Type::Function(_) => {
                matches!(source, Type::Null)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Null => f.write_str("null"),
            Type::Bool => f.write_str("bool"),
            Type::Int => f.write_str("int"),
            Type::Float => f.write_str("float"),
            Type::Str => f.write_str("str"),
            Type::Object => f.write_str("object"),
            Type::TypeRef => f.write_str("type"),
            Type::Class(id) => f.write_str(&registry().get(*id).name),
            Type::Array(elem) => write!(f, "{elem}[]"),
            Type::Function(sig) => write!(f, "{sig}"),
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if param.by_ref {
                f.write_str("ref ")?;
            }
            write!(f, "{}", param.ty)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}
