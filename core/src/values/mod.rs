//! Runtime values.

mod delegate;

#[cfg(test)]
mod values_test;

use core::fmt;
use std::sync::Arc;

use ecow::EcoString;
use parking_lot::Mutex;

pub use delegate::{Closure, Delegate};

use crate::types::{ClassId, Type};

/// A runtime value.
///
/// Primitives compare by value; objects, arrays, functions and boxes compare
/// by identity.
#[derive(Clone)]
pub enum Value {
    Void,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(EcoString),
    /// A type token.
    Type(Type),
    Object(Arc<Instance>),
    Array(Arc<ArrayData>),
    Function(Delegate),
    /// Storage cell used for hoisted variables and by-ref arguments.
    Box(StrongBox),
}

/// An instance of a registered class.
pub struct Instance {
    class: ClassId,
    fields: Mutex<Vec<Value>>,
}

impl Instance {
    pub fn new(class: ClassId, fields: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            class,
            fields: Mutex::new(fields),
        })
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    pub fn get(&self, index: u32) -> Value {
        self.fields.lock()[index as usize].clone()
    }

    pub fn set(&self, index: u32, value: Value) {
        self.fields.lock()[index as usize] = value;
    }
}

/// A growable array with a fixed element type.
pub struct ArrayData {
    pub(crate) elem: Type,
    pub(crate) items: Mutex<Vec<Value>>,
}

impl ArrayData {
    pub fn new(elem: Type, items: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            elem,
            items: Mutex::new(items),
        })
    }

    pub fn element_type(&self) -> &Type {
        &self.elem
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.lock().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.items.lock().clone()
    }
}

/// A shared mutable cell.
#[derive(Clone)]
pub struct StrongBox(Arc<Mutex<Value>>);

impl StrongBox {
    pub fn new(value: Value) -> Self {
        StrongBox(Arc::new(Mutex::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.lock().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.lock() = value;
    }

    pub fn ptr_eq(&self, other: &StrongBox) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for StrongBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "box({:?})", self.get())
    }
}

/// Hashable projection of the primitive values. Used to dedupe constants
/// and to key hashed switch tables.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ValueKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(EcoString),
    Type(Type),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(s.into())
    }

    /// The zero value of a type: `null` for reference types.
    pub fn default_for(ty: &Type) -> Value {
        match ty {
            Type::Void => Value::Void,
            Type::Bool => Value::Bool(false),
            Type::Int => Value::Int(0),
            Type::Float => Value::Float(0.0),
            _ => Value::Null,
        }
    }

    /// The most specific type of this value.
    pub fn runtime_type(&self) -> Type {
        match self {
            Value::Void => Type::Void,
            Value::Null => Type::Null,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Str(_) => Type::Str,
            Value::Type(_) => Type::TypeRef,
            Value::Object(instance) => Type::Class(instance.class),
            Value::Array(array) => Type::array(array.elem.clone()),
            Value::Function(delegate) => Type::Function(delegate.signature().clone()),
            Value::Box(cell) => cell.get().runtime_type(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<Instance>> {
        match self {
            Value::Object(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Delegate> {
        match self {
            Value::Function(delegate) => Some(delegate),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn key(&self) -> Option<ValueKey> {
        Some(match self {
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Int(i) => ValueKey::Int(*i),
            Value::Float(f) => ValueKey::Float(f.to_bits()),
            Value::Str(s) => ValueKey::Str(s.clone()),
            Value::Type(t) => ValueKey::Type(t.clone()),
            _ => return None,
        })
    }

    /// Identity comparison: references must be the same object, primitives
    /// the same value. Floats compare by bit pattern so that a constant is
    /// always identical to itself.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    /// Reads the exception message of an exception instance.
    pub fn exception_message(&self) -> Option<EcoString> {
        let instance = self.as_object()?;
        if !Type::Class(instance.class).is_exception() {
            return None;
        }
        match instance.get(0) {
            Value::Str(message) => Some(message),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Box(a), Value::Box(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("void"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Str(s) => f.write_str(s),
            Value::Type(t) => write!(f, "{t}"),
            Value::Object(instance) => match self.exception_message() {
                Some(message) => write!(f, "{}: {message}", Type::Class(instance.class)),
                None => write!(f, "<{}>", Type::Class(instance.class)),
            },
            Value::Array(array) => {
                f.write_str("[")?;
                for (i, item) in array.items.lock().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item:?}")?;
                }
                f.write_str("]")
            }
            Value::Function(delegate) => write!(f, "<fn {}>", delegate.name().unwrap_or("lambda")),
            Value::Box(cell) => write!(f, "{}", cell.get()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Box(cell) => write!(f, "{cell:?}"),
            _ => fmt::Display::fmt(self, f),
        }
    }
}
