//! Built-in native methods and exception construction.

use std::sync::Arc;

use ecow::EcoString;
use hashbrown::HashMap;
use lazy_static::lazy_static;
use parking_lot::RwLock;

use super::{ClassId, MethodInfo, Type};
use crate::error::RuntimeError;
use crate::values::{ArrayData, Instance, Value};

/// Creates an exception instance of `class` (which must derive from
/// `Exception`) with the given message and default values elsewhere.
pub fn exception(class: ClassId, message: &str) -> Value {
    let def = class.def();
    let mut fields = def.default_fields();
    debug_assert!(!fields.is_empty(), "exception classes inherit `message`");
    if let Some(slot) = fields.first_mut() {
        *slot = Value::Str(message.into());
    }
    Value::Object(Instance::new(class, fields))
}

fn str_arg(args: &[Value], index: usize) -> Result<&EcoString, RuntimeError> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s),
        Some(Value::Null) => Err(RuntimeError::throw(
            ClassId::NULL_REFERENCE,
            "string receiver is null",
        )),
        other => Err(RuntimeError::ArgumentMismatch(format!(
            "expected a string argument at {index}, found {other:?}"
        ))),
    }
}

fn int_arg(args: &[Value], index: usize) -> Result<i64, RuntimeError> {
    match args.get(index) {
        Some(Value::Int(i)) => Ok(*i),
        other => Err(RuntimeError::ArgumentMismatch(format!(
            "expected an int argument at {index}, found {other:?}"
        ))),
    }
}

fn array_arg(args: &[Value]) -> Result<&Arc<ArrayData>, RuntimeError> {
    match args.first() {
        Some(Value::Array(array)) => Ok(array),
        Some(Value::Null) => Err(RuntimeError::throw(
            ClassId::NULL_REFERENCE,
            "array receiver is null",
        )),
        other => Err(RuntimeError::ArgumentMismatch(format!(
            "expected an array receiver, found {other:?}"
        ))),
    }
}

lazy_static! {
    static ref BUILTINS: HashMap<&'static str, Arc<MethodInfo>> = {
        let mut methods = HashMap::new();
        methods.insert(
            "str.concat",
            MethodInfo::native("concat", vec![Type::Str, Type::Str], Type::Str, |args| {
                let mut out = str_arg(args, 0)?.clone();
                out.push_str(str_arg(args, 1)?);
                Ok(Value::Str(out))
            }),
        );
        methods.insert(
            "str.length",
            MethodInfo::native("length", vec![Type::Str], Type::Int, |args| {
                Ok(Value::Int(str_arg(args, 0)?.chars().count() as i64))
            }),
        );
        methods.insert(
            "str.char_at",
            MethodInfo::native("char_at", vec![Type::Str, Type::Int], Type::Str, |args| {
                let s = str_arg(args, 0)?;
                let index = int_arg(args, 1)?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::Str(c.into()))
                    .ok_or_else(|| {
                        RuntimeError::throw(
                            ClassId::INDEX_OUT_OF_RANGE,
                            &format!("index {index} is outside the string"),
                        )
                    })
            }),
        );
        methods.insert(
            "int.to_string",
            MethodInfo::native("to_string", vec![Type::Int], Type::Str, |args| {
                Ok(Value::Str(ecow::eco_format!("{}", int_arg(args, 0)?)))
            }),
        );
        methods.insert(
            "float.to_string",
            MethodInfo::native("to_string", vec![Type::Float], Type::Str, |args| match args.first() {
                Some(Value::Float(f)) => Ok(Value::Str(ecow::eco_format!("{f}"))),
                other => Err(RuntimeError::ArgumentMismatch(format!(
                    "expected a float argument, found {other:?}"
                ))),
            }),
        );
        methods.insert(
            "object.to_string",
            MethodInfo::native("to_string", vec![Type::Object], Type::Str, |args| {
                Ok(Value::Str(ecow::eco_format!("{}", args.first().unwrap_or(&Value::Null))))
            }),
        );
        methods
    };

    static ref ARRAY_METHODS: RwLock<HashMap<(Type, &'static str), Arc<MethodInfo>>> =
        RwLock::new(HashMap::new());
}

/// Looks up a built-in static method by qualified name, e.g.
/// `"str.concat"` or `"int.to_string"`.
pub fn builtin_method(name: &str) -> Option<Arc<MethodInfo>> {
    BUILTINS.get(name).cloned()
}

/// `push(array: elem[], item: elem) -> void`, one instance per element type.
pub fn array_push(elem: &Type) -> Arc<MethodInfo> {
    array_method(elem, "push", || {
        MethodInfo::native(
            "push",
            vec![Type::array(elem.clone()), elem.clone()],
            Type::Void,
            |args| {
                let array = array_arg(args)?;
                let item = args.get(1).cloned().unwrap_or(Value::Null);
                array.items.lock().push(item);
                Ok(Value::Void)
            },
        )
    })
}

/// `length(array: elem[]) -> int`, one instance per element type.
pub fn array_length(elem: &Type) -> Arc<MethodInfo> {
    array_method(elem, "length", || {
        MethodInfo::native("length", vec![Type::array(elem.clone())], Type::Int, |args| {
            Ok(Value::Int(array_arg(args)?.items.lock().len() as i64))
        })
    })
}

fn array_method(elem: &Type, name: &'static str, make: impl FnOnce() -> Arc<MethodInfo>) -> Arc<MethodInfo> {
    let key = (elem.clone(), name);
    if let Some(found) = ARRAY_METHODS.read().get(&key) {
        return found.clone();
    }
    ARRAY_METHODS.write().entry(key).or_insert_with(make).clone()
}
