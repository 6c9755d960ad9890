//! Classes, fields and the process-wide class registry.
//!
//! Classes are registered once and never removed. The registry is
//! initialized lazily with the built-in exception hierarchy and grows
//! monotonically; member lookups are memoized per `(class, name)`.

use core::fmt;
use std::sync::Arc;

use ecow::EcoString;
use hashbrown::HashMap;
use lazy_static::lazy_static;
use parking_lot::RwLock;

use super::method::{MethodInfo, NativeFn};
use super::Type;
use crate::error::{ExprError, RuntimeError};
use crate::values::Value;

/// Handle to a registered class. Only the registry mints these.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ClassId(u32);

impl ClassId {
    pub const EXCEPTION: ClassId = ClassId(0);
    pub const DIVIDE_BY_ZERO: ClassId = ClassId(1);
    pub const NULL_REFERENCE: ClassId = ClassId(2);
    pub const INVALID_CAST: ClassId = ClassId(3);
    pub const INDEX_OUT_OF_RANGE: ClassId = ClassId(4);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Instruction operand encoding.
    pub(crate) fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        ClassId(raw)
    }

    /// Shorthand for `registry().get(self)`.
    pub fn def(self) -> Arc<ClassDef> {
        registry().get(self)
    }
}

/// Which directions a field supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

impl Access {
    pub fn can_read(self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub fn can_write(self) -> bool {
        !matches!(self, Access::ReadOnly)
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: EcoString,
    pub ty: Type,
    pub access: Access,
}

/// A resolved field: the declaring class plus the slot in the instance
/// layout. Two refs are equal iff they name the same declared field.
#[derive(Clone)]
pub struct FieldRef {
    declaring: ClassId,
    index: u32,
    def: Arc<FieldDef>,
}

impl FieldRef {
    pub fn declaring_class(&self) -> ClassId {
        self.declaring
    }

    /// Slot of this field in the instance layout of the declaring class and
    /// of every class derived from it.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn ty(&self) -> &Type {
        &self.def.ty
    }

    pub fn access(&self) -> Access {
        self.def.access
    }
}

impl PartialEq for FieldRef {
    fn eq(&self, other: &Self) -> bool {
        self.declaring == other.declaring && self.index == other.index
    }
}

impl Eq for FieldRef {}

impl core::hash::Hash for FieldRef {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.declaring.hash(state);
        self.index.hash(state);
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {:?}", Type::Class(self.declaring), self.def.name, self.def.ty)
    }
}

/// A registered class. `fields` is the full instance layout, inherited
/// fields first; `methods` holds only the methods declared by this class.
#[derive(Debug)]
pub struct ClassDef {
    pub id: ClassId,
    pub name: EcoString,
    pub base: Option<ClassId>,
    pub fields: Vec<FieldRef>,
    pub methods: Vec<Arc<MethodInfo>>,
}

impl ClassDef {
    /// Finds a field in the layout; later (more derived) declarations shadow
    /// earlier ones.
    pub fn field(&self, name: &str) -> Option<&FieldRef> {
        self.fields.iter().rev().find(|field| field.name() == name)
    }

    /// Default field values for a new instance.
    pub fn default_fields(&self) -> Vec<Value> {
        self.fields.iter().map(|field| Value::default_for(field.ty())).collect()
    }
}

struct PendingMethod {
    name: EcoString,
    params: Vec<Type>,
    ret: Type,
    body: NativeFn,
}

/// Builder for a new class.
///
/// ```
/// use dynex_core::{ClassBuilder, Type};
///
/// let point = ClassBuilder::new("Point")
///     .field("x", Type::Int)
///     .field("y", Type::Int)
///     .register()
///     .unwrap();
/// assert_eq!(point.def().fields.len(), 2);
/// ```
pub struct ClassBuilder {
    name: EcoString,
    base: Option<ClassId>,
    fields: Vec<FieldDef>,
    methods: Vec<PendingMethod>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            base: None,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn extends(mut self, base: ClassId) -> Self {
        self.base = Some(base);
        self
    }

    pub fn field(self, name: &str, ty: Type) -> Self {
        self.field_with_access(name, ty, Access::ReadWrite)
    }

    pub fn field_with_access(mut self, name: &str, ty: Type, access: Access) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
            access,
        });
        self
    }

    /// Declares an instance method. The native body receives the receiver
    /// as `args[0]` followed by the declared parameters.
    pub fn method<F>(mut self, name: &str, params: Vec<Type>, ret: Type, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.methods.push(PendingMethod {
            name: name.into(),
            params,
            ret,
            body: Arc::new(body),
        });
        self
    }

    pub fn register(self) -> Result<ClassId, ExprError> {
        registry().register(self)
    }
}

#[derive(Default)]
struct Members {
    field: Option<FieldRef>,
    methods: Vec<Arc<MethodInfo>>,
}

struct Classes {
    defs: Vec<Arc<ClassDef>>,
    by_name: HashMap<EcoString, ClassId>,
}

/// Process-wide class metadata.
pub struct ClassRegistry {
    classes: RwLock<Classes>,
    members: RwLock<HashMap<(ClassId, EcoString), Arc<Members>>>,
}

lazy_static! {
    static ref REGISTRY: ClassRegistry = ClassRegistry::with_builtins();
}

/// The global class registry.
pub fn registry() -> &'static ClassRegistry {
    &REGISTRY
}

impl ClassRegistry {
    fn with_builtins() -> Self {
        let registry = ClassRegistry {
            classes: RwLock::new(Classes {
                defs: Vec::new(),
                by_name: HashMap::new(),
            }),
            members: RwLock::new(HashMap::new()),
        };
        let builtins = [
            ClassBuilder::new("Exception").field_with_access("message", Type::Str, Access::ReadOnly),
            ClassBuilder::new("DivideByZeroException").extends(ClassId::EXCEPTION),
            ClassBuilder::new("NullReferenceException").extends(ClassId::EXCEPTION),
            ClassBuilder::new("InvalidCastException").extends(ClassId::EXCEPTION),
            ClassBuilder::new("IndexOutOfRangeException").extends(ClassId::EXCEPTION),
        ];
        for (expected, builder) in builtins.into_iter().enumerate() {
            let id = registry
                .register(builder)
                .expect("built-in classes have distinct fields");
            debug_assert_eq!(id.index(), expected);
        }
        registry
    }

    pub(crate) fn register(&self, builder: ClassBuilder) -> Result<ClassId, ExprError> {
        let mut classes = self.classes.write();
        let id = ClassId(classes.defs.len() as u32);

        let mut fields = match builder.base {
            Some(base) => classes.defs[base.index()].fields.clone(),
            None => Vec::new(),
        };
        let inherited = fields.len();
        for (i, def) in builder.fields.into_iter().enumerate() {
            if fields[inherited..].iter().any(|f| f.name() == def.name) {
                return Err(ExprError::DuplicateMember {
                    class: builder.name.to_string(),
                    member: def.name.to_string(),
                });
            }
            fields.push(FieldRef {
                declaring: id,
                index: (inherited + i) as u32,
                def: Arc::new(def),
            });
        }

        let methods = builder
            .methods
            .into_iter()
            .map(|m| MethodInfo::instance(id, m.name, m.params, m.ret, m.body))
            .collect();

        classes.defs.push(Arc::new(ClassDef {
            id,
            name: builder.name.clone(),
            base: builder.base,
            fields,
            methods,
        }));
        classes.by_name.insert(builder.name, id);
        tracing::debug!(class = id.index(), "Registered class");
        Ok(id)
    }

    pub fn get(&self, id: ClassId) -> Arc<ClassDef> {
        self.classes.read().defs[id.index()].clone()
    }

    /// Looks up a class by name. If several classes share a name the most
    /// recently registered one wins.
    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.classes.read().by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.classes.read().defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn derives_from(&self, derived: ClassId, base: ClassId) -> bool {
        let classes = self.classes.read();
        let mut current = Some(derived);
        while let Some(id) = current {
            if id == base {
                return true;
            }
            current = classes.defs[id.index()].base;
        }
        false
    }

    pub fn find_field(&self, class: ClassId, name: &str) -> Option<FieldRef> {
        self.members(class, name).field.clone()
    }

    /// All methods named `name` visible on `class`, most derived first.
    pub fn find_methods(&self, class: ClassId, name: &str) -> Vec<Arc<MethodInfo>> {
        self.members(class, name).methods.clone()
    }

    fn members(&self, class: ClassId, name: &str) -> Arc<Members> {
        let key = (class, EcoString::from(name));
        if let Some(found) = self.members.read().get(&key) {
            return found.clone();
        }

        let mut resolved = Members::default();
        let mut current = Some(class);
        while let Some(id) = current {
            let def = self.get(id);
            if resolved.field.is_none() && id == class {
                resolved.field = def.field(name).cloned();
            }
            resolved
                .methods
                .extend(def.methods.iter().filter(|m| m.name() == name).cloned());
            current = def.base;
        }

        let resolved = Arc::new(resolved);
        self.members
            .write()
            .entry(key)
            .or_insert_with(|| resolved.clone())
            .clone()
    }
}
