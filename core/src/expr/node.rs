//! Node definitions.
//!
//! An [`Expr`] is a cheap handle (`Arc`) to an immutable [`Node`]: a static
//! type plus an [`ExprKind`]. Nodes are only created by the validating
//! factories in `factory.rs`; the crate-private constructor is used by
//! rewriting passes that rebuild nodes whose children keep their types.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ecow::EcoString;
use smallvec::SmallVec;

use super::ExprError;
use crate::binder::CallSiteBinder;
use crate::types::{ClassId, FieldRef, MethodInfo, Signature, Type};
use crate::values::Value;

/// Inline storage for operand lists; most calls and dynamic operations have
/// four or fewer arguments.
pub type Args = SmallVec<[Expr; 4]>;

static NEXT_PARAMETER_ID: AtomicU32 = AtomicU32::new(0);
static NEXT_LABEL_ID: AtomicU32 = AtomicU32::new(0);

/// Identity of a variable. Allocated from a process-wide counter, so two
/// parameters are the same variable iff their ids are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ParamId(u32);

/// Identity of a jump target.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct LabelId(u32);

struct ParameterData {
    id: ParamId,
    name: Option<EcoString>,
    ty: Type,
    by_ref: bool,
}

/// A variable: lambda parameter, block variable, catch variable or
/// compiler temporary.
#[derive(Clone)]
pub struct Parameter(Arc<ParameterData>);

impl Parameter {
    pub fn new(ty: Type, name: &str) -> Result<Self, ExprError> {
        Self::make(ty, Some(name.into()), false)
    }

    pub fn unnamed(ty: Type) -> Result<Self, ExprError> {
        Self::make(ty, None, false)
    }

    /// A by-ref lambda parameter. The caller passes storage the callee reads
    /// and writes through.
    pub fn by_ref(ty: Type, name: &str) -> Result<Self, ExprError> {
        Self::make(ty, Some(name.into()), true)
    }

    fn make(ty: Type, name: Option<EcoString>, by_ref: bool) -> Result<Self, ExprError> {
        if ty.is_void() {
            return Err(ExprError::VoidParameter);
        }
        Ok(Parameter(Arc::new(ParameterData {
            id: ParamId(NEXT_PARAMETER_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            ty,
            by_ref,
        })))
    }

    /// Temporaries introduced by rewriting passes. Never void.
    pub(crate) fn temp(ty: &Type, name: &str) -> Self {
        debug_assert!(!ty.is_void());
        Parameter(Arc::new(ParameterData {
            id: ParamId(NEXT_PARAMETER_ID.fetch_add(1, Ordering::Relaxed)),
            name: Some(name.into()),
            ty: ty.clone(),
            by_ref: false,
        }))
    }

    pub fn id(&self) -> ParamId {
        self.0.id
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn ty(&self) -> &Type {
        &self.0.ty
    }

    pub fn is_by_ref(&self) -> bool {
        self.0.by_ref
    }

    /// A read of this variable.
    pub fn to_expr(&self) -> Expr {
        Expr::new(self.0.ty.clone(), ExprKind::Parameter(self.clone()))
    }

    pub(crate) fn display_name(&self) -> String {
        match &self.0.name {
            Some(name) => name.to_string(),
            None => format!("var{}", self.0.id.0),
        }
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Parameter {}

impl core::hash::Hash for Parameter {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}: {:?}", self.display_name(), self.0.ty)
    }
}

struct LabelData {
    id: LabelId,
    name: Option<EcoString>,
    ty: Type,
}

/// A jump target. `Goto` nodes jump to it; a `Label` node or a `Loop`
/// defines where it is.
#[derive(Clone)]
pub struct LabelTarget(Arc<LabelData>);

impl LabelTarget {
    pub fn new(ty: Type, name: Option<&str>) -> Self {
        LabelTarget(Arc::new(LabelData {
            id: LabelId(NEXT_LABEL_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.map(EcoString::from),
            ty,
        }))
    }

    pub fn void(name: &str) -> Self {
        Self::new(Type::Void, Some(name))
    }

    pub fn id(&self) -> LabelId {
        self.0.id
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// Type of the value carried by jumps to this label.
    pub fn ty(&self) -> &Type {
        &self.0.ty
    }

    pub(crate) fn display_name(&self) -> String {
        match &self.0.name {
            Some(name) => name.to_string(),
            None => format!("label{}", self.0.id.0),
        }
    }
}

impl PartialEq for LabelTarget {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for LabelTarget {}

impl core::hash::Hash for LabelTarget {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for LabelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.display_name(), self.0.ty)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NodeKind {
    Constant,
    Parameter,
    Default,
    Unary,
    Binary,
    TypeBinary,
    MemberAccess,
    Index,
    Call,
    Invoke,
    New,
    NewArray,
    Conditional,
    Loop,
    Block,
    Goto,
    Label,
    Switch,
    Try,
    Throw,
    Lambda,
    Dynamic,
    MemberInit,
    ListInit,
    Increment,
    CompoundAssign,
    Extension,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum UnaryOp {
    Negate,
    /// Logical not on `bool`, bitwise complement on `int`.
    Not,
    OnesComplement,
    /// Conversion to the node's type.
    Convert,
    /// The runtime type of the operand as a type token.
    TypeOf,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
    ExclusiveOr,
    LeftShift,
    RightShift,
    AndAlso,
    OrElse,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Assign,
}

impl BinaryOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo
        )
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::And | BinaryOp::Or | BinaryOp::ExclusiveOr | BinaryOp::LeftShift | BinaryOp::RightShift
        )
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Equal | BinaryOp::NotEqual)
    }

    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::ExclusiveOr => "^",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
            BinaryOp::AndAlso => "&&",
            BinaryOp::OrElse => "||",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::Assign => "=",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "!",
            UnaryOp::OnesComplement => "~",
            UnaryOp::Convert => "convert",
            UnaryOp::TypeOf => "typeof",
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TypeTestOp {
    /// Operand's runtime type is the test type or derives from it.
    TypeIs,
    /// Operand's runtime type is exactly the test type.
    TypeEqual,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GotoKind {
    Goto,
    Return,
    Break,
    Continue,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum IncrementKind {
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
}

impl IncrementKind {
    pub fn is_post(self) -> bool {
        matches!(self, IncrementKind::PostIncrement | IncrementKind::PostDecrement)
    }

    pub fn op(self) -> BinaryOp {
        match self {
            IncrementKind::PreIncrement | IncrementKind::PostIncrement => BinaryOp::Add,
            IncrementKind::PreDecrement | IncrementKind::PostDecrement => BinaryOp::Subtract,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SwitchCase {
    pub(crate) values: Vec<Value>,
    pub(crate) body: Expr,
}

impl SwitchCase {
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }
}

#[derive(Clone, Debug)]
pub struct CatchBlock {
    pub(crate) test: Type,
    pub(crate) variable: Option<Parameter>,
    pub(crate) body: Expr,
}

impl CatchBlock {
    /// The exception class this handler catches (including derived ones).
    pub fn test(&self) -> &Type {
        &self.test
    }

    pub fn variable(&self) -> Option<&Parameter> {
        self.variable.as_ref()
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }
}

#[derive(Clone, Debug)]
pub struct MemberBinding {
    pub(crate) field: FieldRef,
    pub(crate) value: Expr,
}

impl MemberBinding {
    pub fn field(&self) -> &FieldRef {
        &self.field
    }

    pub fn value(&self) -> &Expr {
        &self.value
    }
}

#[derive(Debug)]
pub struct LambdaNode {
    pub(crate) name: Option<EcoString>,
    pub(crate) params: Vec<Parameter>,
    pub(crate) body: Expr,
    pub(crate) signature: Arc<Signature>,
}

/// A user-defined node. Extensions that can reduce are lowered to built-in
/// nodes before compilation; ones that cannot are rejected by the compiler.
pub trait ExtensionNode: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn ty(&self) -> Type;

    fn can_reduce(&self) -> bool {
        false
    }

    fn reduce(&self) -> Result<Expr, ExprError> {
        Err(ExprError::NotReducible(self.name().into()))
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Constant(Value),
    Parameter(Parameter),
    /// The default value of the node type.
    Default,
    Unary {
        op: UnaryOp,
        operand: Expr,
    },
    Binary {
        op: BinaryOp,
        left: Expr,
        right: Expr,
    },
    TypeBinary {
        op: TypeTestOp,
        operand: Expr,
        test: Type,
    },
    Member {
        object: Expr,
        field: FieldRef,
    },
    Index {
        object: Expr,
        index: Expr,
    },
    Call {
        object: Option<Expr>,
        method: Arc<MethodInfo>,
        args: Args,
    },
    Invoke {
        target: Expr,
        args: Args,
    },
    New {
        class: ClassId,
        args: Args,
    },
    NewArray {
        items: Args,
    },
    Conditional {
        test: Expr,
        if_true: Expr,
        if_false: Expr,
    },
    Loop {
        body: Expr,
        break_label: Option<LabelTarget>,
        continue_label: Option<LabelTarget>,
    },
    Block {
        variables: Vec<Parameter>,
        exprs: Args,
    },
    Goto {
        kind: GotoKind,
        target: LabelTarget,
        value: Option<Expr>,
    },
    Label {
        target: LabelTarget,
        default: Option<Expr>,
    },
    Switch {
        value: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Expr>,
    },
    Try {
        body: Expr,
        handlers: Vec<CatchBlock>,
        finally: Option<Expr>,
        fault: Option<Expr>,
    },
    /// `value: None` rethrows the exception being handled.
    Throw {
        value: Option<Expr>,
    },
    Lambda(Arc<LambdaNode>),
    Dynamic {
        binder: Arc<dyn CallSiteBinder>,
        args: Args,
    },
    MemberInit {
        new: Expr,
        bindings: Vec<MemberBinding>,
    },
    ListInit {
        array: Expr,
        items: Args,
    },
    Increment {
        kind: IncrementKind,
        operand: Expr,
    },
    CompoundAssign {
        op: BinaryOp,
        target: Expr,
        value: Expr,
    },
    Extension(Arc<dyn ExtensionNode>),
}

#[derive(Debug)]
pub struct Node {
    ty: Type,
    kind: ExprKind,
}

/// An immutable, shareable expression tree.
#[derive(Clone)]
pub struct Expr(Arc<Node>);

impl Expr {
    /// Builds a node without validation. Callers guarantee `ty` is what the
    /// factory would have computed for `kind`.
    pub(crate) fn new(ty: Type, kind: ExprKind) -> Expr {
        Expr(Arc::new(Node { ty, kind }))
    }

    pub fn ty(&self) -> &Type {
        &self.0.ty
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    pub fn node_kind(&self) -> NodeKind {
        match &self.0.kind {
            ExprKind::Constant(_) => NodeKind::Constant,
            ExprKind::Parameter(_) => NodeKind::Parameter,
            ExprKind::Default => NodeKind::Default,
            ExprKind::Unary { .. } => NodeKind::Unary,
            ExprKind::Binary { .. } => NodeKind::Binary,
            ExprKind::TypeBinary { .. } => NodeKind::TypeBinary,
            ExprKind::Member { .. } => NodeKind::MemberAccess,
            ExprKind::Index { .. } => NodeKind::Index,
            ExprKind::Call { .. } => NodeKind::Call,
            ExprKind::Invoke { .. } => NodeKind::Invoke,
            ExprKind::New { .. } => NodeKind::New,
            ExprKind::NewArray { .. } => NodeKind::NewArray,
            ExprKind::Conditional { .. } => NodeKind::Conditional,
            ExprKind::Loop { .. } => NodeKind::Loop,
            ExprKind::Block { .. } => NodeKind::Block,
            ExprKind::Goto { .. } => NodeKind::Goto,
            ExprKind::Label { .. } => NodeKind::Label,
            ExprKind::Switch { .. } => NodeKind::Switch,
            ExprKind::Try { .. } => NodeKind::Try,
            ExprKind::Throw { .. } => NodeKind::Throw,
            ExprKind::Lambda(_) => NodeKind::Lambda,
            ExprKind::Dynamic { .. } => NodeKind::Dynamic,
            ExprKind::MemberInit { .. } => NodeKind::MemberInit,
            ExprKind::ListInit { .. } => NodeKind::ListInit,
            ExprKind::Increment { .. } => NodeKind::Increment,
            ExprKind::CompoundAssign { .. } => NodeKind::CompoundAssign,
            ExprKind::Extension(_) => NodeKind::Extension,
        }
    }

    pub fn ptr_eq(a: &Expr, b: &Expr) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Whether this node is sugar that [`reduce`](Expr::reduce) lowers.
    pub fn can_reduce(&self) -> bool {
        match &self.0.kind {
            ExprKind::MemberInit { .. }
            | ExprKind::ListInit { .. }
            | ExprKind::Increment { .. }
            | ExprKind::CompoundAssign { .. } => true,
            ExprKind::Extension(ext) => ext.can_reduce(),
            _ => false,
        }
    }

    pub fn as_parameter(&self) -> Option<&Parameter> {
        match &self.0.kind {
            ExprKind::Parameter(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match &self.0.kind {
            ExprKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Sub-expressions in evaluation order.
    pub fn children(&self) -> SmallVec<[&Expr; 4]> {
        let mut out = SmallVec::new();
        match &self.0.kind {
            ExprKind::Constant(_)
            | ExprKind::Parameter(_)
            | ExprKind::Default
            | ExprKind::Extension(_) => {}
            ExprKind::Unary { operand, .. }
            | ExprKind::TypeBinary { operand, .. }
            | ExprKind::Increment { operand, .. } => out.push(operand),
            ExprKind::Binary { left, right, .. } => {
                out.push(left);
                out.push(right);
            }
            ExprKind::CompoundAssign { target, value, .. } => {
                out.push(target);
                out.push(value);
            }
            ExprKind::Member { object, .. } => out.push(object),
            ExprKind::Index { object, index } => {
                out.push(object);
                out.push(index);
            }
            ExprKind::Call { object, args, .. } => {
                out.extend(object.iter());
                out.extend(args.iter());
            }
            ExprKind::Invoke { target, args } => {
                out.push(target);
                out.extend(args.iter());
            }
            ExprKind::New { args, .. } | ExprKind::Dynamic { args, .. } => out.extend(args.iter()),
            ExprKind::NewArray { items } => out.extend(items.iter()),
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => {
                out.push(test);
                out.push(if_true);
                out.push(if_false);
            }
            ExprKind::Loop { body, .. } => out.push(body),
            ExprKind::Block { exprs, .. } => out.extend(exprs.iter()),
            ExprKind::Goto { value, .. } => out.extend(value.iter()),
            ExprKind::Label { default, .. } => out.extend(default.iter()),
            ExprKind::Switch {
                value,
                cases,
                default,
            } => {
                out.push(value);
                out.extend(cases.iter().map(|case| &case.body));
                out.extend(default.iter());
            }
            ExprKind::Try {
                body,
                handlers,
                finally,
                fault,
            } => {
                out.push(body);
                out.extend(handlers.iter().map(|handler| &handler.body));
                out.extend(finally.iter());
                out.extend(fault.iter());
            }
            ExprKind::Throw { value } => out.extend(value.iter()),
            ExprKind::Lambda(lambda) => out.push(&lambda.body),
            ExprKind::MemberInit { new, bindings } => {
                out.push(new);
                out.extend(bindings.iter().map(|binding| &binding.value));
            }
            ExprKind::ListInit { array, items } => {
                out.push(array);
                out.extend(items.iter());
            }
        }
        out
    }

    /// Rebuilds this node with new children, given in the order
    /// [`children`](Expr::children) returns them. Every replacement must have
    /// the same static type as the child it replaces, so the node type is
    /// kept.
    pub(crate) fn with_children(&self, children: Vec<Expr>) -> Expr {
        debug_assert_eq!(children.len(), self.children().len());
        let mut it = children.into_iter();
        let mut next = || it.next().expect("child count matches children()");
        let kind = match &self.0.kind {
            ExprKind::Constant(_)
            | ExprKind::Parameter(_)
            | ExprKind::Default
            | ExprKind::Extension(_) => return self.clone(),
            ExprKind::Unary { op, .. } => ExprKind::Unary {
                op: *op,
                operand: next(),
            },
            ExprKind::TypeBinary { op, test, .. } => ExprKind::TypeBinary {
                op: *op,
                operand: next(),
                test: test.clone(),
            },
            ExprKind::Increment { kind, .. } => ExprKind::Increment {
                kind: *kind,
                operand: next(),
            },
            ExprKind::Binary { op, .. } => ExprKind::Binary {
                op: *op,
                left: next(),
                right: next(),
            },
            ExprKind::CompoundAssign { op, .. } => ExprKind::CompoundAssign {
                op: *op,
                target: next(),
                value: next(),
            },
            ExprKind::Member { field, .. } => ExprKind::Member {
                object: next(),
                field: field.clone(),
            },
            ExprKind::Index { .. } => ExprKind::Index {
                object: next(),
                index: next(),
            },
            ExprKind::Call {
                object,
                method,
                args,
            } => ExprKind::Call {
                object: object.as_ref().map(|_| next()),
                method: method.clone(),
                args: args.iter().map(|_| next()).collect(),
            },
            ExprKind::Invoke { args, .. } => ExprKind::Invoke {
                target: next(),
                args: args.iter().map(|_| next()).collect(),
            },
            ExprKind::New { class, args } => ExprKind::New {
                class: *class,
                args: args.iter().map(|_| next()).collect(),
            },
            ExprKind::Dynamic { binder, args } => ExprKind::Dynamic {
                binder: binder.clone(),
                args: args.iter().map(|_| next()).collect(),
            },
            ExprKind::NewArray { items } => ExprKind::NewArray {
                items: items.iter().map(|_| next()).collect(),
            },
            ExprKind::Conditional { .. } => ExprKind::Conditional {
                test: next(),
                if_true: next(),
                if_false: next(),
            },
            ExprKind::Loop {
                break_label,
                continue_label,
                ..
            } => ExprKind::Loop {
                body: next(),
                break_label: break_label.clone(),
                continue_label: continue_label.clone(),
            },
            ExprKind::Block { variables, exprs } => ExprKind::Block {
                variables: variables.clone(),
                exprs: exprs.iter().map(|_| next()).collect(),
            },
            ExprKind::Goto {
                kind,
                target,
                value,
            } => ExprKind::Goto {
                kind: *kind,
                target: target.clone(),
                value: value.as_ref().map(|_| next()),
            },
            ExprKind::Label { target, default } => ExprKind::Label {
                target: target.clone(),
                default: default.as_ref().map(|_| next()),
            },
            ExprKind::Switch { cases, default, .. } => {
                let value = next();
                let cases = cases
                    .iter()
                    .map(|case| SwitchCase {
                        values: case.values.clone(),
                        body: next(),
                    })
                    .collect();
                ExprKind::Switch {
                    value,
                    cases,
                    default: default.as_ref().map(|_| next()),
                }
            }
            ExprKind::Try {
                handlers,
                finally,
                fault,
                ..
            } => {
                let body = next();
                let handlers = handlers
                    .iter()
                    .map(|handler| CatchBlock {
                        test: handler.test.clone(),
                        variable: handler.variable.clone(),
                        body: next(),
                    })
                    .collect();
                ExprKind::Try {
                    body,
                    handlers,
                    finally: finally.as_ref().map(|_| next()),
                    fault: fault.as_ref().map(|_| next()),
                }
            }
            ExprKind::Throw { value } => ExprKind::Throw {
                value: value.as_ref().map(|_| next()),
            },
            ExprKind::Lambda(lambda) => ExprKind::Lambda(Arc::new(LambdaNode {
                name: lambda.name.clone(),
                params: lambda.params.clone(),
                body: next(),
                signature: lambda.signature.clone(),
            })),
            ExprKind::MemberInit { bindings, .. } => {
                let new = next();
                ExprKind::MemberInit {
                    new,
                    bindings: bindings
                        .iter()
                        .map(|binding| MemberBinding {
                            field: binding.field.clone(),
                            value: next(),
                        })
                        .collect(),
                }
            }
            ExprKind::ListInit { items, .. } => {
                let array = next();
                ExprKind::ListInit {
                    array,
                    items: items.iter().map(|_| next()).collect(),
                }
            }
        };
        Expr::new(self.0.ty.clone(), kind)
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            f.debug_struct("Expr")
                .field("ty", &self.0.ty)
                .field("kind", &self.0.kind)
                .finish()
        } else {
            write!(f, "{}", self)
        }
    }
}

/// A lambda expression. Dereferences to the underlying [`Expr`].
#[derive(Clone)]
pub struct Lambda(Expr);

impl Lambda {
    pub(crate) fn from_expr(expr: Expr) -> Option<Lambda> {
        matches!(expr.kind(), ExprKind::Lambda(_)).then_some(Lambda(expr))
    }

    pub(crate) fn node(&self) -> &LambdaNode {
        match self.0.kind() {
            ExprKind::Lambda(node) => node,
            _ => unreachable!("Lambda always wraps a lambda node"),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.node().name.as_deref()
    }

    pub fn params(&self) -> &[Parameter] {
        &self.node().params
    }

    pub fn body(&self) -> &Expr {
        &self.node().body
    }

    pub fn signature(&self) -> &Arc<Signature> {
        &self.node().signature
    }

    pub fn return_type(&self) -> &Type {
        &self.node().signature.ret
    }

    pub fn as_expr(&self) -> &Expr {
        &self.0
    }

    pub fn into_expr(self) -> Expr {
        self.0
    }
}

impl core::ops::Deref for Lambda {
    type Target = Expr;

    fn deref(&self) -> &Expr {
        &self.0
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
