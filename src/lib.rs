//! Dynex - dynamic call-site caching and an expression-tree compiler
//!
//! # Overview
//!
//! Dynex lets a language runtime resolve dynamic operations (member access,
//! operators, invocation, conversions) at run time and cache the result per
//! call site. Host code builds validated expression trees, compiles them to
//! invocable delegates, and embeds `Dynamic` nodes wherever an operation can
//! only be resolved once the argument types are known.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use dynex::{compile, CompileOptions, DefaultBinder, Expr, Parameter, Type, Value};
//! use dynex::expr::BinaryOp;
//!
//! // `(a, b) => a + b`, where `+` is resolved per argument types.
//! let a = Parameter::new(Type::Object, "a").unwrap();
//! let b = Parameter::new(Type::Object, "b").unwrap();
//! let body = Expr::make_dynamic(
//!     Arc::new(DefaultBinder::binary(BinaryOp::Add)),
//!     Type::Object,
//!     vec![a.to_expr(), b.to_expr()],
//! )
//! .unwrap();
//! let lambda = Expr::lambda(Some("add"), vec![a, b], body).unwrap();
//!
//! let add = compile(&lambda, &CompileOptions::default()).unwrap();
//! assert_eq!(add.invoke(&[Value::Int(40), Value::Int(2)]).unwrap(), Value::Int(42));
//! assert_eq!(add.invoke(&[Value::str("a"), Value::str("b")]).unwrap(), Value::str("ab"));
//! ```
//!
//! # Custom binders
//!
//! Implement [`CallSiteBinder`] to plug in the semantics of another
//! language. A binder returns a [`Rule`]: restrictions on the argument
//! shapes plus the tree that implements the operation for them.

// Re-export public API from dynex_core
pub use dynex_core::{
    ArgumentShape, BindError, BindRequest, CacheOptions, CallSite, CallSiteBinder, ClassBuilder, ClassId,
    CompileError, CompileOptions, DefaultBinder, Delegate, Error, Expr, ExprError, LabelTarget, Lambda,
    MethodBody, NodeKind, Operation, Parameter, Rule, RuntimeError, SharedRuleCache, Signature, SiteState,
    StrongBox, SwitchPolicy, Type, Value, compile, compile_to_method,
};

// Modules for the less common parts of the API
pub use dynex_core::{binder, compare, expr, site, types, values, vm};
