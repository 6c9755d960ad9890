//! Dynex core: dynamic call-site caching and an expression-tree compiler.
//!
//! The crate is organised in layers, leaves first:
//!
//! - [`types`]: static types, the process-wide class registry, fields and
//!   native methods.
//! - [`values`]: runtime values, object instances, strong boxes and
//!   [`Delegate`]s (invocable compiled lambdas).
//! - [`expr`]: the immutable expression tree. Every node is built through a
//!   validating factory on [`Expr`], so a tree that exists is well typed.
//! - [`compare`]: structural tree comparison used to generalize cached rules.
//! - [`binder`]: the binder protocol. A binder turns an operation plus the
//!   shapes of the actual arguments into a [`Rule`].
//! - [`site`]: per-site rule caches ([`CallSite`]) and the optional shared
//!   rule cache.
//! - [`compiler`]: stack spilling and lowering of lambdas to VM code.
//! - [`vm`]: the instruction set and the interpreter that runs it.
//!
//! # Example
//!
//! ```
//! use dynex_core::{compile, CompileOptions, Expr, Parameter, Type, Value};
//! use dynex_core::expr::BinaryOp;
//!
//! let x = Parameter::new(Type::Int, "x").unwrap();
//! let body = Expr::make_binary(BinaryOp::Add, x.to_expr(), Expr::constant(Value::Int(1))).unwrap();
//! let lambda = Expr::lambda(Some("inc"), vec![x], body).unwrap();
//!
//! let inc = compile(&lambda, &CompileOptions::default()).unwrap();
//! assert_eq!(inc.invoke(&[Value::Int(41)]).unwrap().as_int(), Some(42));
//! ```

pub mod binder;
pub mod compare;
pub mod compiler;
pub mod error;
pub mod expr;
pub mod options;
pub mod site;
pub mod types;
pub mod values;
pub mod vm;

pub use binder::{ArgumentShape, BindRequest, CallSiteBinder, DefaultBinder, Operation, Rule};
pub use compiler::{MethodBody, compile, compile_to_method};
pub use error::{BindError, CompileError, Error, ExprError, RuntimeError};
pub use expr::{Expr, LabelTarget, Lambda, NodeKind, Parameter};
pub use options::{CacheOptions, CompileOptions, SwitchPolicy};
pub use site::{CallSite, SharedRuleCache, SiteState};
pub use types::{ClassBuilder, ClassId, Signature, Type};
pub use values::{Delegate, StrongBox, Value};

static_assertions::assert_impl_all!(Expr: Send, Sync);
static_assertions::assert_impl_all!(CallSite: Send, Sync);
static_assertions::assert_impl_all!(Delegate: Send, Sync);
static_assertions::assert_impl_all!(Value: Send, Sync);

/// Test utilities for enabling logging in tests
#[cfg(test)]
pub mod test_utils {
    /// Initialize tracing subscriber for tests with DEBUG level
    /// Call this at the start of tests where you want to see logging output
    ///
    /// # Example
    /// ```ignore
    /// #[test]
    /// fn test_site_generalization() {
    ///     test_utils::init_test_logging();
    ///     // ... your test code
    /// }
    /// ```
    pub fn init_test_logging() {
        use tracing_subscriber::{EnvFilter, fmt};

        // Try to initialize, ignore error if already initialized
        let _ = fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    }
}
