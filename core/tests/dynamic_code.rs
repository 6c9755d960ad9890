//! Compiled lambdas that contain `Dynamic` nodes: every node gets its own
//! call site, shared by all threads running the delegate.

use std::sync::Arc;

use dynex_core::expr::BinaryOp;
use dynex_core::values::Instance;
use dynex_core::{
    CacheOptions, ClassBuilder, ClassId, CompileOptions, DefaultBinder, Delegate, Expr, Parameter,
    SharedRuleCache, SiteState, Type, Value, compile,
};
use once_cell::sync::Lazy;
use pretty_assertions::assert_eq;

static POINT: Lazy<ClassId> = Lazy::new(|| {
    ClassBuilder::new("DynamicCodePoint")
        .field("x", Type::Int)
        .field("label", Type::Str)
        .register()
        .unwrap()
});

fn point(x: i64, label: &str) -> Value {
    Value::Object(Instance::new(*POINT, vec![Value::Int(x), Value::str(label)]))
}

/// `(a, b) => a + b`, resolved at run time.
fn dynamic_add(options: &CompileOptions) -> Delegate {
    let a = Parameter::new(Type::Object, "a").unwrap();
    let b = Parameter::new(Type::Object, "b").unwrap();
    let body = Expr::make_dynamic(
        Arc::new(DefaultBinder::binary(BinaryOp::Add)),
        Type::Object,
        vec![a.to_expr(), b.to_expr()],
    )
    .unwrap();
    let lambda = Expr::lambda(Some("dynamic_add"), vec![a, b], body).unwrap();
    compile(&lambda, options).unwrap()
}

#[test]
fn test_dynamic_node_dispatches_on_runtime_types() {
    let add = dynamic_add(&CompileOptions::default());
    assert_eq!(add.code().sites.len(), 1);

    assert_eq!(add.invoke(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
    assert_eq!(add.invoke(&[Value::Float(0.5), Value::Int(2)]).unwrap(), Value::Float(2.5));
    assert_eq!(
        add.invoke(&[Value::str("ab"), Value::str("cd")]).unwrap(),
        Value::str("abcd")
    );

    let site = &add.code().sites[0];
    assert_eq!(site.rule_count(), 3);
    assert_eq!(site.state(), SiteState::Polymorphic);
}

#[test]
fn test_cache_results_match_fresh_binding() {
    let cached = dynamic_add(&CompileOptions::default());
    let inputs = [
        [Value::Int(1), Value::Int(2)],
        [Value::Float(1.0), Value::Float(2.0)],
        [Value::Int(5), Value::Int(-5)],
        [Value::str("x"), Value::str("y")],
        [Value::Int(7), Value::Float(0.25)],
        [Value::Int(1), Value::Int(2)],
    ];
    for args in &inputs {
        // A new delegate has an empty site, so this binds from scratch.
        let fresh = dynamic_add(&CompileOptions::default());
        assert_eq!(cached.invoke(args).unwrap(), fresh.invoke(args).unwrap());
    }
}

#[test]
fn test_small_cache_evicts_without_changing_results() {
    let options = CompileOptions::default().with_cache_options(CacheOptions::default().with_capacity(1));
    let add = dynamic_add(&options);
    for _ in 0..3 {
        assert_eq!(add.invoke(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
        assert_eq!(add.invoke(&[Value::str("a"), Value::str("b")]).unwrap(), Value::str("ab"));
    }
    let site = &add.code().sites[0];
    assert_eq!(site.rule_count(), 1);
    assert_eq!(site.state(), SiteState::Megamorphic);
}

#[test]
fn test_member_access_through_binder() {
    let target = Parameter::new(Type::Object, "target").unwrap();
    let body = Expr::make_dynamic(Arc::new(DefaultBinder::get_member("x")), Type::Int, vec![target.to_expr()]).unwrap();
    let lambda = Expr::lambda(None, vec![target], body).unwrap();
    let get_x = compile(&lambda, &CompileOptions::default()).unwrap();

    assert_eq!(get_x.invoke(&[point(4, "a")]).unwrap(), Value::Int(4));
    assert_eq!(get_x.invoke(&[point(9, "b")]).unwrap(), Value::Int(9));
    assert_eq!(get_x.code().sites[0].rule_count(), 1);

    let err = get_x.invoke(&[Value::Null]).unwrap_err();
    assert!(err.is_thrown(ClassId::NULL_REFERENCE), "{err}");
}

#[test]
fn test_shared_rules_across_compilations() {
    let shared = Arc::new(SharedRuleCache::new());
    let options = CompileOptions::default().with_shared_rules(shared.clone());
    let first = dynamic_add(&options);
    let second = dynamic_add(&options);

    first.invoke(&[Value::Int(1), Value::Int(1)]).unwrap();
    assert_eq!(second.invoke(&[Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
    let stats = second.code().sites[0].stats();
    assert_eq!(stats.binds, 0);
    assert_eq!(stats.shared_hits, 1);
}

#[test]
fn test_concurrent_callers_share_one_site() {
    let add = dynamic_add(&CompileOptions::default());

    std::thread::scope(|scope| {
        for t in 0..4_i64 {
            let add = add.clone();
            scope.spawn(move || {
                for i in 0..100 {
                    assert_eq!(add.invoke(&[Value::Int(i), Value::Int(t)]).unwrap(), Value::Int(i + t));
                    assert_eq!(
                        add.invoke(&[Value::Float(0.5), Value::Float(0.5)]).unwrap(),
                        Value::Float(1.0)
                    );
                }
            });
        }
    });

    let site = &add.code().sites[0];
    assert_eq!(site.rule_count(), 2);
    let stats = site.stats();
    assert_eq!(stats.hits + stats.misses, 800);
}
