use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use super::*;
use crate::binder::{DefaultBinder, Operation, Restriction, Restrictions, Rule};
use crate::expr::BinaryOp;

fn add_site(ret: Type) -> CallSite {
    CallSite::new(
        Arc::new(DefaultBinder::binary(BinaryOp::Add)),
        Signature::new([Type::Object, Type::Object], ret),
        CacheOptions::default(),
        None,
    )
}

/// Returns `a + b` for constants chosen by the argument's runtime type, so
/// rules for different types differ only in constants.
#[derive(Debug)]
struct TaggingBinder {
    operation: Operation,
    binds: AtomicUsize,
}

impl TaggingBinder {
    fn new() -> Self {
        Self {
            operation: Operation::GetMember { name: "tag".into() },
            binds: AtomicUsize::new(0),
        }
    }
}

impl CallSiteBinder for TaggingBinder {
    fn operation(&self) -> &Operation {
        &self.operation
    }

    fn bind(&self, request: &BindRequest<'_>) -> Result<Rule, BindError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        let ty = request.runtime_type(0).clone();
        let (a, b) = match ty {
            Type::Int => (1, 10),
            Type::Str => (2, 10),
            Type::Bool => (3, 20),
            Type::Float => (4, 10),
            _ => {
                return Err(BindError::NoApplicableOperation {
                    operation: self.operation.to_string(),
                    args: request.runtime_types(),
                });
            }
        };
        let body = Expr::add(Expr::constant(Value::Int(a)), Expr::constant(Value::Int(b)))?;
        Ok(Rule::new(Restrictions::new([Restriction::Type(ty)]), body))
    }
}

fn tag_site(binder: Arc<TaggingBinder>, options: CacheOptions) -> CallSite {
    CallSite::new(binder, Signature::new([Type::Object], Type::Int), options, None)
}

#[test]
fn test_same_shape_reuses_rule() {
    let site = add_site(Type::Object);
    assert_eq!(site.state(), SiteState::Uninitialized);

    assert_eq!(site.invoke(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
    assert_eq!(site.invoke(&[Value::Int(3), Value::Int(4)]).unwrap(), Value::Int(7));
    assert_eq!(site.rule_count(), 1);
    assert_eq!(site.state(), SiteState::Monomorphic);

    let stats = site.stats();
    assert_eq!(stats.binds, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[test]
fn test_new_shape_adds_rule_without_replacing() {
    let site = add_site(Type::Object);
    site.invoke(&[Value::Int(1), Value::Int(2)]).unwrap();
    assert_eq!(
        site.invoke(&[Value::Float(1.5), Value::Float(2.5)]).unwrap(),
        Value::Float(4.0)
    );
    assert_eq!(site.rule_count(), 2);
    assert_eq!(site.state(), SiteState::Polymorphic);

    // The int rule is still there and still correct.
    assert_eq!(site.invoke(&[Value::Int(5), Value::Int(6)]).unwrap(), Value::Int(11));
    assert_eq!(site.stats().binds, 2);
}

#[test]
fn test_result_is_converted_to_site_type() {
    let site = add_site(Type::Float);
    assert_eq!(site.invoke(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Float(3.0));
}

#[test]
fn test_argument_count_is_checked() {
    let site = add_site(Type::Object);
    let err = site.invoke(&[Value::Int(1)]).unwrap_err();
    assert!(matches!(err, RuntimeError::ArgumentMismatch(_)), "{err}");
}

#[test]
fn test_binder_error_propagates_and_is_not_cached() {
    let binder = Arc::new(TaggingBinder::new());
    let site = tag_site(binder.clone(), CacheOptions::default());

    for _ in 0..2 {
        let err = site.invoke(&[Value::Null]).unwrap_err();
        assert!(matches!(err, RuntimeError::Bind(BindError::NoApplicableOperation { .. })), "{err}");
    }
    assert_eq!(binder.binds.load(Ordering::SeqCst), 2);
    assert_eq!(site.state(), SiteState::Uninitialized);
}

#[test]
fn test_rules_differing_in_constants_are_templated() {
    crate::test_utils::init_test_logging();
    let binder = Arc::new(TaggingBinder::new());
    let site = tag_site(binder.clone(), CacheOptions::default());

    assert_eq!(site.invoke(&[Value::Int(0)]).unwrap(), Value::Int(11));
    assert_eq!(site.invoke(&[Value::str("s")]).unwrap(), Value::Int(12));
    assert_eq!(site.rule_count(), 1);
    assert_eq!(site.template_count(), 1);
    assert_eq!(site.covered_shapes(), 2);

    // A shape that differs at an already templated position becomes a row.
    assert_eq!(site.invoke(&[Value::Float(0.5)]).unwrap(), Value::Int(14));
    assert_eq!(site.rule_count(), 1);
    assert_eq!(site.covered_shapes(), 3);

    // Earlier shapes are served from their rows.
    assert_eq!(site.invoke(&[Value::Int(9)]).unwrap(), Value::Int(11));
    assert_eq!(site.invoke(&[Value::str("t")]).unwrap(), Value::Int(12));
    assert_eq!(binder.binds.load(Ordering::SeqCst), 3);
    assert_eq!(site.stats().generalizations, 2);
}

#[test]
fn test_template_widens_for_new_differing_position() {
    let binder = Arc::new(TaggingBinder::new());
    let site = tag_site(binder, CacheOptions::default());

    site.invoke(&[Value::Int(0)]).unwrap();
    site.invoke(&[Value::str("s")]).unwrap();
    // Differs in the second addend too.
    assert_eq!(site.invoke(&[Value::Bool(true)]).unwrap(), Value::Int(23));
    assert_eq!(site.rule_count(), 1);
    assert_eq!(site.covered_shapes(), 3);

    assert_eq!(site.invoke(&[Value::Int(0)]).unwrap(), Value::Int(11));
    assert_eq!(site.invoke(&[Value::str("s")]).unwrap(), Value::Int(12));
    assert_eq!(site.invoke(&[Value::Bool(false)]).unwrap(), Value::Int(23));
}

#[test]
fn test_generalization_can_be_disabled() {
    let binder = Arc::new(TaggingBinder::new());
    let site = tag_site(binder, CacheOptions::default().with_generalize(false));
    site.invoke(&[Value::Int(0)]).unwrap();
    site.invoke(&[Value::str("s")]).unwrap();
    assert_eq!(site.rule_count(), 2);
    assert_eq!(site.template_count(), 0);
}

#[test]
fn test_eviction_makes_site_megamorphic() {
    let binder = Arc::new(TaggingBinder::new());
    let options = CacheOptions::default().with_capacity(2).with_generalize(false);
    let site = tag_site(binder.clone(), options);

    assert_eq!(site.invoke(&[Value::Int(0)]).unwrap(), Value::Int(11));
    assert_eq!(site.invoke(&[Value::str("s")]).unwrap(), Value::Int(12));
    assert_eq!(site.invoke(&[Value::Bool(true)]).unwrap(), Value::Int(23));
    assert_eq!(site.rule_count(), 2);
    assert_eq!(site.state(), SiteState::Megamorphic);
    assert_eq!(site.stats().evictions, 1);

    // The evicted int rule is rebound, with the same result.
    assert_eq!(site.invoke(&[Value::Int(0)]).unwrap(), Value::Int(11));
    assert_eq!(binder.binds.load(Ordering::SeqCst), 4);
}

#[test]
fn test_clear_drops_rules() {
    let site = add_site(Type::Object);
    site.invoke(&[Value::Int(1), Value::Int(2)]).unwrap();
    site.clear();
    assert_eq!(site.state(), SiteState::Uninitialized);
    assert_eq!(site.invoke(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
    assert_eq!(site.stats().binds, 2);
}

#[test]
fn test_shared_cache_serves_other_sites() {
    let shared = Arc::new(SharedRuleCache::new());
    let first = add_site(Type::Object).with_shared_cache(shared.clone());
    let second = add_site(Type::Object).with_shared_cache(shared.clone());

    first.invoke(&[Value::Int(1), Value::Int(2)]).unwrap();
    assert_eq!(shared.len(), 1);

    assert_eq!(second.invoke(&[Value::Int(2), Value::Int(2)]).unwrap(), Value::Int(4));
    let stats = second.stats();
    assert_eq!(stats.binds, 0);
    assert_eq!(stats.shared_hits, 1);
    assert_eq!(second.rule_count(), 1);
}

#[test]
fn test_shared_cache_separates_signatures() {
    let shared = Arc::new(SharedRuleCache::new());
    let object_site = add_site(Type::Object).with_shared_cache(shared.clone());
    let float_site = add_site(Type::Float).with_shared_cache(shared.clone());

    object_site.invoke(&[Value::Int(1), Value::Int(2)]).unwrap();
    assert_eq!(float_site.invoke(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Float(3.0));
    assert_eq!(float_site.stats().shared_hits, 0);
    assert_eq!(shared.len(), 2);
}

#[test]
fn test_restrictions_must_match_observed_shapes() {
    #[derive(Debug)]
    struct Wrong(Operation);

    impl CallSiteBinder for Wrong {
        fn operation(&self) -> &Operation {
            &self.0
        }

        fn bind(&self, _: &BindRequest<'_>) -> Result<Rule, BindError> {
            Ok(Rule::new(
                Restrictions::new([Restriction::Type(Type::Str)]),
                Expr::constant(Value::Int(0)),
            ))
        }
    }

    let site = CallSite::new(
        Arc::new(Wrong(Operation::Invoke)),
        Signature::new([Type::Object], Type::Int),
        CacheOptions::default(),
        None,
    );
    let err = site.invoke(&[Value::Int(1)]).unwrap_err();
    assert!(matches!(err, RuntimeError::Bind(BindError::RuleNotApplicable)), "{err}");
}

#[test]
fn test_concurrent_misses_converge() {
    let binder = Arc::new(TaggingBinder::new());
    let site = tag_site(binder, CacheOptions::default());

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for i in 0..50 {
                    assert_eq!(site.invoke(&[Value::Int(i)]).unwrap(), Value::Int(11));
                }
            });
        }
    });

    assert_eq!(site.rule_count(), 1);
    assert_eq!(site.state(), SiteState::Monomorphic);
    let stats = site.stats();
    assert_eq!(stats.hits + stats.misses, 400);
}
