//! Dynamic call sites.
//!
//! A [`CallSite`] owns the rule cache for one `Dynamic` node. Lookups read
//! an immutable snapshot of the rule list without locking; a miss binds and
//! compiles a rule outside any lock, then installs it under the site's own
//! update lock and publishes a new snapshot. The first rule installed for a
//! shape wins: a thread that lost the race uses the winner's rule.

mod rules;
mod shared;

#[cfg(test)]
mod site_test;

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::epoch::{self, Atomic, Guard, Owned};
use parking_lot::Mutex;
use smallvec::SmallVec;

pub use shared::SharedRuleCache;

use rules::{CompiledRule, Generalized, Matched, RuleEntry};

use crate::binder::{ArgumentShape, BindError, BindRequest, CacheIdentity, CallSiteBinder};
use crate::compiler::compile;
use crate::error::RuntimeError;
use crate::expr::{Expr, Parameter};
use crate::options::{CacheOptions, CompileOptions};
use crate::types::{Signature, Type};
use crate::values::Value;

type Shapes = SmallVec<[ArgumentShape; 4]>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SiteState {
    /// No rule has been installed yet.
    Uninitialized,
    /// A single specific rule.
    Monomorphic,
    /// Several rules, or a templated rule covering several shapes.
    Polymorphic,
    /// The cache has overflowed at least once.
    Megamorphic,
}

/// Counters describing how a site's cache has been used.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct SiteStats {
    pub hits: u64,
    pub misses: u64,
    /// Calls into the binder.
    pub binds: u64,
    /// Misses served by the shared rule cache.
    pub shared_hits: u64,
    /// Rules folded into templated entries.
    pub generalizations: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    binds: AtomicU64,
    shared_hits: AtomicU64,
    generalizations: AtomicU64,
    evictions: AtomicU64,
}

/// A published rule list, most recently used first.
#[derive(Default)]
struct RuleSet {
    entries: Vec<RuleEntry>,
}

impl RuleSet {
    fn find(&self, shapes: &[ArgumentShape]) -> Option<(usize, Matched)> {
        self.entries
            .iter()
            .enumerate()
            .find_map(|(index, entry)| entry.lookup(shapes).map(|matched| (index, matched)))
    }
}

pub struct CallSite {
    binder: Arc<dyn CallSiteBinder>,
    identity: CacheIdentity,
    signature: Arc<Signature>,
    parameters: Vec<Parameter>,
    rules: Atomic<RuleSet>,
    update: Mutex<()>,
    options: CacheOptions,
    shared: Option<Arc<SharedRuleCache>>,
    counters: Counters,
    megamorphic: AtomicBool,
}

impl CallSite {
    /// A site for `binder`, called with arguments of the given static types.
    /// Arguments are passed by value.
    pub fn new(
        binder: Arc<dyn CallSiteBinder>,
        signature: Signature,
        options: CacheOptions,
        shared: Option<Arc<SharedRuleCache>>,
    ) -> Self {
        let parameters = signature
            .params
            .iter()
            .enumerate()
            .map(|(i, param)| Parameter::temp(&param.ty, &format!("arg{i}")))
            .collect();
        CallSite {
            identity: binder.cache_identity(),
            binder,
            signature: Arc::new(signature),
            parameters,
            rules: Atomic::new(RuleSet::default()),
            update: Mutex::new(()),
            options,
            shared,
            counters: Counters::default(),
            megamorphic: AtomicBool::new(false),
        }
    }

    pub fn with_shared_cache(mut self, shared: Arc<SharedRuleCache>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn binder(&self) -> &Arc<dyn CallSiteBinder> {
        &self.binder
    }

    pub fn signature(&self) -> &Arc<Signature> {
        &self.signature
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// The variables rule bodies refer to for the site's arguments.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Runs the operation for `args`, binding a new rule on a cache miss.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        if args.len() != self.parameters.len() {
            return Err(RuntimeError::ArgumentMismatch(format!(
                "{} site expects {} argument(s), found {}",
                self.binder.operation(),
                self.parameters.len(),
                args.len()
            )));
        }
        let shapes: Shapes = args
            .iter()
            .zip(&self.parameters)
            .map(|(value, param)| ArgumentShape::of(value, param.ty(), param.is_by_ref()))
            .collect();

        let matched = match self.lookup(&shapes) {
            Some(matched) => matched,
            None => self.miss(&shapes)?,
        };
        matched.call(args)
    }

    pub fn state(&self) -> SiteState {
        if self.megamorphic.load(Ordering::Relaxed) {
            return SiteState::Megamorphic;
        }
        let guard = epoch::pin();
        let set = self.snapshot(&guard);
        match set.entries.as_slice() {
            [] => SiteState::Uninitialized,
            [RuleEntry::Specific(_)] => SiteState::Monomorphic,
            _ => SiteState::Polymorphic,
        }
    }

    pub fn stats(&self) -> SiteStats {
        let c = &self.counters;
        SiteStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            binds: c.binds.load(Ordering::Relaxed),
            shared_hits: c.shared_hits.load(Ordering::Relaxed),
            generalizations: c.generalizations.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }

    /// Number of cache entries. A templated entry counts once.
    pub fn rule_count(&self) -> usize {
        let guard = epoch::pin();
        self.snapshot(&guard).entries.len()
    }

    /// Number of templated entries.
    pub fn template_count(&self) -> usize {
        let guard = epoch::pin();
        self.snapshot(&guard)
            .entries
            .iter()
            .filter(|entry| matches!(entry, RuleEntry::Templated { .. }))
            .count()
    }

    /// Shapes covered by all entries together.
    pub fn covered_shapes(&self) -> usize {
        let guard = epoch::pin();
        self.snapshot(&guard).entries.iter().map(RuleEntry::row_count).sum()
    }

    /// Drops every cached rule. The shared cache is left alone.
    pub fn clear(&self) {
        let _lock = self.update.lock();
        let guard = epoch::pin();
        self.publish(RuleSet::default(), &guard);
        self.megamorphic.store(false, Ordering::Relaxed);
    }

    fn snapshot<'g>(&self, guard: &'g Guard) -> &'g RuleSet {
        let current = self.rules.load(Ordering::Acquire, guard);
        // SAFETY: `rules` is never null: it starts with an empty set and
        // `publish` only replaces it. Replaced sets are destroyed once no
        // pinned guard can still observe them.
        unsafe { current.deref() }
    }

    /// Replaces the rule list. Callers hold `update`.
    fn publish(&self, set: RuleSet, guard: &Guard) {
        let old = self.rules.swap(Owned::new(set), Ordering::AcqRel, guard);
        // SAFETY: `old` is unreachable from `rules` after the swap.
        unsafe { guard.defer_destroy(old) };
    }

    fn lookup(&self, shapes: &[ArgumentShape]) -> Option<Matched> {
        let guard = epoch::pin();
        let set = self.snapshot(&guard);
        let (index, matched) = set.find(shapes)?;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        if index > 0 {
            self.promote(&set.entries[index], &guard);
        }
        Some(matched)
    }

    /// Moves `entry` to the front. Skipped when another thread is updating
    /// the site; recency is a hint.
    fn promote(&self, entry: &RuleEntry, guard: &Guard) {
        let Some(_lock) = self.update.try_lock() else {
            return;
        };
        let current = self.snapshot(guard);
        let Some(index) = current.entries.iter().position(|e| e.same_entry(entry)) else {
            return;
        };
        if index == 0 {
            return;
        }
        let mut entries = current.entries.clone();
        let promoted = entries.remove(index);
        entries.insert(0, promoted);
        tracing::trace!(from = index, "Promoted rule");
        self.publish(RuleSet { entries }, guard);
    }

    fn miss(&self, shapes: &[ArgumentShape]) -> Result<Matched, RuntimeError> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            operation = %self.binder.operation(),
            types = ?shapes.iter().map(ArgumentShape::effective_type).collect::<Vec<_>>(),
            "Call site miss"
        );

        if let Some(shared) = &self.shared
            && let Some(rule) = shared.lookup(&self.identity, &self.signature, shapes)
        {
            self.counters.shared_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(operation = %self.binder.operation(), "Shared rule cache hit");
            return Ok(self.install(rule, shapes));
        }

        let rule = Arc::new(self.bind(shapes)?);
        if let Some(shared) = &self.shared {
            shared.insert(self.identity.clone(), self.signature.clone(), rule.clone());
        }
        Ok(self.install(rule, shapes))
    }

    /// Asks the binder for a rule and compiles it. Runs outside any lock.
    fn bind(&self, shapes: &[ArgumentShape]) -> Result<CompiledRule, BindError> {
        self.counters.binds.fetch_add(1, Ordering::Relaxed);
        let ret = &self.signature.ret;
        let request = BindRequest {
            shapes,
            parameters: &self.parameters,
            return_type: ret,
        };
        let rule = self.binder.bind(&request)?;

        if rule.restrictions.len() != shapes.len() {
            return Err(BindError::RestrictionArity {
                expected: shapes.len(),
                found: rule.restrictions.len(),
            });
        }
        if !rule.restrictions.matches(shapes) {
            return Err(BindError::RuleNotApplicable);
        }
        let body = fit_result(rule.body, ret)?;

        let test = rule.restrictions.to_test(&self.parameters)?;
        let tree = Expr::lambda_typed(
            None,
            self.parameters.clone(),
            ret.clone(),
            Expr::block(vec![test, body.clone()])?,
        )?;
        let lambda = Expr::lambda_typed(Some("rule"), self.parameters.clone(), ret.clone(), body)?;
        let delegate = compile(&lambda, &self.compile_options())?;
        tracing::debug!(
            operation = %self.binder.operation(),
            restrictions = ?rule.restrictions,
            "Bound rule"
        );
        Ok(CompiledRule {
            restrictions: rule.restrictions,
            tree,
            delegate,
        })
    }

    fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            cache: self.options.clone(),
            shared_rules: self.shared.clone(),
            ..CompileOptions::default()
        }
    }

    /// Inserts `rule` unless a rule for `shapes` was installed meanwhile,
    /// and returns the implementation to run.
    fn install(&self, rule: Arc<CompiledRule>, shapes: &[ArgumentShape]) -> Matched {
        let _lock = self.update.lock();
        let guard = epoch::pin();
        let current = self.snapshot(&guard);
        if let Some((_, matched)) = current.find(shapes) {
            return matched;
        }

        let mut entries = current.entries.clone();
        match self.generalize_into(&mut entries, &rule) {
            Some(entry) => entries.insert(0, entry),
            None => entries.insert(0, RuleEntry::Specific(rule.clone())),
        }

        if entries.len() > self.options.capacity {
            let evicted = entries.len() - self.options.capacity;
            entries.truncate(self.options.capacity);
            self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            self.megamorphic.store(true, Ordering::Relaxed);
            tracing::debug!(
                operation = %self.binder.operation(),
                evicted,
                "Evicted least recently used rules"
            );
        }

        let matched = entries
            .first()
            .and_then(|entry| entry.lookup(shapes))
            .unwrap_or_else(|| rule.matched());
        tracing::debug!(entries = entries.len(), "Installed rule");
        self.publish(RuleSet { entries }, &guard);
        matched
    }

    /// Folds `rule` into the first compatible entry, removing that entry
    /// from `entries` and returning its replacement.
    fn generalize_into(&self, entries: &mut Vec<RuleEntry>, rule: &CompiledRule) -> Option<RuleEntry> {
        if !self.options.generalize {
            return None;
        }
        let options = self.compile_options();
        for index in 0..entries.len() {
            match rules::generalize(&entries[index], rule, self.options.max_template_rows, &options) {
                Ok(Some(outcome)) => {
                    match &outcome {
                        Generalized::Created(_) => tracing::debug!("Created rule template"),
                        Generalized::Row(_) => tracing::debug!("Added template row"),
                        Generalized::Widened(_) => tracing::debug!("Widened rule template"),
                    }
                    self.counters.generalizations.fetch_add(1, Ordering::Relaxed);
                    entries.remove(index);
                    return Some(outcome.into_entry());
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::debug!(%error, "Rule generalization failed, caching the specific rule");
                    return None;
                }
            }
        }
        None
    }
}

/// Makes a rule body produce the site's return type.
fn fit_result(body: Expr, ret: &Type) -> Result<Expr, BindError> {
    let found = body.ty();
    if ret.is_void() || ret.is_assignable_from(found) {
        return Ok(body);
    }
    if (found.is_numeric() && ret.is_numeric()) || (!found.is_void() && found.is_assignable_from(ret)) {
        return Ok(Expr::convert(body, ret.clone())?);
    }
    Err(BindError::ResultTypeMismatch {
        expected: ret.clone(),
        found: found.clone(),
    })
}

impl Drop for CallSite {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees no other thread holds a guard
        // referencing this site's rules.
        unsafe {
            let guard = epoch::unprotected();
            let current = self.rules.load(Ordering::Relaxed, guard);
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("operation", self.binder.operation())
            .field("signature", &self.signature)
            .field("state", &self.state())
            .field("rules", &self.rule_count())
            .finish()
    }
}
