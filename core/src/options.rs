//! Configuration for call-site caches and the lambda compiler.

use std::sync::Arc;

use crate::site::SharedRuleCache;

/// Tuning knobs for a call site's rule cache.
///
/// None of these values affect results, only how often binders run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Maximum number of entries kept per site. The least recently used
    /// entry is evicted when an insertion would exceed it.
    pub capacity: usize,
    /// Maximum number of binding rows kept by one templated entry.
    pub max_template_rows: usize,
    /// Whether compatible rules are merged into templated entries.
    pub generalize: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            capacity: 10,
            max_template_rows: 32,
            generalize: true,
        }
    }
}

impl CacheOptions {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_max_template_rows(mut self, rows: usize) -> Self {
        self.max_template_rows = rows.max(1);
        self
    }

    pub fn with_generalize(mut self, generalize: bool) -> Self {
        self.generalize = generalize;
        self
    }
}

/// How `Switch` nodes are lowered.
///
/// Few cases compile to a chain of comparisons. Larger integer switches
/// whose values are dense within a bounded span become a jump table; the
/// rest use a hashed lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchPolicy {
    pub max_chain_cases: usize,
    pub min_table_density: f64,
    pub max_table_span: u64,
}

impl Default for SwitchPolicy {
    fn default() -> Self {
        Self {
            max_chain_cases: 4,
            min_table_density: 0.5,
            max_table_span: 1024,
        }
    }
}

impl SwitchPolicy {
    /// Always lower to comparison chains.
    pub fn chained() -> Self {
        Self {
            max_chain_cases: usize::MAX,
            ..Self::default()
        }
    }

    pub fn with_max_chain_cases(mut self, cases: usize) -> Self {
        self.max_chain_cases = cases;
        self
    }

    pub fn with_min_table_density(mut self, density: f64) -> Self {
        self.min_table_density = density;
        self
    }

    pub fn with_max_table_span(mut self, span: u64) -> Self {
        self.max_table_span = span;
        self
    }
}

/// Options for [`compile`](crate::compile) and
/// [`compile_to_method`](crate::compile_to_method).
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Keep the lambda name and per-instruction node kinds so that
    /// [`Code::disassemble`](crate::vm::Code::disassemble) can annotate its
    /// listing.
    pub emit_debug_info: bool,
    pub switch: SwitchPolicy,
    /// Options for every call site created while compiling `Dynamic` nodes.
    pub cache: CacheOptions,
    /// Shared rule cache handed to every call site created by this
    /// compilation.
    pub shared_rules: Option<Arc<SharedRuleCache>>,
}

impl CompileOptions {
    pub fn with_debug_info(mut self, emit: bool) -> Self {
        self.emit_debug_info = emit;
        self
    }

    pub fn with_switch_policy(mut self, policy: SwitchPolicy) -> Self {
        self.switch = policy;
        self
    }

    pub fn with_cache_options(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_shared_rules(mut self, shared: Arc<SharedRuleCache>) -> Self {
        self.shared_rules = Some(shared);
        self
    }
}
