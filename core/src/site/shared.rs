use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::rules::CompiledRule;
use crate::binder::{ArgumentShape, CacheIdentity};
use crate::types::Signature;

type SharedKey = (CacheIdentity, Arc<Signature>);

/// Rules shared by every site that uses an equivalent binder with the same
/// signature. A site consults it after its own cache misses and before
/// calling its binder.
///
/// Created explicitly and handed to sites through
/// [`CompileOptions`](crate::CompileOptions) or
/// [`CallSite::with_shared_cache`](crate::CallSite::with_shared_cache).
/// Each identity keeps its most recently used rules, up to `capacity`.
pub struct SharedRuleCache {
    capacity: usize,
    rules: Mutex<HashMap<SharedKey, VecDeque<Arc<CompiledRule>>>>,
}

impl SharedRuleCache {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rules: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of rules held across identities.
    pub fn len(&self) -> usize {
        self.rules.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.rules.lock().clear();
    }

    pub(crate) fn lookup(
        &self,
        identity: &CacheIdentity,
        signature: &Arc<Signature>,
        shapes: &[ArgumentShape],
    ) -> Option<Arc<CompiledRule>> {
        let mut rules = self.rules.lock();
        let list = rules.get_mut(&(identity.clone(), signature.clone()))?;
        let index = list.iter().position(|rule| rule.restrictions.matches(shapes))?;
        let rule = list.remove(index)?;
        list.push_front(rule.clone());
        Some(rule)
    }

    pub(crate) fn insert(&self, identity: CacheIdentity, signature: Arc<Signature>, rule: Arc<CompiledRule>) {
        let mut rules = self.rules.lock();
        let list = rules.entry((identity, signature)).or_default();
        list.retain(|existing| existing.restrictions != rule.restrictions);
        list.push_front(rule);
        list.truncate(self.capacity);
    }
}

impl Default for SharedRuleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedRuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRuleCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
