use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use campus_common::Role;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

struct Timed<T> {
    stored_at: Instant,
    value: T,
}

/// A single value with an optional expiry.
struct Slot<T> {
    inner: RwLock<Option<Timed<T>>>,
    ttl: Option<Duration>,
}

impl<T: Clone> Slot<T> {
    fn new(ttl: Option<Duration>) -> Self {
        Self {
            inner: RwLock::new(None),
            ttl,
        }
    }

    fn get(&self) -> Option<T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let entry = guard.as_ref()?;
        match self.ttl {
            Some(ttl) if entry.stored_at.elapsed() > ttl => None,
            _ => Some(entry.value.clone()),
        }
    }

    fn set(&self, value: T) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Timed {
            stored_at: Instant::now(),
            value,
        });
    }

    fn clear(&self) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.take().is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptCacheStats {
    pub prompts: usize,
    pub organization_cached: bool,
    pub decision_tree_cached: bool,
}

/// Built prompts keyed by `(role, context fingerprint)`, plus the
/// organization-status text and decision tree they are assembled from.
pub struct PromptCache {
    prompts: DashMap<(String, u64), Timed<Arc<str>>>,
    prompt_ttl: Duration,
    organization: Slot<Arc<str>>,
    decision_tree: Slot<Arc<str>>,
}

impl PromptCache {
    pub fn new(prompt_ttl: Duration, organization_ttl: Duration) -> Self {
        Self {
            prompts: DashMap::new(),
            prompt_ttl,
            organization: Slot::new(Some(organization_ttl)),
            decision_tree: Slot::new(None),
        }
    }

    pub fn prompt(&self, role: &Role, fingerprint: u64) -> Option<Arc<str>> {
        let key = (role.as_str().to_string(), fingerprint);
        {
            let entry = self.prompts.get(&key)?;
            if entry.stored_at.elapsed() <= self.prompt_ttl {
                return Some(Arc::clone(&entry.value));
            }
        }
        // Read guard dropped above; removing under it would deadlock.
        let ttl = self.prompt_ttl;
        self.prompts
            .remove_if(&key, |_, entry| entry.stored_at.elapsed() > ttl);
        None
    }

    pub fn store_prompt(&self, role: &Role, fingerprint: u64, prompt: Arc<str>) {
        self.prompts.insert(
            (role.as_str().to_string(), fingerprint),
            Timed {
                stored_at: Instant::now(),
                value: prompt,
            },
        );
    }

    pub(crate) fn organization(&self) -> Option<Arc<str>> {
        self.organization.get()
    }

    pub(crate) fn store_organization(&self, text: Arc<str>) {
        self.organization.set(text);
    }

    pub(crate) fn decision_tree(&self) -> Option<Arc<str>> {
        self.decision_tree.get()
    }

    pub(crate) fn store_decision_tree(&self, text: Arc<str>) {
        self.decision_tree.set(text);
    }

    /// Organization figures changed: drop them and every prompt built on them.
    pub fn invalidate_organization(&self) {
        let had_status = self.organization.clear();
        let prompts = self.prompts.len();
        self.prompts.clear();
        info!(had_status, prompts, "organization status changed; prompt cache invalidated");
    }

    pub fn invalidate_all(&self) {
        self.invalidate_organization();
        self.decision_tree.clear();
    }

    /// Remove expired prompts. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let before = self.prompts.len();
        let ttl = self.prompt_ttl;
        self.prompts.retain(|_, entry| entry.stored_at.elapsed() <= ttl);
        let removed = before.saturating_sub(self.prompts.len());
        if removed > 0 {
            debug!(removed, "expired prompts swept");
        }
        removed
    }

    pub fn stats(&self) -> PromptCacheStats {
        PromptCacheStats {
            prompts: self.prompts.len(),
            organization_cached: self.organization.get().is_some(),
            decision_tree_cached: self.decision_tree.get().is_some(),
        }
    }
}
