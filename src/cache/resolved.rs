use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use dashmap::DashMap;

use crate::{
    authz::{PolicyInstance, Subject},
    observability::metrics,
};

/// Point in a subject's invalidation history at which a resolution started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    subject: u64,
}

struct CacheEntry {
    generation: Generation,
    policies: Arc<[PolicyInstance]>,
    last_accessed: Instant,
}

/// Memo of resolved per-subject policy lists.
///
/// Entries are tagged with the subject's [`Generation`] as it was when
/// resolution started. Invalidating a subject bumps only that subject's
/// counter; `invalidate_all` bumps a shared epoch. A result computed
/// concurrently with a mutation is therefore never served afterwards, even if
/// it lands in the map after the invalidation ran.
pub struct ResolvedPolicyCache {
    entries: DashMap<Subject, CacheEntry>,
    epoch: AtomicU64,
    subject_generations: DashMap<Subject, u64>,
    max_entries: usize,
    eviction_batch_size: usize,
}

impl ResolvedPolicyCache {
    /// Create a cache holding at most `max_entries` subjects (0 = unlimited).
    pub fn new(max_entries: usize) -> Self {
        Self::with_eviction_batch(max_entries, (max_entries / 10).max(1))
    }

    pub fn with_eviction_batch(max_entries: usize, eviction_batch_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            epoch: AtomicU64::new(0),
            subject_generations: DashMap::new(),
            max_entries,
            eviction_batch_size: eviction_batch_size.max(1),
        }
    }

    pub fn generation(&self, subject: &Subject) -> Generation {
        Generation {
            epoch: self.epoch.load(Ordering::Acquire),
            subject: self
                .subject_generations
                .get(subject)
                .map(|g| *g)
                .unwrap_or(0),
        }
    }

    pub fn get(&self, subject: &Subject) -> Option<Arc<[PolicyInstance]>> {
        let current = self.generation(subject);
        let hit = match self.entries.get_mut(subject) {
            Some(mut entry) if entry.generation == current => {
                entry.last_accessed = Instant::now();
                Some(Arc::clone(&entry.policies))
            }
            _ => None,
        };

        metrics::record_cache_operation(
            "resolved_policies",
            "get",
            if hit.is_some() { "hit" } else { "miss" },
        );
        hit
    }

    /// Store a resolution that started at `generation`. Stale results are dropped.
    pub fn insert(&self, subject: Subject, generation: Generation, policies: Arc<[PolicyInstance]>) {
        if generation != self.generation(&subject) {
            return;
        }
        self.evict_if_needed();
        self.entries.insert(
            subject,
            CacheEntry {
                generation,
                policies,
                last_accessed: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, subject: &Subject) {
        *self.subject_generations.entry(subject.clone()).or_insert(0) += 1;
        self.entries.remove(subject);
        metrics::record_cache_operation("resolved_policies", "invalidate", "subject");
    }

    pub fn invalidate_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
        metrics::record_cache_operation("resolved_policies", "invalidate", "all");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_if_needed(&self) {
        if self.max_entries == 0 || self.entries.len() < self.max_entries {
            return;
        }

        // Stale generations can never be served again
        self.entries
            .retain(|subject, entry| entry.generation == self.generation(subject));

        let current_len = self.entries.len();
        if current_len < self.max_entries {
            return;
        }

        let target_size = self.max_entries.saturating_sub(self.eviction_batch_size);
        let to_evict = current_len.saturating_sub(target_size);

        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_accessed))
            .collect();
        entries.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{Bindings, Clause, Policy};

    fn resolved(name: &str) -> Arc<[PolicyInstance]> {
        let policy = Policy::new(name, vec![Clause::allow(["a"], ["b"]).unwrap()]).unwrap();
        Arc::from(vec![PolicyInstance {
            policy: Arc::new(policy),
            variables: Bindings::new(),
            via_role: None,
        }])
    }

    #[test]
    fn test_hit_after_insert() {
        let cache = ResolvedPolicyCache::new(8);
        let alice = Subject::user("alice");

        assert!(cache.get(&alice).is_none());
        cache.insert(alice.clone(), cache.generation(&alice), resolved("p"));
        assert_eq!(cache.get(&alice).unwrap()[0].name(), "p");
    }

    #[test]
    fn test_stale_insert_is_dropped() {
        let cache = ResolvedPolicyCache::new(8);
        let alice = Subject::user("alice");

        let started = cache.generation(&alice);
        cache.invalidate(&alice);
        cache.insert(alice.clone(), started, resolved("stale"));

        assert!(cache.get(&alice).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_all_clears_everything() {
        let cache = ResolvedPolicyCache::new(8);
        for user in ["a", "b", "c"] {
            let subject = Subject::user(user);
            cache.insert(subject.clone(), cache.generation(&subject), resolved("p"));
        }
        assert_eq!(cache.len(), 3);

        cache.invalidate_all();
        assert!(cache.is_empty());
        assert!(cache.get(&Subject::user("a")).is_none());
    }

    #[test]
    fn test_invalidate_subject_keeps_others() {
        let cache = ResolvedPolicyCache::new(8);
        let alice = Subject::user("alice");
        let bob = Subject::user("bob");
        cache.insert(alice.clone(), cache.generation(&alice), resolved("p"));
        cache.insert(bob.clone(), cache.generation(&bob), resolved("p"));

        let bob_started = cache.generation(&bob);
        cache.invalidate(&alice);

        assert!(cache.get(&alice).is_none());
        assert!(cache.get(&bob).is_some());
        assert_eq!(cache.generation(&bob), bob_started);
        assert_ne!(cache.generation(&alice), bob_started);
    }

    #[test]
    fn test_invalidate_all_makes_earlier_generations_stale() {
        let cache = ResolvedPolicyCache::new(8);
        let alice = Subject::user("alice");

        let started = cache.generation(&alice);
        cache.invalidate_all();
        cache.insert(alice.clone(), started, resolved("stale"));
        assert!(cache.get(&alice).is_none());

        cache.insert(alice.clone(), cache.generation(&alice), resolved("fresh"));
        assert_eq!(cache.get(&alice).unwrap()[0].name(), "fresh");
    }

    fn insert_now(cache: &ResolvedPolicyCache, user: &str) {
        let subject = Subject::user(user);
        cache.insert(subject.clone(), cache.generation(&subject), resolved("p"));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResolvedPolicyCache::with_eviction_batch(3, 1);

        insert_now(&cache, "a");
        std::thread::sleep(std::time::Duration::from_millis(2));
        insert_now(&cache, "b");
        std::thread::sleep(std::time::Duration::from_millis(2));
        insert_now(&cache, "c");
        std::thread::sleep(std::time::Duration::from_millis(2));

        // Touch "a" so "b" becomes the oldest
        assert!(cache.get(&Subject::user("a")).is_some());
        insert_now(&cache, "d");

        assert_eq!(cache.len(), 3);
        assert!(cache.get(&Subject::user("a")).is_some());
        assert!(cache.get(&Subject::user("b")).is_none());
        assert!(cache.get(&Subject::user("d")).is_some());
    }
}
