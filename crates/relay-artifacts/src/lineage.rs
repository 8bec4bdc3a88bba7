//! Producer/consumer ancestry for artifact access control.

use relay_core::JobInstanceId;
use std::collections::{HashMap, HashSet};

/// Transitive upstream set of every instance in a run.
///
/// A consumer may read an artifact only if its producer is in the
/// consumer's upstream set.
#[derive(Debug, Clone, Default)]
pub struct Lineage {
    upstream: HashMap<JobInstanceId, HashSet<JobInstanceId>>,
}

impl Lineage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the full transitive upstream set of `instance`.
    pub fn insert(&mut self, instance: JobInstanceId, upstream: HashSet<JobInstanceId>) {
        self.upstream.insert(instance, upstream);
    }

    pub fn contains(&self, instance: JobInstanceId) -> bool {
        self.upstream.contains_key(&instance)
    }

    /// True if `consumer` transitively depends on `producer`.
    pub fn is_upstream(&self, producer: JobInstanceId, consumer: JobInstanceId) -> bool {
        self.upstream
            .get(&consumer)
            .is_some_and(|set| set.contains(&producer))
    }

    pub fn len(&self) -> usize {
        self.upstream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstream.is_empty()
    }
}
