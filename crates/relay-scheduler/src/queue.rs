//! Ready queue with concurrency limits.

use relay_core::ids::JobInstanceId;
use std::collections::{HashMap, HashSet, VecDeque};

/// An instance whose dependencies are satisfied, waiting for a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub instance: JobInstanceId,
    /// Parent template name; used as the concurrency group.
    pub job: String,
}

impl QueuedJob {
    pub fn new(instance: JobInstanceId, job: impl Into<String>) -> Self {
        Self {
            instance,
            job: job.into(),
        }
    }
}

/// FIFO queue that releases jobs while the run-wide limit and the
/// per-template `max_parallel` limits allow it.
pub struct ReadyQueue {
    queue: VecDeque<QueuedJob>,
    max_concurrent: usize,
    running: HashSet<JobInstanceId>,
    group_running: HashMap<String, usize>,
    group_limits: HashMap<String, usize>,
}

impl ReadyQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max_concurrent: max_concurrent.max(1),
            running: HashSet::new(),
            group_running: HashMap::new(),
            group_limits: HashMap::new(),
        }
    }

    /// Cap how many instances of one template may run at once.
    pub fn set_group_limit(&mut self, job: impl Into<String>, limit: usize) {
        self.group_limits.insert(job.into(), limit.max(1));
    }

    pub fn enqueue(&mut self, job: QueuedJob) {
        self.queue.push_back(job);
    }

    /// Next job that fits the limits. The slot is taken on return.
    pub fn dequeue(&mut self) -> Option<QueuedJob> {
        if self.running.len() >= self.max_concurrent {
            return None;
        }

        let position = self.queue.iter().position(|job| self.can_execute(job))?;
        let job = self.queue.remove(position)?;
        self.running.insert(job.instance);
        *self.group_running.entry(job.job.clone()).or_insert(0) += 1;
        Some(job)
    }

    /// Release the slot held by a dispatched job.
    pub fn complete(&mut self, job: &QueuedJob) {
        if !self.running.remove(&job.instance) {
            return;
        }
        if let Some(count) = self.group_running.get_mut(&job.job) {
            *count = count.saturating_sub(1);
        }
    }

    /// Drop a job that has not been dispatched yet.
    pub fn remove(&mut self, instance: JobInstanceId) -> Option<QueuedJob> {
        let position = self.queue.iter().position(|j| j.instance == instance)?;
        self.queue.remove(position)
    }

    /// Drop every waiting job.
    pub fn clear(&mut self) -> Vec<QueuedJob> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self, instance: JobInstanceId) -> bool {
        self.running.contains(&instance)
    }

    fn can_execute(&self, job: &QueuedJob) -> bool {
        match self.group_limits.get(&job.job) {
            Some(&limit) => self.group_running.get(&job.job).copied().unwrap_or(0) < limit,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str) -> QueuedJob {
        QueuedJob::new(JobInstanceId::new(), name)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = ReadyQueue::new(4);
        queue.enqueue(job("first"));
        queue.enqueue(job("second"));

        assert_eq!(queue.dequeue().unwrap().job, "first");
        assert_eq!(queue.dequeue().unwrap().job, "second");
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_global_limit() {
        let mut queue = ReadyQueue::new(1);
        queue.enqueue(job("a"));
        queue.enqueue(job("b"));

        let first = queue.dequeue().unwrap();
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.running(), 1);

        queue.complete(&first);
        assert_eq!(queue.dequeue().unwrap().job, "b");
    }

    #[test]
    fn test_group_limit_skips_to_other_jobs() {
        let mut queue = ReadyQueue::new(8);
        queue.set_group_limit("deploy", 1);

        queue.enqueue(job("deploy"));
        queue.enqueue(job("deploy"));
        queue.enqueue(job("lint"));

        let first = queue.dequeue().unwrap();
        assert_eq!(first.job, "deploy");

        // Second deploy is blocked, lint goes ahead of it
        assert_eq!(queue.dequeue().unwrap().job, "lint");
        assert!(queue.dequeue().is_none());

        queue.complete(&first);
        assert_eq!(queue.dequeue().unwrap().job, "deploy");
    }

    #[test]
    fn test_remove_and_double_complete() {
        let mut queue = ReadyQueue::new(2);
        let waiting = job("test");
        queue.enqueue(waiting.clone());
        assert_eq!(queue.remove(waiting.instance), Some(waiting));
        assert!(queue.is_empty());

        queue.enqueue(job("test"));
        let running = queue.dequeue().unwrap();
        queue.complete(&running);
        queue.complete(&running);
        assert_eq!(queue.running(), 0);
    }
}
