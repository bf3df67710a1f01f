//! Priority task queue
//!
//! Ordering is (tier, submission sequence): critical work first, FIFO within
//! a tier. Cancelling a queued task removes it from the pending table in
//! O(1); its heap slot becomes stale and is skipped when popped.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use vigil_core::domain::PriorityTier;

use super::task::{ScheduledTask, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueSlot {
    tier: PriorityTier,
    sequence: u64,
}

impl Ord for QueueSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tier
            .cmp(&other.tier)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for QueueSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    heap: BinaryHeap<Reverse<QueueSlot>>,
    pending: HashMap<TaskId, ScheduledTask>,
    next_sequence: u64,
}

impl TaskQueue {
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn push(&mut self, task: ScheduledTask) -> TaskId {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let id = TaskId(sequence);
        self.heap.push(Reverse(QueueSlot {
            tier: task.tier,
            sequence,
        }));
        self.pending.insert(id, task);
        id
    }

    /// Highest-priority live task, skipping slots of cancelled tasks.
    pub(crate) fn pop(&mut self) -> Option<(TaskId, ScheduledTask)> {
        while let Some(Reverse(slot)) = self.heap.pop() {
            let id = TaskId(slot.sequence);
            if let Some(task) = self.pending.remove(&id) {
                return Some((id, task));
            }
        }
        None
    }

    pub(crate) fn remove(&mut self, id: TaskId) -> Option<ScheduledTask> {
        let task = self.pending.remove(&id);
        if self.pending.is_empty() {
            self.heap.clear();
        }
        task
    }

    pub(crate) fn drain(&mut self) -> Vec<(TaskId, ScheduledTask)> {
        self.heap.clear();
        self.pending.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use vigil_core::domain::{AdapterError, NormalizedResult, ScanId};

    use crate::infrastructure::scheduler::task::TaskSuccess;

    fn task(adapter: &str, tier: PriorityTier) -> ScheduledTask {
        let (events, _rx) = mpsc::unbounded_channel();
        ScheduledTask {
            scan_id: ScanId::new(),
            adapter: adapter.to_string(),
            tier,
            timeout: Duration::from_secs(1),
            cancel: CancellationToken::new(),
            job: Box::new(|_, _| {
                async {
                    Ok::<_, AdapterError>(TaskSuccess {
                        result: NormalizedResult::default(),
                        cache_hit: false,
                    })
                }
                .boxed()
            }),
            events,
        }
    }

    #[test]
    fn test_pops_by_tier_then_fifo() {
        let mut queue = TaskQueue::default();
        queue.push(task("zap", PriorityTier::Background));
        queue.push(task("nmap", PriorityTier::Standard));
        queue.push(task("secrets", PriorityTier::Critical));
        queue.push(task("nuclei", PriorityTier::Standard));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop().map(|(_, t)| t.adapter)).collect();
        assert_eq!(order, vec!["secrets", "nmap", "nuclei", "zap"]);
    }

    #[test]
    fn test_removed_task_is_skipped() {
        let mut queue = TaskQueue::default();
        let first = queue.push(task("gitleaks", PriorityTier::Critical));
        queue.push(task("semgrep", PriorityTier::High));

        assert!(queue.remove(first).is_some());
        assert!(queue.remove(first).is_none());
        assert_eq!(queue.len(), 1);

        let (_, next) = queue.pop().unwrap();
        assert_eq!(next.adapter, "semgrep");
        assert!(queue.pop().is_none());
    }
}
