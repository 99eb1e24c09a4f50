use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};

use crate::submission::Submission;

/// One unit of grading work: a submission plus the externally supplied
/// static-code and documentation sub-scores (0–20).
#[derive(Debug)]
pub struct EvalTask {
    pub submission: Submission,
    pub code_score: f64,
    pub documentation_score: f64,
}

/// Queue of pending submissions the worker pool pulls from.
///
/// Closing the queue lets workers drain the remaining tasks and then exit;
/// a woken worker that observes the closed, empty queue wakes the next one
/// so the shutdown cascades through the pool.
pub struct TaskQueue {
    queue: Mutex<VecDeque<EvalTask>>,
    notify: Notify,
    closed: AtomicBool,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn push(&self, task: EvalTask) {
        self.queue.lock().await.push_back(task);
        self.notify.notify_one();
    }

    /// Marks the queue as complete: no further pushes are expected and `pop`
    /// returns `None` once the backlog is drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Option<EvalTask> {
        loop {
            // Register for a wakeup before checking state, so a push landing
            // between the check and the await is never lost.
            let notified = self.notify.notified();
            if let Some(task) = self.queue.lock().await.pop_front() {
                return Some(task);
            }
            if self.closed.load(Ordering::Acquire) {
                self.notify.notify_one();
                return None;
            }
            notified.await;
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::Submission;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn task(group: &str) -> EvalTask {
        EvalTask {
            submission: Submission::new(group, Vec::new()),
            code_score: 0.0,
            documentation_score: 0.0,
        }
    }

    #[tokio::test]
    async fn pops_in_fifo_order() {
        let queue = TaskQueue::new();
        queue.push(task("a")).await;
        queue.push(task("b")).await;
        assert_eq!(queue.pop().await.unwrap().submission.group_id, "a");
        assert_eq!(queue.pop().await.unwrap().submission.group_id, "b");
    }

    #[tokio::test]
    async fn close_drains_backlog_then_ends() {
        let queue = TaskQueue::new();
        queue.push(task("a")).await;
        queue.close();
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn close_releases_every_waiting_worker() {
        let queue = Arc::new(TaskQueue::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move { queue.pop().await.is_none() }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.close();
        for handle in handles {
            let ended = tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("waiter did not wake on close")
                .unwrap();
            assert!(ended);
        }
    }

    #[tokio::test]
    async fn waiting_pop_wakes_on_push() {
        let queue = Arc::new(TaskQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(task("late")).await;
        let task = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(task.submission.group_id, "late");
    }
}
