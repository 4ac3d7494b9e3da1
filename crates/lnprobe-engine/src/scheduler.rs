//! Min-heap of repeating tasks.
//!
//! The scheduler owns the heap and runs one task at a time on its own task.
//! Work that must not hold up the loop (probe dispatch) is spawned by the
//! runner itself.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Launch one probe.
    Issue,
    /// Check in-flight probes for a terminal status.
    PollPending,
    /// Drop expired temporary exclusions.
    ExpireExclusions,
}

/// What the scheduler does with a task after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Reschedule,
    /// Never run this task again.
    Retire,
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: Task) -> anyhow::Result<TaskOutcome>;
}

#[derive(Debug)]
struct Entry {
    next_run: Instant,
    seq: u64,
    task: Task,
    interval: Duration,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.next_run, self.seq).cmp(&(other.next_run, other.seq))
    }
}

pub struct Scheduler {
    warmup: Duration,
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new(warmup: Duration) -> Self {
        Self {
            warmup,
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Register a repeating task, first due one `interval` after warm-up.
    pub fn schedule(&mut self, task: Task, interval: Duration) {
        self.push(task, interval, interval);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Tasks ordered by when they run next, ties in registration order.
    pub fn queued(&self) -> Vec<Task> {
        let mut entries: Vec<&Entry> = self.heap.iter().map(|Reverse(e)| e).collect();
        entries.sort();
        entries.into_iter().map(|e| e.task).collect()
    }

    fn push(&mut self, task: Task, interval: Duration, delay: Duration) {
        self.push_at(task, interval, Instant::now() + delay);
    }

    fn push_at(&mut self, task: Task, interval: Duration, next_run: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry {
            next_run,
            seq,
            task,
            interval,
        }));
    }

    /// Run until `cancel` fires or every task has retired.
    pub async fn run<R: TaskRunner + ?Sized>(mut self, runner: &R, cancel: CancellationToken) {
        // Intervals count from the end of warm-up.
        let started = Instant::now();
        let pending: Vec<Entry> = self.heap.drain().map(|Reverse(e)| e).collect();
        for e in pending {
            let offset = e.next_run.saturating_duration_since(started);
            self.push_at(e.task, e.interval, started + self.warmup + offset);
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.warmup) => {}
        }
        info!(tasks = self.heap.len(), "scheduler started");

        while let Some(Reverse(entry)) = self.heap.pop() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(entry.next_run) => {}
            }

            match runner.run(entry.task).await {
                Ok(TaskOutcome::Reschedule) => {}
                Ok(TaskOutcome::Retire) => {
                    debug!(task = ?entry.task, "task retired");
                    continue;
                }
                Err(e) => warn!(task = ?entry.task, "task failed: {e:#}"),
            }
            self.push(entry.task, entry.interval, entry.interval);
        }
        info!("no tasks left, scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records task runs; `fail` tasks error every time, `retire_after`
    /// retires a task after that many runs.
    #[derive(Default)]
    struct Recorder {
        runs: Mutex<Vec<Task>>,
        fail: Option<Task>,
        retire_after: Option<(Task, usize)>,
    }

    impl Recorder {
        fn runs(&self) -> Vec<Task> {
            self.runs.lock().unwrap().clone()
        }

        fn count(&self, task: Task) -> usize {
            self.runs().iter().filter(|t| **t == task).count()
        }
    }

    #[async_trait]
    impl TaskRunner for Recorder {
        async fn run(&self, task: Task) -> anyhow::Result<TaskOutcome> {
            let n = {
                let mut runs = self.runs.lock().unwrap();
                runs.push(task);
                runs.iter().filter(|t| **t == task).count()
            };
            if self.fail == Some(task) {
                anyhow::bail!("boom");
            }
            if self
                .retire_after
                .is_some_and(|(t, limit)| t == task && n >= limit)
            {
                return Ok(TaskOutcome::Retire);
            }
            Ok(TaskOutcome::Reschedule)
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn queue_orders_by_due_time_then_registration() {
        let mut s = Scheduler::new(Duration::ZERO);
        s.schedule(Task::Issue, Duration::from_secs(3600));
        s.schedule(Task::ExpireExclusions, Duration::from_secs(300));
        s.schedule(Task::PollPending, Duration::from_secs(1));
        assert_eq!(
            s.queued(),
            vec![Task::PollPending, Task::ExpireExclusions, Task::Issue]
        );
        assert_eq!(s.len(), 3);
    }

    /// Run `s` on the paused clock and cancel it `after` from now.
    async fn run_for(s: Scheduler, recorder: &Recorder, after: Duration) {
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            stopper.cancel();
        });
        s.run(recorder, cancel).await;
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_runs_during_warmup() {
        let mut s = Scheduler::new(Duration::from_secs(60));
        s.schedule(Task::PollPending, ms(1));
        let recorder = Recorder::default();

        run_for(s, &recorder, Duration::from_secs(59)).await;
        assert!(recorder.runs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_run_is_one_interval_after_warmup() {
        let mut s = Scheduler::new(Duration::from_secs(30));
        s.schedule(Task::PollPending, Duration::from_secs(10));
        let recorder = Recorder::default();

        // Due at 40s and 50s; stopped in between.
        run_for(s, &recorder, Duration::from_secs(45)).await;
        assert_eq!(recorder.count(Task::PollPending), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn faster_task_runs_more_often() {
        let mut s = Scheduler::new(Duration::ZERO);
        s.schedule(Task::PollPending, ms(10));
        s.schedule(Task::Issue, ms(1000));
        let recorder = Recorder::default();

        run_for(s, &recorder, ms(205)).await;
        assert_eq!(recorder.count(Task::PollPending), 20);
        assert_eq!(recorder.count(Task::Issue), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_task_is_rescheduled() {
        let mut s = Scheduler::new(Duration::ZERO);
        s.schedule(Task::ExpireExclusions, ms(5));
        let recorder = Recorder {
            fail: Some(Task::ExpireExclusions),
            ..Recorder::default()
        };

        run_for(s, &recorder, ms(52)).await;
        assert_eq!(recorder.count(Task::ExpireExclusions), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn retired_tasks_leave_the_heap() {
        let mut s = Scheduler::new(Duration::ZERO);
        s.schedule(Task::Issue, ms(5));
        let recorder = Recorder {
            retire_after: Some((Task::Issue, 3)),
            ..Recorder::default()
        };

        // Returns on its own once the only task retires.
        tokio::time::timeout(Duration::from_secs(5), s.run(&recorder, CancellationToken::new()))
            .await
            .expect("scheduler stops when empty");
        assert_eq!(recorder.count(Task::Issue), 3);
    }
}
