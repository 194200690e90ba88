//! Sequential event worker.
//!
//! Each object type gets one worker. Events for that type are processed
//! one at a time in submission order; workers for different types run
//! concurrently and coordinate through the per-VPN lock.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{ChangeEvent, Listener, TaskResultExt, TaskStatus};

/// Returned when submitting to a worker that has shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event worker is closed")]
pub struct WorkerClosed;

/// Per-worker outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub deferred: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub failed: u64,
    pub ignored: u64,
}

impl WorkerStats {
    fn record(&mut self, status: TaskStatus) {
        self.processed += 1;
        match status {
            TaskStatus::Success => self.succeeded += 1,
            TaskStatus::WaitingForDependency => self.deferred += 1,
            TaskStatus::InvalidEntry | TaskStatus::Conflict => self.rejected += 1,
            TaskStatus::LockTimeout => self.timed_out += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Ignore => self.ignored += 1,
        }
    }
}

/// Cloneable submission side of a worker queue.
#[derive(Debug)]
pub struct EventSender<T> {
    tx: mpsc::Sender<ChangeEvent<T>>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> EventSender<T> {
    /// Queues an event, waiting for capacity if the queue is full.
    pub async fn submit(&self, event: ChangeEvent<T>) -> Result<(), WorkerClosed> {
        self.tx.send(event).await.map_err(|_| WorkerClosed)
    }
}

/// Owner of a running worker.
pub struct WorkerHandle<T> {
    name: String,
    sender: EventSender<T>,
    join: JoinHandle<WorkerStats>,
}

impl<T> WorkerHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sender(&self) -> EventSender<T> {
        self.sender.clone()
    }

    pub async fn submit(&self, event: ChangeEvent<T>) -> Result<(), WorkerClosed> {
        self.sender.submit(event).await
    }

    /// Closes the queue and waits for queued events to drain.
    ///
    /// Senders cloned from this handle keep the queue open until they are
    /// dropped too.
    pub async fn shutdown(self) -> WorkerStats {
        let WorkerHandle { name, sender, join } = self;
        drop(sender);
        match join.await {
            Ok(stats) => {
                info!(worker = %name, processed = stats.processed, "worker stopped");
                stats
            }
            Err(e) => {
                error!(worker = %name, error = %e, "worker task terminated abnormally");
                WorkerStats::default()
            }
        }
    }
}

/// Spawns sequential workers for listeners.
pub struct EventWorker;

impl EventWorker {
    /// Starts a worker task for `listener` with a bounded queue.
    pub fn spawn<L>(listener: Arc<L>, queue_depth: usize) -> WorkerHandle<L::Object>
    where
        L: Listener,
    {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let name = listener.name().to_string();
        let join = tokio::spawn(run(listener, rx));
        WorkerHandle {
            name,
            sender: EventSender { tx },
            join,
        }
    }
}

async fn run<L>(listener: Arc<L>, mut rx: mpsc::Receiver<ChangeEvent<L::Object>>) -> WorkerStats
where
    L: Listener,
{
    let mut stats = WorkerStats::default();
    debug!(worker = listener.name(), "worker started");

    while let Some(event) = rx.recv().await {
        let result = listener.dispatch(&event).await;
        let status = result.to_status();
        stats.record(status);

        match &result {
            Ok(()) => debug!(
                worker = listener.name(),
                op = event.op().as_str(),
                id = event.id(),
                "event applied"
            ),
            Err(e) if status.is_success() => debug!(
                worker = listener.name(),
                op = event.op().as_str(),
                id = event.id(),
                outcome = %e,
                "event settled without changes"
            ),
            Err(e) if status.is_rejection() => warn!(
                worker = listener.name(),
                op = event.op().as_str(),
                id = event.id(),
                error = %e,
                "event rejected"
            ),
            Err(e) => error!(
                worker = listener.name(),
                op = event.op().as_str(),
                id = event.id(),
                error = %e,
                "event processing failed"
            ),
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TaskError, TaskResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Sequencer {
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Listener for Sequencer {
        type Object = u32;

        fn name(&self) -> &str {
            "sequencer"
        }

        async fn add(&self, _id: &str, object: &u32) -> TaskResult<()> {
            tokio::task::yield_now().await;
            self.seen.lock().push(*object);
            match *object {
                0 => Err(TaskError::invalid_entry("zero")),
                7 => Err(TaskError::waiting_for("seven")),
                9 => Err(TaskError::downstream("nine")),
                _ => Ok(()),
            }
        }

        async fn update(&self, _id: &str, _before: &u32, _after: &u32) -> TaskResult<()> {
            Err(TaskError::ignored("no updates"))
        }

        async fn remove(&self, _id: &str, _object: &u32) -> TaskResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_processed_in_order() {
        let listener = Arc::new(Sequencer::default());
        let worker = EventWorker::spawn(Arc::clone(&listener), 4);
        assert_eq!(worker.name(), "sequencer");

        for n in 1..=20u32 {
            worker.submit(ChangeEvent::add(n.to_string(), n)).await.unwrap();
        }
        let stats = worker.shutdown().await;

        assert_eq!(stats.processed, 20);
        assert_eq!(*listener.seen.lock(), (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_stats_classify_outcomes() {
        let listener = Arc::new(Sequencer::default());
        let worker = EventWorker::spawn(listener, 16);
        let sender = worker.sender();

        for n in [1u32, 0, 7, 9, 2] {
            sender.submit(ChangeEvent::add("k", n)).await.unwrap();
        }
        sender.submit(ChangeEvent::update("k", 1, 2)).await.unwrap();
        drop(sender);

        let stats = worker.shutdown().await;
        assert_eq!(
            stats,
            WorkerStats {
                processed: 6,
                succeeded: 2,
                deferred: 1,
                rejected: 1,
                timed_out: 0,
                failed: 1,
                ignored: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_cloned_senders() {
        let listener = Arc::new(Sequencer::default());
        let worker = EventWorker::spawn(Arc::clone(&listener), 8);
        let sender = worker.sender();
        let stopping = tokio::spawn(worker.shutdown());

        sender.submit(ChangeEvent::add("late", 3)).await.unwrap();
        drop(sender);

        let stats = stopping.await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(*listener.seen.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_submit_to_closed_queue() {
        let (tx, rx) = mpsc::channel::<ChangeEvent<u32>>(1);
        drop(rx);
        let sender = EventSender { tx };
        assert_eq!(sender.submit(ChangeEvent::add("k", 1)).await, Err(WorkerClosed));
    }
}
