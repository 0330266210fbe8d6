//! Background maintenance tasks.
//!
//! A bounded-concurrency priority queue for cleanup, index rebuilds, cache
//! maintenance, and migrations. The scheduler dispatches on a fixed
//! interval; each execution runs under a timeout, and failures retry with
//! exponential backoff until the task's retry budget runs out.

use crate::error::Result;
use crate::error::StoreError;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

/// Base delay for the retry backoff (`base * 2^attempt`).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Cleanup,
    IndexRebuild,
    CacheMaintenance,
    Migration,
}

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// A unit of background work.
#[derive(Clone)]
pub struct BackgroundTask {
    pub id: String,
    pub kind: TaskKind,
    /// Higher runs first.
    pub priority: u8,
    pub timeout: Duration,
    pub max_retries: u32,
    execute: TaskFn,
}

impl BackgroundTask {
    pub fn new<F, Fut>(id: impl Into<String>, kind: TaskKind, priority: u8, execute: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            kind,
            priority,
            timeout: Duration::from_secs(60),
            max_retries: 0,
            execute: Arc::new(move || Box::pin(execute())),
        }
    }

    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

struct QueuedTask {
    task: BackgroundTask,
    attempt: u32,
    seq: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: highest priority first, then submission order.
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone)]
pub struct BackgroundTaskConfig {
    pub poll_interval: Duration,
    pub max_concurrent: usize,
}

impl Default for BackgroundTaskConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_concurrent: 2,
        }
    }
}

pub struct BackgroundTaskManager {
    config: BackgroundTaskConfig,
    queue: Arc<Mutex<BinaryHeap<QueuedTask>>>,
    running: Arc<Mutex<JoinSet<()>>>,
    scheduler: Mutex<Option<tokio::task::JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
    seq: AtomicU64,
}

impl BackgroundTaskManager {
    pub fn new(config: BackgroundTaskConfig) -> Self {
        Self {
            config,
            queue: Arc::new(Mutex::new(BinaryHeap::new())),
            running: Arc::new(Mutex::new(JoinSet::new())),
            scheduler: Mutex::new(None),
            stopping: Arc::new(AtomicBool::new(false)),
            seq: AtomicU64::new(0),
        }
    }

    pub async fn submit(&self, task: BackgroundTask) {
        let seq = self
            .seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.queue.lock().await.push(QueuedTask {
            task,
            attempt: 0,
            seq,
        });
    }

    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Start the scheduler loop. Idempotent.
    pub async fn start(&self) {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() {
            return;
        }
        self.stopping
            .store(false, std::sync::atomic::Ordering::SeqCst);

        let queue = self.queue.clone();
        let running = self.running.clone();
        let stopping = self.stopping.clone();
        let poll_interval = self.config.poll_interval;
        let max_concurrent = self.config.max_concurrent;

        *scheduler = Some(tokio::spawn(async move {
            loop {
                if stopping.load(std::sync::atomic::Ordering::SeqCst) {
                    break;
                }
                {
                    let mut running = running.lock().await;
                    while running.try_join_next().is_some() {}
                    let mut queue_guard = queue.lock().await;
                    while running.len() < max_concurrent {
                        let Some(queued) = queue_guard.pop() else {
                            break;
                        };
                        let queue = queue.clone();
                        running.spawn(run_task(queued, queue));
                    }
                }
                sleep(poll_interval).await;
            }
        }));
    }

    /// Stop dispatching and wait (best-effort) for in-flight tasks.
    pub async fn stop(&self) {
        self.stopping
            .store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = self.scheduler.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        let mut running = self.running.lock().await;
        while running.join_next().await.is_some() {}
    }

    /// Run everything currently queued to completion, without the interval
    /// scheduler. Used by hosts that want deterministic drains.
    pub async fn drain(&self) {
        loop {
            let queued = { self.queue.lock().await.pop() };
            let Some(queued) = queued else { break };
            run_task(queued, self.queue.clone()).await;
        }
    }
}

async fn run_task(queued: QueuedTask, queue: Arc<Mutex<BinaryHeap<QueuedTask>>>) {
    let QueuedTask { task, attempt, seq } = queued;
    let outcome = match timeout(task.timeout, (task.execute)()).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(task.timeout)),
    };

    match outcome {
        Ok(()) => {
            debug!(task = %task.id, kind = ?task.kind, attempt, "background task finished");
        }
        Err(err) => {
            if attempt < task.max_retries {
                let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt);
                warn!(task = %task.id, %err, attempt, "background task failed, retrying");
                sleep(delay).await;
                queue.lock().await.push(QueuedTask {
                    task,
                    attempt: attempt + 1,
                    seq,
                });
            } else {
                warn!(task = %task.id, %err, attempt, "background task abandoned");
            }
        }
    }
}
