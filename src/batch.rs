//! `BatchEngine` (C5): a worker pool over `ContentProcessor::process_content`, with a
//! priority+FIFO queue, optional dynamic concurrency, cancellation, and fire-and-forget
//! progress/resource events.
//!
//! The event-enum-plus-sink shape is grounded in the donor's `progress.rs`
//! (`SyncProgressEvent`/`SyncProgressReporter`), generalized from a single stderr writer to a
//! `tokio::sync::broadcast` channel so multiple subscribers (CLI, HTTP) can watch the same batch
//! without slow readers blocking the workers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sysinfo::System;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::processor::{ContentProcessor, ProcessOptions};

const QUEUE_BOUND_MULTIPLIER: usize = 4;
const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);
const MIN_SAMPLES_FOR_ETA: usize = 3;

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub bytes: Vec<u8>,
    pub priority: i64,
    pub options: ProcessOptions,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_concurrency: usize,
    pub dynamic_concurrency: bool,
    pub continue_on_error: bool,
    pub timeout_ms: u64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            dynamic_concurrency: false,
            continue_on_error: true,
            timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchItemStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct BatchItemResult {
    pub id: String,
    pub status: BatchItemStatus,
    pub content_id: Option<String>,
    pub error: Option<String>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch_id: String,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub items: Vec<BatchItemResult>,
    pub total_time_ms: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub enum BatchEvent {
    Progress {
        batch_id: String,
        processed_items: usize,
        total_items: usize,
        percent_complete: f64,
        current_item: String,
        estimated_time_remaining_ms: Option<u64>,
    },
    Resources {
        batch_id: String,
        cpu_usage: f64,
        available_memory: u64,
        total_memory: u64,
        memory_usage: f64,
    },
}

/// Fire-and-forget event bus: `send` never blocks a worker. A lagging subscriber silently misses
/// older events rather than slowing down the batch (`tokio::sync::broadcast`'s lag-drop behavior).
#[derive(Clone)]
pub struct BatchEventSink {
    tx: broadcast::Sender<BatchEvent>,
}

impl BatchEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: BatchEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for BatchEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

struct QueueEntry {
    seq: u64,
    priority: i64,
    item: BatchItem,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// Higher priority sorts greater (popped first by the max-heap); within equal priority, the
    /// entry with the smaller sequence number sorts greater, giving FIFO order among ties.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ProgressState {
    total: usize,
    processed: usize,
    successful: usize,
    failed: usize,
    cancelled: usize,
    durations_ms: Vec<u64>,
    results: Vec<BatchItemResult>,
}

impl ProgressState {
    fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            successful: 0,
            failed: 0,
            cancelled: 0,
            durations_ms: Vec::with_capacity(total),
            results: Vec::with_capacity(total),
        }
    }

    fn eta_ms(&self) -> Option<u64> {
        if self.durations_ms.len() < MIN_SAMPLES_FOR_ETA {
            return None;
        }
        let avg = self.durations_ms.iter().sum::<u64>() / self.durations_ms.len() as u64;
        let remaining = self.total.saturating_sub(self.processed);
        Some(avg * remaining as u64)
    }
}

/// Shared state a worker task needs; cheap to clone (everything behind `Arc`).
struct WorkerContext {
    batch_id: String,
    queue: Mutex<BinaryHeap<QueueEntry>>,
    processor: Arc<ContentProcessor>,
    progress: Mutex<ProgressState>,
    sink: BatchEventSink,
    cancelled: AtomicBool,
    target_workers: AtomicUsize,
    active_workers: AtomicUsize,
    max_concurrency: usize,
    timeout: Duration,
    continue_on_error: bool,
    cancellation: CancellationToken,
}

/// A token a caller (job/HTTP cancel endpoint) holds onto and flips to request early batch
/// termination. Cancellation is cooperative: a worker observes it between items, not mid-call.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

pub struct BatchEngine;

impl BatchEngine {
    /// Runs `items` to completion (or cancellation) and returns the collated result. The queue
    /// bound (`4 * max_concurrency`) only matters for a streaming producer; since this entry
    /// point receives the full item list up front, every item is enqueued immediately and the
    /// bound has no observable effect here beyond documenting intended backpressure.
    pub async fn process_batch(
        processor: Arc<ContentProcessor>,
        items: Vec<BatchItem>,
        opts: BatchOptions,
        sink: BatchEventSink,
        cancellation: CancellationToken,
    ) -> BatchResult {
        let batch_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let total = items.len();
        let _queue_bound = QUEUE_BOUND_MULTIPLIER * opts.max_concurrency.max(1);

        let mut heap = BinaryHeap::with_capacity(total);
        for (seq, item) in items.into_iter().enumerate() {
            heap.push(QueueEntry {
                seq: seq as u64,
                priority: item.priority,
                item,
            });
        }

        let initial_workers = opts.max_concurrency.max(1).min(total.max(1));
        let ctx = Arc::new(WorkerContext {
            batch_id: batch_id.clone(),
            queue: Mutex::new(heap),
            processor,
            progress: Mutex::new(ProgressState::new(total)),
            sink,
            cancelled: AtomicBool::new(false),
            target_workers: AtomicUsize::new(initial_workers),
            active_workers: AtomicUsize::new(0),
            max_concurrency: opts.max_concurrency.max(1),
            timeout: Duration::from_millis(opts.timeout_ms.max(1)),
            continue_on_error: opts.continue_on_error,
            cancellation,
        });

        if total == 0 {
            return BatchResult {
                batch_id,
                processed: 0,
                successful: 0,
                failed: 0,
                items: Vec::new(),
                total_time_ms: started.elapsed().as_millis() as u64,
                cancelled: false,
            };
        }

        let sampler = if opts.dynamic_concurrency {
            Some(tokio::spawn(run_sampler(ctx.clone())))
        } else {
            None
        };

        let mut handles = Vec::with_capacity(initial_workers);
        for _ in 0..initial_workers {
            ctx.active_workers.fetch_add(1, AtomicOrdering::SeqCst);
            handles.push(tokio::spawn(run_worker(ctx.clone())));
        }

        for handle in handles {
            let _ = handle.await;
        }
        if let Some(sampler) = sampler {
            sampler.abort();
        }

        let progress = ctx.progress.lock().unwrap();
        BatchResult {
            batch_id,
            processed: progress.processed,
            successful: progress.successful,
            failed: progress.failed,
            items: progress.results.clone(),
            total_time_ms: started.elapsed().as_millis() as u64,
            cancelled: ctx.cancelled.load(AtomicOrdering::SeqCst),
        }
    }

}

async fn run_worker(ctx: Arc<WorkerContext>) {
    loop {
        if ctx.cancellation.is_cancelled() {
            ctx.cancelled.store(true, AtomicOrdering::SeqCst);
        }
        if ctx.active_workers.load(AtomicOrdering::SeqCst) > ctx.target_workers.load(AtomicOrdering::SeqCst) {
            ctx.active_workers.fetch_sub(1, AtomicOrdering::SeqCst);
            return;
        }

        let entry = {
            let mut queue = ctx.queue.lock().unwrap();
            queue.pop()
        };

        let Some(entry) = entry else {
            ctx.active_workers.fetch_sub(1, AtomicOrdering::SeqCst);
            return;
        };

        let item = entry.item;
        let item_start = Instant::now();

        if ctx.cancelled.load(AtomicOrdering::SeqCst) {
            record_outcome(&ctx, item.id, BatchItemStatus::Cancelled, None, None, 0).await;
            continue;
        }

        let outcome = tokio::time::timeout(
            ctx.timeout,
            ctx.processor.process_content(&item.bytes, item.options.clone()),
        )
        .await;

        let elapsed_ms = item_start.elapsed().as_millis() as u64;

        let (status, content_id, error) = match outcome {
            Ok(result) if result.success => (BatchItemStatus::Completed, Some(result.content_id), None),
            Ok(result) => (BatchItemStatus::Failed, None, result.error),
            Err(_) => (BatchItemStatus::Failed, None, Some("item timed out".to_string())),
        };

        let failed = status == BatchItemStatus::Failed;
        record_outcome(&ctx, item.id, status, content_id, error, elapsed_ms).await;

        if failed && !ctx.continue_on_error {
            ctx.cancelled.store(true, AtomicOrdering::SeqCst);
            ctx.queue.lock().unwrap().clear();
            ctx.active_workers.fetch_sub(1, AtomicOrdering::SeqCst);
            return;
        }
    }
}

async fn record_outcome(
    ctx: &Arc<WorkerContext>,
    id: String,
    status: BatchItemStatus,
    content_id: Option<String>,
    error: Option<String>,
    elapsed_ms: u64,
) {
    let (processed, total, current_item) = {
        let mut progress = ctx.progress.lock().unwrap();
        progress.processed += 1;
        match status {
            BatchItemStatus::Completed => progress.successful += 1,
            BatchItemStatus::Failed => progress.failed += 1,
            BatchItemStatus::Cancelled => progress.cancelled += 1,
        }
        if elapsed_ms > 0 {
            progress.durations_ms.push(elapsed_ms);
        }
        progress.results.push(BatchItemResult {
            id: id.clone(),
            status,
            content_id,
            error,
            processing_time_ms: elapsed_ms,
        });
        (progress.processed, progress.total, id)
    };

    let eta_ms = ctx.progress.lock().unwrap().eta_ms();
    let percent_complete = if total == 0 { 100.0 } else { (processed as f64 / total as f64) * 100.0 };

    ctx.sink.emit(BatchEvent::Progress {
        batch_id: ctx.batch_id.clone(),
        processed_items: processed,
        total_items: total,
        percent_complete,
        current_item,
        estimated_time_remaining_ms: eta_ms,
    });
}

async fn run_sampler(ctx: Arc<WorkerContext>) {
    let mut system = System::new_all();
    let cpus = system.cpus().len().max(1) as f64;

    loop {
        tokio::time::sleep(SAMPLE_INTERVAL).await;
        if ctx.cancelled.load(AtomicOrdering::SeqCst) {
            return;
        }

        system.refresh_cpu_usage();
        system.refresh_memory();

        let load = System::load_average().one;
        let total_memory = system.total_memory();
        let available_memory = system.available_memory();
        let memory_usage = if total_memory == 0 {
            0.0
        } else {
            1.0 - (available_memory as f64 / total_memory as f64)
        };
        let free_fraction = 1.0 - memory_usage;

        ctx.sink.emit(BatchEvent::Resources {
            batch_id: ctx.batch_id.clone(),
            cpu_usage: load,
            available_memory,
            total_memory,
            memory_usage,
        });

        let current_target = ctx.target_workers.load(AtomicOrdering::SeqCst);
        let should_shrink = load > 0.75 * cpus || free_fraction < 0.20;
        let should_grow = load < 0.4 * cpus && free_fraction > 0.40;

        if should_shrink && current_target > 1 {
            ctx.target_workers.store(current_target - 1, AtomicOrdering::SeqCst);
        } else if should_grow && current_target < ctx.max_concurrency {
            let new_target = current_target + 1;
            ctx.target_workers.store(new_target, AtomicOrdering::SeqCst);
            let active = ctx.active_workers.load(AtomicOrdering::SeqCst);
            if active < new_target && !ctx.queue.lock().unwrap().is_empty() {
                ctx.active_workers.fetch_add(1, AtomicOrdering::SeqCst);
                tokio::spawn(run_worker(ctx.clone()));
            }
        }
    }
}
