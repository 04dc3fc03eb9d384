use anyhow::{bail, Result};
use futures::{Stream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::probe::Prober;
use crate::sink::ResultSink;
use crate::types::{Classification, ScanSummary, WorkItem, ALT_HTTP_PORT, HTTP_PORT};

/// Tunables for one scan run.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Number of worker tasks pulling from the queue.
    pub workers: usize,
    /// Deadline for one connect + request + response exchange.
    pub probe_timeout: Duration,
    /// Longest a worker waits on an empty queue before re-checking state.
    pub poll_interval: Duration,
    /// Sleep between checks while paused.
    pub pause_poll: Duration,
    /// How long `join` lets in-flight probes finish after a stop.
    pub stop_grace: Duration,
    /// Queue slots between the producer and the workers.
    pub queue_capacity: usize,
    /// Ports probed on every host.
    pub ports: Vec<u16>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 100,
            probe_timeout: Duration::from_millis(250),
            poll_interval: Duration::from_millis(500),
            pause_poll: Duration::from_millis(100),
            stop_grace: Duration::from_secs(1),
            queue_capacity: 10_000,
            ports: vec![HTTP_PORT, ALT_HTTP_PORT],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Control flags shared by the controller, its workers and the signal bridge.
#[derive(Debug, Default)]
struct ScanState {
    started: AtomicBool,
    stopped: AtomicBool,
    paused: AtomicBool,
    cancel: CancellationToken,
}

/// Cloneable control surface for a running scan.
///
/// Every operation only touches atomics, so it is safe to call from a signal
/// listener while workers are busy.
#[derive(Debug, Clone, Default)]
pub struct ScanHandle {
    state: Arc<ScanState>,
}

impl ScanHandle {
    /// Request a stop. Returns true for the first caller only.
    pub fn stop(&self) -> bool {
        let first = !self.state.stopped.swap(true, Ordering::SeqCst);
        self.state.cancel.cancel();
        first
    }

    /// Returns true if the scan was not already paused.
    pub fn pause(&self) -> bool {
        !self.state.paused.swap(true, Ordering::SeqCst)
    }

    /// Returns true if the scan was paused.
    pub fn resume(&self) -> bool {
        self.state.paused.swap(false, Ordering::SeqCst)
    }

    /// Flip the pause flag and return the new value.
    pub fn toggle_pause(&self) -> bool {
        !self.state.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> ScanPhase {
        if self.is_stopped() {
            ScanPhase::Stopped
        } else if !self.state.started.load(Ordering::SeqCst) {
            ScanPhase::Idle
        } else if self.is_paused() {
            ScanPhase::Paused
        } else {
            ScanPhase::Running
        }
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        self.state.cancel.cancelled().await
    }

    /// Sleep-poll while paused. Returns false if the scan was stopped meanwhile.
    async fn wait_while_paused(&self, poll: Duration) -> bool {
        while self.is_paused() && !self.is_stopped() {
            time::sleep(poll).await;
        }
        !self.is_stopped()
    }
}

/// Live counters, readable while the scan runs.
#[derive(Clone, Debug, Default)]
pub struct ScanProgress {
    pub queued: Arc<AtomicU64>,
    pub scanned: Arc<AtomicU64>,
    pub probe_errors: Arc<AtomicU64>,
    pub cameras_found: Arc<AtomicU64>,
}

impl ScanProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

type WorkQueue = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Everything a worker needs, cloned once per worker.
#[derive(Clone)]
struct WorkerContext {
    queue: WorkQueue,
    handle: ScanHandle,
    prober: Arc<dyn Prober>,
    sink: Arc<ResultSink>,
    progress: ScanProgress,
    poll_interval: Duration,
    pause_poll: Duration,
}

/// Owns the work queue and the worker pool for one scan run.
///
/// A controller is single use: each run gets a fresh controller and therefore
/// fresh (not stopped, not paused) control state.
pub struct ScanController {
    config: ScanConfig,
    handle: ScanHandle,
    prober: Arc<dyn Prober>,
    sink: Arc<ResultSink>,
    progress: ScanProgress,
    workers: JoinSet<()>,
    producer: Option<JoinHandle<()>>,
    started_at: Option<Instant>,
}

impl ScanController {
    pub fn new(prober: Arc<dyn Prober>, sink: Arc<ResultSink>, config: ScanConfig) -> Self {
        Self {
            config,
            handle: ScanHandle::default(),
            prober,
            sink,
            progress: ScanProgress::new(),
            workers: JoinSet::new(),
            producer: None,
            started_at: None,
        }
    }

    pub fn handle(&self) -> ScanHandle {
        self.handle.clone()
    }

    pub fn progress(&self) -> ScanProgress {
        self.progress.clone()
    }

    pub fn phase(&self) -> ScanPhase {
        self.handle.phase()
    }

    /// Spawn the producer feeding `items` into the queue, and `worker_count`
    /// workers draining it.
    pub fn start<S>(&mut self, items: S, worker_count: usize) -> Result<()>
    where
        S: Stream<Item = WorkItem> + Send + 'static,
    {
        if self.started_at.is_some() || self.handle.is_stopped() {
            bail!("scan already started or stopped");
        }
        self.handle.state.started.store(true, Ordering::SeqCst);
        self.started_at = Some(Instant::now());

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let queue: WorkQueue = Arc::new(Mutex::new(rx));

        let handle = self.handle.clone();
        let queued = self.progress.queued.clone();
        self.producer = Some(tokio::spawn(async move {
            let mut items = Box::pin(items);
            loop {
                let item = tokio::select! {
                    _ = handle.stopped() => break,
                    next = items.next() => match next {
                        Some(item) => item,
                        None => break,
                    },
                };
                tokio::select! {
                    _ = handle.stopped() => break,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            break;
                        }
                        queued.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            log::debug!("producer finished after {} items", queued.load(Ordering::Relaxed));
        }));

        let ctx = WorkerContext {
            queue,
            handle: self.handle.clone(),
            prober: self.prober.clone(),
            sink: self.sink.clone(),
            progress: self.progress.clone(),
            poll_interval: self.config.poll_interval,
            pause_poll: self.config.pause_poll,
        };
        let worker_count = worker_count.max(1);
        for id in 0..worker_count {
            self.workers.spawn(run_worker(id, ctx.clone()));
        }
        log::info!("scan started with {worker_count} workers");
        Ok(())
    }

    /// Wait for the queue to drain, or for a stop plus the grace period.
    pub async fn join(&mut self) -> ScanSummary {
        let handle = self.handle.clone();
        loop {
            tokio::select! {
                _ = handle.stopped() => break,
                res = self.workers.join_next() => match res {
                    Some(Err(e)) if e.is_panic() => log::error!("worker panicked: {e}"),
                    Some(_) => {}
                    None => break,
                },
            }
        }

        let stopped_early = handle.is_stopped();
        if stopped_early {
            let workers = &mut self.workers;
            let drained = time::timeout(self.config.stop_grace, async {
                while workers.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                log::warn!(
                    "{} workers still busy after {:?}; aborting them",
                    self.workers.len(),
                    self.config.stop_grace
                );
                self.workers.shutdown().await;
            }
        }
        handle.stop();

        if let Some(producer) = self.producer.take() {
            producer.abort();
            let _ = producer.await;
        }

        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        ScanSummary {
            queued: self.progress.queued.load(Ordering::Relaxed),
            scanned: self.progress.scanned.load(Ordering::Relaxed),
            probe_errors: self.progress.probe_errors.load(Ordering::Relaxed),
            cameras_found: self.progress.cameras_found.load(Ordering::Relaxed),
            elapsed_ms: elapsed.as_millis() as u64,
            stopped_early,
        }
    }
}

async fn run_worker(id: usize, ctx: WorkerContext) {
    loop {
        if ctx.handle.is_stopped() {
            break;
        }

        let next = tokio::select! {
            _ = ctx.handle.stopped() => break,
            next = async {
                let mut rx = ctx.queue.lock().await;
                time::timeout(ctx.poll_interval, rx.recv()).await
            } => next,
        };
        let item = match next {
            Ok(Some(item)) => item,
            // Producer finished and the queue is empty.
            Ok(None) => break,
            Err(_) => continue,
        };

        // Pause gates the probe, not the dequeue: a popped item is kept and
        // processed after resume.
        if !ctx.handle.wait_while_paused(ctx.pause_poll).await {
            break;
        }

        match ctx.prober.probe(item).await {
            Ok(Classification::Camera(kind)) => {
                if ctx.sink.record(item, kind).await {
                    ctx.progress.cameras_found.fetch_add(1, Ordering::Relaxed);
                    log::info!("{kind} found at {}", item.url());
                }
            }
            Ok(Classification::NoMatch) => {}
            Err(_) => {
                ctx.progress.probe_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        ctx.progress.scanned.fetch_add(1, Ordering::Relaxed);
    }
    log::trace!("worker {id} exiting");
}
