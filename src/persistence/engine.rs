//! Asynchronous persister engine
//!
//! Producers hand messages to [`PersisterEngine::persist`] from any task or
//! thread. A single worker task drains the queue into the sink, so messages
//! are written in the exact order they were accepted.
//!
//! Two shutdown disciplines are offered:
//! - [`PersisterEngine::stop`] closes the queue and waits until every
//!   accepted message has been handed to the sink.
//! - [`PersisterEngine::stop_immediately`] drops everything not yet written
//!   and waits only for the message currently in flight (or cancels it when
//!   `abort_in_flight` is configured).
//!
//! The worker runs under a supervisor task. If it panics, the supervisor
//! discards the queue, records the fault, and moves the engine to
//! `Stopped`; the fault is then returned from every `stop*()` call.

use std::any::Any;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::observer::{PersistObserver, TracingObserver};
use super::queue::{Dequeued, PersistenceQueue, QueueStats};
use super::sink::Sink;
use crate::config::EngineConfig;
use crate::coordination::{EngineState, ShutdownCoordinator, StopMode};
use crate::domain::Message;
use crate::error::{PersisterError, Result};
use crate::services::{Metrics, MetricsSnapshot};

/// Accepts messages from concurrent producers and persists them in order
pub struct PersisterEngine {
    queue: Arc<PersistenceQueue>,
    coordinator: Arc<ShutdownCoordinator>,
    metrics: Arc<Metrics>,
    observer: Arc<dyn PersistObserver>,
}

impl PersisterEngine {
    /// Start an engine that reports through `tracing`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S>(config: EngineConfig, sink: S) -> Self
    where
        S: Sink + 'static,
    {
        Self::start_with_observer(config, sink, Arc::new(TracingObserver))
    }

    /// Start an engine with a custom outcome observer
    pub fn start_with_observer<S>(
        config: EngineConfig,
        sink: S,
        observer: Arc<dyn PersistObserver>,
    ) -> Self
    where
        S: Sink + 'static,
    {
        let queue = Arc::new(PersistenceQueue::new());
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let metrics = Arc::new(Metrics::new());

        info!(
            sink = sink.name(),
            max_batch = config.max_batch,
            abort_in_flight = config.abort_in_flight,
            "Starting persister engine"
        );

        let worker = Worker {
            config,
            sink: Box::new(sink),
            queue: queue.clone(),
            coordinator: coordinator.clone(),
            metrics: metrics.clone(),
            observer: observer.clone(),
        };
        let handle = tokio::spawn(worker.run());

        tokio::spawn(supervise(
            handle,
            queue.clone(),
            coordinator.clone(),
            metrics.clone(),
            observer.clone(),
        ));

        Self {
            queue,
            coordinator,
            metrics,
            observer,
        }
    }

    /// Queue a message for persistence.
    ///
    /// Never blocks beyond the queue append. Returns
    /// [`PersisterError::RejectedAfterStop`] once any stop has begun; the
    /// message is then not queued.
    pub fn persist(&self, message: Message) -> Result<()> {
        match self.queue.try_append(message) {
            Ok(()) => {
                self.metrics.inc_accepted();
                Ok(())
            }
            Err(message) => {
                self.metrics.inc_rejected();
                self.observer.on_rejected(&message);
                Err(PersisterError::RejectedAfterStop(message.id()))
            }
        }
    }

    /// Stop accepting messages, persist everything already queued, then halt.
    ///
    /// Resolves once the worker has halted. Calling it again, or after
    /// [`stop_immediately`](Self::stop_immediately), only waits for and
    /// confirms that.
    ///
    /// # Errors
    ///
    /// Returns [`PersisterError::EngineFault`] if the worker died abnormally.
    pub async fn stop(&self) -> Result<()> {
        // Close first so no append can slip in after the stop has begun.
        self.queue.close();
        if self.coordinator.begin_drain() {
            info!("Graceful stop: draining {} queued messages", self.queue.len());
        }
        self.wait_stopped().await
    }

    /// Stop accepting messages, drop everything not yet persisted, then halt.
    ///
    /// The worker finishes the write it is currently performing unless the
    /// engine was configured with `abort_in_flight`. Escalates a graceful
    /// stop already in progress.
    ///
    /// # Errors
    ///
    /// Returns [`PersisterError::EngineFault`] if the worker died abnormally.
    pub async fn stop_immediately(&self) -> Result<()> {
        // Close first so no append can slip in between the request and the discard.
        self.queue.close();
        if self.coordinator.request_immediate() {
            let dropped = self.discard_queued();
            info!("Immediate stop: {} queued messages discarded", dropped);
        }
        self.wait_stopped().await
    }

    fn discard_queued(&self) -> usize {
        let dropped = self.queue.discard();
        if dropped > 0 {
            self.metrics.add_discarded(dropped as u64);
            self.observer.on_discarded(dropped);
        }
        dropped
    }

    async fn wait_stopped(&self) -> Result<()> {
        self.coordinator.wait_stopped().await;
        match self.coordinator.fault() {
            Some(reason) => Err(PersisterError::EngineFault(reason)),
            None => Ok(()),
        }
    }

    /// Get current lifecycle state.
    ///
    /// Reads `Stopped` as soon as an immediate stop is requested, even while
    /// the worker is still finishing its in-flight write.
    pub fn state(&self) -> EngineState {
        self.coordinator.state()
    }

    /// Get the stop mode requested so far, if any
    pub fn stop_mode(&self) -> Option<StopMode> {
        self.coordinator.stop_mode()
    }

    pub fn is_accepting(&self) -> bool {
        self.queue.is_accepting()
    }

    /// Messages accepted but not yet taken by the worker
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Receiver that observes every lifecycle transition
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.coordinator.subscribe_state()
    }
}

impl Drop for PersisterEngine {
    fn drop(&mut self) {
        if self.coordinator.is_halted() {
            return;
        }
        let state = self.coordinator.state();
        self.queue.close();
        if self.coordinator.request_immediate() {
            let dropped = self.discard_queued();
            if dropped > 0 {
                warn!(
                    "Persister engine dropped while {}, {} queued messages discarded",
                    state, dropped
                );
            }
        }
    }
}

/// The single consumer of the queue
struct Worker {
    config: EngineConfig,
    sink: Box<dyn Sink>,
    queue: Arc<PersistenceQueue>,
    coordinator: Arc<ShutdownCoordinator>,
    metrics: Arc<Metrics>,
    observer: Arc<dyn PersistObserver>,
}

impl Worker {
    async fn run(mut self) {
        let mut stop_rx = self.coordinator.subscribe_mode();
        debug!("Persister worker started (sink: {})", self.sink.name());

        'run: loop {
            if self.coordinator.is_immediate_requested() {
                break;
            }

            let batch = match self.queue.dequeue(self.config.max_batch) {
                Dequeued::Batch(batch) => batch,
                Dequeued::Idle => {
                    self.queue.wait_for_work().await;
                    continue;
                }
                Dequeued::Exhausted => {
                    debug!("Persistence queue drained");
                    break;
                }
            };

            let mut pending = batch.into_iter();
            while let Some(message) = pending.next() {
                if self.coordinator.is_immediate_requested() {
                    self.abandon(1 + pending.len());
                    break 'run;
                }
                if !self.write_one(&message, &mut stop_rx).await {
                    self.abandon(1 + pending.len());
                    break 'run;
                }
            }
        }

        if let Err(e) = self.sink.flush().await {
            warn!("Sink flush failed on shutdown: {}", e);
        }
        self.metrics.log_status();
        debug!("Persister worker halted");
    }

    /// Write one message. Returns false if the write was cancelled by an
    /// immediate stop.
    async fn write_one(
        &mut self,
        message: &Message,
        stop_rx: &mut watch::Receiver<Option<StopMode>>,
    ) -> bool {
        let result = if self.config.abort_in_flight {
            let immediate = async {
                let _ = stop_rx
                    .wait_for(|mode| *mode == Some(StopMode::Immediate))
                    .await;
            };
            tokio::select! {
                biased;
                _ = immediate => None,
                result = self.sink.write(message) => Some(result),
            }
        } else {
            Some(self.sink.write(message).await)
        };

        match result {
            Some(Ok(())) => {
                self.metrics.inc_persisted();
                self.observer.on_persisted(message);
                true
            }
            Some(Err(e)) => {
                self.metrics.inc_failed();
                self.observer.on_write_failed(message, &e);
                true
            }
            None => {
                debug!(id = %message.id(), "In-flight write cancelled by immediate stop");
                false
            }
        }
    }

    /// Account for messages taken from the queue that will never be written
    fn abandon(&self, count: usize) {
        self.metrics.add_discarded(count as u64);
        self.observer.on_discarded(count);
    }
}

async fn supervise(
    worker: JoinHandle<()>,
    queue: Arc<PersistenceQueue>,
    coordinator: Arc<ShutdownCoordinator>,
    metrics: Arc<Metrics>,
    observer: Arc<dyn PersistObserver>,
) {
    if let Err(e) = worker.await {
        let reason = if e.is_panic() {
            format!("persister worker panicked: {}", panic_message(e.into_panic()))
        } else {
            "persister worker was cancelled".to_string()
        };
        coordinator.record_fault(reason.clone());
        let dropped = queue.discard();
        metrics.add_discarded(dropped as u64);
        observer.on_engine_fault(&reason);
    }
    coordinator.mark_stopped();
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
