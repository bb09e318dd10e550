//! Persist outcome reporting

use tracing::{debug, error, warn};

use super::sink::SinkError;
use crate::domain::Message;

/// Hook notified of every persist outcome.
///
/// Called from the worker (persisted/failed), from producers (rejected) and
/// from stop callers (discarded), so implementations must be cheap and
/// thread-safe. All methods default to no-ops.
pub trait PersistObserver: Send + Sync {
    fn on_persisted(&self, _message: &Message) {}

    fn on_write_failed(&self, _message: &Message, _error: &SinkError) {}

    fn on_rejected(&self, _message: &Message) {}

    fn on_discarded(&self, _count: usize) {}

    fn on_engine_fault(&self, _reason: &str) {}
}

/// Default observer that reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PersistObserver for TracingObserver {
    fn on_persisted(&self, message: &Message) {
        debug!(
            id = %message.id(),
            category = %message.category(),
            "Message persisted: {}",
            message.name()
        );
    }

    fn on_write_failed(&self, message: &Message, err: &SinkError) {
        warn!(id = %message.id(), "Message persist failed: {}", err);
    }

    fn on_rejected(&self, message: &Message) {
        warn!(id = %message.id(), "Message rejected after stop: {}", message.name());
    }

    fn on_discarded(&self, count: usize) {
        warn!("{} queued messages discarded", count);
    }

    fn on_engine_fault(&self, reason: &str) {
        error!("Persister engine fault: {}", reason);
    }
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PersistObserver for NoopObserver {}
