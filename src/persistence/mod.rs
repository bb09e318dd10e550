//! Persistence layer
//!
//! - Persistence queue shared by producers and the worker
//! - Sinks performing the actual write of a message
//! - Persister engine running the single worker loop
//! - Observer hook reporting persist outcomes

pub mod engine;
pub mod observer;
pub mod queue;
pub mod sink;

pub use engine::PersisterEngine;
pub use observer::{NoopObserver, PersistObserver, TracingObserver};
pub use queue::{Dequeued, PersistenceQueue, QueueStats};
pub use sink::{ConsoleSink, JsonLinesSink, MemorySink, MemorySinkHandle, Sink, SinkError};
