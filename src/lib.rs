pub mod cli;
pub mod collector;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod scenario;
pub mod services;

pub use collector::{FeedHandle, FeedReport, MessageSource, SimulatedFeed};
pub use config::{AppConfig, EngineConfig, FeedConfig, SinkKind};
pub use coordination::{EngineState, ShutdownCoordinator, StopMode};
pub use domain::{Category, Message};
pub use error::{PersisterError, Result};
pub use persistence::{
    ConsoleSink, JsonLinesSink, MemorySink, MemorySinkHandle, PersistObserver, PersistenceQueue,
    PersisterEngine, Sink, SinkError, TracingObserver,
};
pub use scenario::{run_scenario, run_scenario_with_interrupt, Scenario, ScenarioReport};
pub use services::{Metrics, MetricsSnapshot};
