//! Coordination layer for engine lifecycle and shutdown

pub mod shutdown;

pub use shutdown::{wait_for_signal, EngineState, ShutdownCoordinator, StopMode};
