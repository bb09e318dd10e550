//! Engine shutdown coordination
//!
//! Tracks the engine lifecycle (`Running -> Draining -> Stopped`, or
//! `Running -> Stopped` for an immediate stop) and exposes the completion
//! signal that `stop()` callers await.
//!
//! An immediate stop publishes `Stopped` as soon as it is requested, while
//! the worker may still be finishing its in-flight write. Completion is
//! tracked separately as "halted" and only the worker supervisor sets it.

use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Accepting and persisting messages
    Running,
    /// Closed to new messages, persisting what is queued
    Draining,
    /// No longer accepting or persisting; set on an immediate stop request
    /// and when the worker halts
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Running => write!(f, "running"),
            EngineState::Draining => write!(f, "draining"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Requested shutdown discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMode {
    /// Drain everything already accepted, then halt
    Graceful,
    /// Drop everything not yet written and halt
    Immediate,
}

impl std::fmt::Display for StopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopMode::Graceful => write!(f, "graceful"),
            StopMode::Immediate => write!(f, "immediate"),
        }
    }
}

/// Lifecycle tracker shared by the engine, its worker and its supervisor
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: watch::Sender<EngineState>,
    mode: watch::Sender<Option<StopMode>>,
    halted: watch::Sender<bool>,
    fault: Mutex<Option<String>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator in `Running`
    pub fn new() -> Self {
        let (state, _) = watch::channel(EngineState::Running);
        let (mode, _) = watch::channel(None);
        let (halted, _) = watch::channel(false);
        Self {
            state,
            mode,
            halted,
            fault: Mutex::new(None),
        }
    }

    /// Get current state
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Get the stop mode requested so far, if any
    pub fn stop_mode(&self) -> Option<StopMode> {
        *self.mode.borrow()
    }

    pub fn is_immediate_requested(&self) -> bool {
        self.stop_mode() == Some(StopMode::Immediate)
    }

    /// True once the worker has exited
    pub fn is_halted(&self) -> bool {
        *self.halted.borrow()
    }

    /// Move `Running -> Draining`.
    ///
    /// Returns false when any stop was already requested.
    pub fn begin_drain(&self) -> bool {
        let requested = self.mode.send_if_modified(|mode| {
            if mode.is_some() {
                return false;
            }
            *mode = Some(StopMode::Graceful);
            true
        });
        if !requested {
            debug!("Graceful stop ignored, already {}", self.state());
            return false;
        }

        let changed = self.state.send_if_modified(|state| {
            if *state != EngineState::Running {
                return false;
            }
            *state = EngineState::Draining;
            true
        });
        if changed {
            info!("Engine state: {}", EngineState::Draining);
        }
        true
    }

    /// Request an immediate stop and move straight to `Stopped`. Escalates a
    /// graceful stop in progress.
    ///
    /// Returns false when an immediate stop was already requested or the
    /// worker has already halted.
    pub fn request_immediate(&self) -> bool {
        if self.is_halted() {
            debug!("Immediate stop ignored, engine already stopped");
            return false;
        }
        let requested = self.mode.send_if_modified(|mode| {
            if *mode == Some(StopMode::Immediate) {
                return false;
            }
            *mode = Some(StopMode::Immediate);
            true
        });
        if requested {
            info!("Immediate stop requested (state: {})", self.state());
            self.publish_stopped();
        }
        requested
    }

    /// Record that the worker has exited. Only the worker supervisor calls this.
    pub fn mark_stopped(&self) {
        self.publish_stopped();
        self.halted.send_if_modified(|halted| {
            if *halted {
                return false;
            }
            *halted = true;
            true
        });
    }

    fn publish_stopped(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == EngineState::Stopped {
                return false;
            }
            *state = EngineState::Stopped;
            true
        });
        if changed {
            info!("Engine state: {}", EngineState::Stopped);
        }
    }

    /// Record an unrecoverable worker failure; the first fault wins
    pub fn record_fault(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut fault = self.fault.lock().unwrap_or_else(|p| p.into_inner());
        if fault.is_none() {
            error!("Engine fault: {}", reason);
            *fault = Some(reason);
        } else {
            warn!("Additional engine fault ignored: {}", reason);
        }
    }

    pub fn fault(&self) -> Option<String> {
        self.fault.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Get a receiver for state changes
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Get a receiver for stop requests
    pub fn subscribe_mode(&self) -> watch::Receiver<Option<StopMode>> {
        self.mode.subscribe()
    }

    /// Wait until the worker has halted
    pub async fn wait_stopped(&self) {
        let mut rx = self.halted.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|halted| *halted).await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for an OS shutdown signal.
///
/// SIGINT and SIGTERM map to a graceful stop, SIGQUIT (Ctrl+\) to an
/// immediate one. Only Ctrl+C is observed on non-unix targets.
pub async fn wait_for_signal() -> StopMode {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = async {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        let quit = async {
            match signal(SignalKind::quit()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGQUIT handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT");
                StopMode::Graceful
            }
            _ = terminate => {
                info!("Received SIGTERM");
                StopMode::Graceful
            }
            _ = quit => {
                warn!("Received SIGQUIT - immediate stop");
                StopMode::Immediate
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("Received Ctrl+C");
        StopMode::Graceful
    }
}
