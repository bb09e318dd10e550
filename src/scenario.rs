//! Demo scenarios
//!
//! - Graceful: one bus feeds the engine, `stop()` is called while the feed
//!   is still producing, later messages are rejected.
//! - Immediate: three buses under high load, `stop_immediately()` drops
//!   whatever is still queued.

use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::collector::{FeedHandle, FeedReport, SimulatedFeed};
use crate::config::{AppConfig, FeedConfig};
use crate::coordination::StopMode;
use crate::error::Result;
use crate::persistence::{PersisterEngine, Sink};
use crate::services::MetricsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Graceful,
    Immediate,
}

impl Scenario {
    /// Stop discipline the scenario applies when its timer fires
    pub fn stop_mode(&self) -> StopMode {
        match self {
            Scenario::Graceful => StopMode::Graceful,
            Scenario::Immediate => StopMode::Immediate,
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scenario::Graceful => write!(f, "graceful"),
            Scenario::Immediate => write!(f, "immediate"),
        }
    }
}

/// Outcome of a scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    /// Stop discipline actually applied (an OS signal may override the scenario's)
    pub stop_mode: StopMode,
    /// True when `interrupt` fired before the scenario timer
    pub interrupted: bool,
    pub feeds: Vec<FeedReport>,
    pub metrics: MetricsSnapshot,
}

/// Run a scenario on its configured timers
pub async fn run_scenario<S>(
    scenario: Scenario,
    config: &AppConfig,
    sink: S,
) -> Result<ScenarioReport>
where
    S: Sink + 'static,
{
    run_scenario_with_interrupt(scenario, config, sink, std::future::pending()).await
}

/// Run a scenario, stopping early with the mode yielded by `interrupt`
/// (e.g. an OS signal) if it resolves before the scenario timer
pub async fn run_scenario_with_interrupt<S, F>(
    scenario: Scenario,
    config: &AppConfig,
    sink: S,
    interrupt: F,
) -> Result<ScenarioReport>
where
    S: Sink + 'static,
    F: Future<Output = StopMode>,
{
    let (feeds, stop_after, linger) = match scenario {
        Scenario::Graceful => (
            &config.scenario.graceful_feeds,
            Duration::from_millis(config.scenario.graceful_stop_after_ms),
            Duration::from_millis(config.scenario.graceful_linger_ms),
        ),
        Scenario::Immediate => (
            &config.scenario.immediate_feeds,
            Duration::from_millis(config.scenario.immediate_stop_after_ms),
            Duration::ZERO,
        ),
    };

    info!("Scenario {} starting with {} feeds", scenario, feeds.len());

    let engine = Arc::new(PersisterEngine::start(config.engine.clone(), sink));
    let handles = spawn_feeds(feeds, &engine);

    let (stop_mode, interrupted) = tokio::select! {
        _ = tokio::time::sleep(stop_after) => (scenario.stop_mode(), false),
        mode = interrupt => {
            warn!("Scenario {} interrupted, {} stop", scenario, mode);
            (mode, true)
        }
    };

    let stop_result = match stop_mode {
        StopMode::Graceful => engine.stop().await,
        StopMode::Immediate => engine.stop_immediately().await,
    };
    info!("Engine stopped ({} stop): {}", stop_mode, engine.queue_stats());

    // Feeds keep producing against the stopped engine, showing rejection.
    if stop_result.is_ok() && !interrupted && !linger.is_zero() {
        tokio::time::sleep(linger).await;
    }

    let reports = stop_feeds(handles).await;
    stop_result?;

    let report = ScenarioReport {
        scenario,
        stop_mode,
        interrupted,
        feeds: reports,
        metrics: engine.metrics(),
    };
    for feed in &report.feeds {
        info!("Feed report: {}", feed);
    }
    info!(
        "Scenario {} finished: accepted={} persisted={} failed={} discarded={} rejected={}",
        scenario,
        report.metrics.accepted,
        report.metrics.persisted,
        report.metrics.failed,
        report.metrics.discarded,
        report.metrics.rejected
    );
    Ok(report)
}

fn spawn_feeds(feeds: &[FeedConfig], engine: &Arc<PersisterEngine>) -> Vec<FeedHandle> {
    feeds
        .iter()
        .map(|feed| FeedHandle::spawn(SimulatedFeed::from_config(feed), engine.clone()))
        .collect()
}

async fn stop_feeds(handles: Vec<FeedHandle>) -> Vec<FeedReport> {
    join_all(handles.into_iter().map(FeedHandle::stop))
        .await
        .into_iter()
        .filter_map(|result| match result {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Feed did not shut down cleanly: {}", e);
                None
            }
        })
        .collect()
}
