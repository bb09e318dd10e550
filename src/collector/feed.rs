//! Message feeds
//!
//! A [`MessageSource`] yields messages together with the delay that precedes
//! each one. [`FeedHandle`] drives a source into a [`PersisterEngine`] on its
//! own task and owns that task: dropping the handle aborts the feed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::domain::{Category, Message};
use crate::error::{PersisterError, Result};
use crate::persistence::PersisterEngine;

/// Finite, lazy, time-ordered producer of messages
pub trait MessageSource: Send {
    /// Feed name used in logs and reports
    fn name(&self) -> &str;

    /// Next message and the delay to wait before emitting it; `None` when
    /// the source is exhausted
    fn next_message(&mut self) -> Option<(Duration, Message)>;
}

/// Simulated message bus emitting random messages at random intervals.
///
/// Each delay is `base_interval * uniform(1..10)` and each category is
/// `uniform(0..=9)`.
pub struct SimulatedFeed {
    name: String,
    remaining: u32,
    base_interval: Duration,
    rng: StdRng,
}

impl SimulatedFeed {
    pub fn new(name: &str, messages: u32, base_interval: Duration, rng: StdRng) -> Self {
        Self {
            name: name.to_string(),
            remaining: messages,
            base_interval,
            rng,
        }
    }

    /// Build a feed from config, seeding its RNG from `seed` when present
    pub fn from_config(config: &FeedConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(&config.name, config.messages, config.interval(), rng)
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl MessageSource for SimulatedFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_message(&mut self) -> Option<(Duration, Message)> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let delay = self.base_interval * self.rng.gen_range(1..10u32);
        let category = Category::saturating(self.rng.gen_range(0..=Category::MAX));
        Some((delay, Message::new(&self.name, category)))
    }
}

/// What a feed did before it finished or was stopped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedReport {
    pub name: String,
    pub emitted: u64,
    pub accepted: u64,
    pub rejected: u64,
}

impl std::fmt::Display for FeedReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: emitted={} accepted={} rejected={}",
            self.name, self.emitted, self.accepted, self.rejected
        )
    }
}

/// Owning handle to a running feed task.
///
/// Dropping the handle aborts the feed. Call [`stop()`](Self::stop) to
/// cancel it cleanly or [`join()`](Self::join) to let it run to completion.
pub struct FeedHandle {
    name: String,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<FeedReport>>,
}

impl FeedHandle {
    /// Spawn a task pumping `source` into `engine`
    pub fn spawn<M>(source: M, engine: Arc<PersisterEngine>) -> Self
    where
        M: MessageSource + 'static,
    {
        let name = source.name().to_string();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(pump(source, engine, stop_rx));

        info!("Feed {} started", name);

        Self {
            name,
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the feed task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the feed and wait for its report
    pub async fn stop(mut self) -> Result<FeedReport> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.wait().await
    }

    /// Wait for the feed to exhaust its source
    pub async fn join(mut self) -> Result<FeedReport> {
        // Keep the sender alive so the task does not read its drop as a stop.
        let _stop_tx = self.stop_tx.take();
        self.wait().await
    }

    async fn wait(&mut self) -> Result<FeedReport> {
        let Some(task) = self.task.take() else {
            return Err(PersisterError::Other(anyhow::anyhow!(
                "feed {} already joined",
                self.name
            )));
        };
        task.await.map_err(|e| {
            PersisterError::Other(anyhow::anyhow!("feed {} task failed: {}", self.name, e))
        })
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("Feed {} handle dropped, aborting task", self.name);
            task.abort();
        }
    }
}

async fn pump<M: MessageSource>(
    mut source: M,
    engine: Arc<PersisterEngine>,
    mut stop_rx: oneshot::Receiver<()>,
) -> FeedReport {
    let mut report = FeedReport {
        name: source.name().to_string(),
        ..Default::default()
    };

    while let Some((delay, message)) = source.next_message() {
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                debug!("Feed {} stopped", report.name);
                return report;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        report.emitted += 1;
        info!(feed = %report.name, category = %message.category(), "{}", message.name());

        match engine.persist(message) {
            Ok(()) => report.accepted += 1,
            Err(e) if e.is_rejection() => {
                report.rejected += 1;
                debug!("Feed {}: {}", report.name, e);
            }
            Err(e) => {
                report.rejected += 1;
                warn!("Feed {}: persist failed: {}", report.name, e);
            }
        }
    }

    info!("Feed {} finished ({})", report.name, report);
    report
}
