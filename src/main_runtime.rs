use persister::config::{AppConfig, LoggingConfig, SinkKind};
use persister::coordination::wait_for_signal;
use persister::error::Result;
use persister::persistence::{ConsoleSink, JsonLinesSink, MemorySink, MemorySinkHandle, Sink};
use persister::scenario::{run_scenario_with_interrupt, Scenario, ScenarioReport};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. The returned guard must live until exit so
/// buffered file output is flushed.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},persister={}", config.level, config.level))
    });

    let mut guard = None;
    let file_layer = match &config.dir {
        Some(log_dir) => {
            // `tracing_appender::rolling::daily` panics if it can't create the
            // initial log file, so preflight writability.
            let writable = std::fs::create_dir_all(log_dir).is_ok() && {
                let test_path = log_dir.join(".persister_write_test");
                let ok = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&test_path)
                    .is_ok();
                let _ = std::fs::remove_file(&test_path);
                ok
            };

            if writable {
                let file_appender = tracing_appender::rolling::daily(log_dir, "persister.log");
                let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
                guard = Some(worker_guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false) // No color codes in file
                        .with_target(true),
                )
            } else {
                eprintln!(
                    "Warning: Could not write to log directory {}, file logging disabled",
                    log_dir.display()
                );
                None
            }
        }
        None => None,
    };

    let console_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });
    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    guard
}

/// Build the configured sink. The memory sink also yields its read handle.
pub async fn build_sink(config: &AppConfig) -> Result<(Box<dyn Sink>, Option<MemorySinkHandle>)> {
    match config.sink.kind {
        SinkKind::Console => Ok((Box::new(ConsoleSink::new()), None)),
        SinkKind::Jsonl => {
            let sink = JsonLinesSink::open(&config.sink.path).await?;
            info!("Persisting to {}", sink.path().display());
            Ok((Box::new(sink), None))
        }
        SinkKind::Memory => {
            let sink = MemorySink::new();
            let handle = sink.handle();
            Ok((Box::new(sink), Some(handle)))
        }
    }
}

/// Run one scenario against a freshly built sink, stopping early on an OS signal
pub async fn run_mode(scenario: Scenario, config: &AppConfig) -> Result<ScenarioReport> {
    let (sink, memory) = build_sink(config).await?;
    let report = run_scenario_with_interrupt(scenario, config, sink, wait_for_signal()).await?;

    if let Some(memory) = memory {
        info!("Memory sink holds {} messages", memory.len());
    }
    Ok(report)
}
