use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{AppConfig, SinkKind};

#[derive(Parser)]
#[command(name = "persister")]
#[command(author = "Persister Team")]
#[command(version = "0.1.0")]
#[command(about = "Asynchronous message persister with graceful and immediate shutdown", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory (default.toml and {PERSISTER_ENV}.toml)
    #[arg(short, long, default_value = "config", env = "PERSISTER_CONFIG_DIR")]
    pub config: PathBuf,

    /// Override the configured sink (console, jsonl, memory)
    #[arg(short, long)]
    pub sink: Option<SinkKind>,

    /// Override the output file of the jsonl sink
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Cancel the in-flight write on an immediate stop
    #[arg(long)]
    pub abort_in_flight: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// One feed, graceful stop: every accepted message is persisted
    Graceful,
    /// Three high-load feeds, immediate stop: queued messages are dropped
    Immediate,
    /// Run the graceful scenario, then the immediate one
    Demo,
    /// Print the effective configuration as TOML
    Config,
}

impl Cli {
    /// Apply command line overrides on top of loaded configuration
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(kind) = self.sink {
            config.sink.kind = kind;
        }
        if let Some(path) = &self.output {
            config.sink.path = path.clone();
        }
        if self.abort_in_flight {
            config.engine.abort_in_flight = true;
        }
    }
}
