//! Storage sinks
//!
//! A sink performs the durable write of a single message. The engine owns
//! its sink exclusively and drives it from one worker task, so
//! implementations take `&mut self` and need no internal locking.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::domain::Message;

/// Per-message sink failure
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink rejected message: {0}")]
    Rejected(String),
}

/// Destination for persisted messages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sink: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Persist one message
    async fn write(&mut self, message: &Message) -> Result<(), SinkError>;

    /// Flush buffered output; called once when the worker halts
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait]
impl Sink for Box<dyn Sink> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn write(&mut self, message: &Message) -> Result<(), SinkError> {
        (**self).write(message).await
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush().await
    }
}

/// Prints each message description to stdout
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn write(&mut self, message: &Message) -> Result<(), SinkError> {
        println!("{}", message.name());
        Ok(())
    }
}

/// Appends one JSON object per message to a file
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Open (or create) the target file in append mode
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        debug!("JSON lines sink opened at {}", path.display());

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn write(&mut self, message: &Message) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_data().await?;
        Ok(())
    }
}

/// Keeps persisted messages in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Message>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for reading what the sink has received, usable after the sink
    /// has been moved into an engine
    pub fn handle(&self) -> MemorySinkHandle {
        MemorySinkHandle {
            records: self.records.clone(),
        }
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&mut self, message: &Message) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.clone());
        Ok(())
    }
}

/// Read side of a [`MemorySink`]
#[derive(Debug, Clone)]
pub struct MemorySinkHandle {
    records: Arc<Mutex<Vec<Message>>>,
}

impl MemorySinkHandle {
    /// Messages received so far, in write order
    pub fn messages(&self) -> Vec<Message> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let mut sink = MemorySink::new();
        let handle = sink.handle();
        let a = Message::new("bus", Category::new(1).unwrap());
        let b = Message::new("bus", Category::new(2).unwrap());

        sink.write(&a).await.unwrap();
        sink.write(&b).await.unwrap();

        assert_eq!(handle.messages(), vec![a, b]);
        assert_eq!(handle.len(), 2);
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends() {
        let path = std::env::temp_dir()
            .join(format!("persister-{}", uuid::Uuid::new_v4()))
            .join("messages.jsonl");
        let a = Message::new("bus", Category::new(5).unwrap());
        let b = Message::new("bus", Category::new(6).unwrap());

        let mut sink = JsonLinesSink::open(&path).await.unwrap();
        sink.write(&a).await.unwrap();
        sink.write(&b).await.unwrap();
        sink.flush().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<Message> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed, vec![a, b]);
        assert_eq!(parsed[0].category().value(), 5);

        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }
}
