//! Message feeds driving the persister engine

pub mod feed;

pub use feed::{FeedHandle, FeedReport, MessageSource, SimulatedFeed};
