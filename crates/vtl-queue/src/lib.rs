//! Redis Streams transport for the video timeline pipeline.
//!
//! This crate provides:
//! - Consumer-group streams with ack, stale-message reclaim and dead-lettering
//! - The change feed carrying raw-interval change records
//! - The contribution queue, sharded by bucket partition key

pub mod change_feed;
pub mod config;
pub mod contribution;
pub mod error;
pub mod stream;

pub use change_feed::{ChangeFeed, ChangeFeedSink};
pub use config::QueueConfig;
pub use contribution::{shard_for, ContributionPublisher, ContributionQueue};
pub use error::{QueueError, QueueResult};
pub use stream::{Delivery, ReadBatch, Rejected, StreamQueue};
