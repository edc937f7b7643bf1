//! Video timeline pipeline worker.
//!
//! This crate hosts the two stream consumers of the pipeline:
//! - The forwarding relay, turning raw-interval change records into
//!   bucket contributions
//! - The aggregate updater, folding contributions into aggregate buckets
//!
//! It also provides the raw-interval recorder used on the write path and
//! the stream executor both consumers run on.

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod recorder;
pub mod relay;
pub mod updater;

pub use config::{WorkerConfig, WorkerRole, WriteMode};
pub use error::{WorkerError, WorkerResult};
pub use executor::{BatchHandler, StreamExecutor};
pub use logging::BatchLogger;
pub use recorder::RawIntervalRecorder;
pub use relay::ForwardingRelay;
pub use updater::AggregateUpdater;
