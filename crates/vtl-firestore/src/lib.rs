//! Firestore-backed stores for the video timeline pipeline.
//!
//! This crate provides:
//! - Store traits for raw intervals and aggregate buckets
//! - Firestore REST repositories implementing them
//! - An in-memory store with the same paging semantics
//! - Service account authentication via gcp_auth
//! - Retry with backoff and request metrics

pub mod aggregate_repo;
pub mod client;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod paging;
pub mod raw_interval_repo;
pub mod retry;
pub mod store;
pub mod token_cache;
pub mod types;

pub use aggregate_repo::AggregateRepository;
pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use memory::MemoryStore;
pub use raw_interval_repo::RawIntervalRepository;
pub use store::{AggregateStore, Page, RawIntervalStore, Versioned};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
