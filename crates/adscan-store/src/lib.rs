//! Durable job store.
//!
//! This crate provides:
//! - The [`JobStore`] contract with compare-and-swap transitions
//! - An in-memory backend for tests and single-process runs
//! - A Redis backend using Lua scripts for atomic swaps
//! - The per-job stage ledger (checkpoints and attempts)

pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use redis_store::{RedisJobStore, StoreConfig};
pub use store::{JobStore, MAX_ATTEMPTS_PER_JOB};
