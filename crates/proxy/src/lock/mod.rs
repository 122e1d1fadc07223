//! Distributed lease locks
//!
//! Serializes certificate issuance across proxy instances that share one
//! backing store.
//!
//! - [`LockClient`] acquires and releases leases through conditional writes
//!   and keeps held leases alive with a heartbeat
//! - [`LockManager`] tracks the leases this process holds, making `lock`
//!   re-entrant within the process

mod client;
mod manager;

pub use client::{lock_key, LeaseHandle, LeaseSettings, LockClient, LOCK_KEY_PREFIX};
pub use manager::LockManager;
