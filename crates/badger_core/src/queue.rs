//! Ordered queues shared with out-of-process consumers.
//!
//! Two primitives:
//!
//! * [`DispatchQueue`] - one command channel per host, appended at the tail
//!   and consumed from the head by the agent running on that host.
//! * [`PendingQueue`] - the single shared list of orders waiting for
//!   capacity, addressed by index like a JSON array.
//!
//! Both must preserve append order. Neither is transactional with the
//! [`Store`](crate::store::Store).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Appends a command line to the tail of `channel`.
    async fn append(&self, channel: &str, command: String) -> Result<(), StoreError>;
    /// Returns the oldest command on `channel` without removing it.
    async fn peek_head(&self, channel: &str) -> Result<Option<String>, StoreError>;
    /// Removes and returns the oldest command on `channel`.
    async fn pop_head(&self, channel: &str) -> Result<Option<String>, StoreError>;
    async fn len(&self, channel: &str) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait PendingQueue: Send + Sync {
    async fn append(&self, entry: Value) -> Result<(), StoreError>;
    async fn len(&self) -> Result<usize, StoreError>;
    /// Returns the entry at `index` (0 is the head) without removing it.
    async fn peek(&self, index: usize) -> Result<Option<Value>, StoreError>;
    /// Removes and returns the entry at `index`.
    async fn pop(&self, index: usize) -> Result<Option<Value>, StoreError>;
}
