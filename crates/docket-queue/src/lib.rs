//! Job and document stores.
//!
//! The worker talks to storage only through [`JobStore`] and
//! [`DocumentStore`]. Two implementations ship here: in-memory stores for
//! development and tests, and Redis stores for shared deployments.

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{QueueError, QueueResult};
pub use memory::{InMemoryDocumentStore, InMemoryJobStore};
pub use redis_store::{RedisDocumentStore, RedisJobStore, RedisStoreConfig};
pub use store::{DocumentStore, JobStore};
