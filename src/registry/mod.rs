//! In-memory request registry and its background eviction task.

pub mod store;
pub mod sweeper;

pub use store::RequestRegistry;
pub use sweeper::spawn_eviction_task;
