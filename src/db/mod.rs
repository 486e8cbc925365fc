//! Persistence: the [`DataFlowStore`] sink and its implementations

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::{MongoClient, MongoStore};
pub use store::{DataFlowRequestKeys, DataFlowStore};
