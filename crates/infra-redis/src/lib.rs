// Tally Infrastructure - Redis Adapter
// Implements: BatchStore as a direct mapping onto Redis hash/set/list commands

mod batch_store;
mod connection;
mod error;

pub use batch_store::RedisBatchStore;
pub use connection::connect;
