// Tally Core - Batch tracking, completion engine & ports
// NO infrastructure dependencies: stores and transports are reached through port traits

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
