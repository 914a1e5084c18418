// Public modules
pub mod archive;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod release;
pub mod ssh;
pub mod target;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
