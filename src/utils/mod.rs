//! Generic utility primitives with zero domain knowledge.
//!
//! - `artifact` - Glob resolution of artifact patterns
//! - `command` - Child process execution with live output relay
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell escaping and quoting

pub mod artifact;
pub mod command;
pub mod io;
pub mod shell;
