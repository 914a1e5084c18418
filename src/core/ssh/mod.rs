//! SSH connections to deployment targets, built on the system `ssh` and
//! `scp` binaries.

mod client;
mod key;

pub use client::{CommandOutput, SshClient, SshOptions};
pub use key::PrivateKey;
