//! trialfarm-runtime: Transport layer for trialfarm workers
//!
//! This crate provides the ways a worker reaches its host:
//! - Shell transport over SSH (or the local shell)
//! - Mock transport with scripted responses for tests (`test-util` feature)

#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod process;
pub mod traits;

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockTransport;
pub use process::ShellTransport;
pub use traits::Transport;
