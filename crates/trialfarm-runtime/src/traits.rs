//! Transport trait definitions

use async_trait::async_trait;
use trialfarm_core::FarmResult;

/// Transport for reaching the host behind a worker
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run the device status command and return its raw report
    async fn status_report(&self) -> FarmResult<String>;

    /// Run a shell command with `stdin` as its input, returning combined stdout and stderr
    async fn execute(&self, command: &str, stdin: &str) -> FarmResult<String>;

    /// Get the transport name
    fn name(&self) -> &'static str;
}
