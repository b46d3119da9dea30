use async_trait::async_trait;
use std::time::Duration;

/// CommandExecutor: every external call of the benchmark (curl, ping, dd)
/// goes through this interface.
#[async_trait]
pub trait CommandExecutor: Sync + Send {
    /// Run a shell command and return its trimmed stdout.
    ///
    /// Failures of any kind (spawn error, non-zero exit, timeout) are reported
    /// as an empty string, which callers treat as "no data".
    async fn execute(&self, command: &str, timeout: Duration) -> String;
}
