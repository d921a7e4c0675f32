use std::time::Duration;

/// Outcome of an insert, update or delete.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub success: bool,
    /// Rows written (insert) or affected (update/delete).
    pub rows_affected: u64,
    pub execution_time_ms: f64,
    /// Server-reported strategy tag, when the server sends one.
    pub method_used: Option<String>,
}

impl OperationResult {
    pub(crate) fn new(
        success: bool,
        rows_affected: u64,
        elapsed: Duration,
        method_used: Option<String>,
    ) -> Self {
        Self {
            success,
            rows_affected,
            execution_time_ms: elapsed.as_secs_f64() * 1000.0,
            method_used,
        }
    }

    /// Alias for [`Self::rows_affected`] on insert results.
    pub fn rows_written(&self) -> u64 {
        self.rows_affected
    }
}

/// Snapshot of a connection's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connected: bool,
    pub authenticated: bool,
    pub client_name: String,
    pub server_location: String,
}
