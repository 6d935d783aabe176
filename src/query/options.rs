use std::time::Duration;

/// Execution knobs applied when a plan is initialised.
#[derive(Clone, Debug)]
pub struct ExecOptions {
    /// Records per traversal batch.
    pub batch_size: usize,
    /// Soft deadline after which the plan is drained.
    pub timeout: Option<Duration>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            batch_size: 16,
            timeout: None,
        }
    }
}

impl ExecOptions {
    /// Sets the traversal batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}
