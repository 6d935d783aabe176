use std::sync::atomic::{AtomicBool, Ordering};

use crate::graph::GraphView;
use crate::types::Result;

use super::options::ExecOptions;
use super::record::Record;

/// Per-call execution context handed down the operator tree.
pub struct ExecCtx<'a> {
    /// Graph borrowed under the caller's lock.
    pub graph: &'a dyn GraphView,
    drain: &'a AtomicBool,
}

impl<'a> ExecCtx<'a> {
    /// Context over `graph` observing `drain`.
    pub fn new(graph: &'a dyn GraphView, drain: &'a AtomicBool) -> Self {
        Self { graph, drain }
    }

    /// True once the plan has been asked to stop producing records.
    pub fn is_draining(&self) -> bool {
        self.drain.load(Ordering::Acquire)
    }
}

/// A pull-based operator. `consume` returns one record per call and `None` once
/// exhausted; operators surface child errors unchanged.
pub trait Operator: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Allocates per-execution state. Called once, before the first `consume`.
    fn init(&mut self, options: &ExecOptions) -> Result<()>;

    /// Produces the next record.
    fn consume(&mut self, ctx: &ExecCtx<'_>) -> Result<Option<Record>>;

    /// Drops buffered state so the next `consume` starts over.
    fn reset(&mut self) -> Result<()>;

    /// Uninitialised copy of this operator and its subtree.
    fn clone_op(&self) -> Box<dyn Operator>;
}
