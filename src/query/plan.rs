use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::graph::{GraphView, SharedGraph};
use crate::primitives::cron::Cron;
use crate::types::Result;

use super::op::{ExecCtx, Operator};
use super::options::ExecOptions;
use super::record::Record;

/// Materialised result returned by `execute`.
#[derive(Debug, Default)]
pub struct QueryResult {
    /// Records produced before completion or drain.
    pub records: Vec<Record>,
    /// The plan was drained (timed out) before its operators were exhausted.
    pub timed_out: bool,
}

/// Cloneable handle that asks a running plan to stop producing records.
///
/// Safe to call from any thread, including a timer callback.
#[derive(Clone, Debug)]
pub struct DrainHandle {
    flag: Arc<AtomicBool>,
}

impl DrainHandle {
    /// Requests the drain.
    pub fn drain(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True once a drain was requested.
    pub fn is_drained(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// An operator tree plus its execution options.
pub struct ExecutionPlan {
    root: Box<dyn Operator>,
    options: ExecOptions,
    drain: Arc<AtomicBool>,
    initialized: bool,
}

impl ExecutionPlan {
    /// Plan rooted at `root`.
    pub fn new(root: Box<dyn Operator>, options: ExecOptions) -> Self {
        Self {
            root,
            options,
            drain: Arc::new(AtomicBool::new(false)),
            initialized: false,
        }
    }

    /// Options in effect.
    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    /// Handle for draining this plan from another thread.
    pub fn drain_handle(&self) -> DrainHandle {
        DrainHandle {
            flag: Arc::clone(&self.drain),
        }
    }

    /// Runs the plan to completion against `graph`. The caller holds whatever lock
    /// protects the graph for the duration of the call.
    pub fn execute(&mut self, graph: &dyn GraphView) -> Result<QueryResult> {
        self.drain.store(false, Ordering::Release);
        self.run(graph)
    }

    /// Runs the plan under the graph's read lock, draining it once the configured
    /// timeout elapses on `cron`.
    pub fn execute_shared(&mut self, graph: &SharedGraph, cron: Option<&Cron>) -> Result<QueryResult> {
        self.drain.store(false, Ordering::Release);
        let guard = graph.read();
        let task = match (cron, self.options.timeout) {
            (Some(cron), Some(timeout)) => {
                let handle = self.drain_handle();
                Some(cron.add_task(timeout, move || handle.drain()))
            }
            _ => None,
        };
        let result = self.run(&*guard);
        if let (Some(cron), Some(task)) = (cron, task) {
            cron.abort_task(task);
        }
        result
    }

    /// Independent copy of this plan for concurrent execution. Algebra leaves
    /// holding matrices are shared.
    pub fn replicate(&self) -> ExecutionPlan {
        ExecutionPlan::new(self.root.clone_op(), self.options.clone())
    }

    fn run(&mut self, graph: &dyn GraphView) -> Result<QueryResult> {
        if self.initialized {
            self.root.reset()?;
        } else {
            self.root.init(&self.options)?;
            self.initialized = true;
        }
        let ctx = ExecCtx::new(graph, &self.drain);
        let mut records = Vec::new();
        while !ctx.is_draining() {
            match self.root.consume(&ctx)? {
                Some(record) => records.push(record),
                None => break,
            }
        }
        let timed_out = ctx.is_draining();
        if timed_out {
            debug!(root = self.root.name(), records = records.len(), "query timed out; plan drained");
        }
        Ok(QueryResult { records, timed_out })
    }
}
