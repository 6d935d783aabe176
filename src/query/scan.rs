//! Leaf and pass-through operators feeding the traversal and ordering operators.

use crate::types::{LabelId, NodeId, Result};

use super::op::{ExecCtx, Operator};
use super::options::ExecOptions;
use super::record::{Entry, Record};

/// Emits a fixed list of records, the argument source of a sub-plan.
#[derive(Clone, Debug)]
pub struct ValuesOp {
    records: Vec<Record>,
    pos: usize,
}

impl ValuesOp {
    /// Operator over `records`.
    pub fn new(records: Vec<Record>) -> Self {
        Self { records, pos: 0 }
    }
}

impl Operator for ValuesOp {
    fn name(&self) -> &'static str {
        "Values"
    }

    fn init(&mut self, _options: &ExecOptions) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn consume(&mut self, ctx: &ExecCtx<'_>) -> Result<Option<Record>> {
        if ctx.is_draining() {
            return Ok(None);
        }
        let record = self.records.get(self.pos).cloned();
        if record.is_some() {
            self.pos += 1;
        }
        Ok(record)
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(Self::new(self.records.clone()))
    }
}

/// Binds every node, or every node with a label, at `slot`.
#[derive(Clone, Debug)]
pub struct NodeScanOp {
    slot: usize,
    label: Option<LabelId>,
    ids: Option<Vec<NodeId>>,
    pos: usize,
}

impl NodeScanOp {
    /// Scan over all nodes.
    pub fn all(slot: usize) -> Self {
        Self {
            slot,
            label: None,
            ids: None,
            pos: 0,
        }
    }

    /// Scan over nodes carrying `label`.
    pub fn by_label(slot: usize, label: LabelId) -> Self {
        Self {
            label: Some(label),
            ..Self::all(slot)
        }
    }
}

impl Operator for NodeScanOp {
    fn name(&self) -> &'static str {
        "NodeScan"
    }

    fn init(&mut self, _options: &ExecOptions) -> Result<()> {
        self.ids = None;
        self.pos = 0;
        Ok(())
    }

    fn consume(&mut self, ctx: &ExecCtx<'_>) -> Result<Option<Record>> {
        if ctx.is_draining() {
            return Ok(None);
        }
        let ids = self
            .ids
            .get_or_insert_with(|| ctx.graph.node_ids(self.label));
        let Some(&id) = ids.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        Ok(Some(Record::with_node(self.slot, id)))
    }

    fn reset(&mut self) -> Result<()> {
        self.ids = None;
        self.pos = 0;
        Ok(())
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(Self {
            ids: None,
            pos: 0,
            ..self.clone()
        })
    }
}

/// Copies a node property into a scalar slot. Missing nodes or properties give null.
pub struct ProjectOp {
    child: Box<dyn Operator>,
    node_slot: usize,
    property: String,
    out_slot: usize,
}

impl ProjectOp {
    /// Projects `property` of the node at `node_slot` into `out_slot`.
    pub fn new(child: Box<dyn Operator>, node_slot: usize, property: impl Into<String>, out_slot: usize) -> Self {
        Self {
            child,
            node_slot,
            property: property.into(),
            out_slot,
        }
    }
}

impl Operator for ProjectOp {
    fn name(&self) -> &'static str {
        "Project"
    }

    fn init(&mut self, options: &ExecOptions) -> Result<()> {
        self.child.init(options)
    }

    fn consume(&mut self, ctx: &ExecCtx<'_>) -> Result<Option<Record>> {
        let Some(mut record) = self.child.consume(ctx)? else {
            return Ok(None);
        };
        let value = record
            .node(self.node_slot)
            .and_then(|id| ctx.graph.node(id))
            .map(|node| node.property(&self.property))
            .unwrap_or(super::Value::Null);
        record.set(self.out_slot, Entry::Scalar(value));
        Ok(Some(record))
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(Self::new(
            self.child.clone_op(),
            self.node_slot,
            self.property.clone(),
            self.out_slot,
        ))
    }
}

/// Drops the first `skip` records and stops after `limit` more.
pub struct SkipLimitOp {
    child: Box<dyn Operator>,
    skip: u64,
    limit: Option<u64>,
    skipped: u64,
    emitted: u64,
}

impl SkipLimitOp {
    /// Applies `skip` then `limit` to the child's output.
    pub fn new(child: Box<dyn Operator>, skip: u64, limit: Option<u64>) -> Self {
        Self {
            child,
            skip,
            limit,
            skipped: 0,
            emitted: 0,
        }
    }
}

impl Operator for SkipLimitOp {
    fn name(&self) -> &'static str {
        "SkipLimit"
    }

    fn init(&mut self, options: &ExecOptions) -> Result<()> {
        self.skipped = 0;
        self.emitted = 0;
        self.child.init(options)
    }

    fn consume(&mut self, ctx: &ExecCtx<'_>) -> Result<Option<Record>> {
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            return Ok(None);
        }
        while self.skipped < self.skip {
            if self.child.consume(ctx)?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }
        let record = self.child.consume(ctx)?;
        if record.is_some() {
            self.emitted += 1;
        }
        Ok(record)
    }

    fn reset(&mut self) -> Result<()> {
        self.skipped = 0;
        self.emitted = 0;
        self.child.reset()
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(Self::new(self.child.clone_op(), self.skip, self.limit))
    }
}
