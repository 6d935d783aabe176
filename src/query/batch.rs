use tracing::trace;

use crate::types::Result;

use super::op::{ExecCtx, Operator};
use super::record::Record;

/// Records gathered for one traversal round. Row `i` of the filter matrix refers
/// to `records[i]`.
#[derive(Debug, Default)]
pub(crate) struct RecordBatch {
    records: Vec<Record>,
    capacity: usize,
}

impl RecordBatch {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn get(&self, row: usize) -> Option<&Record> {
        self.records.get(row)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    /// Refills from `child` until full or the child is exhausted. Records with no
    /// node at `src_slot` (an unmatched optional branch) are dropped uncounted.
    pub(crate) fn fill_from(
        &mut self,
        child: &mut dyn Operator,
        ctx: &ExecCtx<'_>,
        src_slot: usize,
    ) -> Result<usize> {
        self.records.clear();
        while self.records.len() < self.capacity {
            let Some(record) = child.consume(ctx)? else {
                break;
            };
            if record.node(src_slot).is_none() {
                trace!(slot = src_slot, "batch dropped record without source node");
                continue;
            }
            self.records.push(record);
        }
        Ok(self.records.len())
    }
}
