//! Ordering operator: full sort, or a bounded heap when a limit is known.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tracing::trace;

use crate::profile::{profile_timer, record_profile_timer, ProfileKind};
use crate::types::Result;

use super::op::{ExecCtx, Operator};
use super::options::ExecOptions;
use super::record::Record;

/// Sort direction of one key.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// One ordering key: the value at `slot`, in `direction`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SortKey {
    /// Record slot compared.
    pub slot: usize,
    /// Direction.
    pub direction: SortDirection,
}

impl SortKey {
    /// Ascending key.
    pub fn asc(slot: usize) -> Self {
        Self {
            slot,
            direction: SortDirection::Ascending,
        }
    }

    /// Descending key.
    pub fn desc(slot: usize) -> Self {
        Self {
            slot,
            direction: SortDirection::Descending,
        }
    }
}

/// Compares two records key by key; the first unequal key decides, scaled by its
/// direction.
pub fn compare_records(keys: &[SortKey], a: &Record, b: &Record) -> Ordering {
    for key in keys {
        let ord = a.value(key.slot).total_cmp(&b.value(key.slot));
        let ord = match key.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Heap entry. Greater means ranked later; `seq` breaks ties by arrival so the
/// bounded mode keeps the same records a stable sort would.
struct Ranked {
    record: Record,
    seq: u64,
    keys: Arc<[SortKey]>,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_records(&self.keys, &self.record, &other.record).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SortState {
    Filling,
    Emitting,
}

/// Ordering operator.
///
/// Without a limit every record is buffered and sorted once the child is
/// exhausted. With `limit` (and `skip`) known, a max-heap holds at most
/// `skip + limit` records and evicts its worst member whenever a better record
/// arrives; skip and limit themselves are applied by an ancestor.
pub struct SortOp {
    child: Box<dyn Operator>,
    keys: Arc<[SortKey]>,
    skip: u64,
    limit: Option<u64>,
    heap: BinaryHeap<Ranked>,
    buffer: Vec<Record>,
    seq: u64,
    state: SortState,
}

impl SortOp {
    /// Full ordering of the child's output.
    pub fn new(child: Box<dyn Operator>, keys: Vec<SortKey>) -> Self {
        Self {
            child,
            keys: keys.into(),
            skip: 0,
            limit: None,
            heap: BinaryHeap::new(),
            buffer: Vec::new(),
            seq: 0,
            state: SortState::Filling,
        }
    }

    /// Bounded ordering keeping the best `skip + limit` records.
    pub fn with_limit(mut self, skip: u64, limit: u64) -> Self {
        self.skip = skip;
        self.limit = Some(limit);
        self
    }

    fn heap_cap(&self) -> Option<usize> {
        self.limit
            .map(|limit| limit.saturating_add(self.skip).min(usize::MAX as u64) as usize)
    }

    fn absorb(&mut self, record: Record) {
        let seq = self.seq;
        self.seq += 1;
        let Some(cap) = self.heap_cap() else {
            self.buffer.push(record);
            return;
        };
        if cap == 0 {
            return;
        }
        let ranked = Ranked {
            record,
            seq,
            keys: Arc::clone(&self.keys),
        };
        if self.heap.len() < cap {
            self.heap.push(ranked);
            return;
        }
        let better = self.heap.peek().is_some_and(|worst| ranked < *worst);
        if better {
            self.heap.pop();
            self.heap.push(ranked);
        }
    }

    /// Leaves `buffer` holding the ranked records reversed, best last.
    fn finish(&mut self) {
        if self.heap_cap().is_some() {
            self.buffer = std::mem::take(&mut self.heap)
                .into_sorted_vec()
                .into_iter()
                .map(|ranked| ranked.record)
                .collect();
        } else {
            let keys = Arc::clone(&self.keys);
            self.buffer.sort_by(|a, b| compare_records(&keys, a, b));
        }
        self.buffer.reverse();
    }
}

impl Operator for SortOp {
    fn name(&self) -> &'static str {
        "Sort"
    }

    fn init(&mut self, options: &ExecOptions) -> Result<()> {
        if let Some(cap) = self.heap_cap() {
            self.heap = BinaryHeap::with_capacity(cap.min(1024));
        }
        self.child.init(options)
    }

    fn consume(&mut self, ctx: &ExecCtx<'_>) -> Result<Option<Record>> {
        if self.state == SortState::Filling {
            let timer = profile_timer();
            while let Some(record) = self.child.consume(ctx)? {
                self.absorb(record);
            }
            self.finish();
            record_profile_timer(ProfileKind::Sort, timer);
            trace!(
                seen = self.seq,
                kept = self.buffer.len(),
                bounded = self.limit.is_some(),
                "sort materialized"
            );
            self.state = SortState::Emitting;
        }
        Ok(self.buffer.pop())
    }

    fn reset(&mut self) -> Result<()> {
        self.heap.clear();
        self.buffer.clear();
        self.seq = 0;
        self.state = SortState::Filling;
        self.child.reset()
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        let mut op = SortOp::new(self.child.clone_op(), self.keys.to_vec());
        op.skip = self.skip;
        op.limit = self.limit;
        Box::new(op)
    }
}
