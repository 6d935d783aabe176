//! Conditional traversal: expands a bound source node through an algebraic
//! expression, one batch of records at a time.

use tracing::{debug, trace};

use crate::algebra::{AlgebraicExpression, EvalContext};
use crate::graph::{Edge, GraphView};
use crate::matrix::{MatrixOptions, ScalarType, TupleCursor, TypedMatrix};
use crate::profile::{profile_timer, record_profile_timer, ProfileKind};
use crate::types::{GraphError, NodeId, RelationId, Result};

use super::batch::RecordBatch;
use super::op::{ExecCtx, Operator};
use super::options::ExecOptions;
use super::record::{Entry, Record};

/// Which stored edges connect a `(src, dst)` pair produced by the expression.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum Direction {
    /// Edges stored `src -> dst`.
    #[default]
    Outgoing,
    /// Edges stored `dst -> src`.
    Incoming,
    /// Either way round.
    Both,
}

/// Edge variable bound by a traversal.
#[derive(Clone, Debug)]
pub struct EdgeBinding {
    /// Record slot receiving the edge.
    pub slot: usize,
    /// Relations the edge may belong to; empty means any.
    pub relations: Vec<RelationId>,
    /// Orientation of stored edges relative to the traversal.
    pub direction: Direction,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TraverseState {
    Uninitialized,
    FillingBatch,
    Emitting,
    Exhausted,
}

/// Output record still owed edges for one `(src, dst)` pair.
#[derive(Debug)]
struct PendingEdges {
    record: Record,
    edges: Vec<Edge>,
}

/// Traversal operator.
///
/// Each round pulls up to `batch_size` records from the child, encodes their source
/// nodes in a filter matrix `F` (`F[i, src(record_i)] = true`), evaluates
/// `F * expression` and emits one record per `(row, dst)` entry of the product.
pub struct CondTraverseOp {
    child: Box<dyn Operator>,
    base_expr: AlgebraicExpression,
    expr: Option<AlgebraicExpression>,
    src_slot: usize,
    dst_slot: usize,
    edge: Option<EdgeBinding>,
    batch_size: Option<usize>,
    batch: RecordBatch,
    filter: Option<TypedMatrix>,
    result: Option<TypedMatrix>,
    cursor: TupleCursor,
    pending: Option<PendingEdges>,
    edge_buf: Vec<Edge>,
    options: MatrixOptions,
    state: TraverseState,
}

impl CondTraverseOp {
    /// Traverses from the node at `src_slot` through `expr`, binding destinations
    /// at `dst_slot`.
    pub fn new(child: Box<dyn Operator>, expr: AlgebraicExpression, src_slot: usize, dst_slot: usize) -> Self {
        Self {
            child,
            base_expr: expr,
            expr: None,
            src_slot,
            dst_slot,
            edge: None,
            batch_size: None,
            batch: RecordBatch::default(),
            filter: None,
            result: None,
            cursor: TupleCursor::new(),
            pending: None,
            edge_buf: Vec::new(),
            options: MatrixOptions::sparse_only(),
            state: TraverseState::Uninitialized,
        }
    }

    /// Also binds the connecting edge(s).
    pub fn with_edge(mut self, binding: EdgeBinding) -> Self {
        self.edge = Some(binding);
        self
    }

    /// Overrides the plan-wide batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    fn next_pending_edge(&mut self) -> Option<Record> {
        let (Some(pending), Some(binding)) = (self.pending.as_mut(), self.edge.as_ref()) else {
            return None;
        };
        let edge = pending.edges.pop()?;
        let mut record = if pending.edges.is_empty() {
            let done = self.pending.take()?;
            done.record
        } else {
            pending.record.clone()
        };
        record.set(binding.slot, Entry::Edge(edge));
        Some(record)
    }

    /// Allocates the filter and result matrices on first use, or again when the
    /// graph has grown past their width. The expression is prepared once per
    /// execution, never per batch.
    fn ensure_matrices(&mut self, graph: &dyn GraphView) -> Result<()> {
        let dim = graph.required_matrix_dim();
        let rows = self.batch.capacity() as u64;
        let stale = self.filter.as_ref().map_or(true, |f| f.ncols() != dim);
        if stale {
            self.filter = Some(TypedMatrix::with_options(ScalarType::Bool, rows, dim, self.options.clone())?);
            self.result = Some(TypedMatrix::with_options(ScalarType::Bool, rows, dim, self.options.clone())?);
            debug!(rows, dim, "traverse allocated filter and result matrices");
        }
        if self.expr.is_none() {
            let expr = self
                .base_expr
                .clone()
                .multiply_to_the_left(AlgebraicExpression::filter())
                .optimize()
                .prepare(graph)?;
            debug!(operands = expr.operand_count(), "traverse prepared expression");
            self.expr = Some(expr);
        }
        Ok(())
    }

    fn evaluate_batch(&mut self, ctx: &ExecCtx<'_>) -> Result<()> {
        self.ensure_matrices(ctx.graph)?;
        let (Some(expr), Some(filter), Some(result)) =
            (self.expr.as_ref(), self.filter.as_mut(), self.result.as_mut())
        else {
            return Err(GraphError::ContractViolation("traverse matrices missing"));
        };

        let timer = profile_timer();
        for (row, record) in self.batch.iter().enumerate() {
            let Some(src) = record.node(self.src_slot) else {
                return Err(GraphError::ContractViolation("batched record lost its source"));
            };
            filter.set_element(true, row as u64, src.0)?;
        }
        filter.wait()?;
        record_profile_timer(ProfileKind::Filter, timer);

        let eval_ctx = EvalContext {
            graph: ctx.graph,
            filter: Some(&*filter),
            options: &self.options,
        };
        expr.eval(&eval_ctx, result)?;
        filter.clear();
        self.cursor.reset();
        trace!(records = self.batch.len(), "traverse batch evaluated");
        Ok(())
    }

    fn resolve_edges(&mut self, ctx: &ExecCtx<'_>, src: NodeId, dst: NodeId) {
        self.edge_buf.clear();
        let Some(binding) = self.edge.as_ref() else {
            return;
        };
        if matches!(binding.direction, Direction::Outgoing | Direction::Both) {
            ctx.graph.edges_between(src, dst, &binding.relations, &mut self.edge_buf);
        }
        // A self-loop is the same edge read either way round.
        let reversed_is_new = binding.direction == Direction::Incoming || src != dst;
        if matches!(binding.direction, Direction::Incoming | Direction::Both) && reversed_is_new {
            ctx.graph.edges_between(dst, src, &binding.relations, &mut self.edge_buf);
        }
    }
}

impl Operator for CondTraverseOp {
    fn name(&self) -> &'static str {
        "CondTraverse"
    }

    fn init(&mut self, options: &ExecOptions) -> Result<()> {
        self.child.init(options)?;
        let capacity = self.batch_size.unwrap_or(options.batch_size);
        if capacity == 0 {
            return Err(GraphError::Invalid("traverse batch size must be positive"));
        }
        self.batch = RecordBatch::new(capacity);
        self.state = TraverseState::FillingBatch;
        Ok(())
    }

    fn consume(&mut self, ctx: &ExecCtx<'_>) -> Result<Option<Record>> {
        loop {
            if ctx.is_draining() {
                return Ok(None);
            }
            if let Some(record) = self.next_pending_edge() {
                return Ok(Some(record));
            }
            match self.state {
                TraverseState::Uninitialized => {
                    return Err(GraphError::Invalid("traverse consumed before init"));
                }
                TraverseState::Exhausted => return Ok(None),
                TraverseState::FillingBatch => {
                    let collected = self.batch.fill_from(self.child.as_mut(), ctx, self.src_slot)?;
                    if collected == 0 {
                        self.state = TraverseState::Exhausted;
                        return Ok(None);
                    }
                    self.evaluate_batch(ctx)?;
                    self.state = TraverseState::Emitting;
                }
                TraverseState::Emitting => {
                    let Some(result) = self.result.as_ref() else {
                        return Err(GraphError::ContractViolation("traverse result missing"));
                    };
                    let Some((row, dst, _)) = self.cursor.next_tuple(result) else {
                        self.state = TraverseState::FillingBatch;
                        continue;
                    };
                    let Some(origin) = self.batch.get(row as usize) else {
                        return Err(GraphError::ContractViolation("result row outside batch"));
                    };
                    let Some(src) = origin.node(self.src_slot) else {
                        return Err(GraphError::ContractViolation("batched record lost its source"));
                    };
                    let mut record = origin.clone();
                    let dst = NodeId(dst);
                    record.set(self.dst_slot, Entry::Node(dst));
                    if self.edge.is_none() {
                        return Ok(Some(record));
                    }
                    self.resolve_edges(ctx, src, dst);
                    debug_assert!(!self.edge_buf.is_empty(), "matrix entry {src}->{dst} has no edge");
                    if self.edge_buf.is_empty() {
                        return Err(GraphError::ContractViolation("matrix entry without a connecting edge"));
                    }
                    // Pop order: emit edges in the order they were found.
                    self.edge_buf.reverse();
                    self.pending = Some(PendingEdges {
                        record,
                        edges: std::mem::take(&mut self.edge_buf),
                    });
                }
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()?;
        self.batch.clear();
        if let Some(filter) = self.filter.as_mut() {
            filter.clear();
        }
        if let Some(result) = self.result.as_mut() {
            result.clear();
        }
        self.cursor.reset();
        self.pending = None;
        self.expr = None;
        if self.state != TraverseState::Uninitialized {
            self.state = TraverseState::FillingBatch;
        }
        Ok(())
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(Self {
            edge: self.edge.clone(),
            batch_size: self.batch_size,
            ..Self::new(
                self.child.clone_op(),
                self.base_expr.clone(),
                self.src_slot,
                self.dst_slot,
            )
        })
    }
}
