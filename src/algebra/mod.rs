#![forbid(unsafe_code)]

//! Algebraic expressions over graph matrices.
//!
//! A traversal pattern such as `(a)-[:knows]->(b:Person)` becomes the product
//! `F * knows * Person`, where `F` is a per-batch filter matrix bound at
//! evaluation time. Evaluation multiplies with the boolean semiring and writes
//! the committed product into a caller-owned output matrix.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::trace;

use crate::graph::GraphView;
use crate::matrix::{canonical_rows, ewise_add, mxm, DupOp, MatrixOptions, Semiring, TypedMatrix};
use crate::profile::{profile_timer, record_profile_timer, ProfileKind};
use crate::types::{GraphError, LabelId, RelationId, Result};

/// Where an operand's matrix comes from.
#[derive(Clone, Debug)]
pub enum OperandSource {
    /// A relation's adjacency matrix, resolved through the graph.
    Relation(RelationId),
    /// A label's diagonal matrix.
    Label(LabelId),
    /// A matrix owned by the expression; clones of the expression share it.
    Matrix(Arc<TypedMatrix>),
    /// The traversal filter, supplied by [`EvalContext::filter`].
    Filter,
}

/// Interior node operator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AlgebraicOp {
    /// Product of the children, left to right.
    Multiply,
    /// Element-wise union of the children.
    Add,
    /// Transpose of the single child.
    Transpose,
}

/// Expression tree.
#[derive(Clone, Debug)]
pub enum AlgebraicExpression {
    /// Leaf.
    Operand {
        /// Matrix source.
        source: OperandSource,
        /// Use the transpose of the source.
        transposed: bool,
    },
    /// Interior node.
    Operation {
        /// Operator.
        op: AlgebraicOp,
        /// Operands, at least one.
        children: Vec<AlgebraicExpression>,
    },
}

/// Bindings available while evaluating an expression.
pub struct EvalContext<'a> {
    /// Graph supplying relation and label matrices.
    pub graph: &'a dyn GraphView,
    /// Matrix bound to [`OperandSource::Filter`].
    pub filter: Option<&'a TypedMatrix>,
    /// Options for intermediate products.
    pub options: &'a MatrixOptions,
}

impl AlgebraicExpression {
    /// Leaf over a relation.
    pub fn relation(id: RelationId) -> Self {
        Self::Operand {
            source: OperandSource::Relation(id),
            transposed: false,
        }
    }

    /// Leaf over a label.
    pub fn label(id: LabelId) -> Self {
        Self::Operand {
            source: OperandSource::Label(id),
            transposed: false,
        }
    }

    /// Leaf over an owned matrix.
    pub fn matrix(matrix: Arc<TypedMatrix>) -> Self {
        Self::Operand {
            source: OperandSource::Matrix(matrix),
            transposed: false,
        }
    }

    /// Filter placeholder leaf.
    pub fn filter() -> Self {
        Self::Operand {
            source: OperandSource::Filter,
            transposed: false,
        }
    }

    /// Product of `children`.
    pub fn multiply(children: Vec<AlgebraicExpression>) -> Self {
        Self::Operation {
            op: AlgebraicOp::Multiply,
            children,
        }
    }

    /// Union of `children`.
    pub fn add(children: Vec<AlgebraicExpression>) -> Self {
        Self::Operation {
            op: AlgebraicOp::Add,
            children,
        }
    }

    /// Transpose of `child`.
    pub fn transpose(child: AlgebraicExpression) -> Self {
        Self::Operation {
            op: AlgebraicOp::Transpose,
            children: vec![child],
        }
    }

    /// Makes `operand` the leftmost factor: `operand * self`.
    pub fn multiply_to_the_left(self, operand: AlgebraicExpression) -> Self {
        match self {
            Self::Operation {
                op: AlgebraicOp::Multiply,
                mut children,
            } => {
                children.insert(0, operand);
                Self::multiply(children)
            }
            other => Self::multiply(vec![operand, other]),
        }
    }

    /// Number of leaves.
    pub fn operand_count(&self) -> usize {
        match self {
            Self::Operand { .. } => 1,
            Self::Operation { children, .. } => children.iter().map(Self::operand_count).sum(),
        }
    }

    /// Leftmost leaf, if any.
    pub fn leftmost(&self) -> Option<&AlgebraicExpression> {
        match self {
            Self::Operand { .. } => Some(self),
            Self::Operation { children, .. } => children.first().and_then(Self::leftmost),
        }
    }

    /// Rewrites the tree into an equivalent one that is cheaper to evaluate:
    /// transposes are pushed down to the leaves (`(AB)^T = B^T A^T`), double
    /// transposes cancel, and nested products or unions are flattened.
    pub fn optimize(self) -> Self {
        let optimized = push_transpose(self, false);
        flatten(optimized)
    }

    /// Copy of the expression whose leaves are all committed and by-row, so that
    /// each product reads only the rows its left operand names.
    ///
    /// Leaves already in that shape stay references into `graph`; the rest (a
    /// transposed owned matrix, a graph matrix with uncommitted changes) are
    /// replaced by a committed copy. The result is only valid while `graph` is
    /// unchanged.
    pub fn prepare(&self, graph: &dyn GraphView) -> Result<Self> {
        match self {
            Self::Operand { source, transposed } => {
                let matrix = match source {
                    OperandSource::Filter => return Ok(self.clone()),
                    OperandSource::Relation(id) => Cow::Borrowed(graph.relation_matrix(*id, *transposed)?),
                    OperandSource::Label(id) => Cow::Borrowed(graph.label_matrix(*id)?),
                    OperandSource::Matrix(matrix) if *transposed => Cow::Owned(matrix.transposed()),
                    OperandSource::Matrix(matrix) => Cow::Borrowed(matrix.as_ref()),
                };
                if matrix.is_by_row() && !matrix.has_deferred_state() {
                    return Ok(match matrix {
                        Cow::Borrowed(_) => self.clone(),
                        Cow::Owned(view) => Self::matrix(Arc::new(view)),
                    });
                }
                let committed = canonical_rows(&matrix)?.into_owned();
                trace!(
                    rows = committed.nrows(),
                    cols = committed.ncols(),
                    "operand committed for evaluation"
                );
                Ok(Self::matrix(Arc::new(committed)))
            }
            Self::Operation { op, children } => Ok(Self::Operation {
                op: *op,
                children: children
                    .iter()
                    .map(|child| child.prepare(graph))
                    .collect::<Result<_>>()?,
            }),
        }
    }

    /// Evaluates the expression and stores the committed result in `out`.
    ///
    /// `out` must already have the result's dimensions; its type and options are
    /// kept.
    pub fn eval(&self, ctx: &EvalContext<'_>, out: &mut TypedMatrix) -> Result<()> {
        let timer = profile_timer();
        let result = self.evaluate(ctx)?;
        if result.nrows() != out.nrows() || result.ncols() != out.ncols() {
            return Err(GraphError::DimensionMismatch {
                op: "eval",
                left: (out.nrows(), out.ncols()),
                right: (result.nrows(), result.ncols()),
            });
        }
        out.assign_from(result.into_owned())?;
        out.wait()?;
        record_profile_timer(ProfileKind::Eval, timer);
        Ok(())
    }

    fn evaluate<'a>(&'a self, ctx: &EvalContext<'a>) -> Result<Cow<'a, TypedMatrix>> {
        match self {
            Self::Operand { source, transposed } => {
                let base: &'a TypedMatrix = match source {
                    OperandSource::Relation(id) => {
                        return ctx.graph.relation_matrix(*id, *transposed).map(Cow::Borrowed);
                    }
                    OperandSource::Label(id) => {
                        // Diagonal: its own transpose.
                        return ctx.graph.label_matrix(*id).map(Cow::Borrowed);
                    }
                    OperandSource::Matrix(matrix) => matrix.as_ref(),
                    OperandSource::Filter => ctx
                        .filter
                        .ok_or(GraphError::Invalid("filter operand evaluated without a filter"))?,
                };
                Ok(if *transposed {
                    Cow::Owned(base.transposed())
                } else {
                    Cow::Borrowed(base)
                })
            }
            Self::Operation { op, children } => {
                let Some((first, rest)) = children.split_first() else {
                    return Err(GraphError::Invalid("operation without operands"));
                };
                match op {
                    AlgebraicOp::Transpose => {
                        if !rest.is_empty() {
                            return Err(GraphError::Invalid("transpose takes one operand"));
                        }
                        Ok(Cow::Owned(first.evaluate(ctx)?.transposed()))
                    }
                    AlgebraicOp::Multiply => eval_product(children, ctx),
                    AlgebraicOp::Add => {
                        let mut acc = first.evaluate(ctx)?;
                        for child in rest {
                            let rhs = child.evaluate(ctx)?;
                            acc = Cow::Owned(ewise_add(&acc, &rhs, DupOp::LOr, ctx.options)?);
                        }
                        Ok(acc)
                    }
                }
            }
        }
    }
}

/// Folds a product chain. Filter-led chains, and chains whose left end is no wider
/// than the right end, fold left to right so intermediates stay batch-sized;
/// otherwise the chain folds from the right.
fn eval_product<'a>(
    children: &'a [AlgebraicExpression],
    ctx: &EvalContext<'a>,
) -> Result<Cow<'a, TypedMatrix>> {
    let mut operands = Vec::with_capacity(children.len());
    for child in children {
        operands.push(child.evaluate(ctx)?);
    }
    let filter_led = matches!(
        children.first(),
        Some(AlgebraicExpression::Operand {
            source: OperandSource::Filter,
            ..
        })
    );
    let left_rows = operands.first().map_or(0, |m| m.nrows());
    let right_cols = operands.last().map_or(0, |m| m.ncols());
    let left_to_right = filter_led || left_rows <= right_cols;
    trace!(operands = operands.len(), left_to_right, "evaluating product chain");

    let mut iter: Box<dyn Iterator<Item = Cow<'a, TypedMatrix>>> = if left_to_right {
        Box::new(operands.into_iter())
    } else {
        Box::new(operands.into_iter().rev())
    };
    let Some(mut acc) = iter.next() else {
        return Err(GraphError::Invalid("operation without operands"));
    };
    for next in iter {
        let product = if left_to_right {
            mxm(&acc, &next, Semiring::LorLand, ctx.options)?
        } else {
            mxm(&next, &acc, Semiring::LorLand, ctx.options)?
        };
        acc = Cow::Owned(product);
    }
    Ok(acc)
}

fn push_transpose(expr: AlgebraicExpression, flip: bool) -> AlgebraicExpression {
    match expr {
        AlgebraicExpression::Operand { source, transposed } => AlgebraicExpression::Operand {
            source,
            transposed: transposed ^ flip,
        },
        AlgebraicExpression::Operation {
            op: AlgebraicOp::Transpose,
            children,
        } if children.len() == 1 => {
            let mut children = children;
            match children.pop() {
                Some(child) => push_transpose(child, !flip),
                None => AlgebraicExpression::multiply(Vec::new()),
            }
        }
        AlgebraicExpression::Operation { op, children } => {
            let mut children: Vec<_> = children
                .into_iter()
                .map(|child| push_transpose(child, flip))
                .collect();
            if flip && op == AlgebraicOp::Multiply {
                children.reverse();
            }
            AlgebraicExpression::Operation { op, children }
        }
    }
}

fn flatten(expr: AlgebraicExpression) -> AlgebraicExpression {
    match expr {
        AlgebraicExpression::Operation { op, children } if op != AlgebraicOp::Transpose => {
            let mut flat = Vec::with_capacity(children.len());
            for child in children.into_iter().map(flatten) {
                match child {
                    AlgebraicExpression::Operation {
                        op: inner,
                        children: grandchildren,
                    } if inner == op => flat.extend(grandchildren),
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 {
                if let Some(only) = flat.pop() {
                    return only;
                }
            }
            AlgebraicExpression::Operation { op, children: flat }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::matrix::{Scalar, ScalarType};
    use crate::query::Value;
    use crate::types::NodeId;

    fn chain_graph() -> (Graph, RelationId) {
        let mut g = Graph::default();
        let knows = g.add_relation("knows").unwrap();
        let ids: Vec<_> = (0..4)
            .map(|_| g.create_node(&[], Vec::<(String, Value)>::new()).unwrap())
            .collect();
        g.create_edge(ids[0], ids[1], knows).unwrap();
        g.create_edge(ids[1], ids[2], knows).unwrap();
        g.create_edge(ids[2], ids[3], knows).unwrap();
        g.sync().unwrap();
        (g, knows)
    }

    #[test]
    fn transposes_push_to_leaves() {
        let expr = AlgebraicExpression::transpose(AlgebraicExpression::multiply(vec![
            AlgebraicExpression::relation(RelationId(0)),
            AlgebraicExpression::transpose(AlgebraicExpression::relation(RelationId(1))),
        ]))
        .optimize();
        let AlgebraicExpression::Operation { op, children } = expr else {
            panic!("expected product");
        };
        assert_eq!(op, AlgebraicOp::Multiply);
        assert!(matches!(
            children[0],
            AlgebraicExpression::Operand {
                source: OperandSource::Relation(RelationId(1)),
                transposed: false
            }
        ));
        assert!(matches!(
            children[1],
            AlgebraicExpression::Operand {
                source: OperandSource::Relation(RelationId(0)),
                transposed: true
            }
        ));
    }

    #[test]
    fn nested_products_flatten() {
        let expr = AlgebraicExpression::relation(RelationId(0))
            .multiply_to_the_left(AlgebraicExpression::label(LabelId(0)))
            .multiply_to_the_left(AlgebraicExpression::filter());
        let nested = AlgebraicExpression::multiply(vec![
            expr,
            AlgebraicExpression::multiply(vec![AlgebraicExpression::relation(RelationId(1))]),
        ])
        .optimize();
        assert_eq!(nested.operand_count(), 4);
        let AlgebraicExpression::Operation { children, .. } = &nested else {
            panic!("expected product");
        };
        assert_eq!(children.len(), 4);
        assert!(matches!(
            nested.leftmost(),
            Some(AlgebraicExpression::Operand {
                source: OperandSource::Filter,
                ..
            })
        ));
    }

    #[test]
    fn filter_times_relation_finds_neighbours() {
        let (g, knows) = chain_graph();
        let dim = g.required_matrix_dim();
        let options = MatrixOptions::sparse_only();
        let mut filter = TypedMatrix::with_options(ScalarType::Bool, 2, dim, options.clone()).unwrap();
        filter.set_element(true, 0, 1).unwrap();
        filter.set_element(true, 1, 2).unwrap();
        filter.wait().unwrap();
        let expr = AlgebraicExpression::relation(knows)
            .multiply_to_the_left(AlgebraicExpression::filter())
            .optimize();
        let mut out = TypedMatrix::with_options(ScalarType::Bool, 2, dim, options.clone()).unwrap();
        let ctx = EvalContext {
            graph: &g,
            filter: Some(&filter),
            options: &options,
        };
        expr.eval(&ctx, &mut out).unwrap();
        let tuples: Vec<(u64, u64)> = out.tuples().map(|(r, c, _)| (r, c)).collect();
        assert_eq!(tuples, vec![(0, 2), (1, 3)]);
    }

    #[test]
    fn two_hop_with_transpose() {
        let (g, knows) = chain_graph();
        let dim = g.required_matrix_dim();
        let options = MatrixOptions::default();
        let expr = AlgebraicExpression::multiply(vec![
            AlgebraicExpression::relation(knows),
            AlgebraicExpression::transpose(AlgebraicExpression::relation(knows)),
        ])
        .optimize();
        let mut out = TypedMatrix::new(ScalarType::Bool, dim, dim).unwrap();
        let ctx = EvalContext {
            graph: &g,
            filter: None,
            options: &options,
        };
        expr.eval(&ctx, &mut out).unwrap();
        // a -> b <- a: every node with an outgoing edge reaches itself.
        assert_eq!(out.extract_element(1, 1).unwrap(), Some(Scalar::Bool(true)));
        assert_eq!(out.extract_element(0, 2).unwrap(), None);
    }

    #[test]
    fn prepare_commits_only_leaves_that_need_it() {
        let (mut g, knows) = chain_graph();
        let follows = g.add_relation("follows").unwrap();
        g.create_edge(NodeId(3), NodeId(0), follows).unwrap();
        let dim = g.required_matrix_dim();
        let owned = Arc::new(
            TypedMatrix::from_tuples(
                ScalarType::Bool,
                dim,
                dim,
                true,
                vec![(2, 0, Scalar::Bool(true))],
                DupOp::Second,
                MatrixOptions::default(),
            )
            .unwrap(),
        );
        let expr = AlgebraicExpression::multiply(vec![
            AlgebraicExpression::filter(),
            AlgebraicExpression::relation(knows),
            AlgebraicExpression::relation(follows),
            AlgebraicExpression::transpose(AlgebraicExpression::matrix(Arc::clone(&owned))),
        ])
        .optimize();

        let prepared = expr.prepare(&g).unwrap();
        let AlgebraicExpression::Operation { children, .. } = &prepared else {
            panic!("expected product");
        };
        assert!(matches!(
            children[0],
            AlgebraicExpression::Operand {
                source: OperandSource::Filter,
                ..
            }
        ));
        // Committed graph matrices are read in place.
        assert!(matches!(
            children[1],
            AlgebraicExpression::Operand {
                source: OperandSource::Relation(id),
                ..
            } if id == knows
        ));
        for child in &children[2..] {
            let AlgebraicExpression::Operand {
                source: OperandSource::Matrix(m),
                transposed: false,
            } = child
            else {
                panic!("expected a committed copy, got {child:?}");
            };
            assert!(m.is_by_row());
            assert!(!m.has_deferred_state());
        }

        let options = MatrixOptions::sparse_only();
        let mut filter = TypedMatrix::with_options(ScalarType::Bool, 1, dim, options.clone()).unwrap();
        filter.set_element(true, 0, 2).unwrap();
        filter.wait().unwrap();
        let ctx = EvalContext {
            graph: &g,
            filter: Some(&filter),
            options: &options,
        };
        let mut direct = TypedMatrix::with_options(ScalarType::Bool, 1, dim, options.clone()).unwrap();
        let mut via_prepared = direct.clone();
        expr.eval(&ctx, &mut direct).unwrap();
        prepared.eval(&ctx, &mut via_prepared).unwrap();
        // 2 -knows-> 3 -follows-> 0, then owned^T maps 0 to 2.
        let a: Vec<_> = direct.tuples().map(|(r, c, _)| (r, c)).collect();
        let b: Vec<_> = via_prepared.tuples().map(|(r, c, _)| (r, c)).collect();
        assert_eq!(a, vec![(0, 2)]);
        assert_eq!(a, b);
    }

    #[test]
    fn unbound_filter_is_an_error() {
        let (g, _) = chain_graph();
        let options = MatrixOptions::default();
        let mut out = TypedMatrix::new(ScalarType::Bool, 1, 1).unwrap();
        let ctx = EvalContext {
            graph: &g,
            filter: None,
            options: &options,
        };
        assert!(AlgebraicExpression::filter().eval(&ctx, &mut out).is_err());
    }

    #[test]
    fn eval_checks_output_shape() {
        let (g, knows) = chain_graph();
        let options = MatrixOptions::default();
        let mut out = TypedMatrix::new(ScalarType::Bool, 3, 3).unwrap();
        let ctx = EvalContext {
            graph: &g,
            filter: None,
            options: &options,
        };
        assert!(matches!(
            AlgebraicExpression::relation(knows).eval(&ctx, &mut out),
            Err(GraphError::DimensionMismatch { op: "eval", .. })
        ));
    }
}
