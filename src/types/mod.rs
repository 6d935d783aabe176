#![forbid(unsafe_code)]

//! Identifier newtypes and the crate-wide error type.

use std::fmt;

/// Identifier of a node; doubles as the node's row/column in every matrix.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);

/// Identifier of an edge.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EdgeId(pub u64);

/// Identifier of a relationship type (one adjacency matrix each).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RelationId(pub u32);

/// Identifier of a node label (one diagonal matrix each).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LabelId(pub u32);

/// Errors surfaced by matrix storage and query execution.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A row or column index lies outside the matrix dimensions.
    #[error("{axis} index {index} out of range; must be < {bound}")]
    InvalidIndex {
        /// `"row"` or `"column"`.
        axis: &'static str,
        /// Offending index.
        index: u64,
        /// Exclusive upper bound.
        bound: u64,
    },
    /// A scalar cannot be typecast to the matrix element type.
    #[error("input scalar of type [{from}] cannot be typecast to entry of type [{to}]")]
    DomainMismatch {
        /// Type of the supplied scalar.
        from: String,
        /// Element type of the matrix.
        to: String,
    },
    /// Operand shapes do not line up.
    #[error("dimension mismatch in {op}: {left:?} vs {right:?}")]
    DimensionMismatch {
        /// Operation that rejected the operands.
        op: &'static str,
        /// Left operand shape (rows, cols).
        left: (u64, u64),
        /// Right operand shape (rows, cols).
        right: (u64, u64),
    },
    /// Allocation failed while growing matrix storage.
    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),
    /// An internal invariant was broken. Never caused by bad input.
    #[error("contract violation: {0}")]
    ContractViolation(&'static str),
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(&'static str),
}

impl GraphError {
    /// Returns true for errors that indicate a consistency bug rather than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GraphError::ContractViolation(_))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GraphError>;

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u64 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl From<u32> for RelationId {
    fn from(value: u32) -> Self {
        RelationId(value)
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violation_is_the_only_fatal_kind() {
        assert!(GraphError::ContractViolation("edge missing").is_fatal());
        assert!(!GraphError::OutOfMemory("pending").is_fatal());
        assert!(!GraphError::InvalidIndex {
            axis: "row",
            index: 9,
            bound: 4
        }
        .is_fatal());
    }

    #[test]
    fn invalid_index_message_names_bound() {
        let err = GraphError::InvalidIndex {
            axis: "column",
            index: 12,
            bound: 10,
        };
        assert_eq!(err.to_string(), "column index 12 out of range; must be < 10");
    }
}
