use crate::types::{GraphError, Result};

use super::scalar::{DupOp, Scalar, ScalarType};

/// Deferred insertions awaiting assembly into the sparse index.
///
/// Coordinates are stored in vector space (`i` inside vector `j`). Values are kept
/// in their original type and cast when assembled; iso matrices store no values.
#[derive(Clone, Debug)]
pub(crate) struct PendingTuples {
    pub(crate) i: Vec<u64>,
    pub(crate) j: Vec<u64>,
    pub(crate) x: Vec<Scalar>,
    pub(crate) ty: ScalarType,
    pub(crate) op: DupOp,
}

impl PendingTuples {
    pub(crate) fn new(ty: ScalarType, op: DupOp) -> Self {
        Self {
            i: Vec::new(),
            j: Vec::new(),
            x: Vec::new(),
            ty,
            op,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.i.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.i.is_empty()
    }

    /// A new tuple may join the list only if it shares the declared type and operator.
    pub(crate) fn accepts(&self, ty: ScalarType, op: DupOp) -> bool {
        self.ty == ty && self.op == op
    }

    /// Appends one tuple. Space is reserved up front so a failed allocation leaves
    /// the list exactly as it was.
    pub(crate) fn push(&mut self, i: u64, j: u64, value: Option<Scalar>) -> Result<()> {
        self.i
            .try_reserve(1)
            .map_err(|_| GraphError::OutOfMemory("pending tuple rows"))?;
        self.j
            .try_reserve(1)
            .map_err(|_| GraphError::OutOfMemory("pending tuple vectors"))?;
        if value.is_some() {
            self.x
                .try_reserve(1)
                .map_err(|_| GraphError::OutOfMemory("pending tuple values"))?;
        }
        self.i.push(i);
        self.j.push(j);
        if let Some(value) = value {
            self.x.push(value);
        }
        Ok(())
    }

    /// Value of tuple `k`, falling back to the iso representative.
    pub(crate) fn value(&self, k: usize, iso: Option<Scalar>) -> Option<Scalar> {
        self.x.get(k).copied().or(iso)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_requires_matching_type_and_operator() {
        let pending = PendingTuples::new(ScalarType::Int64, DupOp::Second);
        assert!(pending.accepts(ScalarType::Int64, DupOp::Second));
        assert!(!pending.accepts(ScalarType::Fp64, DupOp::Second));
        assert!(!pending.accepts(ScalarType::Int64, DupOp::Plus));
    }

    #[test]
    fn iso_tuples_carry_no_values() {
        let mut pending = PendingTuples::new(ScalarType::Bool, DupOp::Second);
        pending.push(1, 2, None).unwrap();
        pending.push(3, 4, None).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.x.is_empty());
        assert_eq!(pending.value(1, Some(Scalar::Bool(true))), Some(Scalar::Bool(true)));
    }
}
