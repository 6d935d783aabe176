//! Matrix kernels: semiring products and element-wise union.

use std::borrow::Cow;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::profile::{profile_timer, record_profile_timer, ProfileKind};
use crate::types::{GraphError, Result};

use super::options::MatrixOptions;
use super::scalar::{DupOp, Scalar, ScalarType};
use super::typed::TypedMatrix;

/// Semiring used by [`mxm`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum Semiring {
    /// Structural product: any stored pair yields `true`.
    #[default]
    AnyPair,
    /// Logical or over logical and.
    LorLand,
    /// Arithmetic sum of products in the left operand's type.
    PlusTimes,
}

impl Semiring {
    fn output_type(self, left: ScalarType) -> ScalarType {
        match self {
            Semiring::AnyPair | Semiring::LorLand => ScalarType::Bool,
            Semiring::PlusTimes => left,
        }
    }

    fn multiply(self, ty: ScalarType, a: Scalar, b: Scalar) -> Scalar {
        match self {
            Semiring::AnyPair => Scalar::Bool(true),
            Semiring::LorLand => Scalar::Bool(a.as_bool() && b.as_bool()),
            Semiring::PlusTimes => {
                let (Some(a), Some(b)) = (a.cast(ty), b.cast(ty)) else {
                    return ty.zero();
                };
                match (a, b) {
                    (Scalar::Int64(x), Scalar::Int64(y)) => Scalar::Int64(x.wrapping_mul(y)),
                    (Scalar::UInt64(x), Scalar::UInt64(y)) => Scalar::UInt64(x.wrapping_mul(y)),
                    (Scalar::Fp64(x), Scalar::Fp64(y)) => Scalar::Fp64(x * y),
                    (Scalar::Bool(x), Scalar::Bool(y)) => Scalar::Bool(x && y),
                    _ => ty.zero(),
                }
            }
        }
    }

    fn add(self, ty: ScalarType, a: Scalar, b: Scalar) -> Scalar {
        match self {
            Semiring::AnyPair => Scalar::Bool(true),
            Semiring::LorLand => Scalar::Bool(a.as_bool() || b.as_bool()),
            Semiring::PlusTimes => DupOp::Plus.apply(ty, a, b),
        }
    }
}

type Rows = Vec<(u64, Vec<(u64, Scalar)>)>;

/// Committed by-row view of `m`, borrowing when no work is needed.
pub(crate) fn canonical_rows(m: &TypedMatrix) -> Result<Cow<'_, TypedMatrix>> {
    if !m.is_by_row() {
        return m.reoriented(true).map(Cow::Owned);
    }
    if m.has_deferred_state() {
        let mut owned = m.clone();
        owned.wait()?;
        return Ok(Cow::Owned(owned));
    }
    Ok(Cow::Borrowed(m))
}

fn group_rows(m: &TypedMatrix) -> Rows {
    let mut rows: Rows = Vec::new();
    for (row, col, value) in m.tuples() {
        match rows.last_mut() {
            Some((last, entries)) if *last == row => entries.push((col, value)),
            _ => rows.push((row, vec![(col, value)])),
        }
    }
    rows
}

/// `C = A ⊕.⊗ B`. The result is by-row and may come back jumbled; commit it
/// before relying on sorted vectors.
///
/// Only the rows of `B` named by a column of `A` are read, so a committed by-row
/// `B` costs the sum of those rows' lengths. Any other `B` is committed into a
/// by-row copy first.
///
/// Row blocks are spread over the rayon pool once `A` has at least
/// `options.parallel_min_vectors` non-empty rows. The collect is the join point:
/// every worker's output is visible to the caller once `mxm` returns.
pub fn mxm(
    a: &TypedMatrix,
    b: &TypedMatrix,
    semiring: Semiring,
    options: &MatrixOptions,
) -> Result<TypedMatrix> {
    if a.ncols() != b.nrows() {
        return Err(GraphError::DimensionMismatch {
            op: "mxm",
            left: (a.nrows(), a.ncols()),
            right: (b.nrows(), b.ncols()),
        });
    }
    let timer = profile_timer();
    let ty = semiring.output_type(a.scalar_type());
    let a = canonical_rows(a)?;
    let b = canonical_rows(b)?;
    if matches!(b, Cow::Owned(_)) {
        trace!(rows = b.nrows(), "mxm committed a by-row copy of the right operand");
    }
    let a_rows = group_rows(&a);

    let row_product = |(row, entries): &(u64, Vec<(u64, Scalar)>)| -> (u64, Vec<(u64, Scalar)>) {
        let mut slots: FxHashMap<u64, usize> = FxHashMap::default();
        let mut out: Vec<(u64, Scalar)> = Vec::new();
        for &(k, a_val) in entries {
            b.for_each_in_vector(k, |col, b_val| {
                let product = semiring.multiply(ty, a_val, b_val);
                match slots.get(&col) {
                    Some(&slot) => out[slot].1 = semiring.add(ty, out[slot].1, product),
                    None => {
                        slots.insert(col, out.len());
                        out.push((col, product));
                    }
                }
            });
        }
        (*row, out)
    };

    let vectors: Rows = if a_rows.len() >= options.parallel_min_vectors {
        trace!(rows = a_rows.len(), "mxm split across rayon pool");
        a_rows.par_iter().map(row_product).collect()
    } else {
        a_rows.iter().map(row_product).collect()
    };

    let out = TypedMatrix::from_vectors(
        ty,
        a.nrows(),
        b.ncols(),
        true,
        vectors,
        options.clone(),
    )?;
    record_profile_timer(ProfileKind::Mxm, timer);
    Ok(out)
}

/// Element-wise union `C = A ∪ B`, combining overlapping entries with `op`.
pub fn ewise_add(a: &TypedMatrix, b: &TypedMatrix, op: DupOp, options: &MatrixOptions) -> Result<TypedMatrix> {
    if a.nrows() != b.nrows() || a.ncols() != b.ncols() {
        return Err(GraphError::DimensionMismatch {
            op: "ewise_add",
            left: (a.nrows(), a.ncols()),
            right: (b.nrows(), b.ncols()),
        });
    }
    let a = canonical_rows(a)?;
    let b = canonical_rows(b)?;
    TypedMatrix::from_tuples(
        a.scalar_type(),
        a.nrows(),
        a.ncols(),
        true,
        a.tuples().chain(b.tuples()),
        op,
        options.clone(),
    )
}
