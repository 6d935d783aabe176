#![forbid(unsafe_code)]

//! Typed sparse matrices with deferred mutation.
//!
//! A [`TypedMatrix`] accepts point updates cheaply by deferring work: inserts
//! that miss the index queue as pending tuples, deletes leave zombies, and kernel
//! output may be jumbled. [`TypedMatrix::wait`] assembles everything into one of
//! four canonical [`Format`]s chosen by density. Reads through
//! [`TypedMatrix::extract_element`] see the logical content at any time.

mod iter;
mod ops;
mod options;
mod pending;
pub mod scalar;
mod typed;

pub use iter::{TupleCursor, Tuples};
pub(crate) use ops::canonical_rows;
pub use ops::{ewise_add, mxm, Semiring};
pub use options::{MatrixOptions, Sparsity};
pub use scalar::{DupOp, Scalar, ScalarType};
pub use typed::{Format, SetOutcome, TypedMatrix, MAX_DIM};
