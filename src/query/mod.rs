#![forbid(unsafe_code)]

//! Pull-based query execution over graph matrices.

mod batch;
mod op;
mod options;
mod plan;
mod record;
mod scan;
mod sort;
mod traverse;
pub mod value;

pub use op::{ExecCtx, Operator};
pub use options::ExecOptions;
pub use plan::{DrainHandle, ExecutionPlan, QueryResult};
pub use record::{Entry, Record};
pub use scan::{NodeScanOp, ProjectOp, SkipLimitOp, ValuesOp};
pub use sort::{compare_records, SortDirection, SortKey, SortOp};
pub use traverse::{CondTraverseOp, Direction, EdgeBinding};
pub use value::Value;
