//! Graph query engine over sparse adjacency matrices.
//!
//! Relations are boolean matrices with deferred mutation ([`matrix`]), traversal
//! patterns are algebraic expressions over them ([`algebra`]), and queries run as
//! pull-based operator trees ([`query`]) against an in-memory graph ([`graph`]).

#![warn(missing_docs)]

pub mod algebra;
pub mod config;
pub mod graph;
pub mod matrix;
pub mod primitives;
pub mod profile;
pub mod query;
pub mod types;
