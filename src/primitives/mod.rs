//! Runtime primitives shared by the execution layer.

/// Timer service used for query timeouts.
///
/// One worker thread fires callbacks in deadline order.
pub mod cron;
