//! Opt-in timing counters, enabled by the `MATRIXGRAPH_PROFILE` environment variable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of engine profiling metrics.
///
/// Profiling is enabled via the `MATRIXGRAPH_PROFILE` environment variable; when it is
/// unset every timer is a no-op and [`profile_snapshot`] returns `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileSnapshot {
    /// Total nanoseconds spent committing matrices.
    pub matrix_wait_ns: u64,
    /// Number of matrix commits.
    pub matrix_wait_count: u64,
    /// Total nanoseconds spent in matrix products.
    pub mxm_ns: u64,
    /// Number of matrix products.
    pub mxm_count: u64,
    /// Total nanoseconds spent evaluating algebraic expressions.
    pub eval_ns: u64,
    /// Number of expression evaluations.
    pub eval_count: u64,
    /// Total nanoseconds spent populating traversal filter matrices.
    pub filter_ns: u64,
    /// Number of filter populations.
    pub filter_count: u64,
    /// Total nanoseconds spent buffering and ordering records.
    pub sort_ns: u64,
    /// Number of sort materializations.
    pub sort_count: u64,
}

#[derive(Default)]
struct ProfileCounters {
    matrix_wait_ns: AtomicU64,
    matrix_wait_count: AtomicU64,
    mxm_ns: AtomicU64,
    mxm_count: AtomicU64,
    eval_ns: AtomicU64,
    eval_count: AtomicU64,
    filter_ns: AtomicU64,
    filter_count: AtomicU64,
    sort_ns: AtomicU64,
    sort_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<ProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("MATRIXGRAPH_PROFILE").is_some())
}

fn counters() -> Option<&'static ProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(ProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum ProfileKind {
    /// Matrix commit (`wait`).
    MatrixWait,
    /// Matrix product kernel.
    Mxm,
    /// Algebraic expression evaluation.
    Eval,
    /// Filter matrix population for one traversal batch.
    Filter,
    /// Sort buffering and ordering.
    Sort,
}

pub(crate) fn record_profile_timer(kind: ProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        ProfileKind::MatrixWait => (&counters.matrix_wait_ns, &counters.matrix_wait_count),
        ProfileKind::Mxm => (&counters.mxm_ns, &counters.mxm_count),
        ProfileKind::Eval => (&counters.eval_ns, &counters.eval_count),
        ProfileKind::Filter => (&counters.filter_ns, &counters.filter_count),
        ProfileKind::Sort => (&counters.sort_ns, &counters.sort_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of the profiling counters.
///
/// When `reset` is true the counters are zeroed as they are read. Returns `None`
/// when profiling is disabled.
///
/// # Example
///
/// ```no_run
/// use matrixgraph::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(false) {
///     println!("commits: {}", snapshot.matrix_wait_count);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<ProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(ProfileSnapshot {
        matrix_wait_ns: load(&counters.matrix_wait_ns),
        matrix_wait_count: load(&counters.matrix_wait_count),
        mxm_ns: load(&counters.mxm_ns),
        mxm_count: load(&counters.mxm_count),
        eval_ns: load(&counters.eval_ns),
        eval_count: load(&counters.eval_count),
        filter_ns: load(&counters.filter_ns),
        filter_count: load(&counters.filter_count),
        sort_ns: load(&counters.sort_ns),
        sort_count: load(&counters.sort_count),
    })
}
