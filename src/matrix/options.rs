use super::Format;

/// Which physical formats a matrix may settle into after a commit.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum Sparsity {
    /// Density-driven choice among all four formats.
    #[default]
    Auto,
    /// Sparse or hypersparse only.
    SparseOnly,
    /// Always the given format.
    Fixed(Format),
}

/// Tuning knobs applied to a [`super::TypedMatrix`].
#[derive(Clone, Debug)]
pub struct MatrixOptions {
    /// Pending-tuple count at which `set_element` advises an eager commit.
    pub pending_threshold: usize,
    /// Hypersparse when non-empty vectors <= `hyper_switch * vdim`.
    pub hyper_switch: f64,
    /// Bitmap when `nvals >= bitmap_switch * nrows * ncols`.
    pub bitmap_switch: f64,
    /// Upper bound on `nrows * ncols` for bitmap and full storage.
    pub max_dense_cells: u64,
    /// Allowed formats.
    pub sparsity: Sparsity,
    /// Minimum number of output vectors before a product is split across the rayon pool.
    pub parallel_min_vectors: usize,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            pending_threshold: 64 * 1024,
            hyper_switch: 0.0625,
            bitmap_switch: 0.25,
            max_dense_cells: 1 << 22,
            sparsity: Sparsity::Auto,
            parallel_min_vectors: 4096,
        }
    }
}

impl MatrixOptions {
    /// Options restricted to the sparse family, used for filter and result matrices
    /// that are walked by a tuple cursor after every batch.
    pub fn sparse_only() -> Self {
        Self {
            sparsity: Sparsity::SparseOnly,
            ..Self::default()
        }
    }

    /// Sets the pending-tuple threshold.
    pub fn pending_threshold(mut self, count: usize) -> Self {
        self.pending_threshold = count.max(1);
        self
    }

    /// Sets the hypersparse switch ratio.
    pub fn hyper_switch(mut self, ratio: f64) -> Self {
        self.hyper_switch = ratio;
        self
    }

    /// Sets the bitmap density switch.
    pub fn bitmap_switch(mut self, ratio: f64) -> Self {
        self.bitmap_switch = ratio;
        self
    }

    /// Sets the dense-storage cell budget.
    pub fn max_dense_cells(mut self, cells: u64) -> Self {
        self.max_dense_cells = cells;
        self
    }

    /// Sets the format policy.
    pub fn sparsity(mut self, sparsity: Sparsity) -> Self {
        self.sparsity = sparsity;
        self
    }

    /// Sets the parallel split threshold.
    pub fn parallel_min_vectors(mut self, vectors: usize) -> Self {
        self.parallel_min_vectors = vectors;
        self
    }
}
