use tracing::{debug, trace, warn};

use crate::profile::{profile_timer, record_profile_timer, ProfileKind};
use crate::types::{GraphError, Result};

use super::iter::Tuples;
use super::options::{MatrixOptions, Sparsity};
use super::pending::PendingTuples;
use super::scalar::{DupOp, Scalar, ScalarType};

/// Largest supported row or column count. The top bit of a stored index marks a zombie.
pub const MAX_DIM: u64 = 1 << 60;

pub(crate) const ZOMBIE: u64 = 1 << 63;

/// Physical layout of a [`TypedMatrix`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Format {
    /// Every cell present, values addressed by `i + j * vlen`.
    Full,
    /// Dense value array plus a presence bitmap.
    Bitmap,
    /// Compressed vectors with a pointer for every vector.
    Sparse,
    /// Compressed vectors with pointers only for populated vectors.
    Hypersparse,
}

#[derive(Clone, Debug)]
pub(crate) enum Storage {
    Full {
        x: Vec<Scalar>,
    },
    Bitmap {
        b: Vec<bool>,
        x: Vec<Scalar>,
        nvals: usize,
    },
    Sparse {
        p: Vec<usize>,
        i: Vec<u64>,
        x: Vec<Scalar>,
    },
    Hypersparse {
        h: Vec<u64>,
        p: Vec<usize>,
        i: Vec<u64>,
        x: Vec<Scalar>,
    },
}

impl Storage {
    fn empty() -> Self {
        Storage::Hypersparse {
            h: Vec::new(),
            p: vec![0],
            i: Vec::new(),
            x: Vec::new(),
        }
    }

    fn format(&self) -> Format {
        match self {
            Storage::Full { .. } => Format::Full,
            Storage::Bitmap { .. } => Format::Bitmap,
            Storage::Sparse { .. } => Format::Sparse,
            Storage::Hypersparse { .. } => Format::Hypersparse,
        }
    }

    fn values(&self) -> &[Scalar] {
        match self {
            Storage::Full { x }
            | Storage::Bitmap { x, .. }
            | Storage::Sparse { x, .. }
            | Storage::Hypersparse { x, .. } => x,
        }
    }

    fn values_mut(&mut self) -> &mut Vec<Scalar> {
        match self {
            Storage::Full { x }
            | Storage::Bitmap { x, .. }
            | Storage::Sparse { x, .. }
            | Storage::Hypersparse { x, .. } => x,
        }
    }
}

/// Result of locating `(i, j)` in the physical index.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Slot {
    /// Full or bitmap position; presence is decided by the bitmap.
    Dense(usize),
    /// Live sparse entry.
    Live(usize),
    /// Tombstoned sparse entry still occupying its slot.
    Zombie(usize),
    /// Not in the index.
    Absent,
}

/// What a successful `set_element` did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SetOutcome {
    /// An existing entry (or dense cell) was written in place.
    InPlace,
    /// A zombie was brought back to life.
    Resurrected,
    /// The tuple was queued for the next commit.
    Queued {
        /// The pending list reached the configured threshold.
        commit_advised: bool,
    },
}

/// A sparse matrix over one scalar type with deferred mutation.
///
/// Entries are addressed internally as index `i` inside vector `j`. A by-row
/// matrix keeps one vector per row (`i` = column), a by-column matrix one vector
/// per column (`i` = row). Inserts that miss the index are queued as pending
/// tuples, deletes leave zombies behind, and [`TypedMatrix::wait`] folds both
/// back into a canonical layout. No internal locking: callers serialize access.
#[derive(Clone, Debug)]
pub struct TypedMatrix {
    ty: ScalarType,
    nrows: u64,
    ncols: u64,
    by_row: bool,
    store: Storage,
    iso: bool,
    pending: Option<PendingTuples>,
    nzombies: usize,
    jumbled: bool,
    options: MatrixOptions,
}

impl TypedMatrix {
    /// Creates an empty by-row matrix with default options.
    pub fn new(ty: ScalarType, nrows: u64, ncols: u64) -> Result<Self> {
        Self::with_options(ty, nrows, ncols, MatrixOptions::default())
    }

    /// Creates an empty by-row matrix.
    pub fn with_options(
        ty: ScalarType,
        nrows: u64,
        ncols: u64,
        options: MatrixOptions,
    ) -> Result<Self> {
        if nrows > MAX_DIM || ncols > MAX_DIM {
            return Err(GraphError::Invalid("matrix dimension exceeds MAX_DIM"));
        }
        Ok(Self {
            ty,
            nrows,
            ncols,
            by_row: true,
            store: Storage::empty(),
            iso: false,
            pending: None,
            nzombies: 0,
            jumbled: false,
            options,
        })
    }

    /// Builds a canonical matrix from tuples; duplicates combine with `dup` in input order.
    ///
    /// The result has no pending tuples, no zombies and is not jumbled, which is the
    /// state a snapshot loader must hand back.
    pub fn from_tuples<I>(
        ty: ScalarType,
        nrows: u64,
        ncols: u64,
        by_row: bool,
        tuples: I,
        dup: DupOp,
        options: MatrixOptions,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, u64, Scalar)>,
    {
        let mut matrix = Self::with_options(ty, nrows, ncols, options)?;
        matrix.by_row = by_row;
        let mut pending = PendingTuples::new(ty, dup);
        for (row, col, value) in tuples {
            matrix.check_bounds(row, col)?;
            let cast = matrix.cast_in(value)?;
            let (i, j) = matrix.to_vector_space(row, col);
            pending.push(i, j, Some(cast))?;
        }
        if !pending.is_empty() {
            matrix.pending = Some(pending);
        }
        matrix.wait()?;
        Ok(matrix)
    }

    /// Element type.
    pub fn scalar_type(&self) -> ScalarType {
        self.ty
    }

    /// Row count.
    pub fn nrows(&self) -> u64 {
        self.nrows
    }

    /// Column count.
    pub fn ncols(&self) -> u64 {
        self.ncols
    }

    /// True when vectors are rows (CSR).
    pub fn is_by_row(&self) -> bool {
        self.by_row
    }

    /// Current physical format.
    pub fn format(&self) -> Format {
        self.store.format()
    }

    /// True when every entry shares one stored value.
    pub fn is_iso(&self) -> bool {
        self.iso
    }

    /// Number of queued insertions.
    pub fn pending_count(&self) -> usize {
        self.pending.as_ref().map_or(0, PendingTuples::len)
    }

    /// Number of tombstoned entries still in the index.
    pub fn zombie_count(&self) -> usize {
        self.nzombies
    }

    /// True when vectors are not yet sorted by index.
    pub fn is_jumbled(&self) -> bool {
        self.jumbled
    }

    /// True when pending tuples, zombies or jumbled vectors exist.
    pub fn has_deferred_state(&self) -> bool {
        self.pending.is_some() || self.nzombies > 0 || self.jumbled
    }

    /// Number of stored values; 1 for a non-empty iso matrix.
    pub fn value_storage_len(&self) -> usize {
        self.store.values().len()
    }

    /// Options in effect.
    pub fn options(&self) -> &MatrixOptions {
        &self.options
    }

    /// Replaces the options; takes effect at the next commit.
    pub fn set_options(&mut self, options: MatrixOptions) {
        self.options = options;
    }

    /// Logical entry count. Commits first.
    pub fn nvals(&mut self) -> Result<u64> {
        self.wait()?;
        Ok(self.slot_count() as u64)
    }

    /// `C(row, col) = value`, typecasting into the element type.
    pub fn set_element(&mut self, value: impl Into<Scalar>, row: u64, col: u64) -> Result<SetOutcome> {
        self.assign_element(value.into(), row, col, DupOp::Second)
    }

    /// `C(row, col) = op(C(row, col), value)`, or plain assignment when the entry is absent.
    pub fn accumulate_element(
        &mut self,
        value: impl Into<Scalar>,
        row: u64,
        col: u64,
        op: DupOp,
    ) -> Result<SetOutcome> {
        self.assign_element(value.into(), row, col, op)
    }

    fn assign_element(&mut self, scalar: Scalar, row: u64, col: u64, op: DupOp) -> Result<SetOutcome> {
        self.check_bounds(row, col)?;
        let stype = scalar.scalar_type();
        let cast = self.cast_in(scalar)?;
        let (i, j) = self.to_vector_space(row, col);

        // One forced commit at most: afterwards no pending tuples remain to disagree with.
        let mut committed = false;
        loop {
            if self.jumbled {
                self.unjumble()?;
            }

            if self.iso {
                if op != DupOp::Second || !self.store.values()[0].same_bits(&cast) {
                    if self.pending.is_some() {
                        self.wait()?;
                    }
                    self.convert_to_non_iso()?;
                }
            } else if self.slot_count() == 0
                && self.format() != Format::Full
                && self.pending.is_none()
            {
                self.convert_to_iso(cast);
            }

            match self.locate(i, j) {
                Slot::Dense(pos) => {
                    let iso = self.iso;
                    let ty = self.ty;
                    match &mut self.store {
                        Storage::Full { x } => {
                            if !iso {
                                x[pos] = op.apply(ty, x[pos], cast);
                            }
                        }
                        Storage::Bitmap { b, x, nvals } => {
                            if !iso {
                                x[pos] = if b[pos] { op.apply(ty, x[pos], cast) } else { cast };
                            }
                            if !b[pos] {
                                b[pos] = true;
                                *nvals += 1;
                            }
                        }
                        _ => {
                            return Err(GraphError::ContractViolation(
                                "dense slot reported for sparse storage",
                            ))
                        }
                    }
                    return Ok(SetOutcome::InPlace);
                }
                Slot::Live(pos) => {
                    if !self.iso {
                        let ty = self.ty;
                        let x = self.store.values_mut();
                        x[pos] = op.apply(ty, x[pos], cast);
                    }
                    return Ok(SetOutcome::InPlace);
                }
                Slot::Zombie(pos) => {
                    if !self.iso {
                        self.store.values_mut()[pos] = cast;
                    }
                    match &mut self.store {
                        Storage::Sparse { i: idx, .. } | Storage::Hypersparse { i: idx, .. } => {
                            idx[pos] = i;
                        }
                        _ => return Err(GraphError::ContractViolation("zombie in dense storage")),
                    }
                    self.nzombies -= 1;
                    return Ok(SetOutcome::Resurrected);
                }
                Slot::Absent => {
                    let compatible = self
                        .pending
                        .as_ref()
                        .map_or(true, |pending| pending.accepts(stype, op));
                    if !compatible {
                        if committed {
                            return Err(GraphError::ContractViolation(
                                "pending tuples still incompatible after commit",
                            ));
                        }
                        self.wait()?;
                        committed = true;
                        continue;
                    }
                    let value = if self.iso { None } else { Some(scalar) };
                    let threshold = self.options.pending_threshold;
                    let pending = self
                        .pending
                        .get_or_insert_with(|| PendingTuples::new(stype, op));
                    if let Err(err) = pending.push(i, j, value) {
                        if pending.is_empty() {
                            self.pending = None;
                        }
                        return Err(err);
                    }
                    let count = pending.len();
                    if count == threshold {
                        warn!(pending = count, "matrix pending tuples reached commit threshold");
                    }
                    return Ok(SetOutcome::Queued {
                        commit_advised: count >= threshold,
                    });
                }
            }
        }
    }

    /// Deletes `C(row, col)`. Sparse entries become zombies until the next commit.
    ///
    /// Returns false when there was nothing to delete.
    pub fn remove_element(&mut self, row: u64, col: u64) -> Result<bool> {
        self.check_bounds(row, col)?;
        let (i, j) = self.to_vector_space(row, col);
        let mut committed = false;
        loop {
            if self.jumbled {
                self.unjumble()?;
            }
            match self.locate(i, j) {
                Slot::Dense(pos) => {
                    if let Storage::Full { .. } = self.store {
                        self.convert_to(Format::Bitmap)?;
                    }
                    if let Storage::Bitmap { b, nvals, .. } = &mut self.store {
                        if b[pos] {
                            b[pos] = false;
                            *nvals -= 1;
                            return Ok(true);
                        }
                    }
                    return Ok(false);
                }
                Slot::Live(pos) => {
                    match &mut self.store {
                        Storage::Sparse { i: idx, .. } | Storage::Hypersparse { i: idx, .. } => {
                            idx[pos] |= ZOMBIE;
                        }
                        _ => return Err(GraphError::ContractViolation("live slot in dense storage")),
                    }
                    self.nzombies += 1;
                    return Ok(true);
                }
                Slot::Zombie(_) | Slot::Absent => {
                    // The entry may still be queued; assemble and look again.
                    if self.pending.is_some() && !committed {
                        self.wait()?;
                        committed = true;
                        continue;
                    }
                    return Ok(false);
                }
            }
        }
    }

    /// Logical value of `C(row, col)`, valid with pending tuples and zombies present.
    pub fn extract_element(&self, row: u64, col: u64) -> Result<Option<Scalar>> {
        self.check_bounds(row, col)?;
        let (i, j) = self.to_vector_space(row, col);
        let mut current = match self.locate(i, j) {
            Slot::Dense(pos) => match &self.store {
                Storage::Bitmap { b, .. } if !b[pos] => None,
                _ => Some(self.value_at(pos)),
            },
            Slot::Live(pos) => Some(self.value_at(pos)),
            Slot::Zombie(_) | Slot::Absent => None,
        };
        if let Some(pending) = &self.pending {
            let iso = self.iso.then(|| self.store.values()[0]);
            for k in 0..pending.len() {
                if pending.i[k] != i || pending.j[k] != j {
                    continue;
                }
                let raw = pending
                    .value(k, iso)
                    .ok_or(GraphError::ContractViolation("iso pending tuple without value"))?;
                let value = self.cast_in(raw)?;
                current = Some(match current {
                    Some(old) => pending.op.apply(self.ty, old, value),
                    None => value,
                });
            }
        }
        Ok(current)
    }

    /// Commits deferred state: assembles pending tuples, drops zombies, sorts
    /// jumbled vectors and re-evaluates the physical format.
    pub fn wait(&mut self) -> Result<()> {
        let timer = profile_timer();
        if self.has_deferred_state() {
            self.assemble()?;
        }
        self.conform()?;
        record_profile_timer(ProfileKind::MatrixWait, timer);
        Ok(())
    }

    /// Removes every entry, keeping dimensions, type and options.
    pub fn clear(&mut self) {
        self.store = Storage::empty();
        self.iso = false;
        self.pending = None;
        self.nzombies = 0;
        self.jumbled = false;
    }

    /// Grows the matrix. Shrinking is rejected.
    pub fn resize(&mut self, nrows: u64, ncols: u64) -> Result<()> {
        if nrows < self.nrows || ncols < self.ncols {
            return Err(GraphError::Invalid("matrix resize cannot shrink"));
        }
        if nrows > MAX_DIM || ncols > MAX_DIM {
            return Err(GraphError::Invalid("matrix dimension exceeds MAX_DIM"));
        }
        if nrows == self.nrows && ncols == self.ncols {
            return Ok(());
        }
        self.wait()?;
        if matches!(self.format(), Format::Full | Format::Bitmap) {
            self.convert_to(Format::Hypersparse)?;
        }
        let (old_vdim, new_vdim) = if self.by_row {
            (self.nrows, nrows)
        } else {
            (self.ncols, ncols)
        };
        if let Storage::Sparse { p, .. } = &mut self.store {
            let last = p.last().copied().unwrap_or(0);
            let grow = (new_vdim - old_vdim) as usize;
            p.try_reserve(grow)
                .map_err(|_| GraphError::OutOfMemory("vector pointers"))?;
            p.extend(std::iter::repeat(last).take(grow));
        }
        self.nrows = nrows;
        self.ncols = ncols;
        self.conform()
    }

    /// Iterates `(row, col, value)` over the committed index. Pending tuples are not
    /// visible; call [`TypedMatrix::wait`] first.
    pub fn tuples(&self) -> Tuples<'_> {
        Tuples::new(self)
    }

    /// Replaces the contents with `src`, keeping this matrix's options.
    ///
    /// Orientation and element type are converted when they differ.
    pub fn assign_from(&mut self, src: TypedMatrix) -> Result<()> {
        if src.nrows != self.nrows || src.ncols != self.ncols {
            return Err(GraphError::DimensionMismatch {
                op: "assign",
                left: (self.nrows, self.ncols),
                right: (src.nrows, src.ncols),
            });
        }
        let mut src = src;
        if src.by_row != self.by_row || src.ty != self.ty {
            src.wait()?;
            let tuples: Vec<_> = src.tuples().collect();
            src = TypedMatrix::from_tuples(
                self.ty,
                self.nrows,
                self.ncols,
                self.by_row,
                tuples,
                DupOp::Second,
                self.options.clone(),
            )?;
        }
        self.store = src.store;
        self.iso = src.iso;
        self.pending = src.pending;
        self.nzombies = src.nzombies;
        self.jumbled = src.jumbled;
        Ok(())
    }

    /// Same content with rows and columns swapped. Storage is reused as-is, so the
    /// result has the opposite orientation.
    pub fn transposed(&self) -> TypedMatrix {
        let mut t = self.clone();
        t.nrows = self.ncols;
        t.ncols = self.nrows;
        t.by_row = !self.by_row;
        t
    }

    /// Same content in the requested orientation.
    pub fn reoriented(&self, by_row: bool) -> Result<TypedMatrix> {
        if by_row == self.by_row {
            return Ok(self.clone());
        }
        let mut src = self.clone();
        src.wait()?;
        let tuples: Vec<_> = src.tuples().collect();
        TypedMatrix::from_tuples(
            self.ty,
            self.nrows,
            self.ncols,
            by_row,
            tuples,
            DupOp::Second,
            self.options.clone(),
        )
    }

    // ---- internals shared with kernels and cursors ----

    pub(crate) fn vlen(&self) -> u64 {
        if self.by_row {
            self.ncols
        } else {
            self.nrows
        }
    }

    pub(crate) fn vdim(&self) -> u64 {
        if self.by_row {
            self.nrows
        } else {
            self.ncols
        }
    }

    pub(crate) fn to_vector_space(&self, row: u64, col: u64) -> (u64, u64) {
        if self.by_row {
            (col, row)
        } else {
            (row, col)
        }
    }

    pub(crate) fn to_row_col(&self, i: u64, j: u64) -> (u64, u64) {
        if self.by_row {
            (j, i)
        } else {
            (i, j)
        }
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.store
    }

    pub(crate) fn value_at(&self, pos: usize) -> Scalar {
        let x = self.store.values();
        if self.iso {
            x[0]
        } else {
            x[pos]
        }
    }

    /// Builds a jumbled-or-sorted matrix directly from per-vector output of a kernel.
    pub(crate) fn from_vectors(
        ty: ScalarType,
        nrows: u64,
        ncols: u64,
        by_row: bool,
        vectors: Vec<(u64, Vec<(u64, Scalar)>)>,
        options: MatrixOptions,
    ) -> Result<Self> {
        let mut matrix = Self::with_options(ty, nrows, ncols, options)?;
        matrix.by_row = by_row;
        let total: usize = vectors.iter().map(|(_, entries)| entries.len()).sum();
        let mut h = Vec::new();
        let mut p = Vec::new();
        let mut idx = Vec::new();
        let mut x = Vec::new();
        h.try_reserve(vectors.len())
            .map_err(|_| GraphError::OutOfMemory("hyperlist"))?;
        p.try_reserve(vectors.len() + 1)
            .map_err(|_| GraphError::OutOfMemory("vector pointers"))?;
        idx.try_reserve(total)
            .map_err(|_| GraphError::OutOfMemory("indices"))?;
        x.try_reserve(total)
            .map_err(|_| GraphError::OutOfMemory("values"))?;
        p.push(0);
        let mut jumbled = false;
        for (j, entries) in vectors {
            if entries.is_empty() {
                continue;
            }
            jumbled |= entries.windows(2).any(|w| w[0].0 > w[1].0);
            h.push(j);
            for (i, value) in entries {
                idx.push(i);
                x.push(value);
            }
            p.push(idx.len());
        }
        matrix.store = Storage::Hypersparse { h, p, i: idx, x };
        matrix.jumbled = jumbled;
        Ok(matrix)
    }

    fn check_bounds(&self, row: u64, col: u64) -> Result<()> {
        if row >= self.nrows {
            return Err(GraphError::InvalidIndex {
                axis: "row",
                index: row,
                bound: self.nrows,
            });
        }
        if col >= self.ncols {
            return Err(GraphError::InvalidIndex {
                axis: "column",
                index: col,
                bound: self.ncols,
            });
        }
        Ok(())
    }

    fn cast_in(&self, value: Scalar) -> Result<Scalar> {
        value
            .cast(self.ty)
            .ok_or_else(|| GraphError::DomainMismatch {
                from: value.scalar_type().to_string(),
                to: self.ty.to_string(),
            })
    }

    /// Entries occupying index slots, zombies included.
    fn slot_count(&self) -> usize {
        match &self.store {
            Storage::Full { .. } => (self.vlen() * self.vdim()) as usize,
            Storage::Bitmap { nvals, .. } => *nvals,
            Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. } => i.len(),
        }
    }

    /// Range of vector `j` inside the index arrays.
    fn vector_range(&self, j: u64) -> Option<(usize, usize)> {
        match &self.store {
            Storage::Sparse { p, .. } => {
                let j = j as usize;
                Some((p[j], p[j + 1]))
            }
            Storage::Hypersparse { h, p, .. } => {
                let k = h.binary_search(&j).ok()?;
                Some((p[k], p[k + 1]))
            }
            Storage::Full { .. } | Storage::Bitmap { .. } => None,
        }
    }

    /// Calls `f` with `(i, value)` for every live entry of vector `j`, touching no
    /// other vector. Pending tuples are not visited.
    pub(crate) fn for_each_in_vector(&self, j: u64, mut f: impl FnMut(u64, Scalar)) {
        if j >= self.vdim() {
            return;
        }
        let vlen = self.vlen();
        match &self.store {
            Storage::Full { .. } => {
                for i in 0..vlen {
                    f(i, self.value_at((i + j * vlen) as usize));
                }
            }
            Storage::Bitmap { b, .. } => {
                for i in 0..vlen {
                    let pos = (i + j * vlen) as usize;
                    if b[pos] {
                        f(i, self.value_at(pos));
                    }
                }
            }
            Storage::Sparse { i: idx, .. } | Storage::Hypersparse { i: idx, .. } => {
                let Some((start, end)) = self.vector_range(j) else {
                    return;
                };
                for (pos, &raw) in idx.iter().enumerate().take(end).skip(start) {
                    if raw & ZOMBIE == 0 {
                        f(raw, self.value_at(pos));
                    }
                }
            }
        }
    }

    fn locate(&self, i: u64, j: u64) -> Slot {
        let idx = match &self.store {
            Storage::Full { .. } | Storage::Bitmap { .. } => {
                return Slot::Dense((i + j * self.vlen()) as usize);
            }
            Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. } => i,
        };
        let Some((start, end)) = self.vector_range(j) else {
            return Slot::Absent;
        };
        let range = &idx[start..end];
        let found = if self.jumbled {
            range.iter().position(|&raw| raw & !ZOMBIE == i)
        } else {
            range.binary_search_by_key(&i, |&raw| raw & !ZOMBIE).ok()
        };
        match found {
            Some(offset) if range[offset] & ZOMBIE != 0 => Slot::Zombie(start + offset),
            Some(offset) => Slot::Live(start + offset),
            None => Slot::Absent,
        }
    }

    /// Sorts every vector by index, leaving pending tuples and zombies in place.
    fn unjumble(&mut self) -> Result<()> {
        let iso = self.iso;
        let ranges: Vec<(usize, usize)> = match &self.store {
            Storage::Sparse { p, .. } | Storage::Hypersparse { p, .. } => {
                p.windows(2).map(|w| (w[0], w[1])).collect()
            }
            _ => Vec::new(),
        };
        if let Storage::Sparse { i, x, .. } | Storage::Hypersparse { i, x, .. } = &mut self.store {
            for (start, end) in ranges {
                if end - start < 2 {
                    continue;
                }
                if iso {
                    i[start..end].sort_unstable_by_key(|&raw| raw & !ZOMBIE);
                    continue;
                }
                let mut pairs: Vec<(u64, Scalar)> = i[start..end]
                    .iter()
                    .copied()
                    .zip(x[start..end].iter().copied())
                    .collect();
                pairs.sort_unstable_by_key(|&(raw, _)| raw & !ZOMBIE);
                for (offset, (raw, value)) in pairs.into_iter().enumerate() {
                    i[start + offset] = raw;
                    x[start + offset] = value;
                }
            }
        }
        self.jumbled = false;
        Ok(())
    }

    /// Merges pending tuples into the sorted index and compacts zombies away.
    fn assemble(&mut self) -> Result<()> {
        let ty = self.ty;
        let iso_value = self.iso.then(|| self.store.values()[0]);

        // Existing slots in (j, i) order; `None` marks a zombie.
        let mut existing: Vec<(u64, u64, Option<Scalar>)> = Vec::new();
        existing
            .try_reserve(self.slot_count())
            .map_err(|_| GraphError::OutOfMemory("commit existing entries"))?;
        match &self.store {
            Storage::Sparse { p, i, .. } | Storage::Hypersparse { p, i, .. } => {
                let h = match &self.store {
                    Storage::Hypersparse { h, .. } => Some(h.as_slice()),
                    _ => None,
                };
                for k in 0..p.len() - 1 {
                    let j = h.map_or(k as u64, |h| h[k]);
                    for pos in p[k]..p[k + 1] {
                        let raw = i[pos];
                        let value = (raw & ZOMBIE == 0).then(|| self.value_at(pos));
                        existing.push((j, raw & !ZOMBIE, value));
                    }
                }
            }
            Storage::Full { .. } | Storage::Bitmap { .. } => {
                for (row, col, value) in self.tuples() {
                    let (i, j) = self.to_vector_space(row, col);
                    existing.push((j, i, Some(value)));
                }
            }
        }
        if self.jumbled {
            existing.sort_unstable_by_key(|&(j, i, _)| (j, i));
        }

        // Pending tuples: stable sort keeps insertion order among duplicates.
        let mut incoming: Vec<(u64, u64, Scalar)> = Vec::new();
        let mut op = DupOp::Second;
        if let Some(pending) = &self.pending {
            op = pending.op;
            incoming
                .try_reserve(pending.len())
                .map_err(|_| GraphError::OutOfMemory("commit pending entries"))?;
            for k in 0..pending.len() {
                let raw = pending
                    .value(k, iso_value)
                    .ok_or(GraphError::ContractViolation("iso pending tuple without value"))?;
                incoming.push((pending.j[k], pending.i[k], self.cast_in(raw)?));
            }
            incoming.sort_by_key(|&(j, i, _)| (j, i));
            incoming.dedup_by(|later, earlier| {
                if later.0 == earlier.0 && later.1 == earlier.1 {
                    earlier.2 = op.apply(ty, earlier.2, later.2);
                    true
                } else {
                    false
                }
            });
        }

        let mut merged: Vec<(u64, u64, Scalar)> = Vec::new();
        merged
            .try_reserve(existing.len() + incoming.len())
            .map_err(|_| GraphError::OutOfMemory("commit merge"))?;
        let mut a = existing.into_iter().peekable();
        let mut b = incoming.into_iter().peekable();
        loop {
            match (a.peek(), b.peek()) {
                (None, None) => break,
                (Some(_), None) => {
                    if let Some((j, i, Some(value))) = a.next() {
                        merged.push((j, i, value));
                    }
                }
                (None, Some(_)) => {
                    if let Some(entry) = b.next() {
                        merged.push(entry);
                    }
                }
                (Some(&(aj, ai, _)), Some(&(bj, bi, _))) => {
                    if (aj, ai) < (bj, bi) {
                        if let Some((j, i, Some(value))) = a.next() {
                            merged.push((j, i, value));
                        }
                    } else if (bj, bi) < (aj, ai) {
                        if let Some(entry) = b.next() {
                            merged.push(entry);
                        }
                    } else if let (Some((_, _, old)), Some((j, i, new))) = (a.next(), b.next()) {
                        let value = match old {
                            Some(old) => op.apply(ty, old, new),
                            None => new,
                        };
                        merged.push((j, i, value));
                    }
                }
            }
        }

        debug!(
            pending = self.pending_count(),
            zombies = self.nzombies,
            jumbled = self.jumbled,
            nvals = merged.len(),
            "matrix commit assembled"
        );
        self.install_sorted(merged)?;
        self.pending = None;
        self.nzombies = 0;
        self.jumbled = false;
        Ok(())
    }

    /// Installs canonical `(j, i, value)` entries as hypersparse storage, collapsing
    /// to iso when every value is bitwise equal.
    fn install_sorted(&mut self, entries: Vec<(u64, u64, Scalar)>) -> Result<()> {
        let iso = match entries.first() {
            Some(&(_, _, first)) => entries.iter().all(|&(_, _, v)| v.same_bits(&first)),
            None => false,
        };
        let mut vectors: Vec<(u64, Vec<(u64, Scalar)>)> = Vec::new();
        for (j, i, value) in entries {
            match vectors.last_mut() {
                Some((last, list)) if *last == j => list.push((i, value)),
                _ => vectors.push((j, vec![(i, value)])),
            }
        }
        let rebuilt = Self::from_vectors(
            self.ty,
            self.nrows,
            self.ncols,
            self.by_row,
            vectors,
            self.options.clone(),
        )?;
        self.store = rebuilt.store;
        self.iso = false;
        if iso {
            let x = self.store.values_mut();
            let rep = x[0];
            *x = vec![rep];
            self.iso = true;
            trace!("matrix collapsed to iso after commit");
        }
        Ok(())
    }

    fn preferred_format(&self) -> Format {
        let cells = self.vlen() as u128 * self.vdim() as u128;
        let nvals = self.slot_count() as u128;
        let dense_ok = cells > 0 && cells <= self.options.max_dense_cells as u128;
        let sparse_family = || {
            let nvec = self.nonempty_vectors() as f64;
            if nvec <= self.options.hyper_switch * self.vdim() as f64 {
                Format::Hypersparse
            } else {
                Format::Sparse
            }
        };
        match self.options.sparsity {
            Sparsity::Fixed(Format::Full) if dense_ok => {
                if nvals == cells {
                    Format::Full
                } else {
                    Format::Bitmap
                }
            }
            Sparsity::Fixed(Format::Bitmap) if dense_ok => Format::Bitmap,
            Sparsity::Fixed(Format::Sparse) => Format::Sparse,
            Sparsity::Fixed(Format::Hypersparse) => Format::Hypersparse,
            Sparsity::Fixed(_) | Sparsity::SparseOnly => sparse_family(),
            Sparsity::Auto => {
                if dense_ok && nvals == cells {
                    Format::Full
                } else if dense_ok
                    && nvals > 0
                    && nvals as f64 >= self.options.bitmap_switch * cells as f64
                {
                    Format::Bitmap
                } else {
                    sparse_family()
                }
            }
        }
    }

    fn nonempty_vectors(&self) -> usize {
        match &self.store {
            Storage::Sparse { p, .. } => p.windows(2).filter(|w| w[1] > w[0]).count(),
            Storage::Hypersparse { h, .. } => h.len(),
            Storage::Bitmap { b, .. } => {
                let vlen = self.vlen() as usize;
                if vlen == 0 {
                    return 0;
                }
                b.chunks(vlen).filter(|chunk| chunk.iter().any(|&bit| bit)).count()
            }
            Storage::Full { .. } => {
                if self.vlen() == 0 {
                    0
                } else {
                    self.vdim() as usize
                }
            }
        }
    }

    fn conform(&mut self) -> Result<()> {
        let target = self.preferred_format();
        let current = self.format();
        if target != current {
            self.convert_to(target)?;
            debug!(from = ?current, to = ?target, "matrix format conversion");
        }
        Ok(())
    }

    /// Rebuilds canonical storage in `target` format. Requires no pending tuples,
    /// zombies or jumbled vectors.
    fn convert_to(&mut self, target: Format) -> Result<()> {
        if self.has_deferred_state() {
            return Err(GraphError::ContractViolation(
                "format conversion with deferred state",
            ));
        }
        let vlen = self.vlen();
        let cells = (vlen * self.vdim()) as usize;
        let mut entries: Vec<(u64, u64, Scalar)> = Vec::new();
        entries
            .try_reserve(self.slot_count())
            .map_err(|_| GraphError::OutOfMemory("format conversion"))?;
        for (row, col, value) in self.tuples() {
            let (i, j) = self.to_vector_space(row, col);
            entries.push((j, i, value));
        }
        entries.sort_unstable_by_key(|&(j, i, _)| (j, i));
        let iso = self.iso;
        let rep = iso.then(|| self.store.values()[0]);

        self.store = match target {
            Format::Full | Format::Bitmap => {
                let full = target == Format::Full;
                if full && entries.len() != cells {
                    return Err(GraphError::ContractViolation("full format with missing cells"));
                }
                let mut x = Vec::new();
                let len = if iso { 1 } else { cells };
                x.try_reserve_exact(len)
                    .map_err(|_| GraphError::OutOfMemory("dense values"))?;
                x.resize(len, rep.unwrap_or_else(|| self.ty.zero()));
                let mut b = Vec::new();
                if !full {
                    b.try_reserve_exact(cells)
                        .map_err(|_| GraphError::OutOfMemory("bitmap"))?;
                    b.resize(cells, false);
                }
                let nvals = entries.len();
                for (j, i, value) in entries {
                    let pos = (i + j * vlen) as usize;
                    if !iso {
                        x[pos] = value;
                    }
                    if !full {
                        b[pos] = true;
                    }
                }
                if full {
                    Storage::Full { x }
                } else {
                    Storage::Bitmap { b, x, nvals }
                }
            }
            Format::Sparse | Format::Hypersparse => {
                let mut vectors: Vec<(u64, Vec<(u64, Scalar)>)> = Vec::new();
                for (j, i, value) in entries {
                    match vectors.last_mut() {
                        Some((last, list)) if *last == j => list.push((i, value)),
                        _ => vectors.push((j, vec![(i, value)])),
                    }
                }
                let rebuilt = Self::from_vectors(
                    self.ty,
                    self.nrows,
                    self.ncols,
                    self.by_row,
                    vectors,
                    self.options.clone(),
                )?;
                match rebuilt.store {
                    Storage::Hypersparse { h, p, i, x } if target == Format::Sparse => {
                        let vdim = self.vdim() as usize;
                        let mut dense_p = Vec::new();
                        dense_p
                            .try_reserve_exact(vdim + 1)
                            .map_err(|_| GraphError::OutOfMemory("vector pointers"))?;
                        dense_p.push(0);
                        let mut k = 0;
                        for j in 0..vdim as u64 {
                            if k < h.len() && h[k] == j {
                                k += 1;
                            }
                            dense_p.push(p[k]);
                        }
                        Storage::Sparse { p: dense_p, i, x }
                    }
                    other => other,
                }
            }
        };
        if iso {
            let x = self.store.values_mut();
            x.truncate(1);
            if x.is_empty() {
                if let Some(rep) = rep {
                    x.push(rep);
                }
            }
        }
        Ok(())
    }

    fn convert_to_iso(&mut self, value: Scalar) {
        let x = self.store.values_mut();
        x.clear();
        x.push(value);
        self.iso = true;
        trace!("empty matrix became iso on first assignment");
    }

    fn convert_to_non_iso(&mut self) -> Result<()> {
        if !self.iso {
            return Ok(());
        }
        let len = match &self.store {
            Storage::Full { .. } | Storage::Bitmap { .. } => (self.vlen() * self.vdim()) as usize,
            Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. } => i.len(),
        };
        let x = self.store.values_mut();
        let rep = x.first().copied().unwrap_or_else(|| self.ty.zero());
        let mut expanded = Vec::new();
        expanded
            .try_reserve_exact(len)
            .map_err(|_| GraphError::OutOfMemory("iso expansion"))?;
        expanded.resize(len, rep);
        *x = expanded;
        self.iso = false;
        trace!(entries = len, "matrix expanded from iso");
        Ok(())
    }
}
