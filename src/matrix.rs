// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Dense matrices of `f64` with a row-parallel multiplication kernel.

use crate::error::Error;
use crate::executor::Executor;
use crate::macros::log_debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::ops::{Index, IndexMut};

/// Initial contents of a [`Matrix`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fill {
    /// All elements are zero.
    Zero,
    /// Ones on the main diagonal, zeros elsewhere. For a non-square matrix,
    /// the diagonal stops at `min(rows, cols)`.
    Identity,
    /// Elements drawn uniformly in `[-1, 1]`.
    ///
    /// Each row is drawn from its own ChaCha8 stream derived from `seed`, so
    /// the result only depends on the seed and not on how rows are spread
    /// across workers.
    Uniform {
        /// Seed of the random streams.
        seed: u64,
    },
}

/// An owned dense matrix of `f64`, stored as a single contiguous row-major
/// buffer.
///
/// Either dimension may be zero, in which case the matrix has no elements. The
/// [`Default`] is the `0x0` matrix, which is also what [`take()`](Self::take)
/// leaves behind.
///
/// ```
/// # use paranum::{Fill, Matrix, ThreadPoolBuilder};
/// let mut thread_pool = ThreadPoolBuilder::default().build();
///
/// let a = Matrix::new(2, 3, Fill::Uniform { seed: 1 }).unwrap();
/// let b = Matrix::new(3, 2, Fill::Identity).unwrap();
/// let c = a.multiply(&b, &mut thread_pool).unwrap();
///
/// assert_eq!((c.rows(), c.cols()), (2, 2));
/// assert_eq!(c[(1, 0)], a[(1, 0)]);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Matrix {
    /// Number of rows.
    rows: usize,
    /// Number of columns, i.e. the row stride.
    cols: usize,
    /// Row-major elements, of length `rows * cols`.
    data: Vec<f64>,
}

impl Matrix {
    /// Creates a matrix of the given shape.
    ///
    /// Fails with [`Error::InvalidDimension`] if the number of elements can't
    /// be allocated.
    pub fn new(rows: usize, cols: usize, fill: Fill) -> Result<Self, Error> {
        let len = check_shape(rows, cols)?;
        let mut data = vec![0.0; len];
        if fill != Fill::Zero && len != 0 {
            for (row, values) in data.chunks_mut(cols).enumerate() {
                fill_row(fill, row, values);
            }
        }
        Ok(Self { rows, cols, data })
    }

    /// Like [`new()`](Self::new) but filling the rows in parallel on the given
    /// executor. The result is identical.
    pub fn par_new(
        rows: usize,
        cols: usize,
        fill: Fill,
        executor: &mut impl Executor,
    ) -> Result<Self, Error> {
        let len = check_shape(rows, cols)?;
        let mut data = vec![0.0; len];
        if fill != Fill::Zero && len != 0 {
            executor.for_each_chunk_mut(&mut data, cols, |row, values| {
                fill_row(fill, row, values)
            })?;
        }
        Ok(Self { rows, cols, data })
    }

    /// Creates a matrix with elements drawn uniformly in `[-1, 1]` from the
    /// given random generator, in row-major order.
    pub fn random(rows: usize, cols: usize, rng: &mut impl Rng) -> Result<Self, Error> {
        let len = check_shape(rows, cols)?;
        let data = (0..len).map(|_| rng.random_range(-1.0..=1.0)).collect();
        Ok(Self { rows, cols, data })
    }

    /// Creates a matrix from row-major elements.
    ///
    /// Fails with [`Error::InvalidDimension`] if the shape is invalid or
    /// doesn't match the number of elements.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, Error> {
        let len = check_shape(rows, cols)?;
        if data.len() != len {
            return Err(Error::InvalidDimension { rows, cols });
        }
        Ok(Self { rows, cols, data })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Whether the matrix has no elements, i.e. one of its dimensions is zero.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the element at the given row and column, if in bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.offset(row, col).map(|i| self.data[i])
    }

    /// Returns a mutable reference to the element at the given row and column,
    /// if in bounds.
    pub fn get_mut(&mut self, row: usize, col: usize) -> Option<&mut f64> {
        self.offset(row, col).map(|i| &mut self.data[i])
    }

    /// Returns the elements of the given row.
    ///
    /// # Panics
    ///
    /// Panics if `row >= self.rows()`.
    pub fn row(&self, row: usize) -> &[f64] {
        assert!(
            row < self.rows,
            "row {row} out of bounds for a {}x{} matrix",
            self.rows,
            self.cols
        );
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Returns all the elements, in row-major order.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Consumes the matrix, returning its row-major elements.
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Returns a deep copy of this matrix, with rows copied in parallel on the
    /// given executor.
    pub fn copy_with(&self, executor: &mut impl Executor) -> Result<Self, Error> {
        if self.is_empty() {
            return Ok(self.clone());
        }
        let mut data = vec![0.0; self.data.len()];
        executor.for_each_chunk_mut(&mut data, self.cols, |row, values| {
            values.copy_from_slice(self.row(row))
        })?;
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    /// Moves the contents out of this matrix, leaving the empty matrix in its
    /// place. This doesn't copy nor allocate.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Multiplies this matrix by `rhs`, computing output rows in parallel on
    /// the given executor.
    ///
    /// Each output element is the sum of `self[(m, k)] * rhs[(k, n)]` over `k`,
    /// accumulated from `0.0` in increasing order of `k`. The result is
    /// therefore bitwise identical to [`multiply_serial()`](Self::multiply_serial)
    /// on every backend.
    ///
    /// Fails with [`Error::DimensionMismatch`] if `self.cols() != rhs.rows()`,
    /// before allocating anything. A zero inner dimension yields the zero
    /// matrix of shape `(self.rows(), rhs.cols())`.
    ///
    /// ```
    /// # use paranum::{Error, Fill, Matrix, ThreadPoolBuilder};
    /// let mut thread_pool = ThreadPoolBuilder::default().build();
    ///
    /// let a = Matrix::new(2, 3, Fill::Zero).unwrap();
    /// let b = Matrix::new(2, 2, Fill::Zero).unwrap();
    /// assert!(matches!(
    ///     a.multiply(&b, &mut thread_pool),
    ///     Err(Error::DimensionMismatch { lhs: (2, 3), rhs: (2, 2) })
    /// ));
    /// ```
    pub fn multiply(&self, rhs: &Matrix, executor: &mut impl Executor) -> Result<Matrix, Error> {
        self.check_multiply(rhs)?;
        let mut data = vec![0.0; self.rows * rhs.cols];
        if data.is_empty() || self.cols == 0 {
            return Ok(Self {
                rows: self.rows,
                cols: rhs.cols,
                data,
            });
        }
        log_debug!(
            "Multiplying {}x{} by {}x{} on {} workers",
            self.rows,
            self.cols,
            rhs.rows,
            rhs.cols,
            executor.num_workers()
        );
        executor.for_each_chunk_mut(&mut data, rhs.cols, |m, out| {
            self.multiply_row(rhs, m, out)
        })?;
        Ok(Self {
            rows: self.rows,
            cols: rhs.cols,
            data,
        })
    }

    /// Single-threaded reference multiplication, with the same summation order
    /// as [`multiply()`](Self::multiply).
    pub fn multiply_serial(&self, rhs: &Matrix) -> Result<Matrix, Error> {
        self.check_multiply(rhs)?;
        let mut data = Vec::with_capacity(self.rows * rhs.cols);
        for m in 0..self.rows {
            for n in 0..rhs.cols {
                let mut sum = 0.0;
                for k in 0..self.cols {
                    sum += self.data[m * self.cols + k] * rhs.data[k * rhs.cols + n];
                }
                data.push(sum);
            }
        }
        Ok(Self {
            rows: self.rows,
            cols: rhs.cols,
            data,
        })
    }

    /// Multiplies a sequence of matrices from left to right. The empty
    /// sequence yields the empty matrix.
    ///
    /// ```
    /// # use paranum::{Fill, Matrix, ThreadPoolBuilder};
    /// let mut thread_pool = ThreadPoolBuilder::default().build();
    ///
    /// let a = Matrix::new(4, 3, Fill::Uniform { seed: 1 }).unwrap();
    /// let b = Matrix::new(3, 5, Fill::Uniform { seed: 2 }).unwrap();
    /// let c = Matrix::new(5, 2, Fill::Uniform { seed: 3 }).unwrap();
    /// let abc = Matrix::product([&a, &b, &c], &mut thread_pool).unwrap();
    /// assert_eq!(abc.shape(), (4, 2));
    /// ```
    pub fn product<'a>(
        factors: impl IntoIterator<Item = &'a Matrix>,
        executor: &mut impl Executor,
    ) -> Result<Matrix, Error> {
        let mut factors = factors.into_iter();
        let Some(first) = factors.next() else {
            return Ok(Self::default());
        };
        let mut result = first.clone();
        for factor in factors {
            result = result.multiply(factor, executor)?;
        }
        Ok(result)
    }

    fn check_multiply(&self, rhs: &Matrix) -> Result<(), Error> {
        if self.cols != rhs.rows {
            return Err(Error::DimensionMismatch {
                lhs: self.shape(),
                rhs: rhs.shape(),
            });
        }
        Ok(())
    }

    /// Accumulates output row `m` of `self * rhs` into the zeroed `out`.
    fn multiply_row(&self, rhs: &Matrix, m: usize, out: &mut [f64]) {
        for (k, &a) in self.row(m).iter().enumerate() {
            for (o, &b) in out.iter_mut().zip(rhs.row(k)) {
                *o += a * b;
            }
        }
    }

    fn offset(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.rows && col < self.cols).then(|| row * self.cols + col)
    }

    fn offset_or_panic(&self, row: usize, col: usize) -> usize {
        self.offset(row, col).unwrap_or_else(|| {
            panic!(
                "index ({row}, {col}) out of bounds for a {}x{} matrix",
                self.rows, self.cols
            )
        })
    }
}

/// Checks that a shape is valid, and returns its number of elements.
fn check_shape(rows: usize, cols: usize) -> Result<usize, Error> {
    match rows.checked_mul(cols) {
        Some(len) if len <= isize::MAX as usize / std::mem::size_of::<f64>() => Ok(len),
        _ => Err(Error::InvalidDimension { rows, cols }),
    }
}

/// Fills one row of a zero-initialized matrix.
fn fill_row(fill: Fill, row: usize, values: &mut [f64]) {
    match fill {
        Fill::Zero => (),
        Fill::Identity => {
            if let Some(x) = values.get_mut(row) {
                *x = 1.0;
            }
        }
        Fill::Uniform { seed } => {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(row as u64);
            for x in values {
                *x = rng.random_range(-1.0..=1.0);
            }
        }
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        &self.data[self.offset_or_panic(row, col)]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        let i = self.offset_or_panic(row, col);
        &mut self.data[i]
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.rows {
            write!(f, "|")?;
            for x in self.row(row) {
                write!(f, " {x:.6}")?;
            }
            writeln!(f, " |")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{RangeStrategy, ThreadCount, ThreadPoolBuilder};

    fn thread_pool() -> crate::ThreadPool {
        ThreadPoolBuilder {
            num_threads: ThreadCount::try_from(4).unwrap(),
            range_strategy: RangeStrategy::WorkStealing,
            cpu_pinning: crate::CpuPinningPolicy::No,
        }
        .build()
    }

    fn assert_close(a: &Matrix, b: &Matrix, tolerance: f64) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
            let scale = x.abs().max(y.abs()).max(1.0);
            assert!((x - y).abs() <= tolerance * scale, "{x} != {y}");
        }
    }

    #[test]
    fn test_new_zero_and_identity() {
        let zero = Matrix::new(2, 3, Fill::Zero).unwrap();
        assert_eq!(zero.shape(), (2, 3));
        assert!(zero.as_slice().iter().all(|x| *x == 0.0));

        let id = Matrix::new(3, 2, Fill::Identity).unwrap();
        assert_eq!(id.as_slice(), [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        let id = Matrix::new(2, 3, Fill::Identity).unwrap();
        assert_eq!(id.as_slice(), [1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_new_invalid_dimensions() {
        assert!(matches!(
            Matrix::new(usize::MAX, 2, Fill::Zero),
            Err(Error::InvalidDimension { .. })
        ));
        assert!(matches!(
            Matrix::from_vec(2, 2, vec![1.0; 3]),
            Err(Error::InvalidDimension { rows: 2, cols: 2 })
        ));

        let empty = Matrix::new(0, 0, Fill::Identity).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty, Matrix::default());
    }

    #[test]
    fn test_new_one_zero_dimension() {
        let mut thread_pool = thread_pool();
        for (rows, cols) in [(0, 3), (3, 0)] {
            let a = Matrix::new(rows, cols, Fill::Identity).unwrap();
            assert_eq!(a.shape(), (rows, cols));
            assert!(a.is_empty());
            assert!(a.as_slice().is_empty());
            assert_ne!(a, Matrix::default());

            let fill = Fill::Uniform { seed: 1 };
            let b = Matrix::par_new(rows, cols, fill, &mut thread_pool).unwrap();
            assert_eq!(b.shape(), (rows, cols));
            assert_eq!(Matrix::from_vec(rows, cols, Vec::new()).unwrap(), a);
            assert_eq!(a.copy_with(&mut thread_pool).unwrap().shape(), (rows, cols));
        }
        let tall = Matrix::new(usize::MAX, 0, Fill::Zero).unwrap();
        assert_eq!(tall.shape(), (usize::MAX, 0));
    }

    #[test]
    fn test_uniform_is_seeded_and_bounded() {
        let a = Matrix::new(20, 30, Fill::Uniform { seed: 42 }).unwrap();
        let b = Matrix::new(20, 30, Fill::Uniform { seed: 42 }).unwrap();
        let c = Matrix::new(20, 30, Fill::Uniform { seed: 43 }).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_slice().iter().all(|x| (-1.0..=1.0).contains(x)));
        // Rows come from distinct streams.
        assert_ne!(a.row(0), a.row(1));

        let mut thread_pool = thread_pool();
        let d = Matrix::par_new(20, 30, Fill::Uniform { seed: 42 }, &mut thread_pool).unwrap();
        assert_eq!(a, d);
        let id = Matrix::par_new(5, 5, Fill::Identity, &mut thread_pool).unwrap();
        assert_eq!(id, Matrix::new(5, 5, Fill::Identity).unwrap());
    }

    #[test]
    fn test_random_from_rng() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let a = Matrix::random(4, 4, &mut rng).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let b = Matrix::random(4, 4, &mut rng).unwrap();
        assert_eq!(a, b);
        assert!(a.as_slice().iter().all(|x| (-1.0..=1.0).contains(x)));
    }

    #[test]
    fn test_accessors() {
        let mut a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(a.get(1, 2), Some(6.0));
        assert_eq!(a.get(2, 0), None);
        assert_eq!(a.get(0, 3), None);
        assert_eq!(a.row(1), [4.0, 5.0, 6.0]);
        *a.get_mut(0, 1).unwrap() = -2.0;
        a[(1, 0)] = -4.0;
        assert_eq!(a[(0, 1)], -2.0);
        assert_eq!(a.into_vec(), [1.0, -2.0, 3.0, -4.0, 5.0, 6.0]);
    }

    #[test]
    #[should_panic = "index (2, 0) out of bounds for a 2x2 matrix"]
    fn test_index_out_of_bounds() {
        let a = Matrix::new(2, 2, Fill::Zero).unwrap();
        let _ = a[(2, 0)];
    }

    #[test]
    fn test_copy_is_deep() {
        let mut thread_pool = thread_pool();
        let a = Matrix::new(8, 5, Fill::Uniform { seed: 3 }).unwrap();
        let mut b = a.copy_with(&mut thread_pool).unwrap();
        assert_eq!(a, b);
        b[(0, 0)] += 1.0;
        assert_ne!(a, b);

        let mut c = a.clone();
        c[(7, 4)] = 100.0;
        assert_ne!(a, c);
        assert_ne!(a[(7, 4)], 100.0);

        let empty = Matrix::default().copy_with(&mut thread_pool).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_take_leaves_empty() {
        let mut thread_pool = thread_pool();
        let mut a = Matrix::new(3, 3, Fill::Identity).unwrap();
        let b = a.take();
        assert_eq!(b, Matrix::new(3, 3, Fill::Identity).unwrap());
        assert!(a.is_empty());
        assert_eq!(a.shape(), (0, 0));
        assert!(a.as_slice().is_empty());

        // The moved-from matrix is still usable.
        let product = a.multiply(&Matrix::default(), &mut thread_pool).unwrap();
        assert!(product.is_empty());
        assert_eq!(a.to_string(), "");
        a = b;
        assert_eq!(a.shape(), (3, 3));
    }

    #[test]
    fn test_multiply_matches_serial_reference() {
        let mut thread_pool = thread_pool();
        for (m, k, n) in [(1, 1, 1), (3, 7, 2), (17, 9, 23), (64, 64, 64), (1, 100, 1)] {
            let a = Matrix::new(m, k, Fill::Uniform { seed: 1 }).unwrap();
            let b = Matrix::new(k, n, Fill::Uniform { seed: 2 }).unwrap();
            let c = a.multiply(&b, &mut thread_pool).unwrap();
            let reference = a.multiply_serial(&b).unwrap();
            assert_eq!(c.shape(), (m, n));
            assert_eq!(c, reference);
        }
    }

    #[test]
    fn test_multiply_hand_computed() {
        let mut thread_pool = thread_pool();
        let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Matrix::from_vec(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = a.multiply(&b, &mut thread_pool).unwrap();
        assert_eq!(c.as_slice(), [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_multiply_identity() {
        let mut thread_pool = thread_pool();
        let a = Matrix::new(6, 4, Fill::Uniform { seed: 9 }).unwrap();
        let left = Matrix::new(6, 6, Fill::Identity).unwrap();
        let right = Matrix::new(4, 4, Fill::Identity).unwrap();
        assert_eq!(left.multiply(&a, &mut thread_pool).unwrap(), a);
        assert_eq!(a.multiply(&right, &mut thread_pool).unwrap(), a);
    }

    #[test]
    fn test_multiply_is_associative() {
        let mut thread_pool = thread_pool();
        let a = Matrix::new(10, 20, Fill::Uniform { seed: 1 }).unwrap();
        let b = Matrix::new(20, 15, Fill::Uniform { seed: 2 }).unwrap();
        let c = Matrix::new(15, 5, Fill::Uniform { seed: 3 }).unwrap();
        let ab_c = a
            .multiply(&b, &mut thread_pool)
            .unwrap()
            .multiply(&c, &mut thread_pool)
            .unwrap();
        let a_bc = a
            .multiply(&b.multiply(&c, &mut thread_pool).unwrap(), &mut thread_pool)
            .unwrap();
        assert_close(&ab_c, &a_bc, 1e-9);
        assert_eq!(Matrix::product([&a, &b, &c], &mut thread_pool).unwrap(), ab_c);
    }

    #[test]
    fn test_multiply_zero_inner_dimension() {
        let mut thread_pool = thread_pool();
        let a = Matrix::new(2, 0, Fill::Zero).unwrap();
        let b = Matrix::new(0, 3, Fill::Zero).unwrap();
        let zero = Matrix::new(2, 3, Fill::Zero).unwrap();
        assert_eq!(a.multiply(&b, &mut thread_pool).unwrap(), zero);
        assert_eq!(a.multiply_serial(&b).unwrap(), zero);

        // Rows or columns of the output can vanish too.
        let c = Matrix::new(3, 2, Fill::Uniform { seed: 4 }).unwrap();
        let d = Matrix::new(2, 0, Fill::Zero).unwrap();
        assert_eq!(c.multiply(&d, &mut thread_pool).unwrap().shape(), (3, 0));
        let e = Matrix::new(0, 3, Fill::Zero).unwrap();
        assert_eq!(e.multiply(&c, &mut thread_pool).unwrap().shape(), (0, 2));
        assert_eq!(
            Matrix::product([&c, &d, &b], &mut thread_pool).unwrap(),
            Matrix::new(3, 3, Fill::Zero).unwrap()
        );
    }

    #[test]
    fn test_multiply_dimension_mismatch() {
        let mut thread_pool = thread_pool();
        let a = Matrix::new(2, 3, Fill::Zero).unwrap();
        let b = Matrix::new(2, 2, Fill::Zero).unwrap();
        let error = a.multiply(&b, &mut thread_pool).unwrap_err();
        assert!(matches!(
            error,
            Error::DimensionMismatch {
                lhs: (2, 3),
                rhs: (2, 2)
            }
        ));
        assert!(a.multiply_serial(&b).is_err());
        assert!(a.multiply(&Matrix::default(), &mut thread_pool).is_err());
        assert!(matches!(
            Matrix::product([&a, &a], &mut thread_pool),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_product_edge_cases() {
        let mut thread_pool = thread_pool();
        let empty = Matrix::product(std::iter::empty(), &mut thread_pool).unwrap();
        assert!(empty.is_empty());
        let a = Matrix::new(2, 2, Fill::Uniform { seed: 5 }).unwrap();
        assert_eq!(Matrix::product([&a], &mut thread_pool).unwrap(), a);
    }

    #[test]
    fn test_display() {
        let a = Matrix::from_vec(2, 2, vec![1.0, -0.5, 0.25, 2.0]).unwrap();
        assert_eq!(a.to_string(), "| 1.000000 -0.500000 |\n| 0.250000 2.000000 |\n");
        assert_eq!(Matrix::default().to_string(), "");
        assert_eq!(Matrix::new(2, 0, Fill::Zero).unwrap().to_string(), "| |\n| |\n");
        assert_eq!(Matrix::new(0, 2, Fill::Zero).unwrap().to_string(), "");
    }
}
