use traj_core::nalgebra::DVector;
use traj_core::{Result, TrajectoryError};

/// Pivots smaller than this fraction of the largest entry are treated as zero.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// A square sparse matrix assembled from `(row, column, value)` triplets.
///
/// Triplets on the same entry add up.
#[derive(Debug, Clone, PartialEq)]
pub struct TripletMatrix {
    size: usize,
    entries: Vec<(usize, usize, f64)>,
}

impl TripletMatrix {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            entries: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn push(&mut self, row: usize, column: usize, value: f64) {
        debug_assert!(row < self.size && column < self.size);
        if value != 0.0 {
            self.entries.push((row, column, value));
        }
    }

    /// The number of sub-diagonals and super-diagonals holding entries.
    pub fn bandwidths(&self) -> (usize, usize) {
        self.entries
            .iter()
            .fold((0, 0), |(lower, upper), &(row, column, _)| {
                (
                    lower.max(row.saturating_sub(column)),
                    upper.max(column.saturating_sub(row)),
                )
            })
    }

    /// Solves `A x = b` with a banded LU factorization with partial pivoting.
    ///
    /// Fails with [`TrajectoryError::SingularSystem`] when a pivot vanishes.
    pub fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        if rhs.len() != self.size {
            return Err(TrajectoryError::malformed(format!(
                "right hand side of length {} for a system of size {}",
                rhs.len(),
                self.size
            )));
        }
        BandLu::new(self).solve(rhs.clone())
    }
}

/// Row major band storage that leaves room for the fill-in of partial pivoting.
///
/// Row `i` stores the columns `i - lower..=i + lower + upper`.
struct BandLu {
    size: usize,
    lower: usize,
    width: usize,
    band: Vec<f64>,
    scale: f64,
}

impl BandLu {
    fn new(matrix: &TripletMatrix) -> Self {
        let (lower, upper) = matrix.bandwidths();
        let width = 2 * lower + upper + 1;
        let mut lu = Self {
            size: matrix.size,
            lower,
            width,
            band: vec![0.0; matrix.size * width],
            scale: 0.0,
        };
        for &(row, column, value) in &matrix.entries {
            *lu.at(row, column) += value;
        }
        lu.scale = lu.band.iter().fold(0.0, |max: f64, n| max.max(n.abs()));
        lu
    }

    /// The last column stored for row `row`.
    fn row_end(&self, row: usize) -> usize {
        (row + self.width - self.lower - 1).min(self.size - 1)
    }

    fn at(&mut self, row: usize, column: usize) -> &mut f64 {
        &mut self.band[row * self.width + column + self.lower - row]
    }

    fn get(&self, row: usize, column: usize) -> f64 {
        self.band[row * self.width + column + self.lower - row]
    }

    fn solve(mut self, mut b: DVector<f64>) -> Result<DVector<f64>> {
        let n = self.size;
        let tolerance = PIVOT_TOLERANCE * self.scale;
        for k in 0..n {
            let last_row = (k + self.lower).min(n - 1);
            let (pivot_row, pivot) = (k..=last_row)
                .map(|row| (row, self.get(row, k)))
                .fold((k, 0.0_f64), |best, (row, value)| {
                    if value.abs() > best.1.abs() {
                        (row, value)
                    } else {
                        best
                    }
                });
            if pivot.abs() <= tolerance || pivot == 0.0 {
                return Err(TrajectoryError::SingularSystem { size: n, pivot: k });
            }

            let end = self.row_end(k);
            if pivot_row != k {
                for column in k..=end {
                    let current = self.get(k, column);
                    *self.at(k, column) = self.get(pivot_row, column);
                    *self.at(pivot_row, column) = current;
                }
                b.swap_rows(k, pivot_row);
            }

            for row in k + 1..=last_row {
                let factor = self.get(row, k) / pivot;
                if factor == 0.0 {
                    continue;
                }
                *self.at(row, k) = 0.0;
                for column in k + 1..=end {
                    let value = self.get(k, column);
                    *self.at(row, column) -= factor * value;
                }
                b[row] -= factor * b[k];
            }
        }

        for k in (0..n).rev() {
            let sum = (k + 1..=self.row_end(k))
                .map(|column| self.get(k, column) * b[column])
                .sum::<f64>();
            b[k] = (b[k] - sum) / self.get(k, k);
        }
        Ok(b)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use traj_core::nalgebra::DMatrix;

    #[test]
    fn matches_dense_solve() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let size = 40;
        let mut matrix = TripletMatrix::new(size);
        let mut dense = DMatrix::<f64>::zeros(size, size);
        for row in 0..size {
            for column in row.saturating_sub(3)..(row + 5).min(size) {
                let value = rng.gen_range(-1.0..1.0);
                matrix.push(row, column, value);
                dense[(row, column)] += value;
            }
            matrix.push(row, row, 5.0);
            dense[(row, row)] += 5.0;
        }
        assert_eq!(matrix.bandwidths(), (3, 4));
        let rhs = DVector::from_fn(size, |_, _| rng.gen_range(-1.0..1.0));
        let x = matrix.solve(&rhs).unwrap();
        assert_relative_eq!(dense * x, rhs, epsilon = 1e-8);
    }

    #[test]
    fn pivots_around_zero_diagonal() {
        // A saddle point system with a zero block on the diagonal.
        let mut matrix = TripletMatrix::new(3);
        matrix.push(0, 0, 2.0);
        matrix.push(0, 2, 1.0);
        matrix.push(1, 1, 1.0);
        matrix.push(1, 2, 1.0);
        matrix.push(2, 0, 1.0);
        matrix.push(2, 1, 1.0);
        let x = matrix
            .solve(&DVector::from_vec(vec![0.0, 0.0, 3.0]))
            .unwrap();
        assert_relative_eq!(x, DVector::from_vec(vec![1.0, 2.0, -2.0]), epsilon = 1e-12);
    }

    #[test]
    fn singular_systems_are_reported() {
        let mut matrix = TripletMatrix::new(2);
        matrix.push(0, 0, 1.0);
        matrix.push(0, 1, -1.0);
        matrix.push(1, 0, -1.0);
        matrix.push(1, 1, 1.0);
        assert_eq!(
            matrix.solve(&DVector::zeros(2)),
            Err(TrajectoryError::SingularSystem { size: 2, pivot: 1 })
        );
        assert!(TripletMatrix::new(1).solve(&DVector::zeros(1)).is_err());
    }
}
