use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

/// Accumulated (but not yet normalized) distortion-matrix state.
///
/// This holds:
/// - `matrix`: an `N × N` array of weighted sums. Row `A` tracks the
///   contributions of measured pixel-pairs in bin `A`; column `B` tracks the
///   bin that the unprojected pixel-pair would have been assigned to.
/// - `weights`: the `N` total weights of the measured pixel-pairs in each bin
/// - `n_pairs`: the number of forest pairs that were considered
/// - `n_pairs_used`: the number of forest pairs that actually contributed
///
/// Every piece of this state is purely additive, so partial results computed
/// by separate workers can be combined with [`AccumulationMatrix::merge`] in
/// any order.
#[derive(Clone, Debug, PartialEq)]
pub struct AccumulationMatrix {
    weights: Array1<f64>,
    matrix: Array2<f64>,
    n_pairs: u64,
    n_pairs_used: u64,
}

impl AccumulationMatrix {
    /// Create zero-initialized state for `n_bins` bins
    pub fn zeros(n_bins: usize) -> Result<Self, &'static str> {
        if n_bins == 0 {
            Err("n_bins can't be zero")
        } else {
            Ok(Self {
                weights: Array1::zeros(n_bins),
                matrix: Array2::zeros((n_bins, n_bins)),
                n_pairs: 0,
                n_pairs_used: 0,
            })
        }
    }

    /// Build an instance from previously computed parts.
    ///
    /// This is mostly useful for tests and for restarting a calculation from
    /// saved partial results.
    pub fn from_parts(
        weights: Array1<f64>,
        matrix: Array2<f64>,
        n_pairs: u64,
        n_pairs_used: u64,
    ) -> Result<Self, &'static str> {
        let n_bins = weights.len();
        if n_bins == 0 {
            Err("n_bins can't be zero")
        } else if matrix.shape() != [n_bins, n_bins] {
            Err("matrix must have shape (n_bins, n_bins)")
        } else if n_pairs_used > n_pairs {
            Err("n_pairs_used can't exceed n_pairs")
        } else {
            Ok(Self {
                weights,
                matrix,
                n_pairs,
                n_pairs_used,
            })
        }
    }

    pub fn n_bins(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    pub fn n_pairs(&self) -> u64 {
        self.n_pairs
    }

    pub fn n_pairs_used(&self) -> u64 {
        self.n_pairs_used
    }

    /// record that a forest pair was considered (and whether it was used)
    pub fn record_pair(&mut self, used: bool) {
        self.n_pairs += 1;
        self.n_pairs_used += used as u64;
    }

    #[inline]
    pub(crate) fn add_weight(&mut self, bin: usize, weight: f64) {
        self.weights[bin] += weight;
    }

    #[inline]
    pub(crate) fn add_matrix(&mut self, row: usize, col: usize, value: f64) {
        self.matrix[[row, col]] += value;
    }

    /// merge the contents of `other` into `self`
    pub fn merge(&mut self, other: &AccumulationMatrix) -> Result<(), &'static str> {
        if self.n_bins() != other.n_bins() {
            return Err("can't merge AccumulationMatrix instances with different numbers of bins");
        }
        self.weights += &other.weights;
        self.matrix += &other.matrix;
        self.n_pairs += other.n_pairs;
        self.n_pairs_used += other.n_pairs_used;
        Ok(())
    }

    /// Produce the normalized distortion matrix.
    ///
    /// Each row is divided by the total weight of its bin. Rows of bins that
    /// never received any weight are left as zeros (they are never divided).
    ///
    /// We intentionally take `&self` and return a different type. Since a
    /// [`DistortionMatrix`] can't be normalized again, it's impossible to
    /// accidentally divide by the weights twice.
    pub fn normalize(&self) -> DistortionMatrix {
        let mut matrix = self.matrix.clone();
        Zip::from(matrix.axis_iter_mut(Axis(0)))
            .and(&self.weights)
            .for_each(|mut row, &w| {
                if w > 0.0 {
                    row /= w;
                }
            });
        DistortionMatrix {
            weights: self.weights.clone(),
            matrix,
            n_pairs: self.n_pairs,
            n_pairs_used: self.n_pairs_used,
        }
    }
}

/// The normalized distortion matrix (the main artifact of the calculation).
///
/// `matrix[[A, B]]` describes how much of the true correlation in bin `B`
/// leaks into the measured correlation in bin `A`.
#[derive(Clone, Debug, PartialEq)]
pub struct DistortionMatrix {
    weights: Array1<f64>,
    matrix: Array2<f64>,
    n_pairs: u64,
    n_pairs_used: u64,
}

impl DistortionMatrix {
    pub fn n_bins(&self) -> usize {
        self.weights.len()
    }

    /// the total weight of each bin (`WDM`)
    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    /// the normalized matrix (`DM`)
    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    pub fn n_pairs(&self) -> u64 {
        self.n_pairs
    }

    pub fn n_pairs_used(&self) -> u64 {
        self.n_pairs_used
    }

    /// consume self and return `(weights, matrix)`
    pub fn into_arrays(self) -> (Array1<f64>, Array2<f64>) {
        (self.weights, self.matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn zeros_errors() {
        assert!(AccumulationMatrix::zeros(0).is_err());
        let acc = AccumulationMatrix::zeros(3).unwrap();
        assert_eq!(acc.matrix().shape(), [3, 3]);
        assert_eq!(acc.n_pairs(), 0);
    }

    #[test]
    fn from_parts_errors() {
        assert!(
            AccumulationMatrix::from_parts(Array1::zeros(2), Array2::zeros((2, 3)), 0, 0).is_err()
        );
        assert!(
            AccumulationMatrix::from_parts(Array1::zeros(2), Array2::zeros((2, 2)), 1, 2).is_err()
        );
    }

    #[test]
    fn merge() {
        let mut acc = AccumulationMatrix::zeros(2).unwrap();
        acc.add_weight(0, 2.0);
        acc.add_matrix(0, 1, 1.5);
        acc.record_pair(true);

        let mut other = AccumulationMatrix::zeros(2).unwrap();
        other.add_weight(0, 1.0);
        other.add_weight(1, 4.0);
        other.add_matrix(1, 1, 4.0);
        other.record_pair(false);

        acc.merge(&other).unwrap();
        assert_eq!(acc.weights(), array![3.0, 4.0]);
        assert_eq!(acc.matrix(), array![[0.0, 1.5], [0.0, 4.0]]);
        assert_eq!(acc.n_pairs(), 2);
        assert_eq!(acc.n_pairs_used(), 1);

        let wrong_size = AccumulationMatrix::zeros(3).unwrap();
        assert!(acc.merge(&wrong_size).is_err());
    }

    #[test]
    fn normalize_rows() {
        let acc = AccumulationMatrix::from_parts(
            array![2.0, 0.0, 4.0],
            array![[1.0, 1.0, 0.0], [0.0, 0.0, 0.0], [2.0, 0.0, 2.0]],
            5,
            3,
        )
        .unwrap();
        let dmat = acc.normalize();
        assert_eq!(
            dmat.matrix(),
            array![[0.5, 0.5, 0.0], [0.0, 0.0, 0.0], [0.5, 0.0, 0.5]]
        );
        assert_eq!(dmat.weights(), acc.weights());
        assert_eq!(dmat.n_pairs(), 5);
        assert_eq!(dmat.n_pairs_used(), 3);

        // the accumulation is left untouched, so normalizing it again gives
        // exactly the same thing
        assert_eq!(acc.normalize(), dmat);
    }

    #[test]
    fn normalize_leaves_zero_weight_rows() {
        let acc = AccumulationMatrix::from_parts(
            array![0.0, 1.0],
            array![[0.0, 0.0], [0.0, 1.0]],
            1,
            1,
        )
        .unwrap();
        let dmat = acc.normalize();
        assert!(dmat.matrix().iter().all(|v| v.is_finite()));
        assert_eq!(dmat.matrix().row(0), array![0.0, 0.0]);
        assert_eq!(dmat.matrix()[[1, 1]], 1.0);
    }
}
