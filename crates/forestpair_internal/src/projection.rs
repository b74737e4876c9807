//! Projection operators of forests.
//!
//! The operator built from a continuum fit is the identity minus a low-rank
//! update (one term for the mean and one for the slope). We keep it in that
//! form ([`LowRankProjection`]) so that the accumulator can exploit the
//! structure. Arbitrary operators are stored densely.

use ndarray::{Array2, ArrayView2, CowArray, Ix2};

/// An operator of the form `P[i,k] = δᵢₖ - Σᵣ left[r,i] right[r,k]`.
#[derive(Clone, Debug, PartialEq)]
pub struct LowRankProjection {
    // both have shape (rank, n_pixels)
    left: Array2<f64>,
    right: Array2<f64>,
}

impl LowRankProjection {
    pub fn new(left: Array2<f64>, right: Array2<f64>) -> Result<Self, &'static str> {
        if left.dim() != right.dim() {
            Err("left & right must have the same shape")
        } else {
            Ok(Self { left, right })
        }
    }

    /// The identity operator (a rank-0 update)
    pub fn identity(n_pixels: usize) -> Self {
        Self {
            left: Array2::zeros((0, n_pixels)),
            right: Array2::zeros((0, n_pixels)),
        }
    }

    pub fn rank(&self) -> usize {
        self.left.nrows()
    }

    pub fn n_pixels(&self) -> usize {
        self.left.ncols()
    }

    pub fn left(&self) -> ArrayView2<'_, f64> {
        self.left.view()
    }

    pub fn right(&self) -> ArrayView2<'_, f64> {
        self.right.view()
    }

    pub fn to_dense(&self) -> Array2<f64> {
        Array2::eye(self.n_pixels()) - self.left.t().dot(&self.right)
    }
}

/// Build the operator that projects out the modes removed by continuum
/// fitting (a weighted mean & a weighted slope in `loglam`).
///
/// ```text
/// P[i,k] = δᵢₖ - w_k/Σw - dlᵢ w_k dl_k / Σ(w dl²)
/// ```
///
/// where `dl = loglam - <loglam>` and `<loglam>` is the weighted mean. A term
/// is dropped when its denominator vanishes (e.g. a single-pixel forest has
/// no slope). `weight` should have the same length as `loglam`; extra entries
/// of the longer slice are ignored.
pub fn continuum_projection(loglam: &[f64], weight: &[f64]) -> LowRankProjection {
    let n = loglam.len().min(weight.len());
    let (loglam, weight) = (&loglam[..n], &weight[..n]);

    let sum_w: f64 = weight.iter().sum();
    if !(sum_w > 0.0) {
        return LowRankProjection::identity(n);
    }
    let mean_loglam = loglam
        .iter()
        .zip(weight.iter())
        .map(|(l, w)| l * w)
        .sum::<f64>()
        / sum_w;
    let dl: Vec<f64> = loglam.iter().map(|l| l - mean_loglam).collect();
    let sum_wdl2: f64 = dl.iter().zip(weight.iter()).map(|(d, w)| w * d * d).sum();

    let rank = if sum_wdl2 > 0.0 { 2 } else { 1 };
    let mut left = Array2::<f64>::zeros((rank, n));
    let mut right = Array2::<f64>::zeros((rank, n));
    for k in 0..n {
        left[[0, k]] = 1.0;
        right[[0, k]] = weight[k] / sum_w;
        if rank == 2 {
            left[[1, k]] = dl[k];
            right[[1, k]] = weight[k] * dl[k] / sum_wdl2;
        }
    }
    LowRankProjection { left, right }
}

/// An owned projection operator.
#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    /// an arbitrary `(n_pixels, n_pixels)` operator
    Dense(Array2<f64>),
    LowRank(LowRankProjection),
}

impl Projection {
    pub fn n_pixels(&self) -> usize {
        match self {
            Projection::Dense(matrix) => matrix.nrows(),
            Projection::LowRank(low_rank) => low_rank.n_pixels(),
        }
    }

    pub fn view(&self) -> ProjectionView<'_> {
        match self {
            Projection::Dense(matrix) => ProjectionView::Dense(matrix.view()),
            Projection::LowRank(low_rank) => ProjectionView::LowRank(low_rank),
        }
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Projection::Dense(matrix) => matrix.clone(),
            Projection::LowRank(low_rank) => low_rank.to_dense(),
        }
    }
}

/// A borrowed projection operator, as seen by the accumulator.
#[derive(Clone, Copy, Debug)]
pub enum ProjectionView<'a> {
    Identity,
    Dense(ArrayView2<'a, f64>),
    LowRank(&'a LowRankProjection),
}

impl<'a> ProjectionView<'a> {
    pub fn is_identity(&self) -> bool {
        matches!(self, ProjectionView::Identity)
    }

    /// The dense `(n_pixels, n_pixels)` form of the operator
    pub fn to_dense(&self, n_pixels: usize) -> CowArray<'a, f64, Ix2> {
        match self {
            ProjectionView::Identity => CowArray::from(Array2::eye(n_pixels)),
            ProjectionView::Dense(view) => CowArray::from(*view),
            ProjectionView::LowRank(low_rank) => CowArray::from(low_rank.to_dense()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_rank_shapes() {
        assert!(LowRankProjection::new(Array2::zeros((2, 3)), Array2::zeros((1, 3))).is_err());
        let identity = LowRankProjection::identity(3);
        assert_eq!(identity.rank(), 0);
        assert_eq!(identity.n_pixels(), 3);
        assert_eq!(identity.to_dense(), Array2::<f64>::eye(3));
    }

    #[test]
    fn continuum_projection_removes_mean_and_slope() {
        let loglam = [3.56, 3.561, 3.562, 3.5635, 3.565];
        let weight = [1.0, 2.0, 0.5, 1.5, 3.0];
        let low_rank = continuum_projection(&loglam, &weight);
        assert_eq!(low_rank.rank(), 2);
        let proj = low_rank.to_dense();

        // a field that is a pure mean + slope in loglam gets projected to 0
        let field: Vec<f64> = loglam.iter().map(|l| 0.3 + 50.0 * (l - 3.56)).collect();
        for i in 0..loglam.len() {
            let projected: f64 = (0..loglam.len()).map(|k| proj[[i, k]] * field[k]).sum();
            assert!(projected.abs() < 1e-12, "pixel {i}: {projected}");
        }

        // the operator is idempotent
        let squared = proj.dot(&proj);
        for (a, b) in squared.iter().zip(proj.iter()) {
            assert!((a - b).abs() < 1e-12);
        }

        // compare against the explicit formula
        let sum_w: f64 = weight.iter().sum();
        let mean: f64 = loglam
            .iter()
            .zip(weight.iter())
            .map(|(l, w)| l * w)
            .sum::<f64>()
            / sum_w;
        let sum_wdl2: f64 = loglam
            .iter()
            .zip(weight.iter())
            .map(|(l, w)| w * (l - mean) * (l - mean))
            .sum();
        for i in 0..5 {
            for k in 0..5 {
                let delta = if i == k { 1.0 } else { 0.0 };
                let expected = delta
                    - weight[k] / sum_w
                    - (loglam[i] - mean) * weight[k] * (loglam[k] - mean) / sum_wdl2;
                assert!((proj[[i, k]] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn continuum_projection_degenerate() {
        // single pixel: only the mean is removed
        let proj = continuum_projection(&[3.6], &[2.0]);
        assert_eq!(proj.rank(), 1);
        assert_eq!(proj.to_dense()[[0, 0]], 0.0);

        // no weight: identity
        let proj = continuum_projection(&[3.6, 3.61], &[0.0, 0.0]);
        assert_eq!(proj.rank(), 0);
        assert_eq!(proj.to_dense(), Array2::<f64>::eye(2));
    }

    #[test]
    fn views() {
        let low_rank = continuum_projection(&[3.6, 3.61, 3.63], &[1.0, 2.0, 1.0]);
        let owned = Projection::LowRank(low_rank.clone());
        assert_eq!(owned.n_pixels(), 3);
        assert_eq!(owned.view().to_dense(3).to_owned(), low_rank.to_dense());

        let dense = Projection::Dense(Array2::from_elem((2, 2), 0.5));
        assert_eq!(dense.view().to_dense(2).to_owned(), dense.to_dense());
        assert!(ProjectionView::Identity.is_identity());
        assert_eq!(
            ProjectionView::Identity.to_dense(2).to_owned(),
            Array2::<f64>::eye(2)
        );
    }
}
