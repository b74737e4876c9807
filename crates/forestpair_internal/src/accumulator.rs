//! Define the machinery that turns a single pair of forests into contributions
//! to the distortion matrix.
//!
//! # Background
//!
//! The measured field in a forest is not the true field: fitting the quasar
//! continuum removes some modes. We describe this with a projection operator
//! `P`, so that the measured field at pixel `i` is `δ̂ᵢ = Σₖ P[i,k] δₖ`. The
//! measured correlation in bin `A` is the weighted average of `δ̂ᵢ δ̂ⱼ` over
//! the pixel pairs `(i,j)` in `A`. Taking the expectation value gives
//!
//! ```text
//! ξ̂(A) = Σ_B DM[A,B] ξ(B)
//! DM[A,B] = (1/W_A) Σ_{(i,j)∈A} wᵢ wⱼ Σ_{(k,l)∈B} P₁[i,k] P₂[j,l]
//! ```
//!
//! where `(k,l) ∈ B` means that the pixel pair `(k,l)` (before projection)
//! lands in bin `B`. The [`DistortionAccumulator`] computes the un-normalized
//! sums (and `W_A`) for one forest pair at a time.
//!
//! # Implementation Notes
//!
//! Directly evaluating the double sum costs `O(n₁² n₂²)` per forest pair.
//!
//! When neither forest has a projection operator, every contribution lands on
//! the diagonal. We special-case this.
//!
//! The operators built from a continuum fit have the form
//! `P[i,k] = δᵢₖ - Σᵣ xᵣ[i] yᵣ[k]` (see [`crate::LowRankProjection`]). Expanding
//! the products of the 2 operators gives 4 terms:
//! 1. the diagonal term from above,
//! 2. a term coupling the pixel pairs that share the pixel of the second
//!    forest: `Σ_l Σᵣ αᵣ[A,l] Yᵣ[B,l]`, where `αᵣ[A,l]` sums `wᵢ w_l xᵣ[i]`
//!    over the pairs `(i,l)` in `A` and `Yᵣ[B,l]` sums `yᵣ[k]` over the pairs
//!    `(k,l)` in `B`,
//! 3. the mirror image of the second term (pixel pairs that share the pixel
//!    of the first forest),
//! 4. a term that factorizes completely: `Σᵣₛ γᵣₛ[A] Γᵣₛ[B]`.
//!
//! Each of these costs a single pass over the accepted pixel pairs followed
//! by a scatter over pairs of bins hit along a common pixel.
//!
//! Any other operator is handled densely: we group the accepted pixel pairs
//! by their bin `A`, build the weight matrix `D_A[i,j] = wᵢ wⱼ [(i,j)∈A]` and
//! evaluate `M_A = P₁ᵀ D_A P₂` with 2 matrix products. `M_A[k,l]` is then
//! scattered into row `A` at the column given by the bin of `(k,l)`.

use crate::pair::{ForestView, PairBinner};
use crate::projection::ProjectionView;
use crate::state::AccumulationMatrix;
use ndarray::{Array2, CowArray, Ix2};

/// Accumulates the contributions of forest pairs.
///
/// An instance holds some scratch buffers, so you probably want one instance
/// per worker (the instance is cheap to construct, but reusing it avoids a
/// lot of allocations).
pub struct DistortionAccumulator<'a> {
    binner: PairBinner<'a>,
    bin_table: Vec<Option<usize>>,
    // (bin, flattened pixel-pair index) of every accepted pixel pair
    accepted: Vec<(usize, usize)>,
    lines: LineScratch,
}

impl<'a> DistortionAccumulator<'a> {
    pub fn new(binner: PairBinner<'a>) -> Self {
        Self {
            binner,
            bin_table: Vec::new(),
            accepted: Vec::new(),
            lines: LineScratch::default(),
        }
    }

    pub fn n_bins(&self) -> usize {
        self.binner.grid().n_bins()
    }

    pub fn binner(&self) -> &PairBinner<'a> {
        &self.binner
    }

    /// Adds the contribution of the pair formed by `forest_a` & `forest_b`
    /// to `accum`.
    ///
    /// `angle` is the angular separation between the 2 lines of sight. This
    /// does **NOT** update the pair counters of `accum` (the caller is
    /// responsible for that since it knows about subsampling). Returns
    /// whether the pair contributed anything (i.e. whether at least 1 pixel
    /// pair was accepted).
    pub fn add_pair(
        &mut self,
        accum: &mut AccumulationMatrix,
        forest_a: &ForestView,
        forest_b: &ForestView,
        angle: f64,
    ) -> Result<bool, &'static str> {
        if accum.n_bins() != self.n_bins() {
            return Err("accum has the wrong number of bins");
        }

        let n_accepted = self
            .binner
            .fill_bin_table(forest_a, forest_b, angle, &mut self.bin_table);
        if n_accepted == 0 {
            return Ok(false);
        }

        let n_b = forest_b.n_pixels();
        let (w_a, w_b) = (forest_a.weights(), forest_b.weights());

        self.accepted.clear();
        for (idx, bin) in self.bin_table.iter().enumerate() {
            if let Some(bin) = *bin {
                self.accepted.push((bin, idx));
                accum.add_weight(bin, w_a[idx / n_b] * w_b[idx % n_b]);
            }
        }

        let (proj_a, proj_b) = (forest_a.projection(), forest_b.projection());
        if proj_a.is_identity() && proj_b.is_identity() {
            self.add_diagonal(accum, forest_a, forest_b);
        } else if let (Some(factors_a), Some(factors_b)) = (
            LowRankFactors::new(proj_a, forest_a.n_pixels()),
            LowRankFactors::new(proj_b, n_b),
        ) {
            self.add_low_rank(accum, forest_a, forest_b, &factors_a, &factors_b);
        } else {
            self.add_dense(accum, forest_a, forest_b);
        }
        Ok(true)
    }

    fn add_diagonal(
        &self,
        accum: &mut AccumulationMatrix,
        forest_a: &ForestView,
        forest_b: &ForestView,
    ) {
        let n_b = forest_b.n_pixels();
        let (w_a, w_b) = (forest_a.weights(), forest_b.weights());
        for &(bin, idx) in self.accepted.iter() {
            accum.add_matrix(bin, bin, w_a[idx / n_b] * w_b[idx % n_b]);
        }
    }

    fn add_low_rank(
        &mut self,
        accum: &mut AccumulationMatrix,
        forest_a: &ForestView,
        forest_b: &ForestView,
        factors_a: &LowRankFactors,
        factors_b: &LowRankFactors,
    ) {
        let n_b = forest_b.n_pixels();
        let (w_a, w_b) = (forest_a.weights(), forest_b.weights());
        let (x_a, y_a) = (&factors_a.left, &factors_a.right);
        let (x_b, y_b) = (&factors_b.left, &factors_b.right);
        let (rank_a, rank_b) = (x_a.nrows(), x_b.nrows());

        self.add_diagonal(accum, forest_a, forest_b);

        // pixel pairs sharing the pixel of forest_b
        self.lines.keyed.clear();
        let keyed = self.accepted.iter().map(|&(bin, idx)| (idx % n_b, bin, idx));
        self.lines.keyed.extend(keyed);
        self.lines.scatter(accum, -1.0, rank_a, |idx, row, col| {
            let (k, l) = (idx / n_b, idx % n_b);
            let w = w_a[k] * w_b[l];
            for r in 0..rank_a {
                row[r] += w * x_a[[r, k]];
                col[r] += y_a[[r, k]];
            }
        });

        // pixel pairs sharing the pixel of forest_a
        self.lines.keyed.clear();
        let keyed = self.accepted.iter().map(|&(bin, idx)| (idx / n_b, bin, idx));
        self.lines.keyed.extend(keyed);
        self.lines.scatter(accum, -1.0, rank_b, |idx, row, col| {
            let (k, l) = (idx / n_b, idx % n_b);
            let w = w_a[k] * w_b[l];
            for s in 0..rank_b {
                row[s] += w * x_b[[s, l]];
                col[s] += y_b[[s, l]];
            }
        });

        // the fully separable term couples every pair of bins
        self.lines.keyed.clear();
        let keyed = self.accepted.iter().map(|&(bin, idx)| (0, bin, idx));
        self.lines.keyed.extend(keyed);
        self.lines.scatter(accum, 1.0, rank_a * rank_b, |idx, row, col| {
            let (k, l) = (idx / n_b, idx % n_b);
            let w = w_a[k] * w_b[l];
            for r in 0..rank_a {
                for s in 0..rank_b {
                    row[r * rank_b + s] += w * x_a[[r, k]] * x_b[[s, l]];
                    col[r * rank_b + s] += y_a[[r, k]] * y_b[[s, l]];
                }
            }
        });
    }

    fn add_dense(
        &mut self,
        accum: &mut AccumulationMatrix,
        forest_a: &ForestView,
        forest_b: &ForestView,
    ) {
        let (n_a, n_b) = (forest_a.n_pixels(), forest_b.n_pixels());
        let (w_a, w_b) = (forest_a.weights(), forest_b.weights());
        let proj_a = forest_a.projection().to_dense(n_a);
        let proj_b = forest_b.projection().to_dense(n_b);

        // sorting by bin lets us visit each distinct bin exactly once
        self.accepted.sort_unstable();

        let mut weight_matrix = Array2::<f64>::zeros((n_a, n_b));
        for chunk in self.accepted.chunk_by(|lhs, rhs| lhs.0 == rhs.0) {
            let row = chunk[0].0;
            for &(_, idx) in chunk {
                let (i, j) = (idx / n_b, idx % n_b);
                weight_matrix[[i, j]] = w_a[i] * w_b[j];
            }

            let leaked = proj_a.t().dot(&weight_matrix).dot(&proj_b);

            for (idx, bin) in self.bin_table.iter().enumerate() {
                if let Some(col) = *bin {
                    accum.add_matrix(row, col, leaked[[idx / n_b, idx % n_b]]);
                }
            }

            // reset the scratch matrix for the next bin
            for &(_, idx) in chunk {
                weight_matrix[[idx / n_b, idx % n_b]] = 0.0;
            }
        }
    }
}

// the factors of an identity-minus-low-rank operator (the identity has rank 0)
struct LowRankFactors<'b> {
    left: CowArray<'b, f64, Ix2>,
    right: CowArray<'b, f64, Ix2>,
}

impl<'b> LowRankFactors<'b> {
    fn new(projection: ProjectionView<'b>, n_pixels: usize) -> Option<Self> {
        match projection {
            ProjectionView::Identity => Some(LowRankFactors {
                left: CowArray::from(Array2::zeros((0, n_pixels))),
                right: CowArray::from(Array2::zeros((0, n_pixels))),
            }),
            ProjectionView::LowRank(low_rank) => Some(LowRankFactors {
                left: CowArray::from(low_rank.left()),
                right: CowArray::from(low_rank.right()),
            }),
            ProjectionView::Dense(_) => None,
        }
    }
}

#[derive(Default)]
struct LineScratch {
    // (line, bin, flattened pixel-pair index)
    keyed: Vec<(usize, usize, usize)>,
    bins: Vec<usize>,
    row: Vec<f64>,
    col: Vec<f64>,
}

impl LineScratch {
    /// For every line (pixel pairs sharing the first entry of `keyed`) and
    /// every pair of bins `(A, B)` hit along that line, adds
    /// `sign · Σₜ row[A][t] col[B][t]` to `accum[A, B]`.
    ///
    /// `coefficients(idx, row, col)` adds the `n_terms` coefficients of the
    /// pixel pair `idx` to the sums of its bin.
    fn scatter(
        &mut self,
        accum: &mut AccumulationMatrix,
        sign: f64,
        n_terms: usize,
        coefficients: impl Fn(usize, &mut [f64], &mut [f64]),
    ) {
        if n_terms == 0 {
            return;
        }
        self.keyed.sort_unstable();
        for line in self.keyed.chunk_by(|lhs, rhs| lhs.0 == rhs.0) {
            self.bins.clear();
            self.row.clear();
            self.col.clear();
            for &(_, bin, idx) in line {
                if self.bins.last() != Some(&bin) {
                    self.bins.push(bin);
                    self.row.resize(self.row.len() + n_terms, 0.0);
                    self.col.resize(self.col.len() + n_terms, 0.0);
                }
                let start = self.row.len() - n_terms;
                coefficients(idx, &mut self.row[start..], &mut self.col[start..]);
            }

            for (row, bin_a) in self.row.chunks_exact(n_terms).zip(self.bins.iter()) {
                for (col, bin_b) in self.col.chunks_exact(n_terms).zip(self.bins.iter()) {
                    let value: f64 = row.iter().zip(col.iter()).map(|(r, c)| r * c).sum();
                    accum.add_matrix(*bin_a, *bin_b, sign * value);
                }
            }
        }
    }
}
