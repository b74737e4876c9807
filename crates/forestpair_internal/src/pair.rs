use crate::bins::SeparationGrid;
use crate::projection::ProjectionView;
use ndarray::ArrayView2;

/// Collection of per-pixel forest properties.
///
/// This is a lightweight view: the owning type lives in the public crate.
/// We place the following constraints on the contained data:
/// - every slice holds one entry per spectral pixel (`n_pixels` entries)
/// - the projection operator acts on `n_pixels` pixels. Its `[i, k]` element
///   describes how much the true field at pixel `k` leaks into the measured
///   (projected) field at pixel `i`.
#[derive(Clone)]
pub struct ForestView<'a> {
    loglam: &'a [f64],
    r_comov: &'a [f64],
    weights: &'a [f64],
    projection: ProjectionView<'a>,
}

impl<'a> ForestView<'a> {
    /// create a new instance with a dense projection operator (`None` is the
    /// identity)
    pub fn new(
        loglam: &'a [f64],
        r_comov: &'a [f64],
        weights: &'a [f64],
        projection: Option<ArrayView2<'a, f64>>,
    ) -> Result<ForestView<'a>, &'static str> {
        let projection = projection.map_or(ProjectionView::Identity, ProjectionView::Dense);
        Self::with_projection(loglam, r_comov, weights, projection)
    }

    pub fn with_projection(
        loglam: &'a [f64],
        r_comov: &'a [f64],
        weights: &'a [f64],
        projection: ProjectionView<'a>,
    ) -> Result<ForestView<'a>, &'static str> {
        let n_pixels = loglam.len();
        let projection_ok = match projection {
            ProjectionView::Identity => true,
            ProjectionView::Dense(matrix) => matrix.shape() == [n_pixels, n_pixels],
            ProjectionView::LowRank(low_rank) => low_rank.n_pixels() == n_pixels,
        };
        if n_pixels == 0 {
            Err("a forest must hold at least 1 pixel")
        } else if r_comov.len() != n_pixels {
            Err("r_comov must have the same number of pixels as loglam")
        } else if weights.len() != n_pixels {
            Err("weights must have the same number of pixels as loglam")
        } else if !projection_ok {
            Err("the projection operator must act on n_pixels pixels")
        } else {
            Ok(Self {
                loglam,
                r_comov,
                weights,
                projection,
            })
        }
    }

    pub fn n_pixels(&self) -> usize {
        self.loglam.len()
    }

    pub fn loglam(&self) -> &'a [f64] {
        self.loglam
    }

    pub fn r_comov(&self) -> &'a [f64] {
        self.r_comov
    }

    pub fn weights(&self) -> &'a [f64] {
        self.weights
    }

    pub fn projection(&self) -> ProjectionView<'a> {
        self.projection
    }
}

/// Specifies how the 2 forests of a pair relate to each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairKind {
    /// both forests come from the same sample; `rp` is unsigned
    Auto,
    /// the first forest comes from sample 1 and the second from sample 2.
    /// `rp = r_1 - r_2` is signed: positive values mean that the sample-1
    /// pixel lies farther away than the sample-2 pixel.
    Cross,
}

/// Maps pixel-pairs taken from 2 forests onto a [`SeparationGrid`]
#[derive(Clone)]
pub struct PairBinner<'a> {
    grid: &'a SeparationGrid,
    kind: PairKind,
    reject_same_wavelength: bool,
}

impl<'a> PairBinner<'a> {
    pub fn new(grid: &'a SeparationGrid, kind: PairKind, reject_same_wavelength: bool) -> Self {
        Self {
            grid,
            kind,
            reject_same_wavelength,
        }
    }

    pub fn grid(&self) -> &'a SeparationGrid {
        self.grid
    }

    pub fn kind(&self) -> PairKind {
        self.kind
    }

    /// Bin index for a single pixel pair (or `None` if it is rejected).
    ///
    /// `angle` is the angular separation (in radians) between the lines of
    /// sight of `forest_a` and `forest_b`.
    pub fn pixel_pair_bin(
        &self,
        forest_a: &ForestView,
        i: usize,
        forest_b: &ForestView,
        j: usize,
        angle: f64,
    ) -> Option<usize> {
        if self.reject_same_wavelength && forest_a.loglam[i] == forest_b.loglam[j] {
            return None;
        }
        let (r_a, r_b) = (forest_a.r_comov[i], forest_b.r_comov[j]);
        let rp = match self.kind {
            PairKind::Auto => (r_a - r_b).abs(),
            PairKind::Cross => r_a - r_b,
        };
        let rt = (r_a + r_b) * (0.5 * angle).sin();
        self.grid.bin_index(rp, rt)
    }

    /// Bins every pixel pair of `forest_a` & `forest_b`.
    ///
    /// After this call, `bin_table[i * n_b + j]` holds the bin of the pair
    /// made from pixel `i` of `forest_a` and pixel `j` of `forest_b` (where
    /// `n_b` is the number of pixels in `forest_b`). The return value is the
    /// number of accepted pixel pairs.
    pub fn fill_bin_table(
        &self,
        forest_a: &ForestView,
        forest_b: &ForestView,
        angle: f64,
        bin_table: &mut Vec<Option<usize>>,
    ) -> usize {
        bin_table.clear();
        bin_table.reserve(forest_a.n_pixels() * forest_b.n_pixels());

        let sin_half_angle = (0.5 * angle).sin();
        match (self.kind, self.reject_same_wavelength) {
            (PairKind::Auto, false) => fill_bin_table_helper::<false, false>(
                self.grid,
                forest_a,
                forest_b,
                sin_half_angle,
                bin_table,
            ),
            (PairKind::Auto, true) => fill_bin_table_helper::<false, true>(
                self.grid,
                forest_a,
                forest_b,
                sin_half_angle,
                bin_table,
            ),
            (PairKind::Cross, false) => fill_bin_table_helper::<true, false>(
                self.grid,
                forest_a,
                forest_b,
                sin_half_angle,
                bin_table,
            ),
            (PairKind::Cross, true) => fill_bin_table_helper::<true, true>(
                self.grid,
                forest_a,
                forest_b,
                sin_half_angle,
                bin_table,
            ),
        }
    }
}

fn fill_bin_table_helper<const SIGNED_RP: bool, const REJECT_SAME: bool>(
    grid: &SeparationGrid,
    forest_a: &ForestView,
    forest_b: &ForestView,
    sin_half_angle: f64,
    bin_table: &mut Vec<Option<usize>>,
) -> usize {
    let mut n_accepted = 0;
    for i in 0..forest_a.n_pixels() {
        let r_a = forest_a.r_comov[i];
        let loglam_a = forest_a.loglam[i];
        for j in 0..forest_b.n_pixels() {
            let r_b = forest_b.r_comov[j];
            let bin = if REJECT_SAME && loglam_a == forest_b.loglam[j] {
                None
            } else {
                let rp = if SIGNED_RP { r_a - r_b } else { (r_a - r_b).abs() };
                let rt = (r_a + r_b) * sin_half_angle;
                grid.bin_index(rp, rt)
            };
            n_accepted += bin.is_some() as usize;
            bin_table.push(bin);
        }
    }
    n_accepted
}
