//! Implements types to represent "bin edges" and the 2D separation grid used to
//! bin pixel-pairs. The [`BinEdges`] trait provides a common interface that is
//! implemented by [`RegularBinEdges`]. [`SeparationGrid`] composes 2 instances
//! of [`RegularBinEdges`] (one along the line of sight, one transverse to it).

/// Super simple. This can be expanded as needed.
pub trait BinEdges {
    /// Calculate the bin index for a given value. Values which are equal to
    /// boundary values are considered part of the higher bin, i.e. intervals
    /// do not include the right edge.
    fn bin_index(&self, value: f64) -> Option<usize>;

    fn n_bins(&self) -> usize;
}

/// Regular bins with uniform spacing
#[derive(Clone, Debug, PartialEq)]
pub struct RegularBinEdges {
    min: f64,
    max: f64,
    n_bins: usize,
}

impl RegularBinEdges {
    /// Note that we initialize with num_bins rather than bin_size
    pub fn new(min: f64, max: f64, n_bins: usize) -> Result<Self, &'static str> {
        if n_bins == 0 {
            Err("Number of bins must be greater than zero")
        } else if !min.is_finite() || !max.is_finite() {
            Err("Min and max values must be finite")
        } else if max <= min {
            Err("Maximum value must be greater than minimum value")
        } else {
            Ok(Self { min, max, n_bins })
        }
    }

    pub fn leftmost_edge(&self) -> f64 {
        self.min
    }

    pub fn rightmost_edge(&self) -> f64 {
        self.max
    }
}

impl BinEdges for RegularBinEdges {
    fn bin_index(&self, value: f64) -> Option<usize> {
        // written so that NaN fails both comparisons and is rejected
        if !(value >= self.min && value < self.max) {
            return None;
        }

        // we scale by the full width (rather than dividing by a precomputed
        // bin_size) so that a value sitting on an interior edge lands in the
        // same bin as the original tools put it.
        //
        // this cast handles the truncation
        let index = ((value - self.min) / (self.max - self.min) * self.n_bins as f64) as usize;

        // guard against round-off pushing values just below max into a
        // nonexistent bin
        Some(index.min(self.n_bins - 1))
    }

    fn n_bins(&self) -> usize {
        self.n_bins
    }
}

/// The global 2D binning used throughout a distortion-matrix calculation.
///
/// There are `n_p` bins in `rp` (the separation parallel to the line of sight)
/// over `[rp_min, rp_max)` and `n_t` bins in `rt` (the transverse separation)
/// over `[0, rt_max)`. The flattened index is `i_p * n_t + i_t`, which means
/// that `rt` varies fastest.
#[derive(Clone, Debug, PartialEq)]
pub struct SeparationGrid {
    rp_edges: RegularBinEdges,
    rt_edges: RegularBinEdges,
}

impl SeparationGrid {
    pub fn new(
        rp_min: f64,
        rp_max: f64,
        rt_max: f64,
        n_p: usize,
        n_t: usize,
    ) -> Result<Self, &'static str> {
        let rp_edges = RegularBinEdges::new(rp_min, rp_max, n_p)?;
        let rt_edges = RegularBinEdges::new(0.0, rt_max, n_t)?;
        Ok(Self { rp_edges, rt_edges })
    }

    pub fn rp_min(&self) -> f64 {
        self.rp_edges.leftmost_edge()
    }

    pub fn rp_max(&self) -> f64 {
        self.rp_edges.rightmost_edge()
    }

    pub fn rt_max(&self) -> f64 {
        self.rt_edges.rightmost_edge()
    }

    pub fn n_p(&self) -> usize {
        self.rp_edges.n_bins()
    }

    pub fn n_t(&self) -> usize {
        self.rt_edges.n_bins()
    }

    /// total number of bins
    pub fn n_bins(&self) -> usize {
        self.n_p() * self.n_t()
    }

    /// map a separation to a flattened bin index (or `None` when it falls
    /// outside of the grid)
    #[inline]
    pub fn bin_index(&self, rp: f64, rt: f64) -> Option<usize> {
        let i_p = self.rp_edges.bin_index(rp)?;
        let i_t = self.rt_edges.bin_index(rt)?;
        Some(i_p * self.n_t() + i_t)
    }

    /// inverse of the flattening performed by [`Self::bin_index`]
    pub fn unflatten(&self, bin: usize) -> (usize, usize) {
        (bin / self.n_t(), bin % self.n_t())
    }
}
