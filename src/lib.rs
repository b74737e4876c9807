/*!
Computes distortion matrices of Lyman-α forest correlation functions and the
cross-covariance between correlation functions measured in healpix
subsamples.

<div class="warning">

This crate is still in early development. FITS I/O & command-line parsing are
left to the caller (the crate works with plain data types that can also be
(de)serialized with serde).

</div>

# High-Level: the Distortion Matrix

Measuring a correlation function from quasar absorption spectra requires
fitting the continuum of each quasar. The fit removes some modes of the
absorption field in each "forest", which distorts the measured correlation
function. To linear order, the distortion is described by a matrix `DM` such
that `ξ_measured(A) = Σ_B DM[A,B] ξ_true(B)`, where `A` & `B` are bins of
the `(r_parallel, r_transverse)` separation grid.

Computing `DM` involves the same work as a 2-point statistic, with a twist:
1. the spectra are assigned to sky pixels ([`PixelBuckets`]),
2. pairs of spectra within the angular budget are identified
   ([`NeighborFinder`]),
3. every pixel pair of every spectrum pair is binned ([`PairBinner`]),
4. each contribution is redistributed through the projection operators of
   both spectra ([`DistortionAccumulator`]),
5. the partial results of the workers are summed ([`Executor`]) and
   normalized ([`AccumulationMatrix::normalize`]).

[`compute_distortion_matrix`] drives the whole calculation.

# High-Level: the Cross-Covariance

[`cross_covariance`] aligns 2 [`CorrelationProduct`]s (padding pixels that
are missing from either one) and estimates the covariance of the
concatenated measurement across the healpix subsamples.

# Developer Guide

See the crate-level documentation for [`forestpair_internal`]. That crate
holds the numerical kernels; this crate wraps them with the spatial index,
the worker pool, configuration & error handling.

*/

#![deny(rustdoc::broken_intra_doc_links)]

// inform build-system of the modules in this package
mod config;
mod cosmo;
mod covariance;
mod dmat;
mod error;
mod executor;
mod forest;
mod neighbors;
mod pixelization;
mod spatial_index;

// pull in symbols that are visible outside of the package
pub use config::{CovConfig, CovarianceMethod, DmatConfig};
pub use cosmo::{ABSORBERS, Cosmology, FlatLcdm, absorber_wavelength};
pub use covariance::{
    CorrelationProduct, CrossCovariance, align, correlation_matrix, cross_covariance,
    is_positive_definite, jackknife_covariance, subsample_covariance,
};
pub use dmat::{
    DmatArtifact, DmatHeader, DmatResult, compute_distortion_matrix,
    compute_distortion_matrix_from_config,
};
pub use error::Error;
pub use executor::{
    Executor, GroupReduction, PoolExecutor, ProgressSender, SerialExecutor, round_robin,
    with_progress,
};
pub use forest::{DerivationParams, Forest, Spectrum};
pub use forestpair_internal::{
    AccumulationMatrix, BinEdges, DistortionAccumulator, DistortionMatrix, ForestView,
    LowRankProjection, PairBinner, PairKind, Projection, ProjectionView, RegularBinEdges,
    SeparationGrid, angular_separation, continuum_projection, unit_vector,
};
pub use neighbors::{Neighbor, NeighborFinder};
pub use pixelization::{Healpix, PixelId, PixelScheme, Pixelization};
pub use spatial_index::{PixelBuckets, Samples, angmax};
