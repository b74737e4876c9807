//! Core numerical machinery for computing distortion matrices.
//!
//! This crate deliberately knows nothing about the sky pixelization, about
//! cosmology, or about how work is distributed among threads. It operates on
//! a single pair of forests at a time. The public `forestpair` crate wraps
//! this functionality.
//!
//! Unlike the public crate, errors are currently reported as
//! `&'static str`. The public crate wraps them.
mod accumulator;
mod bins;
mod misc;
mod pair;
mod projection;
mod state;

pub use accumulator::DistortionAccumulator;
pub use bins::{BinEdges, RegularBinEdges, SeparationGrid};
pub use misc::{angular_separation, dot_product, mean_direction, unit_vector};
pub use pair::{ForestView, PairBinner, PairKind};
pub use projection::{LowRankProjection, Projection, ProjectionView, continuum_projection};
pub use state::{AccumulationMatrix, DistortionMatrix};
