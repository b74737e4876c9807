//! Assigns forests to sky pixels.

use crate::Error;
use crate::cosmo::Cosmology;
use crate::forest::{DerivationParams, Forest, Spectrum};
use crate::pixelization::{PixelId, Pixelization};
use forestpair_internal::PairKind;
use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::Arc;

/// Forests of one sample, grouped by sky pixel.
///
/// Pixels are stored in ascending order. An instance is never modified after
/// it is built, so it can be freely shared between workers.
#[derive(Clone, Debug)]
pub struct PixelBuckets {
    buckets: BTreeMap<PixelId, Vec<Forest>>,
    n_forests: usize,
    r_min: f64,
}

impl PixelBuckets {
    /// Derive a forest from every spectrum and assign it to a pixel.
    ///
    /// When `max_spectra` is specified, only the first `max_spectra` spectra
    /// are used.
    pub fn build<I>(
        spectra: I,
        max_spectra: Option<usize>,
        params: &DerivationParams,
        cosmo: &impl Cosmology,
        pixelization: &impl Pixelization,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Arc<Spectrum>>,
    {
        let mut buckets: BTreeMap<PixelId, Vec<Forest>> = BTreeMap::new();
        let mut n_forests = 0;
        let mut r_min = f64::INFINITY;
        for spectrum in spectra.into_iter().take(max_spectra.unwrap_or(usize::MAX)) {
            let pixel = pixelization.ang2pix(FRAC_PI_2 - spectrum.dec(), spectrum.ra())?;
            let forest = Forest::derive(spectrum, params, cosmo)?;
            r_min = r_min.min(forest.r_min());
            buckets.entry(pixel).or_default().push(forest);
            n_forests += 1;
        }
        tracing::info!(
            n_forests,
            n_pixels = buckets.len(),
            r_min,
            "assigned forests to sky pixels"
        );
        Ok(Self {
            buckets,
            n_forests,
            r_min,
        })
    }

    /// The forests in `pixel` (empty if the pixel holds nothing)
    pub fn get(&self, pixel: PixelId) -> &[Forest] {
        self.buckets.get(&pixel).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Iterate over the non-empty pixels in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (PixelId, &[Forest])> {
        self.buckets.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// the non-empty pixel ids in ascending order
    pub fn pixel_ids(&self) -> Vec<PixelId> {
        self.buckets.keys().copied().collect()
    }

    pub fn n_pixels(&self) -> usize {
        self.buckets.len()
    }

    pub fn n_forests(&self) -> usize {
        self.n_forests
    }

    /// Smallest comoving distance of any spectral pixel in the sample
    /// (`+∞` for an empty sample)
    pub fn r_min(&self) -> f64 {
        self.r_min
    }
}

/// The sample(s) entering a correlation
#[derive(Clone, Debug)]
pub enum Samples {
    /// a sample is correlated with itself
    Auto(PixelBuckets),
    /// 2 different samples (or 1 set of spectra under 2 absorbers) are
    /// correlated
    Cross(PixelBuckets, PixelBuckets),
}

impl Samples {
    pub fn kind(&self) -> PairKind {
        match self {
            Samples::Auto(_) => PairKind::Auto,
            Samples::Cross(_, _) => PairKind::Cross,
        }
    }

    pub fn first(&self) -> &PixelBuckets {
        match self {
            Samples::Auto(first) | Samples::Cross(first, _) => first,
        }
    }

    /// For an auto-correlation, this is the same as [`Samples::first`]
    pub fn second(&self) -> &PixelBuckets {
        match self {
            Samples::Auto(first) => first,
            Samples::Cross(_, second) => second,
        }
    }

    /// The largest angle between 2 lines of sight that can produce a pixel
    /// pair with `rt < rt_max`.
    pub fn angmax(&self, rt_max: f64) -> f64 {
        angmax(rt_max, self.first().r_min() + self.second().r_min())
    }
}

/// `2·asin(rt_max / r_sum)`, where `r_sum` is the smallest possible sum of
/// the comoving distances of the 2 pixels of a pair.
///
/// If no such angle exists (the argument of `asin` is at least 1), this is `π`.
pub fn angmax(rt_max: f64, r_sum: f64) -> f64 {
    let arg = rt_max / r_sum;
    if arg.is_nan() || arg < 0.0 || arg >= 1.0 {
        PI
    } else {
        2.0 * arg.asin()
    }
}
