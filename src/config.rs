//! Run configuration.
//!
//! Everything is gathered into immutable structs that are validated once,
//! before any expensive work starts, and then shared by reference with every
//! worker.

use crate::Error;
use crate::cosmo::absorber_wavelength;
use crate::pixelization::{Healpix, PixelScheme};
use forestpair_internal::SeparationGrid;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Configuration of a distortion-matrix calculation.
///
/// The defaults match the conventional Lyman-α forest setup. Use
/// [`DmatConfig::from_json_str`] to parse (and validate) a configuration; any
/// field that is omitted takes its default value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DmatConfig {
    /// lower edge of the parallel separation (`h⁻¹ Mpc`)
    pub rp_min: f64,
    /// upper edge of the parallel separation (`h⁻¹ Mpc`)
    pub rp_max: f64,
    /// upper edge of the transverse separation (`h⁻¹ Mpc`)
    pub rt_max: f64,
    /// number of parallel separation bins
    pub n_p: usize,
    /// number of transverse separation bins
    pub n_t: usize,
    /// HEALPix resolution used for the spatial index
    pub nside: u32,
    pub scheme: PixelScheme,
    /// reference redshift of the weight evolution
    pub z_ref: f64,
    /// redshift-evolution exponent of the first sample
    pub z_evol: f64,
    /// redshift-evolution exponent of the second sample
    pub z_evol2: f64,
    /// fraction of forest pairs that are kept (the rest are discarded at
    /// random to speed up the calculation)
    pub rej: f64,
    /// use the identity instead of the continuum-fit projection
    pub no_project: bool,
    /// reject pixel pairs whose pixels share the same wavelength
    pub no_same_wavelength_pairs: bool,
    /// `None` means half of the available parallelism (at least 1)
    pub n_workers: Option<usize>,
    /// only use the first `max_spectra` spectra of each sample
    pub max_spectra: Option<usize>,
    /// name of the absorber of the first sample
    pub lambda_abs: String,
    /// name of the absorber of the second sample (defaults to `lambda_abs`)
    pub lambda_abs2: Option<String>,
    /// `Ω_m` of the fiducial (flat) cosmology
    pub fid_om: f64,
    /// base seed of the subsampling streams
    pub seed: u64,
}

impl Default for DmatConfig {
    fn default() -> Self {
        DmatConfig {
            rp_min: 0.0,
            rp_max: 200.0,
            rt_max: 200.0,
            n_p: 50,
            n_t: 50,
            nside: 8,
            scheme: PixelScheme::Ring,
            z_ref: 2.25,
            z_evol: 2.9,
            z_evol2: 2.9,
            rej: 1.0,
            no_project: false,
            no_same_wavelength_pairs: false,
            n_workers: None,
            max_spectra: None,
            lambda_abs: String::from("LYA"),
            lambda_abs2: None,
            fid_om: 0.315,
            seed: 0,
        }
    }
}

impl DmatConfig {
    /// Parse a JSON configuration & validate it
    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        let config: DmatConfig =
            serde_json::from_str(s).map_err(|e| Error::config_parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field.
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.rp_min.is_finite() && self.rp_max.is_finite() && self.rp_min < self.rp_max) {
            return Err(Error::config_value(
                "rp_max",
                format!(
                    "rp_min ({}) & rp_max ({}) must be finite with rp_min < rp_max",
                    self.rp_min, self.rp_max
                ),
            ));
        }
        if !(self.rt_max.is_finite() && self.rt_max > 0.0) {
            return Err(Error::config_value(
                "rt_max",
                format!("{} must be finite and positive", self.rt_max),
            ));
        }
        if self.n_p == 0 {
            return Err(Error::config_value("n_p", String::from("must be positive")));
        }
        if self.n_t == 0 {
            return Err(Error::config_value("n_t", String::from("must be positive")));
        }
        Healpix::new(self.nside, self.scheme)?;
        if !(self.z_ref.is_finite() && self.z_ref > -1.0) {
            return Err(Error::config_value(
                "z_ref",
                format!("{} must be finite and exceed -1", self.z_ref),
            ));
        }
        for (name, value) in [("z_evol", self.z_evol), ("z_evol2", self.z_evol2)] {
            if !value.is_finite() {
                return Err(Error::config_value(name, format!("{value} isn't finite")));
            }
        }
        if !(self.rej > 0.0 && self.rej <= 1.0) {
            return Err(Error::config_value(
                "rej",
                format!("{} doesn't lie in the interval (0, 1]", self.rej),
            ));
        }
        if self.n_workers == Some(0) {
            return Err(Error::config_value(
                "n_workers",
                String::from("must be positive"),
            ));
        }
        if self.max_spectra == Some(0) {
            return Err(Error::config_value(
                "max_spectra",
                String::from("must be positive"),
            ));
        }
        absorber_wavelength(&self.lambda_abs)?;
        if let Some(name) = self.lambda_abs2.as_ref() {
            absorber_wavelength(name)?;
        }
        if !(self.fid_om > 0.0 && self.fid_om <= 1.0) {
            return Err(Error::config_value(
                "fid_om",
                format!("{} doesn't lie in the interval (0, 1]", self.fid_om),
            ));
        }
        Ok(())
    }

    /// The absorber of the second sample
    pub fn lambda_abs2_name(&self) -> &str {
        self.lambda_abs2.as_deref().unwrap_or(&self.lambda_abs)
    }

    /// Resolve the number of workers.
    pub fn resolved_n_workers(&self) -> NonZeroUsize {
        let n = match self.n_workers {
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(|n| n.get() / 2)
                .unwrap_or(1),
        };
        NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn separation_grid(&self) -> Result<SeparationGrid, Error> {
        SeparationGrid::new(self.rp_min, self.rp_max, self.rt_max, self.n_p, self.n_t)
            .map_err(Error::internal_legacy_adhoc)
    }

    pub fn pixelization(&self) -> Result<Healpix, Error> {
        Healpix::new(self.nside, self.scheme)
    }
}

/// Selects how the covariance across subsamples is estimated
///
/// The default, [`CovarianceMethod::Subsample`], is **not** a jackknife: it
/// normalizes the weighted scatter of the subsamples by the product of the
/// total weights (the covariance of the weighted mean of independent pixels).
/// Select [`CovarianceMethod::Jackknife`] explicitly to get the weighted
/// delete-one estimate, which also requires at least 2 subsamples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceMethod {
    /// Treat each healpix pixel as an independent subsample (and normalize by
    /// the product of the total weights)
    #[default]
    Subsample,
    /// Weighted delete-one jackknife over the healpix pixels
    Jackknife,
}

/// Configuration of a cross-covariance calculation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CovConfig {
    pub method: CovarianceMethod,
}

impl CovConfig {
    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s).map_err(|e| Error::config_parse(e.to_string()))
    }
}
