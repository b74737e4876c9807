//! Top-level distortion-matrix calculation.

use crate::Error;
use crate::config::DmatConfig;
use crate::cosmo::{Cosmology, FlatLcdm, absorber_wavelength};
use crate::executor::{
    Executor, GroupReduction, PoolExecutor, ProgressSender, round_robin, with_progress,
};
use crate::forest::{DerivationParams, Spectrum};
use crate::neighbors::NeighborFinder;
use crate::pixelization::{PixelId, Pixelization};
use crate::spatial_index::{PixelBuckets, Samples};
use forestpair_internal::{
    AccumulationMatrix, DistortionAccumulator, DistortionMatrix, PairBinner, SeparationGrid,
};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metadata describing how a distortion matrix was computed.
///
/// The serialized keys follow the conventional header keywords.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DmatHeader {
    #[serde(rename = "REJ")]
    pub rej: f64,
    #[serde(rename = "RPMIN")]
    pub rp_min: f64,
    #[serde(rename = "RPMAX")]
    pub rp_max: f64,
    #[serde(rename = "RTMAX")]
    pub rt_max: f64,
    #[serde(rename = "NT")]
    pub n_t: usize,
    #[serde(rename = "NP")]
    pub n_p: usize,
    /// number of forest pairs that were considered
    #[serde(rename = "NPROR")]
    pub n_pairs: u64,
    /// number of forest pairs that contributed
    #[serde(rename = "NPUSED")]
    pub n_pairs_used: u64,
}

/// The serializable form of a [`DmatResult`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DmatArtifact {
    #[serde(flatten)]
    pub header: DmatHeader,
    #[serde(rename = "WDM")]
    pub wdm: Array1<f64>,
    #[serde(rename = "DM")]
    pub dm: Array2<f64>,
}

/// The distortion matrix together with its header
#[derive(Clone, Debug)]
pub struct DmatResult {
    header: DmatHeader,
    dmat: DistortionMatrix,
}

impl DmatResult {
    pub fn header(&self) -> &DmatHeader {
        &self.header
    }

    pub fn dmat(&self) -> &DistortionMatrix {
        &self.dmat
    }

    pub fn into_parts(self) -> (DmatHeader, DistortionMatrix) {
        (self.header, self.dmat)
    }

    pub fn to_artifact(&self) -> DmatArtifact {
        DmatArtifact {
            header: self.header.clone(),
            wdm: self.dmat.weights().to_owned(),
            dm: self.dmat.matrix().to_owned(),
        }
    }
}

// the per-group work of the distortion-matrix calculation
struct DistortionReduction<'a> {
    finder: &'a NeighborFinder<'a>,
    grid: &'a SeparationGrid,
    groups: Vec<Vec<PixelId>>,
    reject_same_wavelength: bool,
    rej: f64,
    seed: u64,
    progress: &'a ProgressSender,
}

impl GroupReduction for DistortionReduction<'_> {
    fn n_bins(&self) -> usize {
        self.grid.n_bins()
    }

    fn n_groups(&self) -> usize {
        self.groups.len()
    }

    fn reduce_group(&self, group_id: usize) -> Result<AccumulationMatrix, Error> {
        let binner = PairBinner::new(self.grid, self.finder.kind(), self.reject_same_wavelength);
        let mut accumulator = DistortionAccumulator::new(binner);
        let mut accum =
            AccumulationMatrix::zeros(self.grid.n_bins()).map_err(Error::internal_legacy_adhoc)?;
        let mut neighbors = Vec::new();

        for pixel in self.groups[group_id].iter().copied() {
            // seeding per pixel keeps the draws independent of the grouping
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed.wrapping_add(pixel));
            let forests = self.finder.samples().first().get(pixel);
            for (index, forest) in forests.iter().enumerate() {
                self.finder.forest_neighbors(pixel, index, &mut neighbors);
                let view_a = forest.view()?;
                for neighbor in neighbors.iter() {
                    // always draw, so the stream doesn't depend on rej
                    let keep = rng.random::<f64>() < self.rej;
                    let used = if keep {
                        let view_b = neighbor.forest.view()?;
                        accumulator
                            .add_pair(&mut accum, &view_a, &view_b, neighbor.angle)
                            .map_err(Error::internal_legacy_adhoc)?
                    } else {
                        false
                    };
                    accum.record_pair(used);
                }
                self.progress.forests_done(1);
            }
        }
        tracing::debug!(
            group_id,
            n_pixels = self.groups[group_id].len(),
            n_pairs = accum.n_pairs(),
            n_pairs_used = accum.n_pairs_used(),
            "finished group"
        );
        Ok(accum)
    }
}

/// Compute the distortion matrix.
///
/// When `spectra2` is provided, the cross-correlation between the 2 sets of
/// spectra is considered. A cross-correlation is also performed when the
/// configuration names a second absorber that differs from the first one;
/// in that case both samples are derived from `spectra` (sharing the
/// underlying spectra).
///
/// `pixelization` is used in place of the configuration's `nside` and
/// `scheme`. The spectra are split into `config.resolved_n_workers()` groups
/// regardless of the `executor`, so every executor produces identical output
/// for a given configuration.
pub fn compute_distortion_matrix(
    config: &DmatConfig,
    spectra: &[Arc<Spectrum>],
    spectra2: Option<&[Arc<Spectrum>]>,
    cosmo: &impl Cosmology,
    pixelization: &impl Pixelization,
    executor: &mut impl Executor,
) -> Result<DmatResult, Error> {
    config.validate()?;
    let grid = config.separation_grid()?;

    let lambda_abs = absorber_wavelength(&config.lambda_abs)?;
    let lambda_abs2 = absorber_wavelength(config.lambda_abs2_name())?;
    let project = !config.no_project;
    let params = DerivationParams {
        lambda_abs,
        z_ref: config.z_ref,
        z_evol: config.z_evol,
        project,
    };
    let params2 = DerivationParams {
        lambda_abs: lambda_abs2,
        z_ref: config.z_ref,
        z_evol: config.z_evol2,
        project,
    };

    let first = PixelBuckets::build(
        spectra.iter().cloned(),
        config.max_spectra,
        &params,
        cosmo,
        pixelization,
    )?;
    let samples = match spectra2 {
        Some(spectra2) => Samples::Cross(
            first,
            PixelBuckets::build(
                spectra2.iter().cloned(),
                config.max_spectra,
                &params2,
                cosmo,
                pixelization,
            )?,
        ),
        None if lambda_abs != lambda_abs2 => Samples::Cross(
            first,
            PixelBuckets::build(
                spectra.iter().cloned(),
                config.max_spectra,
                &params2,
                cosmo,
                pixelization,
            )?,
        ),
        None => Samples::Auto(first),
    };

    let angmax = samples.angmax(config.rt_max);
    let n_workers = config.resolved_n_workers();
    tracing::info!(
        cross_correlation = matches!(samples, Samples::Cross(_, _)),
        angmax,
        n_workers = n_workers.get(),
        "starting the distortion-matrix calculation"
    );

    let finder = NeighborFinder::new(&samples, angmax);
    let groups = round_robin(&samples.first().pixel_ids(), n_workers);

    let accum = with_progress(samples.first().n_forests(), |progress| {
        let reduce_spec = DistortionReduction {
            finder: &finder,
            grid: &grid,
            groups,
            reject_same_wavelength: config.no_same_wavelength_pairs,
            rej: config.rej,
            seed: config.seed,
            progress,
        };
        executor.drive_reduce(&reduce_spec)
    })?;
    tracing::info!(
        n_pairs = accum.n_pairs(),
        n_pairs_used = accum.n_pairs_used(),
        "finished the distortion-matrix calculation"
    );

    let header = DmatHeader {
        rej: config.rej,
        rp_min: config.rp_min,
        rp_max: config.rp_max,
        rt_max: config.rt_max,
        n_t: config.n_t,
        n_p: config.n_p,
        n_pairs: accum.n_pairs(),
        n_pairs_used: accum.n_pairs_used(),
    };
    Ok(DmatResult {
        header,
        dmat: accum.normalize(),
    })
}

/// Compute the distortion matrix with the flat ΛCDM cosmology, the HEALPix
/// pixelization and the worker pool described by `config`.
pub fn compute_distortion_matrix_from_config(
    config: &DmatConfig,
    spectra: &[Arc<Spectrum>],
    spectra2: Option<&[Arc<Spectrum>]>,
) -> Result<DmatResult, Error> {
    config.validate()?;
    let cosmo = FlatLcdm::new(config.fid_om)?;
    let pixelization = config.pixelization()?;
    let mut executor = PoolExecutor::new(config.resolved_n_workers())?;
    compute_distortion_matrix(config, spectra, spectra2, &cosmo, &pixelization, &mut executor)
}
