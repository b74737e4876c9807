//! Spectrum inputs and the per-pixel quantities derived from them.
//!
//! A [`Spectrum`] is what the upstream delta-field construction hands us. A
//! [`Forest`] is built from a spectrum once the absorber, the cosmology and
//! the redshift-evolution model are known. Several forests can share a single
//! spectrum (e.g. when correlating a species against itself under 2
//! different absorbers) since they only hold an [`Arc`] to it.

use crate::Error;
use crate::cosmo::Cosmology;
use forestpair_internal::{
    ForestView, Projection, ProjectionView, continuum_projection, unit_vector,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single line of sight, as produced by the delta-field construction.
///
/// `ra` & `dec` are in radians. `loglam` holds `log10` of the observed
/// wavelength (in Angstrom) of each spectral pixel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "SpectrumRecord")]
pub struct Spectrum {
    id: i64,
    ra: f64,
    dec: f64,
    loglam: Vec<f64>,
    delta: Vec<f64>,
    weight: Vec<f64>,
    projection: Option<Array2<f64>>,
}

// the unvalidated serialized representation
#[derive(Deserialize)]
struct SpectrumRecord {
    id: i64,
    ra: f64,
    dec: f64,
    loglam: Vec<f64>,
    delta: Vec<f64>,
    weight: Vec<f64>,
    #[serde(default)]
    projection: Option<Array2<f64>>,
}

impl TryFrom<SpectrumRecord> for Spectrum {
    type Error = Error;

    fn try_from(record: SpectrumRecord) -> Result<Self, Self::Error> {
        let SpectrumRecord {
            id,
            ra,
            dec,
            loglam,
            delta,
            weight,
            projection,
        } = record;
        Spectrum::new(id, ra, dec, loglam, delta, weight, projection)
    }
}

impl Spectrum {
    pub fn new(
        id: i64,
        ra: f64,
        dec: f64,
        loglam: Vec<f64>,
        delta: Vec<f64>,
        weight: Vec<f64>,
        projection: Option<Array2<f64>>,
    ) -> Result<Self, Error> {
        let n_pixels = loglam.len();
        if n_pixels == 0 {
            return Err(Error::spectrum_shape(id, "no spectral pixels"));
        } else if delta.len() != n_pixels {
            return Err(Error::spectrum_shape(id, "delta & loglam lengths differ"));
        } else if weight.len() != n_pixels {
            return Err(Error::spectrum_shape(id, "weight & loglam lengths differ"));
        } else if loglam.iter().any(|v| !v.is_finite()) {
            return Err(Error::spectrum_shape(id, "loglam holds non-finite values"));
        } else if projection
            .as_ref()
            .is_some_and(|p| p.shape() != [n_pixels, n_pixels])
        {
            return Err(Error::spectrum_shape(
                id,
                "the projection must have shape (n_pixels, n_pixels)",
            ));
        }
        Ok(Self {
            id,
            ra,
            dec,
            loglam,
            delta,
            weight,
            projection,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn ra(&self) -> f64 {
        self.ra
    }

    pub fn dec(&self) -> f64 {
        self.dec
    }

    pub fn n_pixels(&self) -> usize {
        self.loglam.len()
    }

    pub fn loglam(&self) -> &[f64] {
        &self.loglam
    }

    pub fn delta(&self) -> &[f64] {
        &self.delta
    }

    pub fn weight(&self) -> &[f64] {
        &self.weight
    }

    /// An explicitly provided projection operator (if any)
    pub fn projection(&self) -> Option<&Array2<f64>> {
        self.projection.as_ref()
    }
}

/// The parameters needed to derive a [`Forest`] from a [`Spectrum`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DerivationParams {
    /// rest-frame wavelength of the absorber (Angstrom)
    pub lambda_abs: f64,
    /// reference redshift of the weight evolution
    pub z_ref: f64,
    /// the delta field is assumed to evolve as `(1+z)^(z_evol/2)`, the
    /// weights are rescaled by `((1+z)/(1+z_ref))^(z_evol-1)`
    pub z_evol: f64,
    /// when `false`, every forest uses the identity projection
    pub project: bool,
}

/// A spectrum with its derived per-pixel properties.
///
/// This is immutable after construction.
#[derive(Clone, Debug)]
pub struct Forest {
    spectrum: Arc<Spectrum>,
    z: Vec<f64>,
    r_comov: Vec<f64>,
    weight: Vec<f64>,
    unit_vector: [f64; 3],
    projection: Option<Projection>,
}

impl Forest {
    /// Fails when a pixel has no finite redshift or comoving distance (e.g.
    /// when `loglam` is absurdly large).
    pub fn derive(
        spectrum: Arc<Spectrum>,
        params: &DerivationParams,
        cosmo: &impl Cosmology,
    ) -> Result<Forest, Error> {
        let z: Vec<f64> = spectrum
            .loglam()
            .iter()
            .map(|loglam| 10f64.powf(*loglam) / params.lambda_abs - 1.0)
            .collect();
        let r_comov: Vec<f64> = z.iter().map(|z| cosmo.r_comoving(*z)).collect();
        if z.iter().chain(r_comov.iter()).any(|v| !v.is_finite()) {
            return Err(Error::spectrum_shape(
                spectrum.id(),
                "a pixel has a non-finite redshift or comoving distance",
            ));
        }
        let weight: Vec<f64> = spectrum
            .weight()
            .iter()
            .zip(z.iter())
            .map(|(w, z)| w * ((1.0 + z) / (1.0 + params.z_ref)).powf(params.z_evol - 1.0))
            .collect();

        let projection = if !params.project {
            None
        } else if let Some(explicit) = spectrum.projection() {
            Some(Projection::Dense(explicit.clone()))
        } else {
            let low_rank = continuum_projection(spectrum.loglam(), &weight);
            Some(Projection::LowRank(low_rank))
        };

        Ok(Forest {
            unit_vector: unit_vector(spectrum.ra(), spectrum.dec()),
            spectrum,
            z,
            r_comov,
            weight,
            projection,
        })
    }

    pub fn spectrum(&self) -> &Arc<Spectrum> {
        &self.spectrum
    }

    pub fn id(&self) -> i64 {
        self.spectrum.id()
    }

    pub fn n_pixels(&self) -> usize {
        self.z.len()
    }

    pub fn z(&self) -> &[f64] {
        &self.z
    }

    pub fn r_comov(&self) -> &[f64] {
        &self.r_comov
    }

    /// the rescaled weights
    pub fn weight(&self) -> &[f64] {
        &self.weight
    }

    pub fn unit_vector(&self) -> &[f64; 3] {
        &self.unit_vector
    }

    /// `None` stands for the identity
    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    /// smallest comoving distance of any pixel
    pub fn r_min(&self) -> f64 {
        self.r_comov.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Produce the lightweight view consumed by `forestpair_internal`
    pub fn view(&self) -> Result<ForestView<'_>, Error> {
        let projection = self
            .projection
            .as_ref()
            .map_or(ProjectionView::Identity, Projection::view);
        ForestView::with_projection(
            self.spectrum.loglam(),
            &self.r_comov,
            &self.weight,
            projection,
        )
        .map_err(Error::internal_legacy_adhoc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_spectrum(id: i64, n: usize) -> Spectrum {
        let loglam = (0..n).map(|i| 3.56 + 1e-4 * i as f64).collect();
        Spectrum::new(id, 0.5, 0.2, loglam, vec![0.0; n], vec![1.0; n], None).unwrap()
    }

    #[test]
    fn spectrum_validation() {
        assert!(Spectrum::new(0, 0.0, 0.0, vec![], vec![], vec![], None).is_err());
        assert!(Spectrum::new(0, 0.0, 0.0, vec![3.6], vec![], vec![1.0], None).is_err());
        assert!(Spectrum::new(0, 0.0, 0.0, vec![3.6], vec![0.0], vec![], None).is_err());
        assert!(
            Spectrum::new(0, 0.0, 0.0, vec![f64::NAN], vec![0.0], vec![1.0], None).is_err()
        );
        let bad_proj = Some(Array2::<f64>::eye(2));
        let err = Spectrum::new(7, 0.0, 0.0, vec![3.6], vec![0.0], vec![1.0], bad_proj)
            .unwrap_err();
        assert!(err.is_input_data());
    }

    #[test]
    fn spectrum_serde_validates() {
        let good = r#"{"id": 3, "ra": 0.1, "dec": 0.2, "loglam": [3.6, 3.61],
                       "delta": [0.0, 0.1], "weight": [1.0, 2.0]}"#;
        let spectrum: Spectrum = serde_json::from_str(good).unwrap();
        assert_eq!(spectrum.id(), 3);
        assert_eq!(spectrum.n_pixels(), 2);
        assert!(spectrum.projection().is_none());

        let bad = r#"{"id": 3, "ra": 0.1, "dec": 0.2, "loglam": [3.6, 3.61],
                      "delta": [0.0], "weight": [1.0, 2.0]}"#;
        assert!(serde_json::from_str::<Spectrum>(bad).is_err());
    }

    #[test]
    fn derived_quantities() {
        let lambda_abs = 1215.67;
        let loglam = vec![(1215.67_f64 * 3.0).log10(), (1215.67_f64 * 3.25).log10()];
        let spectrum = Spectrum::new(1, 0.0, 0.0, loglam, vec![0.0; 2], vec![2.0; 2], None)
            .unwrap();
        let params = DerivationParams {
            lambda_abs,
            z_ref: 2.25,
            z_evol: 2.0,
            project: false,
        };
        let forest = Forest::derive(Arc::new(spectrum), &params, &|z: f64| 1000.0 * z).unwrap();
        assert!((forest.z()[0] - 2.0).abs() < 1e-10);
        assert!((forest.z()[1] - 2.25).abs() < 1e-10);
        assert!((forest.r_comov()[0] - 2000.0).abs() < 1e-7);
        assert!((forest.r_min() - 2000.0).abs() < 1e-7);
        // (1+z)/(1+z_ref) = 3/3.25 and the exponent is 1
        assert!((forest.weight()[0] - 2.0 * 3.0 / 3.25).abs() < 1e-10);
        assert!((forest.weight()[1] - 2.0).abs() < 1e-10);
        assert!(forest.projection().is_none());
        assert_eq!(forest.unit_vector(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn projection_selection() {
        let explicit = Array2::from_elem((3, 3), 0.5);
        let spectrum = Spectrum::new(
            2,
            0.0,
            0.0,
            vec![3.56, 3.57, 3.58],
            vec![0.0; 3],
            vec![1.0; 3],
            Some(explicit.clone()),
        )
        .unwrap();
        let spectrum = Arc::new(spectrum);
        let mut params = DerivationParams {
            lambda_abs: 1215.67,
            z_ref: 2.25,
            z_evol: 2.9,
            project: true,
        };
        let cosmo = |z: f64| 1000.0 * z;
        let forest = Forest::derive(spectrum.clone(), &params, &cosmo).unwrap();
        assert_eq!(forest.projection(), Some(&Projection::Dense(explicit)));

        params.project = false;
        let forest = Forest::derive(spectrum.clone(), &params, &cosmo).unwrap();
        assert!(forest.projection().is_none());

        // both forests share the spectrum
        assert!(Arc::ptr_eq(forest.spectrum(), &spectrum));

        params.project = true;
        let forest = Forest::derive(Arc::new(make_spectrum(3, 4)), &params, &cosmo).unwrap();
        let Some(Projection::LowRank(low_rank)) = forest.projection() else {
            panic!("expected the continuum projection");
        };
        assert_eq!((low_rank.rank(), low_rank.n_pixels()), (2, 4));
        let view = forest.view().unwrap();
        assert_eq!(view.n_pixels(), 4);
        assert!(matches!(view.projection(), ProjectionView::LowRank(_)));
    }

    #[test]
    fn non_finite_distances_are_rejected() {
        let params = DerivationParams {
            lambda_abs: 1215.67,
            z_ref: 2.25,
            z_evol: 2.9,
            project: false,
        };
        // 10^400 overflows to an infinite redshift
        let spectrum = Spectrum::new(9, 0.0, 0.0, vec![400.0], vec![0.0], vec![1.0], None)
            .unwrap();
        let err = Forest::derive(Arc::new(spectrum), &params, &|z: f64| z).unwrap_err();
        assert!(err.is_input_data());

        let spectrum = Arc::new(make_spectrum(4, 3));
        let err = Forest::derive(spectrum, &params, &|_z: f64| f64::NAN).unwrap_err();
        assert!(err.is_input_data());
    }
}
