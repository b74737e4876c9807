//! Covariance & cross-covariance of correlation functions measured in
//! healpix subsamples.
//!
//! A [`CorrelationProduct`] holds a correlation function measured separately
//! in every healpix pixel (the subsamples) along with the associated weights.
//! To estimate the cross-covariance of 2 products, we first align them (so
//! that row `k` of both products refers to the same pixel), then treat the
//! concatenation of their bins as a single measurement.

use crate::Error;
use crate::config::{CovConfig, CovarianceMethod};
use crate::pixelization::{PixelId, PixelScheme};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView2, Axis, concatenate, s};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A correlation function measured in each healpix subsample.
///
/// `da[[k, b]]` is the measurement in bin `b` of the subsample with pixel id
/// `healpix[k]` and `we[[k, b]]` is the associated weight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CorrelationProductRecord")]
pub struct CorrelationProduct {
    healpix: Vec<PixelId>,
    da: Array2<f64>,
    we: Array2<f64>,
    nside: u32,
    scheme: PixelScheme,
}

// the unvalidated serialized representation
#[derive(Deserialize)]
struct CorrelationProductRecord {
    healpix: Vec<PixelId>,
    da: Array2<f64>,
    we: Array2<f64>,
    nside: u32,
    scheme: PixelScheme,
}

impl TryFrom<CorrelationProductRecord> for CorrelationProduct {
    type Error = Error;

    fn try_from(record: CorrelationProductRecord) -> Result<Self, Self::Error> {
        let CorrelationProductRecord {
            healpix,
            da,
            we,
            nside,
            scheme,
        } = record;
        CorrelationProduct::new(healpix, da, we, nside, scheme)
    }
}

impl CorrelationProduct {
    pub fn new(
        healpix: Vec<PixelId>,
        da: Array2<f64>,
        we: Array2<f64>,
        nside: u32,
        scheme: PixelScheme,
    ) -> Result<Self, Error> {
        if da.nrows() != healpix.len() {
            return Err(Error::product_shape(format!(
                "da has {} rows, but there are {} healpix ids",
                da.nrows(),
                healpix.len()
            )));
        } else if da.shape() != we.shape() {
            return Err(Error::product_shape(format!(
                "da has shape {:?}, while we has shape {:?}",
                da.shape(),
                we.shape()
            )));
        } else if da.ncols() == 0 {
            return Err(Error::product_shape(String::from("there are no bins")));
        }
        let unique: BTreeSet<PixelId> = healpix.iter().copied().collect();
        if unique.len() != healpix.len() {
            return Err(Error::product_shape(String::from(
                "the healpix ids aren't unique",
            )));
        }
        Ok(Self {
            healpix,
            da,
            we,
            nside,
            scheme,
        })
    }

    pub fn healpix(&self) -> &[PixelId] {
        &self.healpix
    }

    pub fn da(&self) -> ArrayView2<'_, f64> {
        self.da.view()
    }

    pub fn we(&self) -> ArrayView2<'_, f64> {
        self.we.view()
    }

    pub fn nside(&self) -> u32 {
        self.nside
    }

    pub fn scheme(&self) -> PixelScheme {
        self.scheme
    }

    pub fn n_subsamples(&self) -> usize {
        self.healpix.len()
    }

    pub fn n_bins(&self) -> usize {
        self.da.ncols()
    }

    /// Append zero-weight rows for `extra` pixels & sort the rows by pixel id
    fn padded_and_sorted(&self, extra: &[PixelId]) -> CorrelationProduct {
        let n_bins = self.n_bins();
        let mut healpix = self.healpix.clone();
        healpix.extend_from_slice(extra);

        let mut order: Vec<usize> = (0..healpix.len()).collect();
        order.sort_by_key(|&k| healpix[k]);

        let n_original = self.n_subsamples();
        let mut da = Array2::<f64>::zeros((healpix.len(), n_bins));
        let mut we = Array2::<f64>::zeros((healpix.len(), n_bins));
        for (row, &k) in order.iter().enumerate() {
            if k < n_original {
                da.row_mut(row).assign(&self.da.row(k));
                we.row_mut(row).assign(&self.we.row(k));
            }
        }
        CorrelationProduct {
            healpix: order.iter().map(|&k| healpix[k]).collect(),
            da,
            we,
            nside: self.nside,
            scheme: self.scheme,
        }
    }
}

/// Align 2 products so that both share the same (sorted) pixel ids.
///
/// Pixels that only show up in one product are added to the other with zero
/// measurements & zero weights.
pub fn align(
    first: &CorrelationProduct,
    second: &CorrelationProduct,
) -> Result<(CorrelationProduct, CorrelationProduct), Error> {
    if first.nside != second.nside {
        return Err(Error::pixelization_mismatch(
            "NSIDE",
            first.nside.to_string(),
            second.nside.to_string(),
        ));
    }
    if first.scheme != second.scheme {
        return Err(Error::pixelization_mismatch(
            "HLPXSCHM",
            first.scheme.to_string(),
            second.scheme.to_string(),
        ));
    }

    let missing = |product: &CorrelationProduct, other: &CorrelationProduct| -> Vec<PixelId> {
        let present: BTreeSet<PixelId> = product.healpix.iter().copied().collect();
        other
            .healpix
            .iter()
            .copied()
            .filter(|id| !present.contains(id))
            .collect()
    };
    let missing_first = missing(first, second);
    let missing_second = missing(second, first);
    if !missing_first.is_empty() {
        tracing::info!(product = 1, unshared = ?missing_first, "some healpix are unshared");
    }
    if !missing_second.is_empty() {
        tracing::info!(product = 2, unshared = ?missing_second, "some healpix are unshared");
    }

    Ok((
        first.padded_and_sorted(&missing_first),
        second.padded_and_sorted(&missing_second),
    ))
}

/// Covariance of a measurement from independent weighted subsamples.
///
/// With `W_b = Σ_k we[k,b]` and the weighted mean `ξ̄_b`, this computes
/// `C[a,b] = Σ_k we[k,a] (ξ[k,a] - ξ̄_a) we[k,b] (ξ[k,b] - ξ̄_b) / (W_a W_b)`.
/// Entries where `W_a W_b` vanishes are left unnormalized (they are 0).
pub fn subsample_covariance(xi: ArrayView2<f64>, we: ArrayView2<f64>) -> Array2<f64> {
    let sum_we = we.sum_axis(Axis(0));
    let mut mean = (&xi * &we).sum_axis(Axis(0));
    mean.zip_mut_with(&sum_we, |m, &w| {
        if w > 0.0 {
            *m /= w;
        }
    });

    let meanless = &we * &(&xi - &mean);
    let mut cov = meanless.t().dot(&meanless);
    for ((a, b), value) in cov.indexed_iter_mut() {
        let norm = sum_we[a] * sum_we[b];
        if norm > 0.0 {
            *value /= norm;
        }
    }
    cov
}

/// Weighted delete-one jackknife covariance over the subsamples.
///
/// Each jackknife realization drops one subsample & recomputes the weighted
/// mean. Bins that receive no weight in a realization are set to 0.
///
/// Fails with a configuration error when there are fewer than 2 subsamples
/// (the jackknife isn't a usable method for such products).
pub fn jackknife_covariance(
    xi: ArrayView2<f64>,
    we: ArrayView2<f64>,
) -> Result<Array2<f64>, Error> {
    let n = xi.nrows();
    if n < 2 {
        return Err(Error::config_value(
            "method",
            format!("the jackknife requires at least 2 subsamples, got {n}"),
        ));
    }
    let weighted = &xi * &we;
    let total_weighted = weighted.sum_axis(Axis(0));
    let total_we = we.sum_axis(Axis(0));

    let mut realizations = Array2::<f64>::zeros(xi.raw_dim());
    for (k, mut realization) in realizations.outer_iter_mut().enumerate() {
        let numerator = &total_weighted - &weighted.row(k);
        let denominator = &total_we - &we.row(k);
        realization.assign(&Array1::from_shape_fn(numerator.len(), |b| {
            if denominator[b] > 0.0 {
                numerator[b] / denominator[b]
            } else {
                0.0
            }
        }));
    }

    let mean = realizations.sum_axis(Axis(0)) / n as f64;
    let deviations = &realizations - &mean;
    Ok(deviations.t().dot(&deviations) * ((n - 1) as f64 / n as f64))
}

/// `cov[[a, b]] / sqrt(cov[[a, a]] cov[[b, b]])`.
///
/// Bins with vanishing variance produce non-finite entries.
pub fn correlation_matrix(cov: ArrayView2<f64>) -> Array2<f64> {
    let var = cov.diag().to_owned();
    Array2::from_shape_fn(cov.raw_dim(), |(a, b)| cov[[a, b]] / (var[a] * var[b]).sqrt())
}

/// Whether a Cholesky factorization of the (symmetric) matrix succeeds
pub fn is_positive_definite(matrix: ArrayView2<f64>) -> bool {
    if matrix.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let (n_rows, n_cols) = matrix.dim();
    let matrix = DMatrix::from_fn(n_rows, n_cols, |i, j| matrix[[i, j]]);
    matrix.cholesky().is_some()
}

/// The cross-covariance between 2 correlation products.
#[derive(Clone, Debug, Serialize)]
pub struct CrossCovariance {
    #[serde(skip)]
    covariance: Array2<f64>,
    #[serde(rename = "CO")]
    co: Array2<f64>,
    #[serde(rename = "COR")]
    cor: Array2<f64>,
    #[serde(rename = "POSDEF")]
    positive_definite: bool,
}

impl CrossCovariance {
    /// the covariance of the concatenated measurement (`bins1 + bins2` square)
    pub fn covariance(&self) -> ArrayView2<'_, f64> {
        self.covariance.view()
    }

    /// the `bins1 × bins2` cross-covariance block
    pub fn co(&self) -> ArrayView2<'_, f64> {
        self.co.view()
    }

    /// the `bins1 × bins2` block of the correlation matrix
    pub fn cor(&self) -> ArrayView2<'_, f64> {
        self.cor.view()
    }

    /// whether the full covariance could be Cholesky factorized
    pub fn positive_definite(&self) -> bool {
        self.positive_definite
    }
}

/// Compute the cross-covariance between 2 products.
///
/// The products must share their `nside` & `scheme`. A covariance that isn't
/// positive definite only produces a warning.
pub fn cross_covariance(
    first: &CorrelationProduct,
    second: &CorrelationProduct,
    config: &CovConfig,
) -> Result<CrossCovariance, Error> {
    let (first, second) = align(first, second)?;
    let size1 = first.n_bins();

    let da = concatenate(Axis(1), &[first.da(), second.da()])
        .map_err(|e| Error::product_shape(e.to_string()))?;
    let we = concatenate(Axis(1), &[first.we(), second.we()])
        .map_err(|e| Error::product_shape(e.to_string()))?;

    let covariance = match config.method {
        CovarianceMethod::Subsample => subsample_covariance(da.view(), we.view()),
        CovarianceMethod::Jackknife => jackknife_covariance(da.view(), we.view())?,
    };
    let cor = correlation_matrix(covariance.view());
    let positive_definite = is_positive_definite(covariance.view());
    if !positive_definite {
        tracing::warn!("the covariance matrix is not positive definite");
    }
    tracing::info!(
        n_subsamples = first.n_subsamples(),
        bins1 = size1,
        bins2 = second.n_bins(),
        method = ?config.method,
        "computed the cross-covariance"
    );

    Ok(CrossCovariance {
        co: covariance.slice(s![..size1, size1..]).to_owned(),
        cor: cor.slice(s![..size1, size1..]).to_owned(),
        covariance,
        positive_definite,
    })
}
