// the reason this is named mod.rs has to do with some complexities of how
// testing is handled
//
// we are following the advice of the rust book
// https://doc.rust-lang.org/book/ch11-03-test-organization.html#submodules-in-integration-tests

#![allow(dead_code)]

use forestpair::Spectrum;
use ndarray::ArrayView2;
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rand_xoshiro::rand_core::SeedableRng;
use std::sync::Arc;

// based on numpy!
// https://numpy.org/doc/stable/reference/generated/numpy.isclose.html
pub fn isclose(actual: f64, ref_val: f64, rtol: f64, atol: f64) -> bool {
    let actual_nan = actual.is_nan();
    let ref_nan = ref_val.is_nan();
    if actual_nan || ref_nan {
        actual_nan && ref_nan
    } else {
        (actual - ref_val).abs() <= (atol + rtol * ref_val.abs())
    }
}

pub fn assert_allclose(actual: ArrayView2<f64>, expected: ArrayView2<f64>, rtol: f64, atol: f64) {
    assert_eq!(actual.dim(), expected.dim());
    for ((idx, a), e) in actual.indexed_iter().zip(expected.iter()) {
        assert!(
            isclose(*a, *e, rtol, atol),
            "mismatch at {idx:?}: actual = {a}, expected = {e}"
        );
    }
}

/// install a subscriber so that log output is captured by the test harness
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Build `n` synthetic spectra scattered over a small patch of sky.
///
/// Each spectrum has between `min_pixels` and `max_pixels` pixels on a
/// regular `loglam` grid (with a random starting point), so that many pixel
/// pairs share exactly the same wavelength.
pub fn synthetic_spectra(
    seed: u64,
    n: usize,
    center: (f64, f64),
    half_width: f64,
    min_pixels: usize,
    max_pixels: usize,
) -> Vec<Arc<Spectrum>> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let (ra0, dec0) = center;
    (0..n)
        .map(|id| {
            let ra = ra0 + half_width * (2.0 * rng.random::<f64>() - 1.0);
            let dec = dec0 + half_width * (2.0 * rng.random::<f64>() - 1.0);
            let n_pixels = rng.random_range(min_pixels..=max_pixels);
            let first = rng.random_range(0..20);
            let loglam: Vec<f64> = (0..n_pixels)
                .map(|i| 3.56 + 3e-4 * (first + i) as f64)
                .collect();
            let delta = (0..n_pixels).map(|_| rng.random::<f64>() - 0.5).collect();
            let weight = (0..n_pixels).map(|_| 0.5 + rng.random::<f64>()).collect();
            Arc::new(Spectrum::new(id as i64, ra, dec, loglam, delta, weight, None).unwrap())
        })
        .collect()
}
