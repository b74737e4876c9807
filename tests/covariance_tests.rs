use forestpair::{
    CorrelationProduct, CovConfig, CovarianceMethod, PixelId, PixelScheme, align,
    cross_covariance, subsample_covariance,
};
use ndarray::Array2;
use rand::Rng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;
use rand_xoshiro::rand_core::SeedableRng;
use std::collections::BTreeSet;

mod common;

use common::{assert_allclose, init_logging};

fn random_product(
    rng: &mut Xoshiro256PlusPlus,
    healpix: Vec<PixelId>,
    n_bins: usize,
    scheme: PixelScheme,
) -> CorrelationProduct {
    let n = healpix.len();
    let da = Array2::from_shape_fn((n, n_bins), |_| rng.random::<f64>() - 0.5);
    let we = Array2::from_shape_fn((n, n_bins), |_| 0.1 + rng.random::<f64>());
    CorrelationProduct::new(healpix, da, we, 16, scheme).unwrap()
}

fn random_ids(rng: &mut Xoshiro256PlusPlus, n: usize) -> Vec<PixelId> {
    let mut all: Vec<PixelId> = (0..60).collect();
    all.shuffle(rng);
    all.truncate(n);
    all
}

/// a product measured on `n` distinct pixels drawn from `0..60`
fn random_subset_product(
    rng: &mut Xoshiro256PlusPlus,
    n: usize,
    n_bins: usize,
    scheme: PixelScheme,
) -> CorrelationProduct {
    let healpix = random_ids(rng, n);
    random_product(rng, healpix, n_bins, scheme)
}

#[test]
fn alignment_preserves_every_subsample() {
    init_logging();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(17);
    for _ in 0..10 {
        let first = random_subset_product(&mut rng, 25, 3, PixelScheme::Ring);
        let second = random_subset_product(&mut rng, 30, 2, PixelScheme::Ring);
        let (a, b) = align(&first, &second).unwrap();

        let union: BTreeSet<PixelId> = first
            .healpix()
            .iter()
            .chain(second.healpix().iter())
            .copied()
            .collect();
        let union: Vec<PixelId> = union.into_iter().collect();
        assert_eq!(a.healpix(), union.as_slice());
        assert_eq!(b.healpix(), union.as_slice());

        for (original, aligned) in [(&first, &a), (&second, &b)] {
            assert_eq!(aligned.n_bins(), original.n_bins());
            for (row, id) in aligned.healpix().iter().enumerate() {
                match original.healpix().iter().position(|other| other == id) {
                    Some(k) => {
                        assert_eq!(aligned.da().row(row), original.da().row(k));
                        assert_eq!(aligned.we().row(row), original.we().row(k));
                    }
                    None => {
                        assert!(aligned.we().row(row).iter().all(|w| *w == 0.0));
                        assert!(aligned.da().row(row).iter().all(|v| *v == 0.0));
                    }
                }
            }
        }
    }
}

#[test]
fn row_order_does_not_matter() {
    init_logging();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
    let first = random_subset_product(&mut rng, 20, 3, PixelScheme::Nest);
    let second = random_subset_product(&mut rng, 20, 4, PixelScheme::Nest);

    // reverse the rows of the first product
    let n = first.n_subsamples();
    let reversed = CorrelationProduct::new(
        first.healpix().iter().rev().copied().collect(),
        Array2::from_shape_fn((n, 3), |(k, b)| first.da()[[n - 1 - k, b]]),
        Array2::from_shape_fn((n, 3), |(k, b)| first.we()[[n - 1 - k, b]]),
        first.nside(),
        first.scheme(),
    )
    .unwrap();

    for method in [CovarianceMethod::Subsample, CovarianceMethod::Jackknife] {
        let config = CovConfig { method };
        let expected = cross_covariance(&first, &second, &config).unwrap();
        let actual = cross_covariance(&reversed, &second, &config).unwrap();
        assert_eq!(actual.co(), expected.co());
        assert_eq!(actual.covariance(), expected.covariance());
    }
}

#[test]
fn auto_block_matches_the_single_product_covariance() {
    init_logging();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(99);
    let product = random_subset_product(&mut rng, 40, 4, PixelScheme::Ring);
    let result = cross_covariance(&product, &product, &CovConfig::default()).unwrap();

    let cov = subsample_covariance(product.da(), product.we());
    assert_allclose(result.co(), cov.view(), 1e-12, 1e-16);
    for b in 0..4 {
        assert!((result.cor()[[b, b]] - 1.0).abs() < 1e-12);
    }
}

#[test]
fn pixelization_must_match() {
    init_logging();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
    let ring = random_product(&mut rng, vec![1, 2, 3], 2, PixelScheme::Ring);
    let nest = random_product(&mut rng, vec![1, 2, 3], 2, PixelScheme::Nest);
    let err = cross_covariance(&ring, &nest, &CovConfig::default()).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(err.to_string(), "HLPXSCHM are different: RING != NEST");

    let coarse = CorrelationProduct::new(
        vec![1, 2, 3],
        ring.da().to_owned(),
        ring.we().to_owned(),
        4,
        PixelScheme::Ring,
    )
    .unwrap();
    let err = cross_covariance(&ring, &coarse, &CovConfig::default()).unwrap_err();
    assert_eq!(err.to_string(), "NSIDE are different: 16 != 4");
}

#[test]
fn singular_covariance_is_only_a_warning() {
    init_logging();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
    let first = random_product(&mut rng, (0..12).collect(), 3, PixelScheme::Ring);
    // the last bin of the second product never receives any weight
    let mut we = Array2::from_shape_fn((12, 2), |_| 0.5 + rng.random::<f64>());
    we.column_mut(1).fill(0.0);
    let da = Array2::from_shape_fn((12, 2), |_| rng.random::<f64>());
    let second = CorrelationProduct::new((0..12).collect(), da, we, 16, PixelScheme::Ring).unwrap();

    for method in [CovarianceMethod::Subsample, CovarianceMethod::Jackknife] {
        let result = cross_covariance(&first, &second, &CovConfig { method }).unwrap();
        assert!(!result.positive_definite());
        assert!(result.co().column(1).iter().all(|v| *v == 0.0));
        // the correlation of a bin without variance is undefined
        assert!(result.cor().column(1).iter().all(|v| v.is_nan()));
        assert!(result.cor().column(0).iter().all(|v| v.is_finite()));
    }
}

#[test]
fn serialized_output() {
    init_logging();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(23);
    let first = random_product(&mut rng, (0..15).collect(), 2, PixelScheme::Nest);
    let second = random_product(&mut rng, (5..20).collect(), 3, PixelScheme::Nest);
    let config = CovConfig::from_json_str(r#"{"method": "jackknife"}"#).unwrap();
    let result = cross_covariance(&first, &second, &config).unwrap();
    assert!(result.positive_definite());

    let value = serde_json::to_value(&result).unwrap();
    let object = value.as_object().unwrap();
    let keys: BTreeSet<&str> = object.keys().map(|k| k.as_str()).collect();
    assert_eq!(keys, BTreeSet::from(["CO", "COR", "POSDEF"]));
    assert_eq!(object["POSDEF"], serde_json::Value::Bool(true));
    assert_eq!(object["CO"]["dim"], serde_json::json!([2, 3]));
}
