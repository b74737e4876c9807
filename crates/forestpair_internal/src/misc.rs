/// Cartesian unit vector of a point on the sky.
///
/// `ra` & `dec` are both in radians.
pub fn unit_vector(ra: f64, dec: f64) -> [f64; 3] {
    let (sin_dec, cos_dec) = dec.sin_cos();
    let (sin_ra, cos_ra) = ra.sin_cos();
    [cos_dec * cos_ra, cos_dec * sin_ra, sin_dec]
}

/// computes a dot product between 2 (mathematical) 3-vectors
pub fn dot_product(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Angle (in radians) between 2 unit vectors.
///
/// We use the atan2 formulation rather than `acos(a·b)`, since the latter
/// loses all precision for nearly parallel vectors (which are precisely the
/// pairs that we care about).
pub fn angular_separation(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let cross = [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ];
    let cross_norm = dot_product(&cross, &cross).sqrt();
    cross_norm.atan2(dot_product(a, b))
}

/// Normalizes the sum of a collection of unit vectors.
///
/// Returns `None` when the collection is empty or when the vectors cancel
/// out (e.g. 2 antipodal points).
pub fn mean_direction<'a>(vectors: impl Iterator<Item = &'a [f64; 3]>) -> Option<[f64; 3]> {
    let mut sum = [0.0; 3];
    for v in vectors {
        sum[0] += v[0];
        sum[1] += v[1];
        sum[2] += v[2];
    }
    let norm = dot_product(&sum, &sum).sqrt();
    if norm > 1e-12 {
        Some([sum[0] / norm, sum[1] / norm, sum[2] / norm])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn separation_simple() {
        let a = unit_vector(0.0, 0.0);
        let b = unit_vector(0.01, 0.0);
        assert!((angular_separation(&a, &b) - 0.01).abs() < 1e-15);

        let pole = unit_vector(1.3, std::f64::consts::FRAC_PI_2);
        let equator = unit_vector(0.2, 0.0);
        let sep = angular_separation(&pole, &equator);
        assert!((sep - std::f64::consts::FRAC_PI_2).abs() < 1e-12);

        // symmetric
        assert_eq!(
            angular_separation(&a, &pole),
            angular_separation(&pole, &a)
        );
    }

    #[test]
    fn separation_tiny_angles() {
        let a = unit_vector(0.5, -0.3);
        let b = unit_vector(0.5 + 1e-9, -0.3);
        let sep = angular_separation(&a, &b);
        let expected = 1e-9 * (-0.3_f64).cos();
        assert!((sep - expected).abs() < 1e-15);
    }

    #[test]
    fn mean_direction_cases() {
        let empty: [[f64; 3]; 0] = [];
        assert!(mean_direction(empty.iter()).is_none());

        let a = unit_vector(0.0, 0.0);
        let b = unit_vector(std::f64::consts::PI, 0.0);
        assert!(mean_direction([a, b].iter()).is_none());

        let c = unit_vector(0.1, 0.0);
        let mean = mean_direction([a, c].iter()).unwrap();
        let expected = unit_vector(0.05, 0.0);
        for k in 0..3 {
            assert!((mean[k] - expected[k]).abs() < 1e-14);
        }
    }
}
