//! Cosmology & absorber-line helpers.
//!
//! The distortion-matrix machinery only ever needs the comoving distance as a
//! function of redshift, so the [`Cosmology`] trait is the only seam. Any
//! `Fn(f64) -> f64` closure can be used directly. [`FlatLcdm`] is provided
//! for convenience.

use crate::Error;

/// `c / (100 km/s/Mpc)`, i.e. the Hubble distance in `h⁻¹ Mpc`
const HUBBLE_DISTANCE: f64 = 299_792.458 / 100.0;

/// Provides the comoving distance (in `h⁻¹ Mpc`) as a function of redshift.
///
/// Implementations must be monotonically increasing in `z`.
pub trait Cosmology: Sync {
    fn r_comoving(&self, z: f64) -> f64;
}

impl<F> Cosmology for F
where
    F: Fn(f64) -> f64 + Sync,
{
    fn r_comoving(&self, z: f64) -> f64 {
        self(z)
    }
}

/// A flat ΛCDM cosmology (radiation is neglected).
///
/// The comoving distance is tabulated once (trapezoid rule) and linearly
/// interpolated afterwards.
#[derive(Clone, Debug)]
pub struct FlatLcdm {
    omega_m: f64,
    dz: f64,
    table: Vec<f64>,
}

impl FlatLcdm {
    const Z_MAX: f64 = 10.0;
    const N_STEPS: usize = 10_000;

    pub fn new(omega_m: f64) -> Result<Self, Error> {
        if !(omega_m > 0.0 && omega_m <= 1.0) {
            return Err(Error::config_value(
                "fid_om",
                format!("{omega_m} doesn't lie in the interval (0, 1]"),
            ));
        }
        let dz = Self::Z_MAX / Self::N_STEPS as f64;
        let mut table = Vec::with_capacity(Self::N_STEPS + 1);
        table.push(0.0);
        let mut prev = inv_efunc(omega_m, 0.0);
        for i in 1..=Self::N_STEPS {
            let cur = inv_efunc(omega_m, i as f64 * dz);
            let last = table[i - 1];
            table.push(last + 0.5 * dz * (prev + cur) * HUBBLE_DISTANCE);
            prev = cur;
        }
        Ok(Self { omega_m, dz, table })
    }

    pub fn omega_m(&self) -> f64 {
        self.omega_m
    }
}

/// `1/E(z)` for a flat universe
fn inv_efunc(omega_m: f64, z: f64) -> f64 {
    let zp1 = 1.0 + z;
    1.0 / (omega_m * zp1 * zp1 * zp1 + (1.0 - omega_m)).sqrt()
}

impl Cosmology for FlatLcdm {
    /// Returns NaN for a non-finite `z`.
    fn r_comoving(&self, z: f64) -> f64 {
        if !z.is_finite() {
            return f64::NAN;
        } else if z <= 0.0 {
            // only used for blueshifted pixels, which shouldn't really exist
            return HUBBLE_DISTANCE * z;
        }

        let last_idx = self.table.len() - 1;
        let pos = z / self.dz;
        if pos < last_idx as f64 {
            let idx = pos as usize;
            let frac = pos - idx as f64;
            self.table[idx] * (1.0 - frac) + self.table[idx + 1] * frac
        } else {
            let z_last = last_idx as f64 * self.dz;
            self.table[last_idx] + self.tail_integral(z_last, z)
        }
    }
}

impl FlatLcdm {
    const N_TAIL_STEPS: usize = 1_000;

    /// `r(z) - r(z_last)` for `z > z_last`, integrated in `u = 1/sqrt(1+z)`
    /// with a fixed number of steps.
    ///
    /// In terms of `u`, `dr = 2 D_H du / sqrt(Ωm + ΩΛ u⁶)`, which stays
    /// bounded as `z → ∞`.
    fn tail_integral(&self, z_last: f64, z: f64) -> f64 {
        let omega_l = 1.0 - self.omega_m;
        let integrand = |u: f64| 2.0 / (self.omega_m + omega_l * u.powi(6)).sqrt();
        let (u_lo, u_hi) = ((1.0 + z).sqrt().recip(), (1.0 + z_last).sqrt().recip());
        let step = (u_hi - u_lo) / Self::N_TAIL_STEPS as f64;
        let interior: f64 = (1..Self::N_TAIL_STEPS)
            .map(|i| integrand(u_lo + i as f64 * step))
            .sum();
        let sum = 0.5 * (integrand(u_lo) + integrand(u_hi)) + interior;
        HUBBLE_DISTANCE * step * sum
    }
}

/// Rest-frame wavelengths (in Angstrom) of the absorption lines that are
/// commonly used to define a forest.
pub const ABSORBERS: &[(&str, f64)] = &[
    ("MgI(2853)", 2852.96),
    ("MgII(2804)", 2803.5324),
    ("MgII(2796)", 2796.3511),
    ("FeII(2600)", 2600.1724835),
    ("FeII(2587)", 2586.6495659),
    ("MnII(2577)", 2576.877),
    ("FeII(2383)", 2382.7641781),
    ("FeII(2374)", 2374.4603294),
    ("FeII(2344)", 2344.2129601),
    ("AlIII(1863)", 1862.79113),
    ("AlIII(1855)", 1854.71829),
    ("AlII(1671)", 1670.7886),
    ("FeII(1609)", 1608.4511),
    ("CIV(1551)", 1550.77845),
    ("CIV(eff)", 1549.06),
    ("CIV(1548)", 1548.2049),
    ("SiII(1527)", 1526.70698),
    ("SiIV(1403)", 1402.77291),
    ("SiIV(1394)", 1393.76018),
    ("CII(1335)", 1334.5323),
    ("SiII(1304)", 1304.3702),
    ("OI(1302)", 1302.1685),
    ("SiII(1260)", 1260.4221),
    ("NV(1243)", 1242.804),
    ("NV(1239)", 1238.821),
    ("LYA", 1215.67),
    ("SiIII(1207)", 1206.500),
    ("NI(1200)", 1200.0),
    ("SiII(1193)", 1193.2897),
    ("SiII(1190)", 1190.4158),
    ("OI(1039)", 1039.230),
    ("OVI(1038)", 1037.613),
    ("OVI(1032)", 1031.912),
    ("LYB", 1025.72),
];

/// Look up the rest-frame wavelength of an absorber by name
pub fn absorber_wavelength(name: &str) -> Result<f64, Error> {
    ABSORBERS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, wavelength)| *wavelength)
        .ok_or_else(|| {
            Error::absorber_name(
                name.to_string(),
                ABSORBERS.iter().map(|(n, _)| n.to_string()).collect(),
            )
        })
}
