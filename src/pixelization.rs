//! Sky pixelization.
//!
//! The rest of the crate only relies upon the [`Pixelization`] trait (it just
//! needs to map a position to a pixel id). [`Healpix`] implements `ang2pix`
//! for the HEALPix scheme, following the algorithm described by Górski et al.
//! (2005), for both the RING & NESTED orderings.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Identifies a sky pixel
pub type PixelId = u64;

/// Maps sky positions to pixel ids.
pub trait Pixelization: Sync {
    /// `theta` is the colatitude (`π/2 - dec`) and `phi` is the longitude
    /// (`ra`), both in radians.
    fn ang2pix(&self, theta: f64, phi: f64) -> Result<PixelId, Error>;
}

/// Pixel ordering scheme of a HEALPix map
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelScheme {
    Ring,
    Nest,
}

impl core::fmt::Display for PixelScheme {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            PixelScheme::Ring => write!(f, "RING"),
            PixelScheme::Nest => write!(f, "NEST"),
        }
    }
}

/// A HEALPix pixelization with resolution `nside`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Healpix {
    nside: u32,
    scheme: PixelScheme,
}

impl Healpix {
    /// The largest supported resolution (so that pixel ids fit in 64 bits)
    pub const MAX_NSIDE: u32 = 1 << 29;

    pub fn new(nside: u32, scheme: PixelScheme) -> Result<Self, Error> {
        if nside == 0 || !nside.is_power_of_two() || nside > Self::MAX_NSIDE {
            Err(Error::config_value(
                "nside",
                format!(
                    "{nside} must be a power of 2 that doesn't exceed {}",
                    Self::MAX_NSIDE
                ),
            ))
        } else {
            Ok(Self { nside, scheme })
        }
    }

    pub fn nside(&self) -> u32 {
        self.nside
    }

    pub fn scheme(&self) -> PixelScheme {
        self.scheme
    }

    /// the total number of pixels on the sphere
    pub fn n_pixels(&self) -> u64 {
        12 * (self.nside as u64) * (self.nside as u64)
    }

    fn ang2pix_ring(&self, z: f64, tt: f64) -> u64 {
        let nside = self.nside as i64;
        let za = z.abs();
        let pix = if za <= 2.0 / 3.0 {
            // equatorial region
            let temp1 = nside as f64 * (0.5 + tt);
            let temp2 = nside as f64 * z * 0.75;
            let jp = (temp1 - temp2) as i64; // index of ascending edge line
            let jm = (temp1 + temp2) as i64; // index of descending edge line
            let ir = nside + 1 + jp - jm; // ring number counted from z = 2/3
            let kshift = 1 - (ir & 1);
            let ip = (jp + jm - nside + kshift + 1) / 2;
            let ip = ip.rem_euclid(4 * nside);
            let ncap = 2 * nside * (nside - 1);
            ncap + (ir - 1) * 4 * nside + ip
        } else {
            // polar caps
            let tp = tt - tt.floor();
            let tmp = nside as f64 * (3.0 * (1.0 - za)).sqrt();
            let jp = (tp * tmp) as i64;
            let jm = ((1.0 - tp) * tmp) as i64;
            let ir = jp + jm + 1; // ring number counted from the closest pole
            let ip = ((tt * ir as f64) as i64).rem_euclid(4 * ir);
            if z > 0.0 {
                2 * ir * (ir - 1) + ip
            } else {
                12 * nside * nside - 2 * ir * (ir + 1) + ip
            }
        };
        pix as u64
    }

    fn ang2pix_nest(&self, z: f64, tt: f64) -> u64 {
        let nside = self.nside as i64;
        let za = z.abs();
        let (face, ix, iy) = if za <= 2.0 / 3.0 {
            let temp1 = nside as f64 * (0.5 + tt);
            let temp2 = nside as f64 * z * 0.75;
            let jp = (temp1 - temp2) as i64;
            let jm = (temp1 + temp2) as i64;
            let ifp = jp / nside;
            let ifm = jm / nside;
            let face = if ifp == ifm {
                ifp | 4
            } else if ifp < ifm {
                ifp
            } else {
                ifm + 8
            };
            let ix = jm & (nside - 1);
            let iy = nside - (jp & (nside - 1)) - 1;
            (face, ix, iy)
        } else {
            let ntt = (tt as i64).min(3);
            let tp = tt - ntt as f64;
            let tmp = nside as f64 * (3.0 * (1.0 - za)).sqrt();
            let jp = ((tp * tmp) as i64).min(nside - 1);
            let jm = (((1.0 - tp) * tmp) as i64).min(nside - 1);
            if z >= 0.0 {
                (ntt, nside - jm - 1, nside - jp - 1)
            } else {
                (ntt + 8, jp, jm)
            }
        };
        (face as u64) * (nside as u64) * (nside as u64)
            + spread_bits(ix as u64)
            + (spread_bits(iy as u64) << 1)
    }
}

/// interleave the bits of `v` with zeros (bit `k` moves to bit `2k`)
fn spread_bits(v: u64) -> u64 {
    let mut v = v & 0xFFFF_FFFF;
    v = (v | (v << 16)) & 0x0000_FFFF_0000_FFFF;
    v = (v | (v << 8)) & 0x00FF_00FF_00FF_00FF;
    v = (v | (v << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    v = (v | (v << 2)) & 0x3333_3333_3333_3333;
    v = (v | (v << 1)) & 0x5555_5555_5555_5555;
    v
}

impl Pixelization for Healpix {
    fn ang2pix(&self, theta: f64, phi: f64) -> Result<PixelId, Error> {
        if !theta.is_finite() || !phi.is_finite() || !(0.0..=PI).contains(&theta) {
            return Err(Error::undefined_pixel(theta, phi));
        }
        let z = theta.cos();
        // tt lies in [0, 4)
        let mut tt = phi.rem_euclid(TAU) / FRAC_PI_2;
        if tt >= 4.0 {
            tt = 0.0;
        }
        Ok(match self.scheme {
            PixelScheme::Ring => self.ang2pix_ring(z, tt),
            PixelScheme::Nest => self.ang2pix_nest(z, tt),
        })
    }
}
