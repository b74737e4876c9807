//! Finds the pairs of forests that lie within the angular budget.
//!
//! Rather than relying upon the geometry of a particular pixelization, we
//! enclose the lines of sight of every non-empty pixel in a bounding cap (the
//! mean direction plus the largest angle between that direction and any
//! member). Two pixels can only hold a pair of forests separated by less than
//! `angmax` if their centers are separated by no more than
//! `angmax + radius_p + radius_q` (triangle inequality on the sphere). This
//! makes the candidate search exact in the sense that no pair within the
//! budget is ever missed; the individual pairs are then filtered with their
//! exact separation.

use crate::forest::Forest;
use crate::pixelization::PixelId;
use crate::spatial_index::{PixelBuckets, Samples};
use forestpair_internal::{PairKind, angular_separation, mean_direction};
use std::collections::BTreeMap;
use std::f64::consts::PI;

#[derive(Clone, Copy, Debug)]
struct Cap {
    center: [f64; 3],
    radius: f64,
}

fn bounding_caps(buckets: &PixelBuckets) -> BTreeMap<PixelId, Cap> {
    buckets
        .iter()
        .map(|(pixel, forests)| {
            // an arbitrary center still produces a valid cap
            let center = mean_direction(forests.iter().map(|f| f.unit_vector()))
                .unwrap_or(*forests[0].unit_vector());
            let radius = forests
                .iter()
                .map(|f| angular_separation(&center, f.unit_vector()))
                .fold(0.0, f64::max);
            (pixel, Cap { center, radius })
        })
        .collect()
}

/// A forest paired with the one currently under consideration
#[derive(Clone, Copy, Debug)]
pub struct Neighbor<'a> {
    pub forest: &'a Forest,
    /// angular separation between the lines of sight (radians)
    pub angle: f64,
}

/// Enumerates the forest pairs whose lines of sight are closer than `angmax`.
///
/// The pairs are always enumerated from the perspective of a forest of the
/// first sample:
/// - for an auto-correlation, every unordered pair of distinct forests is
///   produced exactly once. A forest is paired with the forests that follow
///   it in its own pixel and with every forest of the candidate pixels with
///   a larger pixel id.
/// - for a cross-correlation, a forest is paired with every forest of the
///   second sample in the candidate pixels (including the pixel with the same
///   id), except for forests built from the same object.
pub struct NeighborFinder<'a> {
    samples: &'a Samples,
    angmax: f64,
    candidates: BTreeMap<PixelId, Vec<PixelId>>,
}

impl<'a> NeighborFinder<'a> {
    pub fn new(samples: &'a Samples, angmax: f64) -> Self {
        let kind = samples.kind();
        let caps1 = bounding_caps(samples.first());
        let caps2 = match kind {
            PairKind::Auto => None,
            PairKind::Cross => Some(bounding_caps(samples.second())),
        };
        let caps2 = caps2.as_ref().unwrap_or(&caps1);

        let mut candidates = BTreeMap::new();
        let mut n_candidates = 0;
        for (p, cap_p) in caps1.iter() {
            let list: Vec<PixelId> = caps2
                .iter()
                .filter(|(q, _)| kind == PairKind::Cross || *q > p)
                .filter(|(_, cap_q)| {
                    angular_separation(&cap_p.center, &cap_q.center)
                        <= angmax + cap_p.radius + cap_q.radius
                })
                .map(|(q, _)| *q)
                .collect();
            n_candidates += list.len();
            candidates.insert(*p, list);
        }
        tracing::debug!(
            n_pixels = candidates.len(),
            n_candidates,
            angmax,
            "built the neighbor-pixel lists"
        );

        Self {
            samples,
            angmax,
            candidates,
        }
    }

    pub fn angmax(&self) -> f64 {
        self.angmax
    }

    pub fn kind(&self) -> PairKind {
        self.samples.kind()
    }

    pub fn samples(&self) -> &'a Samples {
        self.samples
    }

    /// The pixels of the second sample that are searched for neighbors of the
    /// forests in `pixel` (excluding `pixel` itself for auto-correlations)
    pub fn candidate_pixels(&self, pixel: PixelId) -> &[PixelId] {
        self.candidates
            .get(&pixel)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    #[inline]
    fn within_budget(&self, angle: f64) -> bool {
        angle < self.angmax || self.angmax >= PI
    }

    /// Find the neighbors of the `index`-th forest of `pixel` (in the first
    /// sample).
    ///
    /// `out` is cleared first. The order of the neighbors is deterministic.
    pub fn forest_neighbors(&self, pixel: PixelId, index: usize, out: &mut Vec<Neighbor<'a>>) {
        out.clear();
        let samples: &'a Samples = self.samples;
        let Some(forest) = samples.first().get(pixel).get(index) else {
            return;
        };
        let uv = forest.unit_vector();

        let mut consider = |other: &'a Forest| {
            let angle = angular_separation(uv, other.unit_vector());
            if self.within_budget(angle) {
                out.push(Neighbor {
                    forest: other,
                    angle,
                });
            }
        };

        match samples.kind() {
            PairKind::Auto => {
                for other in samples.first().get(pixel)[index + 1..].iter() {
                    consider(other);
                }
                for q in self.candidate_pixels(pixel) {
                    for other in samples.first().get(*q) {
                        consider(other);
                    }
                }
            }
            PairKind::Cross => {
                for q in self.candidate_pixels(pixel) {
                    for other in samples.second().get(*q) {
                        if other.id() != forest.id() {
                            consider(other);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::{DerivationParams, Spectrum};
    use crate::pixelization::{Healpix, PixelScheme};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn build(positions: &[(i64, f64, f64)], nside: u32) -> PixelBuckets {
        let hp = Healpix::new(nside, PixelScheme::Ring).unwrap();
        let params = DerivationParams {
            lambda_abs: 1215.67,
            z_ref: 2.25,
            z_evol: 2.9,
            project: false,
        };
        let spectra = positions.iter().map(|(id, ra, dec)| {
            Arc::new(Spectrum::new(*id, *ra, *dec, vec![3.6], vec![0.0], vec![1.0], None).unwrap())
        });
        PixelBuckets::build(spectra, None, &params, &|z: f64| 1000.0 * z, &hp).unwrap()
    }

    fn all_pairs(finder: &NeighborFinder) -> Vec<(i64, i64)> {
        let mut out = Vec::new();
        let mut buf = Vec::new();
        for (pixel, forests) in finder.samples.first().iter() {
            for (index, forest) in forests.iter().enumerate() {
                finder.forest_neighbors(pixel, index, &mut buf);
                out.extend(buf.iter().map(|n| (forest.id(), n.forest.id())));
            }
        }
        out
    }

    // a grid of positions straddling many pixel boundaries
    fn grid_positions() -> Vec<(i64, f64, f64)> {
        let mut positions = Vec::new();
        let mut id = 0;
        for i in 0..30 {
            for j in 0..20 {
                let ra = 0.4 + 0.013 * i as f64 + 0.001 * (j % 3) as f64;
                let dec = -0.1 + 0.011 * j as f64;
                positions.push((id, ra, dec));
                id += 1;
            }
        }
        positions
    }

    fn brute_force(positions: &[(i64, f64, f64)], angmax: f64, auto: bool) -> BTreeSet<(i64, i64)> {
        let mut out = BTreeSet::new();
        for (id_a, ra_a, dec_a) in positions {
            for (id_b, ra_b, dec_b) in positions {
                if id_a == id_b || (auto && id_a > id_b) {
                    continue;
                }
                let a = forestpair_internal::unit_vector(*ra_a, *dec_a);
                let b = forestpair_internal::unit_vector(*ra_b, *dec_b);
                if angular_separation(&a, &b) < angmax {
                    out.insert((*id_a, *id_b));
                }
            }
        }
        out
    }

    #[test]
    fn auto_pairs_complete_and_unique() {
        let positions = grid_positions();
        let angmax = 0.03;
        for nside in [4, 16, 64] {
            let samples = Samples::Auto(build(&positions, nside));
            let finder = NeighborFinder::new(&samples, angmax);
            let pairs = all_pairs(&finder);
            let unordered: BTreeSet<(i64, i64)> =
                pairs.iter().map(|&(a, b)| (a.min(b), a.max(b))).collect();
            // each unordered pair is produced exactly once
            assert_eq!(unordered.len(), pairs.len(), "nside = {nside}");
            assert_eq!(unordered, brute_force(&positions, angmax, true), "nside = {nside}");
        }
    }

    #[test]
    fn cross_pairs_complete() {
        let positions = grid_positions();
        let angmax = 0.025;
        let samples = Samples::Cross(build(&positions, 32), build(&positions, 32));
        let finder = NeighborFinder::new(&samples, angmax);
        let pairs = all_pairs(&finder);
        let ordered: BTreeSet<(i64, i64)> = pairs.iter().copied().collect();
        assert_eq!(ordered.len(), pairs.len());
        // both orderings show up, same-object pairs never do
        assert_eq!(ordered, brute_force(&positions, angmax, false));
    }

    #[test]
    fn whole_sky_budget() {
        let positions = [(0, 0.1, 0.1), (1, 3.0, -0.5), (2, 5.0, 1.2)];
        let samples = Samples::Auto(build(&positions, 2));
        let finder = NeighborFinder::new(&samples, PI);
        assert_eq!(all_pairs(&finder).len(), 3);
    }

    #[test]
    fn out_of_range_queries() {
        let positions = [(0, 0.1, 0.1)];
        let samples = Samples::Auto(build(&positions, 2));
        let finder = NeighborFinder::new(&samples, 0.1);
        let mut buf = Vec::new();
        finder.forest_neighbors(1_000_000, 0, &mut buf);
        assert!(buf.is_empty());
        let pixel = samples.first().pixel_ids()[0];
        finder.forest_neighbors(pixel, 5, &mut buf);
        assert!(buf.is_empty());
        assert!(finder.candidate_pixels(pixel).is_empty());
    }
}
