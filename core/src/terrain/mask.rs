use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::prelude::{QcError, QcResult};

/// Classification of one terrain raster cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerrainType {
    Land,
    Water,
    /// Near a land/water boundary; eligible for both restricted modes.
    Fuzzy,
    Missing,
}

/// Where a scorer is allowed to operate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerrainUse {
    LandOnly,
    WaterOnly,
    All,
}

impl TerrainUse {
    pub fn eligible(&self, terrain: TerrainType) -> bool {
        match self {
            TerrainUse::All => true,
            TerrainUse::LandOnly => {
                matches!(terrain, TerrainType::Land | TerrainType::Fuzzy)
            }
            TerrainUse::WaterOnly => {
                matches!(terrain, TerrainType::Water | TerrainType::Fuzzy)
            }
        }
    }
}

/// Precomputed land/water raster addressed by (azimuth bucket, gate).
///
/// Built once at startup and shared read-only by every scorer.
pub struct TerrainMask {
    raster: Array2<TerrainType>,
    delta_azimuth: f64,
}

impl TerrainMask {
    /// Nearest-neighbor classification from an external raster source, then a
    /// second pass marking boundary cells Fuzzy. The source answers
    /// `Some(true)` for water, `Some(false)` for land, `None` where the
    /// raster has no coverage.
    pub fn build<F>(buckets: usize, gates: usize, delta_azimuth: f64, source: F) -> Self
    where
        F: Fn(usize, usize) -> Option<bool>,
    {
        let mut raster = Array2::from_elem((buckets, gates), TerrainType::Missing);
        for bucket in 0..buckets {
            for gate in 0..gates {
                raster[[bucket, gate]] = match source(bucket, gate) {
                    Some(true) => TerrainType::Water,
                    Some(false) => TerrainType::Land,
                    None => TerrainType::Missing,
                };
            }
        }

        // Boundary pass: azimuth wraps, range clamps.
        let nearest = raster.clone();
        for bucket in 0..buckets {
            for gate in 0..gates {
                let cell = nearest[[bucket, gate]];
                if cell == TerrainType::Missing {
                    continue;
                }
                let mut neighbors = vec![
                    nearest[[(bucket + 1) % buckets, gate]],
                    nearest[[(bucket + buckets - 1) % buckets, gate]],
                ];
                if gate + 1 < gates {
                    neighbors.push(nearest[[bucket, gate + 1]]);
                }
                if gate > 0 {
                    neighbors.push(nearest[[bucket, gate - 1]]);
                }
                let mixed = neighbors
                    .iter()
                    .any(|&n| n != TerrainType::Missing && n != cell);
                if mixed {
                    raster[[bucket, gate]] = TerrainType::Fuzzy;
                }
            }
        }

        Self {
            raster,
            delta_azimuth,
        }
    }

    /// Single-class raster; used when no terrain source is configured.
    pub fn uniform(buckets: usize, gates: usize, delta_azimuth: f64, fill: TerrainType) -> Self {
        Self {
            raster: Array2::from_elem((buckets, gates), fill),
            delta_azimuth,
        }
    }

    pub fn n_gates(&self) -> usize {
        self.raster.ncols()
    }

    pub fn n_buckets(&self) -> usize {
        self.raster.nrows()
    }

    /// Fails a sweep whose gate count the raster cannot cover.
    pub fn check_gate_count(&self, max_gates: usize) -> QcResult<()> {
        if max_gates > self.n_gates() {
            return Err(QcError::TerrainShape(format!(
                "raster covers {} gates, sweep needs {}",
                self.n_gates(),
                max_gates
            )));
        }
        Ok(())
    }

    pub fn classify(&self, azimuth: f64, gate: usize) -> TerrainType {
        if gate >= self.n_gates() {
            return TerrainType::Missing;
        }
        let bucket = (azimuth / self.delta_azimuth) as usize % self.n_buckets();
        self.raster[[bucket, gate]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Water beyond gate 4, land inside, in every bucket.
    fn coastline_mask() -> TerrainMask {
        TerrainMask::build(8, 10, 45.0, |_bucket, gate| Some(gate >= 5))
    }

    #[test]
    fn coastline_classifies_land_water_and_boundary() {
        let mask = coastline_mask();
        assert_eq!(mask.classify(0.0, 0), TerrainType::Land);
        assert_eq!(mask.classify(90.0, 9), TerrainType::Water);
        // Gates 4 and 5 straddle the coast in range.
        assert_eq!(mask.classify(180.0, 4), TerrainType::Fuzzy);
        assert_eq!(mask.classify(180.0, 5), TerrainType::Fuzzy);
    }

    #[test]
    fn fuzzy_detection_wraps_in_azimuth() {
        // Water only in bucket 0; buckets 7 and 1 must see the boundary.
        let mask = TerrainMask::build(8, 1, 45.0, |bucket, _gate| Some(bucket == 0));
        assert_eq!(mask.classify(0.0, 0), TerrainType::Fuzzy);
        assert_eq!(mask.classify(46.0, 0), TerrainType::Fuzzy);
        assert_eq!(mask.classify(350.0, 0), TerrainType::Fuzzy);
        assert_eq!(mask.classify(100.0, 0), TerrainType::Land);
    }

    #[test]
    fn missing_cells_stay_missing() {
        let mask = TerrainMask::build(4, 2, 90.0, |bucket, _gate| {
            if bucket == 0 {
                None
            } else {
                Some(false)
            }
        });
        assert_eq!(mask.classify(10.0, 0), TerrainType::Missing);
        assert_eq!(mask.classify(100.0, 1), TerrainType::Land);
    }

    #[test]
    fn out_of_range_gate_is_missing() {
        let mask = coastline_mask();
        assert_eq!(mask.classify(0.0, 10), TerrainType::Missing);
    }

    #[test]
    fn eligibility_rules() {
        assert!(TerrainUse::LandOnly.eligible(TerrainType::Land));
        assert!(TerrainUse::LandOnly.eligible(TerrainType::Fuzzy));
        assert!(!TerrainUse::LandOnly.eligible(TerrainType::Water));
        assert!(!TerrainUse::LandOnly.eligible(TerrainType::Missing));
        assert!(TerrainUse::WaterOnly.eligible(TerrainType::Water));
        assert!(!TerrainUse::WaterOnly.eligible(TerrainType::Land));
        assert!(TerrainUse::All.eligible(TerrainType::Missing));
    }

    #[test]
    fn gate_count_check_rejects_small_raster() {
        let mask = coastline_mask();
        assert!(mask.check_gate_count(10).is_ok());
        assert!(mask.check_gate_count(11).is_err());
    }
}
