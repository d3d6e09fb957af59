use serde::{Deserialize, Serialize};

/// Elevation ordering of sweeps within a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    /// Sweeps arrive lowest elevation first; the vertical neighbor of a
    /// sweep is the one that follows it.
    BottomUp,
    /// Sweeps arrive highest elevation first; the vertical neighbor of a
    /// sweep is the one that preceded it.
    TopDown,
}

/// Shared geometry and thresholds for sweep processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Azimuth radius (beams) of the reflectivity window.
    pub dbz_az_radius: usize,
    /// Azimuth radius (beams) of the velocity/spectrum-width window.
    pub vel_az_radius: usize,
    /// Gate radius of the reflectivity window.
    pub dbz_gate_radius: usize,
    /// Gate radius of the velocity/spectrum-width window.
    pub vel_gate_radius: usize,
    /// Gate spacing in km; beams whose spacing differs are rejected.
    pub gate_spacing: f64,
    /// Maximum gate count; shorter beams are padded with missing.
    pub max_gates: usize,
    pub dbz_field: String,
    pub vel_field: String,
    pub sw_field: String,
    /// Spin excursion threshold (dBZ) for the sea-clutter variant.
    pub sc_spin_threshold: f64,
    /// Spin excursion threshold (dBZ) for the AP variant.
    pub ap_spin_threshold: f64,
    /// Spin excursion threshold (dBZ) for the precipitation variant.
    pub p_spin_threshold: f64,
    /// Nominal beam width in degrees; also the terrain bucket width.
    pub delta_azimuth: f64,
    /// Down-range distance (km) used by the SRDZ feature.
    pub slant_range_dist: f64,
    pub scan_direction: ScanDirection,
}

impl SweepConfig {
    /// Widest azimuth radius across the configured windows; this sizes the
    /// replicated wraparound margin of the sweep buffer.
    pub fn max_az_radius(&self) -> usize {
        self.dbz_az_radius.max(self.vel_az_radius)
    }

    /// Number of gates spanned by the SRDZ down-range offset.
    pub fn slant_range_gates(&self) -> usize {
        (self.slant_range_dist / self.gate_spacing + 0.5) as usize
    }

    /// Azimuth bucket count of the terrain raster.
    pub fn terrain_buckets(&self) -> usize {
        (360.0 / self.delta_azimuth).round() as usize
    }

    /// Neighbor beams whose azimuth differs more than this are treated as
    /// evidence of a missing beam and skipped by windowed sums.
    pub fn azimuth_gap_tolerance(&self) -> f64 {
        1.5 * self.delta_azimuth
    }
}

/// Common error type for the QC engine.
#[derive(thiserror::Error, Debug)]
pub enum QcError {
    #[error("invalid interest function: {0}")]
    InvalidFunction(String),
    #[error("data shape mismatch: {0}")]
    DataShape(String),
    #[error("bad sample: {0}")]
    BadSample(String),
    #[error("terrain raster mismatch: {0}")]
    TerrainShape(String),
    #[error("emission failed: {0}")]
    Emission(String),
}

pub type QcResult<T> = Result<T, QcError>;
