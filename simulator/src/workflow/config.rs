use std::fs;
use std::path::Path;

use anyhow::Context;
use qccore::prelude::{ScanDirection, SweepConfig};
use qccore::scoring::{
    CombineRole, FeatureKind, InterestFunction, ScoreComparison, Scorer, ScorerGroup,
};
use qccore::terrain::{TerrainMask, TerrainType, TerrainUse};
use serde::{Deserialize, Serialize};

use crate::generator::volume::GeneratorConfig;

/// Six control points and a fusion weight, the YAML shape of every
/// piecewise-linear function in a workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub x: [f64; 6],
    pub y: [f64; 6],
    pub weight: f64,
}

impl FunctionConfig {
    pub fn build(&self) -> anyhow::Result<InterestFunction> {
        InterestFunction::new(self.x, self.y, self.weight)
            .context("building interest function")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScorerFunctionConfig {
    pub feature: FeatureKind,
    #[serde(flatten)]
    pub interest: FunctionConfig,
    #[serde(default)]
    pub confidence: Option<FunctionConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub name: String,
    pub threshold: f64,
    pub comparison: ScoreComparison,
    pub role: CombineRole,
    pub terrain_use: TerrainUse,
    pub az_radius: usize,
    #[serde(default)]
    pub low_dbz_threshold: Option<f64>,
    pub functions: Vec<ScorerFunctionConfig>,
}

impl ScorerConfig {
    fn build(&self) -> anyhow::Result<Scorer> {
        let mut scorer = Scorer::new(
            &self.name,
            self.threshold,
            self.comparison,
            self.role,
            self.terrain_use,
            self.az_radius,
        );
        if let Some(threshold) = self.low_dbz_threshold {
            scorer.set_low_dbz_override(threshold);
        }
        for function in &self.functions {
            let interest = function.interest.build().with_context(|| {
                format!("scorer {} feature {:?}", self.name, function.feature)
            })?;
            let confidence = function
                .confidence
                .as_ref()
                .map(FunctionConfig::build)
                .transpose()
                .with_context(|| {
                    format!("scorer {} confidence for {:?}", self.name, function.feature)
                })?;
            scorer.set_function(function.feature, interest, confidence);
        }
        Ok(scorer)
    }
}

/// Where the terrain raster comes from. Real deployments would load a map
/// product; the driver synthesizes the same shapes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TerrainConfig {
    UniformLand,
    UniformWater,
    /// A contiguous azimuth span of water, coastline boundaries fuzzed.
    Coastline { water_start: f64, water_end: f64 },
}

impl TerrainConfig {
    pub fn build(&self, sweep: &SweepConfig) -> TerrainMask {
        let buckets = sweep.terrain_buckets();
        let gates = sweep.max_gates;
        let delta = sweep.delta_azimuth;
        match self {
            TerrainConfig::UniformLand => {
                TerrainMask::uniform(buckets, gates, delta, TerrainType::Land)
            }
            TerrainConfig::UniformWater => {
                TerrainMask::uniform(buckets, gates, delta, TerrainType::Water)
            }
            TerrainConfig::Coastline {
                water_start,
                water_end,
            } => TerrainMask::build(buckets, gates, delta, |bucket, _gate| {
                let azimuth = bucket as f64 * delta;
                Some(azimuth >= *water_start && azimuth < *water_end)
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub sweep: SweepConfig,
    pub scorers: Vec<ScorerConfig>,
    pub filter_fields: Vec<String>,
    pub range_weight: FunctionConfig,
    pub terrain: TerrainConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Default single-scorer workflow over a generated volume: texture plus
    /// spin tuned to the generator's clutter patch.
    pub fn from_args(sweeps: usize, beams: usize, gates: usize, seed: u64) -> Self {
        let delta_azimuth = 360.0 / beams.max(1) as f64;
        Self {
            sweep: SweepConfig {
                dbz_az_radius: 2,
                vel_az_radius: 1,
                dbz_gate_radius: 2,
                vel_gate_radius: 1,
                gate_spacing: 0.25,
                max_gates: gates,
                dbz_field: "DBZ".to_string(),
                vel_field: "VEL".to_string(),
                sw_field: "SW".to_string(),
                sc_spin_threshold: 4.0,
                ap_spin_threshold: 7.0,
                p_spin_threshold: 10.0,
                delta_azimuth,
                slant_range_dist: 1.0,
                scan_direction: ScanDirection::BottomUp,
            },
            scorers: vec![ScorerConfig {
                name: "ap".to_string(),
                threshold: 0.5,
                comparison: ScoreComparison::GreaterThan,
                role: CombineRole::Or,
                terrain_use: TerrainUse::All,
                az_radius: 2,
                low_dbz_threshold: None,
                functions: vec![
                    ScorerFunctionConfig {
                        feature: FeatureKind::Tdbz,
                        interest: FunctionConfig {
                            x: [0.0, 40.0, 80.0, 120.0, 160.0, 200.0],
                            y: [-1.0, -0.6, -0.2, 0.2, 0.6, 1.0],
                            weight: 1.0,
                        },
                        confidence: None,
                    },
                    ScorerFunctionConfig {
                        feature: FeatureKind::ApSpin,
                        interest: FunctionConfig {
                            x: [0.0, 15.0, 30.0, 45.0, 60.0, 75.0],
                            y: [-1.0, -0.6, -0.2, 0.2, 0.6, 1.0],
                            weight: 1.0,
                        },
                        confidence: None,
                    },
                ],
            }],
            filter_fields: vec!["DBZ".to_string(), "VEL".to_string(), "SW".to_string()],
            range_weight: FunctionConfig {
                x: [0.0, 60.0, 120.0, 180.0, 240.0, 300.0],
                y: [1.0; 6],
                weight: 1.0,
            },
            terrain: TerrainConfig::UniformLand,
            generator: GeneratorConfig {
                sweeps,
                beams,
                gates,
                seed,
                ..GeneratorConfig::default()
            },
        }
    }

    pub fn build_group(&self) -> anyhow::Result<ScorerGroup> {
        let scorers = self
            .scorers
            .iter()
            .map(ScorerConfig::build)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(ScorerGroup::new(scorers, self.filter_fields.clone()))
    }

    pub fn build_terrain(&self) -> TerrainMask {
        self.terrain.build(&self.sweep)
    }

    pub fn build_range_weight(&self) -> anyhow::Result<InterestFunction> {
        self.range_weight.build().context("building range weight")
    }
}
