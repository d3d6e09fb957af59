use anyhow::Context;
use qccore::radar_interface::{
    BeamData, BeamHeader, BeamMessage, FieldParams, RadarMessage, RadarParams, SweepFlags,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Configuration for generating a synthetic volume scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub sweeps: usize,
    pub beams: usize,
    pub gates: usize,
    /// Elevation of the lowest sweep, degrees.
    pub base_elevation: f64,
    pub elevation_step: f64,
    pub gate_spacing: f64,
    pub start_range: f64,
    pub noise: f64,
    pub seed: u64,
    /// Plant a clutter-like patch in the lowest sweep: strong reflectivity
    /// flipping gate to gate with near-zero velocity, the signature the
    /// scorers are tuned to catch.
    pub clutter_patch: bool,
    pub scenario: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            sweeps: 2,
            beams: 90,
            gates: 64,
            base_elevation: 0.5,
            elevation_step: 1.0,
            gate_spacing: 0.25,
            start_range: 0.25,
            noise: 0.5,
            seed: 0,
            clutter_patch: true,
            scenario: None,
        }
    }
}

impl GeneratorConfig {
    pub fn delta_azimuth(&self) -> f64 {
        360.0 / self.beams.max(1) as f64
    }

    fn patch_beams(&self) -> std::ops::Range<usize> {
        self.beams / 8..self.beams / 4
    }

    fn patch_gates(&self) -> std::ops::Range<usize> {
        self.gates / 8..self.gates / 2
    }
}

fn field_table() -> Vec<FieldParams> {
    vec![
        FieldParams::new("DBZ", "dBZ", 2, 0.5, -32.0),
        FieldParams::new("VEL", "m/s", 2, 0.01, -100.0),
        FieldParams::new("SW", "m/s", 2, 0.01, -100.0),
    ]
}

/// Builds one volume as the in-order message stream a live ingest would
/// deliver: start-of-volume flag, every sweep's beams lowest elevation
/// first, end-of-volume flag.
pub fn build_volume(config: &GeneratorConfig) -> anyhow::Result<Vec<RadarMessage>> {
    let beam_count = config
        .sweeps
        .checked_mul(config.beams)
        .context("overflow computing beam count for generator")?;
    if beam_count == 0 || config.gates == 0 {
        anyhow::bail!("generator needs at least one sweep, beam and gate");
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let params = field_table();
    let radar = RadarParams {
        gate_spacing: config.gate_spacing,
        start_range: config.start_range,
        noise_floor: -113.0,
        radar_constant: 66.0,
    };

    let mut messages = Vec::with_capacity(beam_count + 2);
    messages.push(RadarMessage::flags(SweepFlags::start_of_volume()));

    let mut time = 1_700_000_000_i64;
    for sweep in 0..config.sweeps {
        let elevation = config.base_elevation + sweep as f64 * config.elevation_step;
        for beam_idx in 0..config.beams {
            let azimuth = beam_idx as f64 * config.delta_azimuth();
            let in_patch_beam =
                config.clutter_patch && sweep == 0 && config.patch_beams().contains(&beam_idx);

            let mut dbz = Vec::with_capacity(config.gates);
            let mut vel = Vec::with_capacity(config.gates);
            let mut sw = Vec::with_capacity(config.gates);
            for gate in 0..config.gates {
                let jitter = rng.gen_range(-config.noise..config.noise);
                if in_patch_beam && config.patch_gates().contains(&gate) {
                    // Gate-to-gate reflectivity flips with stationary,
                    // narrow returns.
                    let flip = if gate % 2 == 0 { 18.0 } else { -18.0 };
                    dbz.push(params[0].encode(Some(32.0 + flip + jitter)));
                    vel.push(params[1].encode(Some(rng.gen_range(-0.3..0.3))));
                    sw.push(params[2].encode(Some(0.4)));
                } else {
                    // Smooth precipitation shield drifting with range.
                    let background = 24.0 - gate as f64 * 0.05;
                    dbz.push(params[0].encode(Some(background + jitter)));
                    vel.push(params[1].encode(Some(8.0 + jitter * 0.2)));
                    sw.push(params[2].encode(Some(2.0)));
                }
            }

            messages.push(RadarMessage::beam(BeamMessage {
                header: BeamHeader {
                    azimuth,
                    elevation,
                    sweep_num: sweep as i32,
                    volume_num: 1,
                    time,
                    n_gates: config.gates,
                },
                radar,
                data: BeamData::from_raw(params.clone(), config.gates, &[dbz, vel, sw]),
            }));
            time += 1;
        }
    }

    messages.push(RadarMessage::flags(SweepFlags::end_of_volume()));
    Ok(messages)
}
