use serde::{Deserialize, Serialize};

use crate::prelude::QcResult;
use crate::radar_interface::beam::{BeamData, BeamHeader, BeamMessage, FieldParams};
use crate::radar_interface::message::{MessageSink, RadarMessage, SweepFlags};
use crate::scoring::scorer::SweepMeta;

/// Derived feature types scored per gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureKind {
    /// Texture: mean squared consecutive-gate reflectivity difference.
    Tdbz,
    /// Vertical reflectivity gradient against the adjacent sweep.
    Gdz,
    /// Range-weighted vertical gradient.
    Rgdz,
    /// Vertical gradient normalized by slant range and elevation separation.
    Rsinz,
    /// Down-range reflectivity difference along the beam, range-weighted.
    Srdz,
    /// Median velocity over the smoothing window.
    Mve,
    /// Standard deviation of median velocity.
    Sdve,
    /// Median spectrum width.
    Msw,
    /// Standard deviation of median spectrum width.
    Sdsw,
    /// Spin at the sea-clutter threshold.
    ScSpin,
    /// Spin at the AP threshold.
    ApSpin,
    /// Spin at the precipitation threshold.
    PSpin,
    /// Mean signum of consecutive reflectivity differences.
    Sign,
}

pub const N_FEATURE_KINDS: usize = 13;

impl FeatureKind {
    pub const ALL: [FeatureKind; N_FEATURE_KINDS] = [
        FeatureKind::Tdbz,
        FeatureKind::Gdz,
        FeatureKind::Rgdz,
        FeatureKind::Rsinz,
        FeatureKind::Srdz,
        FeatureKind::Mve,
        FeatureKind::Sdve,
        FeatureKind::Msw,
        FeatureKind::Sdsw,
        FeatureKind::ScSpin,
        FeatureKind::ApSpin,
        FeatureKind::PSpin,
        FeatureKind::Sign,
    ];

    pub fn index(self) -> usize {
        match self {
            FeatureKind::Tdbz => 0,
            FeatureKind::Gdz => 1,
            FeatureKind::Rgdz => 2,
            FeatureKind::Rsinz => 3,
            FeatureKind::Srdz => 4,
            FeatureKind::Mve => 5,
            FeatureKind::Sdve => 6,
            FeatureKind::Msw => 7,
            FeatureKind::Sdsw => 8,
            FeatureKind::ScSpin => 9,
            FeatureKind::ApSpin => 10,
            FeatureKind::PSpin => 11,
            FeatureKind::Sign => 12,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FeatureKind::Tdbz => "TDBZ",
            FeatureKind::Gdz => "GDZ",
            FeatureKind::Rgdz => "RGDZ",
            FeatureKind::Rsinz => "RSINZ",
            FeatureKind::Srdz => "SRDZ",
            FeatureKind::Mve => "MVE",
            FeatureKind::Sdve => "SDVE",
            FeatureKind::Msw => "MSW",
            FeatureKind::Sdsw => "SDSW",
            FeatureKind::ScSpin => "SC_SPIN",
            FeatureKind::ApSpin => "AP_SPIN",
            FeatureKind::PSpin => "P_SPIN",
            FeatureKind::Sign => "SIGN",
        }
    }

    pub fn units(self) -> &'static str {
        match self {
            FeatureKind::Tdbz => "dBZ^2",
            FeatureKind::Gdz | FeatureKind::Rgdz | FeatureKind::Srdz => "dBZ",
            FeatureKind::Rsinz => "dBZ/km",
            FeatureKind::Mve | FeatureKind::Sdve => "m/s",
            FeatureKind::Msw | FeatureKind::Sdsw => "m/s",
            FeatureKind::ScSpin | FeatureKind::ApSpin | FeatureKind::PSpin => "%",
            FeatureKind::Sign => "none",
        }
    }

    /// (scale, bias) tuned to each feature's expected data range for the
    /// two-byte diagnostic stream.
    pub fn quantization(self) -> (f64, f64) {
        match self {
            FeatureKind::Tdbz => (0.02, 0.0),
            FeatureKind::Gdz | FeatureKind::Rgdz | FeatureKind::Srdz => (0.01, -100.0),
            FeatureKind::Rsinz => (0.05, -1000.0),
            FeatureKind::Mve => (0.01, -100.0),
            FeatureKind::Msw => (0.01, -100.0),
            FeatureKind::Sdve | FeatureKind::Sdsw => (0.001, 0.0),
            FeatureKind::ScSpin | FeatureKind::ApSpin | FeatureKind::PSpin => (0.01, 0.0),
            FeatureKind::Sign => (0.0001, -1.0),
        }
    }

    pub fn field_params(self) -> FieldParams {
        let (scale, bias) = self.quantization();
        FieldParams::new(self.name(), self.units(), 2, scale, bias)
    }
}

struct FeatureBeam {
    azimuth: f64,
    /// `[kind][gate]`
    values: Vec<Vec<Option<f64>>>,
}

/// Buffers raw derived-feature values per beam for the optional feature
/// diagnostic stream.
pub struct FeatureRecorder {
    sink: Option<Box<dyn MessageSink>>,
    max_gates: usize,
    beams: Vec<FeatureBeam>,
}

impl FeatureRecorder {
    pub fn new(sink: Option<Box<dyn MessageSink>>) -> Self {
        Self {
            sink,
            max_gates: 0,
            beams: Vec::new(),
        }
    }

    pub fn begin_sweep(&mut self, max_gates: usize) {
        self.max_gates = max_gates;
        self.beams.clear();
    }

    pub fn begin_beam(&mut self, azimuth: f64) {
        self.beams.push(FeatureBeam {
            azimuth,
            values: vec![vec![None; self.max_gates]; N_FEATURE_KINDS],
        });
    }

    /// Records a feature value for the current beam.
    pub fn record(&mut self, kind: FeatureKind, gate: usize, value: f64) {
        if let Some(beam) = self.beams.last_mut() {
            if gate < self.max_gates {
                beam.values[kind.index()][gate] = Some(value);
            }
        }
    }

    pub fn value(&self, kind: FeatureKind, beam: usize, gate: usize) -> Option<f64> {
        self.beams.get(beam)?.values[kind.index()].get(gate).copied()?
    }

    /// Forwards a boundary flag to the feature stream, if configured.
    pub fn put_flags(&mut self, flags: SweepFlags) -> QcResult<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.put_message(RadarMessage::flags(flags))?;
        }
        Ok(())
    }

    /// Emits one quantized message per beam to the feature stream.
    pub fn write(&mut self, meta: &SweepMeta) -> QcResult<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let params: Vec<FieldParams> = FeatureKind::ALL.iter().map(|k| k.field_params()).collect();
        for beam in &self.beams {
            let mut data = BeamData::filled_missing(params.clone(), self.max_gates);
            for kind in FeatureKind::ALL {
                let field = kind.index();
                for gate in 0..self.max_gates {
                    let raw = params[field].encode(beam.values[field][gate]);
                    data.set_raw(field, gate, raw);
                }
            }
            let header = BeamHeader {
                azimuth: beam.azimuth,
                elevation: meta.elevation,
                sweep_num: meta.sweep_num,
                volume_num: meta.volume_num,
                time: meta.end_time,
                n_gates: self.max_gates,
            };
            sink.put_message(RadarMessage::beam(BeamMessage {
                header,
                radar: meta.radar,
                data,
            }))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar_interface::beam::RadarParams;
    use crate::radar_interface::message::SharedVecSink;

    fn meta() -> SweepMeta {
        SweepMeta {
            elevation: 0.5,
            sweep_num: 0,
            volume_num: 7,
            start_time: 100,
            end_time: 160,
            radar: RadarParams {
                gate_spacing: 0.25,
                start_range: 0.125,
                noise_floor: -113.0,
                radar_constant: 66.0,
            },
        }
    }

    #[test]
    fn recorded_values_reach_the_feature_stream_quantized() {
        let stream = SharedVecSink::new();
        let mut recorder = FeatureRecorder::new(Some(Box::new(stream.clone())));
        recorder.begin_sweep(4);
        recorder.begin_beam(10.0);
        recorder.record(FeatureKind::Tdbz, 2, 150.0);
        recorder.record(FeatureKind::ScSpin, 1, 45.0);
        recorder.write(&meta()).unwrap();

        let messages = stream.messages();
        assert_eq!(messages.len(), 1);
        let beam = messages[0].beam.as_ref().unwrap();
        assert_eq!(beam.header.azimuth, 10.0);

        let tdbz = beam.data.field_index("TDBZ").unwrap();
        let spin = beam.data.field_index("SC_SPIN").unwrap();
        let tdbz_val = beam.data.value(tdbz, 2).unwrap();
        assert!((tdbz_val - 150.0).abs() <= FeatureKind::Tdbz.quantization().0);
        let spin_val = beam.data.value(spin, 1).unwrap();
        assert!((spin_val - 45.0).abs() <= FeatureKind::ScSpin.quantization().0);
        // Everything unrecorded is missing.
        assert_eq!(beam.data.value(tdbz, 0), None);
        assert_eq!(beam.data.value(spin, 3), None);
    }

    #[test]
    fn flags_pass_through_to_the_stream() {
        let stream = SharedVecSink::new();
        let mut recorder = FeatureRecorder::new(Some(Box::new(stream.clone())));
        recorder.put_flags(SweepFlags::start_of_volume()).unwrap();
        assert_eq!(stream.len(), 1);
        assert!(stream.messages()[0].flags.unwrap().start_of_volume);
    }

    #[test]
    fn quantization_tables_cover_expected_ranges() {
        // Spin runs 0..100 percent; the two-byte field must hold both ends.
        let p = FeatureKind::ScSpin.field_params();
        let low = p.decode(p.encode(Some(0.0))).unwrap();
        let high = p.decode(p.encode(Some(100.0))).unwrap();
        assert!((low - 0.0).abs() <= p.scale);
        assert!((high - 100.0).abs() <= p.scale);
        // Sign runs -1..1.
        let p = FeatureKind::Sign.field_params();
        let low = p.decode(p.encode(Some(-1.0))).unwrap();
        assert!((low + 1.0).abs() <= p.scale);
    }

    #[test]
    fn missing_features_emit_missing_raw() {
        let mut recorder = FeatureRecorder::new(None);
        recorder.begin_sweep(2);
        recorder.begin_beam(0.0);
        assert_eq!(recorder.value(FeatureKind::Gdz, 0, 0), None);
    }
}
