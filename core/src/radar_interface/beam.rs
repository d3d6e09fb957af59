use serde::{Deserialize, Serialize};

/// Per-field encoding parameters carried with every beam.
///
/// Gate values travel as scaled integers; `raw * scale + bias` recovers the
/// physical value and a raw equal to `missing` decodes to absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldParams {
    pub name: String,
    pub units: String,
    /// Storage width in bytes; 1, 2 and 4 are supported.
    pub byte_width: usize,
    pub scale: f64,
    pub bias: f64,
    /// Raw value reserved for missing data.
    pub missing: u32,
}

impl FieldParams {
    pub fn new(name: &str, units: &str, byte_width: usize, scale: f64, bias: f64) -> Self {
        let missing = match byte_width {
            1 => u8::MAX as u32,
            2 => u16::MAX as u32,
            _ => u32::MAX,
        };
        Self {
            name: name.to_string(),
            units: units.to_string(),
            byte_width,
            scale,
            bias,
            missing,
        }
    }

    /// Largest raw value representable at this byte width.
    pub fn max_raw(&self) -> u32 {
        match self.byte_width {
            1 => u8::MAX as u32,
            2 => u16::MAX as u32,
            _ => u32::MAX,
        }
    }

    pub fn decode(&self, raw: u32) -> Option<f64> {
        if raw == self.missing {
            None
        } else {
            Some(raw as f64 * self.scale + self.bias)
        }
    }

    /// Quantizes a physical value for emission. In-range values land on
    /// `[0, max_raw - 1]`; absent values map to the missing raw.
    pub fn encode(&self, value: Option<f64>) -> u32 {
        match value {
            None => self.missing,
            Some(v) => {
                let scaled = ((v - self.bias) / self.scale).round();
                let top = (self.max_raw() - 1) as f64;
                scaled.clamp(0.0, top) as u32
            }
        }
    }
}

/// Radar-level parameters that must hold for a whole sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadarParams {
    /// Gate spacing in km.
    pub gate_spacing: f64,
    /// Range to the first gate in km.
    pub start_range: f64,
    /// Receiver minimum detectable signal in dBm, used by the
    /// vertical-gradient fallback model.
    pub noise_floor: f64,
    pub radar_constant: f64,
}

/// Identity of one beam within the volume scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamHeader {
    /// Azimuth in degrees, [0, 360].
    pub azimuth: f64,
    /// Elevation in degrees.
    pub elevation: f64,
    pub sweep_num: i32,
    pub volume_num: i32,
    /// Unix seconds.
    pub time: i64,
    /// Real gate count of this beam; may vary beam to beam.
    pub n_gates: usize,
}

/// Field-major raw gate storage for one beam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamData {
    params: Vec<FieldParams>,
    n_gates: usize,
    raw: Vec<u32>,
}

impl BeamData {
    /// Allocates a beam with every gate set to each field's missing raw.
    pub fn filled_missing(params: Vec<FieldParams>, n_gates: usize) -> Self {
        let mut raw = Vec::with_capacity(params.len() * n_gates);
        for field in &params {
            raw.extend(std::iter::repeat(field.missing).take(n_gates));
        }
        Self {
            params,
            n_gates,
            raw,
        }
    }

    /// Builds a beam from per-field raw gate slices.
    pub fn from_raw(params: Vec<FieldParams>, n_gates: usize, fields: &[Vec<u32>]) -> Self {
        let mut beam = Self::filled_missing(params, n_gates);
        for (field_idx, gates) in fields.iter().enumerate() {
            for (gate, &value) in gates.iter().enumerate().take(n_gates) {
                beam.set_raw(field_idx, gate, value);
            }
        }
        beam
    }

    pub fn n_fields(&self) -> usize {
        self.params.len()
    }

    pub fn n_gates(&self) -> usize {
        self.n_gates
    }

    pub fn params(&self) -> &[FieldParams] {
        &self.params
    }

    /// Uniform byte width across fields, or `None` when fields disagree.
    pub fn uniform_byte_width(&self) -> Option<usize> {
        let first = self.params.first()?.byte_width;
        if self.params.iter().all(|p| p.byte_width == first) {
            Some(first)
        } else {
            None
        }
    }

    pub fn raw(&self, field: usize, gate: usize) -> u32 {
        self.raw[field * self.n_gates + gate]
    }

    pub fn set_raw(&mut self, field: usize, gate: usize, raw: u32) {
        self.raw[field * self.n_gates + gate] = raw;
    }

    /// Decoded value at (field, gate); out-of-bounds reads are absent, which
    /// lets windowed loops run without special-casing the buffer edges.
    pub fn value(&self, field: usize, gate: usize) -> Option<f64> {
        if field >= self.params.len() || gate >= self.n_gates {
            return None;
        }
        self.params[field].decode(self.raw(field, gate))
    }

    pub fn set_missing(&mut self, field: usize, gate: usize) {
        let missing = self.params[field].missing;
        self.set_raw(field, gate, missing);
    }

    /// Copies the other beam's gates into this one. Shapes must match; the
    /// sweep buffer only pairs beams it allocated itself.
    pub fn copy_contents(&mut self, other: &BeamData) {
        debug_assert_eq!(self.raw.len(), other.raw.len());
        self.raw.copy_from_slice(&other.raw);
    }

    /// Re-expands this beam to a target gate count, padding with missing.
    pub fn padded_to(&self, n_gates: usize) -> BeamData {
        let mut padded = BeamData::filled_missing(self.params.clone(), n_gates);
        let copy_gates = self.n_gates.min(n_gates);
        for field in 0..self.params.len() {
            for gate in 0..copy_gates {
                padded.set_raw(field, gate, self.raw(field, gate));
            }
        }
        padded
    }

    /// Index of the named field, if present.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

/// One data beam as delivered by the inbound stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamMessage {
    pub header: BeamHeader,
    pub radar: RadarParams,
    pub data: BeamData,
}
