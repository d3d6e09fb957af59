use serde::{Deserialize, Serialize};

use crate::prelude::QcResult;
use crate::radar_interface::beam::{BeamData, BeamHeader, BeamMessage, FieldParams, RadarParams};
use crate::radar_interface::message::{MessageSink, RadarMessage, SweepFlags};
use crate::scoring::feature::{FeatureKind, N_FEATURE_KINDS};
use crate::scoring::interest::{InterestFunction, INTEREST_BIAS, INTEREST_SCALE};
use crate::scoring::score_buffer::BeamScoreBuffer;
use crate::terrain::mask::{TerrainType, TerrainUse};

/// How a scorer's decision joins the group fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineRole {
    And,
    Or,
}

impl CombineRole {
    pub fn combine(self, acc: bool, decision: bool) -> bool {
        match self {
            CombineRole::And => acc && decision,
            CombineRole::Or => acc || decision,
        }
    }
}

/// Which side of the threshold marks a gate for suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreComparison {
    GreaterThan,
    LessThan,
}

/// Sweep-level identity attached to diagnostic emissions.
#[derive(Debug, Clone, Copy)]
pub struct SweepMeta {
    pub elevation: f64,
    pub sweep_num: i32,
    pub volume_num: i32,
    pub start_time: i64,
    pub end_time: i64,
    pub radar: RadarParams,
}

struct FeaturePair {
    interest: InterestFunction,
    confidence: Option<InterestFunction>,
}

/// One configured scoring pipeline (AP, sea clutter, precipitation...):
/// its own interest/confidence functions, fusion threshold, combination
/// role, terrain restriction, and optional low-reflectivity override.
pub struct Scorer {
    name: String,
    threshold: f64,
    comparison: ScoreComparison,
    role: CombineRole,
    terrain_use: TerrainUse,
    az_radius: usize,
    low_dbz_threshold: Option<f64>,
    functions: Vec<Option<FeaturePair>>,
    /// True once any confidence function is configured.
    apply_confidence: bool,
    max_gates: usize,
    beams: Vec<BeamScoreBuffer>,
    interest_sink: Option<Box<dyn MessageSink>>,
    confidence_sink: Option<Box<dyn MessageSink>>,
}

impl Scorer {
    pub fn new(
        name: &str,
        threshold: f64,
        comparison: ScoreComparison,
        role: CombineRole,
        terrain_use: TerrainUse,
        az_radius: usize,
    ) -> Self {
        let mut functions = Vec::with_capacity(N_FEATURE_KINDS);
        functions.resize_with(N_FEATURE_KINDS, || None);
        Self {
            name: name.to_string(),
            threshold,
            comparison,
            role,
            terrain_use,
            az_radius,
            low_dbz_threshold: None,
            functions,
            apply_confidence: false,
            max_gates: 0,
            beams: Vec::new(),
            interest_sink: None,
            confidence_sink: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> CombineRole {
        self.role
    }

    pub(crate) fn set_role(&mut self, role: CombineRole) {
        self.role = role;
    }

    pub fn az_radius(&self) -> usize {
        self.az_radius
    }

    pub fn set_function(
        &mut self,
        kind: FeatureKind,
        interest: InterestFunction,
        confidence: Option<InterestFunction>,
    ) {
        if confidence.is_some() {
            self.apply_confidence = true;
        }
        self.functions[kind.index()] = Some(FeaturePair {
            interest,
            confidence,
        });
    }

    /// Gates with reflectivity below this are never flagged.
    pub fn set_low_dbz_override(&mut self, threshold: f64) {
        self.low_dbz_threshold = Some(threshold);
    }

    pub fn set_interest_sink(&mut self, sink: Box<dyn MessageSink>) {
        self.interest_sink = Some(sink);
    }

    pub fn set_confidence_sink(&mut self, sink: Box<dyn MessageSink>) {
        self.confidence_sink = Some(sink);
    }

    pub fn begin_sweep(&mut self, max_gates: usize) {
        self.max_gates = max_gates;
        self.beams.clear();
    }

    pub fn begin_beam(&mut self, azimuth: f64) {
        self.beams.push(BeamScoreBuffer::new(azimuth, self.max_gates));
    }

    pub fn n_beams(&self) -> usize {
        self.beams.len()
    }

    /// Scores one feature value at a gate of the current beam. Skipped
    /// entirely, not recorded as zero, when the terrain is ineligible or the
    /// scorer has no function for the feature.
    pub fn score(&mut self, kind: FeatureKind, value: f64, gate: usize, terrain: TerrainType) {
        if !self.terrain_use.eligible(terrain) {
            return;
        }
        let Some(pair) = &self.functions[kind.index()] else {
            return;
        };
        let Some(beam) = self.beams.last_mut() else {
            return;
        };
        let interest = pair.interest.apply(Some(value));
        let (confidence, confidence_weight) = match &pair.confidence {
            Some(func) => (func.apply(Some(value)), func.weight()),
            None => (None, 0.0),
        };
        beam.record_score(
            kind,
            gate,
            interest,
            pair.interest.weight(),
            confidence,
            confidence_weight,
        );
    }

    /// Closes out a gate of the current beam, applying the low-reflectivity
    /// override when configured.
    pub fn finalize_gate(&mut self, gate: usize, dbz: Option<f64>) {
        let apply_confidence = self.apply_confidence;
        let low_dbz = self.low_dbz_threshold;
        let Some(beam) = self.beams.last_mut() else {
            return;
        };
        if let (Some(threshold), Some(dbz_val)) = (low_dbz, dbz) {
            if dbz_val < threshold {
                beam.force_final(gate, 0.0);
                return;
            }
        }
        beam.finalize(gate, apply_confidence);
    }

    /// Suppression decision for one gate. A missing fused score suppresses
    /// only for AND-role scorers, so a lone scorer that saw nothing never
    /// flags the gate.
    pub fn decide(&self, beam: usize, gate: usize) -> bool {
        let Some(score) = self
            .beams
            .get(beam)
            .and_then(|b| b.final_confidence(gate))
        else {
            return matches!(self.role, CombineRole::And);
        };
        match self.comparison {
            ScoreComparison::GreaterThan => score > self.threshold,
            ScoreComparison::LessThan => score < self.threshold,
        }
    }

    /// Forwards a boundary flag to both diagnostic streams.
    pub fn put_flags(&mut self, flags: SweepFlags) -> QcResult<()> {
        if let Some(sink) = self.interest_sink.as_mut() {
            sink.put_message(RadarMessage::flags(flags))?;
        }
        if let Some(sink) = self.confidence_sink.as_mut() {
            sink.put_message(RadarMessage::flags(flags))?;
        }
        Ok(())
    }

    fn configured_kinds(&self) -> Vec<FeatureKind> {
        FeatureKind::ALL
            .into_iter()
            .filter(|k| self.functions[k.index()].is_some())
            .collect()
    }

    fn diagnostic_params(&self, kinds: &[FeatureKind]) -> Vec<FieldParams> {
        kinds
            .iter()
            .map(|k| FieldParams::new(k.name(), "none", 2, INTEREST_SCALE, INTEREST_BIAS))
            .collect()
    }

    fn write_diagnostic(
        &mut self,
        meta: &SweepMeta,
        confidence_stream: bool,
    ) -> QcResult<()> {
        let kinds = self.configured_kinds();
        let params = self.diagnostic_params(&kinds);
        let sink = if confidence_stream {
            self.confidence_sink.as_mut()
        } else {
            self.interest_sink.as_mut()
        };
        let Some(sink) = sink else {
            return Ok(());
        };
        for buffer in &self.beams {
            let mut data = BeamData::filled_missing(params.clone(), self.max_gates);
            for (field, &kind) in kinds.iter().enumerate() {
                for gate in 0..self.max_gates {
                    let value = if confidence_stream {
                        buffer.confidence_value(kind, gate)
                    } else {
                        buffer.interest_value(kind, gate)
                    };
                    data.set_raw(field, gate, params[field].encode(value));
                }
            }
            let header = BeamHeader {
                azimuth: buffer.azimuth(),
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

    /// Emits the per-beam quantized interest values, if a stream is attached.
    pub fn write_interest(&mut self, meta: &SweepMeta) -> QcResult<()> {
        self.write_diagnostic(meta, false)
    }

    /// Emits the per-beam quantized confidence values, if a stream is attached.
    pub fn write_confidence(&mut self, meta: &SweepMeta) -> QcResult<()> {
        self.write_diagnostic(meta, true)
    }
}
