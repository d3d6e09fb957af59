use crate::scoring::feature::{FeatureKind, N_FEATURE_KINDS};

/// Fusion state for one gate.
#[derive(Debug, Clone, Copy, Default)]
struct GateScore {
    weighted_sum: f64,
    weight_sum: f64,
    /// Running confidence product; first contribution initializes it.
    confidence: Option<f64>,
    final_score: Option<f64>,
    final_confidence: Option<f64>,
}

/// Per-beam accumulation of weighted interest and confidence across all
/// scored feature types, producing the fused per-gate scores.
///
/// Lifetime is one sweep's worth of beams; the owning scorer recreates its
/// buffers at each `begin_sweep`.
pub struct BeamScoreBuffer {
    azimuth: f64,
    gates: Vec<GateScore>,
    /// Recorded raw interest values, `[kind][gate]`, kept for diagnostics.
    interest: Vec<Vec<Option<f64>>>,
    confidence: Vec<Vec<Option<f64>>>,
}

impl BeamScoreBuffer {
    pub fn new(azimuth: f64, n_gates: usize) -> Self {
        Self {
            azimuth,
            gates: vec![GateScore::default(); n_gates],
            interest: vec![vec![None; n_gates]; N_FEATURE_KINDS],
            confidence: vec![vec![None; n_gates]; N_FEATURE_KINDS],
        }
    }

    pub fn azimuth(&self) -> f64 {
        self.azimuth
    }

    pub fn n_gates(&self) -> usize {
        self.gates.len()
    }

    pub fn record_score(
        &mut self,
        kind: FeatureKind,
        gate: usize,
        interest: Option<f64>,
        interest_weight: f64,
        confidence: Option<f64>,
        confidence_weight: f64,
    ) {
        if gate >= self.gates.len() {
            return;
        }
        self.interest[kind.index()][gate] = interest;
        self.confidence[kind.index()][gate] = confidence;

        let slot = &mut self.gates[gate];
        if let Some(value) = interest {
            slot.weighted_sum += interest_weight * value;
            slot.weight_sum += interest_weight;
        }
        if let Some(value) = confidence {
            let factor = value.powf(confidence_weight);
            slot.confidence = Some(slot.confidence.map_or(factor, |c| c * factor));
        }
    }

    /// Fuses the gate's accumulators into the final scores. A gate nothing
    /// contributed to stays absent.
    pub fn finalize(&mut self, gate: usize, apply_confidence: bool) {
        let Some(slot) = self.gates.get_mut(gate) else {
            return;
        };
        if slot.weight_sum > 0.0 {
            let fused = slot.weighted_sum / slot.weight_sum;
            slot.final_score = Some(fused);
            slot.final_confidence = match (apply_confidence, slot.confidence) {
                (true, Some(conf)) => Some(fused * conf),
                _ => Some(fused),
            };
        } else {
            slot.final_score = None;
            slot.final_confidence = None;
        }
    }

    /// Overrides both fused outputs unconditionally.
    pub fn force_final(&mut self, gate: usize, value: f64) {
        if let Some(slot) = self.gates.get_mut(gate) {
            slot.final_score = Some(value);
            slot.final_confidence = Some(value);
        }
    }

    pub fn final_score(&self, gate: usize) -> Option<f64> {
        self.gates.get(gate)?.final_score
    }

    pub fn final_confidence(&self, gate: usize) -> Option<f64> {
        self.gates.get(gate)?.final_confidence
    }

    pub fn interest_value(&self, kind: FeatureKind, gate: usize) -> Option<f64> {
        *self.interest[kind.index()].get(gate)?
    }

    pub fn confidence_value(&self, kind: FeatureKind, gate: usize) -> Option<f64> {
        *self.confidence[kind.index()].get(gate)?
    }
}
