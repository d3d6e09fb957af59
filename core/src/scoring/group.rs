use crate::prelude::QcResult;
use crate::radar_interface::beam::{BeamData, FieldParams};
use crate::radar_interface::message::SweepFlags;
use crate::scoring::feature::FeatureKind;
use crate::scoring::scorer::{CombineRole, Scorer, SweepMeta};
use crate::terrain::mask::TerrainType;

/// Ordered set of scorers fused via per-scorer AND/OR, applying the fused
/// decision by nulling flagged gates in the configured filter fields.
pub struct ScorerGroup {
    scorers: Vec<Scorer>,
    /// Names of the input fields the fused decision erases.
    filter_field_names: Vec<String>,
    /// Indices of those fields within the current sweep's field table.
    filter_field_indices: Vec<usize>,
}

impl ScorerGroup {
    /// The first scorer's role is forced to the second's, or to OR for a
    /// lone scorer, so a missing result from a single configured scorer
    /// reads as "do not suppress".
    pub fn new(mut scorers: Vec<Scorer>, filter_field_names: Vec<String>) -> Self {
        let forced_role = match scorers.len() {
            0 | 1 => CombineRole::Or,
            _ => scorers[1].role(),
        };
        if let Some(first) = scorers.first_mut() {
            first.set_role(forced_role);
        }
        Self {
            scorers,
            filter_field_names,
            filter_field_indices: Vec::new(),
        }
    }

    pub fn scorers(&self) -> &[Scorer] {
        &self.scorers
    }

    pub fn scorers_mut(&mut self) -> &mut [Scorer] {
        &mut self.scorers
    }

    /// Widest azimuth radius any scorer asks for.
    pub fn max_az_radius(&self) -> usize {
        self.scorers.iter().map(Scorer::az_radius).max().unwrap_or(0)
    }

    pub fn begin_sweep(&mut self, max_gates: usize, fields: &[FieldParams]) {
        self.filter_field_indices = fields
            .iter()
            .enumerate()
            .filter(|(_, p)| self.filter_field_names.iter().any(|n| *n == p.name))
            .map(|(i, _)| i)
            .collect();
        for scorer in &mut self.scorers {
            scorer.begin_sweep(max_gates);
        }
    }

    pub fn begin_beam(&mut self, azimuth: f64) {
        for scorer in &mut self.scorers {
            scorer.begin_beam(azimuth);
        }
    }

    pub fn score(&mut self, kind: FeatureKind, value: f64, gate: usize, terrain: TerrainType) {
        for scorer in &mut self.scorers {
            scorer.score(kind, value, gate, terrain);
        }
    }

    pub fn finalize_gate(&mut self, gate: usize, dbz: Option<f64>) {
        for scorer in &mut self.scorers {
            scorer.finalize_gate(gate, dbz);
        }
    }

    /// Fused decision: fold each scorer's own decision left to right,
    /// applying the role each scorer carries for itself.
    pub fn decide(&self, beam: usize, gate: usize) -> bool {
        let mut scorers = self.scorers.iter();
        let Some(first) = scorers.next() else {
            return false;
        };
        let mut fused = first.decide(beam, gate);
        for scorer in scorers {
            fused = scorer.role().combine(fused, scorer.decide(beam, gate));
        }
        fused
    }

    /// Applies the fused decisions to one beam, overwriting flagged gates of
    /// every filter field with the missing raw. Returns the count of
    /// suppressed gates.
    pub fn filter_beam(&self, beam: usize, data: &mut BeamData) -> usize {
        let mut suppressed = 0;
        for gate in 0..data.n_gates() {
            if self.decide(beam, gate) {
                for &field in &self.filter_field_indices {
                    data.set_missing(field, gate);
                }
                suppressed += 1;
            }
        }
        suppressed
    }

    pub fn put_flags(&mut self, flags: SweepFlags) -> QcResult<()> {
        for scorer in &mut self.scorers {
            scorer.put_flags(flags)?;
        }
        Ok(())
    }

    pub fn write_interest(&mut self, meta: &SweepMeta) -> QcResult<()> {
        for scorer in &mut self.scorers {
            scorer.write_interest(meta)?;
            scorer.write_confidence(meta)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::interest::InterestFunction;
    use crate::scoring::scorer::ScoreComparison;
    use crate::terrain::mask::TerrainUse;

    fn hot_interest() -> InterestFunction {
        // Anything above 10 saturates to full interest.
        InterestFunction::new(
            [0.0, 2.0, 4.0, 6.0, 8.0, 10.0],
            [0.0, 0.2, 0.4, 0.6, 0.8, 1.0],
            1.0,
        )
        .unwrap()
    }

    fn scorer(name: &str, role: CombineRole) -> Scorer {
        let mut scorer = Scorer::new(
            name,
            0.5,
            ScoreComparison::GreaterThan,
            role,
            TerrainUse::All,
            1,
        );
        scorer.set_function(FeatureKind::Tdbz, hot_interest(), None);
        scorer
    }

    fn group_of(roles: &[CombineRole]) -> ScorerGroup {
        let scorers = roles
            .iter()
            .enumerate()
            .map(|(i, &role)| scorer(&format!("s{i}"), role))
            .collect();
        ScorerGroup::new(scorers, vec!["DBZ".to_string()])
    }

    fn field_params() -> Vec<FieldParams> {
        vec![FieldParams::new("DBZ", "dBZ", 2, 0.5, -32.0)]
    }

    #[test]
    fn and_fusion_requires_every_scorer() {
        let mut group = group_of(&[CombineRole::And, CombineRole::And]);
        group.begin_sweep(2, &field_params());
        group.begin_beam(0.0);
        // Only gate 0 scores high on the first scorer; second sees nothing
        // on gate 1.
        group.scorers_mut()[0].score(FeatureKind::Tdbz, 50.0, 0, TerrainType::Land);
        group.scorers_mut()[1].score(FeatureKind::Tdbz, 50.0, 0, TerrainType::Land);
        group.scorers_mut()[0].score(FeatureKind::Tdbz, 50.0, 1, TerrainType::Land);
        group.scorers_mut()[1].score(FeatureKind::Tdbz, 0.0, 1, TerrainType::Land);
        group.finalize_gate(0, Some(30.0));
        group.finalize_gate(1, Some(30.0));
        assert!(group.decide(0, 0));
        assert!(!group.decide(0, 1));
    }

    #[test]
    fn or_fusion_needs_only_one_scorer() {
        let mut group = group_of(&[CombineRole::Or, CombineRole::Or]);
        group.begin_sweep(1, &field_params());
        group.begin_beam(0.0);
        group.scorers_mut()[0].score(FeatureKind::Tdbz, 0.0, 0, TerrainType::Land);
        group.scorers_mut()[1].score(FeatureKind::Tdbz, 50.0, 0, TerrainType::Land);
        group.finalize_gate(0, Some(30.0));
        assert!(group.decide(0, 0));
    }

    #[test]
    fn lone_scorer_with_missing_result_does_not_suppress() {
        // AND role would suppress on missing; the group forces OR for a
        // single scorer.
        let mut group = group_of(&[CombineRole::And]);
        group.begin_sweep(1, &field_params());
        group.begin_beam(0.0);
        group.finalize_gate(0, None);
        assert!(!group.decide(0, 0));
    }

    #[test]
    fn first_role_is_forced_to_second() {
        let group = group_of(&[CombineRole::Or, CombineRole::And]);
        assert_eq!(group.scorers()[0].role(), CombineRole::And);
    }

    #[test]
    fn filter_beam_nulls_flagged_gates() {
        let mut group = group_of(&[CombineRole::Or]);
        group.begin_sweep(3, &field_params());
        group.begin_beam(0.0);
        group.scorers_mut()[0].score(FeatureKind::Tdbz, 50.0, 1, TerrainType::Land);
        for gate in 0..3 {
            group.finalize_gate(gate, Some(30.0));
        }
        let mut data = BeamData::from_raw(field_params(), 3, &[vec![100, 100, 100]]);
        let suppressed = group.filter_beam(0, &mut data);
        assert_eq!(suppressed, 1);
        assert!(data.value(0, 0).is_some());
        assert_eq!(data.value(0, 1), None);
        assert!(data.value(0, 2).is_some());
    }

    #[test]
    fn unmatched_filter_field_names_are_ignored() {
        let mut group = ScorerGroup::new(
            vec![scorer("s0", CombineRole::Or)],
            vec!["VEL".to_string()],
        );
        group.begin_sweep(1, &field_params());
        group.begin_beam(0.0);
        group.scorers_mut()[0].score(FeatureKind::Tdbz, 50.0, 0, TerrainType::Land);
        group.finalize_gate(0, Some(30.0));
        let mut data = BeamData::from_raw(field_params(), 1, &[vec![100]]);
        group.filter_beam(0, &mut data);
        // Decision fired but no configured field matched, value survives.
        assert!(data.value(0, 0).is_some());
    }
}
