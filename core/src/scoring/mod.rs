pub mod feature;
pub mod group;
pub mod interest;
pub mod score_buffer;
pub mod scorer;

pub use feature::{FeatureKind, FeatureRecorder};
pub use group::ScorerGroup;
pub use interest::InterestFunction;
pub use score_buffer::BeamScoreBuffer;
pub use scorer::{CombineRole, ScoreComparison, Scorer, SweepMeta};
