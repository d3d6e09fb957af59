pub mod sequencer;
pub mod window;

pub use sequencer::SweepSequencer;
pub use window::{SweepState, SweepWindow};
