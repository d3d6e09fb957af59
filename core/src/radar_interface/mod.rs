pub mod beam;
pub mod message;

pub use beam::{BeamData, BeamHeader, BeamMessage, FieldParams, RadarParams};
pub use message::{MessageSink, RadarMessage, SharedVecSink, SweepFlags, VecSink};
