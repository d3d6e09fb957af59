//! Core quality-control engine for rotating weather-radar sweeps.
//!
//! Beams accumulate into per-sweep buffers with replicated wraparound
//! margins, windowed features are scored into clutter likelihood, and
//! flagged gates are erased before the stream goes back out. Missing-data
//! semantics are explicit throughout: a gate either decodes to a physical
//! value or stays `None`.

pub mod math;
pub mod prelude;
pub mod radar_interface;
pub mod scoring;
pub mod sweep;
pub mod telemetry;
pub mod terrain;

pub use prelude::{QcError, QcResult, ScanDirection, SweepConfig};
