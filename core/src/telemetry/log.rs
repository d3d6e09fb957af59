use log::{debug, info, warn};

/// Beam-rate log throttle: one summary line per block of beams so that a
/// full sweep does not flood the log.
pub const BEAM_SUMMARY_COUNT: usize = 30;

pub struct LogManager {
    summary_count: usize,
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            // First beam always logs.
            summary_count: BEAM_SUMMARY_COUNT + 1,
        }
    }

    pub fn record(&self, message: &str) {
        info!("{}", message);
    }

    pub fn record_debug(&self, message: &str) {
        debug!("{}", message);
    }

    pub fn record_warning(&self, message: &str) {
        warn!("{}", message);
    }

    /// Logs one beam header line per [`BEAM_SUMMARY_COUNT`] beams.
    pub fn record_beam(&mut self, verb: &str, vol: i32, sweep: i32, elev: f64, az: f64) {
        if self.summary_count > BEAM_SUMMARY_COUNT {
            debug!(
                "{verb}: vol {vol:>4} sweep {sweep:>4} elev {elev:>6.2} az {az:>6.2}"
            );
            self.summary_count = 0;
        }
        self.summary_count += 1;
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
