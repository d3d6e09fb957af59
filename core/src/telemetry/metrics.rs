use std::sync::Mutex;

/// Counters accumulated over the life of the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub beams_processed: usize,
    pub sweeps_scored: usize,
    pub sweeps_passed_through: usize,
    pub gates_suppressed: usize,
    pub errors: usize,
}

pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_beam(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.beams_processed += 1;
        }
    }

    pub fn record_sweep_scored(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.sweeps_scored += 1;
        }
    }

    pub fn record_pass_through(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.sweeps_passed_through += 1;
        }
    }

    pub fn record_suppressed_gates(&self, count: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.gates_suppressed += count;
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.errors += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .map(|metrics| *metrics)
            .unwrap_or_default()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let recorder = MetricsRecorder::new();
        recorder.record_beam();
        recorder.record_beam();
        recorder.record_sweep_scored();
        recorder.record_suppressed_gates(12);
        let snap = recorder.snapshot();
        assert_eq!(snap.beams_processed, 2);
        assert_eq!(snap.sweeps_scored, 1);
        assert_eq!(snap.gates_suppressed, 12);
        assert_eq!(snap.errors, 0);
    }
}
