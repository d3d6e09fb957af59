use std::sync::Arc;

use crate::prelude::{ScanDirection, SweepConfig};
use crate::radar_interface::message::{MessageSink, RadarMessage};
use crate::scoring::feature::FeatureRecorder;
use crate::scoring::group::ScorerGroup;
use crate::scoring::interest::InterestFunction;
use crate::sweep::window::{SweepState, SweepWindow};
use crate::telemetry::{LogManager, MetricsRecorder, MetricsSnapshot};
use crate::terrain::mask::TerrainMask;

/// Drives sweeps through the two-slot scoring pipeline.
///
/// One sweep is always in flight behind the one being accumulated, because
/// the vertical gradient features need the elevation-adjacent sweep: bottom
/// up, a sweep's upper neighbor arrives after it, so scoring is delayed by
/// one sweep; top down, the upper neighbor is the sweep already held, so the
/// completed sweep scores immediately and waits only for emission ordering.
pub struct SweepSequencer {
    config: SweepConfig,
    terrain: Arc<TerrainMask>,
    group: ScorerGroup,
    features: FeatureRecorder,
    range_weight: InterestFunction,
    out: Box<dyn MessageSink>,
    margin: usize,
    current: Option<SweepWindow>,
    held: Option<SweepWindow>,
    /// (volume, sweep) of the sweep currently accumulating.
    last_sweep: Option<(i32, i32)>,
    metrics: MetricsRecorder,
    logger: LogManager,
}

impl SweepSequencer {
    pub fn new(
        config: SweepConfig,
        terrain: Arc<TerrainMask>,
        group: ScorerGroup,
        features: FeatureRecorder,
        range_weight: InterestFunction,
        out: Box<dyn MessageSink>,
    ) -> Self {
        let margin = config.max_az_radius().max(group.max_az_radius());
        Self {
            config,
            terrain,
            group,
            features,
            range_weight,
            out,
            margin,
            current: None,
            held: None,
            last_sweep: None,
            metrics: MetricsRecorder::new(),
            logger: LogManager::new(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Feeds one inbound message. Sample and emission problems are logged
    /// and counted; they never stop the stream.
    pub fn process(&mut self, msg: RadarMessage) {
        if let Some(beam) = msg.beam.as_ref() {
            let key = (beam.header.volume_num, beam.header.sweep_num);
            if self.last_sweep.is_some() && self.last_sweep != Some(key) {
                self.rotate();
            }
            self.last_sweep = Some(key);
            self.metrics.record_beam();
        }

        let end_of_volume = msg.flags.is_some_and(|f| f.end_of_volume);

        if self.current.is_none() {
            self.current = Some(self.new_window());
        }
        let result = self
            .current
            .as_mut()
            .map(|window| window.add_message(msg))
            .unwrap_or(Ok(()));
        if let Err(err) = result {
            self.logger.record_warning(&format!("bad sample in stream: {err}"));
            self.metrics.record_error();
        }

        if end_of_volume {
            self.flush();
        }
    }

    /// Flushes both in-flight sweeps, oldest first, and returns to idle.
    /// Call at end of input; the end-of-volume flag triggers it in-stream.
    pub fn finish(&mut self) {
        self.flush();
    }

    fn new_window(&self) -> SweepWindow {
        SweepWindow::new(self.config.clone(), self.margin, Arc::clone(&self.terrain))
    }

    /// Closes the accumulating sweep and advances the two-slot pipeline by
    /// one step. Which slot gets scored depends on the scan direction; the
    /// outgoing sweep is always the older one, so stream order is preserved.
    fn rotate(&mut self) {
        let Some(mut completed) = self.current.take() else {
            return;
        };
        completed.set_data();

        match self.config.scan_direction {
            ScanDirection::BottomUp => {
                if let Some(mut held) = self.held.take() {
                    let upper = self.vertical_upper(&held, &completed);
                    held.score(upper, &mut self.group, &mut self.features, &self.range_weight);
                    self.emit(&mut held);
                }
                self.held = Some(completed);
            }
            ScanDirection::TopDown => {
                // The held sweep's diagnostics are still loaded in the
                // scorers, so it must go out before the next score pass.
                let upper = match self.held.take() {
                    Some(mut held) => {
                        self.emit(&mut held);
                        Some(held)
                    }
                    None => None,
                };
                let eligible = upper
                    .as_ref()
                    .and_then(|held| self.vertical_upper(&completed, held));
                completed.score(
                    eligible,
                    &mut self.group,
                    &mut self.features,
                    &self.range_weight,
                );
                self.held = Some(completed);
            }
        }
    }

    fn flush(&mut self) {
        self.rotate();
        if let Some(mut held) = self.held.take() {
            // Bottom up, the volume's top sweep has no upper neighbor and is
            // scored here without the vertical gradient family.
            if held.state() == SweepState::DataSet {
                held.score(None, &mut self.group, &mut self.features, &self.range_weight);
            }
            self.emit(&mut held);
        }
        self.last_sweep = None;
    }

    /// Checks that a candidate upper sweep is actually usable: data set and
    /// strictly higher in elevation. A repeated or reversed elevation is a
    /// scan-strategy hiccup, so the sweep still scores, just without the
    /// vertical gradient features.
    fn vertical_upper<'a>(
        &self,
        lower: &SweepWindow,
        upper: &'a SweepWindow,
    ) -> Option<&'a SweepWindow> {
        if upper.init_failed()
            || matches!(upper.state(), SweepState::Empty | SweepState::Accumulating)
        {
            return None;
        }
        if upper.elevation() <= lower.elevation() {
            self.logger.record_warning(&format!(
                "sweep at elevation {:.2} has no higher neighbor (got {:.2}); \
                 skipping vertical gradients",
                lower.elevation(),
                upper.elevation()
            ));
            return None;
        }
        Some(upper)
    }

    fn emit(&mut self, window: &mut SweepWindow) {
        if window.state() == SweepState::Scored {
            self.metrics.record_sweep_scored();
            self.metrics.record_suppressed_gates(window.suppressed_gates());
        } else {
            self.metrics.record_pass_through();
        }
        if let Err(err) = window.write(self.out.as_mut(), &mut self.group, &mut self.features) {
            self.logger
                .record_warning(&format!("failed to emit sweep: {err}"));
            self.metrics.record_error();
        }
    }
}
