use std::sync::Arc;

use anyhow::Context;
use log::info;
use qccore::radar_interface::{RadarMessage, SharedVecSink};
use qccore::scoring::FeatureRecorder;
use qccore::sweep::SweepSequencer;
use serde::Serialize;

use crate::workflow::config::WorkflowConfig;

/// What one offline run did to the stream, reported to the console and
/// optionally dumped as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub beams_in: usize,
    pub beams_out: usize,
    pub sweeps_scored: usize,
    pub sweeps_passed_through: usize,
    pub gates_suppressed: usize,
    pub errors: usize,
}

/// Wires a workflow config into a live pipeline and pumps a message stream
/// through it.
#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self, messages: Vec<RadarMessage>) -> anyhow::Result<RunSummary> {
        let beams_in = messages.iter().filter(|m| m.has_beam()).count();

        let terrain = Arc::new(self.config.build_terrain());
        let group = self.config.build_group().context("building scorer group")?;
        let range_weight = self
            .config
            .build_range_weight()
            .context("building range weight function")?;

        let out = SharedVecSink::new();
        let mut sequencer = SweepSequencer::new(
            self.config.sweep.clone(),
            terrain,
            group,
            FeatureRecorder::new(None),
            range_weight,
            Box::new(out.clone()),
        );

        for msg in messages {
            sequencer.process(msg);
        }
        sequencer.finish();

        let metrics = sequencer.metrics();
        let beams_out = out.messages().iter().filter(|m| m.has_beam()).count();
        info!(
            "run complete: {beams_in} beams in, {beams_out} out, {} gates suppressed",
            metrics.gates_suppressed
        );

        Ok(RunSummary {
            beams_in,
            beams_out,
            sweeps_scored: metrics.sweeps_scored,
            sweeps_passed_through: metrics.sweeps_passed_through,
            gates_suppressed: metrics.gates_suppressed,
            errors: metrics.errors,
        })
    }
}
