use std::sync::Arc;

use crate::math::StatsHelper;
use crate::prelude::{QcError, QcResult, SweepConfig};
use crate::radar_interface::beam::{BeamData, BeamMessage, FieldParams, RadarParams};
use crate::radar_interface::message::{MessageSink, RadarMessage, SweepFlags};
use crate::scoring::feature::{FeatureKind, FeatureRecorder};
use crate::scoring::group::ScorerGroup;
use crate::scoring::interest::InterestFunction;
use crate::scoring::scorer::SweepMeta;
use crate::telemetry::LogManager;
use crate::terrain::mask::{TerrainMask, TerrainType};

/// Azimuth lookup table length: 0.1 degree quantization over the full
/// circle, plus probing slack at both ends.
const AZ_INDEX_LEN: usize = 4000;

/// Azimuth lookup probe width, in 0.1 degree steps.
const AZ_TOL: usize = 5;

/// Fraction of a window's gates that must hold data before the windowed
/// features are considered meaningful.
const MIN_GOOD_FRACTION: f64 = 0.25;

/// Beams whose gate spacing differs from the configured spacing by more
/// than this (km) invalidate the sweep.
const GATE_SPACING_TOL: f64 = 1.0e-4;

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// Shortest angular distance between two azimuths, so windows spanning the
/// 0/360 seam see their replicated neighbors as adjacent.
fn circular_az_diff(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Lifecycle of a buffered sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Empty,
    Accumulating,
    DataSet,
    Scored,
    Written,
}

/// Per-threshold spin accumulator for one run of consecutive gates. The
/// first qualifying excursion only establishes a direction; each direction
/// reversal past the threshold counts as one spin change.
#[derive(Default)]
struct SpinState {
    found_first: bool,
    last_positive: bool,
    count: usize,
}

impl SpinState {
    fn eval(&mut self, prev: f64, current: f64, threshold: f64) {
        if current > prev + threshold {
            if self.found_first && !self.last_positive {
                self.count += 1;
            }
            self.found_first = true;
            self.last_positive = true;
        } else if current < prev - threshold {
            if self.found_first && self.last_positive {
                self.count += 1;
            }
            self.found_first = true;
            self.last_positive = false;
        }
    }
}

struct BufferedMessage {
    msg: RadarMessage,
    /// Physical buffer index of the accepted beam this message carried, if
    /// any. Skipped beams keep `None` and pass through unfiltered.
    slot: Option<usize>,
}

fn record(
    group: &mut ScorerGroup,
    features: &mut FeatureRecorder,
    kind: FeatureKind,
    value: f64,
    gate: usize,
    terrain: TerrainType,
) {
    features.record(kind, gate, value);
    group.score(kind, value, gate, terrain);
}

/// One sweep's worth of buffered beams, laid out for wraparound windowing.
///
/// The physical buffer is `[front margin][real beams][back margin]` where
/// both margins replicate real beams across the 0/360 seam, sized by the
/// widest configured azimuth radius. Windowed loops index physically and
/// never special-case the seam; logical beam `i` lives at physical
/// `i + margin`.
pub struct SweepWindow {
    config: SweepConfig,
    margin: usize,
    terrain: Arc<TerrainMask>,
    state: SweepState,
    init_done: bool,
    init_failed: bool,
    start_of_volume: bool,
    end_of_volume: bool,

    messages: Vec<BufferedMessage>,
    beams: Vec<BeamData>,
    azimuths: Vec<f64>,
    elevations: Vec<f64>,
    /// Quantized azimuth to physical beam index, -1 where no beam landed.
    az_indices: Vec<i32>,
    median_vel: Vec<Vec<Option<f64>>>,
    median_sw: Vec<Vec<Option<f64>>>,

    fields: Vec<FieldParams>,
    byte_width: usize,
    dbz_idx: Option<usize>,
    vel_idx: Option<usize>,
    sw_idx: Option<usize>,
    radar: Option<RadarParams>,
    elevation: f64,
    sweep_num: i32,
    volume_num: i32,
    start_time: i64,
    end_time: i64,
    n_beams: usize,
    suppressed_gates: usize,
    logger: LogManager,
}

impl SweepWindow {
    pub fn new(config: SweepConfig, margin: usize, terrain: Arc<TerrainMask>) -> Self {
        Self {
            config,
            margin,
            terrain,
            state: SweepState::Empty,
            init_done: false,
            init_failed: false,
            start_of_volume: false,
            end_of_volume: false,
            messages: Vec::new(),
            beams: Vec::new(),
            azimuths: Vec::new(),
            elevations: Vec::new(),
            az_indices: vec![-1; AZ_INDEX_LEN],
            median_vel: Vec::new(),
            median_sw: Vec::new(),
            fields: Vec::new(),
            byte_width: 0,
            dbz_idx: None,
            vel_idx: None,
            sw_idx: None,
            radar: None,
            elevation: 0.0,
            sweep_num: 0,
            volume_num: 0,
            start_time: 0,
            end_time: 0,
            n_beams: 0,
            suppressed_gates: 0,
            logger: LogManager::new(),
        }
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.state, SweepState::Empty)
    }

    pub fn init_failed(&self) -> bool {
        self.init_failed
    }

    pub fn n_beams(&self) -> usize {
        self.n_beams
    }

    pub fn elevation(&self) -> f64 {
        self.elevation
    }

    pub fn sweep_num(&self) -> i32 {
        self.sweep_num
    }

    pub fn volume_num(&self) -> i32 {
        self.volume_num
    }

    pub fn saw_end_of_volume(&self) -> bool {
        self.end_of_volume
    }

    pub fn suppressed_gates(&self) -> usize {
        self.suppressed_gates
    }

    /// True when the reflectivity field arrived in the data stream, as
    /// opposed to merely being configured.
    pub fn dbz_exists(&self) -> bool {
        self.dbz_idx.is_some()
    }

    /// Buffers one inbound message. Beam messages are validated and copied
    /// into the physical buffer; every message, accepted or not, is kept for
    /// re-emission. A returned error marks a skipped beam or a failed sweep,
    /// never a hard stop.
    pub fn add_message(&mut self, msg: RadarMessage) -> QcResult<()> {
        let mut slot = None;
        let mut result = Ok(());

        if let Some(beam) = msg.beam.as_ref() {
            if !self.init_done {
                self.init_done = true;
                if let Err(err) = self.init_sweep(beam) {
                    self.init_failed = true;
                    result = Err(err);
                }
            }
            if !self.init_failed && result.is_ok() {
                match self.ingest_beam(beam) {
                    Ok(physical) => slot = Some(physical),
                    Err(err) => result = Err(err),
                }
            }
        }

        if let Some(flags) = msg.flags {
            if flags.start_of_volume {
                self.logger.record("Got start of volume flag");
                self.start_of_volume = true;
            }
            if flags.end_of_volume {
                self.logger.record("Got end of volume flag");
                self.end_of_volume = true;
            }
        }

        self.messages.push(BufferedMessage { msg, slot });
        result
    }

    /// Sweep-level setup from the first beam. Any failure here poisons the
    /// whole sweep; its beams are still buffered and pass through unscored.
    fn init_sweep(&mut self, beam: &BeamMessage) -> QcResult<()> {
        let data = &beam.data;
        let byte_width = data.uniform_byte_width().ok_or_else(|| {
            QcError::DataShape("unequal byte widths across fields".to_string())
        })?;
        if !matches!(byte_width, 1 | 2 | 4) {
            return Err(QcError::DataShape(format!(
                "byte width {byte_width} not supported"
            )));
        }

        self.fields = data.params().to_vec();
        self.byte_width = byte_width;
        self.dbz_idx = data.field_index(&self.config.dbz_field);
        self.vel_idx = data.field_index(&self.config.vel_field);
        self.sw_idx = data.field_index(&self.config.sw_field);
        if self.dbz_idx.is_none() && self.vel_idx.is_none() && self.sw_idx.is_none() {
            return Err(QcError::DataShape("all input fields missing".to_string()));
        }

        if (beam.radar.gate_spacing - self.config.gate_spacing).abs() > GATE_SPACING_TOL {
            return Err(QcError::DataShape(format!(
                "gate spacing {} does not match expected {}",
                beam.radar.gate_spacing, self.config.gate_spacing
            )));
        }

        self.terrain.check_gate_count(self.config.max_gates)?;

        self.radar = Some(beam.radar);
        self.elevation = beam.header.elevation;
        self.sweep_num = beam.header.sweep_num;
        self.volume_num = beam.header.volume_num;
        self.start_time = beam.header.time;

        // Front margin placeholders; real beams land after them and the
        // margins are filled in with wrapped copies at set_data time.
        for _ in 0..self.margin {
            self.beams
                .push(BeamData::filled_missing(self.fields.clone(), self.config.max_gates));
            self.azimuths.push(0.0);
            self.elevations.push(0.0);
        }
        Ok(())
    }

    /// Per-beam validation and buffering; returns the physical index the
    /// beam landed at.
    fn ingest_beam(&mut self, beam: &BeamMessage) -> QcResult<usize> {
        let header = &beam.header;
        if beam.data.uniform_byte_width() != Some(self.byte_width) {
            self.init_failed = true;
            return Err(QcError::DataShape(format!(
                "beam byte width changed mid-sweep at azimuth {:.2}",
                header.azimuth
            )));
        }
        if beam.data.n_fields() != self.fields.len() {
            self.init_failed = true;
            return Err(QcError::DataShape(format!(
                "beam has {} fields, sweep expects {}",
                beam.data.n_fields(),
                self.fields.len()
            )));
        }
        if header.n_gates > self.config.max_gates {
            self.init_failed = true;
            return Err(QcError::DataShape(format!(
                "beam has {} gates, max is {}",
                header.n_gates, self.config.max_gates
            )));
        }
        if beam.data.n_gates() != header.n_gates {
            return Err(QcError::BadSample(format!(
                "beam data holds {} gates but header says {}",
                beam.data.n_gates(),
                header.n_gates
            )));
        }
        if !(0.0..=360.0).contains(&header.azimuth) {
            return Err(QcError::BadSample(format!(
                "bad azimuth {} for beam, skipping",
                header.azimuth
            )));
        }

        self.logger.record_beam(
            "Adding",
            header.volume_num,
            header.sweep_num,
            header.elevation,
            header.azimuth,
        );

        let physical = self.beams.len();
        self.beams.push(beam.data.padded_to(self.config.max_gates));
        self.azimuths.push(header.azimuth);
        self.elevations.push(header.elevation);

        let quantized = AZ_TOL + (header.azimuth * 10.0 + 0.5) as usize;
        self.az_indices[quantized] = physical as i32;

        self.end_time = header.time;
        self.state = SweepState::Accumulating;
        Ok(physical)
    }

    /// Closes the buffer for windowing: replicates the wraparound margins
    /// and computes the median-filtered velocity and spectrum-width planes.
    pub fn set_data(&mut self) {
        if self.state != SweepState::Accumulating || self.init_failed {
            return;
        }
        self.logger
            .record_debug(&format!("Setting data for elevation {:.2}", self.elevation));

        self.n_beams = self.beams.len() - self.margin;
        if self.n_beams < self.margin {
            self.logger.record_warning(&format!(
                "sweep has {} beams, fewer than the {}-beam azimuth window; passing through",
                self.n_beams, self.margin
            ));
            return;
        }

        // The margins copy unfiltered data, so windowed sums never read
        // values the filter pass has already erased.
        for i in 0..self.margin {
            let front_src = self.beams[self.n_beams + i].clone();
            self.beams[i].copy_contents(&front_src);
            self.azimuths[i] = self.azimuths[self.n_beams + i];
            self.elevations[i] = self.elevations[self.n_beams + i];

            let back = self.beams[i + self.margin].clone();
            self.beams.push(back);
            self.azimuths.push(self.azimuths[i + self.margin]);
            self.elevations.push(self.elevations[i + self.margin]);
        }

        if let Some(field) = self.vel_idx {
            self.median_vel = self.median_rows(field);
        }
        if let Some(field) = self.sw_idx {
            self.median_sw = self.median_rows(field);
        }
        self.state = SweepState::DataSet;
    }

    /// Median-filtered plane for one field, aligned with the physical beam
    /// buffer, margins included.
    fn median_rows(&self, field: usize) -> Vec<Vec<Option<f64>>> {
        let max_gates = self.config.max_gates;
        let gap_tol = self.config.azimuth_gap_tolerance();
        let az_radius = self.config.vel_az_radius;
        let gate_radius = self.config.vel_gate_radius;

        let mut rows = vec![vec![None; max_gates]; self.beams.len()];
        let mut window = Vec::with_capacity((2 * az_radius + 1) * (2 * gate_radius + 1));

        for ibeam in 0..self.n_beams {
            let physical = ibeam + self.margin;
            let azimuth = self.azimuths[physical];
            for gate in 0..max_gates {
                window.clear();
                for i in physical - az_radius..=physical + az_radius {
                    // A big azimuth step means a missing beam; its window
                    // slot contributes nothing.
                    if circular_az_diff(azimuth, self.azimuths[i]) > gap_tol {
                        continue;
                    }
                    let start = gate.saturating_sub(gate_radius);
                    let end = (gate + gate_radius).min(max_gates - 1);
                    for j in start..=end {
                        if let Some(value) = self.beams[i].value(field, j) {
                            window.push(value);
                        }
                    }
                }
                rows[physical][gate] = StatsHelper::median(&mut window);
            }
        }

        for i in 0..self.margin {
            rows[i] = rows[self.n_beams + i].clone();
            rows[self.margin + self.n_beams + i] = rows[self.margin + i].clone();
        }
        rows
    }

    /// Physical index of the beam nearest an azimuth, probing outward up to
    /// the lookup tolerance.
    pub fn azimuth_index(&self, azimuth: f64) -> Option<usize> {
        let center = AZ_TOL + (azimuth * 10.0 + 0.5) as usize;
        let mut lookup = self.az_indices[center];
        let mut i = 0;
        while lookup < 0 && i < AZ_TOL {
            lookup = self.az_indices[center - i];
            if lookup < 0 {
                lookup = self.az_indices[center + i];
            }
            i += 1;
        }
        usize::try_from(lookup).ok()
    }

    /// Reflectivity at a physical beam index; out-of-range reads are absent.
    pub fn dbz_value(&self, physical: usize, gate: usize) -> Option<f64> {
        let field = self.dbz_idx?;
        self.beams.get(physical)?.value(field, gate)
    }

    pub fn elevation_at(&self, physical: usize) -> Option<f64> {
        self.elevations.get(physical).copied()
    }

    fn meta(&self) -> Option<SweepMeta> {
        Some(SweepMeta {
            elevation: self.elevation,
            sweep_num: self.sweep_num,
            volume_num: self.volume_num,
            start_time: self.start_time,
            end_time: self.end_time,
            radar: self.radar?,
        })
    }

    /// Expected return power at a slant range, used when a reflectivity
    /// sample needed by the gradient features is missing.
    fn default_dbz(&self, slant_range: f64) -> Option<f64> {
        let radar = self.radar?;
        if slant_range <= 0.0 {
            return None;
        }
        Some(radar.noise_floor + 10.0 * (slant_range * slant_range).log10() + radar.radar_constant)
    }

    /// Computes every feature over the windowed buffer, scores it through
    /// the group, and applies the fused suppression decisions in place.
    /// `upper` is the elevation-adjacent sweep for the vertical gradient
    /// family; it must already have its data set.
    pub fn score(
        &mut self,
        upper: Option<&SweepWindow>,
        group: &mut ScorerGroup,
        features: &mut FeatureRecorder,
        range_weight: &InterestFunction,
    ) {
        if self.state != SweepState::DataSet || self.init_failed {
            return;
        }
        self.logger
            .record(&format!("Scoring sweep at elevation {:.2}", self.elevation));

        let max_gates = self.config.max_gates;
        let gap_tol = self.config.azimuth_gap_tolerance();
        group.begin_sweep(max_gates, &self.fields);
        features.begin_sweep(max_gates);

        let upper = upper.filter(|u| u.dbz_exists() && self.dbz_idx.is_some());

        for ibeam in 0..self.n_beams {
            let physical = ibeam + self.margin;
            let azimuth = self.azimuths[physical];
            group.begin_beam(azimuth);
            features.begin_beam(azimuth);

            for gate in 0..max_gates {
                let terrain = self.terrain.classify(azimuth, gate);

                // Reflectivity window: texture, spin and sign sums.
                let mut diff_count = 0usize;
                let mut total_dbz_gates = 0usize;
                let mut sc_count = 0usize;
                let mut ap_count = 0usize;
                let mut p_count = 0usize;
                let mut tdbz_sum = 0.0;
                let mut sign_sum = 0.0;
                if let Some(dbz) = self.dbz_idx {
                    for i in physical - self.config.dbz_az_radius
                        ..=physical + self.config.dbz_az_radius
                    {
                        if circular_az_diff(azimuth, self.azimuths[i]) > gap_tol {
                            continue;
                        }
                        let start = gate.saturating_sub(self.config.dbz_gate_radius);
                        let end = (gate + self.config.dbz_gate_radius).min(max_gates - 1);
                        let mut prev: Option<f64> = None;
                        let mut sc_spin = SpinState::default();
                        let mut ap_spin = SpinState::default();
                        let mut p_spin = SpinState::default();
                        for j in start..=end {
                            let value = self.beams[i].value(dbz, j);
                            if let (Some(prev_val), Some(current)) = (prev, value) {
                                diff_count += 1;
                                sc_spin.eval(prev_val, current, self.config.sc_spin_threshold);
                                ap_spin.eval(prev_val, current, self.config.ap_spin_threshold);
                                p_spin.eval(prev_val, current, self.config.p_spin_threshold);
                                let diff = current - prev_val;
                                tdbz_sum += diff * diff;
                                if diff > 0.0 {
                                    sign_sum += 1.0;
                                } else if diff < 0.0 {
                                    sign_sum -= 1.0;
                                }
                            }
                            prev = value;
                            total_dbz_gates += 1;
                        }
                        sc_count += sc_spin.count;
                        ap_count += ap_spin.count;
                        p_count += p_spin.count;
                    }
                }

                // Median velocity / spectrum width windows.
                let mut vel_sum = 0.0;
                let mut vel_sq_sum = 0.0;
                let mut vel_count = 0usize;
                let mut total_vel_gates = 0usize;
                let mut sw_sum = 0.0;
                let mut sw_sq_sum = 0.0;
                let mut sw_count = 0usize;
                let mut total_sw_gates = 0usize;
                for i in physical - self.config.vel_az_radius
                    ..=physical + self.config.vel_az_radius
                {
                    if circular_az_diff(azimuth, self.azimuths[i]) > gap_tol {
                        continue;
                    }
                    let start = gate.saturating_sub(self.config.vel_gate_radius);
                    let end = (gate + self.config.vel_gate_radius).min(max_gates - 1);
                    for j in start..=end {
                        if self.vel_idx.is_some() {
                            if let Some(value) = self.median_vel[i][j] {
                                vel_sum += value;
                                vel_sq_sum += value * value;
                                vel_count += 1;
                            }
                            total_vel_gates += 1;
                        }
                        if self.sw_idx.is_some() {
                            if let Some(value) = self.median_sw[i][j] {
                                sw_sum += value;
                                sw_sq_sum += value * value;
                                sw_count += 1;
                            }
                            total_sw_gates += 1;
                        }
                    }
                }

                // Vertical and down-range gradient family.
                if let Some(upper) = upper {
                    self.gradient_features(
                        upper,
                        physical,
                        azimuth,
                        gate,
                        terrain,
                        range_weight,
                        group,
                        features,
                    );
                }

                // Reflectivity-difference features need a minimum fraction
                // of live gate pairs in the window.
                if diff_count as f64 > total_dbz_gates as f64 * MIN_GOOD_FRACTION {
                    let n = diff_count as f64;
                    record(group, features, FeatureKind::Tdbz, tdbz_sum / n, gate, terrain);
                    record(
                        group,
                        features,
                        FeatureKind::ScSpin,
                        100.0 * sc_count as f64 / n,
                        gate,
                        terrain,
                    );
                    record(
                        group,
                        features,
                        FeatureKind::ApSpin,
                        100.0 * ap_count as f64 / n,
                        gate,
                        terrain,
                    );
                    record(
                        group,
                        features,
                        FeatureKind::PSpin,
                        100.0 * p_count as f64 / n,
                        gate,
                        terrain,
                    );
                    record(group, features, FeatureKind::Sign, sign_sum / n, gate, terrain);
                }

                if self.vel_idx.is_some() {
                    if let Some(value) = self.median_vel[physical][gate] {
                        record(group, features, FeatureKind::Mve, value, gate, terrain);
                    }
                    if vel_count as f64 > total_vel_gates as f64 * MIN_GOOD_FRACTION {
                        let sdve =
                            StatsHelper::std_dev_from_sums(vel_sum, vel_sq_sum, vel_count);
                        record(group, features, FeatureKind::Sdve, sdve, gate, terrain);
                    }
                }
                if self.sw_idx.is_some() {
                    if let Some(value) = self.median_sw[physical][gate] {
                        record(group, features, FeatureKind::Msw, value, gate, terrain);
                    }
                    if sw_count as f64 > total_sw_gates as f64 * MIN_GOOD_FRACTION {
                        let sdsw = StatsHelper::std_dev_from_sums(sw_sum, sw_sq_sum, sw_count);
                        record(group, features, FeatureKind::Sdsw, sdsw, gate, terrain);
                    }
                }

                let dbz_val = self
                    .dbz_idx
                    .and_then(|field| self.beams[physical].value(field, gate));
                group.finalize_gate(gate, dbz_val);
            }
        }

        // Score everything first, then erase: the margins were copied before
        // this pass, so no window ever reads a suppressed value.
        let mut suppressed = 0;
        for ibeam in 0..self.n_beams {
            let physical = ibeam + self.margin;
            suppressed += group.filter_beam(ibeam, &mut self.beams[physical]);
        }
        self.suppressed_gates = suppressed;
        self.state = SweepState::Scored;
    }

    /// GDZ family against the upper sweep, plus the down-range SRDZ.
    #[allow(clippy::too_many_arguments)]
    fn gradient_features(
        &self,
        upper: &SweepWindow,
        physical: usize,
        azimuth: f64,
        gate: usize,
        terrain: TerrainType,
        range_weight: &InterestFunction,
        group: &mut ScorerGroup,
        features: &mut FeatureRecorder,
    ) {
        let Some(dbz) = self.dbz_idx else {
            return;
        };
        let Some(radar) = self.radar else {
            return;
        };
        let slant_range = gate as f64 * radar.gate_spacing + radar.start_range;
        let range_wt = range_weight.apply(Some(slant_range)).unwrap_or(0.0);
        let current = self.beams[physical].value(dbz, gate);

        let upper_index = upper.azimuth_index(azimuth);
        let mut upper_dbz = upper_index.and_then(|i| upper.dbz_value(i, gate));
        if upper_dbz.is_none() {
            let (left, right) = match upper_index {
                Some(i) => (
                    i.checked_sub(1).and_then(|l| upper.dbz_value(l, gate)),
                    upper.dbz_value(i + 1, gate),
                ),
                None => (None, None),
            };
            upper_dbz = match (left, right) {
                (Some(l), Some(r)) => Some(0.5 * (l + r)),
                _ => self.default_dbz(slant_range),
            };
        }

        if let (Some(current_dbz), Some(upper_val)) = (current, upper_dbz) {
            let gdz = upper_val - current_dbz;
            record(group, features, FeatureKind::Gdz, gdz, gate, terrain);
            record(group, features, FeatureKind::Rgdz, gdz * range_wt, gate, terrain);
            if slant_range > 0.0 {
                let upper_elev = upper.elevation_at(physical).unwrap_or(upper.elevation());
                let theta = (upper_elev - self.elevations[physical]) * DEG_TO_RAD;
                if theta.sin() != 0.0 {
                    let rsinz = gdz / (slant_range * theta.sin());
                    record(group, features, FeatureKind::Rsinz, rsinz, gate, terrain);
                }
            }
        }

        let offset = self.config.slant_range_gates();
        if gate + offset < self.config.max_gates {
            let next = self.beams[physical].value(dbz, gate + offset);
            let next_range = (gate + offset) as f64 * radar.gate_spacing + radar.start_range;
            let value = match (current, next) {
                (Some(c), Some(n)) => Some(n - c),
                (None, Some(n)) => self.default_dbz(slant_range).map(|d| n - d),
                (Some(c), None) => self.default_dbz(next_range).map(|d| d - c),
                (None, None) => None,
            };
            if let Some(srdz) = value {
                record(group, features, FeatureKind::Srdz, srdz * range_wt, gate, terrain);
            }
        }
    }

    /// Emits the sweep. A scored sweep goes out with suppressed gates erased
    /// and its diagnostics written; anything else passes through untouched.
    /// Volume boundary flags bracket the diagnostic streams either way,
    /// except for a failed sweep which only passes its data through.
    pub fn write(
        &mut self,
        out: &mut dyn MessageSink,
        group: &mut ScorerGroup,
        features: &mut FeatureRecorder,
    ) -> QcResult<()> {
        if self.init_failed {
            self.logger.record("Skipping uninitialized sweep, passing data through");
            self.pass_through(out)?;
            self.state = SweepState::Written;
            return Ok(());
        }

        if self.start_of_volume {
            group.put_flags(SweepFlags::start_of_volume())?;
            features.put_flags(SweepFlags::start_of_volume())?;
        }

        if self.state == SweepState::Scored {
            self.write_filtered(out)?;
            if let Some(meta) = self.meta() {
                group.write_interest(&meta)?;
                features.write(&meta)?;
            }
        } else {
            self.pass_through(out)?;
        }

        if self.end_of_volume {
            group.put_flags(SweepFlags::end_of_volume())?;
            features.put_flags(SweepFlags::end_of_volume())?;
        }

        self.state = SweepState::Written;
        Ok(())
    }

    /// Re-emits the buffered messages with each accepted beam's data
    /// replaced by its filtered copy, trimmed back to the original gate
    /// count.
    fn write_filtered(&mut self, out: &mut dyn MessageSink) -> QcResult<()> {
        let messages = std::mem::take(&mut self.messages);
        for buffered in &messages {
            let msg = match (&buffered.msg.beam, buffered.slot) {
                (Some(beam), Some(slot)) => {
                    self.logger.record_beam(
                        "Writing",
                        beam.header.volume_num,
                        beam.header.sweep_num,
                        beam.header.elevation,
                        beam.header.azimuth,
                    );
                    RadarMessage {
                        beam: Some(BeamMessage {
                            header: beam.header,
                            radar: beam.radar,
                            data: self.beams[slot].padded_to(beam.header.n_gates),
                        }),
                        flags: buffered.msg.flags,
                    }
                }
                _ => buffered.msg.clone(),
            };
            out.put_message(msg)?;
        }
        self.messages = messages;
        self.logger
            .record_debug(&format!("Wrote sweep at elevation {:.2}", self.elevation));
        Ok(())
    }

    fn pass_through(&mut self, out: &mut dyn MessageSink) -> QcResult<()> {
        let messages = std::mem::take(&mut self.messages);
        for buffered in &messages {
            if let Some(beam) = &buffered.msg.beam {
                self.logger.record_beam(
                    "Writing",
                    beam.header.volume_num,
                    beam.header.sweep_num,
                    beam.header.elevation,
                    beam.header.azimuth,
                );
            }
            out.put_message(buffered.msg.clone())?;
        }
        self.messages = messages;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::ScanDirection;
    use crate::radar_interface::beam::BeamHeader;
    use crate::radar_interface::message::VecSink;
    use crate::scoring::scorer::{CombineRole, ScoreComparison, Scorer};
    use crate::terrain::mask::{TerrainType, TerrainUse};

    const MAX_GATES: usize = 8;

    fn config() -> SweepConfig {
        SweepConfig {
            dbz_az_radius: 1,
            vel_az_radius: 1,
            dbz_gate_radius: 1,
            vel_gate_radius: 1,
            gate_spacing: 0.25,
            max_gates: MAX_GATES,
            dbz_field: "DBZ".to_string(),
            vel_field: "VEL".to_string(),
            sw_field: "SW".to_string(),
            sc_spin_threshold: 4.0,
            ap_spin_threshold: 7.0,
            p_spin_threshold: 10.0,
            delta_azimuth: 1.0,
            slant_range_dist: 0.5,
            scan_direction: ScanDirection::BottomUp,
        }
    }

    fn terrain() -> Arc<TerrainMask> {
        Arc::new(TerrainMask::uniform(360, MAX_GATES, 1.0, TerrainType::Land))
    }

    fn window() -> SweepWindow {
        SweepWindow::new(config(), 1, terrain())
    }

    fn fields() -> Vec<FieldParams> {
        vec![
            FieldParams::new("DBZ", "dBZ", 2, 0.5, -32.0),
            FieldParams::new("VEL", "m/s", 2, 0.01, -100.0),
        ]
    }

    fn beam(azimuth: f64, elevation: f64, dbz: &[f64], vel: &[Option<f64>]) -> RadarMessage {
        let params = fields();
        let dbz_raw: Vec<u32> = dbz.iter().map(|&v| params[0].encode(Some(v))).collect();
        let vel_raw: Vec<u32> = vel.iter().map(|&v| params[1].encode(v)).collect();
        let n_gates = dbz.len();
        RadarMessage::beam(BeamMessage {
            header: BeamHeader {
                azimuth,
                elevation,
                sweep_num: 0,
                volume_num: 1,
                time: 1_700_000_000,
                n_gates,
            },
            radar: RadarParams {
                gate_spacing: 0.25,
                start_range: 0.25,
                noise_floor: -113.0,
                radar_constant: 66.0,
            },
            data: BeamData::from_raw(params, n_gates, &[dbz_raw, vel_raw]),
        })
    }

    fn flat_beam(azimuth: f64, dbz: f64) -> RadarMessage {
        beam(azimuth, 0.5, &[dbz; MAX_GATES], &[Some(3.0); MAX_GATES])
    }

    fn flat_range_weight() -> InterestFunction {
        InterestFunction::constant(1.0).unwrap()
    }

    fn tdbz_scorer() -> ScorerGroup {
        let mut scorer = Scorer::new(
            "ap",
            0.5,
            ScoreComparison::GreaterThan,
            CombineRole::Or,
            TerrainUse::All,
            1,
        );
        scorer.set_function(
            FeatureKind::Tdbz,
            InterestFunction::new(
                [0.0, 10.0, 20.0, 30.0, 40.0, 50.0],
                [-1.0, -0.6, -0.2, 0.2, 0.6, 1.0],
                1.0,
            )
            .unwrap(),
            None,
        );
        ScorerGroup::new(vec![scorer], vec!["DBZ".to_string()])
    }

    #[test]
    fn circular_difference_handles_the_seam() {
        assert!((circular_az_diff(1.0, 359.0) - 2.0).abs() < 1e-12);
        assert!((circular_az_diff(359.0, 1.0) - 2.0).abs() < 1e-12);
        assert!((circular_az_diff(10.0, 12.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn spin_counts_direction_reversals_only() {
        let mut spin = SpinState::default();
        // Up, up, down, up: first excursion arms, then two reversals.
        spin.eval(0.0, 10.0, 4.0);
        spin.eval(10.0, 20.0, 4.0);
        spin.eval(20.0, 5.0, 4.0);
        spin.eval(5.0, 15.0, 4.0);
        assert_eq!(spin.count, 2);
        // Below threshold nothing arms.
        let mut quiet = SpinState::default();
        quiet.eval(0.0, 2.0, 4.0);
        quiet.eval(2.0, 0.0, 4.0);
        assert_eq!(quiet.count, 0);
    }

    #[test]
    fn margins_replicate_across_the_seam() {
        let mut window = window();
        for az in 0..8 {
            window.add_message(flat_beam(az as f64, 20.0)).unwrap();
        }
        window.set_data();
        assert_eq!(window.state(), SweepState::DataSet);
        assert_eq!(window.n_beams(), 8);
        // Physical layout: [margin][8 real][margin].
        assert_eq!(window.beams.len(), 10);
        assert_eq!(window.azimuths[0], 7.0);
        assert_eq!(window.azimuths[9], 0.0);
        assert_eq!(window.beams[0], window.beams[8]);
        assert_eq!(window.beams[9], window.beams[1]);
    }

    #[test]
    fn seam_window_matches_a_rotated_sweep() {
        // Eight beams cover the full circle, so the wrap neighbors really
        // are adjacent in azimuth.
        let full_circle = SweepConfig {
            delta_azimuth: 45.0,
            ..config()
        };
        let pattern = |idx: usize| -> [f64; MAX_GATES] {
            if idx == 7 || idx <= 1 {
                let mut dbz = [0.0; MAX_GATES];
                for (gate, value) in dbz.iter_mut().enumerate() {
                    *value = if gate % 2 == 0 { 45.0 } else { 5.0 };
                }
                dbz
            } else {
                [20.0; MAX_GATES]
            }
        };
        let build = |shift: usize| {
            let mut window = SweepWindow::new(full_circle.clone(), 1, terrain());
            for i in 0..8 {
                window
                    .add_message(beam(
                        i as f64 * 45.0,
                        0.5,
                        &pattern((i + shift) % 8),
                        &[None; MAX_GATES],
                    ))
                    .unwrap();
            }
            window.set_data();
            let mut group = tdbz_scorer();
            let mut features = FeatureRecorder::new(None);
            window.score(None, &mut group, &mut features, &flat_range_weight());
            features
        };

        // The noisy run straddles the seam (beams 7, 0, 1); shifting by four
        // parks the same run in the middle of the sweep.
        let at_seam = build(0);
        let rotated = build(4);
        for gate in 0..MAX_GATES {
            assert_eq!(
                at_seam.value(FeatureKind::Tdbz, 0, gate),
                rotated.value(FeatureKind::Tdbz, 4, gate),
                "TDBZ diverges at gate {gate}"
            );
            assert_eq!(
                at_seam.value(FeatureKind::ApSpin, 0, gate),
                rotated.value(FeatureKind::ApSpin, 4, gate),
                "AP spin diverges at gate {gate}"
            );
            assert_eq!(
                at_seam.value(FeatureKind::Sign, 0, gate),
                rotated.value(FeatureKind::Sign, 4, gate),
                "sign diverges at gate {gate}"
            );
        }
        // And the seam beam really saw the noise.
        assert!(at_seam.value(FeatureKind::Tdbz, 0, 3).unwrap() > 50.0);
    }

    #[test]
    fn azimuth_lookup_probes_within_tolerance() {
        let mut window = window();
        for az in 0..8 {
            window.add_message(flat_beam(az as f64, 20.0)).unwrap();
        }
        window.set_data();
        let exact = window.azimuth_index(3.0).unwrap();
        assert!((window.azimuths[exact] - 3.0).abs() < 1e-12);
        // Within 0.4 degrees the probe still lands on the beam.
        assert_eq!(window.azimuth_index(3.4), Some(exact));
        // Beyond the probe width of every beam there is nothing.
        assert_eq!(window.azimuth_index(8.5), None);
    }

    #[test]
    fn median_plane_rejects_outliers() {
        let mut window = window();
        for az in 0..8 {
            let mut vel = [Some(5.0); MAX_GATES];
            if az == 3 {
                vel[4] = Some(50.0);
            }
            window
                .add_message(beam(az as f64, 0.5, &[20.0; MAX_GATES], &vel))
                .unwrap();
        }
        window.set_data();
        // The outlier is a single sample in a 3x3 window.
        let physical = 3 + 1;
        assert!((window.median_vel[physical][4].unwrap() - 5.0).abs() < 0.02);
    }

    #[test]
    fn noisy_patch_is_scored_and_suppressed() {
        let mut window = window();
        for az in 0..8 {
            let mut dbz = [20.0; MAX_GATES];
            if (2..5).contains(&az) {
                for (gate, value) in dbz.iter_mut().enumerate().take(6).skip(2) {
                    *value = if gate % 2 == 0 { 45.0 } else { 5.0 };
                }
            }
            window
                .add_message(beam(az as f64, 0.5, &dbz, &[Some(3.0); MAX_GATES]))
                .unwrap();
        }
        window.set_data();

        let mut group = tdbz_scorer();
        let mut features = FeatureRecorder::new(None);
        window.score(None, &mut group, &mut features, &flat_range_weight());
        assert_eq!(window.state(), SweepState::Scored);
        assert!(window.suppressed_gates() > 0);
        // Deep inside the patch the texture saturates the interest function.
        assert!(features.value(FeatureKind::Tdbz, 3, 4).unwrap() > 50.0);

        let mut out = VecSink::new();
        window.write(&mut out, &mut group, &mut features).unwrap();
        let beams: Vec<_> = out.beams().collect();
        assert_eq!(beams.len(), 8);
        let dbz = beams[3].data.field_index("DBZ").unwrap();
        assert_eq!(beams[3].data.value(dbz, 4), None);
        // Smooth corner of the sweep survives.
        assert_eq!(beams[0].data.value(dbz, 0), Some(20.0));
    }

    #[test]
    fn quiet_sweep_suppresses_nothing() {
        let mut window = window();
        for az in 0..8 {
            window.add_message(flat_beam(az as f64, 20.0)).unwrap();
        }
        window.set_data();
        let mut group = tdbz_scorer();
        let mut features = FeatureRecorder::new(None);
        window.score(None, &mut group, &mut features, &flat_range_weight());
        assert_eq!(window.suppressed_gates(), 0);
    }

    #[test]
    fn vertical_gradient_reads_the_upper_sweep() {
        let mut lower = window();
        let mut upper = window();
        for az in 0..8 {
            lower
                .add_message(beam(az as f64, 0.5, &[10.0; MAX_GATES], &[None; MAX_GATES]))
                .unwrap();
            upper
                .add_message(beam(az as f64, 1.5, &[30.0; MAX_GATES], &[None; MAX_GATES]))
                .unwrap();
        }
        lower.set_data();
        upper.set_data();

        let mut group = tdbz_scorer();
        let mut features = FeatureRecorder::new(None);
        lower.score(Some(&upper), &mut group, &mut features, &flat_range_weight());

        let gdz = features.value(FeatureKind::Gdz, 3, 4).unwrap();
        assert!((gdz - 20.0).abs() < 0.6);
        // SRDZ over a flat field is zero.
        let srdz = features.value(FeatureKind::Srdz, 3, 2).unwrap();
        assert!(srdz.abs() < 0.6);
        // RSINZ carries the gradient sign.
        assert!(features.value(FeatureKind::Rsinz, 3, 4).unwrap() > 0.0);
    }

    #[test]
    fn missing_upper_beam_falls_back_to_noise_model() {
        let mut lower = window();
        let mut upper = window();
        for az in 0..8 {
            lower
                .add_message(beam(az as f64, 0.5, &[10.0; MAX_GATES], &[None; MAX_GATES]))
                .unwrap();
            // Upper sweep covers a different azimuth span entirely.
            upper
                .add_message(beam(az as f64 + 90.0, 1.5, &[30.0; MAX_GATES], &[None; MAX_GATES]))
                .unwrap();
        }
        lower.set_data();
        upper.set_data();

        let mut group = tdbz_scorer();
        let mut features = FeatureRecorder::new(None);
        lower.score(Some(&upper), &mut group, &mut features, &flat_range_weight());

        // gate 4: slant range = 0.25 + 4 * 0.25 = 1.25 km
        let range: f64 = 1.25;
        let expected_upper = -113.0 + 10.0 * (range * range).log10() + 66.0;
        let gdz = features.value(FeatureKind::Gdz, 3, 4).unwrap();
        assert!((gdz - (expected_upper - 10.0)).abs() < 0.6);
    }

    #[test]
    fn gate_spacing_mismatch_poisons_the_sweep() {
        let mut window = window();
        let mut msg = flat_beam(0.0, 20.0);
        if let Some(beam) = msg.beam.as_mut() {
            beam.radar.gate_spacing = 1.0;
        }
        assert!(matches!(
            window.add_message(msg),
            Err(QcError::DataShape(_))
        ));
        assert!(window.init_failed());
        window.add_message(flat_beam(1.0, 20.0)).ok();
        window.set_data();
        assert_ne!(window.state(), SweepState::DataSet);

        // The buffered stream still passes through untouched.
        let mut group = tdbz_scorer();
        let mut features = FeatureRecorder::new(None);
        let mut out = VecSink::new();
        window.write(&mut out, &mut group, &mut features).unwrap();
        assert_eq!(out.messages().len(), 2);
        assert!(out.messages()[1].has_beam());
    }

    #[test]
    fn bad_azimuth_beam_is_skipped_but_kept_in_stream() {
        let mut window = window();
        for az in 0..7 {
            window.add_message(flat_beam(az as f64, 20.0)).unwrap();
        }
        let mut msg = flat_beam(0.0, 20.0);
        if let Some(beam) = msg.beam.as_mut() {
            beam.header.azimuth = 420.0;
        }
        assert!(matches!(
            window.add_message(msg),
            Err(QcError::BadSample(_))
        ));
        assert!(!window.init_failed());
        window.set_data();
        assert_eq!(window.n_beams(), 7);
        assert_eq!(window.messages.len(), 8);
    }

    #[test]
    fn field_count_change_mid_sweep_poisons_the_sweep() {
        let mut window = window();
        for az in 0..7 {
            window.add_message(flat_beam(az as f64, 20.0)).unwrap();
        }
        // Same byte width, one extra field; the shapes no longer line up.
        let mut params = fields();
        params.push(FieldParams::new("SW", "m/s", 2, 0.01, -100.0));
        let raw = vec![vec![100; MAX_GATES]; 3];
        let msg = RadarMessage::beam(BeamMessage {
            header: BeamHeader {
                azimuth: 7.0,
                elevation: 0.5,
                sweep_num: 0,
                volume_num: 1,
                time: 1_700_000_000,
                n_gates: MAX_GATES,
            },
            radar: RadarParams {
                gate_spacing: 0.25,
                start_range: 0.25,
                noise_floor: -113.0,
                radar_constant: 66.0,
            },
            data: BeamData::from_raw(params, MAX_GATES, &raw),
        });
        assert!(matches!(
            window.add_message(msg),
            Err(QcError::DataShape(_))
        ));
        assert!(window.init_failed());

        // The poisoned sweep never reaches DataSet and still passes every
        // buffered message through, the odd beam included.
        window.set_data();
        assert_ne!(window.state(), SweepState::DataSet);
        let mut group = tdbz_scorer();
        let mut features = FeatureRecorder::new(None);
        let mut out = VecSink::new();
        window.write(&mut out, &mut group, &mut features).unwrap();
        assert_eq!(out.messages().len(), 8);
        assert!(out.messages().iter().all(|m| m.has_beam()));
    }

    #[test]
    fn volume_flags_bracket_the_diagnostic_streams() {
        use crate::radar_interface::message::SharedVecSink;

        let mut window = window();
        window
            .add_message(RadarMessage::flags(SweepFlags::start_of_volume()))
            .unwrap();
        for az in 0..8 {
            window.add_message(flat_beam(az as f64, 20.0)).unwrap();
        }
        window.set_data();

        let interest = SharedVecSink::new();
        let mut group = tdbz_scorer();
        group.scorers_mut()[0].set_interest_sink(Box::new(interest.clone()));
        let mut features = FeatureRecorder::new(None);
        window.score(None, &mut group, &mut features, &flat_range_weight());

        let mut out = VecSink::new();
        window.write(&mut out, &mut group, &mut features).unwrap();

        let messages = interest.messages();
        assert!(messages[0].flags.unwrap().start_of_volume);
        // One interest beam per input beam follows the flag.
        assert_eq!(messages.len(), 9);
        // The primary stream re-emits the flag message it buffered.
        assert!(out.messages()[0].flags.unwrap().start_of_volume);
    }
}
