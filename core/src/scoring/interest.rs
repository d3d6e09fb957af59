use serde::{Deserialize, Serialize};

use crate::prelude::{QcError, QcResult};

/// Number of control points in every interest function.
pub const N_CONTROL_POINTS: usize = 6;

/// Quantization used for interest and confidence diagnostic streams; covers
/// [-1, 1] in a two-byte field.
pub const INTEREST_SCALE: f64 = 0.0001;
pub const INTEREST_BIAS: f64 = -1.0;

/// Monotone six-point piecewise-linear scorer mapping a derived feature value
/// to an interest in [-1, 1], with an associated fusion weight.
///
/// Construction is validation: an `InterestFunction` that exists is usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestFunction {
    x: [f64; N_CONTROL_POINTS],
    y: [f64; N_CONTROL_POINTS],
    weight: f64,
}

impl InterestFunction {
    pub fn new(
        x: [f64; N_CONTROL_POINTS],
        y: [f64; N_CONTROL_POINTS],
        weight: f64,
    ) -> QcResult<Self> {
        for pair in x.windows(2) {
            if pair[0] >= pair[1] {
                return Err(QcError::InvalidFunction(format!(
                    "x control points must be strictly increasing, got {} before {}",
                    pair[0], pair[1]
                )));
            }
        }
        for &value in &y {
            if !(-1.0..=1.0).contains(&value) {
                return Err(QcError::InvalidFunction(format!(
                    "y control point {value} outside [-1, 1]"
                )));
            }
        }
        Ok(Self { x, y, weight })
    }

    /// Flat function returning `value` everywhere; handy as a neutral range
    /// weight.
    pub fn constant(value: f64) -> QcResult<Self> {
        Self::new(
            [0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            [value; N_CONTROL_POINTS],
            1.0,
        )
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Interest for a feature value. Absent in, absent out; values outside
    /// the control range clamp to the end-point interests.
    pub fn apply(&self, value: Option<f64>) -> Option<f64> {
        let v = value?;
        if v <= self.x[0] {
            return Some(self.y[0]);
        }
        if v >= self.x[N_CONTROL_POINTS - 1] {
            return Some(self.y[N_CONTROL_POINTS - 1]);
        }
        for i in 0..N_CONTROL_POINTS - 1 {
            if v <= self.x[i + 1] {
                let t = (v - self.x[i]) / (self.x[i + 1] - self.x[i]);
                return Some(self.y[i] + t * (self.y[i + 1] - self.y[i]));
            }
        }
        // Unreachable: v < x[5] guarantees a bracketing segment.
        Some(self.y[N_CONTROL_POINTS - 1])
    }
}
