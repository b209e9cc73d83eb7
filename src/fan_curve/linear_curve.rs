use thiserror::Error;

use crate::{config::ServiceConfig, fan_curve::FanCurve};

// Number of decimal places kept in the slope table
const SLOPE_PRECISION: i32 = 2;

#[derive(Debug, Error, PartialEq)]
pub enum CurveError {
    #[error("Temperature and speed curves differ in length ({temps} vs {speeds})")]
    LengthMismatch { temps: usize, speeds: usize },
    #[error("A fan curve needs at least 2 points, got {0}")]
    TooFewPoints(usize),
    #[error("Temperature curve is not ascending at index {0}")]
    NotAscending(usize),
    #[error("Speed {speed}% at index {index} is outside 0-100")]
    SpeedOutOfRange { index: usize, speed: u8 },
    #[error("Idle speed {0}% is outside 0-100")]
    IdleOutOfRange(u8),
}

// Piecewise linear fan curve.
// Built once from the configuration, the slope of every
// segment is computed up front so a lookup is a binary search
#[derive(Debug, Clone)]
pub struct LinearCurve {
    temperatures: Vec<i32>,
    speeds: Vec<u8>,
    slopes: Vec<f64>,

    // Speed used at or below the first breakpoint
    idle_speed: u8,
}

impl LinearCurve {
    pub fn new(
        temperatures: &[i32],
        speeds: &[u8],
        idle_speed: u8,
    ) -> Result<Self, CurveError> {
        if temperatures.len() != speeds.len() {
            return Err(CurveError::LengthMismatch {
                temps: temperatures.len(),
                speeds: speeds.len(),
            });
        }

        if temperatures.len() < 2 {
            return Err(CurveError::TooFewPoints(temperatures.len()));
        }

        if let Some(i) = temperatures.windows(2).position(|w| w[0] > w[1]) {
            return Err(CurveError::NotAscending(i + 1));
        }

        if let Some((index, &speed)) =
            speeds.iter().enumerate().find(|(_, s)| **s > 100)
        {
            return Err(CurveError::SpeedOutOfRange { index, speed });
        }

        if idle_speed > 100 {
            return Err(CurveError::IdleOutOfRange(idle_speed));
        }

        let slopes = temperatures
            .windows(2)
            .zip(speeds.windows(2))
            .map(|(t, s)| segment_slope((t[0], s[0]), (t[1], s[1])))
            .collect();

        Ok(Self {
            temperatures: temperatures.to_vec(),
            speeds: speeds.to_vec(),
            slopes,
            idle_speed,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, CurveError> {
        Self::new(
            &config.temperature_curve,
            &config.speed_curve,
            config.idle_speed,
        )
    }

    // Map a temperature to the target speed percentage, not rounded
    pub fn compute_target_speed(&self, temp: f64) -> f64 {
        let first = self.temperatures[0];
        let last = self.temperatures.len() - 1;

        if temp <= first as f64 {
            return self.idle_speed as f64;
        }

        if temp >= self.temperatures[last] as f64 {
            return self.speeds[last] as f64;
        }

        // Leftmost point with a temperature not below `temp`.
        // `temp` is strictly inside the curve so 0 < i <= last
        let i = self.temperatures.partition_point(|&t| (t as f64) < temp);

        // Breakpoints are exact, the rounded slope would otherwise drift
        if self.temperatures[i] as f64 == temp {
            return self.speeds[i] as f64;
        }

        let x0 = self.temperatures[i - 1] as f64;
        let y0 = self.speeds[i - 1] as f64;

        y0 + self.slopes[i - 1] * (temp - x0)
    }

    pub fn temperatures(&self) -> &[i32] {
        &self.temperatures
    }

    pub fn speeds(&self) -> &[u8] {
        &self.speeds
    }

    pub fn slopes(&self) -> &[f64] {
        &self.slopes
    }

    pub fn idle_speed(&self) -> u8 {
        self.idle_speed
    }
}

impl FanCurve for LinearCurve {
    fn get_speed(&self, temp: f64) -> f64 {
        self.compute_target_speed(temp)
    }

    fn points_num(&self) -> usize {
        self.temperatures.len()
    }
}

// Slope between two points rounded to SLOPE_PRECISION decimals.
// A zero width segment can never be selected by the lookup
fn segment_slope(p0: (i32, u8), p1: (i32, u8)) -> f64 {
    let dt = (p1.0 - p0.0) as f64;
    if dt == 0. {
        return 0.;
    }

    let slope = (p1.1 as f64 - p0.1 as f64) / dt;
    let scale = 10f64.powi(SLOPE_PRECISION);

    (slope * scale).round() / scale
}
