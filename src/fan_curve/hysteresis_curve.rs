use std::cell::Cell;

use crate::fan_curve::FanCurve;

pub const DEFAULT_HYSTERESIS: f64 = 2.;

#[derive(Debug)]
pub struct HysteresisCurve<T: FanCurve> {
    curve: T,

    // Last speed handed out, None until the first reading
    last_emitted: Cell<Option<f64>>,

    // Minimum change in speed percentage needed to
    // replace the last emitted value
    threshold: f64,
}

impl<T: FanCurve> HysteresisCurve<T> {
    // Create a hysteresis curve from an existing fan curve
    pub fn from_curve(curve: T, threshold: f64) -> HysteresisCurve<T> {
        Self {
            curve,
            last_emitted: Cell::new(None),
            threshold,
        }
    }

    // Pass a candidate speed through the hysteresis band.
    // A change equal to the threshold is accepted
    pub fn filter(&self, candidate: f64) -> f64 {
        if let Some(last) = self.last_emitted.get() {
            if (candidate - last).abs() < self.threshold {
                return last;
            }
        }

        self.last_emitted.set(Some(candidate));
        candidate
    }

    pub fn last_emitted(&self) -> Option<f64> {
        self.last_emitted.get()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    // Access the underlying curve without going through the filter
    pub fn inner(&self) -> &T {
        &self.curve
    }
}

impl<T: FanCurve> FanCurve for HysteresisCurve<T> {
    fn get_speed(&self, temp: f64) -> f64 {
        let candidate = self.curve.get_speed(temp);
        self.filter(candidate)
    }

    fn points_num(&self) -> usize {
        self.curve.points_num()
    }
}
