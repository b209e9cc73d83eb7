pub mod hysteresis_curve;
pub mod linear_curve;

pub trait FanCurve {
    // Return the fan speed percentage for the given temperature
    fn get_speed(&self, temp: f64) -> f64;

    // Return the number of points in the curve
    fn points_num(&self) -> usize;
}
