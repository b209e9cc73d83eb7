use crate::ec::{EcLayout, RegisterError, SharedIo};

// Writes the fan speed registers.
// Speeds are given in percent and converted to the
// hardware unit range of each fan (RPM / 100)
pub struct FanActuator {
    io: SharedIo,
    layout: EcLayout,
}

impl FanActuator {
    pub fn new(io: SharedIo, layout: &EcLayout) -> Self {
        Self {
            io,
            layout: *layout,
        }
    }

    // Set both fans from a speed percentage each
    pub fn set_fan_speeds(
        &self,
        percent1: f64,
        percent2: f64,
    ) -> Result<(u8, u8), RegisterError> {
        let units1 = percent_to_units(percent1, self.layout.fan1_max);
        let units2 = percent_to_units(percent2, self.layout.fan2_max);

        self.set_fan_units(units1, units2)?;

        Ok((units1, units2))
    }

    // Set both fans in hardware units, clamped to each fan maximum
    pub fn set_fan_units(&self, units1: u8, units2: u8) -> Result<(), RegisterError> {
        let units1 = units1.min(self.layout.fan1_max);
        let units2 = units2.min(self.layout.fan2_max);

        self.io.write_byte(self.layout.fan1_offset, units1)?;
        self.io.write_byte(self.layout.fan2_offset, units2)?;

        Ok(())
    }

    pub fn layout(&self) -> &EcLayout {
        &self.layout
    }
}

// round(max * percent / 100), with the percentage clamped to 0-100
pub fn percent_to_units(percent: f64, max: u8) -> u8 {
    let percent = if percent.is_nan() { 0. } else { percent.clamp(0., 100.) };

    (max as f64 * percent / 100.).round() as u8
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ec::testing::MemoryEc;

    #[test]
    fn test_percent_conversion_per_fan() {
        assert_eq!(percent_to_units(0., 55), 0);
        assert_eq!(percent_to_units(100., 55), 55);
        assert_eq!(percent_to_units(100., 57), 57);
        // 27.5 and 28.5 round away from zero
        assert_eq!(percent_to_units(50., 55), 28);
        assert_eq!(percent_to_units(50., 57), 29);
        assert_eq!(percent_to_units(31., 55), 17);
    }

    #[test]
    fn test_out_of_range_percent_is_clamped() {
        assert_eq!(percent_to_units(140., 55), 55);
        assert_eq!(percent_to_units(-3., 57), 0);
        assert_eq!(percent_to_units(f64::NAN, 57), 0);
    }

    #[test]
    fn test_set_fan_speeds_writes_both_registers() {
        let layout = EcLayout::default();
        let ec = Arc::new(MemoryEc::new());
        let actuator = FanActuator::new(ec.clone(), &layout);

        assert_eq!(actuator.set_fan_speeds(50., 100.).unwrap(), (28, 57));
        assert_eq!(
            ec.writes(),
            vec![(layout.fan1_offset, 28), (layout.fan2_offset, 57)]
        );
    }

    #[test]
    fn test_set_fan_units_clamps_to_max() {
        let layout = EcLayout::default();
        let ec = Arc::new(MemoryEc::new());
        let actuator = FanActuator::new(ec.clone(), &layout);

        actuator.set_fan_units(90, 40).unwrap();
        assert_eq!(ec.get(layout.fan1_offset), 55);
        assert_eq!(ec.get(layout.fan2_offset), 40);
    }
}
