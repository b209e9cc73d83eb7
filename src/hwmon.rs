use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

// hwmon directory of the hp-wmi platform driver
pub const HP_WMI_HWMON: &str = "/sys/devices/platform/hp-wmi/hwmon";

// pwm1_enable values understood by hp-wmi
const BOOST_ON: &str = "0";
const BOOST_OFF: &str = "2";

// Fan RPM readout and fan boost through the hp-wmi driver
#[derive(Debug, Clone)]
pub struct HpWmi {
    hwmon_dir: PathBuf,
}

impl HpWmi {
    // Find the hwmonN directory registered by hp-wmi under `base`
    pub fn discover(base: &Path) -> io::Result<Self> {
        let mut dirs = fs::read_dir(base)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("hwmon"))
            })
            .collect::<Vec<_>>();
        dirs.sort();

        let hwmon_dir = dirs.into_iter().next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No hwmon device under {}", base.display()),
            )
        })?;

        debug!("Found hp-wmi hwmon at {:?}", hwmon_dir);

        Ok(Self { hwmon_dir })
    }

    // Current speed of fan 1 or 2 in RPM
    pub fn fan_rpm(&self, fan: u8) -> io::Result<u32> {
        let raw = fs::read_to_string(self.hwmon_dir.join(format!("fan{fan}_input")))?;

        raw.trim()
            .parse()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    // With boost enabled the fans run at full speed and
    // both the BIOS and user settings are ignored
    pub fn boost_enabled(&self) -> io::Result<bool> {
        let raw = fs::read_to_string(self.pwm_enable_path())?;
        Ok(raw.trim() == BOOST_ON)
    }

    pub fn set_boost(&self, enabled: bool) -> io::Result<()> {
        let value = if enabled { BOOST_ON } else { BOOST_OFF };
        fs::write(self.pwm_enable_path(), value)
    }

    fn pwm_enable_path(&self) -> PathBuf {
        self.hwmon_dir.join("pwm1_enable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_hwmon() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let hwmon = dir.path().join("hwmon5");
        fs::create_dir(&hwmon).unwrap();
        fs::write(hwmon.join("fan1_input"), "2700\n").unwrap();
        fs::write(hwmon.join("fan2_input"), "2900\n").unwrap();
        fs::write(hwmon.join("pwm1_enable"), "2\n").unwrap();
        dir
    }

    #[test]
    fn test_read_fan_rpm() {
        let dir = fake_hwmon();
        let wmi = HpWmi::discover(dir.path()).unwrap();

        assert_eq!(wmi.fan_rpm(1).unwrap(), 2700);
        assert_eq!(wmi.fan_rpm(2).unwrap(), 2900);
        assert!(wmi.fan_rpm(3).is_err());
    }

    #[test]
    fn test_toggle_boost() {
        let dir = fake_hwmon();
        let wmi = HpWmi::discover(dir.path()).unwrap();

        assert!(!wmi.boost_enabled().unwrap());
        wmi.set_boost(true).unwrap();
        assert!(wmi.boost_enabled().unwrap());
        wmi.set_boost(false).unwrap();
        assert!(!wmi.boost_enabled().unwrap());
    }

    #[test]
    fn test_missing_hwmon() {
        let dir = tempfile::tempdir().unwrap();

        let err = HpWmi::discover(dir.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
