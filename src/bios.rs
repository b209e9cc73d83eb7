use std::{fmt, str::FromStr, time::Duration};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::ec::{EcLayout, RegisterError, SharedIo};

// Value of the ownership register while the daemon drives the fans
const DAEMON_OWNED: u8 = 6;
const FIRMWARE_OWNED: u8 = 0;

// The EC ignores a timer write that follows the ownership write too closely
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

// Who is driving the fans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    FirmwareOwned,
    DaemonOwned,
}

#[derive(Debug, Error, PartialEq)]
#[error("Invalid BIOS control value \"{0}\", expected a boolean (true/false, 1/0)")]
pub struct InvalidOwnership(pub String);

// Parse the user facing "BIOS control enabled" flag
impl FromStr for Ownership {
    type Err = InvalidOwnership;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match crate::arg_parser::parse_bool(s) {
            Some(true) => Ok(Ownership::FirmwareOwned),
            Some(false) => Ok(Ownership::DaemonOwned),
            None => Err(InvalidOwnership(s.to_string())),
        }
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::FirmwareOwned => write!(f, "BIOS"),
            Ownership::DaemonOwned => write!(f, "user"),
        }
    }
}

// Hands fan control back and forth between the BIOS and us.
// There is no read back or atomicity across the two writes of
// a sequence, the EC gives no way to do better
pub struct BiosArbiter {
    io: SharedIo,
    layout: EcLayout,
    settle_delay: Duration,

    // Last sequence issued, the hardware holds the real state
    last_issued: Option<Ownership>,
}

impl BiosArbiter {
    pub fn new(io: SharedIo, layout: &EcLayout) -> Self {
        Self {
            io,
            layout: *layout,
            settle_delay: SETTLE_DELAY,
            last_issued: None,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    // Disable BIOS fan control.
    // The BIOS takes control back when the timer register is
    // not refreshed, so this has to be repeated every poll
    pub async fn take_ownership(&mut self) -> Result<(), RegisterError> {
        self.io.write_byte(self.layout.bios_offset, DAEMON_OWNED)?;
        sleep(self.settle_delay).await;
        self.io.write_byte(self.layout.timer_offset, 0)?;

        if self.last_issued != Some(Ownership::DaemonOwned) {
            info!("BIOS fan control disabled");
        }
        self.last_issued = Some(Ownership::DaemonOwned);

        Ok(())
    }

    // Give fan control back to the BIOS starting from stopped fans
    pub fn release_ownership(&mut self) -> Result<(), RegisterError> {
        self.io.write_byte(self.layout.bios_offset, FIRMWARE_OWNED)?;
        self.io.write_byte(self.layout.fan1_offset, 0)?;
        self.io.write_byte(self.layout.fan2_offset, 0)?;

        info!("BIOS fan control restored");
        self.last_issued = Some(Ownership::FirmwareOwned);

        Ok(())
    }

    pub async fn set_firmware_ownership(
        &mut self,
        ownership: Ownership,
    ) -> Result<(), RegisterError> {
        debug!("Setting fan ownership to {ownership}");

        match ownership {
            Ownership::DaemonOwned => self.take_ownership().await,
            Ownership::FirmwareOwned => self.release_ownership(),
        }
    }

    // Read the ownership register back from the hardware
    pub fn current_ownership(&self) -> Result<Ownership, RegisterError> {
        let value = self.io.read_byte(self.layout.bios_offset)?;

        Ok(if value == DAEMON_OWNED {
            Ownership::DaemonOwned
        } else {
            Ownership::FirmwareOwned
        })
    }

    pub fn last_issued(&self) -> Option<Ownership> {
        self.last_issued
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ec::testing::MemoryEc;

    fn arbiter() -> (Arc<MemoryEc>, BiosArbiter, EcLayout) {
        let layout = EcLayout::default();
        let ec = Arc::new(MemoryEc::new());
        let arbiter = BiosArbiter::new(ec.clone(), &layout)
            .with_settle_delay(Duration::from_millis(1));

        (ec, arbiter, layout)
    }

    #[tokio::test]
    async fn test_take_writes_ownership_before_timer() {
        let (ec, mut arbiter, layout) = arbiter();
        ec.set(layout.timer_offset, 120);

        arbiter.take_ownership().await.unwrap();

        assert_eq!(
            ec.writes(),
            vec![(layout.bios_offset, 6), (layout.timer_offset, 0)]
        );
        assert_eq!(arbiter.current_ownership().unwrap(), Ownership::DaemonOwned);
        assert_eq!(arbiter.last_issued(), Some(Ownership::DaemonOwned));
    }

    #[tokio::test]
    async fn test_take_waits_settle_delay() {
        let layout = EcLayout::default();
        let ec = Arc::new(MemoryEc::new());
        let mut arbiter = BiosArbiter::new(ec, &layout);

        let start = tokio::time::Instant::now();
        arbiter.take_ownership().await.unwrap();

        assert!(start.elapsed() >= SETTLE_DELAY);
    }

    #[test]
    fn test_release_writes_ownership_before_fans() {
        let (ec, mut arbiter, layout) = arbiter();
        ec.set(layout.bios_offset, 6);
        ec.set(layout.fan1_offset, 30);
        ec.set(layout.fan2_offset, 31);

        arbiter.release_ownership().unwrap();

        assert_eq!(
            ec.writes(),
            vec![
                (layout.bios_offset, 0),
                (layout.fan1_offset, 0),
                (layout.fan2_offset, 0)
            ]
        );
        assert_eq!(
            arbiter.current_ownership().unwrap(),
            Ownership::FirmwareOwned
        );
    }

    #[tokio::test]
    async fn test_set_firmware_ownership_dispatch() {
        let (ec, mut arbiter, layout) = arbiter();

        arbiter
            .set_firmware_ownership(Ownership::DaemonOwned)
            .await
            .unwrap();
        assert_eq!(ec.get(layout.bios_offset), 6);

        arbiter
            .set_firmware_ownership(Ownership::FirmwareOwned)
            .await
            .unwrap();
        assert_eq!(ec.get(layout.bios_offset), 0);
        assert_eq!(arbiter.last_issued(), Some(Ownership::FirmwareOwned));
    }

    #[tokio::test]
    async fn test_failed_write_is_reported() {
        let (ec, mut arbiter, _) = arbiter();
        ec.fail_writes(true);

        assert!(arbiter.take_ownership().await.is_err());
        assert!(arbiter.release_ownership().is_err());
        assert_eq!(arbiter.last_issued(), None);
    }

    #[test]
    fn test_parse_ownership() {
        assert_eq!("true".parse::<Ownership>(), Ok(Ownership::FirmwareOwned));
        assert_eq!("1".parse::<Ownership>(), Ok(Ownership::FirmwareOwned));
        assert_eq!("False".parse::<Ownership>(), Ok(Ownership::DaemonOwned));
        assert_eq!("0".parse::<Ownership>(), Ok(Ownership::DaemonOwned));
        assert_eq!(
            "maybe".parse::<Ownership>(),
            Err(InvalidOwnership("maybe".to_string()))
        );
    }
}
