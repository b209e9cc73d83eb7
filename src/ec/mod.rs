use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tracing::trace;

pub mod kernel_module;

// Register file exposed by the ec_sys kernel module
pub const ECIO_FILE: &str = "/sys/kernel/debug/ec/ec0/io";

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("Failed to open EC register file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error on EC register {offset:#04x}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error(
        "Truncated write on EC register {offset:#04x}: wrote {written} of {expected} bytes"
    )]
    TruncatedWrite {
        offset: u64,
        written: usize,
        expected: usize,
    },
}

// Byte addressable access to the embedded controller registers
pub trait RegisterIo {
    // Read `len` bytes starting at the given register offset
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, RegisterError>;

    // Write the given bytes starting at the given register offset
    fn write(&self, offset: u64, data: &[u8]) -> Result<(), RegisterError>;

    fn read_byte(&self, offset: u64) -> Result<u8, RegisterError> {
        let bytes = self.read(offset, 1)?;
        Ok(bytes[0])
    }

    fn write_byte(&self, offset: u64, value: u8) -> Result<(), RegisterError> {
        self.write(offset, &[value])
    }
}

// The register interface is shared between the sampler, the fan
// actuator and the BIOS arbiter
pub type SharedIo = Arc<dyn RegisterIo + Send + Sync>;

// File backed register interface.
// The file is opened on every access so a module reload
// never leaves the daemon with a stale handle
#[derive(Debug, Clone)]
pub struct EcFile {
    path: PathBuf,
}

impl EcFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self, writable: bool) -> Result<File, RegisterError> {
        OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&self.path)
            .map_err(|source| RegisterError::Open {
                path: self.path.clone(),
                source,
            })
    }
}

impl Default for EcFile {
    fn default() -> Self {
        Self::new(Path::new(ECIO_FILE))
    }
}

impl RegisterIo for EcFile {
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, RegisterError> {
        let mut file = self.open(false)?;
        let io_err = |source: io::Error| RegisterError::Io { offset, source };

        file.seek(SeekFrom::Start(offset)).map_err(io_err)?;

        let mut buf = vec![0; len];
        file.read_exact(&mut buf).map_err(io_err)?;

        trace!("EC read {offset:#04x}: {buf:?}");

        Ok(buf)
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), RegisterError> {
        let mut file = self.open(true)?;
        let io_err = |source: io::Error| RegisterError::Io { offset, source };

        file.seek(SeekFrom::Start(offset)).map_err(io_err)?;

        // A short write is reported instead of retried, the caller
        // decides whether the whole sequence has to be redone
        let written = file.write(data).map_err(io_err)?;
        if written != data.len() {
            return Err(RegisterError::TruncatedWrite {
                offset,
                written,
                expected: data.len(),
            });
        }

        trace!("EC write {offset:#04x}: {data:?}");

        Ok(())
    }
}

// Model specific register offsets and fan ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcLayout {
    pub fan1_offset: u64,
    pub fan2_offset: u64,
    pub bios_offset: u64,
    pub timer_offset: u64,
    pub cpu_temp_offset: u64,
    pub gpu_temp_offset: u64,

    // Maximum fan speed in hardware units (RPM / 100)
    pub fan1_max: u8,
    pub fan2_max: u8,
}

impl EcLayout {
    // OMEN by HP Laptop 16
    pub const OMEN_16: EcLayout = EcLayout {
        fan1_offset: 0x34,
        fan2_offset: 0x35,
        bios_offset: 0x62,
        timer_offset: 0x63,
        cpu_temp_offset: 0x57,
        gpu_temp_offset: 0xB7,

        fan1_max: 55,
        fan2_max: 57,
    };
}

impl Default for EcLayout {
    fn default() -> Self {
        Self::OMEN_16
    }
}
