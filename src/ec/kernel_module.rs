use std::{
    fs,
    io,
    os::unix::fs::PermissionsExt,
    path::Path,
    process::Command,
};

use thiserror::Error;
use tracing::{debug, info};

const MODULES_FILE: &str = "/proc/modules";
const EC_MODULE: &str = "ec_sys";
const WRITE_SUPPORT: &str = "write_support=1";

#[derive(Debug, Error)]
pub enum KernelModuleError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("modprobe {args:?} exited with {status}")]
    Modprobe { args: Vec<String>, status: i32 },
    #[error("EC register file {0:?} is not writable after reloading ec_sys")]
    NotWritable(String),
}

// Return true if the module list contains the ec_sys module
pub fn is_loaded(modules: &str) -> bool {
    modules
        .lines()
        .any(|line| line.split_whitespace().next() == Some(EC_MODULE))
}

// Make sure the ec_sys module is loaded with write support enabled
// so the register file at `ecio_path` accepts writes
pub fn ensure_write_support(ecio_path: &Path) -> Result<(), KernelModuleError> {
    let modules = fs::read_to_string(MODULES_FILE).unwrap_or_default();

    if !is_loaded(&modules) {
        info!("Loading {EC_MODULE} with {WRITE_SUPPORT}");
        modprobe(&[EC_MODULE, WRITE_SUPPORT])?;
    }

    // The module might have been loaded read only by someone else
    if !is_writable(ecio_path)? {
        info!("Reloading {EC_MODULE} with {WRITE_SUPPORT}");
        modprobe(&["-r", EC_MODULE])?;
        modprobe(&[EC_MODULE, WRITE_SUPPORT])?;

        if !is_writable(ecio_path)? {
            return Err(KernelModuleError::NotWritable(
                ecio_path.display().to_string(),
            ));
        }
    }

    Ok(())
}

// Check the owner write bit of the register file
fn is_writable(path: &Path) -> Result<bool, KernelModuleError> {
    let mode = fs::metadata(path)?.permissions().mode();
    Ok(mode & 0o200 != 0)
}

fn modprobe(args: &[&str]) -> Result<(), KernelModuleError> {
    debug!("Running modprobe {:?}", args);

    let status = Command::new("modprobe").args(args).status()?;

    if !status.success() {
        return Err(KernelModuleError::Modprobe {
            args: args.iter().map(|a| a.to_string()).collect(),
            status: status.code().unwrap_or(-1),
        });
    }

    Ok(())
}
