use std::{fs, io, path::Path};

use thiserror::Error;

pub const DEVICE_FILE: &str = "/sys/devices/virtual/dmi/id/product_name";

// Laptop models the register layout was verified on
pub const DEVICE_LIST: &[&str] = &["OMEN by HP Laptop 16"];

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to read device file: {0}")]
    Io(#[from] io::Error),
    #[error("Your laptop ({0}) is not in the list of supported laptops")]
    Unsupported(String),
}

pub fn read_product_name(path: &Path) -> Result<String, DeviceError> {
    Ok(fs::read_to_string(path)?.trim().to_string())
}

pub fn is_supported(product_name: &str) -> bool {
    DEVICE_LIST.iter().any(|model| product_name.contains(model))
}

// Check the running laptop against the supported models
pub fn check_device(path: &Path) -> Result<String, DeviceError> {
    let product_name = read_product_name(path)?;

    if !is_supported(&product_name) {
        return Err(DeviceError::Unsupported(product_name));
    }

    Ok(product_name)
}
