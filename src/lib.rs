pub mod arg_parser;
pub mod bios;
pub mod config;
pub mod daemon;
pub mod device;
pub mod ec;
pub mod errors;
pub mod fan_curve;
pub mod fan_manager;
pub mod fans;
pub mod hwmon;
pub mod logger;
pub mod pid_file;
pub mod temperature;
