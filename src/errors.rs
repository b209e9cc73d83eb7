use std::io;

use thiserror::Error;

use crate::{
    arg_parser::ArgsError, config::ConfigError, daemon::DaemonError, device::DeviceError,
    ec::{RegisterError, kernel_module::KernelModuleError},
    fan_curve::linear_curve::CurveError, fan_manager::FanManagerError, pid_file::PidFileError,
};

// The main error type of the command line tool
#[derive(Debug, Error)]
pub enum OmenFanError {
    #[error(transparent)]
    Args(#[from] ArgsError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Curve(#[from] CurveError),
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    FanManager(#[from] FanManagerError),
    #[error(transparent)]
    KernelModule(#[from] KernelModuleError),
    #[error(transparent)]
    PidFile(#[from] PidFileError),
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("Root access is required for this command")]
    NotRoot,
    #[error("PID file exists without a process, omen-fand (PID {0}) was killed unexpectedly")]
    StaleDaemon(u32),
}

impl OmenFanError {
    pub fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| OmenFanError::Io { context, source }
    }

    // Exit code of the process for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            OmenFanError::Args(ArgsError::Exit(code)) => *code,
            OmenFanError::Args(_) => 2,
            _ => 1,
        }
    }
}
