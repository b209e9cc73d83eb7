use std::{fmt, io, path::PathBuf, process};

use nix::{
    errno::Errno,
    sys::signal::{self as unix_signal, Signal as UnixSignal},
    unistd::{self, Pid},
};
use thiserror::Error;
use tokio::{
    select,
    signal::unix::{Signal, SignalKind, signal},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    fan_manager::FanManager,
    pid_file::{PidFile, PidFileError},
};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("omen-fand must be run as root")]
    NotRoot,
    #[error("omen-fand is already running (PID file {path:?}, PID: {pid:?})")]
    AlreadyRunning { path: PathBuf, pid: Option<u32> },
    #[error("Cannot {action} the daemon while it is {state}")]
    InvalidState {
        action: &'static str,
        state: DaemonState,
    },
    #[error(transparent)]
    PidFile(#[from] PidFileError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Root,
    Unprivileged,
}

impl Privilege {
    // Effective user of the running process
    pub fn current() -> Self {
        if unistd::geteuid().is_root() {
            Privilege::Root
        } else {
            Privilege::Unprivileged
        }
    }

    pub fn is_root(self) -> bool {
        self == Privilege::Root
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Starting,
    Running,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DaemonState::Starting => "starting",
            DaemonState::Running => "running",
            DaemonState::ShuttingDown => "shutting down",
            DaemonState::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

// Owns the control loop and the liveness marker for the
// whole life of the service
pub struct Daemon {
    fan_manager: FanManager,
    pid_file: PidFile,
    state: DaemonState,
}

impl Daemon {
    pub fn new(fan_manager: FanManager, pid_file: PidFile) -> Self {
        Self {
            fan_manager,
            pid_file,
            state: DaemonState::Starting,
        }
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn fan_manager(&self) -> &FanManager {
        &self.fan_manager
    }

    // Check the preconditions and claim the liveness marker.
    // The existence check and the creation are not atomic,
    // two daemons started at the same instant can both succeed
    pub fn start(&mut self, privilege: Privilege) -> Result<(), DaemonError> {
        if self.state != DaemonState::Starting {
            return Err(DaemonError::InvalidState {
                action: "start",
                state: self.state,
            });
        }

        if !privilege.is_root() {
            return Err(DaemonError::NotRoot);
        }

        if self.pid_file.exists() {
            return Err(DaemonError::AlreadyRunning {
                path: self.pid_file.path().to_path_buf(),
                pid: self.pid_file.read().ok().flatten(),
            });
        }

        let pid = process::id();
        self.pid_file.create(pid)?;

        info!("omen-fand started with PID {pid}");
        self.state = DaemonState::Running;

        Ok(())
    }

    // Drive the fans until the token is cancelled
    pub async fn run(&mut self, token: CancellationToken) -> Result<(), DaemonError> {
        if self.state != DaemonState::Running {
            return Err(DaemonError::InvalidState {
                action: "run",
                state: self.state,
            });
        }

        self.fan_manager.run(token).await;
        self.state = DaemonState::ShuttingDown;

        Ok(())
    }

    // Remove the marker and hand the fans back to the BIOS.
    // Both steps are attempted whatever happens to the other one
    pub fn shutdown(&mut self) {
        self.state = DaemonState::ShuttingDown;
        info!("Shutting down");

        if let Err(err) = self.pid_file.remove() {
            error!("{err}");
        }

        if let Err(err) = self.fan_manager.cleanup() {
            for e in err.chain() {
                error!("{e}");
            }
        }

        self.state = DaemonState::Terminated;
    }

    // Full lifecycle: start, run until cancelled, shut down
    pub async fn serve(
        &mut self,
        privilege: Privilege,
        token: CancellationToken,
    ) -> Result<(), DaemonError> {
        self.start(privilege)?;
        self.run(token).await?;
        self.shutdown();

        Ok(())
    }
}

// Turns SIGINT, SIGHUP and SIGTERM into a shutdown request
pub struct TerminationListener {
    interrupt: Signal,
    hangup: Signal,
    terminate: Signal,
}

impl TerminationListener {
    // The handlers are installed here, signals received after
    // this call are no longer fatal to the process
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    // Wait for the next termination signal and return its name
    pub async fn wait(&mut self) -> &'static str {
        select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    // Cancel the token on the first signal. Nothing else happens
    // in signal context, the shutdown runs in the main flow
    pub async fn cancel_on_signal(mut self, token: CancellationToken) {
        select! {
            sig = self.wait() => {
                info!("Caught signal: {sig}");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    }
}

// Ask a running daemon to stop.
// Returns false when no process with this PID exists
pub fn send_terminate(pid: u32) -> io::Result<bool> {
    // PID 0 and negative values would target whole process groups
    let raw = i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid PID {pid}")))?;

    match unix_signal::kill(Pid::from_raw(raw), UnixSignal::SIGTERM) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(errno.into()),
    }
}
