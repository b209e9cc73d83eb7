use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use omen_fan::{
    arg_parser::DaemonArgs,
    config::Config,
    daemon::{Daemon, Privilege, TerminationListener},
    ec::{EcFile, EcLayout},
    fan_manager::FanManager,
    logger::{self, LOG_DIR},
    pid_file::PidFile,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    logger::init_logging(Some(Path::new(LOG_DIR)));

    if let Err(err) = run().await {
        for e in err.chain() {
            error!("{e}");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Parse the command line arguments
    let args = DaemonArgs::parse();

    // The configuration is read once, a restart is needed to change it
    let config = Config::load_or_default(&args.config_file_path);

    let layout = EcLayout::default();
    let io = Arc::new(EcFile::new(&args.ecio_path));

    let fan_manager = FanManager::new(io, &layout, &config.service)
        .with_context(|| "Invalid service configuration")?;
    let mut daemon = Daemon::new(fan_manager, PidFile::new(&args.pid_file_path));

    // This token and tracker will be used to handle graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    // Install the handlers before the marker is written so
    // an early SIGTERM still goes through the shutdown sequence
    let listener = TerminationListener::new()
        .with_context(|| "Failed to install signal handlers")?;
    tracker.spawn(listener.cancel_on_signal(token.clone()));

    let served = daemon.serve(Privilege::current(), token.clone()).await;

    // Stop the signal task whatever happened to the daemon
    token.cancel();
    tracker.close();
    tracker.wait().await;

    served.with_context(|| "omen-fand stopped with an error")?;
    info!("omen-fand terminated");

    Ok(())
}
