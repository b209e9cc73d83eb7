use std::{
    env,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::{self, Stdio},
    sync::Arc,
};

use omen_fan::{
    arg_parser::{ArgsError, CliArgs, Command, ConfigureArgs, FanSpeed, ServiceAction},
    bios::{BiosArbiter, Ownership},
    config::{Config, ConfigError},
    daemon::{self, Privilege},
    device::{self, DEVICE_FILE, DeviceError},
    ec::{EcFile, EcLayout, kernel_module},
    errors::OmenFanError,
    fans::FanActuator,
    hwmon::{HP_WMI_HWMON, HpWmi},
    logger::{self, LOG_DIR},
    pid_file::PidFile,
};
use tracing::{error, info, warn};

const DAEMON_BIN: &str = "omen-fand";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let privilege = Privilege::current();

    // Only root can write to the log directory
    logger::init_logging(privilege.is_root().then_some(Path::new(LOG_DIR)));

    let result = match CliArgs::parse() {
        Ok(args) => run(args, privilege).await,
        Err(err) => Err(err.into()),
    };

    if let Err(err) = result {
        // argparse already printed its own output
        if !matches!(err, OmenFanError::Args(ArgsError::Exit(_))) {
            error!("{err}");
        }
        process::exit(err.exit_code());
    }
}

async fn run(args: CliArgs, privilege: Privilege) -> Result<(), OmenFanError> {
    let config = Config::load_or_init(&args.config_file_path, privilege.is_root());
    let mut cli = Cli::new(args.config_file_path, config, privilege);

    match args.command {
        Command::BiosControl(ownership) => cli.bios_control(ownership).await,
        Command::Boost(enabled) => cli.boost(enabled),
        Command::Configure(options) => cli.configure(&options),
        Command::Service(action) => cli.service(action).await,
        Command::Info => cli.info(),
        Command::Set { fan1, fan2 } => cli.set(fan1, fan2).await,
        Command::Version => {
            version();
            Ok(())
        }
    }
}

struct Cli {
    config_path: PathBuf,
    config: Config,
    privilege: Privilege,

    layout: EcLayout,
    ec: Arc<EcFile>,
    pid_file: PidFile,
}

impl Cli {
    fn new(config_path: PathBuf, config: Config, privilege: Privilege) -> Self {
        Self {
            config_path,
            config,
            privilege,

            layout: EcLayout::default(),
            ec: Arc::new(EcFile::default()),
            pid_file: PidFile::default(),
        }
    }

    fn require_root(&self) -> Result<(), OmenFanError> {
        if !self.privilege.is_root() {
            return Err(OmenFanError::NotRoot);
        }
        Ok(())
    }

    // Checks shared by every command writing to the EC
    fn prepare_hardware(&mut self) -> Result<(), OmenFanError> {
        self.require_root()?;
        self.device_check()?;
        kernel_module::ensure_write_support(self.ec.path())?;

        Ok(())
    }

    fn device_check(&mut self) -> Result<(), OmenFanError> {
        if self.config.script.bypass_device_check {
            return Ok(());
        }

        let name = match device::check_device(Path::new(DEVICE_FILE)) {
            Ok(_) => return Ok(()),
            Err(DeviceError::Unsupported(name)) => name,
            Err(err) => return Err(err.into()),
        };

        println!("  ERROR: Your laptop is not in the list of supported laptops");
        println!("         You may manually force the app to run at your own risk");

        let bypass = confirm("Do you want to permanently disable this check? (y/N): ")
            .map_err(OmenFanError::io("Failed to read answer"))?;
        if !bypass {
            return Err(DeviceError::Unsupported(name).into());
        }

        self.config.script.bypass_device_check = true;
        self.config.save(&self.config_path)?;
        info!("Device check bypassed permanently");

        Ok(())
    }

    fn arbiter(&self) -> BiosArbiter {
        BiosArbiter::new(self.ec.clone(), &self.layout)
    }

    fn hwmon(&self) -> Result<HpWmi, OmenFanError> {
        HpWmi::discover(Path::new(HP_WMI_HWMON))
            .map_err(OmenFanError::io("Failed to find the hp-wmi hwmon device"))
    }

    async fn bios_control(&mut self, ownership: Ownership) -> Result<(), OmenFanError> {
        self.prepare_hardware()?;
        self.arbiter().set_firmware_ownership(ownership).await?;

        match ownership {
            Ownership::FirmwareOwned => println!("  The BIOS now controls Fans"),
            Ownership::DaemonOwned => println!("  WARNING: BIOS Fan Control Disabled"),
        }

        Ok(())
    }

    fn boost(&mut self, enabled: bool) -> Result<(), OmenFanError> {
        self.prepare_hardware()?;

        self.hwmon()?
            .set_boost(enabled)
            .map_err(OmenFanError::io("Failed to set fan boost"))?;

        if enabled {
            println!("  Fan Boost : Enabled");
        } else {
            println!("  Fan Boost : Disabled");
        }

        Ok(())
    }

    fn configure(&mut self, options: &ConfigureArgs) -> Result<(), OmenFanError> {
        self.require_root()?;

        if options.view {
            let json = serde_json::to_string_pretty(&self.config).map_err(ConfigError::from)?;
            println!("{json}");
            return Ok(());
        }

        let mut config = self.config.clone();
        options.apply(&mut config.service);

        config.validate()?;
        config.save(&self.config_path)?;
        self.config = config;

        println!("  Configuration updated successfully");
        Ok(())
    }

    async fn service(&mut self, action: ServiceAction) -> Result<(), OmenFanError> {
        self.prepare_hardware()?;

        match action {
            ServiceAction::Start => {
                if let Some(pid) = self.pid_file.read()? {
                    println!("  omen-fan service is already running with PID: {pid}");
                    return Ok(());
                }

                self.arbiter().take_ownership().await?;
                println!("  WARNING: BIOS Fan Control Disabled");

                self.spawn_daemon()?;
                println!("  omen-fan service has been started");
            }
            ServiceAction::Stop => {
                let Some(pid) = self.pid_file.read()? else {
                    println!("  omen-fan service is not running");
                    return Ok(());
                };

                let signalled = daemon::send_terminate(pid)
                    .map_err(OmenFanError::io(format!("Failed to stop PID {pid}")))?;
                if !signalled {
                    self.pid_file.remove()?;
                    return Err(OmenFanError::StaleDaemon(pid));
                }
                println!("  omen-fan service has been stopped");

                self.arbiter().release_ownership()?;
                println!("  The BIOS now controls Fans");
            }
        }

        Ok(())
    }

    // The daemon installed next to this binary wins over the one in PATH
    fn spawn_daemon(&self) -> Result<(), OmenFanError> {
        let program = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(DAEMON_BIN)))
            .filter(|path| path.is_file())
            .unwrap_or_else(|| PathBuf::from(DAEMON_BIN));

        let child = process::Command::new(&program)
            .arg("--config")
            .arg(&self.config_path)
            .arg("--ec")
            .arg(self.ec.path())
            .arg("--pid-file")
            .arg(self.pid_file.path())
            .stdin(Stdio::null())
            .spawn()
            .map_err(OmenFanError::io(format!("Failed to start {}", program.display())))?;

        info!("Spawned {} with PID {}", program.display(), child.id());
        Ok(())
    }

    fn info(&self) -> Result<(), OmenFanError> {
        match self.pid_file.read()? {
            Some(pid) => {
                println!("  Service Status : Running (PID: {pid})");
                println!("  BIOS Control : Disabled");
            }
            None => {
                println!("  Service Status : Stopped");

                if self.privilege.is_root() {
                    kernel_module::ensure_write_support(self.ec.path())?;
                    let state = match self.arbiter().current_ownership()? {
                        Ownership::FirmwareOwned => "Enabled",
                        Ownership::DaemonOwned => "Disabled",
                    };
                    println!("  BIOS Control : {state}");
                } else {
                    println!("  BIOS Control : Unknown (Need root)");
                }
            }
        }

        let hwmon = self.hwmon()?;
        for fan in 1..=2 {
            let rpm = hwmon
                .fan_rpm(fan)
                .map_err(OmenFanError::io(format!("Failed to read fan {fan} speed")))?;
            println!("  Fan {fan} : {rpm} RPM");
        }

        let boost = hwmon
            .boost_enabled()
            .map_err(OmenFanError::io("Failed to read fan boost state"))?;
        if boost {
            println!("\n  Fan Boost : Enabled");
            println!("  Fan speeds are now maxed. BIOS and User controls are ignored");
        }

        Ok(())
    }

    async fn set(&mut self, fan1: FanSpeed, fan2: Option<FanSpeed>) -> Result<(), OmenFanError> {
        self.prepare_hardware()?;

        if self.pid_file.exists() {
            warn!("omen-fan service running, may override fan speed");
        }

        // A single value applies to both fans
        let units1 = fan1.to_units(1, self.layout.fan1_max)?;
        let units2 = fan2.unwrap_or(fan1).to_units(2, self.layout.fan2_max)?;

        self.arbiter().take_ownership().await?;
        println!("  WARNING: BIOS Fan Control Disabled");

        FanActuator::new(self.ec.clone(), &self.layout).set_fan_units(units1, units2)?;
        println!(
            "  Set Fan1: {} RPM, Set Fan2: {} RPM",
            units1 as u32 * 100,
            units2 as u32 * 100
        );

        Ok(())
    }
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;

    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn version() {
    println!("  Omen Fan Control");
    println!("  Version {}", env!("CARGO_PKG_VERSION"));
    println!("  Made and tested on Omen 16-c0xxx");
}
