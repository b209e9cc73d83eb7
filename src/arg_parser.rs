use std::{
    env,
    io::{stderr, stdout},
    path::PathBuf,
    str::FromStr,
};

use argparse::{ArgumentParser, List, Print, Store, StoreOption, StoreTrue};
use thiserror::Error;

use crate::{
    bios::{InvalidOwnership, Ownership},
    config::{CONFIG_FILE, ServiceConfig},
    ec::ECIO_FILE,
    fans::percent_to_units,
    pid_file::PID_FILE,
};

#[derive(Debug, Error, PartialEq)]
pub enum ArgsError {
    // Help was printed or argparse already reported the error
    #[error("Argument parsing exited with status {0}")]
    Exit(i32),
    #[error("Unknown command \"{0}\", see --help")]
    UnknownCommand(String),
    #[error("Invalid boolean value \"{0}\", expected true/false (1/0)")]
    InvalidBool(String),
    #[error(transparent)]
    InvalidOwnership(#[from] InvalidOwnership),
    #[error("Please enter a valid argument stop/start (0/1), got \"{0}\"")]
    InvalidServiceAction(String),
    #[error("'{0}' is not a valid integer")]
    NotAnInteger(String),
    #[error("'{0}' is not a valid percentage")]
    InvalidPercentage(String),
    #[error("'{value}' is not a valid RPM/100 value for Fan{fan}. Min: 0 Max: {max}")]
    UnitsOutOfRange { value: i64, fan: u8, max: u8 },
    #[error("'{0}' is not a valid comma separated list")]
    InvalidList(String),
}

// Accept the usual spellings of a boolean flag
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list<T: FromStr>(s: &str) -> Result<Vec<T>, ArgsError> {
    s.split(',')
        .map(|item| item.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| ArgsError::InvalidList(s.to_string()))
}

// Command line options of the omen-fand daemon
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonArgs {
    pub config_file_path: PathBuf,
    pub ecio_path: PathBuf,
    pub pid_file_path: PathBuf,
}

impl DaemonArgs {
    pub fn parse() -> Self {
        match Self::parse_from(env::args().collect()) {
            Ok(args) => args,
            Err(code) => std::process::exit(code),
        }
    }

    pub fn parse_from(args: Vec<String>) -> Result<Self, i32> {
        let mut options = DaemonArgs::default();

        {
            let mut parser = ArgumentParser::new();
            parser.set_description("HP Omen fan control service");

            // Configuration file path
            parser.refer(&mut options.config_file_path).add_option(
                &["-c", "--config"],
                Store,
                "The file path of the configuration file",
            );

            parser.refer(&mut options.ecio_path).add_option(
                &["--ec"],
                Store,
                "The embedded controller register file",
            );

            parser.refer(&mut options.pid_file_path).add_option(
                &["--pid-file"],
                Store,
                "Where to write the PID of the running service",
            );

            // Show daemon version
            parser.add_option(
                &["-V", "--version"],
                Print(env!("CARGO_PKG_VERSION").to_string()),
                "Show the daemon version",
            );

            parser.parse(args, &mut stdout(), &mut stderr())?;
        }

        Ok(options)
    }
}

impl Default for DaemonArgs {
    fn default() -> Self {
        Self {
            config_file_path: PathBuf::from(CONFIG_FILE),
            ecio_path: PathBuf::from(ECIO_FILE),
            pid_file_path: PathBuf::from(PID_FILE),
        }
    }
}

// A fan speed given on the command line, either "NN%" or raw units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanSpeed {
    Percent(u8),
    // Checked against the fan range in `to_units`
    Units(i64),
}

impl FromStr for FanSpeed {
    type Err = ArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (number, is_percent) = match s.trim().strip_suffix('%') {
            Some(number) => (number, true),
            None => (s.trim(), false),
        };

        let value: i64 = number
            .parse()
            .map_err(|_| ArgsError::NotAnInteger(number.to_string()))?;

        if is_percent {
            return match u8::try_from(value) {
                Ok(percent) if percent <= 100 => Ok(FanSpeed::Percent(percent)),
                _ => Err(ArgsError::InvalidPercentage(number.to_string())),
            };
        }

        Ok(FanSpeed::Units(value))
    }
}

impl FanSpeed {
    // Register value for the given fan
    pub fn to_units(self, fan: u8, max: u8) -> Result<u8, ArgsError> {
        match self {
            FanSpeed::Percent(percent) => Ok(percent_to_units(percent as f64, max)),
            FanSpeed::Units(value) => u8::try_from(value)
                .ok()
                .filter(|units| *units <= max)
                .ok_or(ArgsError::UnitsOutOfRange { value, fan, max }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
}

impl FromStr for ServiceAction {
    type Err = ArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" | "1" => Ok(ServiceAction::Start),
            "stop" | "0" => Ok(ServiceAction::Stop),
            _ => Err(ArgsError::InvalidServiceAction(s.to_string())),
        }
    }
}

// Changes requested by the configure command, unset fields are kept
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigureArgs {
    pub temp_curve: Option<Vec<i32>>,
    pub speed_curve: Option<Vec<u8>>,
    pub idle_speed: Option<u8>,
    pub poll_interval: Option<f64>,
    pub temp_smoothing: Option<bool>,
    pub hysteresis: Option<u8>,
    pub view: bool,
}

impl ConfigureArgs {
    pub fn apply(&self, service: &mut ServiceConfig) {
        if let Some(temp_curve) = &self.temp_curve {
            service.temperature_curve = temp_curve.clone();
        }
        if let Some(speed_curve) = &self.speed_curve {
            service.speed_curve = speed_curve.clone();
        }
        if let Some(idle_speed) = self.idle_speed {
            service.idle_speed = idle_speed;
        }
        if let Some(poll_interval) = self.poll_interval {
            service.poll_interval = poll_interval;
        }
        if let Some(temp_smoothing) = self.temp_smoothing {
            service.temperature_smoothing = temp_smoothing;
        }
        if let Some(hysteresis) = self.hysteresis {
            service.hysteresis = hysteresis;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BiosControl(Ownership),
    Boost(bool),
    Configure(ConfigureArgs),
    Service(ServiceAction),
    Info,
    Set { fan1: FanSpeed, fan2: Option<FanSpeed> },
    Version,
}

// Command line of the omen-fan tool
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub config_file_path: PathBuf,
    pub command: Command,
}

impl CliArgs {
    pub fn parse() -> Result<Self, ArgsError> {
        Self::parse_from(env::args().collect())
    }

    pub fn parse_from(args: Vec<String>) -> Result<Self, ArgsError> {
        let mut config_file_path = PathBuf::from(CONFIG_FILE);
        let mut command = String::new();
        let mut arguments: Vec<String> = Vec::new();

        {
            let mut parser = ArgumentParser::new();
            parser.set_description("Fan control for HP Omen laptops");

            parser.refer(&mut config_file_path).add_option(
                &["-c", "--config"],
                Store,
                "The file path of the configuration file",
            );

            parser.refer(&mut command).required().add_argument(
                "command",
                Store,
                "bios-control (b), boost (x), configure (config, c), \
                 service (e), info (i), set (s), version (v)",
            );

            parser.refer(&mut arguments).add_argument(
                "arguments",
                List,
                "Arguments of the command",
            );

            parser.stop_on_first_argument(true);
            parser
                .parse(args, &mut stdout(), &mut stderr())
                .map_err(ArgsError::Exit)?;
        }

        arguments.insert(0, format!("omen-fan {command}"));

        let command = match command.as_str() {
            "bios-control" | "b" => {
                let value = parse_value(arguments, "Enable (true) or disable (false) BIOS control")?;
                Command::BiosControl(value.parse()?)
            }
            "boost" | "x" => {
                let value = parse_value(arguments, "Enable (true) or disable (false) fan boost")?;
                Command::Boost(parse_bool(&value).ok_or(ArgsError::InvalidBool(value))?)
            }
            "configure" | "config" | "c" => Command::Configure(parse_configure(arguments)?),
            "service" | "e" => {
                let value = parse_value(arguments, "start (1) or stop (0) the service")?;
                Command::Service(value.parse()?)
            }
            "info" | "i" => {
                parse_empty(arguments, "Show service, BIOS and fan status")?;
                Command::Info
            }
            "set" | "s" => parse_set(arguments)?,
            "version" | "v" => {
                parse_empty(arguments, "Show version information")?;
                Command::Version
            }
            _ => return Err(ArgsError::UnknownCommand(command)),
        };

        Ok(CliArgs {
            config_file_path,
            command,
        })
    }
}

// Commands that take no argument still get --help
fn parse_empty(args: Vec<String>, description: &str) -> Result<(), ArgsError> {
    let mut parser = ArgumentParser::new();
    parser.set_description(description);

    parser
        .parse(args, &mut stdout(), &mut stderr())
        .map_err(ArgsError::Exit)
}

// Commands taking a single positional value
fn parse_value(args: Vec<String>, description: &str) -> Result<String, ArgsError> {
    let mut value = String::new();

    {
        let mut parser = ArgumentParser::new();
        parser.set_description(description);
        parser
            .refer(&mut value)
            .required()
            .add_argument("value", Store, "Command value");

        parser
            .parse(args, &mut stdout(), &mut stderr())
            .map_err(ArgsError::Exit)?;
    }

    Ok(value)
}

fn is_negative_number(arg: &str) -> bool {
    arg.strip_prefix('-')
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

fn parse_set(mut args: Vec<String>) -> Result<Command, ArgsError> {
    // Negative speeds are values, not options
    if args.iter().skip(1).any(|arg| is_negative_number(arg)) {
        args.insert(1, "--".to_string());
    }

    let mut fan1 = String::new();
    let mut fan2: Option<String> = None;

    {
        let mut parser = ArgumentParser::new();
        parser.set_description(
            "Set fan speed (disables BIOS control). \
             Fan speed can be set in percentage (100%) or RPM/100 (55)",
        );
        parser
            .refer(&mut fan1)
            .required()
            .add_argument("fan1", Store, "Speed of fan 1, or of both fans");
        parser
            .refer(&mut fan2)
            .add_argument("fan2", StoreOption, "Speed of fan 2");

        parser
            .parse(args, &mut stdout(), &mut stderr())
            .map_err(ArgsError::Exit)?;
    }

    Ok(Command::Set {
        fan1: fan1.parse()?,
        fan2: fan2.map(|fan2| fan2.parse()).transpose()?,
    })
}

fn parse_configure(args: Vec<String>) -> Result<ConfigureArgs, ArgsError> {
    let mut temp_curve: Option<String> = None;
    let mut speed_curve: Option<String> = None;
    let mut temp_smoothing: Option<String> = None;
    let mut options = ConfigureArgs::default();

    {
        let mut parser = ArgumentParser::new();
        parser.set_description("Configure the fan curve of the service");

        parser.refer(&mut temp_curve).add_option(
            &["--temp-curve"],
            StoreOption,
            "Comma-separated list of temperature curve values",
        );
        parser.refer(&mut speed_curve).add_option(
            &["--speed-curve"],
            StoreOption,
            "Comma-separated list of speed curve values",
        );
        parser.refer(&mut options.idle_speed).add_option(
            &["--idle-speed"],
            StoreOption,
            "Idle fan speed value",
        );
        parser.refer(&mut options.poll_interval).add_option(
            &["--poll-interval"],
            StoreOption,
            "Poll interval in seconds",
        );
        parser.refer(&mut temp_smoothing).add_option(
            &["--temp-smoothing"],
            StoreOption,
            "Enable temperature smoothing",
        );
        parser.refer(&mut options.hysteresis).add_option(
            &["--hysteresis"],
            StoreOption,
            "Speed hysteresis in percent",
        );
        parser.refer(&mut options.view).add_option(
            &["--view"],
            StoreTrue,
            "Show current config",
        );

        parser
            .parse(args, &mut stdout(), &mut stderr())
            .map_err(ArgsError::Exit)?;
    }

    options.temp_curve = temp_curve.as_deref().map(parse_list).transpose()?;
    options.speed_curve = speed_curve.as_deref().map(parse_list).transpose()?;
    options.temp_smoothing = temp_smoothing
        .map(|value| parse_bool(&value).ok_or(ArgsError::InvalidBool(value)))
        .transpose()?;

    Ok(options)
}
