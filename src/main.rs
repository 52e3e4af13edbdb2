mod backend;
mod constants;
mod data;
mod error;
mod interface;
mod rtu;
mod session;

#[cfg(debug_assertions)]
mod sim;

use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use color_eyre::eyre;
use tracing::error;
use tracing_subscriber::EnvFilter;

use constants::{ACTIVE_MASK, DEFAULT_BAUD, DEFAULT_TIMEOUT, DEFAULT_UNIT};
use error::ConnectionError;
use interface::InterfaceMode;
use session::{Session, SessionConfig, UnitId};

const USAGE_EXIT_CODE: u8 = 1;

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Host-side MODBUS master for the sensors board",
    long_about = "Host-side MODBUS master for the sensors board. It enables all measurements, \
                  then polls them forever and stops on the first protocol error or on a value \
                  that failed to increase."
)]
struct Args {
    /// Serial port path (e.g. /dev/ttyUSB0)
    port: Option<String>,

    /// Serial baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Modbus slave unit id (1-247)
    #[arg(short, long, default_value_t = DEFAULT_UNIT)]
    unit: u8,

    /// Response timeout in milliseconds
    #[arg(short, long = "timeout-ms", default_value_t = duration_ms(DEFAULT_TIMEOUT))]
    timeout_ms: u64,

    /// Delay between polls in milliseconds
    #[arg(short = 'i', long, default_value_t = 0)]
    poll_interval: u64,

    /// Device interface
    #[arg(short = 'I', long, value_enum, default_value_t = InterfaceMode::Serial)]
    interface: InterfaceMode,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            eprint!("{err}");
            return Ok(usage());
        }
    };
    let config = match resolve_session_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return Ok(usage());
        }
    };

    init_logging(args.verbose)?;
    Ok(run(&config))
}

fn run(config: &SessionConfig) -> ExitCode {
    let mut session = match Session::connect(config) {
        Ok(session) => session,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(ConnectionError::EXIT_CODE);
        }
    };

    if let Err(fault) = session.activate_and_verify(ACTIVE_MASK) {
        return ExitCode::from(fault.exit_code());
    }

    let stdout = io::stdout();
    let result = session.poll_forever(config.poll_interval, |snapshot| {
        let mut out = stdout.lock();
        writeln!(out, "{snapshot}")?;
        out.flush()
    });
    match result {
        Ok(never) => match never {},
        Err(fault) => ExitCode::from(fault.exit_code()),
    }
}

fn usage() -> ExitCode {
    Args::command().print_help().ok();
    println!();
    ExitCode::from(USAGE_EXIT_CODE)
}

fn resolve_session_config(args: &Args) -> eyre::Result<SessionConfig> {
    let interface = resolve_interface_mode(args)?;
    let port = match (&args.port, interface.needs_port()) {
        (Some(port), _) => port.clone(),
        (None, false) => "simulated".to_owned(),
        (None, true) => {
            return Err(eyre::eyre!(
                "serial port required unless using simulation interface"
            ));
        }
    };

    let unit = UnitId::try_from(args.unit)
        .map_err(|unit| eyre::eyre!("unit id must be in 1..=247, got {unit}"))?;

    if args.timeout_ms == 0 {
        return Err(eyre::eyre!("timeout must be greater than zero"));
    }

    Ok(SessionConfig {
        port,
        baud: args.baud,
        unit,
        timeout: Duration::from_millis(args.timeout_ms),
        poll_interval: Duration::from_millis(args.poll_interval),
        interface,
    })
}

#[cfg(debug_assertions)]
#[allow(clippy::unnecessary_wraps)]
fn resolve_interface_mode(args: &Args) -> eyre::Result<InterfaceMode> {
    Ok(args.interface)
}

#[cfg(not(debug_assertions))]
fn resolve_interface_mode(args: &Args) -> eyre::Result<InterfaceMode> {
    if args.interface == InterfaceMode::Simulation {
        return Err(eyre::eyre!(
            "simulation interface is only available in debug builds"
        ));
    }
    Ok(args.interface)
}

// Logs go to stderr; stdout carries only the readings.
fn init_logging(verbose: u8) -> eyre::Result<()> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| eyre::eyre!("init logging: {err}"))
}

#[allow(clippy::cast_possible_truncation)]
const fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
