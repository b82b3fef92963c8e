use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use tracing_subscriber::EnvFilter;

use meterbus_core::config::BusConfig;
use meterbus_core::error::MeterbusResult;
use meterbus_core::profile::RegisterSpace;
use meterbus_manager::commands::{self, parse_u16, parse_u8};

#[derive(Parser)]
#[command(name = "meterbus")]
#[command(about = "Poll and configure Modbus-RTU energy meters")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Bus config file (default: ./meterbus.yaml, then ~/.meterbus/)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Log every frame on the wire
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SpaceArg {
    Input,
    Holding,
}

impl From<SpaceArg> for RegisterSpace {
    fn from(space: SpaceArg) -> Self {
        match space {
            SpaceArg::Input => RegisterSpace::Input,
            SpaceArg::Holding => RegisterSpace::Holding,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Read every quantity of a meter, or of every enabled meter
    Read {
        /// Meter name from the config file
        meter: Option<String>,

        /// Keep polling, interval in milliseconds
        #[arg(short = 'w', long = "watch", value_name = "MS")]
        watch: Option<u64>,

        /// One JSON object per poll
        #[arg(long = "json")]
        json: bool,
    },

    /// Dump raw registers
    Raw {
        meter: String,

        #[arg(short = 's', long = "space", value_enum, default_value = "input")]
        space: SpaceArg,

        /// First register (decimal or 0x hex)
        #[arg(long = "start", default_value = "0")]
        start: String,

        #[arg(short = 'n', long = "count", default_value = "10")]
        count: String,

        #[arg(long = "json")]
        json: bool,
    },

    /// Write one holding register
    Write {
        meter: String,

        /// Register (decimal or 0x hex)
        #[arg(short = 'r', long = "register")]
        register: String,

        /// Raw register value (decimal or 0x hex)
        #[arg(long = "value")]
        value: String,
    },

    /// Give a meter a new slave address (1-247)
    SetAddress {
        meter: String,
        address: String,
    },

    /// Clear the energy counters of a meter
    ResetEnergy { meter: String },

    /// List built-in and configured register profiles
    Profiles {
        /// Show quantities and settings
        #[arg(short = 'q', long = "quantities")]
        detailed: bool,

        #[arg(long = "json")]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> MeterbusResult<BusConfig> {
    match path {
        Some(path) => BusConfig::from_file(path),
        None => BusConfig::find_and_load(),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run_command(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_command(cli: Cli) -> MeterbusResult<()> {
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Read { meter, watch, json } => {
            let config = load_config(config_path)?;
            match meter {
                Some(meter) => commands::meter::read_meter(&config, &meter, watch, json),
                None => commands::meter::read_enabled(&config, json),
            }
        }
        Commands::Raw {
            meter,
            space,
            start,
            count,
            json,
        } => {
            let config = load_config(config_path)?;
            commands::meter::raw_registers(
                &config,
                &meter,
                space.into(),
                parse_u16(&start)?,
                parse_u16(&count)?,
                json,
            )
        }
        Commands::Write {
            meter,
            register,
            value,
        } => {
            let config = load_config(config_path)?;
            commands::meter::write_register(&config, &meter, parse_u16(&register)?, parse_u16(&value)?)
        }
        Commands::SetAddress { meter, address } => {
            let config = load_config(config_path)?;
            commands::meter::set_address(&config, &meter, parse_u8(&address)?)
        }
        Commands::ResetEnergy { meter } => {
            let config = load_config(config_path)?;
            commands::meter::reset_energy(&config, &meter)
        }
        Commands::Profiles { detailed, json } => {
            // Listing works without a config file
            let config = load_config(config_path).ok();
            commands::profiles::list_profiles(config.as_ref(), detailed, json)
        }
    }
}
