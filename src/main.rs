use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};

use x1e2_custodian::freq::{self, FreqRequest};
use x1e2_custodian::{Config, CpuSet, Custodian, LinuxSysfs, Result};

/// CPU frequency management daemon and tools
#[derive(Parser, Debug)]
#[command(name = "x1e2", version)]
struct Cli {
    /// Config file (TOML, or JSON when ending in .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug details
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the current configuration as JSON
    Config,

    /// Print or set the max CPU frequency in GHz
    Freq {
        /// New max frequency in GHz; omit or pass -1 to print
        #[arg(allow_negative_numbers = true)]
        speed: Option<f64>,

        /// `all` or a comma-separated list of CPU numbers
        #[arg(short = 'C', long = "cpu", default_value = "all")]
        cpus: String,
    },

    /// Run the custodian daemon, adjusting the max frequency to keep
    /// temperatures in the configured range
    Daemon,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose > 0 { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("x1e2: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let io = LinuxSysfs::new(config.command_timeout());
    let cpus = match config.cpu_count {
        Some(count) => CpuSet::new(&config.cpu_base_path, &config.cpu_freq_max_path, count),
        None => CpuSet::detect(&config.cpu_base_path, &config.cpu_freq_max_path),
    };

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Freq { speed, cpus: spec } => {
            let selected = cpus.parse_cpu_list(&spec)?;
            match freq::parse_speed(speed)? {
                FreqRequest::Print => {
                    for line in freq::format_frequencies(&io, &cpus, &selected)? {
                        println!("{line}");
                    }
                }
                FreqRequest::Set(hz) => {
                    freq::set_frequency(&io, &cpus, &selected, hz)?;
                }
            }
            Ok(())
        }
        Command::Daemon => {
            let mut custodian = Custodian::new(config, io, cpus)?;

            let stop = Arc::new(AtomicBool::new(false));
            let flag = stop.clone();
            ctrlc::set_handler(move || {
                tracing::info!("stop requested, finishing current tick");
                flag.store(true, Ordering::SeqCst);
            })?;

            custodian.run(&stop);
            Ok(())
        }
    }
}
