// Public modules
pub mod config;
pub mod cpu;
pub mod daemon;
pub mod error;
pub mod evaluator;
pub mod freq;
pub mod predicate;
pub mod sampler;
pub mod state;
pub mod sysfs;

pub use config::Config;
pub use cpu::CpuSet;
pub use daemon::Custodian;
pub use error::{CustodianError, Result};
pub use sysfs::{LinuxSysfs, SysfsIo};

/// sysfs frequencies are in kHz; the CLI prints and accepts GHz
pub const FREQ_UNITS_PER_GHZ: f64 = 1_000_000.0;
