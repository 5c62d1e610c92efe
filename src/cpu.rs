use std::path::PathBuf;

use crate::error::{CpuFrequencyError, CustodianError, SysfsError};
use crate::sysfs::SysfsIo;

/// The host's logical CPUs and their frequency control files
#[derive(Debug, Clone)]
pub struct CpuSet {
    base_path: PathBuf,
    freq_max_path: PathBuf,
    count: usize,
}

impl CpuSet {
    pub fn new(base_path: impl Into<PathBuf>, freq_max_path: impl Into<PathBuf>, count: usize) -> Self {
        Self {
            base_path: base_path.into(),
            freq_max_path: freq_max_path.into(),
            count,
        }
    }

    /// Uses the logical CPU count reported by the host
    pub fn detect(base_path: impl Into<PathBuf>, freq_max_path: impl Into<PathBuf>) -> Self {
        Self::new(base_path, freq_max_path, num_cpus::get())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn all(&self) -> Vec<usize> {
        (0..self.count).collect()
    }

    pub fn freq_max_file(&self, cpu: usize) -> PathBuf {
        self.base_path
            .join(format!("cpu{cpu}"))
            .join(&self.freq_max_path)
    }

    pub fn get_max_frequency(&self, io: &dyn SysfsIo, cpu: usize) -> Result<u64, SysfsError> {
        let path = self.freq_max_file(cpu);
        let value = io.read_int(&path)?;
        u64::try_from(value).map_err(|_| SysfsError::Parse {
            path,
            content: value.to_string(),
        })
    }

    /// Write `hz` to every CPU in `cpus`
    ///
    /// Each core is written independently; a failure on one core does not
    /// stop the others. All failures are reported together.
    pub fn set_max_frequency(
        &self,
        io: &dyn SysfsIo,
        cpus: &[usize],
        hz: u64,
    ) -> Result<(), CpuFrequencyError> {
        let failures: Vec<(usize, SysfsError)> = cpus
            .iter()
            .filter_map(|&cpu| {
                let path = self.freq_max_file(cpu);
                let written = match i64::try_from(hz) {
                    Ok(value) => io.write_int(&path, value),
                    Err(_) => Err(SysfsError::OutOfRange { path, value: hz }),
                };
                written.err().map(|e| (cpu, e))
            })
            .collect();

        if failures.is_empty() {
            tracing::debug!(hz, cpus = cpus.len(), "max frequency set");
            Ok(())
        } else {
            Err(CpuFrequencyError { hz, failures })
        }
    }

    pub fn set_all_max_frequency(&self, io: &dyn SysfsIo, hz: u64) -> Result<(), CpuFrequencyError> {
        self.set_max_frequency(io, &self.all(), hz)
    }

    /// Parse `all` or a comma-separated list such as `0,2,5`
    pub fn parse_cpu_list(&self, spec: &str) -> Result<Vec<usize>, CustodianError> {
        let spec = spec.trim();
        if spec == "all" {
            return Ok(self.all());
        }

        let mut cpus = Vec::new();
        for part in spec.split(',') {
            let cpu: usize = part.trim().parse().map_err(|_| {
                CustodianError::InvalidInput(format!("`{part}` is not a CPU number"))
            })?;
            if cpu >= self.count {
                return Err(CustodianError::InvalidInput(format!(
                    "cpu{cpu} does not exist (host has {} CPUs)",
                    self.count
                )));
            }
            if !cpus.contains(&cpu) {
                cpus.push(cpu);
            }
        }
        Ok(cpus)
    }
}
