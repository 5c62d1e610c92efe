use crate::cpu::CpuSet;
use crate::error::{CustodianError, Result};
use crate::sysfs::SysfsIo;
use crate::FREQ_UNITS_PER_GHZ;

/// Passing this as the speed prints instead of setting
pub const PRINT_SPEED: f64 = -1.0;

/// What `freq [SPEED]` was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqRequest {
    Print,
    /// Write this value, in sysfs units
    Set(u64),
}

/// Turn the CLI speed in GHz into a request
pub fn parse_speed(speed: Option<f64>) -> Result<FreqRequest> {
    let ghz = match speed {
        None => return Ok(FreqRequest::Print),
        Some(s) if s == PRINT_SPEED => return Ok(FreqRequest::Print),
        Some(s) => s,
    };

    if !ghz.is_finite() || ghz <= 0.0 {
        return Err(CustodianError::InvalidInput(format!(
            "frequency must be a positive number of GHz, got {ghz}"
        )));
    }
    let value = ghz * FREQ_UNITS_PER_GHZ;
    if value < 1.0 || value >= i64::MAX as f64 {
        return Err(CustodianError::InvalidInput(format!(
            "frequency {ghz}GHz is out of range"
        )));
    }
    Ok(FreqRequest::Set(value as u64))
}

/// One `%2d: %.2f` line per selected CPU, in GHz
pub fn format_frequencies(io: &dyn SysfsIo, cpus: &CpuSet, selected: &[usize]) -> Result<Vec<String>> {
    let mut lines = Vec::with_capacity(selected.len());
    for &cpu in selected {
        let freq = cpus.get_max_frequency(io, cpu)?;
        lines.push(format!("{:2}: {:.2}", cpu, freq as f64 / FREQ_UNITS_PER_GHZ));
    }
    Ok(lines)
}

/// Write `hz` to the selected CPUs and read the first one back
pub fn set_frequency(io: &dyn SysfsIo, cpus: &CpuSet, selected: &[usize], hz: u64) -> Result<Option<u64>> {
    cpus.set_max_frequency(io, selected, hz)?;

    let Some(&first) = selected.first() else {
        return Ok(None);
    };
    let now = cpus.get_max_frequency(io, first)?;
    tracing::info!("Set max frequency to {:.2}GHz.", now as f64 / FREQ_UNITS_PER_GHZ);
    Ok(Some(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysfs::testing::MemorySysfs;

    fn bench(count: usize) -> (MemorySysfs, CpuSet) {
        let io = MemorySysfs::default();
        let cpus = CpuSet::new("/cpu", "cpufreq/scaling_max_freq", count);
        for n in cpus.all() {
            io.set(cpus.freq_max_file(n), 4_500_000);
        }
        (io, cpus)
    }

    #[test]
    fn test_missing_or_minus_one_prints() {
        assert_eq!(parse_speed(None).unwrap(), FreqRequest::Print);
        assert_eq!(parse_speed(Some(-1.0)).unwrap(), FreqRequest::Print);
    }

    #[test]
    fn test_speed_is_converted_from_ghz() {
        assert_eq!(parse_speed(Some(2.5)).unwrap(), FreqRequest::Set(2_500_000));
        assert_eq!(parse_speed(Some(1.5)).unwrap(), FreqRequest::Set(1_500_000));
    }

    #[test]
    fn test_bad_speeds_are_rejected() {
        for speed in [0.0, -2.0, f64::NAN, f64::INFINITY, 1e-9, 1e30] {
            let err = parse_speed(Some(speed)).unwrap_err();
            assert!(matches!(err, CustodianError::InvalidInput(_)), "{speed} accepted");
        }
    }

    #[test]
    fn test_format_frequencies() {
        let (io, cpus) = bench(12);
        io.set(cpus.freq_max_file(1), 800_000);

        let lines = format_frequencies(&io, &cpus, &[0, 1, 11]).unwrap();
        assert_eq!(lines, vec![" 0: 4.50", " 1: 0.80", "11: 4.50"]);

        io.break_file(cpus.freq_max_file(1));
        assert!(format_frequencies(&io, &cpus, &[0, 1]).is_err());
    }

    #[test]
    fn test_set_frequency_writes_selected_cpus() {
        let (io, cpus) = bench(4);

        let now = set_frequency(&io, &cpus, &[1, 2], 2_500_000).unwrap();
        assert_eq!(now, Some(2_500_000));
        assert_eq!(io.get(cpus.freq_max_file(0)), Some(4_500_000));
        assert_eq!(io.get(cpus.freq_max_file(1)), Some(2_500_000));
        assert_eq!(io.get(cpus.freq_max_file(2)), Some(2_500_000));
        assert_eq!(io.get(cpus.freq_max_file(3)), Some(4_500_000));
    }

    #[test]
    fn test_set_frequency_reports_failed_cpus() {
        let (io, cpus) = bench(2);
        io.break_file(cpus.freq_max_file(1));

        let err = set_frequency(&io, &cpus, &[0, 1], 2_500_000).unwrap_err();
        match err {
            CustodianError::Frequency(e) => assert_eq!(e.failed_cpus(), vec![1]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
