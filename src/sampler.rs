use std::fmt;
use std::path::PathBuf;

use crate::cpu::CpuSet;
use crate::error::SampleError;
use crate::sysfs::SysfsIo;

/// Latest reading of a quantity
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(t) => f.write_str(t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Numeric, usable in `<` / `>` comparisons
    Gauge,
    /// Discrete text, usable in `=` comparisons
    Sensor,
}

/// Where a quantity's value comes from
#[derive(Debug, Clone)]
pub enum Source {
    /// Millidegrees Celsius, reported in degrees
    Temperature(PathBuf),
    /// `1` is reported as `on`, anything else as `off`
    AcStatus(PathBuf),
    /// Command printing `key: value`, reported as the trimmed value
    GpuMode(String),
    /// Max frequency of one CPU, in the unit the kernel exposes
    CpuFrequency(usize),
}

impl Source {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Temperature(_) | Self::CpuFrequency(_) => Kind::Gauge,
            Self::AcStatus(_) | Self::GpuMode(_) => Kind::Sensor,
        }
    }

    pub fn sample(&self, io: &dyn SysfsIo, cpus: &CpuSet) -> Result<Value, SampleError> {
        match self {
            Self::Temperature(path) => Ok(Value::Number(io.read_int(path)? as f64 / 1000.0)),
            Self::AcStatus(path) => {
                let online = io.read_int(path)?;
                Ok(Value::Text(if online == 1 { "on" } else { "off" }.to_string()))
            }
            Self::GpuMode(command) => {
                let output = io.run_command(command)?;
                parse_gpu_mode(&output).map(Value::Text)
            }
            Self::CpuFrequency(cpu) => Ok(Value::Number(cpus.get_max_frequency(io, *cpu)? as f64)),
        }
    }
}

fn parse_gpu_mode(output: &str) -> Result<String, SampleError> {
    output
        .split(':')
        .nth(1)
        .map(str::trim)
        .filter(|mode| !mode.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SampleError::Format(output.trim().to_string()))
}

/// A named value sampled every `interval` ticks
#[derive(Debug, Clone)]
pub struct Quantity {
    pub name: String,
    pub source: Source,
    pub interval: u64,
}

impl Quantity {
    pub fn new(name: &str, source: Source) -> Self {
        Self {
            name: name.to_string(),
            source,
            interval: 1,
        }
    }

    pub fn every(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    pub fn kind(&self) -> Kind {
        self.source.kind()
    }
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<Value>,
    last_sampled: Option<u64>,
    failures: u64,
    failing: bool,
}

/// Latest-value cache over a fixed set of quantities
pub struct Sampler {
    quantities: Vec<Quantity>,
    slots: Vec<Slot>,
}

impl Sampler {
    pub fn new(quantities: Vec<Quantity>) -> Self {
        let slots = quantities.iter().map(|_| Slot::default()).collect();
        Self { quantities, slots }
    }

    pub fn kind_of(&self, name: &str) -> Option<Kind> {
        self.quantities.iter().find(|q| q.name == name).map(Quantity::kind)
    }

    /// Sample every quantity that is due at `tick`
    ///
    /// A failed sample keeps the previous value and is retried on the next
    /// tick; it never affects the other quantities.
    pub fn tick(&mut self, io: &dyn SysfsIo, cpus: &CpuSet, tick: u64) {
        for (quantity, slot) in self.quantities.iter().zip(self.slots.iter_mut()) {
            let due = slot
                .last_sampled
                .is_none_or(|last| tick.saturating_sub(last) >= quantity.interval);
            if !due {
                continue;
            }

            match quantity.source.sample(io, cpus) {
                Ok(value) => {
                    if slot.failing {
                        tracing::info!(quantity = %quantity.name, %value, "sampling recovered");
                    }
                    slot.value = Some(value);
                    slot.last_sampled = Some(tick);
                    slot.failing = false;
                }
                Err(e) => {
                    slot.failures += 1;
                    if slot.failing {
                        tracing::debug!(quantity = %quantity.name, error = %e, "sample failed");
                    } else {
                        tracing::warn!(quantity = %quantity.name, error = %e, "sample failed, keeping previous value");
                    }
                    slot.failing = true;
                }
            }
        }
    }

    pub fn latest(&self, name: &str) -> Option<&Value> {
        self.position(name).and_then(|i| self.slots[i].value.as_ref())
    }

    pub fn failures(&self, name: &str) -> u64 {
        self.position(name).map_or(0, |i| self.slots[i].failures)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.quantities.iter().position(|q| q.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysfs::testing::MemorySysfs;

    const TEMP: &str = "/thermal/temp";
    const AC: &str = "/power/online";

    fn sampler() -> Sampler {
        Sampler::new(vec![
            Quantity::new("temp", Source::Temperature(TEMP.into())).every(2),
            Quantity::new("ac_status", Source::AcStatus(AC.into())),
            Quantity::new("gpu", Source::GpuMode("gpu-mode".into())),
            Quantity::new("cpu_freq", Source::CpuFrequency(0)),
        ])
    }

    fn cpus() -> CpuSet {
        CpuSet::new("/cpu", "max", 1)
    }

    #[test]
    fn test_values_are_undefined_until_sampled() {
        let sampler = sampler();
        assert!(sampler.latest("temp").is_none());
        assert!(sampler.latest("nope").is_none());
        assert_eq!(sampler.failures("temp"), 0);
    }

    #[test]
    fn test_sources_scale_and_map() {
        let io = MemorySysfs::default();
        io.set(TEMP, 65_500);
        io.set(AC, 1);
        io.set(cpus().freq_max_file(0), 4_500_000);
        io.set_output("gpu-mode", "Current GPU mode : nvidia\n");

        let mut sampler = sampler();
        sampler.tick(&io, &cpus(), 0);

        assert_eq!(sampler.latest("temp"), Some(&Value::Number(65.5)));
        assert_eq!(sampler.latest("ac_status"), Some(&Value::Text("on".into())));
        assert_eq!(sampler.latest("gpu"), Some(&Value::Text("nvidia".into())));
        assert_eq!(sampler.latest("cpu_freq"), Some(&Value::Number(4_500_000.0)));

        io.set(AC, 0);
        sampler.tick(&io, &cpus(), 1);
        assert_eq!(sampler.latest("ac_status"), Some(&Value::Text("off".into())));

        // only `1` means online
        io.set(AC, 1);
        sampler.tick(&io, &cpus(), 2);
        assert_eq!(sampler.latest("ac_status"), Some(&Value::Text("on".into())));
        io.set(AC, 2);
        sampler.tick(&io, &cpus(), 3);
        assert_eq!(sampler.latest("ac_status"), Some(&Value::Text("off".into())));
    }

    #[test]
    fn test_intervals_are_independent() {
        let io = MemorySysfs::default();
        io.set(TEMP, 40_000);
        io.set(AC, 1);

        let mut sampler = sampler();
        sampler.tick(&io, &cpus(), 0);

        io.set(TEMP, 80_000);
        io.set(AC, 0);
        sampler.tick(&io, &cpus(), 1);
        // temperature is only due every second tick
        assert_eq!(sampler.latest("temp"), Some(&Value::Number(40.0)));
        assert_eq!(sampler.latest("ac_status"), Some(&Value::Text("off".into())));

        sampler.tick(&io, &cpus(), 2);
        assert_eq!(sampler.latest("temp"), Some(&Value::Number(80.0)));
    }

    #[test]
    fn test_failed_sample_keeps_stale_value() {
        let io = MemorySysfs::default();
        io.set(TEMP, 75_000);
        io.set(AC, 1);

        let mut sampler = sampler();
        sampler.tick(&io, &cpus(), 0);

        io.break_file(TEMP);
        io.set(AC, 0);
        sampler.tick(&io, &cpus(), 2);

        assert_eq!(sampler.latest("temp"), Some(&Value::Number(75.0)));
        assert_eq!(sampler.failures("temp"), 1);
        // other quantities still sampled
        assert_eq!(sampler.latest("ac_status"), Some(&Value::Text("off".into())));

        // a failed sample is retried on the very next tick
        io.set(TEMP, 60_000);
        sampler.tick(&io, &cpus(), 3);
        assert_eq!(sampler.latest("temp"), Some(&Value::Number(60.0)));
    }

    #[test]
    fn test_gpu_mode_without_colon_is_an_error() {
        assert!(parse_gpu_mode("intel").is_err());
        assert!(parse_gpu_mode("mode:   ").is_err());
        assert_eq!(parse_gpu_mode("a: b: c").unwrap(), "b");
    }
}
