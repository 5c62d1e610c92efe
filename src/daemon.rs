use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::cpu::CpuSet;
use crate::error::ConfigError;
use crate::evaluator::{Action, Evaluator, Rule, TickOutcome};
use crate::sampler::{Quantity, Sampler, Source, Value};
use crate::sysfs::SysfsIo;

pub const TEMPERATURE: &str = "temp";
pub const AC_STATUS: &str = "ac_status";
pub const GPU_MODE: &str = "gpu";
pub const CPU_FREQUENCY: &str = "cpu_freq";

/// Upper bound on a single sleep so a stop request is noticed quickly
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Quantities watched by the daemon
pub fn quantities(config: &Config) -> Vec<Quantity> {
    vec![
        Quantity::new(CPU_FREQUENCY, Source::CpuFrequency(0)),
        Quantity::new(TEMPERATURE, Source::Temperature(config.temperature_path.clone()))
            .every(config.temperature_interval),
        Quantity::new(AC_STATUS, Source::AcStatus(config.ac_status_path.clone())),
        Quantity::new(GPU_MODE, Source::GpuMode(config.gpu_mode_command.clone())),
    ]
}

/// Rule table, in evaluation order
pub fn rules(config: &Config) -> Result<Vec<Rule>, ConfigError> {
    let mut rules = Vec::new();

    if config.kill_nvidia_on_battery {
        rules.push(Rule::new(
            "nvidia_poweroff",
            &["ac_status=off", "gpu=intel"],
            "nvidia@poweroff",
            Action::RunCommand(config.nvidia_kill_command.clone()),
        )?);
    }

    rules.push(Rule::new(
        "battery",
        &["ac_status=off"],
        "power@battery",
        Action::SetMaxFrequency(config.battery_freq),
    )?);

    let cool = format!("temp<{}", config.cool_threshold);
    rules.push(Rule::new(
        "cool",
        &["ac_status=on", cool.as_str()],
        "power@cool",
        Action::SetMaxFrequency(config.max_freq),
    )?);

    let hot = format!("temp>{}", config.hot_threshold);
    rules.push(Rule::new(
        "hot",
        &["ac_status=on", hot.as_str()],
        "power@hot",
        Action::SetMaxFrequency(config.cooldown_freq),
    )?);

    Ok(rules)
}

/// Everything the daemon needs for its lifetime
pub struct Custodian<Io: SysfsIo> {
    pub config: Config,
    pub io: Io,
    pub cpus: CpuSet,
    pub sampler: Sampler,
    pub evaluator: Evaluator,
    tick: u64,
}

impl<Io: SysfsIo> Custodian<Io> {
    pub fn new(config: Config, io: Io, cpus: CpuSet) -> Result<Self, ConfigError> {
        config.validate()?;
        let sampler = Sampler::new(quantities(&config));
        let evaluator = Evaluator::new(rules(&config)?, &sampler)?;
        Ok(Self {
            config,
            io,
            cpus,
            sampler,
            evaluator,
            tick: 0,
        })
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Sample, then evaluate, then log
    pub fn tick(&mut self) -> TickOutcome {
        self.sampler.tick(&self.io, &self.cpus, self.tick);
        let outcome = self.evaluator.evaluate(&self.io, &self.cpus, &self.sampler);
        self.log_agent();
        self.tick += 1;
        outcome
    }

    fn log_agent(&self) {
        let show = |name: &str| self.sampler.latest(name).map_or_else(|| "-".to_string(), Value::to_string);
        tracing::info!(
            tick = self.tick,
            temp = %show(TEMPERATURE),
            cpu_freq = %show(CPU_FREQUENCY),
            ac_status = %show(AC_STATUS),
            gpu = %show(GPU_MODE),
            power = self.evaluator.active("power").unwrap_or("-"),
            previous = self.evaluator.states().previous("power").unwrap_or("-"),
        );
    }

    /// Tick at the configured interval until `stop` is set
    ///
    /// `stop` is only checked between ticks; a tick always runs to completion.
    pub fn run(&mut self, stop: &Arc<AtomicBool>) {
        let interval = self.config.tick_interval();
        tracing::info!(
            interval_ms = self.config.tick_interval_ms,
            cpus = self.cpus.count(),
            rules = self.evaluator.rules().len(),
            groups = ?self.evaluator.states().groups().collect::<Vec<_>>(),
            "custodian started"
        );

        while !stop.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.tick();

            let deadline = started + interval;
            loop {
                let now = Instant::now();
                if now >= deadline || stop.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
            }
        }

        tracing::info!(ticks = self.tick, "custodian stopped");
    }
}
