//! Host utilization sampling and worker-count autoscaling

use sysinfo::System;

use vigil_core::config::SchedulerConfig;

/// CPU and memory utilization as fractions in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu: f32,
    pub memory: f32,
}

impl ResourceSample {
    pub fn new(cpu: f32, memory: f32) -> Self {
        Self {
            cpu: cpu.clamp(0.0, 1.0),
            memory: memory.clamp(0.0, 1.0),
        }
    }
}

/// Source of utilization samples for the autoscaler
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// Probe backed by `sysinfo`
pub struct SystemProbe {
    system: System,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is computed between two refreshes; prime the first one.
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&mut self) -> ResourceSample {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu = self.system.global_cpu_usage() / 100.0;
        let total = self.system.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            self.system.used_memory() as f32 / total as f32
        };
        ResourceSample::new(cpu, memory)
    }
}

/// Probe that always reports the same sample
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub ResourceSample);

impl ResourceProbe for FixedProbe {
    fn sample(&mut self) -> ResourceSample {
        self.0
    }
}

/// Next worker target given the current target and a utilization sample.
///
/// Scales down by one when either resource is above its high-water mark,
/// up by one when both are below their low-water marks and work is queued,
/// and holds inside the band. The result always lies in
/// `[min_workers, max_workers]`.
pub fn next_worker_target(
    current: usize,
    sample: ResourceSample,
    queue_depth: usize,
    config: &SchedulerConfig,
) -> usize {
    let floor = config.min_workers.max(1);
    let ceiling = config.max_workers.max(floor);
    let current = current.clamp(floor, ceiling);

    let overloaded = sample.cpu > config.cpu_high_water || sample.memory > config.memory_high_water;
    let idle = sample.cpu < config.cpu_low_water && sample.memory < config.memory_low_water;

    if overloaded {
        current.saturating_sub(1).max(floor)
    } else if idle && queue_depth > 0 {
        (current + 1).min(ceiling)
    } else {
        current
    }
}
