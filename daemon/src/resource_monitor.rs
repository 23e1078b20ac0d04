use sysinfo::{ProcessesToUpdate, System};

/// CPU and memory usage at one point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceStats {
    /// Whole-system CPU usage (0-100)
    pub cpu_percent: f32,
    /// Bytes
    pub memory_used: u64,
    /// Bytes
    pub memory_total: u64,
    /// CPU usage of the daemon process
    pub process_cpu_percent: f32,
    /// Resident memory of the daemon process in bytes
    pub process_memory: u64,
}

impl ResourceStats {
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total == 0 {
            0.0
        } else {
            (self.memory_used as f64 / self.memory_total as f64) * 100.0
        }
    }
}

/// Samples system and daemon resource usage for the stats display
pub struct ResourceMonitor {
    system: System,
    pid: sysinfo::Pid,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let pid = sysinfo::Pid::from(std::process::id() as usize);

        // CPU usage is a difference between two refreshes; take the first one now
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);

        Self { system, pid }
    }

    pub fn sample(&mut self) -> ResourceStats {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        // Only our own process; refreshing all of them opens every /proc/*/stat
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), false);

        let process = self.system.process(self.pid);
        ResourceStats {
            cpu_percent: self.system.global_cpu_usage(),
            memory_used: self.system.used_memory(),
            memory_total: self.system.total_memory(),
            process_cpu_percent: process.map(|p| p.cpu_usage()).unwrap_or(0.0),
            process_memory: process.map(|p| p.memory()).unwrap_or(0),
        }
    }

    pub fn log(&mut self) {
        let stats = self.sample();
        log::info!(
            "System stats: cpu {:.1}%, memory {}/{} MB ({:.1}%), loopwall cpu {:.1}% mem {} MB",
            stats.cpu_percent,
            stats.memory_used / 1024 / 1024,
            stats.memory_total / 1024 / 1024,
            stats.memory_percent(),
            stats.process_cpu_percent,
            stats.process_memory / 1024 / 1024
        );
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
