//! Resource limits applied to one sandbox run.

/// Limits enforced on a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Wall-clock time limit for the submitted program, in milliseconds.
    pub time_limit_ms: u64,
    /// Memory limit in KB; swap is disabled.
    pub memory_limit_kb: u64,
    /// Maximum processes/threads inside the sandbox.
    pub pids_limit: i64,
}

impl ResourceLimits {
    pub fn new(time_limit_ms: u64, memory_limit_kb: u64) -> Self {
        Self {
            time_limit_ms,
            memory_limit_kb,
            pids_limit: 50,
        }
    }

    pub fn with_pids_limit(mut self, pids: i64) -> Self {
        self.pids_limit = pids;
        self
    }

    /// CPU-time ulimit in whole seconds: `ceil(time_limit_ms / 1000)`.
    pub fn cpu_time_secs(&self) -> i64 {
        (self.time_limit_ms.div_ceil(1000)) as i64
    }

    /// Memory limit in bytes for the container config.
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_limit_kb * 1024) as i64
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        // 5 s / 256 MiB, matching the intake defaults
        Self::new(5000, 262_144)
    }
}
