//! System configuration.

/// Tunables for a [`System`](crate::System).
///
/// The defaults are sensible for most workloads; construct with
/// `SystemConfig::default()` and override fields as needed.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Number of pool worker threads. 0 means one per available CPU core.
    pub workers: usize,
    /// Upper bound on mailbox items drained per resume burst. The
    /// high-priority slot receives a 5x share of this quantum.
    pub resume_quantum: usize,
    /// Stack size for stackful coroutine actors.
    pub coroutine_stack_size: usize,
}

/// Default resume quantum. With both the high-priority and regular slots
/// loaded this splits into 5 high-priority messages and 1 regular message
/// per burst.
pub const DEFAULT_RESUME_QUANTUM: usize = 6;

/// Default coroutine stack size: 64 KiB. Virtual memory lazy-commits pages,
/// so many thousands of actors with 64 KiB virtual stacks are feasible.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            workers: 0,
            resume_quantum: DEFAULT_RESUME_QUANTUM,
            coroutine_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl SystemConfig {
    /// Resolve the effective worker count.
    pub(crate) fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_workers_defaults_to_cores() {
        let config = SystemConfig::default();
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_explicit_worker_count() {
        let config = SystemConfig {
            workers: 3,
            ..SystemConfig::default()
        };
        assert_eq!(config.effective_workers(), 3);
    }
}
