// src/config.rs
use std::time::Duration;

use crate::error::QueueError;
use crate::transport::Endpoint;

/// Default intake address (producers connect here).
pub const DEFAULT_INTAKE_ADDRESS: &str = "tcp://127.0.0.1:5000";
/// Default distribution address (workers connect here).
pub const DEFAULT_DISTRIBUTION_ADDRESS: &str = "tcp://127.0.0.1:6000";
/// Distribution address used when broker and workers share a process.
pub const LOCAL_DISTRIBUTION_ADDRESS: &str = "inproc://recipe-info";

/// What the broker does when a cycle fails (bad request frame, producer gone
/// mid-acknowledgement, transport trouble).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePolicy {
    /// Stop the run loop and surface the error: one malformed request
    /// takes the broker down, but producers never wait on a broker that
    /// silently stopped distributing.
    #[default]
    Fatal,
    /// Log the error and move on to the next cycle.
    Continue,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub intake_address: String,
    pub distribution_address: String,
    /// High-water-mark on the intake (reply) socket.
    pub intake_hwm: usize,
    /// High-water-mark on the distribution (push) socket.
    pub distribution_hwm: usize,
    /// Backoff between failed distribution attempts.
    pub sleep_timeout: Duration,
    /// Worker poll window; an empty poll after this long is not an error.
    pub wait_timeout: Duration,
    /// Worker pool size for the combined broker+workers topology.
    pub max_workers: usize,
    pub cycle_policy: CyclePolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            intake_address: DEFAULT_INTAKE_ADDRESS.to_string(),
            distribution_address: DEFAULT_DISTRIBUTION_ADDRESS.to_string(),
            intake_hwm: 1,
            distribution_hwm: 1,
            sleep_timeout: Duration::from_millis(100),
            wait_timeout: Duration::from_secs(5),
            max_workers: default_worker_count(),
            cycle_policy: CyclePolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn new(
        intake_address: impl Into<String>,
        distribution_address: impl Into<String>,
    ) -> Self {
        Self {
            intake_address: intake_address.into(),
            distribution_address: distribution_address.into(),
            ..Self::default()
        }
    }

    /// Topology of the combined `workers` command: TCP intake, in-process
    /// distribution.
    pub fn local(intake_address: impl Into<String>) -> Self {
        Self::new(intake_address, LOCAL_DISTRIBUTION_ADDRESS)
    }

    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        let intake = Endpoint::parse(&self.intake_address)?;
        Endpoint::parse(&self.distribution_address)?;
        // Port-0 binds resolve to distinct ephemeral ports, so two equal
        // ephemeral addresses are fine.
        if self.intake_address == self.distribution_address && !intake.is_ephemeral() {
            return Err(QueueError::connection(
                &self.distribution_address,
                "intake and distribution must be distinct addresses",
            ));
        }
        Ok(())
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
}
