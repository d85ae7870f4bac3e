use serde::Deserialize;
use serde_with::serde_as;
use std::time;

/// Scheduler worker knobs.
#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkerSettings {
    #[serde(default = "default_worker_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub interval: time::Duration,
    #[serde(default = "default_worker_batch_size")]
    pub batch_size: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            interval: default_worker_interval(),
            batch_size: default_worker_batch_size(),
        }
    }
}

fn default_worker_interval() -> time::Duration {
    time::Duration::from_secs(30)
}

fn default_worker_batch_size() -> u64 {
    100
}

/// ETA engine knobs.
#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EtaSettings {
    /// Assumed speed when no usable ping history exists.
    #[serde(default = "default_fallback_speed_kmh")]
    pub fallback_speed_kmh: f64,
    /// Trailing history window for the velocity estimate.
    #[serde(default = "default_velocity_window")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub velocity_window: time::Duration,
}

impl Default for EtaSettings {
    fn default() -> Self {
        Self {
            fallback_speed_kmh: default_fallback_speed_kmh(),
            velocity_window: default_velocity_window(),
        }
    }
}

fn default_fallback_speed_kmh() -> f64 {
    30.0
}

fn default_velocity_window() -> time::Duration {
    time::Duration::from_secs(15 * 60)
}

/// Ingress buffer drain knobs.
#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IngressSettings {
    #[serde(default = "default_flush_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub flush_interval: time::Duration,
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,
}

impl Default for IngressSettings {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
            flush_batch_size: default_flush_batch_size(),
        }
    }
}

fn default_flush_interval() -> time::Duration {
    time::Duration::from_secs(15)
}

fn default_flush_batch_size() -> usize {
    100
}
