//! Configuration surface (§6.4), builder-based to match the teacher crates'
//! `*ConfigBuilder` idiom (e.g. `RetryConfigBuilder`).

use std::time::Duration;

use crate::task::Priority;

/// Recognized scheduler-wide options.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Capacity of each per-priority channel. Default 10.
    pub max_buffer_size: usize,
    /// Number of worker tasks. Default 5.
    pub worker_pool_size: usize,
    /// Maximum retries before terminal failure. Default 0.
    pub max_task_retry: u32,
    /// Ordered (ascending) list of priority classes the dispatcher scans.
    pub priority_classes: Vec<Priority>,
    /// Sleep between dispatcher scan passes when nothing was eligible.
    pub dispatch_interval: Duration,
    /// Sleep between a worker's receive attempts when every channel is empty.
    pub worker_idle_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 10,
            worker_pool_size: 5,
            max_task_retry: 0,
            priority_classes: vec![Priority::Low, Priority::High],
            dispatch_interval: Duration::from_millis(20),
            worker_idle_interval: Duration::from_millis(100),
        }
    }
}

impl SchedulerConfig {
    /// Starts a builder with the documented defaults.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }

    /// A single worker, a single-slot buffer, no retries — useful for
    /// exercising the boundary behaviors in §8 deterministically.
    pub fn conservative() -> SchedulerConfig {
        SchedulerConfig::builder()
            .max_buffer_size(1)
            .worker_pool_size(1)
            .max_task_retry(0)
            .build()
    }

    /// A more generous pool for throughput-oriented deployments.
    pub fn aggressive() -> SchedulerConfig {
        SchedulerConfig::builder()
            .max_buffer_size(100)
            .worker_pool_size(32)
            .max_task_retry(5)
            .build()
    }

    /// Priority classes in descending (highest-first) order, the order the
    /// dispatcher and worker pool actually scan in.
    pub fn priority_classes_descending(&self) -> Vec<Priority> {
        let mut classes = self.priority_classes.clone();
        classes.sort_by(|a, b| b.cmp(a));
        classes
    }
}

/// Builder for [`SchedulerConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfigBuilder {
    /// Starts from the documented defaults.
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    /// Sets the per-priority channel capacity.
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config.max_buffer_size = size;
        self
    }

    /// Sets the worker pool size.
    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.config.worker_pool_size = size;
        self
    }

    /// Sets the maximum retry count before terminal failure. Any
    /// non-negative value is accepted — the spec treats the source's
    /// `retries > 1` guard quirk as unintentional (§9).
    pub fn max_task_retry(mut self, retries: u32) -> Self {
        self.config.max_task_retry = retries;
        self
    }

    /// Overrides the recognized priority classes.
    pub fn priority_classes(mut self, classes: Vec<Priority>) -> Self {
        self.config.priority_classes = classes;
        self
    }

    /// Overrides the dispatcher's inter-pass sleep.
    pub fn dispatch_interval(mut self, interval: Duration) -> Self {
        self.config.dispatch_interval = interval;
        self
    }

    /// Overrides a worker's idle sleep between receive attempts.
    pub fn worker_idle_interval(mut self, interval: Duration) -> Self {
        self.config.worker_idle_interval = interval;
        self
    }

    /// Builds the final configuration.
    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}
