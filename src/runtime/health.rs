//! Health monitoring for a live adaptation loop.
//!
//! Tracks how far accumulated experience has drifted (delta norm), what
//! signals are driving it, how long each update takes and how many steps
//! the host fed in that had to be skipped.

use std::collections::VecDeque;

use serde::Serialize;

/// Health status levels.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum HealthStatus {
    /// All metrics nominal.
    Healthy,
    /// Some metric crossed its warning threshold.
    Degraded(String),
    /// Some metric crossed its critical threshold.
    Critical(String),
}

/// One recorded value, tagged with the step it came from.
#[derive(Clone, Debug)]
pub struct MetricSample {
    pub step: u64,
    pub value: f32,
}

/// A rolling metric window.
pub struct MetricTracker {
    pub name: String,
    pub samples: VecDeque<MetricSample>,
    pub max_samples: usize,

    /// Upper bounds; `None` disables the check.
    pub warn_threshold: Option<f32>,
    pub critical_threshold: Option<f32>,
}

impl MetricTracker {
    pub fn new(name: &str, max_samples: usize) -> Self {
        Self {
            name: name.to_string(),
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
            warn_threshold: None,
            critical_threshold: None,
        }
    }

    pub fn with_thresholds(mut self, warn: f32, critical: f32) -> Self {
        self.warn_threshold = Some(warn);
        self.critical_threshold = Some(critical);
        self
    }

    pub fn record(&mut self, step: u64, value: f32) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(MetricSample { step, value });
    }

    pub fn latest(&self) -> Option<f32> {
        self.samples.back().map(|s| s.value)
    }

    pub fn mean(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.value).sum::<f32>() / self.samples.len() as f32
    }

    /// Sample standard deviation.
    pub fn std_dev(&self) -> f32 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self
            .samples
            .iter()
            .map(|s| (s.value - mean).powi(2))
            .sum::<f32>()
            / (self.samples.len() - 1) as f32;
        var.sqrt()
    }

    /// Largest value in the window, 0 when empty.
    pub fn max(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples
            .iter()
            .map(|s| s.value)
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// Smallest value in the window, 0 when empty.
    pub fn min(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples
            .iter()
            .map(|s| s.value)
            .fold(f32::INFINITY, f32::min)
    }

    /// 99th percentile of the window.
    pub fn p99(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut values: Vec<f32> = self.samples.iter().map(|s| s.value).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        let idx = ((values.len() as f32) * 0.99) as usize;
        values[idx.min(values.len() - 1)]
    }

    /// Status from the latest value against the thresholds.
    pub fn status(&self) -> HealthStatus {
        let Some(val) = self.latest() else {
            return HealthStatus::Healthy;
        };
        if !val.is_finite() {
            return HealthStatus::Critical(format!("{}: non-finite value {}", self.name, val));
        }
        if let Some(crit) = self.critical_threshold {
            if val >= crit {
                return HealthStatus::Critical(format!(
                    "{}: {:.3} >= critical {}",
                    self.name, val, crit
                ));
            }
        }
        if let Some(warn) = self.warn_threshold {
            if val >= warn {
                return HealthStatus::Degraded(format!(
                    "{}: {:.3} >= warn {}",
                    self.name, val, warn
                ));
            }
        }
        HealthStatus::Healthy
    }

    /// Latest value more than 3σ from the window mean.
    pub fn is_anomalous(&self) -> bool {
        if let Some(val) = self.latest() {
            let std = self.std_dev();
            if std > 1e-8 {
                return ((val - self.mean()) / std).abs() > 3.0;
            }
        }
        false
    }
}

/// Monitor for one adaptation unit.
pub struct AdaptationMonitor {
    /// sqrt(ΣA² + ΣB²) after each step.
    pub delta_norm: MetricTracker,

    /// Raw (unclamped) signal fed by the host.
    pub signal: MetricTracker,

    /// Update latency in microseconds.
    pub step_latency_us: MetricTracker,

    pub total_steps: u64,
    pub skipped_steps: u64,
    pub rescales: u64,
}

impl AdaptationMonitor {
    /// `norm_warn` / `norm_critical` bound the delta norm.
    pub fn new(norm_warn: f32, norm_critical: f32) -> Self {
        Self {
            delta_norm: MetricTracker::new("delta_norm", 1000)
                .with_thresholds(norm_warn, norm_critical),
            signal: MetricTracker::new("signal", 1000),
            step_latency_us: MetricTracker::new("step_latency_us", 1000),
            total_steps: 0,
            skipped_steps: 0,
            rescales: 0,
        }
    }

    /// Record the outcome of one host step.
    pub fn record_step(
        &mut self,
        signal: f32,
        delta_norm: f32,
        latency_us: f32,
        applied: bool,
        rescaled: bool,
    ) {
        let step = self.total_steps + self.skipped_steps;
        if !applied {
            self.skipped_steps += 1;
            return;
        }
        self.total_steps += 1;
        if rescaled {
            self.rescales += 1;
        }
        self.signal.record(step, signal);
        self.delta_norm.record(step, delta_norm);
        self.step_latency_us.record(step, latency_us);
    }

    /// Fraction of host steps that were skipped.
    pub fn skip_rate(&self) -> f32 {
        let total = self.total_steps + self.skipped_steps;
        if total == 0 {
            0.0
        } else {
            self.skipped_steps as f32 / total as f32
        }
    }

    pub fn overall_status(&self) -> HealthStatus {
        let checks = [self.delta_norm.status(), self.step_latency_us.status()];

        for check in &checks {
            if matches!(check, HealthStatus::Critical(_)) {
                return check.clone();
            }
        }
        for check in &checks {
            if matches!(check, HealthStatus::Degraded(_)) {
                return check.clone();
            }
        }
        if self.skip_rate() > 0.5 {
            return HealthStatus::Degraded(format!("skip rate {:.2}", self.skip_rate()));
        }
        HealthStatus::Healthy
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.overall_status(),
            total_steps: self.total_steps,
            skipped_steps: self.skipped_steps,
            rescales: self.rescales,
            delta_norm: self.delta_norm.latest().unwrap_or(0.0),
            delta_norm_anomalous: self.delta_norm.is_anomalous(),
            peak_delta_norm: self.delta_norm.max(),
            mean_signal: self.signal.mean(),
            min_signal: self.signal.min(),
            max_signal: self.signal.max(),
            avg_latency_us: self.step_latency_us.mean(),
            p99_latency_us: self.step_latency_us.p99(),
        }
    }
}

/// A health report snapshot.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub total_steps: u64,
    pub skipped_steps: u64,
    pub rescales: u64,
    pub delta_norm: f32,
    pub delta_norm_anomalous: bool,
    pub peak_delta_norm: f32,
    pub mean_signal: f32,
    pub min_signal: f32,
    pub max_signal: f32,
    pub avg_latency_us: f32,
    pub p99_latency_us: f32,
}
