//! Experience engine: the host-facing loop around one Notch-LoRA unit.
//!
//! Per inference step the host calls:
//!   a) `apply`: add the correction into the freshly computed output
//!   b) `step`: build a delta from the output distribution and target,
//!      run one notch step gated by the signal
//!
//! After each step the delta norm is checked against `max_delta_norm`; an
//! over-grown delta is scaled back onto that radius rather than frozen, so
//! the unit keeps learning.

use serde::{Deserialize, Serialize};

use super::lora::NotchLora;

/// Experience configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperienceConfig {
    /// Added to the target's desired delta.
    pub push: f32,

    /// Total subtracted across suppressed competitors.
    pub pull: f32,

    /// Competitors to suppress (0 = single strongest).
    pub topk: usize,

    /// Delta norm ceiling; 0 disables the check.
    pub max_delta_norm: f32,

    /// EMA decay for the tracked delta norm.
    pub norm_ema_decay: f32,
}

impl Default for ExperienceConfig {
    fn default() -> Self {
        Self {
            push: 1.0,
            pull: 0.5,
            topk: 0,
            max_delta_norm: 10.0,
            norm_ema_decay: 0.99,
        }
    }
}

/// Engine statistics.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ExperienceStats {
    pub total_steps: u64,
    pub skipped_steps: u64,
    pub rescales: u64,
    pub norm_ema: f32,
}

/// Result of a single experience step.
#[derive(Clone, Copy, Debug)]
pub struct ExperienceStepResult {
    /// Delta norm after the step (and any rescale).
    pub delta_norm: f32,

    /// Whether the unit was updated.
    pub applied: bool,

    /// Whether the delta was scaled back to `max_delta_norm`.
    pub rescaled: bool,
}

pub struct ExperienceEngine {
    pub config: ExperienceConfig,
    pub stats: ExperienceStats,
    lora: NotchLora,
}

impl ExperienceEngine {
    pub fn new(lora: NotchLora, config: ExperienceConfig) -> Self {
        let norm = lora.delta_norm();
        Self {
            config,
            stats: ExperienceStats {
                norm_ema: norm,
                ..Default::default()
            },
            lora,
        }
    }

    pub fn lora(&self) -> &NotchLora {
        &self.lora
    }

    pub fn lora_mut(&mut self) -> &mut NotchLora {
        &mut self.lora
    }

    pub fn into_inner(self) -> NotchLora {
        self.lora
    }

    /// Add the correction into `y`, at `indices` only when given.
    pub fn apply(&mut self, x: &[f32], y: &mut [f32], indices: Option<&[usize]>) {
        match indices {
            Some(idx) => self.lora.apply_sparse(x, y, idx),
            None => self.lora.apply_dense(x, y),
        }
    }

    /// One experience step from the host's distribution and chosen target.
    pub fn step(
        &mut self,
        x: &[f32],
        probs: &[f32],
        target: usize,
        signal: f32,
    ) -> ExperienceStepResult {
        let applied = self.lora.experience_step(
            x,
            probs,
            target,
            signal,
            self.config.push,
            self.config.pull,
            self.config.topk,
        );

        if !applied {
            self.stats.skipped_steps += 1;
            tracing::debug!(
                "experience step skipped (target {}, {} skipped so far)",
                target,
                self.stats.skipped_steps
            );
            return ExperienceStepResult {
                delta_norm: self.lora.delta_norm(),
                applied: false,
                rescaled: false,
            };
        }

        self.stats.total_steps += 1;

        let mut norm = self.lora.delta_norm();
        let max = self.config.max_delta_norm;
        let rescaled = max > 0.0 && norm > max;
        if rescaled {
            self.lora.scale(max / norm);
            self.stats.rescales += 1;
            tracing::debug!("delta norm {:.4} over {:.4}, rescaled", norm, max);
            norm = self.lora.delta_norm();
        }

        let d = self.config.norm_ema_decay.clamp(0.0, 1.0);
        self.stats.norm_ema = self.stats.norm_ema * d + norm * (1.0 - d);

        ExperienceStepResult {
            delta_norm: norm,
            applied: true,
            rescaled,
        }
    }
}
