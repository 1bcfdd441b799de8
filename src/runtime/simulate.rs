//! Synthetic host model for exercising the adaptation loop end to end.
//!
//! The host owns a frozen random linear map `in_dim → out_dim`, draws
//! Gaussian feature vectors, and always prefers one fixed output index.
//! Its surprise `1 - p(target)` is the plasticity signal, so a working
//! adaptation loop should raise the target's probability over an episode.

use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Serialize;

use crate::learning::engine::ExperienceEngine;
use crate::runtime::health::AdaptationMonitor;

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|v| (v - max_val).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.iter().map(|e| e / sum).collect()
}

pub struct SyntheticHost {
    pub in_dim: usize,
    pub out_dim: usize,

    /// Frozen base transform, in_dim × out_dim.
    weights: Array2<f32>,

    rng: StdRng,
    noise: Normal<f32>,
    target: usize,
}

impl SyntheticHost {
    pub fn new(in_dim: usize, out_dim: usize, seed: u64) -> Result<Self> {
        anyhow::ensure!(in_dim > 0 && out_dim > 0, "host dimensions must be positive");

        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0f32, 1.0).context("invalid feature distribution")?;
        let w_scale = 1.0 / (in_dim as f32).sqrt();
        let w_dist = Normal::new(0.0f32, w_scale).context("invalid weight distribution")?;

        let values: Vec<f32> = (0..in_dim * out_dim).map(|_| w_dist.sample(&mut rng)).collect();
        let weights = Array2::from_shape_vec((in_dim, out_dim), values)
            .context("base transform shape mismatch")?;
        let target = rng.gen_range(0..out_dim);

        Ok(Self {
            in_dim,
            out_dim,
            weights,
            rng,
            noise,
            target,
        })
    }

    /// The output index this host wants to see more of.
    pub fn target(&self) -> usize {
        self.target
    }

    pub fn sample_input(&mut self) -> Vec<f32> {
        let noise = self.noise;
        (0..self.in_dim).map(|_| noise.sample(&mut self.rng)).collect()
    }

    /// Frozen forward pass, xᵀW.
    pub fn base_logits(&self, x: &[f32]) -> Vec<f32> {
        ArrayView1::from(x).dot(&self.weights).to_vec()
    }
}

/// Outcome of one simulated episode.
#[derive(Clone, Debug, Serialize)]
pub struct EpisodeSummary {
    pub steps: usize,
    /// Mean p(target) over the first tenth of the episode.
    pub early_target_prob: f32,
    /// Mean p(target) over the last tenth of the episode.
    pub late_target_prob: f32,
    pub final_delta_norm: f32,
}

/// Drive `steps` host inference steps: forward, apply correction, learn.
pub fn run_episode(
    host: &mut SyntheticHost,
    engine: &mut ExperienceEngine,
    monitor: &mut AdaptationMonitor,
    steps: usize,
) -> EpisodeSummary {
    let window = (steps / 10).max(1);
    let mut early = 0.0f32;
    let mut late = 0.0f32;
    let target = host.target();

    for step in 0..steps {
        let x = host.sample_input();
        let mut y = host.base_logits(&x);
        engine.apply(&x, &mut y, None);
        let probs = softmax(&y);
        let p = probs[target];

        if step < window {
            early += p;
        }
        if step + window >= steps {
            late += p;
        }

        let signal = 1.0 - p;
        let started = Instant::now();
        let result = engine.step(&x, &probs, target, signal);
        let latency_us = started.elapsed().as_secs_f32() * 1e6;
        monitor.record_step(
            signal,
            result.delta_norm,
            latency_us,
            result.applied,
            result.rescaled,
        );

        if step % 100 == 0 {
            tracing::debug!(
                "step {}: p(target)={:.4} norm={:.4}",
                step,
                p,
                result.delta_norm
            );
        }
    }

    let denom = window.min(steps.max(1)) as f32;
    EpisodeSummary {
        steps,
        early_target_prob: early / denom,
        late_target_prob: late / denom,
        final_delta_norm: engine.lora().delta_norm(),
    }
}
