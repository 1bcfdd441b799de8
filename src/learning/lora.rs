//! Notch-LoRA: low-rank deltas trained by plasticity instead of gradients.
//!
//! Each unit holds ΔW = (α/r) · A · B with A ∈ R^{in×r}, B ∈ R^{r×out}.
//! A starts as small Gaussian noise and B as zeros, so the initial
//! correction is exactly zero.
//!
//! Update rule for input x, desired output shift Δy and signal s:
//!   g = clamp(s, -2, 2)
//!   u ~ N(0, 1)^r · (0.35 + 0.65 · (1 - |g|))
//!   A += lr · x ⊗ u
//!   B += lr · u ⊗ (g · Δy)
//! followed by optional multiplicative decay. No loss, no backprop.
//!
//! Invalid buffers (wrong lengths), out-of-range indices and shape
//! mismatches are absorbed as no-ops so a host inference loop never fails
//! mid-step. Only construction and explicit restores report errors.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_ALPHA, DEFAULT_LR, DEFAULT_SEED, INIT_SCALE, PARAMS_LEN, SHARPNESS_BASE,
    SHARPNESS_SPAN, SIGNAL_LIMIT,
};
use crate::error::LoraError;
use crate::kernels::kernel_dispatch::{dispatch_up_project, select_backend, Backend};
use crate::kernels::lowrank_cpu;
use crate::learning::delta::build_delta_into;
use crate::learning::noise;

/// Construction parameters for a [`NotchLora`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    pub in_dim: usize,
    pub out_dim: usize,
    pub rank: usize,
    pub alpha: f32,
    pub lr: f32,
    pub decay: f32,
    pub seed: u32,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            in_dim: 64,
            out_dim: 256,
            rank: 4,
            alpha: DEFAULT_ALPHA,
            lr: DEFAULT_LR,
            decay: 0.0,
            seed: DEFAULT_SEED,
        }
    }
}

/// Fixed-order monitoring / persistence record.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoraParams {
    pub in_dim: usize,
    pub out_dim: usize,
    pub rank: usize,
    pub alpha: f32,
    pub lr: f32,
    pub decay: f32,
    pub delta_norm: f32,
}

impl LoraParams {
    /// `[in_dim, out_dim, rank, alpha, lr, decay, delta_norm]`.
    pub fn to_array(&self) -> [f32; PARAMS_LEN] {
        [
            self.in_dim as f32,
            self.out_dim as f32,
            self.rank as f32,
            self.alpha,
            self.lr,
            self.decay,
            self.delta_norm,
        ]
    }
}

/// Per-call workspace. Sized once, never exposed.
#[derive(Clone, Debug)]
struct Scratch {
    /// Hidden code (rank).
    u: Vec<f32>,
    /// Scaled desired delta (out_dim).
    dy: Vec<f32>,
    /// xᵀA (rank).
    ax: Vec<f32>,
    /// Scaled correction (out_dim).
    tmp_out: Vec<f32>,
}

/// One independently experienced low-rank delta.
#[derive(Clone, Debug)]
pub struct NotchLora {
    in_dim: usize,
    out_dim: usize,
    rank: usize,
    alpha: f32,
    lr: f32,
    decay: f32,
    seed: u32,

    /// A ∈ R^{in_dim × rank}, row-major.
    a: Array2<f32>,
    /// B ∈ R^{rank × out_dim}, row-major.
    b: Array2<f32>,

    scratch: Scratch,
    backend: Backend,
}

fn alloc_zeroed(buffer: &'static str, rows: usize, cols: usize) -> Result<Vec<f32>, LoraError> {
    let elements = rows.checked_mul(cols).ok_or(LoraError::Allocation {
        buffer,
        elements: usize::MAX,
    })?;
    let mut v = Vec::new();
    v.try_reserve_exact(elements)
        .map_err(|_| LoraError::Allocation { buffer, elements })?;
    v.resize(elements, 0.0);
    Ok(v)
}

fn matrix(buffer: &'static str, rows: usize, cols: usize) -> Result<Array2<f32>, LoraError> {
    let data = alloc_zeroed(buffer, rows, cols)?;
    Array2::from_shape_vec((rows, cols), data).map_err(|_| LoraError::ShapeMismatch {
        buffer,
        expected: rows * cols,
        actual: 0,
    })
}

fn positive_or(v: f32, default: f32) -> f32 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        default
    }
}

impl NotchLora {
    /// Create a unit. Fails on a zero dimension or allocation failure;
    /// nothing partially built escapes.
    ///
    /// `alpha <= 0` → 1.0, `lr <= 0` → 0.01, `decay < 0` or NaN → 0, `seed == 0` →
    /// [`DEFAULT_SEED`]. A is filled with `N(0,1) · 0.02` drawn from the seed
    /// (`in_dim · rank` draws), B with zeros.
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        rank: usize,
        alpha: f32,
        lr: f32,
        decay: f32,
        seed: u32,
    ) -> Result<Self, LoraError> {
        if in_dim == 0 || out_dim == 0 || rank == 0 {
            return Err(LoraError::InvalidDimensions {
                in_dim,
                out_dim,
                rank,
            });
        }

        let mut a = matrix("A", in_dim, rank)?;
        let b = matrix("B", rank, out_dim)?;
        let scratch = Scratch {
            u: alloc_zeroed("u", rank, 1)?,
            dy: alloc_zeroed("dy", out_dim, 1)?,
            ax: alloc_zeroed("Ax", rank, 1)?,
            tmp_out: alloc_zeroed("tmpOut", out_dim, 1)?,
        };

        let mut s = if seed == 0 { DEFAULT_SEED } else { seed };
        for v in a.iter_mut() {
            *v = noise::gaussian(&mut s) * INIT_SCALE;
        }

        Ok(Self {
            in_dim,
            out_dim,
            rank,
            alpha: positive_or(alpha, DEFAULT_ALPHA),
            lr: positive_or(lr, DEFAULT_LR),
            decay: if decay > 0.0 { decay } else { 0.0 },
            seed: s,
            a,
            b,
            scratch,
            backend: select_backend(out_dim),
        })
    }

    pub fn from_config(config: &LoraConfig) -> Result<Self, LoraError> {
        Self::new(
            config.in_dim,
            config.out_dim,
            config.rank,
            config.alpha,
            config.lr,
            config.decay,
            config.seed,
        )
    }

    /// Zero A and B. Shape, hyperparameters and seed are kept.
    pub fn reset(&mut self) {
        self.a.fill(0.0);
        self.b.fill(0.0);
    }

    // ── accessors ─────────────────────────────────────────────

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn lr(&self) -> f32 {
        self.lr
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }

    /// Current generator state.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Overwrite the generator state (zero maps to the default seed).
    pub fn set_seed(&mut self, seed: u32) {
        self.seed = if seed == 0 { DEFAULT_SEED } else { seed };
    }

    /// Forward scaling α/r.
    pub fn scaling(&self) -> f32 {
        self.alpha / self.rank as f32
    }

    pub fn a(&self) -> &Array2<f32> {
        &self.a
    }

    pub fn b(&self) -> &Array2<f32> {
        &self.b
    }

    /// A as a flat row-major buffer (`A[i, r]` at `i * rank + r`).
    pub fn a_raw(&self) -> &[f32] {
        self.a.as_slice().unwrap_or(&[])
    }

    /// B as a flat row-major buffer (`B[r, j]` at `r * out_dim + j`).
    pub fn b_raw(&self) -> &[f32] {
        self.b.as_slice().unwrap_or(&[])
    }

    /// Number of adaptable parameters.
    pub fn param_count(&self) -> usize {
        self.a.len() + self.b.len()
    }

    /// Footprint of factors plus scratch, in bytes.
    pub fn memory_bytes(&self) -> usize {
        let scratch = 2 * self.rank + 2 * self.out_dim;
        (self.param_count() + scratch) * std::mem::size_of::<f32>()
    }

    pub fn same_shape(&self, other: &NotchLora) -> bool {
        self.in_dim == other.in_dim && self.out_dim == other.out_dim && self.rank == other.rank
    }

    /// Replace both factors from flat row-major buffers. All or nothing.
    pub fn load_factors(&mut self, a: &[f32], b: &[f32]) -> Result<(), LoraError> {
        if a.len() != self.a.len() {
            return Err(LoraError::ShapeMismatch {
                buffer: "A",
                expected: self.a.len(),
                actual: a.len(),
            });
        }
        if b.len() != self.b.len() {
            return Err(LoraError::ShapeMismatch {
                buffer: "B",
                expected: self.b.len(),
                actual: b.len(),
            });
        }
        for (dst, &src) in self.a.iter_mut().zip(a) {
            *dst = src;
        }
        for (dst, &src) in self.b.iter_mut().zip(b) {
            *dst = src;
        }
        Ok(())
    }

    // ── forward ───────────────────────────────────────────────

    /// `y += (α/r) · (xᵀA) B` over every output index.
    pub fn apply_dense(&mut self, x: &[f32], y: &mut [f32]) {
        if x.len() != self.in_dim || y.len() != self.out_dim {
            tracing::debug!(
                "apply_dense skipped: x {}/{} y {}/{}",
                x.len(),
                self.in_dim,
                y.len(),
                self.out_dim
            );
            return;
        }
        let scaling = self.scaling();
        let (Some(a), Some(b)) = (self.a.as_slice(), self.b.as_slice()) else {
            return;
        };

        lowrank_cpu::down_project(x, a, self.in_dim, self.rank, &mut self.scratch.ax);
        dispatch_up_project(
            self.backend,
            &self.scratch.ax,
            b,
            self.out_dim,
            scaling,
            &mut self.scratch.tmp_out,
        );
        for (yj, &t) in y.iter_mut().zip(&self.scratch.tmp_out) {
            *yj += t;
        }
    }

    /// Like [`apply_dense`](Self::apply_dense) but only at `indices`.
    /// Out-of-range indices are skipped. Results at the selected indices are
    /// bit-identical to the dense path.
    pub fn apply_sparse(&mut self, x: &[f32], y: &mut [f32], indices: &[usize]) {
        if x.len() != self.in_dim || y.len() != self.out_dim || indices.is_empty() {
            return;
        }
        let scaling = self.scaling();
        let (Some(a), Some(b)) = (self.a.as_slice(), self.b.as_slice()) else {
            return;
        };

        lowrank_cpu::down_project(x, a, self.in_dim, self.rank, &mut self.scratch.ax);
        for &j in indices {
            if j >= self.out_dim {
                continue;
            }
            y[j] += lowrank_cpu::up_project_at(&self.scratch.ax, b, self.out_dim, j) * scaling;
        }
    }

    /// Compute the correction alone, ΔW · x.
    pub fn forward(&mut self, x: &Array1<f32>) -> Array1<f32> {
        let xs = x.to_vec();
        let mut y = vec![0.0f32; self.out_dim];
        self.apply_dense(&xs, &mut y);
        Array1::from_vec(y)
    }

    // ── plasticity ────────────────────────────────────────────

    /// One notch step toward output shift `dy`, gated by `signal`.
    ///
    /// Returns `false` (and leaves the unit untouched, seed included) when
    /// `x`/`dy` have the wrong length or `signal` is NaN. Infinite signals
    /// clamp like any other.
    pub fn notch_step(&mut self, x: &[f32], dy: &[f32], signal: f32) -> bool {
        if x.len() != self.in_dim || dy.len() != self.out_dim || signal.is_nan() {
            tracing::debug!("notch_step skipped: invalid input");
            return false;
        }
        self.scratch.dy.copy_from_slice(dy);
        self.notch_from_scratch(x, signal);
        true
    }

    /// Build the delta from `probs` into scratch and run one notch step.
    ///
    /// A no-op returning `false` on an out-of-range `target`, wrong buffer
    /// lengths or a NaN signal.
    #[allow(clippy::too_many_arguments)]
    pub fn experience_step(
        &mut self,
        x: &[f32],
        probs: &[f32],
        target: usize,
        signal: f32,
        push: f32,
        pull: f32,
        topk: usize,
    ) -> bool {
        if x.len() != self.in_dim
            || probs.len() != self.out_dim
            || target >= self.out_dim
            || signal.is_nan()
        {
            tracing::debug!("experience_step skipped: target {} of {}", target, self.out_dim);
            return false;
        }
        build_delta_into(&mut self.scratch.dy, probs, target, push, pull, topk);
        self.notch_from_scratch(x, signal);
        true
    }

    /// Notch step with the unscaled delta already in `scratch.dy`.
    fn notch_from_scratch(&mut self, x: &[f32], signal: f32) {
        let g = signal.clamp(-SIGNAL_LIMIT, SIGNAL_LIMIT);
        for v in self.scratch.dy.iter_mut() {
            *v *= g;
        }

        // Strong |g| → cleaner hidden code; g near 0 → mostly noise.
        let k = SHARPNESS_BASE + SHARPNESS_SPAN * (1.0 - g.abs());
        let mut s = self.seed;
        for u in self.scratch.u.iter_mut() {
            *u = noise::gaussian(&mut s) * k;
        }
        self.seed = s;

        let lr = self.lr;
        let decay = self.decay;
        let (Some(a), Some(b)) = (self.a.as_slice_mut(), self.b.as_slice_mut()) else {
            return;
        };

        lowrank_cpu::outer_accumulate(a, x, &self.scratch.u, lr);
        lowrank_cpu::outer_accumulate(b, &self.scratch.u, &self.scratch.dy, lr);

        if decay > 0.0 {
            let d = (1.0 - decay).clamp(0.0, 1.0);
            lowrank_cpu::scale_in_place(a, d);
            lowrank_cpu::scale_in_place(b, d);
        }
    }

    // ── composition ───────────────────────────────────────────

    /// Multiply every element of A and B by `s`.
    pub fn scale(&mut self, s: f32) {
        self.a.mapv_inplace(|v| v * s);
        self.b.mapv_inplace(|v| v * s);
    }

    /// `self += weight · src`, element-wise over A and B.
    ///
    /// Shapes must match exactly; otherwise nothing changes and `false` is
    /// returned.
    pub fn merge(&mut self, src: &NotchLora, weight: f32) -> bool {
        if !self.same_shape(src) {
            tracing::debug!(
                "merge skipped: dst {}x{}x{} src {}x{}x{}",
                self.in_dim,
                self.rank,
                self.out_dim,
                src.in_dim,
                src.rank,
                src.out_dim
            );
            return false;
        }
        let (Some(da), Some(db)) = (self.a.as_slice_mut(), self.b.as_slice_mut()) else {
            return false;
        };
        let (Some(sa), Some(sb)) = (src.a.as_slice(), src.b.as_slice()) else {
            return false;
        };
        lowrank_cpu::axpy(da, sa, weight);
        lowrank_cpu::axpy(db, sb, weight);
        true
    }

    /// ‖A‖² + ‖B‖², square-rooted. Drift from the zero state.
    pub fn delta_norm(&self) -> f32 {
        let acc = lowrank_cpu::sum_squares(0.0, self.a_raw());
        lowrank_cpu::sum_squares(acc, self.b_raw()).sqrt()
    }

    /// Snapshot of shape, hyperparameters and current norm.
    pub fn params(&self) -> LoraParams {
        LoraParams {
            in_dim: self.in_dim,
            out_dim: self.out_dim,
            rank: self.rank,
            alpha: self.alpha,
            lr: self.lr,
            decay: self.decay,
            delta_norm: self.delta_norm(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::delta::build_delta_from_probs;

    fn unit(seed: u32) -> NotchLora {
        NotchLora::new(6, 9, 3, 2.0, 0.1, 0.0, seed).expect("valid unit")
    }

    fn bits(v: &[f32]) -> Vec<u32> {
        v.iter().map(|f| f.to_bits()).collect()
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(matches!(
            NotchLora::new(0, 4, 2, 1.0, 0.1, 0.0, 1),
            Err(LoraError::InvalidDimensions { .. })
        ));
        assert!(NotchLora::new(4, 0, 2, 1.0, 0.1, 0.0, 1).is_err());
        assert!(NotchLora::new(4, 4, 0, 1.0, 0.1, 0.0, 1).is_err());
    }

    #[test]
    fn test_hyperparameter_normalisation() {
        let l = NotchLora::new(2, 2, 1, -1.0, 0.0, -0.5, 0).unwrap();
        assert_eq!(l.alpha(), DEFAULT_ALPHA);
        assert_eq!(l.lr(), DEFAULT_LR);
        assert_eq!(l.decay(), 0.0);

        let d = NotchLora::new(2, 2, 1, -1.0, 0.0, -0.5, DEFAULT_SEED).unwrap();
        assert_eq!(bits(l.a_raw()), bits(d.a_raw()));
        assert_eq!(l.seed(), d.seed());
    }

    #[test]
    fn test_init_shapes_and_seed_advance() {
        let l = NotchLora::new(5, 7, 3, 1.0, 0.1, 0.0, 99).unwrap();
        assert_eq!(l.a().dim(), (5, 3));
        assert_eq!(l.b().dim(), (3, 7));
        assert!(l.b_raw().iter().all(|&v| v == 0.0));

        let mut s = 99u32;
        let expected: Vec<f32> = (0..15).map(|_| noise::gaussian(&mut s) * INIT_SCALE).collect();
        assert_eq!(bits(l.a_raw()), bits(&expected));
        assert_eq!(l.seed(), s);
    }

    #[test]
    fn test_zero_init_correction() {
        let mut l = unit(7);
        let x = [1.0, -2.0, 0.5, 3.0, 0.0, 1.5];
        let mut y = [0.25; 9];
        l.apply_dense(&x, &mut y);
        assert!(y.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn test_determinism() {
        let x = [0.3, -0.1, 0.8, 0.0, -0.6, 0.2];
        let dy = [1.0, -0.5, 0.0, 0.0, 0.2, 0.0, -0.1, 0.0, 0.3];
        let run = || {
            let mut l = unit(42);
            let mut y = [0.0; 9];
            for step in 0..10 {
                l.notch_step(&x, &dy, step as f32 * 0.3 - 1.0);
                l.apply_dense(&x, &mut y);
            }
            (bits(l.a_raw()), bits(l.b_raw()), l.seed(), bits(&y))
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_sparse_matches_dense() {
        let mut l = unit(3);
        let x = [0.3, -0.1, 0.8, 0.4, -0.6, 0.2];
        let dy = [1.0, -0.5, 0.0, 0.7, 0.2, -0.4, -0.1, 0.0, 0.3];
        for _ in 0..5 {
            l.notch_step(&x, &dy, 0.8);
        }

        let base: Vec<f32> = (0..9).map(|j| j as f32 * 0.1).collect();
        let mut dense = base.clone();
        l.apply_dense(&x, &mut dense);

        let indices = [8, 0, 3, 3, 42, 5];
        let mut sparse = base.clone();
        l.apply_sparse(&x, &mut sparse, &indices);

        for &j in &[0usize, 5, 8] {
            assert_eq!(sparse[j].to_bits(), dense[j].to_bits());
        }
        // Index 3 listed twice: applied twice.
        let once = dense[3] - base[3];
        assert!((sparse[3] - (base[3] + 2.0 * once)).abs() < 1e-6);
        // Unselected positions untouched.
        for &j in &[1usize, 2, 4, 6, 7] {
            assert_eq!(sparse[j], base[j]);
        }
    }

    #[test]
    fn test_notch_step_update_rule() {
        let mut l = NotchLora::new(2, 3, 1, 1.0, 0.5, 0.0, 11).unwrap();
        let a0 = l.a_raw().to_vec();
        let seed0 = l.seed();
        let x = [1.0, -2.0];
        let dy = [1.0, 0.0, -1.0];
        assert!(l.notch_step(&x, &dy, 1.0));

        // g = 1 → k = 0.35
        let mut s = seed0;
        let u = noise::gaussian(&mut s) * 0.35;
        assert_eq!(l.seed(), s);
        assert!((l.a_raw()[0] - (a0[0] + 0.5 * 1.0 * u)).abs() < 1e-6);
        assert!((l.a_raw()[1] - (a0[1] + 0.5 * -2.0 * u)).abs() < 1e-6);
        assert!((l.b_raw()[0] - 0.5 * u).abs() < 1e-6);
        assert!(l.b_raw()[1].abs() < 1e-12);
        assert!((l.b_raw()[2] + 0.5 * u).abs() < 1e-6);
    }

    #[test]
    fn test_signal_is_clamped() {
        let x = [1.0, 1.0];
        let dy = [1.0, 1.0, 1.0];
        let mut hot = NotchLora::new(2, 3, 2, 1.0, 0.1, 0.0, 5).unwrap();
        let mut capped = hot.clone();
        hot.notch_step(&x, &dy, 50.0);
        capped.notch_step(&x, &dy, 2.0);
        assert_eq!(bits(hot.a_raw()), bits(capped.a_raw()));
        assert_eq!(bits(hot.b_raw()), bits(capped.b_raw()));
    }

    #[test]
    fn test_notch_step_invalid_is_noop() {
        let mut l = unit(8);
        let before = (bits(l.a_raw()), bits(l.b_raw()), l.seed());
        assert!(!l.notch_step(&[1.0; 5], &[0.0; 9], 1.0));
        assert!(!l.notch_step(&[1.0; 6], &[0.0; 8], 1.0));
        assert!(!l.notch_step(&[1.0; 6], &[0.0; 9], f32::NAN));
        assert_eq!(before, (bits(l.a_raw()), bits(l.b_raw()), l.seed()));
    }

    #[test]
    fn test_decay_applied_in_step() {
        let mut plain = NotchLora::new(3, 3, 2, 1.0, 0.1, 0.0, 21).unwrap();
        let mut decayed = NotchLora::new(3, 3, 2, 1.0, 0.1, 0.25, 21).unwrap();
        let x = [1.0, 0.0, -1.0];
        let dy = [0.5, -0.5, 0.0];
        plain.notch_step(&x, &dy, 1.0);
        decayed.notch_step(&x, &dy, 1.0);
        for (p, d) in plain.a_raw().iter().zip(decayed.a_raw()) {
            assert!((p * 0.75 - d).abs() < 1e-7);
        }
        for (p, d) in plain.b_raw().iter().zip(decayed.b_raw()) {
            assert!((p * 0.75 - d).abs() < 1e-7);
        }
    }

    #[test]
    fn test_decay_factor_clamped() {
        let mut l = NotchLora::new(2, 2, 1, 1.0, 0.1, 3.0, 4).unwrap();
        l.notch_step(&[1.0, 1.0], &[1.0, 1.0], 1.0);
        assert_eq!(l.delta_norm(), 0.0);
    }

    #[test]
    fn test_infinite_decay_zeroes_factors() {
        let mut l = NotchLora::new(2, 2, 1, 1.0, 0.1, f32::INFINITY, 4).unwrap();
        assert_eq!(l.decay(), f32::INFINITY);
        assert!(l.notch_step(&[1.0, 1.0], &[1.0, 1.0], 1.0));
        assert_eq!(l.delta_norm(), 0.0);

        let nan = NotchLora::new(2, 2, 1, 1.0, 0.1, f32::NAN, 4).unwrap();
        assert_eq!(nan.decay(), 0.0);
    }

    #[test]
    fn test_infinite_signal_clamps_to_limit() {
        let x = [1.0, -0.5];
        let dy = [1.0, 0.0, -1.0];
        let mut pos = NotchLora::new(2, 3, 2, 1.0, 0.1, 0.0, 5).unwrap();
        let mut capped = pos.clone();
        assert!(pos.notch_step(&x, &dy, f32::INFINITY));
        capped.notch_step(&x, &dy, 2.0);
        assert_eq!(bits(pos.a_raw()), bits(capped.a_raw()));
        assert_eq!(bits(pos.b_raw()), bits(capped.b_raw()));
        assert_eq!(pos.seed(), capped.seed());

        let mut neg = NotchLora::new(2, 3, 2, 1.0, 0.1, 0.0, 5).unwrap();
        let mut neg_capped = neg.clone();
        let probs = [0.2, 0.5, 0.3];
        assert!(neg.experience_step(&x, &probs, 0, f32::NEG_INFINITY, 1.0, 0.5, 0));
        neg_capped.experience_step(&x, &probs, 0, -2.0, 1.0, 0.5, 0);
        assert_eq!(bits(neg.b_raw()), bits(neg_capped.b_raw()));
    }

    #[test]
    fn test_scale_decay_monotone() {
        let mut l = unit(13);
        l.notch_step(&[1.0; 6], &[0.5; 9], 1.5);
        let mut prev = l.delta_norm();
        for _ in 0..20 {
            l.scale(1.0 - 0.1);
            let n = l.delta_norm();
            assert!(n <= prev);
            prev = n;
        }
    }

    #[test]
    fn test_merge_accumulates() {
        let mut dst = unit(1);
        let src = unit(2);
        let expected: Vec<f32> = dst
            .a_raw()
            .iter()
            .zip(src.a_raw())
            .map(|(d, s)| d + 0.5 * s)
            .collect();
        assert!(dst.merge(&src, 0.5));
        assert_eq!(bits(dst.a_raw()), bits(&expected));
    }

    #[test]
    fn test_merge_shape_guard() {
        let mut dst = NotchLora::new(4, 5, 2, 1.0, 0.1, 0.0, 1).unwrap();
        let mut src = NotchLora::new(4, 5, 3, 1.0, 0.1, 0.0, 2).unwrap();
        src.notch_step(&[1.0; 4], &[1.0; 5], 1.0);

        let dst_before = (bits(dst.a_raw()), bits(dst.b_raw()));
        let src_before = (bits(src.a_raw()), bits(src.b_raw()));
        assert!(!dst.merge(&src, 1.0));
        assert_eq!(dst_before, (bits(dst.a_raw()), bits(dst.b_raw())));
        assert_eq!(src_before, (bits(src.a_raw()), bits(src.b_raw())));

        let other_in = NotchLora::new(3, 5, 2, 1.0, 0.1, 0.0, 2).unwrap();
        assert!(!dst.merge(&other_in, 1.0));

        let other_out = NotchLora::new(4, 6, 2, 1.0, 0.1, 0.0, 2).unwrap();
        assert!(!dst.merge(&other_out, 1.0));
        assert_eq!(dst_before, (bits(dst.a_raw()), bits(dst.b_raw())));
    }

    #[test]
    fn test_reset_keeps_shape_and_seed() {
        let mut l = unit(17);
        l.notch_step(&[1.0; 6], &[1.0; 9], 1.0);
        let seed = l.seed();
        l.reset();
        assert_eq!(l.delta_norm(), 0.0);
        assert_eq!(l.seed(), seed);
        assert_eq!(l.a().dim(), (6, 3));
    }

    #[test]
    fn test_delta_norm() {
        let mut l = NotchLora::new(1, 1, 1, 1.0, 0.1, 0.0, 1).unwrap();
        l.load_factors(&[3.0], &[4.0]).unwrap();
        assert!((l.delta_norm() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_params_order() {
        let l = NotchLora::new(4, 5, 2, 2.0, 0.1, 0.01, 42).unwrap();
        let p = l.params().to_array();
        assert_eq!(&p[..6], &[4.0, 5.0, 2.0, 2.0, 0.1, 0.01]);
        assert!((p[6] - l.delta_norm()).abs() < 1e-12);
    }

    #[test]
    fn test_load_factors_all_or_nothing() {
        let mut l = unit(9);
        let before = bits(l.a_raw());
        let err = l.load_factors(&vec![1.0; 18], &[0.0; 3]).unwrap_err();
        assert!(matches!(err, LoraError::ShapeMismatch { buffer: "B", .. }));
        assert_eq!(before, bits(l.a_raw()));
    }

    #[test]
    fn test_forward_matches_apply() {
        let mut l = unit(31);
        l.notch_step(&[0.5; 6], &[1.0; 9], 1.0);
        let x = Array1::from_vec(vec![1.0, 0.0, -1.0, 2.0, 0.5, 0.0]);
        let out = l.forward(&x);
        let mut y = vec![0.0; 9];
        l.apply_dense(x.as_slice().unwrap(), &mut y);
        assert_eq!(bits(out.as_slice().unwrap()), bits(&y));
    }

    #[test]
    fn test_experience_scenario() {
        let mut l = NotchLora::new(4, 5, 2, 2.0, 0.1, 0.0, 42).unwrap();
        let x = [1.0, 0.5, -0.5, 0.25];
        let probs = [0.1, 0.2, 0.4, 0.2, 0.1];
        assert!(l.experience_step(&x, &probs, 2, 1.0, 1.0, 0.5, 1));
        assert!(l.delta_norm() > 0.0);
        assert!(l.b_raw().iter().any(|&v| v != 0.0));

        let mut y = [0.5, -1.0, 2.0, 0.0, 3.0];
        let before = y;
        l.apply_dense(&[0.0; 4], &mut y);
        assert_eq!(y, before);

        // Index 1 is the first-encountered strongest competitor (tie with 3).
        let mut y = [0.0; 5];
        l.apply_dense(&x, &mut y);
        assert!(y[1] != 0.0 && y[2] != 0.0);
        assert_eq!(y[3], 0.0);
    }

    #[test]
    fn test_experience_step_matches_manual_sequence() {
        let x = [1.0, 0.5, -0.5, 0.25];
        let probs = [0.1, 0.2, 0.4, 0.2, 0.1];
        let mut fused = NotchLora::new(4, 5, 2, 2.0, 0.1, 0.0, 42).unwrap();
        let mut manual = fused.clone();

        fused.experience_step(&x, &probs, 2, 0.7, 1.0, 0.5, 2);
        let dy = build_delta_from_probs(&probs, 2, 1.0, 0.5, 2);
        manual.notch_step(&x, &dy, 0.7);

        assert_eq!(bits(fused.a_raw()), bits(manual.a_raw()));
        assert_eq!(bits(fused.b_raw()), bits(manual.b_raw()));
        assert_eq!(fused.seed(), manual.seed());
    }

    #[test]
    fn test_experience_invalid_target_is_noop() {
        let mut l = NotchLora::new(4, 5, 2, 2.0, 0.1, 0.0, 42).unwrap();
        let seed = l.seed();
        let a = bits(l.a_raw());
        assert!(!l.experience_step(&[1.0; 4], &[0.2; 5], 5, 1.0, 1.0, 0.5, 1));
        assert_eq!(l.seed(), seed);
        assert_eq!(bits(l.a_raw()), a);
    }

    #[test]
    fn test_repeated_steps_move_output_along_dy() {
        let mut l = unit(77);
        let x = [1.0; 6];
        let dy = [1.0, 0.0, -0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0];
        for _ in 0..20 {
            assert!(l.notch_step(&x, &dy, 1.0));
        }
        let mut y = [0.0; 9];
        l.apply_dense(&x, &mut y);
        assert!(y[0] > 0.0);
        assert!(y[2] < 0.0);
        assert!(y[8] > y[0]);
        assert_eq!(y[1], 0.0);
        assert!(((y[8] / y[0]) - 2.0).abs() < 1e-3);
    }
}
