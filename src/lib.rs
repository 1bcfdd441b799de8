//! # NOTORCH-LORA
//!
//! **Experience becomes geometry**: a gradient-free low-rank adaptation
//! engine for a fixed linear transform.
//!
//! A small additive correction ΔW = (α/r) · A · B is maintained next to a
//! host model's output projection. Instead of backpropagation, the factors
//! are updated by a local plasticity rule gated by an external scalar
//! signal (surprise, reward, error magnitude, ...).
//!
//! ## Components
//!
//! 1. **Noise**: deterministic xorshift32 uniform/Gaussian source
//! 2. **NotchLora**: the factor pair A ∈ R^{in×r}, B ∈ R^{r×out} with scratch
//! 3. **Forward**: dense and sparse additive application into host output
//! 4. **Notch step**: Hebbian-style outer-product update with optional decay
//! 5. **Delta builder**: target push / top-K competitor pull from a distribution
//! 6. **Composition**: scale, merge, delta norm
//!
//! ## Host loop
//!
//! ```text
//! y = base(x)                      // host forward
//! lora.apply_dense(x, y)           // add correction
//! lora.experience_step(x, probs, target, signal, push, pull, topk)
//! ```

pub mod error;
pub mod kernels;
pub mod learning;
pub mod runtime;

pub use error::LoraError;
pub use learning::delta::{build_delta_from_probs, build_delta_into};
pub use learning::lora::{LoraConfig, LoraParams, NotchLora};

/// Engine-wide constants.
pub mod config {
    /// Learning rate used when a non-positive one is requested.
    pub const DEFAULT_LR: f32 = 0.01;

    /// Alpha used when a non-positive one is requested.
    pub const DEFAULT_ALPHA: f32 = 1.0;

    /// Seed used when a zero seed is requested ("ARIANNA" in hex-ish).
    pub const DEFAULT_SEED: u32 = 0xA17A11;

    /// Standard deviation of the initial Gaussian fill of A.
    pub const INIT_SCALE: f32 = 0.02;

    /// Signal is clamped into [-SIGNAL_LIMIT, SIGNAL_LIMIT] before use as gain.
    pub const SIGNAL_LIMIT: f32 = 2.0;

    /// Hidden-code sharpness: k = SHARPNESS_BASE + SHARPNESS_SPAN · (1 - |g|).
    pub const SHARPNESS_BASE: f32 = 0.35;
    pub const SHARPNESS_SPAN: f32 = 0.65;

    /// Upper bound on suppressed competitors per delta build.
    /// Bounds the O(K·n) selection cost.
    pub const MAX_TOPK: usize = 32;

    /// Floor for the first Box–Muller uniform draw (avoids ln(0)).
    pub const GAUSSIAN_EPS: f32 = 1e-6;

    /// Output width from which dense application is split across threads.
    pub const PARALLEL_MIN_OUT_DIM: usize = 16384;

    /// Size of the fixed-order parameter snapshot.
    pub const PARAMS_LEN: usize = 7;
}
