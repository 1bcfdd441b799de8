//! Deterministic noise source.
//!
//! xorshift32 over a caller-owned `u32` state. Identical starting state and
//! identical call sequence give bit-identical output, which is what makes
//! a unit's whole trajectory reproducible from its seed.

use std::f32::consts::TAU;

use crate::config::GAUSSIAN_EPS;

/// Advance the state by one xorshift32 step and return it.
#[inline]
pub fn next_u32(state: &mut u32) -> u32 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    *state = x;
    x
}

/// Uniform in [0, 1) from the low 24 bits (one f32 mantissa).
#[inline]
pub fn uniform01(state: &mut u32) -> f32 {
    (next_u32(state) & 0x00FF_FFFF) as f32 / 16_777_216.0
}

/// Standard normal via Box–Muller. Consumes two uniform draws.
#[inline]
pub fn gaussian(state: &mut u32) -> f32 {
    let u1 = uniform01(state).clamp(GAUSSIAN_EPS, 1.0);
    let u2 = uniform01(state);
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}
