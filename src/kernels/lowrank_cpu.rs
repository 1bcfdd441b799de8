//! CPU kernels for the rank-bottlenecked correction and factor updates.
//!
//! All matrices are flat row-major buffers:
//!   A[i, r] at `i * rank + r`, B[r, j] at `r * out_dim + j`.
//!
//! Every output index j is reduced over r in ascending order starting from
//! 0.0 and scaled once at the end, in all three up-projection variants. That
//! shared order is what makes dense, sparse and parallel results bit-equal.
//!
//! 1. `up_project`: streams B row by row into the output buffer
//! 2. `up_project_at`: one output column (sparse application)
//! 3. `up_project_parallel`: rayon over output indices

use rayon::prelude::*;

// ──────────────────────────────────────────────────────────────
// Down-projection: Ax = xᵀ A
// ──────────────────────────────────────────────────────────────

/// `ax[r] = Σ_i x[i] · A[i, r]`.
pub fn down_project(x: &[f32], a: &[f32], in_dim: usize, rank: usize, ax: &mut [f32]) {
    debug_assert_eq!(a.len(), in_dim * rank);
    debug_assert_eq!(ax.len(), rank);

    for (r, slot) in ax.iter_mut().enumerate() {
        let mut s = 0.0f32;
        for (i, &xi) in x.iter().enumerate().take(in_dim) {
            s += xi * a[i * rank + r];
        }
        *slot = s;
    }
}

// ──────────────────────────────────────────────────────────────
// Up-projection: out = (Ax · B) · scaling
// ──────────────────────────────────────────────────────────────

/// Dense up-projection, overwriting `out`.
pub fn up_project(ax: &[f32], b: &[f32], out_dim: usize, scaling: f32, out: &mut [f32]) {
    debug_assert_eq!(b.len(), ax.len() * out_dim);
    debug_assert_eq!(out.len(), out_dim);

    out.fill(0.0);
    for (r, &axr) in ax.iter().enumerate() {
        let row = &b[r * out_dim..(r + 1) * out_dim];
        for (o, &brj) in out.iter_mut().zip(row) {
            *o += axr * brj;
        }
    }
    for o in out.iter_mut() {
        *o *= scaling;
    }
}

/// Unscaled reduction for a single output index.
#[inline]
pub fn up_project_at(ax: &[f32], b: &[f32], out_dim: usize, j: usize) -> f32 {
    let mut s = 0.0f32;
    for (r, &axr) in ax.iter().enumerate() {
        s += axr * b[r * out_dim + j];
    }
    s
}

/// Dense up-projection with output indices split across threads.
pub fn up_project_parallel(ax: &[f32], b: &[f32], out_dim: usize, scaling: f32, out: &mut [f32]) {
    debug_assert_eq!(b.len(), ax.len() * out_dim);
    debug_assert_eq!(out.len(), out_dim);

    out.par_iter_mut()
        .enumerate()
        .for_each(|(j, o)| *o = up_project_at(ax, b, out_dim, j) * scaling);
}

// ──────────────────────────────────────────────────────────────
// Factor updates and reductions
// ──────────────────────────────────────────────────────────────

/// Outer-product accumulate: `m[p, q] += (left[p] · lr) · right[q]`.
pub fn outer_accumulate(m: &mut [f32], left: &[f32], right: &[f32], lr: f32) {
    let cols = right.len();
    debug_assert_eq!(m.len(), left.len() * cols);

    for (row, &lp) in m.chunks_exact_mut(cols).zip(left) {
        let lp = lp * lr;
        for (v, &rq) in row.iter_mut().zip(right) {
            *v += lp * rq;
        }
    }
}

/// `buf *= s`.
pub fn scale_in_place(buf: &mut [f32], s: f32) {
    for v in buf.iter_mut() {
        *v *= s;
    }
}

/// `dst += w · src`.
pub fn axpy(dst: &mut [f32], src: &[f32], w: f32) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, &s) in dst.iter_mut().zip(src) {
        *d += w * s;
    }
}

/// Running sum of squares, continuing from `acc`.
pub fn sum_squares(acc: f32, buf: &[f32]) -> f32 {
    buf.iter().fold(acc, |s, &v| s + v * v)
}

#[cfg(test)]
mod tests {
    use super::*;

    // A: 3×2, B: 2×4
    fn fixture() -> (Vec<f32>, Vec<f32>) {
        let a = vec![1.0, 0.5, -1.0, 2.0, 0.25, 0.0];
        let b = vec![1.0, 2.0, 3.0, 4.0, -1.0, 0.5, 0.0, 2.0];
        (a, b)
    }

    #[test]
    fn test_down_project() {
        let (a, _) = fixture();
        let x = [1.0, 2.0, 4.0];
        let mut ax = [0.0; 2];
        down_project(&x, &a, 3, 2, &mut ax);
        // r0: 1 - 2 + 1 = 0; r1: 0.5 + 4 + 0 = 4.5
        assert!((ax[0] - 0.0).abs() < 1e-6);
        assert!((ax[1] - 4.5).abs() < 1e-6);
    }

    #[test]
    fn test_up_project_values() {
        let (_, b) = fixture();
        let ax = [1.0, 2.0];
        let mut out = [0.0; 4];
        up_project(&ax, &b, 4, 0.5, &mut out);
        // (1·row0 + 2·row1) · 0.5 = [-0.5, 1.5, 1.5, 4.0]
        let expected = [-0.5, 1.5, 1.5, 4.0];
        for j in 0..4 {
            assert!((out[j] - expected[j]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_up_project_variants_bit_equal() {
        let rank = 5;
        let out_dim = 37;
        let ax: Vec<f32> = (0..rank).map(|r| (r as f32 * 0.37).sin()).collect();
        let b: Vec<f32> = (0..rank * out_dim).map(|k| (k as f32 * 0.11).cos() * 0.3).collect();

        let mut serial = vec![0.0; out_dim];
        let mut parallel = vec![0.0; out_dim];
        up_project(&ax, &b, out_dim, 0.7, &mut serial);
        up_project_parallel(&ax, &b, out_dim, 0.7, &mut parallel);

        for j in 0..out_dim {
            let single = up_project_at(&ax, &b, out_dim, j) * 0.7;
            assert_eq!(serial[j].to_bits(), parallel[j].to_bits());
            assert_eq!(serial[j].to_bits(), single.to_bits());
        }
    }

    #[test]
    fn test_outer_accumulate() {
        let mut m = vec![1.0; 6];
        outer_accumulate(&mut m, &[1.0, 2.0], &[1.0, 0.0, -1.0], 0.5);
        assert_eq!(m, vec![1.5, 1.0, 0.5, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_axpy_and_scale() {
        let mut d = vec![1.0, 2.0];
        axpy(&mut d, &[2.0, -2.0], 0.5);
        assert_eq!(d, vec![2.0, 1.0]);
        scale_in_place(&mut d, 3.0);
        assert_eq!(d, vec![6.0, 3.0]);
    }

    #[test]
    fn test_sum_squares_continues() {
        let s = sum_squares(0.0, &[3.0]);
        let s = sum_squares(s, &[4.0]);
        assert!((s.sqrt() - 5.0).abs() < 1e-6);
    }
}
