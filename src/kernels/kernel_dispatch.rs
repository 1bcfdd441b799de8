//! Kernel dispatch: routes dense up-projection to a serial or threaded kernel.
//!
//! Both backends produce bit-identical output, so the choice is purely a
//! throughput decision made from the output width.

use crate::config::PARALLEL_MIN_OUT_DIM;
use crate::kernels::lowrank_cpu;

/// Backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Serial,
    Parallel,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Serial => write!(f, "serial"),
            Backend::Parallel => write!(f, "parallel"),
        }
    }
}

/// Pick the backend for a dense application of width `out_dim`.
pub fn select_backend(out_dim: usize) -> Backend {
    if out_dim >= PARALLEL_MIN_OUT_DIM && rayon::current_num_threads() > 1 {
        Backend::Parallel
    } else {
        Backend::Serial
    }
}

/// Dense up-projection on the given backend.
pub fn dispatch_up_project(
    backend: Backend,
    ax: &[f32],
    b: &[f32],
    out_dim: usize,
    scaling: f32,
    out: &mut [f32],
) {
    match backend {
        Backend::Serial => lowrank_cpu::up_project(ax, b, out_dim, scaling, out),
        Backend::Parallel => lowrank_cpu::up_project_parallel(ax, b, out_dim, scaling, out),
    }
}
