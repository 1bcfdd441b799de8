//! Numeric kernels for the low-rank correction.
//!
//! - **lowrank_cpu**: flat row-major down/up projections and factor updates
//! - **kernel_dispatch**: serial vs rayon-threaded dense up-projection

pub mod kernel_dispatch;
pub mod lowrank_cpu;
