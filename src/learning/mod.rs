//! Gradient-free adaptation.
//!
//! - **noise**: deterministic xorshift32 uniform / Gaussian draws
//! - **lora**: the `NotchLora` factor pair, forward application, notch step
//! - **delta**: target push / competitor pull construction from a distribution
//! - **bank**: one unit per host session
//! - **engine**: host-facing experience loop with norm control and stats

pub mod bank;
pub mod delta;
pub mod engine;
pub mod lora;
pub mod noise;
