//! Runtime module: everything around a unit that is not the update rule.
//!
//! - Binary persistence of trained deltas
//! - JSON settings
//! - Health monitoring for the adaptation loop
//! - A synthetic host for driving the loop from the CLI

pub mod health;
pub mod settings;
pub mod simulate;
pub mod store;
