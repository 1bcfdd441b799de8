//! A bank of Notch-LoRA units, one per host session.
//!
//! Units are never shared: every session gets its own factors, scratch and
//! generator state, all shaped from one template config. Sessions can be
//! folded together with weighted merges.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::lora::{LoraConfig, NotchLora};
use crate::config::DEFAULT_SEED;
use crate::error::LoraError;

/// Per-session units built from a shared template.
pub struct LoraBank {
    /// Shape and hyperparameters for every unit.
    pub template: LoraConfig,

    units: HashMap<u64, NotchLora>,
}

impl LoraBank {
    pub fn new(template: LoraConfig) -> Self {
        Self {
            template,
            units: HashMap::new(),
        }
    }

    /// Deterministic, never-zero seed for a session.
    pub fn session_seed(&self, session: u64) -> u32 {
        let folded = (session ^ (session >> 32)) as u32;
        let seed = self.template.seed ^ folded.wrapping_add(1).wrapping_mul(0x9E37_79B9);
        if seed == 0 {
            DEFAULT_SEED
        } else {
            seed
        }
    }

    /// Get the session's unit, creating it on first use.
    pub fn open(&mut self, session: u64) -> Result<&mut NotchLora, LoraError> {
        let seed = self.session_seed(session);
        match self.units.entry(session) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let config = LoraConfig {
                    seed,
                    ..self.template.clone()
                };
                let unit = NotchLora::from_config(&config)?;
                tracing::debug!("opened session {} (seed {:#x})", session, seed);
                Ok(e.insert(unit))
            }
        }
    }

    pub fn get(&self, session: u64) -> Option<&NotchLora> {
        self.units.get(&session)
    }

    pub fn get_mut(&mut self, session: u64) -> Option<&mut NotchLora> {
        self.units.get_mut(&session)
    }

    /// Remove a session and hand its unit back. Closing an unknown or
    /// already-closed session is a no-op.
    pub fn close(&mut self, session: u64) -> Option<NotchLora> {
        self.units.remove(&session)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Open session ids, ascending.
    pub fn sessions(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.units.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// `dst += weight · src` between two open sessions.
    pub fn merge_sessions(&mut self, dst: u64, src: u64, weight: f32) -> Result<bool, LoraError> {
        if dst == src {
            let unit = self.units.get_mut(&dst).ok_or(LoraError::UnknownSession(dst))?;
            unit.scale(1.0 + weight);
            return Ok(true);
        }
        let source = self.units.remove(&src).ok_or(LoraError::UnknownSession(src))?;
        let merged = match self.units.get_mut(&dst) {
            Some(unit) => Ok(unit.merge(&source, weight)),
            None => Err(LoraError::UnknownSession(dst)),
        };
        self.units.insert(src, source);
        merged
    }

    /// A fresh zero-delta unit with every session merged in at `weight`,
    /// in ascending session order.
    pub fn consolidate(&self, weight: f32) -> Result<NotchLora, LoraError> {
        let mut out = NotchLora::from_config(&self.template)?;
        out.reset();
        for id in self.sessions() {
            if let Some(unit) = self.units.get(&id) {
                out.merge(unit, weight);
            }
        }
        Ok(out)
    }

    /// Total adaptable parameters across all sessions.
    pub fn total_params(&self) -> usize {
        self.units.values().map(|u| u.param_count()).sum()
    }

    /// Total memory in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.units.values().map(|u| u.memory_bytes()).sum()
    }

    /// Sum of per-session delta norms.
    pub fn total_delta_norm(&self) -> f32 {
        self.units.values().map(|u| u.delta_norm()).sum()
    }
}
