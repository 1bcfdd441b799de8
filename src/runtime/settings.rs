//! File-backed settings for the adaptation loop.
//!
//! Every field is optional in the JSON document; missing ones fall back to
//! the defaults of [`LoraConfig`] and [`ExperienceConfig`].

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::learning::engine::ExperienceConfig;
use crate::learning::lora::LoraConfig;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lora: LoraConfig,
    pub experience: ExperienceConfig,
}

impl Settings {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(text).context("malformed settings JSON")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings =
            Self::from_json_str(&text).with_context(|| format!("in {}", path.display()))?;
        tracing::info!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialise settings")
    }

    /// Shape checks that would otherwise only surface at construction.
    pub fn validate(&self) -> Result<()> {
        let l = &self.lora;
        ensure!(
            l.in_dim > 0 && l.out_dim > 0 && l.rank > 0,
            "dimensions must be positive (in {}, out {}, rank {})",
            l.in_dim,
            l.out_dim,
            l.rank
        );
        ensure!(
            self.experience.max_delta_norm >= 0.0,
            "max_delta_norm must be non-negative"
        );
        Ok(())
    }
}
