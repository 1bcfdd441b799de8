//! notorch: drive a Notch-LoRA unit against a synthetic host.
//!
//! This is the CLI binary entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use notorch_lora::learning::engine::ExperienceEngine;
use notorch_lora::runtime::health::AdaptationMonitor;
use notorch_lora::runtime::settings::Settings;
use notorch_lora::runtime::simulate::{run_episode, SyntheticHost};
use notorch_lora::runtime::store;
use notorch_lora::NotchLora;

/// Notch-LoRA experience CLI.
#[derive(Parser, Debug)]
#[command(
    name = "notorch",
    about = "Gradient-free low-rank adaptation driven by a plasticity signal",
    version
)]
struct Cli {
    /// JSON settings file; flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Resume from a saved delta instead of a fresh unit.
    #[arg(long)]
    load: Option<PathBuf>,

    /// Write the trained delta here when the episode ends.
    #[arg(long)]
    save: Option<PathBuf>,

    #[arg(long)]
    in_dim: Option<usize>,

    #[arg(long)]
    out_dim: Option<usize>,

    #[arg(short, long)]
    rank: Option<usize>,

    #[arg(long)]
    alpha: Option<f32>,

    #[arg(long)]
    lr: Option<f32>,

    #[arg(long)]
    decay: Option<f32>,

    /// Noise seed for the unit.
    #[arg(long)]
    seed: Option<u32>,

    /// Seed for the synthetic host.
    #[arg(long, default_value_t = 1)]
    host_seed: u64,

    /// Number of host steps to run.
    #[arg(short = 'n', long, default_value_t = 1000)]
    steps: usize,

    #[arg(long)]
    push: Option<f32>,

    #[arg(long)]
    pull: Option<f32>,

    /// Competitors to suppress (0 = single strongest).
    #[arg(long)]
    topk: Option<usize>,

    /// Delta norm ceiling (0 disables).
    #[arg(long)]
    max_delta_norm: Option<f32>,

    /// Print health diagnostics after the episode.
    #[arg(long, default_value_t = false)]
    health: bool,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut s = match &self.config {
            Some(path) => Settings::from_json_file(path)?,
            None => Settings::default(),
        };

        let l = &mut s.lora;
        if let Some(v) = self.in_dim {
            l.in_dim = v;
        }
        if let Some(v) = self.out_dim {
            l.out_dim = v;
        }
        if let Some(v) = self.rank {
            l.rank = v;
        }
        if let Some(v) = self.alpha {
            l.alpha = v;
        }
        if let Some(v) = self.lr {
            l.lr = v;
        }
        if let Some(v) = self.decay {
            l.decay = v;
        }
        if let Some(v) = self.seed {
            l.seed = v;
        }

        let e = &mut s.experience;
        if let Some(v) = self.push {
            e.push = v;
        }
        if let Some(v) = self.pull {
            e.pull = v;
        }
        if let Some(v) = self.topk {
            e.topk = v;
        }
        if let Some(v) = self.max_delta_norm {
            e.max_delta_norm = v;
        }

        s.validate()?;
        Ok(s)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let settings = cli.settings()?;

    tracing::info!("notorch v{}", env!("CARGO_PKG_VERSION"));

    let lora = match &cli.load {
        Some(path) => store::load(path)?,
        None => NotchLora::from_config(&settings.lora)?,
    };

    tracing::info!(
        "Unit: {}x{} rank {}, alpha={}, lr={}, decay={} ({} params)",
        lora.in_dim(),
        lora.out_dim(),
        lora.rank(),
        lora.alpha(),
        lora.lr(),
        lora.decay(),
        lora.param_count(),
    );

    let mut host = SyntheticHost::new(lora.in_dim(), lora.out_dim(), cli.host_seed)?;
    let mut engine = ExperienceEngine::new(lora, settings.experience.clone());
    let max = settings.experience.max_delta_norm;
    let (warn, critical) = if max > 0.0 {
        (0.9 * max, 1.5 * max)
    } else {
        (f32::INFINITY, f32::INFINITY)
    };
    let mut monitor = AdaptationMonitor::new(warn, critical);

    tracing::info!("Running {} steps toward target {}...", cli.steps, host.target());
    let summary = run_episode(&mut host, &mut engine, &mut monitor, cli.steps);

    tracing::info!(
        "p(target) {:.4} -> {:.4}, delta norm {:.4}",
        summary.early_target_prob,
        summary.late_target_prob,
        summary.final_delta_norm,
    );

    if cli.health {
        let report = monitor.report();
        tracing::info!("Health: {:?}", report.status);
        tracing::info!("  Steps: {} applied, {} skipped", report.total_steps, report.skipped_steps);
        tracing::info!("  Rescales: {}", report.rescales);
        tracing::info!(
            "  Signal: mean {:.4}, range [{:.4}, {:.4}]",
            report.mean_signal,
            report.min_signal,
            report.max_signal
        );
        tracing::info!("  Peak delta norm: {:.4}", report.peak_delta_norm);
        tracing::info!("  Avg latency: {:.1} us", report.avg_latency_us);
        tracing::info!("  P99 latency: {:.1} us", report.p99_latency_us);
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if let Some(path) = &cli.save {
        store::save(path, engine.lora())?;
    }

    tracing::info!("Done.");
    Ok(())
}
