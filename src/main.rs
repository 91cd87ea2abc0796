//! Headless flocking runner.
//!
//! Usage: `gridflock [agents] [steps] [variant] [sorter|gpu]`
//!
//! Run with: `cargo run --release -- 50000 500 grid_coherent radix`

use std::process::ExitCode;

use gridflock::prelude::*;
use gridflock::sort;
use tracing::{error, info};

const DT: f32 = 0.2;

fn main() -> ExitCode {
    gridflock::init_logging(None);

    let mut args = std::env::args().skip(1);
    let agents: u32 = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5_000);
    let steps: u32 = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1_000);
    let variant = match args.next().map(|s| s.parse::<SearchVariant>()) {
        Some(Ok(variant)) => variant,
        Some(Err(e)) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
        None => SearchVariant::GridCoherent,
    };
    let backend = args.next().unwrap_or_else(|| "radix".to_string());

    let config = FlockConfig::default()
        .with_agent_count(agents)
        .with_initial_speed(0.5)
        .with_seed(0x5eed);

    let result = if backend == "gpu" {
        run_gpu(config, steps, variant)
    } else {
        run_cpu(config, steps, variant, &backend)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cpu(
    config: FlockConfig,
    steps: u32,
    variant: SearchVariant,
    sorter: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut sorter: Box<dyn KeySort> = match sorter {
        "parallel" => Box::new(ParallelSort::default()),
        "radix" => Box::new(RadixSort::default()),
        other => return Err(format!("unknown sorter `{}` (expected radix, parallel or gpu)", other).into()),
    };
    sort::self_test(sorter.as_mut())?;

    let mut sim = FlockSimulation::with_sorter(config, sorter)?;
    info!(agents = config.agent_count, steps, %variant, "running");

    for _ in 0..steps {
        sim.step(DT, variant);
    }

    log_timings(&sim.teardown());
    Ok(())
}

fn log_timings(stats: &StepClock) {
    info!(
        steps = stats.steps(),
        steps_per_sec = stats.steps_per_sec(),
        elapsed_ms = stats.elapsed().as_millis() as u64,
        "done"
    );
    for pass in Pass::ALL {
        info!(
            pass = pass.name(),
            total_ms = stats.total(pass).as_secs_f64() * 1e3,
            mean_us = stats.mean(pass).as_secs_f64() * 1e6,
            "pass timing"
        );
    }
}

#[cfg(feature = "gpu")]
fn run_gpu(
    config: FlockConfig,
    steps: u32,
    variant: SearchVariant,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut flock = gridflock::gpu::GpuFlock::new(config)?;
    info!(agents = config.agent_count, steps, %variant, "running on GPU");

    for _ in 0..steps {
        flock.step(DT, variant)?;
    }

    log_timings(flock.stats());
    Ok(())
}

#[cfg(not(feature = "gpu"))]
fn run_gpu(
    _config: FlockConfig,
    _steps: u32,
    _variant: SearchVariant,
) -> Result<(), Box<dyn std::error::Error>> {
    Err("built without the `gpu` feature; rebuild with `--features gpu`".into())
}
