//! Main entry point for the fan controller

use anyhow::Context;
use clap::Parser;
use log::error;
use pwm_fan_control::{
    args::{Args, Commands},
    daemon::{listen_for_interrupt, FanDaemon, RunSignal},
    fan, logging, ConfigResolver, SysfsPwm, ThermalZone, Thermometer,
};
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Print version and build metadata for binary identity verification
    let pkg_version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let git_desc = option_env!("GIT_DESC").unwrap_or("unknown");
    let build_time = option_env!("BUILD_TIME").unwrap_or("unknown");
    eprintln!(
        "pwm-fan-control v{} (git {} / {}) built {}",
        pkg_version, git_hash, git_desc, build_time
    );
    let args = Args::parse();

    if let Err(e) = logging::setup(args.verbose) {
        eprintln!("Failed to set up logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let resolver = args
        .config
        .clone()
        .map(ConfigResolver::new)
        .unwrap_or_default();

    match args.command() {
        Commands::Run => run_controller(&resolver).await,
        Commands::ShowConfig => {
            let config = resolver.resolve();
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Probe => {
            let config = resolver.resolve();
            let mut zone = ThermalZone::new(&config.thermal_source_path);
            let temp_c = zone.sample_celsius()?;
            println!(
                "Temperature: {}°C | Band: {:.1}% | Duty: {}/{}",
                temp_c,
                fan::band_coverage_pct(temp_c, &config).max(0.0),
                fan::decide(temp_c, &config),
                config.rpm_max
            );
            Ok(())
        }
    }
}

async fn run_controller(resolver: &ConfigResolver) -> anyhow::Result<()> {
    // Interrupt handling goes first so a Ctrl+C during startup still stops cleanly
    let run_signal = RunSignal::new();
    let _listener = listen_for_interrupt(run_signal.clone())?;

    let config = resolver.resolve();
    let thermometer = ThermalZone::new(&config.thermal_source_path);
    let mut daemon = FanDaemon::new(config, SysfsPwm::default(), thermometer);

    daemon
        .run_until_stopped(&run_signal)
        .await
        .context("fan controller could not start")?;
    Ok(())
}
