//! CLI entry point (spec.md §6 "External interfaces"). Everything that must
//! run before a `tokio` runtime exists — PID-file takeover, `-k`, daemon
//! fork — happens here synchronously; [`run::worker_main`] only starts once
//! [`station_supervisor::startup`] has confirmed this process is the one
//! that should actually serve.

mod context;
mod cups_task;
mod logging;
mod run;
mod tc_task;
mod web_task;

use std::path::PathBuf;

use clap::Parser;
use station_config::{Cli, Config};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version_info {
        println!("station {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let home_hint = cli
        .home
        .clone()
        .or_else(|| std::env::var("STATION_HOME").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let conf_path = home_hint.join("station.conf");

    let config = Config::load(&cli, Some(&conf_path))?;

    let temp_hint = config.temp_dir.value.clone();

    if cli.kill {
        anyhow::ensure!(!cli.daemon && !cli.force, "-k is incompatible with -d/-f");
        station_supervisor::kill_and_exit(&temp_hint);
        return Ok(());
    }

    if cli.params {
        print_params(&config);
        return Ok(());
    }

    logging::init(config.log_level);

    match station_supervisor::startup(&temp_hint, cli.force, cli.daemon)? {
        station_supervisor::Startup::AlreadyRunning => {
            tracing::warn!("another station instance is already running");
            std::process::exit(station_supervisor::EXIT_NOP);
        }
        station_supervisor::Startup::ParentExited => return Ok(()),
        station_supervisor::Startup::RunWorker => {}
    }

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let code = runtime.block_on(run::worker_main(config));
    std::process::exit(code);
}

fn print_params(config: &Config) {
    println!("home_dir    = {} ({})", config.home_dir.value.display(), config.home_dir.source);
    println!("temp_dir    = {} ({})", config.temp_dir.value.display(), config.temp_dir.source);
    println!("web_dir     = {} ({})", config.web_dir.value.display(), config.web_dir.source);
    println!(
        "router_eui  = {}",
        config.router_eui.value.map(|e| e.to_string()).unwrap_or_else(|| "<unset>".to_string())
    );
    println!("log_level   = {}", config.log_level);
    println!("web_port    = {}", config.web_port.map(|p| p.to_string()).unwrap_or_else(|| "<unset>".to_string()));
    println!("no_tc       = {}", config.no_tc);
    println!("no_cups     = {}", config.no_cups);
}
