/*
 * This file is part of Acerfan.
 *
 * Copyright (C) 2025 Acerfan contributors
 *
 * Acerfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Acerfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Acerfan. If not, see <https://www.gnu.org/licenses/>.
 */

mod cli;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use acerfan::config::{config_path, load_config, write_default_config, Config};
use acerfan::logger::{init_logging, resolve_log_level};
use acerfan::service::{
    build_regulator, hold_fan_speed, install_signal_handlers, open_controller, read_status, select_profile,
    ServiceHost,
};

use cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = resolve_log_level(cli.log_level.as_deref());
    let backend = init_logging(&level, matches!(cli.command, Commands::Run(_)));
    info!("Logging to {backend}");

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("acerfan: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::WriteConfig(args) => {
            let path = args.path.unwrap_or_else(config_path);
            write_default_config(&path, args.force)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        Commands::Profiles => {
            let config = load(&cli.config)?;
            let default = config.profiles.default_profile();
            for p in config.profiles.iter() {
                let marker = if p.name() == default.name() { "*" } else { " " };
                if p.is_firmware() {
                    println!("{marker} {} (firmware control)", p.name());
                } else {
                    println!(
                        "{marker} {} ({} ms, hysteresis +{}/-{}, {} points)",
                        p.name(),
                        p.poll_interval().as_millis(),
                        p.up_hysteresis(),
                        p.down_hysteresis(),
                        p.points().len()
                    );
                }
            }
            Ok(())
        }
        Commands::Status => {
            let config = load(&cli.config)?;
            check_privileges();
            let mut ec = open_controller(&config);
            let status = read_status(&mut ec, &config.scales).context("reading EC status")?;
            println!("{status}");
            Ok(())
        }
        Commands::Run(args) => {
            let config = load(&cli.config)?;
            let profile = select_profile(&config.profiles, args.profile.as_deref())?;
            check_privileges();
            let signals = install_signal_handlers()?;
            let mut regulator = build_regulator(&config);
            let source = config.source.clone().or(cli.config);
            let mut host = ServiceHost::new(&config, signals, || load_config(source.as_deref()));
            host.run(&mut regulator, profile).context("fan regulation stopped")?;
            info!("Exited cleanly");
            Ok(())
        }
        Commands::SetSpeed(args) => {
            let config = load(&cli.config)?;
            check_privileges();
            let signals = install_signal_handlers()?;
            let mut regulator = build_regulator(&config);
            let hold = args.hold_secs.map(Duration::from_secs);
            hold_fan_speed(&mut regulator, args.percent, hold, signals.stop).context("setting fan speed")?;
            Ok(())
        }
    }
}

fn load(path: &Option<std::path::PathBuf>) -> Result<Config> {
    load_config(path.as_deref()).context("loading configuration")
}

/// EC access needs root; without it everything still runs, degraded.
fn check_privileges() {
    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!("Not running as root (euid={euid}); /dev/port will be unavailable");
    }
}
