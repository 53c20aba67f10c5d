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

//! Command Line Interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "acerfan")]
#[command(version)]
#[command(about = "Acerfan - laptop fan control through the embedded controller")]
#[command(long_about = "Acerfan - laptop fan control through the embedded controller

Drives the CPU fan from a temperature curve by talking to the EC over
/dev/port. Whenever acerfan exits, fan control is handed back to the firmware.

EXAMPLES:
    acerfan run                        Run the default profile until Ctrl-C
    acerfan run --profile Quiet        Run a named profile
    acerfan status                     Show temperature, fan speed and control mode
    acerfan set-speed 60 --hold-secs 30
    acerfan profiles                   List configured profiles
    acerfan write-config               Write the built-in configuration

SIGNALS (acerfan run):
    SIGINT, SIGTERM        Return the fan to the firmware and exit
    SIGHUP                 Reload the configuration file
    SIGUSR1                Switch to the next profile (BIOS first)

ENVIRONMENT VARIABLES:
    ACERFAN_LOG=debug      Log filter (overridden by --log-level)

FILES:
    ~/.config/acerfan/config.json      Per-user configuration
    /etc/acerfan/config.json           System configuration")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (default: search XDG, ~/.config, /etc)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `acerfan=debug`
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Regulate the fan with a profile until interrupted (SIGHUP reloads)
    Run(RunArgs),

    /// Read temperature, fan speed and control mode once
    Status,

    /// Hold a fixed fan speed, then return control to the firmware
    SetSpeed(SetSpeedArgs),

    /// List configured profiles
    Profiles,

    /// Write the built-in configuration file
    WriteConfig(WriteConfigArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Profile name (case-insensitive); `BIOS` leaves the fan to the firmware
    #[arg(short, long)]
    pub profile: Option<String>,
}

#[derive(Args)]
pub struct SetSpeedArgs {
    /// Fan speed in percent
    #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
    pub percent: u8,

    /// Return to firmware control after this many seconds (default: until Ctrl-C)
    #[arg(long, value_name = "SECS")]
    pub hold_secs: Option<u64>,
}

#[derive(Args)]
pub struct WriteConfigArgs {
    /// Destination (default: per-user config path)
    pub path: Option<PathBuf>,

    /// Replace an existing file
    #[arg(short, long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_globals() {
        let cli = Cli::try_parse_from(["acerfan", "run", "-p", "Quiet", "--config", "/tmp/c.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        match cli.command {
            Commands::Run(args) => assert_eq!(args.profile.as_deref(), Some("Quiet")),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_set_speed_range_checked() {
        assert!(Cli::try_parse_from(["acerfan", "set-speed", "101"]).is_err());
        let cli = Cli::try_parse_from(["acerfan", "set-speed", "100", "--hold-secs", "5"]).unwrap();
        match cli.command {
            Commands::SetSpeed(args) => {
                assert_eq!(args.percent, 100);
                assert_eq!(args.hold_secs, Some(5));
            }
            _ => panic!("expected set-speed"),
        }
    }
}
