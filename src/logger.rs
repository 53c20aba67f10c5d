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

//! Global tracing subscriber setup.

use std::env;
use std::fmt;
use std::path::Path;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "ACERFAN_LOG";
pub const DEFAULT_LOG_LEVEL: &str = "info";
const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogBackend {
    Journald,
    Stderr,
}

impl fmt::Display for LogBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogBackend::Journald => write!(f, "systemd journal"),
            LogBackend::Stderr => write!(f, "stderr"),
        }
    }
}

/// `--log-level` wins over `ACERFAN_LOG`, which wins over `info`.
pub fn resolve_log_level(flag: Option<&str>) -> String {
    flag.map(str::to_string)
        .or_else(|| env::var(LOG_ENV_VAR).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

/// Install the global subscriber. With `prefer_journald` (the long-running
/// service) logs go to the journal when its socket exists; one-shot commands
/// log to stderr. A second call is a no-op.
pub fn init_logging(level: &str, prefer_journald: bool) -> LogBackend {
    let filter = || EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if prefer_journald && Path::new(JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(layer) => {
                let _ = tracing_subscriber::registry().with(layer).with(filter()).try_init();
                return LogBackend::Journald;
            }
            Err(e) => eprintln!("Failed to create journald layer: {e}, falling back to stderr"),
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter())
        .try_init();
    LogBackend::Stderr
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_resolve_log_level_precedence() {
        env::remove_var(LOG_ENV_VAR);
        assert_eq!(resolve_log_level(None), "info");

        env::set_var(LOG_ENV_VAR, "debug");
        assert_eq!(resolve_log_level(None), "debug");
        assert_eq!(resolve_log_level(Some("trace")), "trace");

        env::set_var(LOG_ENV_VAR, "  ");
        assert_eq!(resolve_log_level(None), "info");
        env::remove_var(LOG_ENV_VAR);
    }

    #[test]
    fn test_init_logging_stderr_twice() {
        assert_eq!(init_logging("acerfan=debug", false), LogBackend::Stderr);
        // Already installed; must not panic
        assert_eq!(init_logging("not a [valid filter", false), LogBackend::Stderr);
    }
}
