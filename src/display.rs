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

//! Status reporting after every regulator tick.
//!
//! Sinks must return promptly; they run on the tick thread.

use tracing::{debug, info};

use crate::profile::FanProfile;

pub trait DisplaySink {
    fn on_status(&mut self, profile: &FanProfile, temperature_c: u8, fan_speed_pct: u8);
}

impl<F> DisplaySink for F
where
    F: FnMut(&FanProfile, u8, u8),
{
    fn on_status(&mut self, profile: &FanProfile, temperature_c: u8, fan_speed_pct: u8) {
        self(profile, temperature_c, fan_speed_pct)
    }
}

/// Format the one-line status shown to the user
pub fn format_status(profile: &FanProfile, temperature_c: u8, fan_speed_pct: u8) -> String {
    format!("{}: {}°C, fan {}%", profile.name(), temperature_c, fan_speed_pct)
}

/// Logs status lines, at info level only when something changed.
#[derive(Debug, Default)]
pub struct LogSink {
    last: Option<(String, u8, u8)>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the given status differs from the last one reported
    fn changed(&self, profile: &FanProfile, temperature_c: u8, fan_speed_pct: u8) -> bool {
        match &self.last {
            Some((name, t, s)) => name != profile.name() || *t != temperature_c || *s != fan_speed_pct,
            None => true,
        }
    }
}

impl DisplaySink for LogSink {
    fn on_status(&mut self, profile: &FanProfile, temperature_c: u8, fan_speed_pct: u8) {
        let line = format_status(profile, temperature_c, fan_speed_pct);
        if self.changed(profile, temperature_c, fan_speed_pct) {
            info!("{line}");
            self.last = Some((profile.name().to_string(), temperature_c, fan_speed_pct));
        } else {
            debug!("{line}");
        }
    }
}
