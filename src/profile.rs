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

//! Fan profiles: a curve with hysteresis and poll interval, or the firmware
//! sentinel that hands the fan back to the EC.

use std::sync::Arc;
use std::time::Duration;

use crate::curves::{interp_fan_percent, CurvePoint, MAX_FAN_PCT};
use crate::error::{AcerfanError, Result};

/// Name of the built-in profile that defers to the EC's own fan logic.
pub const FIRMWARE_PROFILE_NAME: &str = "BIOS";

pub const MAX_CURVE_POINTS: usize = 32;

/// Immutable profile description. Presentation state (menu items, selection
/// highlight) lives with the UI, keyed by [`FanProfile::name`].
#[derive(Clone, Debug, PartialEq)]
pub struct FanProfile {
    name: String,
    poll_interval: Duration,
    up_hysteresis: u8,
    down_hysteresis: u8,
    is_default: bool,
    firmware: bool,
    points: Vec<CurvePoint>,
}

impl FanProfile {
    /// A curve profile. Fails when the curve is empty or has out-of-range speeds.
    pub fn curve(name: impl Into<String>, poll_interval: Duration, points: Vec<CurvePoint>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AcerfanError::invalid_config("profile.name", "must not be empty"));
        }
        if poll_interval.is_zero() {
            return Err(AcerfanError::invalid_config(format!("profile '{name}'.interval_ms"), "must be > 0"));
        }
        validate_points(&points)
            .map_err(|reason| AcerfanError::invalid_config(format!("profile '{name}'.points"), reason))?;
        Ok(Self {
            name,
            poll_interval,
            up_hysteresis: 0,
            down_hysteresis: 0,
            is_default: false,
            firmware: false,
            points,
        })
    }

    /// The sentinel profile: observe only, EC drives the fan.
    pub fn firmware(poll_interval: Duration) -> Self {
        Self {
            name: FIRMWARE_PROFILE_NAME.to_string(),
            poll_interval,
            up_hysteresis: 0,
            down_hysteresis: 0,
            is_default: false,
            firmware: true,
            points: Vec::new(),
        }
    }

    pub fn with_hysteresis(mut self, up: u8, down: u8) -> Self {
        self.up_hysteresis = up;
        self.down_hysteresis = down;
        self
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn up_hysteresis(&self) -> u8 {
        self.up_hysteresis
    }

    pub fn down_hysteresis(&self) -> u8 {
        self.down_hysteresis
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn is_firmware(&self) -> bool {
        self.firmware
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Curve output for `temp_c`; `None` for the firmware sentinel.
    pub fn target_percent(&self, temp_c: u8) -> Option<u8> {
        (!self.firmware).then(|| interp_fan_percent(&self.points, temp_c))
    }
}

pub fn validate_points(points: &[CurvePoint]) -> std::result::Result<(), String> {
    if points.is_empty() {
        return Err("curve must have at least one point".into());
    }
    if points.len() > MAX_CURVE_POINTS {
        return Err(format!("too many curve points (max {MAX_CURVE_POINTS})"));
    }
    for p in points {
        if p.fan_pct > MAX_FAN_PCT {
            return Err(format!("fan speed {}% at {}°C out of range (0..100)", p.fan_pct, p.temp_c));
        }
    }
    Ok(())
}

/// Configured profiles plus the firmware sentinel.
#[derive(Clone, Debug)]
pub struct ProfileSet {
    profiles: Vec<Arc<FanProfile>>,
    firmware: Arc<FanProfile>,
}

impl ProfileSet {
    pub fn new(profiles: Vec<FanProfile>, firmware_interval: Duration) -> Self {
        Self {
            profiles: profiles.into_iter().map(Arc::new).collect(),
            firmware: Arc::new(FanProfile::firmware(firmware_interval)),
        }
    }

    /// First profile marked default, otherwise the firmware sentinel.
    pub fn default_profile(&self) -> Arc<FanProfile> {
        self.profiles
            .iter()
            .find(|p| p.is_default())
            .cloned()
            .unwrap_or_else(|| self.firmware.clone())
    }

    pub fn firmware(&self) -> Arc<FanProfile> {
        self.firmware.clone()
    }

    /// Case-insensitive lookup, including the sentinel's name.
    pub fn find(&self, name: &str) -> Option<Arc<FanProfile>> {
        if name.eq_ignore_ascii_case(FIRMWARE_PROFILE_NAME) {
            return Some(self.firmware.clone());
        }
        self.profiles
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Configured profiles in file order, without the sentinel.
    pub fn configured(&self) -> &[Arc<FanProfile>] {
        &self.profiles
    }

    /// Sentinel first, then configured profiles (menu order).
    pub fn iter(&self) -> impl Iterator<Item = &Arc<FanProfile>> {
        std::iter::once(&self.firmware).chain(self.profiles.iter())
    }
}
