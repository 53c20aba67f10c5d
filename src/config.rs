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

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

use crate::curves::{CurvePoint, Scale, Scales};
use crate::ec::{ByteCondition, CompareOp, EcPorts, EcTiming};
use crate::error::{AcerfanError, Result};
use crate::profile::{FanProfile, ProfileSet, FIRMWARE_PROFILE_NAME};

pub const CONFIG_DIR_NAME: &str = "acerfan";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/acerfan/config.json";

/// Parse an unsigned number written in decimal, `0x` hex or `0b` binary.
pub fn parse_number(text: &str) -> std::result::Result<u64, String> {
    let t = text.trim();
    let (digits, radix) = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(bin) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        (bin, 2)
    } else {
        (t, 10)
    };
    u64::from_str_radix(digits, radix).map_err(|e| format!("invalid number '{text}': {e}"))
}

/// Integer field that accepts a JSON number or a decimal/hex/binary string and
/// is written back as hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HexNum<T>(pub T);

#[derive(Deserialize)]
#[serde(untagged)]
enum NumRepr {
    Int(u64),
    Text(String),
}

impl<'de, T: TryFrom<u64>> Deserialize<'de> for HexNum<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let n = match NumRepr::deserialize(deserializer)? {
            NumRepr::Int(n) => n,
            NumRepr::Text(s) => parse_number(&s).map_err(de::Error::custom)?,
        };
        T::try_from(n)
            .map(HexNum)
            .map_err(|_| de::Error::custom(format!("{n:#x} is out of range")))
    }
}

impl<T: fmt::LowerHex> Serialize for HexNum<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#04x}", self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HysteresisSection {
    pub up: u8,
    pub down: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralSection {
    /// Poll interval for profiles that don't set their own
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Bound on a whole EC register operation
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_spin_cycles")]
    pub spin_cycles: u32,
    #[serde(default = "default_hysteresis")]
    pub hysteresis: HysteresisSection,
    #[serde(default = "default_fan_speed_scale")]
    pub fan_speed_scale: f32,
    #[serde(default = "default_cpu_temp_scale")]
    pub cpu_temp_scale: f32,
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    100
}

fn default_spin_cycles() -> u32 {
    50
}

fn default_hysteresis() -> HysteresisSection {
    HysteresisSection { up: 2, down: 4 }
}

fn default_fan_speed_scale() -> f32 {
    2.55
}

fn default_cpu_temp_scale() -> f32 {
    1.0
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            spin_cycles: default_spin_cycles(),
            hysteresis: default_hysteresis(),
            fan_speed_scale: default_fan_speed_scale(),
            cpu_temp_scale: default_cpu_temp_scale(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionSection {
    pub mask: HexNum<u8>,
    /// One of `==`, `!=`, `<`, `<=`, `>`, `>=`
    pub op: String,
    pub value: HexNum<u8>,
}

impl ConditionSection {
    fn to_condition(&self, field: &str) -> Result<ByteCondition> {
        let op: CompareOp = self
            .op
            .parse()
            .map_err(|reason: String| AcerfanError::invalid_config(field, reason))?;
        Ok(ByteCondition::new(self.mask.0, op, self.value.0))
    }
}

impl From<ByteCondition> for ConditionSection {
    fn from(c: ByteCondition) -> Self {
        Self {
            mask: HexNum(c.mask),
            op: c.op.as_str().to_string(),
            value: HexNum(c.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusSection {
    pub address: HexNum<u16>,
    pub can_read: ConditionSection,
    pub can_write: ConditionSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstructionSection {
    pub address: HexNum<u16>,
    pub read: HexNum<u8>,
    pub write: HexNum<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlSection {
    pub address: HexNum<u8>,
    pub manual: HexNum<u8>,
    pub bios: HexNum<u8>,
}

/// EC port and register map. Laptop specific.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortsSection {
    pub location: HexNum<u16>,
    pub data: HexNum<u16>,
    pub status: StatusSection,
    pub instruction: InstructionSection,
    pub control: ControlSection,
    pub cpu_temp: HexNum<u8>,
    pub fan_speed: HexNum<u8>,
}

impl Default for PortsSection {
    fn default() -> Self {
        Self::from(&EcPorts::default())
    }
}

impl From<&EcPorts> for PortsSection {
    fn from(p: &EcPorts) -> Self {
        Self {
            location: HexNum(p.location_address),
            data: HexNum(p.data_address),
            status: StatusSection {
                address: HexNum(p.status_address),
                can_read: p.can_read.into(),
                can_write: p.can_write.into(),
            },
            instruction: InstructionSection {
                address: HexNum(p.instruction_address),
                read: HexNum(p.instruct_read),
                write: HexNum(p.instruct_write),
            },
            control: ControlSection {
                address: HexNum(p.control_register),
                manual: HexNum(p.control_manual),
                bios: HexNum(p.control_bios),
            },
            cpu_temp: HexNum(p.cpu_temp_register),
            fan_speed: HexNum(p.fan_speed_register),
        }
    }
}

impl PortsSection {
    pub fn to_ports(&self) -> Result<EcPorts> {
        Ok(EcPorts {
            status_address: self.status.address.0,
            can_read: self.status.can_read.to_condition("ports.status.can_read.op")?,
            can_write: self.status.can_write.to_condition("ports.status.can_write.op")?,
            instruction_address: self.instruction.address.0,
            instruct_read: self.instruction.read.0,
            instruct_write: self.instruction.write.0,
            location_address: self.location.0,
            data_address: self.data.0,
            control_register: self.control.address.0,
            control_manual: self.control.manual.0,
            control_bios: self.control.bios.0,
            cpu_temp_register: self.cpu_temp.0,
            fan_speed_register: self.fan_speed.0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileSection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hysteresis: Option<HysteresisSection>,
    #[serde(default)]
    pub default: bool,
    pub points: Vec<CurvePoint>,
}

/// On-disk configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub general: GeneralSection,
    #[serde(default)]
    pub ports: PortsSection,
    #[serde(default)]
    pub profiles: Vec<ProfileSection>,
}

/// Immutable, validated configuration snapshot.
#[derive(Debug, Clone)]
pub struct Config {
    pub ports: EcPorts,
    pub timing: EcTiming,
    pub scales: Scales,
    pub profiles: ProfileSet,
    /// File the snapshot was loaded from; `None` for the built-in default
    pub source: Option<PathBuf>,
}

impl ConfigFile {
    pub fn validate(&self) -> Result<()> {
        let g = &self.general;
        if g.interval_ms == 0 {
            return Err(AcerfanError::invalid_config("general.interval_ms", "must be > 0"));
        }
        if g.timeout_ms == 0 {
            return Err(AcerfanError::invalid_config("general.timeout_ms", "must be > 0"));
        }
        for (field, scale) in [
            ("general.fan_speed_scale", g.fan_speed_scale),
            ("general.cpu_temp_scale", g.cpu_temp_scale),
        ] {
            if !scale.is_finite() || scale == 0.0 {
                return Err(AcerfanError::invalid_config(field, "must be a non-zero number"));
            }
        }
        self.ports.to_ports()?;

        let mut seen = HashSet::new();
        for (i, p) in self.profiles.iter().enumerate() {
            let name = p.name.trim();
            if name.is_empty() {
                return Err(AcerfanError::invalid_config(format!("profiles[{i}].name"), "must not be empty"));
            }
            if name.eq_ignore_ascii_case(FIRMWARE_PROFILE_NAME) {
                return Err(AcerfanError::invalid_config(
                    format!("profiles[{i}].name"),
                    format!("'{FIRMWARE_PROFILE_NAME}' is reserved for firmware control"),
                ));
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(AcerfanError::invalid_config(
                    format!("profiles[{i}].name"),
                    format!("duplicate profile '{name}'"),
                ));
            }
            if p.interval_ms == Some(0) {
                return Err(AcerfanError::invalid_config(format!("profiles[{i}].interval_ms"), "must be > 0"));
            }
            crate::profile::validate_points(&p.points)
                .map_err(|reason| AcerfanError::invalid_config(format!("profiles[{i}].points"), reason))?;
        }
        Ok(())
    }

    /// Validate and build the runtime snapshot. Profiles without their own
    /// interval or hysteresis inherit `general`.
    pub fn into_config(self, source: Option<PathBuf>) -> Result<Config> {
        self.validate()?;
        let g = &self.general;
        let default_interval = Duration::from_millis(g.interval_ms);

        let profiles = self
            .profiles
            .iter()
            .map(|p| {
                let interval = p.interval_ms.map(Duration::from_millis).unwrap_or(default_interval);
                let hysteresis = p.hysteresis.unwrap_or(g.hysteresis);
                Ok(FanProfile::curve(p.name.trim(), interval, p.points.clone())?
                    .with_hysteresis(hysteresis.up, hysteresis.down)
                    .with_default(p.default))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Config {
            ports: self.ports.to_ports()?,
            timing: EcTiming {
                timeout: Duration::from_millis(g.timeout_ms),
                spin_cycles: g.spin_cycles,
            },
            scales: Scales {
                temperature: Scale(g.cpu_temp_scale),
                fan_speed: Scale(g.fan_speed_scale),
            },
            profiles: ProfileSet::new(profiles, default_interval),
            source,
        })
    }
}

/// Built-in configuration used when no file exists.
pub fn default_config_file() -> ConfigFile {
    let profile = |name: &str, default: bool, points: &[(u8, u8)]| ProfileSection {
        name: name.to_string(),
        interval_ms: None,
        hysteresis: None,
        default,
        points: points.iter().map(|&(t, f)| CurvePoint::new(t, f)).collect(),
    };
    ConfigFile {
        general: GeneralSection::default(),
        ports: PortsSection::default(),
        profiles: vec![
            profile("Quiet", false, &[(0, 0), (50, 0), (65, 30), (80, 70), (90, 100)]),
            profile("Balanced", true, &[(0, 0), (40, 0), (60, 50), (80, 100)]),
            ProfileSection {
                interval_ms: Some(500),
                hysteresis: Some(HysteresisSection { up: 1, down: 3 }),
                ..profile("Performance", false, &[(0, 20), (45, 40), (65, 80), (75, 100)])
            },
        ],
    }
}

/// Per-user path written by `write-config` when no path is given.
pub fn config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
    }
    if let Ok(home) = env::var("HOME") {
        return Path::new(&home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME);
    }
    PathBuf::from(SYSTEM_CONFIG_PATH)
}

/// Search order when no explicit path is given.
pub fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        candidates.push(Path::new(&xdg).join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    if let Ok(home) = env::var("HOME") {
        candidates.push(Path::new(&home).join(".config").join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    candidates.push(PathBuf::from(SYSTEM_CONFIG_PATH));
    candidates
}

pub fn parse_config(json: &str) -> Result<ConfigFile> {
    let file: ConfigFile = serde_json::from_str(json)?;
    file.validate()?;
    Ok(file)
}

/// Load from `explicit` (which must exist) or the first existing candidate,
/// falling back to the built-in default.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => config_candidates().into_iter().find(|p| p.is_file()),
    };
    let Some(path) = path else {
        info!("No configuration file found, using built-in defaults");
        return default_config_file().into_config(None);
    };

    debug!("Loading configuration from {}", path.display());
    let data = fs::read_to_string(&path)
        .map_err(|e| AcerfanError::Config(format!("cannot read {}: {e}", path.display())))?;
    let file = parse_config(&data)?;
    let config = file.into_config(Some(path.clone()))?;
    info!(
        "Loaded {} profile(s) from {}",
        config.profiles.configured().len(),
        path.display()
    );
    Ok(config)
}

/// Write the built-in configuration to `path`. An existing file is only
/// replaced when `overwrite` is set.
pub fn write_default_config(path: &Path, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        return Err(AcerfanError::Config(format!("{} already exists", path.display())));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&default_config_file())?;
    fs::write(path, json + "\n")?;
    // Best-effort 0644 so the service user can read it
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o644));
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}
