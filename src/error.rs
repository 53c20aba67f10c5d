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

//! Unified error handling for Acerfan
//!
//! A single error type is shared by the EC register interface, the regulator and
//! the configuration loader.

use std::io;
use std::path::PathBuf;

/// Result type alias using AcerfanError
pub type Result<T> = std::result::Result<T, AcerfanError>;

#[derive(thiserror::Error, Debug)]
pub enum AcerfanError {
    // ============================================================================
    // EC Access Errors
    // ============================================================================
    #[error("EC timed out after {waited_ms} ms waiting for {stage}")]
    Timeout {
        stage: &'static str,
        waited_ms: u64,
    },

    #[error("Port I/O failed at {addr:#06x}: {source}")]
    Port {
        addr: u16,
        source: io::Error,
    },

    #[error("Failed to open port device {path}: {source}")]
    TransportOpen {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Host Errors
    // ============================================================================
    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl AcerfanError {
    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from talking to the EC (as opposed to configuration)
    pub fn is_ec_fault(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Port { .. })
    }
}

impl From<String> for AcerfanError {
    fn from(s: String) -> Self {
        Self::Config(s)
    }
}
