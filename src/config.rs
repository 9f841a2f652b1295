// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Engine configuration.
//!
//! Process-level settings only. Schemas and defined metrics are configured
//! through [`Properties`](crate::properties::Properties).

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Master configuration of a [`MetricsEngine`](crate::engine::MetricsEngine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Exception rate limiting.
    pub exceptions: ExceptionsConfig,

    /// Defined metric state.
    pub state: StateConfig,
}

/// Exception rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionsConfig {
    /// An (owner, cause) pair is surfaced at most once per window (ms).
    pub window_ms: u64,
}

impl Default for ExceptionsConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000, // 1 minute
        }
    }
}

/// Defined metric state configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Keys without a metric for this long (ms) are dropped.
    pub timeout_ms: u64,

    /// Default bound on series of an aggregating variable.
    pub max_series: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3_600_000, // 1 hour
            max_series: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn exceptions_window(&self) -> Duration {
        millis(self.exceptions.window_ms)
    }

    pub fn state_timeout(&self) -> Duration {
        millis(self.state.timeout_ms)
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}
