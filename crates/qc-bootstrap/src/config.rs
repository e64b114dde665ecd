//! # Bootstrap Configuration
//!
//! The dependency graph and runtime limits for one orchestrator.
//!
//! ## File Format
//!
//! ```json
//! {
//!   "dependencies": {
//!     "wallet": ["blockchain"],
//!     "mining": ["wallet", "blockchain"]
//!   },
//!   "init_timeout_ms": 30000,
//!   "event_capacity": 1000
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `QC_BOOTSTRAP_CONFIG` | Path to a JSON file in the format above |
//! | `QC_INIT_TIMEOUT_MS` | Per-subsystem initializer timeout; `0` disables it (also in the file) |
//! | `QC_EVENT_CAPACITY` | Event bus buffer per subscriber |

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared_bus::DEFAULT_CHANNEL_CAPACITY;

use crate::error::ConfigurationError;
use crate::graph::DependencyGraph;

/// Complete bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Subsystem name → names it depends on, in attempt order.
    pub dependencies: BTreeMap<String, Vec<String>>,
    /// Upper bound on a single initializer. `None` or `0` waits forever.
    pub init_timeout_ms: Option<u64>,
    /// Event bus buffer per subscriber.
    pub event_capacity: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            dependencies: BTreeMap::new(),
            init_timeout_ms: None,
            event_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl BootstrapConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    /// Read and parse a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&contents)
    }

    /// Load from environment variables.
    ///
    /// `QC_BOOTSTRAP_CONFIG` selects the base file (defaults otherwise);
    /// `QC_INIT_TIMEOUT_MS` and `QC_EVENT_CAPACITY` override it.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars<F>(var: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match var("QC_BOOTSTRAP_CONFIG") {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(val) = var("QC_INIT_TIMEOUT_MS") {
            let ms: u64 = val.parse().map_err(|_| {
                ConfigurationError::Parse(format!("QC_INIT_TIMEOUT_MS is not a number: {val}"))
            })?;
            config.init_timeout_ms = (ms > 0).then_some(ms);
        }

        if let Some(val) = var("QC_EVENT_CAPACITY") {
            config.event_capacity = val.parse().map_err(|_| {
                ConfigurationError::Parse(format!("QC_EVENT_CAPACITY is not a number: {val}"))
            })?;
        }

        Ok(config)
    }

    /// Declare the dependencies of `name`, replacing any previous entry.
    #[must_use]
    pub fn with_dependency<I, S>(mut self, name: impl Into<String>, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .insert(name.into(), deps.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Effective initializer timeout. `0` disables it, wherever it came from.
    #[must_use]
    pub fn init_timeout(&self) -> Option<Duration> {
        self.init_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Validate the dependency graph.
    pub fn dependency_graph(&self) -> Result<DependencyGraph, ConfigurationError> {
        DependencyGraph::new(
            self.dependencies
                .iter()
                .map(|(name, deps)| (name.as_str(), deps.iter().map(String::as_str))),
        )
    }
}
