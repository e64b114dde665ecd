//! # Subsystem Registry
//!
//! Lifecycle records for every registered subsystem.
//!
//! ## Status Transitions
//!
//! ```text
//!  register()        begin()              complete()
//! ───────────▶ Registered ───▶ Initializing ───▶ Initialized
//!                                    │
//!                                    └────────▶ Error(reason)
//! ```
//!
//! `Initialized` and `Error` are terminal for a registration. Registering the
//! same name again replaces the record with a fresh generation in
//! `Registered`; completions carrying an older generation are discarded.
//!
//! The registry itself is plain data. The orchestrator owns it behind a
//! single lock, which is what makes `begin` and `complete` atomic
//! check-and-set steps relative to concurrent passes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use shared_bus::InitializationError;
use tracing::info;

use crate::error::SubsystemError;

/// Subsystem status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SubsystemStatus {
    /// Registered, waiting for its dependencies or for a pass to pick it up.
    Registered,
    /// Initializer running.
    Initializing,
    /// Initialized and safe to use.
    Initialized,
    /// Initializer failed; carries the reason.
    Error(InitializationError),
}

impl SubsystemStatus {
    /// `Initialized` or `Error`: no further automatic transition.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Initialized | Self::Error(_) => true,
            Self::Registered | Self::Initializing => false,
        }
    }

    /// Reason for the failure, present only in the `Error` state.
    #[must_use]
    pub fn last_error(&self) -> Option<&InitializationError> {
        match self {
            Self::Error(err) => Some(err),
            Self::Registered | Self::Initializing | Self::Initialized => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for SubsystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => write!(f, "error ({err})"),
            other => f.write_str(other.label()),
        }
    }
}

/// A unit of application functionality with an asynchronous setup step.
///
/// The orchestrator never looks inside a subsystem; it only awaits
/// `initialize` once its dependencies are initialized.
#[async_trait::async_trait]
pub trait Subsystem: Send + Sync {
    /// Perform setup. The default is a no-op that succeeds immediately.
    async fn initialize(&self) -> Result<(), SubsystemError> {
        Ok(())
    }
}

/// One registered subsystem.
pub struct SubsystemRecord {
    pub name: String,
    /// Caller-owned instance; the registry only holds a reference.
    pub instance: Arc<dyn Subsystem>,
    /// Copied from the dependency graph at registration time.
    pub dependencies: Vec<String>,
    pub status: SubsystemStatus,
    /// Bumped on every registration of this name.
    pub generation: u64,
}

impl fmt::Debug for SubsystemRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemRecord")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("status", &self.status)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of a record, safe to hand out of the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubsystemSnapshot {
    pub name: String,
    pub dependencies: Vec<String>,
    pub status: SubsystemStatus,
}

/// Name → record mapping plus registration order.
#[derive(Default)]
pub struct Registry {
    records: HashMap<String, SubsystemRecord>,
    registration_order: Vec<String>,
    next_generation: u64,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `name` in `Registered`.
    ///
    /// A replaced name keeps its original position in registration order.
    /// Returns the new generation.
    pub fn insert(
        &mut self,
        name: &str,
        instance: Arc<dyn Subsystem>,
        dependencies: Vec<String>,
    ) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;

        let record = SubsystemRecord {
            name: name.to_string(),
            instance,
            dependencies,
            status: SubsystemStatus::Registered,
            generation,
        };

        if self.records.insert(name.to_string(), record).is_none() {
            self.registration_order.push(name.to_string());
        }
        generation
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SubsystemRecord> {
        self.records.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    #[must_use]
    pub fn status(&self, name: &str) -> Option<&SubsystemStatus> {
        self.records.get(name).map(|r| &r.status)
    }

    #[must_use]
    pub fn is_initialized(&self, name: &str) -> bool {
        matches!(self.status(name), Some(SubsystemStatus::Initialized))
    }

    /// `Registered`, and every dependency exists and is `Initialized`.
    #[must_use]
    pub fn is_ready(&self, name: &str) -> bool {
        let Some(record) = self.records.get(name) else {
            return false;
        };
        record.status == SubsystemStatus::Registered
            && record.dependencies.iter().all(|dep| self.is_initialized(dep))
    }

    /// Single-attempt gate: `Registered → Initializing`.
    ///
    /// Returns the instance and generation to attempt, or `None` if the name
    /// is unknown or not in `Registered`.
    pub fn begin(&mut self, name: &str) -> Option<(Arc<dyn Subsystem>, u64)> {
        let record = self.records.get_mut(name)?;
        if record.status != SubsystemStatus::Registered {
            return None;
        }
        record.status = SubsystemStatus::Initializing;
        Some((Arc::clone(&record.instance), record.generation))
    }

    /// `Initializing → Initialized | Error` for the given generation.
    ///
    /// Returns the new status, or `None` when the record was replaced or is
    /// no longer initializing (the outcome is stale).
    pub fn complete(
        &mut self,
        name: &str,
        generation: u64,
        outcome: Result<(), InitializationError>,
    ) -> Option<SubsystemStatus> {
        let record = self.records.get_mut(name)?;
        if record.generation != generation || record.status != SubsystemStatus::Initializing {
            return None;
        }
        record.status = match outcome {
            Ok(()) => SubsystemStatus::Initialized,
            Err(err) => SubsystemStatus::Error(err),
        };
        Some(record.status.clone())
    }

    /// True when at least one record exists and all of them are terminal.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        !self.records.is_empty() && self.records.values().all(|r| r.status.is_terminal())
    }

    pub fn registration_order(&self) -> impl Iterator<Item = &str> {
        self.registration_order.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshots in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubsystemSnapshot> {
        self.registration_order
            .iter()
            .filter_map(|name| self.records.get(name))
            .map(|r| SubsystemSnapshot {
                name: r.name.clone(),
                dependencies: r.dependencies.clone(),
                status: r.status.clone(),
            })
            .collect()
    }

    /// Print registry status.
    pub fn print_status(&self) {
        info!("===========================================");
        info!("  SUBSYSTEM BOOTSTRAP STATUS");
        info!("===========================================");

        for snapshot in self.snapshot() {
            let icon = match &snapshot.status {
                SubsystemStatus::Initialized => "✅",
                SubsystemStatus::Error(_) => "❌",
                SubsystemStatus::Initializing => "🔄",
                SubsystemStatus::Registered => "⏳",
            };

            let waiting: Vec<&str> = snapshot
                .dependencies
                .iter()
                .filter(|dep| !self.is_initialized(dep))
                .map(String::as_str)
                .collect();
            let waiting_marker = if waiting.is_empty() || snapshot.status.is_terminal() {
                String::new()
            } else {
                format!(" [waiting on {}]", waiting.join(", "))
            };

            info!(
                "  {} {:20} {}{}",
                icon, snapshot.name, snapshot.status, waiting_marker
            );
        }

        info!("===========================================");
    }
}
