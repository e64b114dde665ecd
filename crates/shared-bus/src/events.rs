//! # Lifecycle Events
//!
//! Defines all event types that flow through the shared bus.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a subsystem's initialization attempt ended in the error state.
///
/// Recorded on the subsystem's record and carried by
/// [`LifecycleEvent::SystemInitializationError`].
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitializationError {
    /// The subsystem's own initializer returned an error.
    #[error("initializer rejected: {0}")]
    Rejected(String),

    /// The initializer did not resolve within the configured limit.
    #[error("initializer timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The initializer panicked.
    #[error("initializer panicked: {0}")]
    Panicked(String),

    /// The orchestrator shut down while the attempt was in flight.
    #[error("initialization cancelled by shutdown")]
    Cancelled,
}

/// All events that can be published to the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// A subsystem finished initializing and is safe to use.
    SystemInitialized {
        /// Subsystem name.
        name: String,
    },

    /// A subsystem's initialization attempt failed. Its dependents will not
    /// be attempted until it is registered again.
    SystemInitializationError {
        /// Subsystem name.
        name: String,
        /// What went wrong.
        error: InitializationError,
    },

    /// Every registered subsystem reached a terminal status.
    /// Published at most once per orchestrator.
    AllInitialized,
}

impl LifecycleEvent {
    /// Get the topic for this event (for filtering).
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::SystemInitialized { .. } => EventTopic::Initialized,
            Self::SystemInitializationError { .. } => EventTopic::InitializationError,
            Self::AllInitialized => EventTopic::AllInitialized,
        }
    }

    /// Name of the subsystem the event is about, if any.
    #[must_use]
    pub fn subsystem(&self) -> Option<&str> {
        match self {
            Self::SystemInitialized { name } | Self::SystemInitializationError { name, .. } => {
                Some(name)
            }
            Self::AllInitialized => None,
        }
    }

    /// Stable event label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SystemInitialized { .. } => "system-initialized",
            Self::SystemInitializationError { .. } => "system-initialization-error",
            Self::AllInitialized => "all-initialized",
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// `system-initialized` events.
    Initialized,
    /// `system-initialization-error` events.
    InitializationError,
    /// The single `all-initialized` event.
    AllInitialized,
    /// All events (no filtering).
    All,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
    /// Subsystem names to include. Empty means all subsystems.
    ///
    /// Events without a subsystem (`AllInitialized`) always pass this check.
    pub subsystems: Vec<String>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            subsystems: Vec::new(),
        }
    }

    /// Create a filter for events about specific subsystems.
    #[must_use]
    pub fn for_subsystems<I, S>(subsystems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: Vec::new(),
            subsystems: subsystems.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &LifecycleEvent) -> bool {
        let topic_match = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic());

        let subsystem_match = match event.subsystem() {
            Some(name) => self.subsystems.is_empty() || self.subsystems.iter().any(|s| s == name),
            None => true,
        };

        topic_match && subsystem_match
    }
}
