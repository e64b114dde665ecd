//! # Shared Bus - Lifecycle Event Bus
//!
//! Publishes subsystem lifecycle transitions from the bootstrap orchestrator
//! to any number of interested listeners.
//!
//! ## Delivery Rules
//!
//! - **Fire-and-forget:** `publish()` never blocks and never fails
//! - **No replay:** a subscription only sees events published after it was created
//! - **Isolation:** a slow or dropped subscriber never affects the others
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Orchestrator │                    │  UI / Glue   │
//! │              │    publish()       │              │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │          │
//!                  │              │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{EventFilter, EventTopic, InitializationError, LifecycleEvent};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, EventSubscriber, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before the slowest one lags.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
