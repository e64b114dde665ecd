//! # Quantum-Chain Bootstrap Orchestrator
//!
//! Brings named subsystems up in dependency order. The `main.rs` binary is a
//! demo that wires a small application graph through it.
//!
//! ## Model
//!
//! - **Dependency graph:** static `name → [dependencies]` map, validated once
//! - **Registration:** subsystems register whenever their own bootstrap code
//!   runs, in any order
//! - **Driver:** each registration or completion triggers a pass that starts
//!   every subsystem whose dependencies are all `Initialized`
//! - **Events:** progress is published on the shared lifecycle bus
//!
//! ```text
//!   register(mining)   register(wallet)   register(blockchain)
//!         │                   │                    │
//!         ▼                   ▼                    ▼
//!   ┌─────────────────────────────────────────────────────┐
//!   │                    Orchestrator                     │
//!   │  order: blockchain → wallet → mining                │
//!   └─────────────────────────────────────────────────────┘
//!         │ system-initialized(blockchain)
//!         │ system-initialized(wallet)
//!         │ system-initialized(mining)
//!         ▼ all-initialized
//!   ┌──────────────┐
//!   │  Event Bus   │ ──▶ subscribers
//!   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qc_bootstrap::{BootstrapConfig, Orchestrator};
//!
//! let config = BootstrapConfig::default()
//!     .with_dependency("wallet", ["blockchain"])
//!     .with_dependency("mining", ["wallet", "blockchain"]);
//! let orchestrator = Orchestrator::new(config)?;
//!
//! orchestrator.register("mining", mining);
//! orchestrator.register("wallet", wallet);
//! orchestrator.register("blockchain", blockchain);
//!
//! orchestrator.wait_until_fully_initialized().await;
//! ```

#![warn(missing_docs)]
#![allow(missing_docs)] // TODO: Document the registry and graph accessors
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod driver;
pub mod error;
pub mod graph;
pub mod order;
pub mod registry;

pub use config::BootstrapConfig;
pub use driver::Orchestrator;
pub use error::{ConfigurationError, SubsystemError};
pub use graph::DependencyGraph;
pub use order::initialization_order;
pub use registry::{Subsystem, SubsystemSnapshot, SubsystemStatus};

// Re-export the bus types callers need to consume events
pub use shared_bus::{
    EventFilter, EventStream, EventTopic, InMemoryEventBus, InitializationError, LifecycleEvent,
    Subscription,
};
