//! # Quantum-Chain Bootstrap Demo
//!
//! Boots a simulated application graph through the orchestrator and logs
//! every lifecycle event.
//!
//! ## Demo Graph
//!
//! ```text
//! mining ───▶ wallet ───▶ blockchain
//!   │           ▲             ▲ ▲
//!   └───────────┼─────────────┘ │
//! staking ──────┘               │
//! explorer ─────────────────────┘
//! ```
//!
//! Subsystems register in reverse dependency order to show that registration
//! order does not matter.
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `QC_BOOTSTRAP_CONFIG` | JSON config; replaces the demo graph when it declares dependencies |
//! | `QC_INIT_TIMEOUT_MS` | Per-subsystem initializer timeout |
//! | `QC_DEMO_FAIL` | Name of a subsystem whose initializer should fail |
//! | `QC_LOG_LEVEL` | Log level filter |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use quantum_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};
use tracing::{debug, error, info, warn};

use qc_bootstrap::{
    BootstrapConfig, EventFilter, LifecycleEvent, Orchestrator, Subsystem, SubsystemError,
};

/// Upper bound on the whole demo boot.
const BOOT_DEADLINE: Duration = Duration::from_secs(30);

/// Stand-in for a real subsystem: sleeps, then succeeds or fails.
struct SimulatedSubsystem {
    name: &'static str,
    startup: Duration,
    fail: bool,
}

#[async_trait]
impl Subsystem for SimulatedSubsystem {
    async fn initialize(&self) -> Result<(), SubsystemError> {
        info!("[{}] Starting up...", self.name);
        tokio::time::sleep(self.startup).await;

        if self.fail {
            return Err(SubsystemError::new(format!(
                "{} failed to start (QC_DEMO_FAIL)",
                self.name
            )));
        }
        Ok(())
    }
}

fn demo_config() -> BootstrapConfig {
    BootstrapConfig::default()
        .with_dependency("wallet", ["blockchain"])
        .with_dependency("mining", ["wallet", "blockchain"])
        .with_dependency("staking", ["wallet"])
        .with_dependency("explorer", ["blockchain"])
}

/// Environment config, falling back to the demo graph.
fn load_config() -> Result<BootstrapConfig> {
    let mut config = BootstrapConfig::from_env().context("Failed to load bootstrap config")?;
    if config.dependencies.is_empty() {
        config.dependencies = demo_config().dependencies;
    }
    Ok(config)
}

/// Registration order: dependents first.
fn demo_subsystems(fail: Option<&str>) -> Vec<SimulatedSubsystem> {
    [
        ("mining", 150),
        ("staking", 120),
        ("explorer", 80),
        ("wallet", 100),
        ("blockchain", 200),
    ]
    .into_iter()
    .map(|(name, millis)| SimulatedSubsystem {
        name,
        startup: Duration::from_millis(millis),
        fail: fail == Some(name),
    })
    .collect()
}

fn log_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::SystemInitialized { name } => {
            info!(subsystem = %name, "[Events] {}", event.kind());
        }
        LifecycleEvent::SystemInitializationError { name, error } => {
            warn!(subsystem = %name, error = %error, "[Events] {}", event.kind());
        }
        LifecycleEvent::AllInitialized => info!("[Events] {}", event.kind()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = init_telemetry(TelemetryConfig::from_env())
        .context("Failed to initialize telemetry")?;

    info!("===========================================");
    info!("  Quantum-Chain Bootstrap v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    let config = load_config()?;
    let orchestrator = Orchestrator::new(config).context("Invalid bootstrap configuration")?;

    // Subscribe before registering so no event is missed
    let mut events = orchestrator.event_stream(EventFilter::all());
    let listener = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            log_event(&event);
            if matches!(event, LifecycleEvent::AllInitialized) {
                break;
            }
        }
    });

    let fail = std::env::var("QC_DEMO_FAIL").ok();
    for subsystem in demo_subsystems(fail.as_deref()) {
        let name = subsystem.name;
        orchestrator.register(name, Arc::new(subsystem));
    }

    // Settled, or stuck: nothing in flight but some subsystems still blocked
    let settled = async {
        tokio::select! {
            () = orchestrator.wait_until_fully_initialized() => true,
            () = orchestrator.wait_idle() => orchestrator.is_fully_initialized(),
        }
    };

    match tokio::time::timeout(BOOT_DEADLINE, settled).await {
        Ok(true) => info!("All subsystems settled"),
        Ok(false) => warn!("Boot stalled; some subsystems are waiting on failed dependencies"),
        Err(_) => error!("Boot did not settle within {:?}", BOOT_DEADLINE),
    }

    orchestrator.print_status();
    orchestrator.shutdown();

    // Last handle: dropping it closes the bus and ends the listener
    drop(orchestrator);
    if let Err(e) = listener.await {
        warn!("Event listener ended abnormally: {}", e);
    }

    match encode_metrics() {
        Ok(metrics) => debug!("Metrics:\n{}", metrics),
        Err(e) => warn!("Failed to encode metrics: {}", e),
    }

    Ok(())
}
