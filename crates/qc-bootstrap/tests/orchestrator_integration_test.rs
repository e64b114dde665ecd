//! # Orchestrator Integration Tests
//!
//! Drives the public orchestrator API with scripted subsystems.
//!
//! ## Test Categories
//!
//! 1. **Ordering**: dependencies initialize before their dependents
//! 2. **Failure Handling**: errors, timeouts and panics only block dependents
//! 3. **Re-registration**: a failed name can be registered again
//! 4. **Events**: exactly one event per transition, `all-initialized` once
//! 5. **Shutdown**: in-flight attempts are cancelled

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Barrier, Notify};
use tokio::time::timeout;

use qc_bootstrap::{
    BootstrapConfig, ConfigurationError, EventFilter, EventTopic, InitializationError,
    LifecycleEvent, Orchestrator, Subsystem, SubsystemError, SubsystemStatus,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// SCRIPTED SUBSYSTEMS
// =============================================================================

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail(&'static str),
    Panic(&'static str),
    Hang,
}

/// Subsystem that follows a script and reports what it saw.
struct Probe {
    behavior: Behavior,
    delay: Duration,
    attempts: AtomicUsize,
}

impl Probe {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            delay: Duration::from_millis(5),
            attempts: AtomicUsize::new(0),
        })
    }

    fn ok() -> Arc<Self> {
        Self::new(Behavior::Succeed)
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Subsystem for Probe {
    async fn initialize(&self) -> Result<(), SubsystemError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(reason) => Err(SubsystemError::new(reason)),
            Behavior::Panic(message) => panic!("{}", message),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

/// Records, at start time, whether all of its dependencies were initialized.
struct DependencyChecker {
    name: &'static str,
    orchestrator: Orchestrator,
    started: Arc<Mutex<Vec<(&'static str, bool)>>>,
}

#[async_trait::async_trait]
impl Subsystem for DependencyChecker {
    async fn initialize(&self) -> Result<(), SubsystemError> {
        let ready = self
            .orchestrator
            .dependency_graph()
            .dependencies_of(self.name)
            .iter()
            .all(|dep| self.orchestrator.is_initialized(dep));
        self.started.lock().push((self.name, ready));

        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(())
    }
}

/// Tracks how many of its instances run at the same time.
struct Overlap {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    gate: Option<Arc<Notify>>,
    outcome: Result<(), &'static str>,
}

#[async_trait::async_trait]
impl Subsystem for Overlap {
    async fn initialize(&self) -> Result<(), SubsystemError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.outcome.map_err(SubsystemError::new)
    }
}

/// Subsystem with no initializer of its own.
struct Plain;

#[async_trait::async_trait]
impl Subsystem for Plain {}

// =============================================================================
// HELPERS
// =============================================================================

fn app_config() -> BootstrapConfig {
    BootstrapConfig::default()
        .with_dependency("wallet", ["blockchain"])
        .with_dependency("mining", ["wallet", "blockchain"])
        .with_dependency("staking", ["wallet"])
        .with_dependency("explorer", ["blockchain"])
}

fn initialized(name: &str) -> LifecycleEvent {
    LifecycleEvent::SystemInitialized {
        name: name.to_string(),
    }
}

fn failed(name: &str, error: InitializationError) -> LifecycleEvent {
    LifecycleEvent::SystemInitializationError {
        name: name.to_string(),
        error,
    }
}

async fn settle(orchestrator: &Orchestrator) {
    timeout(TEST_TIMEOUT, orchestrator.wait_until_fully_initialized())
        .await
        .expect("orchestrator did not reach fully-initialized");
}

async fn idle(orchestrator: &Orchestrator) {
    timeout(TEST_TIMEOUT, orchestrator.wait_idle())
        .await
        .expect("initialization attempts did not finish");
}

// =============================================================================
// ORDERING
// =============================================================================

#[tokio::test]
async fn test_reverse_registration_initializes_in_dependency_order() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();
    let mut events = orchestrator.subscribe(EventFilter::all());

    orchestrator.register("mining", Probe::ok());
    orchestrator.register("wallet", Probe::ok());
    orchestrator.register("blockchain", Probe::ok());
    settle(&orchestrator).await;

    assert_eq!(
        events.drain(),
        vec![
            initialized("blockchain"),
            initialized("wallet"),
            initialized("mining"),
            LifecycleEvent::AllInitialized,
        ]
    );
}

#[tokio::test]
async fn test_dependencies_initialized_before_dependent_starts() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();
    let started = Arc::new(Mutex::new(Vec::new()));

    for name in ["explorer", "staking", "mining", "wallet", "blockchain"] {
        orchestrator.register(
            name,
            Arc::new(DependencyChecker {
                name,
                orchestrator: orchestrator.clone(),
                started: Arc::clone(&started),
            }),
        );
    }
    settle(&orchestrator).await;

    let started = started.lock();
    assert_eq!(started.len(), 5);
    for (name, ready) in started.iter() {
        assert!(ready, "{name} started before its dependencies were initialized");
    }
}

#[tokio::test]
async fn test_late_dependency_registration_unblocks_dependent() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();
    let wallet = Probe::ok();

    orchestrator.register("wallet", wallet.clone());
    idle(&orchestrator).await;

    // Blocked on an unregistered dependency: not started, not an error
    assert_eq!(orchestrator.status("wallet"), Some(SubsystemStatus::Registered));
    assert_eq!(wallet.attempts(), 0);
    assert!(!orchestrator.is_fully_initialized());

    orchestrator.register("blockchain", Probe::ok());
    settle(&orchestrator).await;

    assert!(orchestrator.is_initialized("blockchain"));
    assert!(orchestrator.is_initialized("wallet"));
    assert_eq!(wallet.attempts(), 1);
}

#[tokio::test]
async fn test_independent_subsystems_initialize_concurrently() {
    struct Rendezvous(Arc<Barrier>);

    #[async_trait::async_trait]
    impl Subsystem for Rendezvous {
        async fn initialize(&self) -> Result<(), SubsystemError> {
            // Only completes if both initializers are running at once
            self.0.wait().await;
            Ok(())
        }
    }

    let orchestrator = Orchestrator::new(app_config()).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    orchestrator.register("blockchain", Arc::new(Rendezvous(Arc::clone(&barrier))));
    orchestrator.register("analytics", Arc::new(Rendezvous(barrier)));
    settle(&orchestrator).await;

    assert!(orchestrator.is_initialized("blockchain"));
    assert!(orchestrator.is_initialized("analytics"));
}

#[tokio::test]
async fn test_default_initializer_succeeds() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();

    orchestrator.register("blockchain", Arc::new(Plain));
    settle(&orchestrator).await;

    assert_eq!(
        orchestrator.status("blockchain"),
        Some(SubsystemStatus::Initialized)
    );
}

// =============================================================================
// FAILURE HANDLING
// =============================================================================

#[tokio::test]
async fn test_failure_blocks_only_dependents() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();
    let mut events = orchestrator.subscribe(EventFilter::topics(vec![
        EventTopic::InitializationError,
    ]));

    let mining = Probe::ok();
    let staking = Probe::ok();
    orchestrator.register("blockchain", Probe::ok());
    orchestrator.register("wallet", Probe::new(Behavior::Fail("keystore locked")));
    orchestrator.register("mining", mining.clone());
    orchestrator.register("staking", staking.clone());
    orchestrator.register("explorer", Probe::ok());

    // Blocked dependents never settle, so wait for quiescence instead
    idle(&orchestrator).await;

    assert!(orchestrator.is_initialized("blockchain"));
    assert!(orchestrator.is_initialized("explorer"));
    assert_eq!(
        orchestrator.status("wallet"),
        Some(SubsystemStatus::Error(InitializationError::Rejected(
            "keystore locked".into()
        )))
    );
    assert_eq!(orchestrator.status("mining"), Some(SubsystemStatus::Registered));
    assert_eq!(orchestrator.status("staking"), Some(SubsystemStatus::Registered));
    assert_eq!(mining.attempts(), 0);
    assert_eq!(staking.attempts(), 0);
    assert!(!orchestrator.is_fully_initialized());

    assert_eq!(
        events.drain(),
        vec![failed(
            "wallet",
            InitializationError::Rejected("keystore locked".into())
        )]
    );
}

#[tokio::test]
async fn test_initializer_timeout_is_an_error() {
    let config = app_config().with_timeout(Duration::from_millis(50));
    let orchestrator = Orchestrator::new(config).unwrap();

    orchestrator.register("blockchain", Probe::new(Behavior::Hang));
    settle(&orchestrator).await;

    assert_eq!(
        orchestrator.status("blockchain"),
        Some(SubsystemStatus::Error(InitializationError::Timeout {
            after_ms: 50
        }))
    );
}

#[tokio::test]
async fn test_zero_timeout_in_file_means_no_timeout() {
    let mut config = BootstrapConfig::from_json_str(r#"{"init_timeout_ms": 0}"#).unwrap();
    config.dependencies = app_config().dependencies;
    let orchestrator = Orchestrator::new(config).unwrap();

    // Suspends for 5ms before succeeding
    orchestrator.register("blockchain", Probe::ok());
    settle(&orchestrator).await;

    assert_eq!(
        orchestrator.status("blockchain"),
        Some(SubsystemStatus::Initialized)
    );
}

#[tokio::test]
async fn test_initializer_panic_is_an_error() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();

    orchestrator.register("wallet", Probe::ok());
    orchestrator.register("blockchain", Probe::new(Behavior::Panic("disk on fire")));
    idle(&orchestrator).await;

    assert_eq!(
        orchestrator.status("blockchain"),
        Some(SubsystemStatus::Error(InitializationError::Panicked(
            "disk on fire".into()
        )))
    );
    assert_eq!(orchestrator.status("wallet"), Some(SubsystemStatus::Registered));

    // The orchestrator keeps working after a panicking initializer
    orchestrator.register("analytics", Probe::ok());
    idle(&orchestrator).await;
    assert!(orchestrator.is_initialized("analytics"));
}

// =============================================================================
// RE-REGISTRATION
// =============================================================================

#[tokio::test]
async fn test_reregistration_rearms_failed_subsystem() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();
    let mut events = orchestrator.subscribe(EventFilter::all());

    let failing = Probe::new(Behavior::Fail("no peers"));
    orchestrator.register("blockchain", Probe::ok());
    orchestrator.register("wallet", failing.clone());
    orchestrator.register("mining", Probe::ok());
    idle(&orchestrator).await;
    assert!(orchestrator
        .status("wallet")
        .is_some_and(|status| status.last_error().is_some()));

    // A pass on its own never retries a failed subsystem
    orchestrator.drive();
    idle(&orchestrator).await;
    assert_eq!(failing.attempts(), 1);

    orchestrator.register("wallet", Probe::ok());
    settle(&orchestrator).await;

    assert!(orchestrator.is_initialized("wallet"));
    assert!(orchestrator.is_initialized("mining"));
    assert_eq!(
        events.drain(),
        vec![
            initialized("blockchain"),
            failed("wallet", InitializationError::Rejected("no peers".into())),
            initialized("wallet"),
            initialized("mining"),
            LifecycleEvent::AllInitialized,
        ]
    );
}

#[tokio::test]
async fn test_reregistration_while_in_flight_never_overlaps() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();
    let mut events = orchestrator.subscribe(EventFilter::all());

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());

    orchestrator.register(
        "blockchain",
        Arc::new(Overlap {
            active: Arc::clone(&active),
            peak: Arc::clone(&peak),
            gate: Some(Arc::clone(&gate)),
            outcome: Err("superseded"),
        }),
    );
    orchestrator.register(
        "blockchain",
        Arc::new(Overlap {
            active: Arc::clone(&active),
            peak: Arc::clone(&peak),
            gate: None,
            outcome: Ok(()),
        }),
    );

    // The replacement waits for the first attempt to resolve
    assert_eq!(
        orchestrator.status("blockchain"),
        Some(SubsystemStatus::Registered)
    );
    assert_eq!(orchestrator.in_flight(), 1);

    gate.notify_one();
    settle(&orchestrator).await;

    assert!(orchestrator.is_initialized("blockchain"));
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    // The superseded attempt's error is discarded
    assert_eq!(
        events.drain(),
        vec![initialized("blockchain"), LifecycleEvent::AllInitialized]
    );
}

// =============================================================================
// EVENTS & FLAG
// =============================================================================

#[tokio::test]
async fn test_all_initialized_published_once() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();
    let mut events = orchestrator.subscribe(EventFilter::all());

    orchestrator.register("blockchain", Probe::ok());
    settle(&orchestrator).await;
    assert!(orchestrator.is_fully_initialized());

    // Late registration: the flag stays set and is not re-announced
    orchestrator.register("wallet", Probe::ok());
    assert!(orchestrator.is_fully_initialized());
    idle(&orchestrator).await;

    assert_eq!(
        events.drain(),
        vec![
            initialized("blockchain"),
            LifecycleEvent::AllInitialized,
            initialized("wallet"),
        ]
    );
}

#[tokio::test]
async fn test_drive_is_idempotent() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();
    let blockchain = Probe::ok();

    orchestrator.register("blockchain", blockchain.clone());
    settle(&orchestrator).await;

    let mut events = orchestrator.subscribe(EventFilter::all());
    for _ in 0..5 {
        orchestrator.drive();
    }
    idle(&orchestrator).await;

    assert_eq!(blockchain.attempts(), 1);
    assert_eq!(events.try_recv(), Ok(None));
}

#[tokio::test]
async fn test_empty_registry_is_not_fully_initialized() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();

    orchestrator.drive();

    assert!(!orchestrator.is_fully_initialized());
    assert!(orchestrator.snapshot().is_empty());
}

#[tokio::test]
async fn test_subsystem_filter_and_stream() {
    use futures::StreamExt;

    let orchestrator = Orchestrator::new(app_config()).unwrap();
    let mut wallet_events = orchestrator.event_stream(EventFilter::for_subsystems(["wallet"]));

    orchestrator.register("wallet", Probe::ok());
    orchestrator.register("blockchain", Probe::ok());
    settle(&orchestrator).await;

    let first = timeout(TEST_TIMEOUT, wallet_events.next()).await.unwrap();
    let second = timeout(TEST_TIMEOUT, wallet_events.next()).await.unwrap();
    assert_eq!(first, Some(initialized("wallet")));
    assert_eq!(second, Some(LifecycleEvent::AllInitialized));
}

#[tokio::test]
async fn test_shared_bus_receives_events() {
    let bus = Arc::new(qc_bootstrap::InMemoryEventBus::new());
    let mut events = bus.subscribe(EventFilter::topics(vec![EventTopic::AllInitialized]));

    let orchestrator = Orchestrator::with_bus(app_config(), Arc::clone(&bus)).unwrap();
    orchestrator.register("blockchain", Probe::ok());
    settle(&orchestrator).await;

    assert!(Arc::ptr_eq(&orchestrator.event_bus(), &bus));
    assert_eq!(events.drain(), vec![LifecycleEvent::AllInitialized]);
}

// =============================================================================
// CONFIGURATION & QUERIES
// =============================================================================

#[tokio::test]
async fn test_cyclic_configuration_rejected() {
    let config = app_config().with_dependency("blockchain", ["mining"]);

    let err = Orchestrator::new(config).unwrap_err();

    assert!(matches!(err, ConfigurationError::DependencyCycle { .. }));
    assert!(err.to_string().contains("blockchain"));
}

#[tokio::test]
async fn test_unknown_name_queries() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();
    orchestrator.register("blockchain", Probe::ok());
    settle(&orchestrator).await;

    assert!(orchestrator.get("nonexistent").is_none());
    assert!(orchestrator.status("nonexistent").is_none());
    assert!(!orchestrator.is_initialized("nonexistent"));
    assert!(orchestrator.get("blockchain").is_some());
}

#[tokio::test]
async fn test_snapshot_in_registration_order() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();

    orchestrator.register("mining", Probe::ok());
    orchestrator.register("blockchain", Probe::ok());
    orchestrator.register("wallet", Probe::ok());
    settle(&orchestrator).await;

    let snapshot = orchestrator.snapshot();
    let names: Vec<&str> = snapshot.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["mining", "blockchain", "wallet"]);
    assert_eq!(snapshot[0].dependencies, vec!["wallet", "blockchain"]);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json[1]["status"], "Initialized");

    orchestrator.print_status();
}

// =============================================================================
// SHUTDOWN
// =============================================================================

#[tokio::test]
async fn test_shutdown_cancels_in_flight_attempts() {
    let orchestrator = Orchestrator::new(app_config()).unwrap();
    let mut events = orchestrator.subscribe(EventFilter::all());

    orchestrator.register("blockchain", Probe::new(Behavior::Hang));
    assert_eq!(orchestrator.in_flight(), 1);

    orchestrator.shutdown();

    assert_eq!(orchestrator.in_flight(), 0);
    assert_eq!(
        orchestrator.status("blockchain"),
        Some(SubsystemStatus::Error(InitializationError::Cancelled))
    );
    assert_eq!(
        events.drain(),
        vec![failed("blockchain", InitializationError::Cancelled)]
    );

    // Closed: later registrations are ignored
    orchestrator.register("explorer", Probe::ok());
    assert!(orchestrator.status("explorer").is_none());

    orchestrator.shutdown();
    idle(&orchestrator).await;
}
