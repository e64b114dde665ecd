//! # Driver
//!
//! Level-triggered scheduler that brings registered subsystems up as soon as
//! their dependencies allow.
//!
//! ## Pass
//!
//! 1. Compute the initialization order over the current registry
//! 2. For every name that is `Registered`, has all dependencies `Initialized`
//!    and has no attempt in flight: flip it to `Initializing` and spawn an
//!    attempt task
//! 3. If every record is terminal, publish `AllInitialized` (once)
//!
//! A pass runs on every `register`, on every completed attempt, and on
//! explicit `drive()` calls. Re-entry happens from the attempt tasks, never
//! by recursion on the caller's stack.
//!
//! ## Atomicity
//!
//! The registry, the in-flight table and the fully-initialized flag live
//! behind one lock. Status checks and transitions for a name always happen
//! inside one critical section, so concurrent passes can neither start the
//! same name twice nor lose a transition. The only suspension point is the
//! subsystem's own `initialize`, which runs outside the lock.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use quantum_telemetry::{
    metric_inc, metric_observe, EVENTS_PUBLISHED, INITIALIZATIONS, INITIALIZATIONS_IN_FLIGHT,
    INITIALIZATION_DURATION, SUBSYSTEMS_REGISTERED,
};
use shared_bus::{
    EventFilter, EventPublisher, EventStream, InMemoryEventBus, InitializationError,
    LifecycleEvent, Subscription,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::config::BootstrapConfig;
use crate::error::ConfigurationError;
use crate::graph::DependencyGraph;
use crate::order;
use crate::registry::{Registry, Subsystem, SubsystemSnapshot, SubsystemStatus};

/// An attempt awaiting its initializer.
struct InFlight {
    generation: u64,
    abort: AbortHandle,
}

/// Everything guarded by the orchestrator lock.
#[derive(Default)]
struct DriverState {
    registry: Registry,
    /// At most one entry per name.
    in_flight: HashMap<String, InFlight>,
    fully_initialized: bool,
    closed: bool,
}

struct Inner {
    graph: DependencyGraph,
    state: Mutex<DriverState>,
    bus: Arc<InMemoryEventBus>,
    init_timeout: Option<Duration>,
    runtime: Handle,
    fully_initialized_tx: watch::Sender<bool>,
    in_flight_tx: watch::Sender<usize>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for attempt in self.state.get_mut().in_flight.values() {
            attempt.abort.abort();
        }
    }
}

/// Dependency-ordered subsystem initializer.
///
/// Cheap to clone; clones share the same registry and event bus. Dropping the
/// last clone aborts any attempt still in flight.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create an orchestrator from configuration.
    ///
    /// # Errors
    ///
    /// - `DependencyCycle` / `EmptyName` if the dependency graph is malformed
    /// - `NoRuntime` if called outside a Tokio runtime
    pub fn new(config: BootstrapConfig) -> Result<Self, ConfigurationError> {
        let bus = Arc::new(InMemoryEventBus::with_capacity(config.event_capacity));
        Self::with_bus(config, bus)
    }

    /// Create an orchestrator that publishes to an existing bus.
    pub fn with_bus(
        config: BootstrapConfig,
        bus: Arc<InMemoryEventBus>,
    ) -> Result<Self, ConfigurationError> {
        let graph = config.dependency_graph()?;
        Self::from_parts(graph, config.init_timeout(), bus)
    }

    /// Create an orchestrator from a dependency graph alone, with no
    /// initializer timeout and a default-capacity bus.
    pub fn configure<I, N, D, S>(dependencies: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let graph = DependencyGraph::new(dependencies)?;
        Self::from_parts(graph, None, Arc::new(InMemoryEventBus::new()))
    }

    fn from_parts(
        graph: DependencyGraph,
        init_timeout: Option<Duration>,
        bus: Arc<InMemoryEventBus>,
    ) -> Result<Self, ConfigurationError> {
        let runtime = Handle::try_current().map_err(|_| ConfigurationError::NoRuntime)?;
        let (fully_initialized_tx, _) = watch::channel(false);
        let (in_flight_tx, _) = watch::channel(0);

        info!(
            subsystems = graph.len(),
            timeout_ms = ?init_timeout.map(|t| t.as_millis()),
            "[Bootstrap] Orchestrator configured"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                graph,
                state: Mutex::new(DriverState::default()),
                bus,
                init_timeout,
                runtime,
                fully_initialized_tx,
                in_flight_tx,
            }),
        })
    }

    // =========================================================================
    // REGISTRATION & DRIVING
    // =========================================================================

    /// Register (or replace) a subsystem and run one pass.
    ///
    /// Never fails and never waits for initializers. Dependencies come from
    /// the configured graph; a name absent from the graph has none. If an
    /// earlier attempt for the same name is still in flight, the new instance
    /// is attempted only after that one resolves, and the old outcome is
    /// discarded.
    pub fn register(&self, name: impl Into<String>, instance: Arc<dyn Subsystem>) {
        let name = name.into();
        let mut state = self.inner.state.lock();

        if state.closed {
            warn!(subsystem = %name, "[Bootstrap] Ignoring registration after shutdown");
            return;
        }

        if state.registry.contains(&name) {
            warn!(subsystem = %name, "[Bootstrap] Replacing existing registration");
        }

        let dependencies = self.inner.graph.dependencies_of(&name).to_vec();
        info!(
            subsystem = %name,
            dependencies = ?dependencies,
            "[Bootstrap] Registering subsystem"
        );
        state.registry.insert(&name, instance, dependencies);
        metric_inc!(SUBSYSTEMS_REGISTERED);

        self.drive_locked(&mut state);
    }

    /// Run one pass. A no-op when nothing is ready.
    pub fn drive(&self) {
        let mut state = self.inner.state.lock();
        self.drive_locked(&mut state);
    }

    fn drive_locked(&self, state: &mut DriverState) {
        if state.closed {
            return;
        }

        let order = {
            let registry = &state.registry;
            order::initialization_order(
                &self.inner.graph,
                registry.registration_order(),
                |name| registry.contains(name),
            )
        };
        let order = match order {
            Ok(order) => order,
            Err(e) => {
                // The graph was validated at construction
                error!(error = %e, "[Bootstrap] Failed to compute initialization order");
                return;
            }
        };

        for name in order {
            if state.in_flight.contains_key(&name) || !state.registry.is_ready(&name) {
                continue;
            }
            let Some((instance, generation)) = state.registry.begin(&name) else {
                continue;
            };

            debug!(subsystem = %name, generation, "[Bootstrap] Initializing subsystem");
            let abort = self.spawn_attempt(name.clone(), instance, generation);
            state.in_flight.insert(name, InFlight { generation, abort });
        }

        self.publish_in_flight(state);
        self.check_fully_initialized(state);
    }

    fn spawn_attempt(
        &self,
        name: String,
        instance: Arc<dyn Subsystem>,
        generation: u64,
    ) -> AbortHandle {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.init_timeout;

        let task = self.inner.runtime.spawn(async move {
            let started = Instant::now();
            let outcome = run_initializer(instance, timeout).await;

            // Orchestrator dropped meanwhile: nobody left to report to
            if let Some(inner) = inner.upgrade() {
                Orchestrator { inner }.finish_attempt(&name, generation, outcome, started.elapsed());
            }
        });

        task.abort_handle()
    }

    fn finish_attempt(
        &self,
        name: &str,
        generation: u64,
        outcome: Result<(), InitializationError>,
        elapsed: Duration,
    ) {
        let mut state = self.inner.state.lock();

        if state
            .in_flight
            .get(name)
            .is_some_and(|attempt| attempt.generation == generation)
        {
            state.in_flight.remove(name);
        }

        metric_observe!(INITIALIZATION_DURATION, &[name], elapsed.as_secs_f64());

        match state.registry.complete(name, generation, outcome) {
            Some(SubsystemStatus::Initialized) => {
                info!(
                    subsystem = %name,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "[Bootstrap] Subsystem initialized"
                );
                metric_inc!(INITIALIZATIONS, &[name, "initialized"]);
                self.publish(LifecycleEvent::SystemInitialized {
                    name: name.to_string(),
                });
            }
            Some(SubsystemStatus::Error(error)) => self.report_failure(name, error),
            Some(SubsystemStatus::Registered | SubsystemStatus::Initializing) => {}
            None => {
                debug!(
                    subsystem = %name,
                    generation,
                    "[Bootstrap] Discarding stale initialization outcome"
                );
            }
        }

        self.drive_locked(&mut state);
    }

    fn report_failure(&self, name: &str, error: InitializationError) {
        warn!(subsystem = %name, error = %error, "[Bootstrap] Subsystem initialization failed");
        metric_inc!(INITIALIZATIONS, &[name, failure_label(&error)]);
        self.publish(LifecycleEvent::SystemInitializationError {
            name: name.to_string(),
            error,
        });
    }

    fn check_fully_initialized(&self, state: &mut DriverState) {
        if state.fully_initialized || !state.registry.all_terminal() {
            return;
        }

        state.fully_initialized = true;
        info!(
            subsystems = state.registry.len(),
            "[Bootstrap] All registered subsystems settled"
        );
        self.publish(LifecycleEvent::AllInitialized);
        self.inner.fully_initialized_tx.send_replace(true);
    }

    fn publish(&self, event: LifecycleEvent) {
        metric_inc!(EVENTS_PUBLISHED, &[event.kind()]);
        self.inner.bus.publish(event);
    }

    fn publish_in_flight(&self, state: &DriverState) {
        let count = state.in_flight.len();
        INITIALIZATIONS_IN_FLIGHT.set(count as f64);
        self.inner.in_flight_tx.send_replace(count);
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    /// Stop the orchestrator.
    ///
    /// Aborts in-flight attempts and records them as `Error(Cancelled)`,
    /// publishing the error event for each. Later registrations and passes
    /// are ignored. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let cancelled: Vec<(String, InFlight)> = state.in_flight.drain().collect();
        for (name, attempt) in cancelled {
            attempt.abort.abort();
            if let Some(SubsystemStatus::Error(error)) =
                state
                    .registry
                    .complete(&name, attempt.generation, Err(InitializationError::Cancelled))
            {
                self.report_failure(&name, error);
            }
        }

        self.publish_in_flight(&state);
        info!("[Bootstrap] Orchestrator shut down");
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Instance registered under `name`, `None` if never registered.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Subsystem>> {
        self.inner
            .state
            .lock()
            .registry
            .get(name)
            .map(|record| Arc::clone(&record.instance))
    }

    /// Current status, `None` if never registered.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<SubsystemStatus> {
        self.inner.state.lock().registry.status(name).cloned()
    }

    /// False for unknown names.
    #[must_use]
    pub fn is_initialized(&self, name: &str) -> bool {
        self.inner.state.lock().registry.is_initialized(name)
    }

    /// Whether every registered subsystem has settled at least once.
    ///
    /// Best-effort: once true it stays true, even if a subsystem registers
    /// afterwards.
    #[must_use]
    pub fn is_fully_initialized(&self) -> bool {
        self.inner.state.lock().fully_initialized
    }

    /// All records in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubsystemSnapshot> {
        self.inner.state.lock().registry.snapshot()
    }

    /// Number of attempts currently awaiting their initializer.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Log a status table.
    pub fn print_status(&self) {
        self.inner.state.lock().registry.print_status();
    }

    #[must_use]
    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.inner.graph
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Subscribe to lifecycle events published from now on.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.inner.bus.subscribe(filter)
    }

    #[must_use]
    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        self.inner.bus.event_stream(filter)
    }

    #[must_use]
    pub fn event_bus(&self) -> Arc<InMemoryEventBus> {
        Arc::clone(&self.inner.bus)
    }

    /// Resolve once the fully-initialized flag is set; immediately if it
    /// already is. Never resolves if a subsystem stays blocked.
    pub async fn wait_until_fully_initialized(&self) {
        let mut rx = self.inner.fully_initialized_tx.subscribe();
        // The sender lives in `self`, so this only returns once the flag is set
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Resolve once no attempt is in flight.
    ///
    /// Blocked subsystems stay `Registered` and do not count as in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.in_flight_tx.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("graph", &self.inner.graph)
            .field("init_timeout", &self.inner.init_timeout)
            .finish_non_exhaustive()
    }
}

/// Await one initializer, mapping every way it can end to an outcome.
async fn run_initializer(
    instance: Arc<dyn Subsystem>,
    timeout: Option<Duration>,
) -> Result<(), InitializationError> {
    let attempt = AssertUnwindSafe(instance.initialize()).catch_unwind();

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(InitializationError::Timeout {
                    after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            }
        },
        None => attempt.await,
    };

    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(InitializationError::Rejected(err.message)),
        Err(payload) => Err(InitializationError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn failure_label(error: &InitializationError) -> &'static str {
    match error {
        InitializationError::Rejected(_) => "rejected",
        InitializationError::Timeout { .. } => "timeout",
        InitializationError::Panicked(_) => "panicked",
        InitializationError::Cancelled => "cancelled",
    }
}
