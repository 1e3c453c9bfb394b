// 📋 Tracker Registry - one tracker per target, one entry point for all
//
// UNINITIALIZED -> INITIALIZED on first ensure_initialized()/dispatch();
// back to UNINITIALIZED only through reset(). Broadcasts run in tracker
// order and synchronously.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::anonymize::AnonymizationPolicy;
use crate::client::{PageContext, PiwikClient, TrackingClient};
use crate::command::{Command, Operation};
use crate::error::Result;
use crate::settings::SettingsProvider;
use crate::target::{Target, TargetResolver};
use crate::tracker::AnonymizingTracker;
use crate::transport::{NullTransport, Transport};

/// Creates the client a new tracker wraps
pub type ClientFactory =
    Box<dyn Fn(&Target, &PageContext) -> Box<dyn TrackingClient> + Send + Sync>;

fn piwik_client_factory() -> ClientFactory {
    Box::new(|target, page| {
        Box::new(PiwikClient::new(target.url.clone(), target.site_id, page.clone()))
    })
}

/// Result of broadcasting a named operation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchOutcome {
    /// Return value of each tracker that ran the operation, in tracker order
    pub results: Vec<Value>,

    /// Trackers that do not support the operation
    pub skipped: usize,
}

pub struct TrackerRegistry {
    resolver: TargetResolver,
    settings: Box<dyn SettingsProvider>,
    factory: ClientFactory,
    page: PageContext,
    policy: AnonymizationPolicy,
    transport: Arc<dyn Transport>,
    initial_commands: Vec<(Operation, Vec<Value>)>,

    initialized: bool,
    trackers: Vec<AnonymizingTracker>,
}

impl std::fmt::Debug for TrackerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerRegistry")
            .field("resolver", &self.resolver)
            .field("initialized", &self.initialized)
            .field("trackers", &self.trackers)
            .finish()
    }
}

impl TrackerRegistry {
    pub fn new<S>(resolver: TargetResolver, settings: S) -> Self
    where
        S: SettingsProvider + 'static,
    {
        TrackerRegistry {
            resolver,
            settings: Box::new(settings),
            factory: piwik_client_factory(),
            page: PageContext::default(),
            policy: AnonymizationPolicy::default(),
            transport: Arc::new(NullTransport),
            initial_commands: Vec::new(),
            initialized: false,
            trackers: Vec::new(),
        }
    }

    /// Navigation state handed to every client created from now on
    pub fn with_page(mut self, page: PageContext) -> Self {
        self.page = page;
        self
    }

    pub fn with_client_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Target, &PageContext) -> Box<dyn TrackingClient> + Send + Sync + 'static,
    {
        self.factory = Box::new(factory);
        self
    }

    pub fn with_policy(mut self, policy: AnonymizationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Operation replayed on every tracker right after it is created
    pub fn with_initial_command(mut self, op: Operation, args: Vec<Value>) -> Self {
        self.initial_commands.push((op, args));
        self
    }

    /// Tag every tracker with visit-scope custom variable 1, `Access` = `role`
    pub fn with_access_variable(self, role: &str) -> Self {
        self.with_initial_command(
            Operation::SetCustomVariable,
            vec![json!(1), json!("Access"), json!(role), json!("visit")],
        )
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Create one tracker per resolved target, unless already done
    pub fn ensure_initialized(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let settings = self.settings.load()?;
        let targets = self.resolver.resolve(&settings);

        let mut trackers = Vec::with_capacity(targets.len());
        for target in targets {
            let client = (self.factory)(&target, &self.page);
            let mut tracker = AnonymizingTracker::new(
                target,
                client,
                self.policy.clone(),
                Arc::clone(&self.transport),
            )?;

            for (op, args) in &self.initial_commands {
                tracker.apply(*op, args)?;
            }
            trackers.push(tracker);
        }

        tracing::debug!(trackers = trackers.len(), "usage trackers created");
        self.trackers = trackers;
        self.initialized = true;
        Ok(())
    }

    /// Drop every tracker; the next use re-resolves targets from settings
    pub fn reset(&mut self) {
        if self.initialized {
            tracing::info!(trackers = self.trackers.len(), "resetting usage trackers");
        }
        self.trackers.clear();
        self.initialized = false;
    }

    pub fn trackers(&self) -> &[AnonymizingTracker] {
        &self.trackers
    }

    /// Targets of the live trackers
    pub fn targets(&self) -> Vec<Target> {
        self.trackers.iter().map(|t| t.target().clone()).collect()
    }

    // ========================================================================
    // DISPATCH
    // ========================================================================

    /// Run a named operation on every tracker that supports it
    pub fn dispatch(&mut self, name: &str, args: &[Value]) -> Result<DispatchOutcome> {
        self.ensure_initialized()?;

        let op = match name.parse::<Operation>() {
            Ok(op) => op,
            Err(_) => {
                tracing::trace!(operation = name, "no tracker implements operation");
                return Ok(DispatchOutcome {
                    results: Vec::new(),
                    skipped: self.trackers.len(),
                });
            }
        };

        let mut outcome = DispatchOutcome::default();
        for tracker in &mut self.trackers {
            match tracker.apply(op, args)? {
                Some(value) => outcome.results.push(value),
                None => {
                    tracing::trace!(
                        operation = name,
                        tracker_url = tracker.tracker_url(),
                        "operation not supported"
                    );
                    outcome.skipped += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Call `callback` once per tracker; the first error stops the broadcast
    pub fn dispatch_callback<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&mut AnonymizingTracker) -> anyhow::Result<()>,
    {
        self.ensure_initialized()?;

        for tracker in &mut self.trackers {
            callback(tracker)?;
        }
        Ok(())
    }

    pub fn dispatch_command(&mut self, command: Command) -> Result<DispatchOutcome> {
        match command {
            Command::Call { name, args } => self.dispatch(&name, &args),
            Command::Invoke(mut callback) => {
                self.dispatch_callback(|tracker| callback(tracker))?;
                Ok(DispatchOutcome::default())
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
