// Anonymous Usage Measurement - Core Library
// Resolves collection targets, fans commands out to one tracker per target
// and anonymizes every request before it leaves the process

pub mod error;
pub mod settings;
pub mod store;
pub mod target;
pub mod request;
pub mod client;
pub mod anonymize;
pub mod transport;
pub mod command;
pub mod tracker;
pub mod registry;
pub mod queue;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, TrackingError};
pub use settings::{AppConfig, Settings, SettingsProvider, SharedSettings};
pub use store::{SettingsChange, SqliteSettingsStore};
pub use target::{Target, TargetResolver, DEFAULT_INSTANCE_URL, TRACKING_ENTRYPOINT};
pub use request::RequestParams;
pub use client::{CustomVariable, PageContext, PiwikClient, Scope, TrackingClient};
pub use anonymize::{AnonymizationPolicy, ANONYMOUS_URL_BASE};
pub use transport::{Beacon, MemoryTransport, NullTransport, Transport};
pub use command::{Command, CommandBuffer, Operation};
pub use tracker::AnonymizingTracker;
pub use registry::{DispatchOutcome, TrackerRegistry};
pub use queue::CommandQueue;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

