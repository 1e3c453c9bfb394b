// 🎯 Targets - where anonymized usage data is sent
// Derived from settings on every call, never persisted

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TrackingError};
use crate::settings::Settings;

/// Tracking entrypoint every target url ends with
pub const TRACKING_ENTRYPOINT: &str = "piwik.php";

/// Public demo instance that receives usage data by default
pub const DEFAULT_INSTANCE_URL: &str = "http://demo-anonymous.piwik.org/piwik.php";
pub const DEFAULT_INSTANCE_SITE_ID: u32 = 1;

// ============================================================================
// TARGET
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub url: String,

    #[serde(rename = "idSite")]
    pub site_id: u32,

    #[serde(rename = "useAnonymization")]
    pub use_anonymization: bool,
}

impl Target {
    pub fn new(url: impl Into<String>, site_id: u32, use_anonymization: bool) -> Self {
        Target {
            url: url.into(),
            site_id,
            use_anonymization,
        }
    }

    /// The public demo instance target
    pub fn default_instance() -> Self {
        Target::new(DEFAULT_INSTANCE_URL, DEFAULT_INSTANCE_SITE_ID, true)
    }

    /// Check the invariants a tracker relies on
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(TrackingError::invalid_target("url", "url is empty"));
        }

        let parsed = Url::parse(&self.url)
            .map_err(|e| TrackingError::invalid_target("url", format!("{}: {}", self.url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(TrackingError::invalid_target(
                "url",
                format!("{} is not an http(s) endpoint", self.url),
            ));
        }

        if !parsed.path().ends_with(TRACKING_ENTRYPOINT) {
            return Err(TrackingError::invalid_target(
                "url",
                format!("{} does not end with {}", self.url, TRACKING_ENTRYPOINT),
            ));
        }

        if self.site_id == 0 {
            return Err(TrackingError::invalid_target("idSite", "site id must be positive"));
        }

        Ok(())
    }
}

/// Append the tracking entrypoint to an instance base url
pub fn endpoint_url(base_url: &str) -> String {
    let base = base_url.trim();
    if base.ends_with(TRACKING_ENTRYPOINT) {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), TRACKING_ENTRYPOINT)
}

// ============================================================================
// TARGET RESOLVER
// ============================================================================

/// Turns settings into the ordered list of targets: default, own, custom.
///
/// Identical targets coming from different categories are all kept; each
/// category is its own destination even when the urls coincide.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    /// Base url of this installation (own-instance endpoint)
    local_base_url: String,
}

impl TargetResolver {
    pub fn new(local_base_url: impl Into<String>) -> Self {
        TargetResolver {
            local_base_url: local_base_url.into(),
        }
    }

    pub fn resolve(&self, settings: &Settings) -> Vec<Target> {
        let mut targets = Vec::new();

        if settings.track_to_default_instance {
            targets.push(Target::default_instance());
        }

        if let Some(site_id) = settings.own_site_id() {
            let target = Target::new(endpoint_url(&self.local_base_url), site_id, true);
            push_valid(&mut targets, "own", target);
        }

        if let Some((url, site_id)) = settings.custom_instance() {
            push_valid(&mut targets, "custom", Target::new(endpoint_url(url), site_id, true));
        }

        tracing::debug!(count = targets.len(), "resolved usage tracking targets");
        targets
    }
}

/// A configured instance whose endpoint is unusable counts as unconfigured
fn push_valid(targets: &mut Vec<Target>, instance: &str, target: Target) {
    match target.validate() {
        Ok(()) => targets.push(target),
        Err(e) => tracing::warn!(instance, error = %e, "skipping usage tracking target"),
    }
}

// ============================================================================
// TESTS
// ============================================================================
