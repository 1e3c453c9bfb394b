// 🛡️ Anonymizing Tracker - one per target
// Decorates a tracking client and anonymizes every request it builds

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::anonymize::AnonymizationPolicy;
use crate::client::{CustomVariable, Scope, TrackingClient};
use crate::command::Operation;
use crate::error::{Result, TrackingError};
use crate::request::RequestParams;
use crate::target::Target;
use crate::transport::{Beacon, Transport};

/// Typed entry point of one operation, fed with the queued arguments
pub type Handler = fn(&mut AnonymizingTracker, &[Value]) -> Result<Value>;

pub struct AnonymizingTracker {
    target: Target,
    client: Box<dyn TrackingClient>,
    policy: AnonymizationPolicy,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for AnonymizingTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnonymizingTracker")
            .field("target", &self.target)
            .field("site_id", &self.client.site_id())
            .finish()
    }
}

impl AnonymizingTracker {
    /// Wrap `client` for `target`; the target has to be fully valid
    pub fn new(
        target: Target,
        client: Box<dyn TrackingClient>,
        policy: AnonymizationPolicy,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        target.validate()?;
        Ok(AnonymizingTracker {
            target,
            client,
            policy,
            transport,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn site_id(&self) -> u32 {
        self.client.site_id()
    }

    pub fn set_site_id(&mut self, site_id: u32) {
        self.client.set_site_id(site_id);
    }

    pub fn tracker_url(&self) -> &str {
        self.client.tracker_url()
    }

    pub fn set_custom_variable(&mut self, index: u32, scope: Scope, name: &str, value: &str) {
        self.client.set_custom_variable(index, scope, name, value);
    }

    pub fn custom_variable(&self, index: u32, scope: Scope) -> Option<CustomVariable> {
        self.client.custom_variable(index, scope)
    }

    pub fn set_custom_data(&mut self, key: &str, value: Value) {
        self.client.set_custom_data(key, value);
    }

    pub fn custom_data(&self) -> &Map<String, Value> {
        self.client.custom_data()
    }

    // Optional capabilities: each returns whether the client applied it

    pub fn delete_custom_variable(&mut self, index: u32, scope: Scope) -> bool {
        self.apply_optional(Operation::DeleteCustomVariable, |c| {
            c.delete_custom_variable(index, scope)
        })
    }

    pub fn set_custom_url(&mut self, url: &str) -> bool {
        self.apply_optional(Operation::SetCustomUrl, |c| c.set_custom_url(url))
    }

    pub fn set_referrer_url(&mut self, url: &str) -> bool {
        self.apply_optional(Operation::SetReferrerUrl, |c| c.set_referrer_url(url))
    }

    pub fn set_document_title(&mut self, title: &str) -> bool {
        self.apply_optional(Operation::SetDocumentTitle, |c| c.set_document_title(title))
    }

    fn apply_optional<F>(&mut self, op: Operation, f: F) -> bool
    where
        F: FnOnce(&mut dyn TrackingClient),
    {
        if !self.client.supports(op) {
            return false;
        }
        f(self.client.as_mut());
        true
    }

    // ========================================================================
    // REQUESTS
    // ========================================================================

    /// Encoded request for `payload`, anonymized if the target asks for it
    pub fn build_request(&self, payload: &str) -> String {
        let request = self.client.request(payload);
        if self.target.use_anonymization {
            self.policy.anonymize_request(&request)
        } else {
            request
        }
    }

    /// Build a request and hand it to the transport without waiting
    pub fn send_request(&self, payload: &str) {
        let beacon = Beacon {
            tracker_url: self.tracker_url().to_string(),
            request: self.build_request(payload),
        };
        self.transport.send(beacon);
    }

    pub fn track_page_view(&self, title: Option<&str>) {
        let title = title
            .or_else(|| self.client.document_title())
            .unwrap_or_default();

        let mut payload = RequestParams::new();
        payload.push("action_name", title);
        self.send_request(&payload.to_string());
    }

    pub fn track_event(&self, category: &str, action: &str, name: Option<&str>, value: Option<f64>) {
        let mut payload = RequestParams::new();
        payload.push("e_c", category);
        payload.push("e_a", action);
        if let Some(name) = name {
            payload.push("e_n", name);
        }
        if let Some(value) = value {
            payload.push("e_v", &value.to_string());
        }
        self.send_request(&payload.to_string());
    }

    // ========================================================================
    // CAPABILITY PROBING
    // ========================================================================

    pub fn supports(&self, op: Operation) -> bool {
        op.is_core() || self.client.supports(op)
    }

    /// Handler for `op`, or `None` when this tracker cannot perform it
    pub fn handler(&self, op: Operation) -> Option<Handler> {
        if !self.supports(op) {
            return None;
        }

        let handler: Handler = match op {
            Operation::SetSiteId => handlers::set_site_id,
            Operation::GetSiteId => handlers::get_site_id,
            Operation::GetTrackerUrl => handlers::get_tracker_url,
            Operation::SetCustomVariable => handlers::set_custom_variable,
            Operation::GetCustomVariable => handlers::get_custom_variable,
            Operation::DeleteCustomVariable => handlers::delete_custom_variable,
            Operation::SetCustomData => handlers::set_custom_data,
            Operation::GetCustomData => handlers::get_custom_data,
            Operation::SetCustomUrl => handlers::set_custom_url,
            Operation::SetReferrerUrl => handlers::set_referrer_url,
            Operation::SetDocumentTitle => handlers::set_document_title,
            Operation::GetRequest => handlers::get_request,
            Operation::TrackPageView => handlers::track_page_view,
            Operation::TrackEvent => handlers::track_event,
        };
        Some(handler)
    }

    /// Run `op` with queued arguments; `Ok(None)` when unsupported
    pub fn apply(&mut self, op: Operation, args: &[Value]) -> Result<Option<Value>> {
        match self.handler(op) {
            Some(handler) => handler(self, args).map(Some),
            None => Ok(None),
        }
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

mod handlers {
    use super::*;

    fn invalid(op: Operation, message: impl Into<String>) -> TrackingError {
        TrackingError::invalid_arguments(op.name(), message)
    }

    fn string_arg(op: Operation, args: &[Value], index: usize) -> Result<String> {
        match args.get(index) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(other) => Err(invalid(op, format!("argument {} must be a string, got {}", index, other))),
            None => Err(invalid(op, format!("missing argument {}", index))),
        }
    }

    fn optional_string_arg(op: Operation, args: &[Value], index: usize) -> Result<Option<String>> {
        match args.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => string_arg(op, args, index).map(Some),
        }
    }

    fn u32_arg(op: Operation, args: &[Value], index: usize) -> Result<u32> {
        let parsed = match args.get(index) {
            Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(_) => None,
            None => return Err(invalid(op, format!("missing argument {}", index))),
        };
        parsed.ok_or_else(|| invalid(op, format!("argument {} must be a non-negative integer", index)))
    }

    fn scope_arg(op: Operation, args: &[Value], index: usize) -> Result<Scope> {
        match optional_string_arg(op, args, index)? {
            Some(scope) => scope.parse().map_err(|e: String| invalid(op, e)),
            None => Ok(Scope::Visit),
        }
    }

    pub(super) fn set_site_id(tracker: &mut AnonymizingTracker, args: &[Value]) -> Result<Value> {
        let site_id = u32_arg(Operation::SetSiteId, args, 0)?;
        if site_id == 0 {
            return Err(invalid(Operation::SetSiteId, "site id must be positive"));
        }
        tracker.set_site_id(site_id);
        Ok(Value::Null)
    }

    pub(super) fn get_site_id(tracker: &mut AnonymizingTracker, _args: &[Value]) -> Result<Value> {
        Ok(Value::from(tracker.site_id()))
    }

    pub(super) fn get_tracker_url(tracker: &mut AnonymizingTracker, _args: &[Value]) -> Result<Value> {
        Ok(Value::from(tracker.tracker_url()))
    }

    /// `setCustomVariable(index, name, value, scope = "visit")`
    pub(super) fn set_custom_variable(tracker: &mut AnonymizingTracker, args: &[Value]) -> Result<Value> {
        let op = Operation::SetCustomVariable;
        let index = u32_arg(op, args, 0)?;
        let name = string_arg(op, args, 1)?;
        let value = optional_string_arg(op, args, 2)?.unwrap_or_default();
        let scope = scope_arg(op, args, 3)?;
        tracker.set_custom_variable(index, scope, &name, &value);
        Ok(Value::Null)
    }

    /// `getCustomVariable(index, scope = "visit")`
    pub(super) fn get_custom_variable(tracker: &mut AnonymizingTracker, args: &[Value]) -> Result<Value> {
        let op = Operation::GetCustomVariable;
        let index = u32_arg(op, args, 0)?;
        let scope = scope_arg(op, args, 1)?;
        Ok(tracker
            .custom_variable(index, scope)
            .map(|pair| Value::from(pair.to_vec()))
            .unwrap_or(Value::Null))
    }

    pub(super) fn delete_custom_variable(tracker: &mut AnonymizingTracker, args: &[Value]) -> Result<Value> {
        let op = Operation::DeleteCustomVariable;
        let index = u32_arg(op, args, 0)?;
        let scope = scope_arg(op, args, 1)?;
        tracker.delete_custom_variable(index, scope);
        Ok(Value::Null)
    }

    /// `setCustomData(key, value)` or `setCustomData({key: value, ...})`
    pub(super) fn set_custom_data(tracker: &mut AnonymizingTracker, args: &[Value]) -> Result<Value> {
        let op = Operation::SetCustomData;
        if let Some(Value::Object(entries)) = args.first() {
            for (key, value) in entries {
                tracker.set_custom_data(key, value.clone());
            }
            return Ok(Value::Null);
        }

        let key = string_arg(op, args, 0)?;
        let value = args.get(1).cloned().unwrap_or(Value::Null);
        tracker.set_custom_data(&key, value);
        Ok(Value::Null)
    }

    pub(super) fn get_custom_data(tracker: &mut AnonymizingTracker, _args: &[Value]) -> Result<Value> {
        Ok(Value::Object(tracker.custom_data().clone()))
    }

    pub(super) fn set_custom_url(tracker: &mut AnonymizingTracker, args: &[Value]) -> Result<Value> {
        let url = string_arg(Operation::SetCustomUrl, args, 0)?;
        tracker.set_custom_url(&url);
        Ok(Value::Null)
    }

    pub(super) fn set_referrer_url(tracker: &mut AnonymizingTracker, args: &[Value]) -> Result<Value> {
        let url = string_arg(Operation::SetReferrerUrl, args, 0)?;
        tracker.set_referrer_url(&url);
        Ok(Value::Null)
    }

    pub(super) fn set_document_title(tracker: &mut AnonymizingTracker, args: &[Value]) -> Result<Value> {
        let title = string_arg(Operation::SetDocumentTitle, args, 0)?;
        tracker.set_document_title(&title);
        Ok(Value::Null)
    }

    /// `getRequest(payload = "")`
    pub(super) fn get_request(tracker: &mut AnonymizingTracker, args: &[Value]) -> Result<Value> {
        let payload = optional_string_arg(Operation::GetRequest, args, 0)?.unwrap_or_default();
        Ok(Value::from(tracker.build_request(&payload)))
    }

    /// `trackPageView(title?)`
    pub(super) fn track_page_view(tracker: &mut AnonymizingTracker, args: &[Value]) -> Result<Value> {
        let title = optional_string_arg(Operation::TrackPageView, args, 0)?;
        tracker.track_page_view(title.as_deref());
        Ok(Value::Null)
    }

    /// `trackEvent(category, action, name?, value?)`
    pub(super) fn track_event(tracker: &mut AnonymizingTracker, args: &[Value]) -> Result<Value> {
        let op = Operation::TrackEvent;
        let category = string_arg(op, args, 0)?;
        let action = string_arg(op, args, 1)?;
        let name = optional_string_arg(op, args, 2)?;
        let value = match args.get(3) {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                    .ok_or_else(|| invalid(op, "event value must be numeric"))?,
            ),
        };
        tracker.track_event(&category, &action, name.as_deref(), value);
        Ok(Value::Null)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anonymize::ANONYMOUS_URL_BASE;
    use crate::client::testing::CoreOnlyClient;
    use crate::client::{PageContext, PiwikClient};
    use crate::transport::MemoryTransport;
    use serde_json::json;

    const REAL_URL: &str = "http://anonymous.piwikdomain.org/index.php?module=CoreHome&action=index&idSite=43&period=day&date=yesterday#?module=Dashboard&action=embeddedIndex&idSite=43&period=day&date=yesterday&idDashboard=25";

    fn page() -> PageContext {
        PageContext::new(REAL_URL).with_referrer("http://anonymous.piwikdomain.org/")
    }

    fn tracker_for(target: Target, transport: MemoryTransport) -> AnonymizingTracker {
        let client = PiwikClient::new(target.url.clone(), target.site_id, page());
        AnonymizingTracker::new(
            target,
            Box::new(client),
            AnonymizationPolicy::default(),
            Arc::new(transport),
        )
        .unwrap()
    }

    fn tracker() -> AnonymizingTracker {
        tracker_for(Target::new("http://localhost/piwik.php", 1, true), MemoryTransport::new())
    }

    #[test]
    fn test_accessors_come_from_target() {
        let mut t = tracker();
        assert_eq!(t.tracker_url(), "http://localhost/piwik.php");
        assert_eq!(t.site_id(), 1);

        t.set_site_id(20);
        assert_eq!(t.site_id(), 20);
        assert_eq!(t.target().site_id, 1);
    }

    #[test]
    fn test_construction_rejects_malformed_target() {
        let target = Target::new("", 1, true);
        let client = PiwikClient::new("", 1, page());
        let result = AnonymizingTracker::new(
            target,
            Box::new(client),
            AnonymizationPolicy::default(),
            Arc::new(MemoryTransport::new()),
        );
        assert!(matches!(result, Err(TrackingError::InvalidTarget { .. })));
    }

    #[test]
    fn test_anonymized_request() {
        let mut t = tracker();
        t.set_custom_variable(1, Scope::Visit, "Access", "user");

        let request = t.build_request("");
        assert!(request.contains("&url=http%3A%2F%2Fdemo.piwik.org%2F%3F"));
        assert!(request.contains("&_cvar=%7B%221%22%3A%5B%22Access%22%2C%22user%22%5D%7D"));
        assert!(!request.contains("urlref="));
        assert!(!request.contains("piwikdomain"));

        let params = RequestParams::parse(&request);
        let url = params.get("url").unwrap();
        assert!(url.starts_with(ANONYMOUS_URL_BASE));
        assert!(url.contains("module=CoreHome&action=index&idSite=43&period=day&date=yesterday"));
        assert!(url.contains("#?module=Dashboard&action=embeddedIndex"));
        assert!(!url.contains("idDashboard"));
    }

    #[test]
    fn test_anonymized_request_after_custom_url_and_referrer() {
        let mut t = tracker();
        t.set_custom_url("https://secret.example.org/index.php?module=Live&token_auth=abc");
        t.set_referrer_url("https://secret.example.org/");

        let params = RequestParams::parse(&t.build_request(""));
        assert_eq!(params.get("url").as_deref(), Some("http://demo.piwik.org/?module=Live"));
        assert!(!params.contains("urlref"));
    }

    #[test]
    fn test_unanonymized_request_keeps_real_url() {
        let t = tracker_for(
            Target::new("http://localhost/piwik.php", 1, false),
            MemoryTransport::new(),
        );
        let params = RequestParams::parse(&t.build_request(""));
        assert_eq!(params.get("url").as_deref(), Some(REAL_URL));
        assert_eq!(
            params.get("urlref").as_deref(),
            Some("http://anonymous.piwikdomain.org/")
        );
    }

    #[test]
    fn test_track_page_view_sends_anonymized_beacon() {
        let transport = MemoryTransport::new();
        let mut t = tracker_for(Target::new("http://localhost/piwik.php", 3, true), transport.clone());
        t.set_document_title("Acme Corp - Dashboard");

        t.track_page_view(None);
        t.track_page_view(Some("Reports"));

        let sent = transport.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].tracker_url, "http://localhost/piwik.php");
        assert!(sent[0].request.starts_with("action_name=Acme%20Corp%20-%20Dashboard&idsite=3"));
        assert!(sent[1].request.starts_with("action_name=Reports&"));
        assert!(sent.iter().all(|b| !b.request.contains("urlref=")));
    }

    #[test]
    fn test_track_event_payload() {
        let transport = MemoryTransport::new();
        let mut t = tracker_for(Target::new("http://localhost/piwik.php", 1, true), transport.clone());

        t.apply(
            Operation::TrackEvent,
            &[json!("Dashboard"), json!("addWidget"), json!("Visits Overview"), json!(2)],
        )
        .unwrap();

        let params = RequestParams::parse(&transport.take()[0].request);
        assert_eq!(params.get("e_c").as_deref(), Some("Dashboard"));
        assert_eq!(params.get("e_a").as_deref(), Some("addWidget"));
        assert_eq!(params.get("e_n").as_deref(), Some("Visits Overview"));
        assert_eq!(params.get("e_v").as_deref(), Some("2"));
    }

    #[test]
    fn test_apply_core_operations() {
        let mut t = tracker();
        t.apply(Operation::SetCustomVariable, &[json!(1), json!("Access"), json!("user")])
            .unwrap();
        assert_eq!(
            t.apply(Operation::GetCustomVariable, &[json!(1), json!("visit")]).unwrap(),
            Some(json!(["Access", "user"]))
        );
        assert_eq!(
            t.apply(Operation::GetCustomVariable, &[json!(2)]).unwrap(),
            Some(Value::Null)
        );

        t.apply(Operation::SetCustomData, &[json!("mykey"), json!("myvalue")]).unwrap();
        t.apply(Operation::SetCustomData, &[json!({"other": 5})]).unwrap();
        assert_eq!(
            t.apply(Operation::GetCustomData, &[]).unwrap(),
            Some(json!({"mykey": "myvalue", "other": 5}))
        );

        t.apply(Operation::SetSiteId, &[json!("20")]).unwrap();
        assert_eq!(t.apply(Operation::GetSiteId, &[]).unwrap(), Some(json!(20)));
    }

    #[test]
    fn test_apply_rejects_bad_arguments() {
        let mut t = tracker();
        assert!(matches!(
            t.apply(Operation::SetSiteId, &[json!(0)]),
            Err(TrackingError::InvalidArguments { .. })
        ));
        assert!(t.apply(Operation::SetSiteId, &[]).is_err());
        assert!(t
            .apply(Operation::SetCustomVariable, &[json!(1), json!("a"), json!("b"), json!("session")])
            .is_err());
        assert_eq!(t.site_id(), 1);
    }

    #[test]
    fn test_optional_operations_follow_client_capabilities() {
        let target = Target::new("http://localhost/piwik.php", 1, true);
        let client = CoreOnlyClient::new(PiwikClient::new(target.url.clone(), 1, page()));
        let mut t = AnonymizingTracker::new(
            target,
            Box::new(client),
            AnonymizationPolicy::default(),
            Arc::new(MemoryTransport::new()),
        )
        .unwrap();

        assert!(t.supports(Operation::SetCustomData));
        assert!(t.handler(Operation::SetCustomUrl).is_none());
        assert!(!t.set_custom_url("http://elsewhere/"));
        assert_eq!(t.apply(Operation::SetCustomUrl, &[json!("http://elsewhere/")]).unwrap(), None);
        assert!(t.apply(Operation::GetTrackerUrl, &[]).unwrap().is_some());
    }
}
