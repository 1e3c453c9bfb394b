// 🛰️ Tracking Client - one endpoint, one site
// Capability interface the trackers decorate, plus the default implementation

use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::command::Operation;
use crate::request::RequestParams;

/// Longest name or value a custom variable may carry
pub const CUSTOM_VARIABLE_MAX_LENGTH: usize = 200;

/// `[name, value]` pair of a custom variable
pub type CustomVariable = [String; 2];

// ============================================================================
// SCOPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Visit,
    Page,
    Event,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Visit => "visit",
            Scope::Page => "page",
            Scope::Event => "event",
        }
    }

    /// Request parameter carrying the variables of this scope
    pub fn parameter(&self) -> &'static str {
        match self {
            Scope::Visit => "_cvar",
            Scope::Page => "cvar",
            Scope::Event => "e_cvar",
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visit" => Ok(Scope::Visit),
            "page" => Ok(Scope::Page),
            "event" => Ok(Scope::Event),
            other => Err(format!("Unknown custom variable scope: {}", other)),
        }
    }
}

// ============================================================================
// PAGE CONTEXT
// ============================================================================

/// Navigation state of the host application at the time trackers are made
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,

    #[serde(default)]
    pub referrer: Option<String>,

    #[serde(default)]
    pub title: Option<String>,
}

impl PageContext {
    pub fn new(url: impl Into<String>) -> Self {
        PageContext {
            url: url.into(),
            referrer: None,
            title: None,
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

// ============================================================================
// TRACKING CLIENT
// ============================================================================

/// Single-endpoint tracking client.
///
/// The required methods form the core surface. Optional methods have no-op
/// defaults and are only reached when `supports` reports the operation.
pub trait TrackingClient: Send {
    fn tracker_url(&self) -> &str;

    fn site_id(&self) -> u32;

    fn set_site_id(&mut self, site_id: u32);

    fn set_custom_variable(&mut self, index: u32, scope: Scope, name: &str, value: &str);

    fn custom_variable(&self, index: u32, scope: Scope) -> Option<CustomVariable>;

    fn set_custom_data(&mut self, key: &str, value: Value);

    fn custom_data(&self) -> &Map<String, Value>;

    /// Full encoded request for `payload` (itself an encoded parameter string)
    fn request(&self, payload: &str) -> String;

    fn supports(&self, op: Operation) -> bool {
        op.is_core()
    }

    fn delete_custom_variable(&mut self, _index: u32, _scope: Scope) {}

    fn set_custom_url(&mut self, _url: &str) {}

    fn set_referrer_url(&mut self, _url: &str) {}

    fn set_document_title(&mut self, _title: &str) {}

    fn document_title(&self) -> Option<&str> {
        None
    }
}

// ============================================================================
// PIWIK CLIENT
// ============================================================================

fn truncate(text: &str) -> String {
    text.chars().take(CUSTOM_VARIABLE_MAX_LENGTH).collect()
}

fn new_visitor_id() -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}{}",
        uuid::Uuid::new_v4(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

fn cache_buster() -> String {
    format!("{:06}", uuid::Uuid::new_v4().as_u128() % 1_000_000)
}

fn data_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Default client: keeps its state in memory and builds Piwik-style requests
#[derive(Debug, Clone)]
pub struct PiwikClient {
    tracker_url: String,
    site_id: u32,
    page: PageContext,
    custom_url: Option<String>,
    visitor_id: String,
    first_visit: DateTime<Utc>,
    custom_variables: BTreeMap<(Scope, u32), CustomVariable>,
    custom_data: Map<String, Value>,
}

impl PiwikClient {
    pub fn new(tracker_url: impl Into<String>, site_id: u32, page: PageContext) -> Self {
        PiwikClient {
            tracker_url: tracker_url.into(),
            site_id,
            page,
            custom_url: None,
            visitor_id: new_visitor_id(),
            first_visit: Utc::now(),
            custom_variables: BTreeMap::new(),
            custom_data: Map::new(),
        }
    }

    pub fn visitor_id(&self) -> &str {
        &self.visitor_id
    }

    /// Url reported for the current page
    pub fn page_url(&self) -> &str {
        self.custom_url.as_deref().unwrap_or(&self.page.url)
    }

    /// `{"index": [name, value], ...}` for one scope, if it has any variable
    fn variables_json(&self, scope: Scope) -> Option<String> {
        let scoped: BTreeMap<u32, &CustomVariable> = self
            .custom_variables
            .iter()
            .filter(|((s, _), _)| *s == scope)
            .map(|((_, index), pair)| (*index, pair))
            .collect();

        if scoped.is_empty() {
            return None;
        }
        serde_json::to_string(&scoped).ok()
    }
}

impl TrackingClient for PiwikClient {
    fn tracker_url(&self) -> &str {
        &self.tracker_url
    }

    fn site_id(&self) -> u32 {
        self.site_id
    }

    fn set_site_id(&mut self, site_id: u32) {
        self.site_id = site_id;
    }

    fn set_custom_variable(&mut self, index: u32, scope: Scope, name: &str, value: &str) {
        if index == 0 {
            return;
        }
        self.custom_variables
            .insert((scope, index), [truncate(name), truncate(value)]);
    }

    fn custom_variable(&self, index: u32, scope: Scope) -> Option<CustomVariable> {
        self.custom_variables.get(&(scope, index)).cloned()
    }

    fn set_custom_data(&mut self, key: &str, value: Value) {
        self.custom_data.insert(key.to_string(), value);
    }

    fn custom_data(&self) -> &Map<String, Value> {
        &self.custom_data
    }

    fn request(&self, payload: &str) -> String {
        let now = Local::now();
        let mut params = RequestParams::parse(payload);

        params.push("idsite", &self.site_id.to_string());
        params.push("rec", "1");
        params.push("r", &cache_buster());
        params.push("h", &now.hour().to_string());
        params.push("m", &now.minute().to_string());
        params.push("s", &now.second().to_string());
        params.set("url", self.page_url());

        if let Some(referrer) = self.page.referrer.as_deref().filter(|r| !r.is_empty()) {
            params.push("urlref", referrer);
        }

        params.push("_id", &self.visitor_id);
        params.push("_idts", &self.first_visit.timestamp().to_string());
        params.push("_idvc", "1");

        for scope in [Scope::Visit, Scope::Page, Scope::Event] {
            if let Some(json) = self.variables_json(scope) {
                params.push(scope.parameter(), &json);
            }
        }

        for (key, value) in &self.custom_data {
            params.push(key, &data_param(value));
        }

        params.to_string()
    }

    fn supports(&self, _op: Operation) -> bool {
        true
    }

    fn delete_custom_variable(&mut self, index: u32, scope: Scope) {
        self.custom_variables.remove(&(scope, index));
    }

    fn set_custom_url(&mut self, url: &str) {
        self.custom_url = Some(url.to_string());
    }

    fn set_referrer_url(&mut self, url: &str) {
        self.page.referrer = Some(url.to_string());
    }

    fn set_document_title(&mut self, title: &str) {
        self.page.title = Some(title.to_string());
    }

    fn document_title(&self) -> Option<&str> {
        self.page.title.as_deref()
    }
}

/// Test double that only implements the core surface of a client
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) struct CoreOnlyClient {
        inner: PiwikClient,
    }

    impl CoreOnlyClient {
        pub(crate) fn new(inner: PiwikClient) -> Self {
            CoreOnlyClient { inner }
        }
    }

    impl TrackingClient for CoreOnlyClient {
        fn tracker_url(&self) -> &str {
            self.inner.tracker_url()
        }
        fn site_id(&self) -> u32 {
            self.inner.site_id()
        }
        fn set_site_id(&mut self, site_id: u32) {
            self.inner.set_site_id(site_id)
        }
        fn set_custom_variable(&mut self, index: u32, scope: Scope, name: &str, value: &str) {
            self.inner.set_custom_variable(index, scope, name, value)
        }
        fn custom_variable(&self, index: u32, scope: Scope) -> Option<CustomVariable> {
            self.inner.custom_variable(index, scope)
        }
        fn set_custom_data(&mut self, key: &str, value: Value) {
            self.inner.set_custom_data(key, value)
        }
        fn custom_data(&self) -> &Map<String, Value> {
            self.inner.custom_data()
        }
        fn request(&self, payload: &str) -> String {
            self.inner.request(payload)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> PiwikClient {
        PiwikClient::new(
            "http://localhost/piwik.php",
            1,
            PageContext::new("http://analytics.example.com/index.php?module=CoreHome")
                .with_referrer("http://analytics.example.com/"),
        )
    }

    #[test]
    fn test_custom_variables_overwrite_per_index_and_scope() {
        let mut c = client();
        c.set_custom_variable(1, Scope::Visit, "Access", "user");
        c.set_custom_variable(1, Scope::Page, "Section", "dashboard");
        c.set_custom_variable(1, Scope::Visit, "Access", "admin");

        assert_eq!(
            c.custom_variable(1, Scope::Visit),
            Some(["Access".to_string(), "admin".to_string()])
        );
        assert_eq!(
            c.custom_variable(1, Scope::Page),
            Some(["Section".to_string(), "dashboard".to_string()])
        );
        assert_eq!(c.custom_variable(2, Scope::Visit), None);
    }

    #[test]
    fn test_custom_variable_index_zero_is_ignored() {
        let mut c = client();
        c.set_custom_variable(0, Scope::Visit, "Access", "user");
        assert_eq!(c.custom_variable(0, Scope::Visit), None);
    }

    #[test]
    fn test_custom_variable_truncation() {
        let mut c = client();
        let long = "x".repeat(300);
        c.set_custom_variable(2, Scope::Visit, &long, "v");
        let [name, _] = c.custom_variable(2, Scope::Visit).unwrap();
        assert_eq!(name.len(), CUSTOM_VARIABLE_MAX_LENGTH);
    }

    #[test]
    fn test_request_contains_real_url_referrer_and_cvar() {
        let mut c = client();
        c.set_custom_variable(1, Scope::Visit, "Access", "user");
        c.set_custom_data("mykey", json!("myvalue"));

        let request = c.request("action_name=Dashboard");
        assert!(request.starts_with("action_name=Dashboard&idsite=1&rec=1"));
        assert!(request.contains(
            "&url=http%3A%2F%2Fanalytics.example.com%2Findex.php%3Fmodule%3DCoreHome"
        ));
        assert!(request.contains("&urlref=http%3A%2F%2Fanalytics.example.com%2F"));
        assert!(request.contains("&_cvar=%7B%221%22%3A%5B%22Access%22%2C%22user%22%5D%7D"));
        assert!(request.contains("&mykey=myvalue"));
        assert!(!request.contains("&cvar="));
    }

    #[test]
    fn test_request_without_referrer_omits_urlref() {
        let c = PiwikClient::new("http://localhost/piwik.php", 1, PageContext::new("http://a.b/"));
        assert!(!c.request("").contains("urlref="));
    }

    #[test]
    fn test_payload_url_is_replaced_not_duplicated() {
        let c = client();
        let request = c.request("url=http%3A%2F%2Fstale.example%2F&action_name=Home");
        let params = RequestParams::parse(&request);

        assert_eq!(params.keys().iter().filter(|k| *k == "url").count(), 1);
        assert_eq!(
            params.get("url").as_deref(),
            Some("http://analytics.example.com/index.php?module=CoreHome")
        );
        assert!(!request.contains("stale.example"));
    }

    #[test]
    fn test_custom_url_overrides_page_url() {
        let mut c = client();
        c.set_custom_url("http://other.example.com/page");
        let params = RequestParams::parse(&c.request(""));
        assert_eq!(params.get("url").as_deref(), Some("http://other.example.com/page"));
    }

    #[test]
    fn test_delete_custom_variable() {
        let mut c = client();
        c.set_custom_variable(3, Scope::Page, "a", "b");
        c.delete_custom_variable(3, Scope::Page);
        assert_eq!(c.custom_variable(3, Scope::Page), None);
    }

    #[test]
    fn test_visitor_id_shape() {
        let c = client();
        assert_eq!(c.visitor_id().len(), 16);
        assert!(c.visitor_id().chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("visit".parse::<Scope>(), Ok(Scope::Visit));
        assert_eq!("page".parse::<Scope>(), Ok(Scope::Page));
        assert!("session".parse::<Scope>().is_err());
    }
}
