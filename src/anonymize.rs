// 🕶️ Anonymization - rewrite outgoing requests before they leave the process
//
// The emitted page url always points at a placeholder host. Only the query
// parameters describing the application context survive, in their original
// order and encoding. Referrers are dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::client::Scope;
use crate::request::RequestParams;

/// Host every anonymized page url is reported under
pub const ANONYMOUS_URL_BASE: &str = "http://demo.piwik.org/";

/// Query parameters that describe where in the application the user is
pub const CONTEXT_PARAMETERS: [&str; 5] = ["module", "action", "idSite", "period", "date"];

/// Value written over redacted custom variables
pub const REDACTED_VALUE: &str = "anonymous";

/// Request parameters that carry referrer information
const REFERRER_PARAMETERS: [&str; 2] = ["urlref", "_ref"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizationPolicy {
    /// Placeholder url (scheme, host and path) reported instead of the real one
    pub placeholder_base: String,

    /// Query parameters kept from the real url
    pub context_parameters: Vec<String>,

    /// Custom variable names whose values get replaced by `REDACTED_VALUE`
    pub redacted_variables: Vec<String>,
}

impl Default for AnonymizationPolicy {
    fn default() -> Self {
        AnonymizationPolicy {
            placeholder_base: ANONYMOUS_URL_BASE.to_string(),
            context_parameters: CONTEXT_PARAMETERS.iter().map(|p| p.to_string()).collect(),
            redacted_variables: Vec::new(),
        }
    }
}

impl AnonymizationPolicy {
    pub fn with_redacted_variable(mut self, name: impl Into<String>) -> Self {
        self.redacted_variables.push(name.into());
        self
    }

    /// Keep only the context parameters of an encoded query, verbatim
    fn context_query(&self, query: &str) -> String {
        query
            .split('&')
            .filter(|segment| {
                let key = segment.split_once('=').map(|(k, _)| k).unwrap_or(segment);
                self.context_parameters.iter().any(|p| p == key)
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Placeholder url carrying the application context of `real_url`
    pub fn anonymize_url(&self, real_url: &str) -> String {
        let parsed = match Url::parse(real_url) {
            Ok(parsed) => parsed,
            Err(_) => return self.placeholder_base.clone(),
        };

        let mut anonymized = format!(
            "{}?{}",
            self.placeholder_base,
            self.context_query(parsed.query().unwrap_or(""))
        );

        if let Some(hash_query) = parsed.fragment().and_then(|f| f.strip_prefix('?')) {
            let hash_context = self.context_query(hash_query);
            if !hash_context.is_empty() {
                anonymized.push_str("#?");
                anonymized.push_str(&hash_context);
            }
        }

        anonymized
    }

    /// Rewrite an encoded request: placeholder url, no referrer, redacted variables
    pub fn anonymize_request(&self, request: &str) -> String {
        let mut params = RequestParams::parse(request);

        for key in REFERRER_PARAMETERS {
            params.remove(key);
        }

        let real_url = params.get("url").unwrap_or_default();
        params.set("url", &self.anonymize_url(&real_url));

        if !self.redacted_variables.is_empty() {
            for scope in [Scope::Visit, Scope::Page, Scope::Event] {
                if let Some(json) = params.get(scope.parameter()) {
                    params.set(scope.parameter(), &self.redact_variables(&json));
                }
            }
        }

        params.to_string()
    }

    fn redact_variables(&self, json: &str) -> String {
        let mut variables: serde_json::Map<String, Value> = match serde_json::from_str(json) {
            Ok(variables) => variables,
            Err(_) => return json.to_string(),
        };

        for pair in variables.values_mut() {
            let redact = pair
                .get(0)
                .and_then(Value::as_str)
                .map(|name| self.redacted_variables.iter().any(|r| r == name))
                .unwrap_or(false);

            if redact {
                if let Some(value) = pair.get_mut(1) {
                    *value = Value::String(REDACTED_VALUE.to_string());
                }
            }
        }

        serde_json::to_string(&variables).unwrap_or_else(|_| json.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
