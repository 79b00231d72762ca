//! Inbound request model.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One HTTP-style request as seen by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormRequest {
    pub method: String,
    /// Query arguments, e.g. `pluginUid`.
    pub arguments: Map<String, Value>,
    /// Decoded request body.
    pub parsed_body: Map<String, Value>,
    pub attributes: RequestAttributes,
}

/// Values resolved by the hosting application before the form runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestAttributes {
    pub site: Value,
    pub frontend_user: Value,
    /// Identity of the content object currently being rendered.
    pub current_content_uid: Option<u64>,
    /// Client address, forwarded to third-party verifiers.
    pub remote_address: Option<String>,
}

impl FormRequest {
    pub fn get() -> Self {
        Self {
            method: "GET".into(),
            ..Default::default()
        }
    }

    /// A POST whose body carries `values` under `body_key`.
    pub fn post(body_key: &str, values: Map<String, Value>) -> Self {
        let mut parsed_body = Map::new();
        parsed_body.insert(body_key.to_string(), Value::Object(values));
        Self {
            method: "POST".into(),
            parsed_body,
            ..Default::default()
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    pub fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }

    pub fn argument(&self, key: &str) -> Option<&Value> {
        self.arguments.get(key).filter(|v| !v.is_null())
    }

    /// Post values submitted under `body_key`, empty when absent.
    pub fn post_values(&self, body_key: &str) -> Map<String, Value> {
        match self.parsed_body.get(body_key) {
            Some(Value::Object(values)) => values.clone(),
            _ => Map::new(),
        }
    }

    /// Read-only view exposed to expressions as `request`.
    pub fn expression_view(&self) -> Value {
        json!({
            "method": self.method,
            "arguments": self.arguments,
            "parsedBody": self.parsed_body,
        })
    }
}
