//! Finisher contract, execution context, and the identifier-keyed factory.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use shape_types::{Result, ShapeError, ValidationResult};

use crate::runtime::FormRuntime;

// ---------------------------------------------------------------------------
// Finisher trait
// ---------------------------------------------------------------------------

/// A post-completion action configured per form.
pub trait Finisher: Send {
    /// The identifier the finisher is registered under (e.g. "redirect").
    fn identifier(&self) -> &str;

    fn set_settings(&mut self, settings: Map<String, Value>);

    /// Check the settings before anything in the chain executes.
    fn validate(&self) -> ValidationResult;

    fn execute(
        &mut self,
        runtime: &FormRuntime,
        context: &mut FinisherExecutionContext,
    ) -> Result<()>;
}

/// A non-empty string setting.
pub(crate) fn string_setting<'a>(settings: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinisherResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl FinisherResponse {
    pub fn redirect(url: impl Into<String>, status: u16) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Location".to_string(), url.into());
        Self {
            status,
            headers,
            body: String::new(),
        }
    }
}

/// State shared by the finishers of one `finish_form` attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinisherExecutionContext {
    pub response: Option<FinisherResponse>,
    pub finished_action_arguments: Map<String, Value>,
    cancelled: bool,
}

impl FinisherExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip every finisher after the current one.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn set_response(&mut self, response: FinisherResponse) {
        self.response = Some(response);
    }

    pub fn add_finished_action_argument(&mut self, key: impl Into<String>, value: Value) {
        self.finished_action_arguments.insert(key.into(), value);
    }
}

// ---------------------------------------------------------------------------
// FinisherRegistry
// ---------------------------------------------------------------------------

type FinisherConstructor = Box<dyn Fn() -> Box<dyn Finisher> + Send + Sync>;

pub struct FinisherRegistry {
    constructors: HashMap<String, FinisherConstructor>,
}

impl FinisherRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry with `save_submission`, `redirect`, and `message`.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register_default::<crate::finishers::SaveSubmissionFinisher>("save_submission");
        reg.register_default::<crate::finishers::RedirectFinisher>("redirect");
        reg.register_default::<crate::finishers::MessageFinisher>("message");
        reg
    }

    pub fn register(
        &mut self,
        identifier: impl Into<String>,
        constructor: impl Fn() -> Box<dyn Finisher> + Send + Sync + 'static,
    ) {
        self.constructors.insert(identifier.into(), Box::new(constructor));
    }

    pub fn register_default<F: Finisher + Default + 'static>(&mut self, identifier: &str) {
        self.register(identifier, || Box::new(F::default()) as Box<dyn Finisher>);
    }

    pub fn has(&self, identifier: &str) -> bool {
        self.constructors.contains_key(identifier)
    }

    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Instantiate a finisher. Unknown identifiers are configuration errors.
    pub fn create(&self, identifier: &str) -> Result<Box<dyn Finisher>> {
        let constructor = self
            .constructors
            .get(identifier)
            .ok_or_else(|| ShapeError::UnknownFinisher {
                identifier: identifier.to_string(),
            })?;
        Ok(constructor())
    }
}

impl Default for FinisherRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
