use serde_json::{json, Map, Value};

use shape_types::{Result, ValidationError, ValidationResult};

use super::{missing_setting, CODE_INVALID_SETTING};
use crate::finisher::{string_setting, Finisher, FinisherExecutionContext, FinisherResponse};
use crate::runtime::FormRuntime;

const DEFAULT_STATUS: u16 = 303;

/// Answers the final submission with a redirect to `url`.
#[derive(Debug, Default)]
pub struct RedirectFinisher {
    settings: Map<String, Value>,
}

impl RedirectFinisher {
    fn status(&self) -> Option<u16> {
        match self.settings.get("status") {
            None | Some(Value::Null) => Some(DEFAULT_STATUS),
            Some(v) => v
                .as_u64()
                .and_then(|s| u16::try_from(s).ok())
                .filter(|s| (300..400).contains(s)),
        }
    }
}

impl Finisher for RedirectFinisher {
    fn identifier(&self) -> &str {
        "redirect"
    }

    fn set_settings(&mut self, settings: Map<String, Value>) {
        self.settings = settings;
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        if string_setting(&self.settings, "url").is_none() {
            result.add_error(missing_setting(self.identifier(), "url"));
        }
        if self.status().is_none() {
            result.add_error(ValidationError::for_property(
                "status",
                "The redirect status must be a 3xx code.",
                CODE_INVALID_SETTING,
            ));
        }
        result
    }

    fn execute(
        &mut self,
        runtime: &FormRuntime,
        context: &mut FinisherExecutionContext,
    ) -> Result<()> {
        let url = string_setting(&self.settings, "url").unwrap_or("/");
        let status = self.status().unwrap_or(DEFAULT_STATUS);
        tracing::info!(form = %runtime.form().name, url, status, "Redirecting after submission");
        context.set_response(FinisherResponse::redirect(url, status));
        context.add_finished_action_argument("redirect", json!({ "url": url }));
        Ok(())
    }
}
