use serde_json::{Map, Value};

use shape_types::{Result, ValidationResult};

use super::missing_setting;
use crate::finisher::{string_setting, Finisher, FinisherExecutionContext};
use crate::runtime::FormRuntime;

/// Records `text` as a finished-action argument; `cancel` stops the chain.
#[derive(Debug, Default)]
pub struct MessageFinisher {
    settings: Map<String, Value>,
}

impl Finisher for MessageFinisher {
    fn identifier(&self) -> &str {
        "message"
    }

    fn set_settings(&mut self, settings: Map<String, Value>) {
        self.settings = settings;
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        if string_setting(&self.settings, "text").is_none() {
            result.add_error(missing_setting(self.identifier(), "text"));
        }
        result
    }

    fn execute(
        &mut self,
        runtime: &FormRuntime,
        context: &mut FinisherExecutionContext,
    ) -> Result<()> {
        let text = string_setting(&self.settings, "text").unwrap_or_default();
        context.add_finished_action_argument("message", Value::String(text.to_string()));
        let cancel = self
            .settings
            .get("cancel")
            .map(shape_expr::is_truthy)
            .unwrap_or(false);
        if cancel {
            tracing::info!(form = %runtime.form().name, "Message finisher cancelled the chain");
            context.cancel();
        }
        Ok(())
    }
}
