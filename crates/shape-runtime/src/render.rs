//! View rendering contract.

use serde_json::{json, Map, Value};

use shape_types::Result;

/// Turns a template name and the view variables into output.
pub trait ViewRenderer: Send + Sync {
    fn render(&self, template: &str, variables: &Map<String, Value>) -> Result<String>;
}

/// Renders the view variables as a JSON document; used by the CLI and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonViewRenderer {
    pub pretty: bool,
}

impl ViewRenderer for JsonViewRenderer {
    fn render(&self, template: &str, variables: &Map<String, Value>) -> Result<String> {
        let document = json!({ "template": template, "variables": variables });
        let output = if self.pretty {
            serde_json::to_string_pretty(&document)?
        } else {
            serde_json::to_string(&document)?
        };
        Ok(output)
    }
}
