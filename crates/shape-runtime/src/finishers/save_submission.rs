use std::path::PathBuf;

use serde_json::{json, Map, Value};

use shape_types::{Result, ShapeError, ValidationResult};

use super::missing_setting;
use crate::finisher::{string_setting, Finisher, FinisherExecutionContext};
use crate::runtime::FormRuntime;

/// Writes the submitted values to `<directory>/<session-id>.json`.
#[derive(Debug, Default)]
pub struct SaveSubmissionFinisher {
    settings: Map<String, Value>,
}

impl SaveSubmissionFinisher {
    fn write(&self, runtime: &FormRuntime) -> std::io::Result<PathBuf> {
        let directory = PathBuf::from(string_setting(&self.settings, "directory").unwrap_or("."));
        std::fs::create_dir_all(&directory)?;
        let path = directory.join(format!("{}.json", runtime.session().id()));
        let record = json!({
            "form": runtime.form().name,
            "formUid": runtime.form().uid,
            "pluginUid": runtime.plugin().uid,
            "sessionId": runtime.session().id(),
            "submittedAt": chrono::Utc::now().to_rfc3339(),
            "values": runtime.session().values,
        });
        let bytes = serde_json::to_vec_pretty(&record)?;
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

impl Finisher for SaveSubmissionFinisher {
    fn identifier(&self) -> &str {
        "save_submission"
    }

    fn set_settings(&mut self, settings: Map<String, Value>) {
        self.settings = settings;
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        if string_setting(&self.settings, "directory").is_none() {
            result.add_error(missing_setting(self.identifier(), "directory"));
        }
        result
    }

    fn execute(
        &mut self,
        runtime: &FormRuntime,
        context: &mut FinisherExecutionContext,
    ) -> Result<()> {
        let path = self.write(runtime).map_err(|e| ShapeError::FinisherFailed {
            finisher: self.identifier().to_string(),
            message: e.to_string(),
        })?;
        tracing::info!(path = %path.display(), "Submission saved");
        context.add_finished_action_argument(
            "saveSubmission",
            json!({ "path": path.display().to_string() }),
        );
        Ok(())
    }
}
