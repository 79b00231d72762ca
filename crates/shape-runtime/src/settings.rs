//! Plugin settings and the content-instance record a form is embedded in.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use shape_types::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSettings {
    /// Overrides the content-object identity when matching `pluginUid`.
    pub plugin_uid: Option<u64>,
    /// Base for per-session upload folders, `"<storage>:<path>"` or a plain path.
    pub upload_folder: String,
    /// Body key under which this form's post values arrive.
    pub parsed_body_key: String,
    /// Template handed to the view renderer.
    pub template: String,
    pub spam_protection: SpamProtectionSettings,
    /// Anything else, passed through to views untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            plugin_uid: None,
            upload_folder: "1:/user_upload/shape/".into(),
            parsed_body_key: "tx_shape_form".into(),
            template: "Form".into(),
            spam_protection: SpamProtectionSettings::default(),
            extra: Map::new(),
        }
    }
}

impl FormSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// The upload base with any `<storage>:` prefix stripped.
    pub fn upload_base_path(&self) -> &str {
        match self.upload_folder.split_once(':') {
            Some((_, path)) => path,
            None => &self.upload_folder,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamProtectionSettings {
    pub google_recaptcha: RecaptchaSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecaptchaSettings {
    pub enabled: bool,
    pub secret_key: String,
    pub version: RecaptchaVersion,
    pub minimum_score: f64,
}

impl Default for RecaptchaSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            secret_key: String::new(),
            version: RecaptchaVersion::V2,
            minimum_score: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecaptchaVersion {
    #[default]
    V2,
    V3,
}

/// The content instance the form is rendered in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub uid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl PluginRecord {
    pub fn new(uid: u64) -> Self {
        Self { uid, title: None }
    }
}
