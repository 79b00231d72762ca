//! Shared types, errors, session record, and validation results for the Shape form engine.
//!
//! This crate provides the foundational types used across all other Shape crates:
//! - `ShapeError` — unified error taxonomy
//! - `FormSession` — the per-visitor progress record persisted between requests
//! - `ValidationResult` — field- and finisher-level validation outcome
//! - `Message` — user-facing notices accumulated by the runtime

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Unified error type for all Shape subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    // === Expression Errors ===
    #[error("Expression parse error at offset {offset}: {message}")]
    ExpressionParse {
        offset: usize,
        message: String,
        snippet: Option<String>,
    },

    #[error("Expression evaluation failed: {0}")]
    Expression(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Finisher '{identifier}' is not registered")]
    UnknownFinisher { identifier: String },

    #[error("Form definition invalid: {0}")]
    Definition(String),

    // === Runtime Errors ===
    #[error("Finisher '{finisher}' failed: {message}")]
    FinisherFailed { finisher: String, message: String },

    #[error("Page {index} does not exist (form has {count} pages)")]
    PageOutOfRange { index: usize, count: usize },

    #[error("Invalid session token: {0}")]
    SessionToken(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ShapeError {
    /// Returns `true` for authoring/deployment mistakes that must surface loudly
    /// rather than be reported to the visitor.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ShapeError::Configuration(_)
                | ShapeError::UnknownFinisher { .. }
                | ShapeError::Definition(_)
                | ShapeError::ExpressionParse { .. }
        )
    }

    /// Maps the error to an HTTP status code for hosting front-ends.
    pub fn http_status(&self) -> u16 {
        match self {
            ShapeError::PageOutOfRange { .. } => 404,
            ShapeError::SessionToken(_) => 400,
            _ => 500,
        }
    }
}

/// A convenience alias for `Result<T, ShapeError>`.
pub type Result<T> = std::result::Result<T, ShapeError>;

/// Field values as stored in the session, keyed by field name.
pub type Values = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// FormSession — per-visitor progress record
// ---------------------------------------------------------------------------

/// Suffix of the shadow key that mirrors a field's value for "confirm your
/// input" duplicates.
pub const CONFIRM_SUFFIX: &str = "__CONFIRM";

/// The visitor's progress through a multi-page form.
///
/// Created (or loaded) once per visitor, mutated by the runtime during a
/// request and written back by a session store at the end of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSession {
    id: String,
    #[serde(default)]
    pub values: Values,
    /// 1-based page index the visitor resumes on.
    #[serde(default = "default_return_page")]
    pub return_page_index: usize,
    #[serde(default = "chrono::Utc::now")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

fn default_return_page() -> usize {
    1
}

impl FormSession {
    /// Create an empty session with a fresh random id.
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    /// Create an empty session with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: Values::new(),
            return_page_index: 1,
            updated_at: chrono::Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Mark the session as modified now.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }

    /// Encode the session as a URL-safe token suitable for a hidden form field.
    pub fn serialize(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a token produced by [`serialize`](FormSession::serialize).
    pub fn deserialize(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| ShapeError::SessionToken(e.to_string()))?;
        let session: Self = serde_json::from_slice(&bytes)
            .map_err(|e| ShapeError::SessionToken(e.to_string()))?;
        if session.id.is_empty() {
            return Err(ShapeError::SessionToken("empty session id".into()));
        }
        Ok(session)
    }
}

impl Default for FormSession {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ValidationResult
// ---------------------------------------------------------------------------

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub message: String,
    pub code: u64,
    /// Sub-path the error applies to, e.g. the index of one uploaded file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, code: u64) -> Self {
        Self {
            message: message.into(),
            code,
            property: None,
        }
    }

    pub fn for_property(
        property: impl Into<String>,
        message: impl Into<String>,
        code: u64,
    ) -> Self {
        Self {
            message: message.into(),
            code,
            property: Some(property.into()),
        }
    }
}

/// Outcome of validating one field value or one finisher configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Append all errors of `other`.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }
}

impl From<Vec<ValidationError>> for ValidationResult {
    fn from(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }
}

// ---------------------------------------------------------------------------
// Message — notices shown on the form page
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

impl Message {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: MessageKind::Error,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: MessageKind::Info,
        }
    }
}
