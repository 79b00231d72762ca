//! Form definition model: pages, fields, and finisher configurations.
//!
//! A [`Form`] is loaded once per request from JSON and shared read-only with
//! the runtime. Field kinds are derived while loading so the pipeline stages
//! dispatch on [`FieldKind`] instead of probing capabilities.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use shape_types::{Result, ShapeError};

/// Field types that render content but never carry a value.
const PRESENTATIONAL_TYPES: &[&str] = &["content", "header", "divider", "html", "text-block"];

// ---------------------------------------------------------------------------
// Form / Page
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Form {
    pub uid: u64,
    pub name: String,
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default, rename = "finishers")]
    pub finisher_configurations: Vec<FinisherConfiguration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// Discriminator exposed to expressions as `stepType`.
    #[serde(rename = "type", default = "default_page_type")]
    pub page_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

fn default_page_type() -> String {
    "page".into()
}

impl Form {
    /// Parse a definition and check the invariants the runtime relies on.
    pub fn from_json(json: &str) -> Result<Self> {
        let form: Form = serde_json::from_str(json)
            .map_err(|e| ShapeError::Definition(e.to_string()))?;
        form.check()?;
        Ok(form)
    }

    fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for field in self.fields().filter(|f| f.is_form_control()) {
            if field.name.is_empty() {
                return Err(ShapeError::Definition(format!(
                    "form '{}' has a '{}' field without a name",
                    self.name, field.field_type
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ShapeError::Definition(format!(
                    "field name '{}' is used more than once in form '{}'",
                    field.name, self.name
                )));
            }
        }
        Ok(())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Look up a page by its 1-based index.
    pub fn page(&self, index: usize) -> Option<&Page> {
        index.checked_sub(1).and_then(|i| self.pages.get(i))
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.pages.iter().flat_map(|p| p.fields.iter())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields().find(|f| f.is_form_control() && f.name == name)
    }
}

impl Page {
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    #[serde(default)]
    pub label: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Plain input carrying a value.
    Control,
    /// Input restricted to a list of options.
    Choice { options: Vec<FieldOption> },
    /// Content element; never validated, serialized, or stored.
    Presentational,
}

/// One element of a page.
///
/// Unknown definition keys (`required`, `pattern`, `label`, ...) are kept in
/// `properties` for the validator, hooks, and templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FieldDefinition", into = "FieldDefinition")]
pub struct Field {
    pub name: String,
    pub field_type: String,
    pub kind: FieldKind,
    pub default_value: Value,
    pub condition: Option<String>,
    pub properties: Map<String, Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        let field_type = field_type.into();
        let kind = if PRESENTATIONAL_TYPES.contains(&field_type.as_str()) {
            FieldKind::Presentational
        } else {
            FieldKind::Control
        };
        Self {
            name: name.into(),
            field_type,
            kind,
            default_value: Value::Null,
            condition: None,
            properties: Map::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<FieldOption>) -> Self {
        self.kind = FieldKind::Choice { options };
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn is_form_control(&self) -> bool {
        !matches!(self.kind, FieldKind::Presentational)
    }

    pub fn options(&self) -> Option<&[FieldOption]> {
        match &self.kind {
            FieldKind::Choice { options } => Some(options),
            _ => None,
        }
    }

    /// Option values rendered as strings, for membership checks.
    pub fn option_values(&self) -> Option<Vec<String>> {
        self.options()
            .map(|opts| opts.iter().map(|o| shape_expr::stringify(&o.value)).collect())
    }

    /// The declared condition, treating an empty string as absent.
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).filter(|v| !v.is_null())
    }

    pub fn is_required(&self) -> bool {
        self.property("required")
            .map(shape_expr::is_truthy)
            .unwrap_or(false)
    }
}

/// Wire shape of a field in a form definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldDefinition {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    options: Option<Vec<FieldOption>>,
    #[serde(flatten)]
    properties: Map<String, Value>,
}

impl From<FieldDefinition> for Field {
    fn from(def: FieldDefinition) -> Self {
        let mut field = Field::new(def.name, def.field_type);
        if field.is_form_control() {
            if let Some(options) = def.options {
                field.kind = FieldKind::Choice { options };
            }
        }
        field.default_value = def.value;
        field.condition = def.condition;
        field.properties = def.properties;
        field
    }
}

impl From<Field> for FieldDefinition {
    fn from(field: Field) -> Self {
        let options = match field.kind {
            FieldKind::Choice { options } => Some(options),
            _ => None,
        };
        Self {
            name: field.name,
            field_type: field.field_type,
            value: field.default_value,
            condition: field.condition,
            options,
            properties: field.properties,
        }
    }
}

// ---------------------------------------------------------------------------
// FinisherConfiguration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinisherConfiguration {
    #[serde(rename = "finisher")]
    pub identifier: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl FinisherConfiguration {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            settings: Map::new(),
            condition: None,
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}
