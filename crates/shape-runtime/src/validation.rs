//! Field value validation: built-in rules plus validation hooks.
//!
//! Rules only look at form-control fields whose current condition result is
//! true, so hidden fields pass the built-in rules. Validation hooks still see
//! every form-control field. Empty values are checked by `required` alone,
//! every other rule skips them. Field properties are read through the runtime
//! so per-request overrides apply.

use regex::Regex;
use serde_json::Value;

use shape_expr::{loose_eq, stringify};
use shape_types::{Result, ShapeError, ValidationError, ValidationResult, CONFIRM_SUFFIX};

use crate::hooks::ValueValidationEvent;
use crate::model::Field;
use crate::runtime::FormRuntime;

pub const CODE_REQUIRED: u64 = 1001;
pub const CODE_MIN_LENGTH: u64 = 1002;
pub const CODE_MAX_LENGTH: u64 = 1003;
pub const CODE_PATTERN: u64 = 1004;
pub const CODE_MIN: u64 = 1005;
pub const CODE_MAX: u64 = 1006;
pub const CODE_NOT_A_NUMBER: u64 = 1007;
pub const CODE_INVALID_OPTION: u64 = 1008;
pub const CODE_FILE_TYPE: u64 = 1009;
pub const CODE_CONFIRM_MISMATCH: u64 = 1010;

// ---------------------------------------------------------------------------
// ValueRule trait
// ---------------------------------------------------------------------------

pub trait ValueRule: Send + Sync {
    fn name(&self) -> &str;
    fn check(
        &self,
        runtime: &FormRuntime,
        field: &Field,
        value: &Value,
    ) -> Result<Vec<ValidationError>>;
}

pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn usize_property(runtime: &FormRuntime, field: &Field, key: &str) -> Option<usize> {
    runtime
        .field_property(field, key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .and_then(|n| usize::try_from(n).ok())
}

fn number_property(runtime: &FormRuntime, field: &Field, key: &str) -> Option<f64> {
    runtime.field_property(field, key).and_then(as_number)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Compile a `pattern` property anchored to the whole value.
pub(crate) fn compile_full_match(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| ShapeError::Configuration(format!("invalid pattern '{pattern}': {e}")))
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct RequiredRule;
impl ValueRule for RequiredRule {
    fn name(&self) -> &str {
        "required"
    }
    fn check(
        &self,
        runtime: &FormRuntime,
        field: &Field,
        value: &Value,
    ) -> Result<Vec<ValidationError>> {
        if runtime.is_field_required(field) && is_empty_value(value) {
            return Ok(vec![ValidationError::new("This field is mandatory.", CODE_REQUIRED)]);
        }
        Ok(vec![])
    }
}

struct LengthRule;
impl ValueRule for LengthRule {
    fn name(&self) -> &str {
        "length"
    }
    fn check(
        &self,
        runtime: &FormRuntime,
        field: &Field,
        value: &Value,
    ) -> Result<Vec<ValidationError>> {
        let length = match value {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            _ => return Ok(vec![]),
        };
        let mut errors = Vec::new();
        if let Some(min) = usize_property(runtime, field, "min_length") {
            if length < min {
                errors.push(ValidationError::new(
                    format!("Please enter at least {min} characters."),
                    CODE_MIN_LENGTH,
                ));
            }
        }
        if let Some(max) = usize_property(runtime, field, "max_length") {
            if length > max {
                errors.push(ValidationError::new(
                    format!("Please enter at most {max} characters."),
                    CODE_MAX_LENGTH,
                ));
            }
        }
        Ok(errors)
    }
}

struct PatternRule;
impl ValueRule for PatternRule {
    fn name(&self) -> &str {
        "pattern"
    }
    fn check(
        &self,
        runtime: &FormRuntime,
        field: &Field,
        value: &Value,
    ) -> Result<Vec<ValidationError>> {
        let Some(pattern) = runtime
            .field_property(field, "pattern")
            .and_then(Value::as_str)
        else {
            return Ok(vec![]);
        };
        let re = compile_full_match(pattern)?;
        if re.is_match(&stringify(value)) {
            Ok(vec![])
        } else {
            Ok(vec![ValidationError::new(
                "The value does not match the expected format.",
                CODE_PATTERN,
            )])
        }
    }
}

struct RangeRule;
impl ValueRule for RangeRule {
    fn name(&self) -> &str {
        "range"
    }
    fn check(
        &self,
        runtime: &FormRuntime,
        field: &Field,
        value: &Value,
    ) -> Result<Vec<ValidationError>> {
        let min = number_property(runtime, field, "min");
        let max = number_property(runtime, field, "max");
        if min.is_none() && max.is_none() {
            return Ok(vec![]);
        }
        let Some(number) = as_number(value) else {
            return Ok(vec![ValidationError::new(
                "Please enter a number.",
                CODE_NOT_A_NUMBER,
            )]);
        };
        let mut errors = Vec::new();
        if let Some(min) = min.filter(|min| number < *min) {
            errors.push(ValidationError::new(
                format!("The value must be at least {min}."),
                CODE_MIN,
            ));
        }
        if let Some(max) = max.filter(|max| number > *max) {
            errors.push(ValidationError::new(
                format!("The value must be at most {max}."),
                CODE_MAX,
            ));
        }
        Ok(errors)
    }
}

struct OptionRule;
impl ValueRule for OptionRule {
    fn name(&self) -> &str {
        "option"
    }
    fn check(
        &self,
        runtime: &FormRuntime,
        field: &Field,
        value: &Value,
    ) -> Result<Vec<ValidationError>> {
        let Some(allowed) = runtime.field_option_values(field) else {
            return Ok(vec![]);
        };
        let selected: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        let invalid = selected
            .into_iter()
            .any(|v| !allowed.contains(&stringify(v)));
        if invalid {
            Ok(vec![ValidationError::new(
                "Please choose one of the offered options.",
                CODE_INVALID_OPTION,
            )])
        } else {
            Ok(vec![])
        }
    }
}

/// Matches uploads against an HTML `accept` list such as `.pdf,image/*`.
struct AcceptRule;

impl AcceptRule {
    fn accepts(accept: &[&str], upload: &Value) -> bool {
        let name = upload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mime = upload
            .get("mime_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        accept.iter().any(|entry| {
            let entry = entry.to_ascii_lowercase();
            if entry.starts_with('.') {
                name.ends_with(&entry)
            } else if let Some(major) = entry.strip_suffix("/*") {
                mime.split('/').next() == Some(major) && mime.contains('/')
            } else {
                mime == entry
            }
        })
    }
}

impl ValueRule for AcceptRule {
    fn name(&self) -> &str {
        "accept"
    }
    fn check(
        &self,
        runtime: &FormRuntime,
        field: &Field,
        value: &Value,
    ) -> Result<Vec<ValidationError>> {
        let Some(accept) = runtime
            .field_property(field, "accept")
            .and_then(Value::as_str)
        else {
            return Ok(vec![]);
        };
        let accept: Vec<&str> = accept
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if accept.is_empty() {
            return Ok(vec![]);
        }
        let message = "The file type is not allowed.";
        let errors = match value {
            Value::Array(uploads) => uploads
                .iter()
                .enumerate()
                .filter(|(_, upload)| !Self::accepts(&accept, upload))
                .map(|(i, _)| {
                    ValidationError::for_property(i.to_string(), message, CODE_FILE_TYPE)
                })
                .collect(),
            Value::Object(_) if !Self::accepts(&accept, value) => {
                vec![ValidationError::new(message, CODE_FILE_TYPE)]
            }
            _ => vec![],
        };
        Ok(errors)
    }
}

struct ConfirmRule;
impl ValueRule for ConfirmRule {
    fn name(&self) -> &str {
        "confirm"
    }
    fn check(
        &self,
        runtime: &FormRuntime,
        field: &Field,
        value: &Value,
    ) -> Result<Vec<ValidationError>> {
        let confirm = runtime.field_property(field, "confirm");
        if !confirm.map(shape_expr::is_truthy).unwrap_or(false) {
            return Ok(vec![]);
        }
        let shadow = runtime
            .session()
            .values
            .get(&format!("{}{CONFIRM_SUFFIX}", field.name))
            .unwrap_or(&Value::Null);
        if loose_eq(value, shadow) {
            Ok(vec![])
        } else {
            Ok(vec![ValidationError::new(
                "The confirmation does not match.",
                CODE_CONFIRM_MISMATCH,
            )])
        }
    }
}

// ---------------------------------------------------------------------------
// FieldValueValidator
// ---------------------------------------------------------------------------

pub struct FieldValueValidator {
    rules: Vec<Box<dyn ValueRule>>,
}

impl FieldValueValidator {
    /// A validator with no rules; only hooks contribute errors.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_default_rules() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredRule),
                Box::new(LengthRule),
                Box::new(PatternRule),
                Box::new(RangeRule),
                Box::new(OptionRule),
                Box::new(AcceptRule),
                Box::new(ConfirmRule),
            ],
        }
    }

    pub fn add_rule(&mut self, rule: impl ValueRule + 'static) -> &mut Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Validate `value` as the current value of `field`.
    pub fn validate(
        &self,
        runtime: &FormRuntime,
        field: &Field,
        value: &Value,
    ) -> Result<ValidationResult> {
        if !field.is_form_control() {
            return Ok(ValidationResult::new());
        }

        let mut result = ValidationResult::new();
        let rules: &[Box<dyn ValueRule>] = if runtime.condition_result(field) {
            self.rules.as_slice()
        } else {
            &[]
        };
        for rule in rules {
            if rule.name() != "required" && is_empty_value(value) {
                continue;
            }
            for error in rule.check(runtime, field, value)? {
                result.add_error(error);
            }
        }

        let mut event = ValueValidationEvent::new(runtime, field, value, result);
        runtime
            .services()
            .hooks
            .value_validation
            .dispatch(&mut event, |hook, event| hook(event));
        Ok(event.into_result())
    }
}

impl Default for FieldValueValidator {
    fn default() -> Self {
        Self::with_default_rules()
    }
}
