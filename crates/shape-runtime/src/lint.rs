//! Form definition lints.
//!
//! Call [`lint`] for advisory diagnostics or [`lint_or_raise`] to fail on any
//! `Error`-severity issue before a definition is served to visitors.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use shape_types::{Result, ShapeError, CONFIRM_SUFFIX};

use crate::finisher::FinisherRegistry;
use crate::model::Form;
use crate::validation::compile_full_match;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub field: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Diagnostic {
    fn error(rule: &str, message: String) -> Self {
        Self {
            rule: rule.into(),
            severity: Severity::Error,
            message,
            field: None,
            fix: None,
        }
    }

    fn warning(rule: &str, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(rule, message)
        }
    }

    fn on_field(mut self, name: &str) -> Self {
        self.field = Some(name.to_string());
        self
    }

    fn with_fix(mut self, fix: &str) -> Self {
        self.fix = Some(fix.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, form: &Form, finishers: &FinisherRegistry) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct HasPagesRule;
impl LintRule for HasPagesRule {
    fn name(&self) -> &str {
        "has_pages"
    }
    fn apply(&self, form: &Form, _: &FinisherRegistry) -> Vec<Diagnostic> {
        if form.pages.is_empty() {
            vec![Diagnostic::error(self.name(), format!("Form '{}' has no pages", form.name))
                .with_fix("Add at least one page")]
        } else {
            vec![]
        }
    }
}

struct UniqueFieldNamesRule;
impl LintRule for UniqueFieldNamesRule {
    fn name(&self) -> &str {
        "unique_field_names"
    }
    fn apply(&self, form: &Form, _: &FinisherRegistry) -> Vec<Diagnostic> {
        let mut seen = HashSet::new();
        form.fields()
            .filter(|f| f.is_form_control())
            .filter(|f| !seen.insert(f.name.as_str()))
            .map(|f| {
                Diagnostic::error(
                    self.name(),
                    format!("Field name '{}' is used more than once", f.name),
                )
                .on_field(&f.name)
            })
            .collect()
    }
}

struct ConfirmHasBaseRule;
impl LintRule for ConfirmHasBaseRule {
    fn name(&self) -> &str {
        "confirm_has_base"
    }
    fn apply(&self, form: &Form, _: &FinisherRegistry) -> Vec<Diagnostic> {
        form.fields()
            .filter_map(|f| {
                let base = f.name.strip_suffix(CONFIRM_SUFFIX)?;
                if form.field(base).is_some() {
                    None
                } else {
                    Some(
                        Diagnostic::warning(
                            self.name(),
                            format!(
                                "Confirmation field '{}' has no field '{base}' to confirm",
                                f.name
                            ),
                        )
                        .on_field(&f.name),
                    )
                }
            })
            .collect()
    }
}

struct ConditionSyntaxRule;
impl LintRule for ConditionSyntaxRule {
    fn name(&self) -> &str {
        "condition_syntax"
    }
    fn apply(&self, form: &Form, _: &FinisherRegistry) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for field in form.fields() {
            if let Some(condition) = field.condition() {
                if let Err(e) = shape_expr::parse(condition) {
                    diags.push(
                        Diagnostic::error(
                            self.name(),
                            format!("Invalid condition on field '{}': {e}", field.name),
                        )
                        .on_field(&field.name),
                    );
                }
            }
        }
        for configuration in &form.finisher_configurations {
            if let Some(condition) = configuration.condition() {
                if let Err(e) = shape_expr::parse(condition) {
                    diags.push(Diagnostic::error(
                        self.name(),
                        format!(
                            "Invalid condition on finisher '{}': {e}",
                            configuration.identifier
                        ),
                    ));
                }
            }
        }
        diags
    }
}

struct PatternSyntaxRule;
impl LintRule for PatternSyntaxRule {
    fn name(&self) -> &str {
        "pattern_syntax"
    }
    fn apply(&self, form: &Form, _: &FinisherRegistry) -> Vec<Diagnostic> {
        form.fields()
            .filter_map(|f| {
                let pattern = f.property("pattern").and_then(Value::as_str)?;
                let err = compile_full_match(pattern).err()?;
                Some(Diagnostic::error(self.name(), err.to_string()).on_field(&f.name))
            })
            .collect()
    }
}

struct FinisherRegisteredRule;
impl LintRule for FinisherRegisteredRule {
    fn name(&self) -> &str {
        "finisher_registered"
    }
    fn apply(&self, form: &Form, finishers: &FinisherRegistry) -> Vec<Diagnostic> {
        form.finisher_configurations
            .iter()
            .filter(|c| !finishers.has(&c.identifier))
            .map(|c| {
                Diagnostic::error(
                    self.name(),
                    format!("Finisher '{}' is not registered", c.identifier),
                )
                .with_fix(&format!("Use one of: {}", finishers.identifiers().join(", ")))
            })
            .collect()
    }
}

/// Static settings check; hooks may still rewrite settings at runtime.
struct FinisherSettingsRule;
impl LintRule for FinisherSettingsRule {
    fn name(&self) -> &str {
        "finisher_settings"
    }
    fn apply(&self, form: &Form, finishers: &FinisherRegistry) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for configuration in &form.finisher_configurations {
            let Ok(mut finisher) = finishers.create(&configuration.identifier) else {
                continue;
            };
            finisher.set_settings(configuration.settings.clone());
            for error in finisher.validate().errors() {
                diags.push(Diagnostic::warning(
                    self.name(),
                    format!("Finisher '{}': {}", configuration.identifier, error.message),
                ));
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

pub fn lint(form: &Form, finishers: &FinisherRegistry) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(HasPagesRule),
        Box::new(UniqueFieldNamesRule),
        Box::new(ConfirmHasBaseRule),
        Box::new(ConditionSyntaxRule),
        Box::new(PatternSyntaxRule),
        Box::new(FinisherRegisteredRule),
        Box::new(FinisherSettingsRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(form, finishers));
    }
    diagnostics
}

/// Run all lints; return `Err` if any `Error`-severity diagnostic is found.
pub fn lint_or_raise(form: &Form, finishers: &FinisherRegistry) -> Result<Vec<Diagnostic>> {
    let diagnostics = lint(form, finishers);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(ShapeError::Definition(errors.join("; ")));
    }
    Ok(diagnostics)
}
