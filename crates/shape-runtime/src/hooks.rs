//! Ordered hook registry for the runtime's extension points.
//!
//! Each extension point owns a [`HookList`]: hooks run in registration order
//! against a mutable event. Points with "first responder wins" semantics stop
//! as soon as a hook records a decision; the others fan out to every hook.

use serde_json::{Map, Value};

use shape_expr::Resolver;
use shape_types::{ValidationError, ValidationResult};

use crate::model::{Field, FinisherConfiguration};
use crate::runtime::FormRuntime;

// ---------------------------------------------------------------------------
// HookList
// ---------------------------------------------------------------------------

/// Events that can end dispatch early.
pub trait Propagation {
    fn is_propagation_stopped(&self) -> bool {
        false
    }
}

pub struct HookList<H: ?Sized> {
    entries: Vec<(String, Box<H>)>,
}

impl<H: ?Sized> Default for HookList<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H: ?Sized> HookList<H> {
    pub fn push(&mut self, name: impl Into<String>, hook: Box<H>) {
        self.entries.push((name.into(), hook));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &H)> {
        self.entries.iter().map(|(name, hook)| (name.as_str(), hook.as_ref()))
    }

    /// Run hooks in order until one stops propagation.
    pub(crate) fn dispatch<E: Propagation>(&self, event: &mut E, call: impl Fn(&H, &mut E)) {
        for (name, hook) in &self.entries {
            if event.is_propagation_stopped() {
                break;
            }
            tracing::trace!(hook = %name, "Dispatching hook");
            call(hook, event);
            if event.is_propagation_stopped() {
                tracing::debug!(hook = %name, "Hook stopped propagation");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Variables being assembled for an expression resolver.
pub struct ResolverCreationEvent<'a> {
    pub runtime: &'a FormRuntime,
    variables: Map<String, Value>,
}

impl<'a> ResolverCreationEvent<'a> {
    pub(crate) fn new(runtime: &'a FormRuntime, variables: Map<String, Value>) -> Self {
        Self { runtime, variables }
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    /// Merge `variables`, overriding existing keys.
    pub fn add_variables(&mut self, variables: Map<String, Value>) {
        self.variables.extend(variables);
    }

    pub(crate) fn into_variables(self) -> Map<String, Value> {
        self.variables
    }
}

impl Propagation for ResolverCreationEvent<'_> {}

/// View variables about to be handed to the renderer.
pub struct BeforeRenderEvent<'a> {
    pub runtime: &'a FormRuntime,
    pub page_index: usize,
    variables: Map<String, Value>,
}

impl<'a> BeforeRenderEvent<'a> {
    pub(crate) fn new(
        runtime: &'a FormRuntime,
        page_index: usize,
        variables: Map<String, Value>,
    ) -> Self {
        Self {
            runtime,
            page_index,
            variables,
        }
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn add_variables(&mut self, variables: Map<String, Value>) {
        self.variables.extend(variables);
    }

    pub(crate) fn into_variables(self) -> Map<String, Value> {
        self.variables
    }
}

impl Propagation for BeforeRenderEvent<'_> {}

/// Lets a hook decide whether a finisher runs. The first decision wins.
pub struct FinisherConditionEvent<'a> {
    pub runtime: &'a FormRuntime,
    pub configuration: &'a FinisherConfiguration,
    pub resolver: &'a Resolver,
    decision: Option<bool>,
}

impl<'a> FinisherConditionEvent<'a> {
    pub(crate) fn new(
        runtime: &'a FormRuntime,
        configuration: &'a FinisherConfiguration,
        resolver: &'a Resolver,
    ) -> Self {
        Self {
            runtime,
            configuration,
            resolver,
            decision: None,
        }
    }

    pub fn decide(&mut self, include: bool) {
        self.decision = Some(include);
    }

    pub fn decision(&self) -> Option<bool> {
        self.decision
    }
}

impl Propagation for FinisherConditionEvent<'_> {
    fn is_propagation_stopped(&self) -> bool {
        self.decision.is_some()
    }
}

/// Identifier and settings a finisher is about to be created with.
pub struct BeforeFinisherCreationEvent<'a> {
    pub runtime: &'a FormRuntime,
    pub configuration: &'a FinisherConfiguration,
    pub identifier: String,
    pub settings: Map<String, Value>,
}

impl Propagation for BeforeFinisherCreationEvent<'_> {}

/// Field validation outcome, open for additional errors.
pub struct ValueValidationEvent<'a> {
    pub runtime: &'a FormRuntime,
    pub field: &'a Field,
    pub value: &'a Value,
    result: ValidationResult,
}

impl<'a> ValueValidationEvent<'a> {
    pub(crate) fn new(
        runtime: &'a FormRuntime,
        field: &'a Field,
        value: &'a Value,
        result: ValidationResult,
    ) -> Self {
        Self {
            runtime,
            field,
            value,
            result,
        }
    }

    pub fn result(&self) -> &ValidationResult {
        &self.result
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.result.add_error(error);
    }

    pub(crate) fn into_result(self) -> ValidationResult {
        self.result
    }
}

impl Propagation for ValueValidationEvent<'_> {}

/// A field value offered for serialization or processing. The first hook to
/// supply a replacement wins.
pub struct ValueEvent<'a> {
    pub runtime: &'a FormRuntime,
    pub field: &'a Field,
    pub value: &'a Value,
    replacement: Option<Value>,
}

impl<'a> ValueEvent<'a> {
    pub(crate) fn new(runtime: &'a FormRuntime, field: &'a Field, value: &'a Value) -> Self {
        Self {
            runtime,
            field,
            value,
            replacement: None,
        }
    }

    pub fn replace(&mut self, value: Value) {
        self.replacement = Some(value);
    }

    pub(crate) fn into_replacement(self) -> Option<Value> {
        self.replacement
    }
}

impl Propagation for ValueEvent<'_> {
    fn is_propagation_stopped(&self) -> bool {
        self.replacement.is_some()
    }
}

/// Spam reasons collected from every analysis hook.
pub struct SpamAnalysisEvent<'a> {
    pub runtime: &'a FormRuntime,
    reasons: Map<String, Value>,
}

impl<'a> SpamAnalysisEvent<'a> {
    pub(crate) fn new(runtime: &'a FormRuntime) -> Self {
        Self {
            runtime,
            reasons: Map::new(),
        }
    }

    pub fn add_reason(&mut self, key: impl Into<String>, detail: Value) {
        self.reasons.insert(key.into(), detail);
    }

    pub fn reasons(&self) -> &Map<String, Value> {
        &self.reasons
    }

    pub(crate) fn into_reasons(self) -> Map<String, Value> {
        self.reasons
    }
}

impl Propagation for SpamAnalysisEvent<'_> {}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

pub type RuntimeCreatedHook = dyn Fn(&mut FormRuntime) + Send + Sync;
pub type ResolverCreationHook = dyn Fn(&mut ResolverCreationEvent<'_>) + Send + Sync;
pub type BeforeRenderHook = dyn Fn(&mut BeforeRenderEvent<'_>) + Send + Sync;
pub type FinisherConditionHook = dyn Fn(&mut FinisherConditionEvent<'_>) + Send + Sync;
pub type BeforeFinisherCreationHook = dyn Fn(&mut BeforeFinisherCreationEvent<'_>) + Send + Sync;
pub type ValueValidationHook = dyn Fn(&mut ValueValidationEvent<'_>) + Send + Sync;
pub type ValueHook = dyn Fn(&mut ValueEvent<'_>) + Send + Sync;
pub type SpamAnalysisHook = dyn Fn(&mut SpamAnalysisEvent<'_>) + Send + Sync;

/// All extension points of the runtime.
#[derive(Default)]
pub struct Hooks {
    pub(crate) runtime_created: HookList<RuntimeCreatedHook>,
    pub(crate) resolver_creation: HookList<ResolverCreationHook>,
    pub(crate) before_render: HookList<BeforeRenderHook>,
    pub(crate) finisher_condition: HookList<FinisherConditionHook>,
    pub(crate) before_finisher_creation: HookList<BeforeFinisherCreationHook>,
    pub(crate) value_validation: HookList<ValueValidationHook>,
    pub(crate) value_serialization: HookList<ValueHook>,
    pub(crate) value_processing: HookList<ValueHook>,
    pub(crate) spam_analysis: HookList<SpamAnalysisHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs once per runtime, right after session hydration.
    pub fn on_runtime_created(
        &mut self,
        name: &str,
        hook: impl Fn(&mut FormRuntime) + Send + Sync + 'static,
    ) -> &mut Self {
        self.runtime_created.push(name, Box::new(hook));
        self
    }

    pub fn on_resolver_creation(
        &mut self,
        name: &str,
        hook: impl Fn(&mut ResolverCreationEvent<'_>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.resolver_creation.push(name, Box::new(hook));
        self
    }

    pub fn on_before_render(
        &mut self,
        name: &str,
        hook: impl Fn(&mut BeforeRenderEvent<'_>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.before_render.push(name, Box::new(hook));
        self
    }

    pub fn on_finisher_condition(
        &mut self,
        name: &str,
        hook: impl Fn(&mut FinisherConditionEvent<'_>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.finisher_condition.push(name, Box::new(hook));
        self
    }

    pub fn on_before_finisher_creation(
        &mut self,
        name: &str,
        hook: impl Fn(&mut BeforeFinisherCreationEvent<'_>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.before_finisher_creation.push(name, Box::new(hook));
        self
    }

    pub fn on_value_validation(
        &mut self,
        name: &str,
        hook: impl Fn(&mut ValueValidationEvent<'_>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.value_validation.push(name, Box::new(hook));
        self
    }

    pub fn on_value_serialization(
        &mut self,
        name: &str,
        hook: impl Fn(&mut ValueEvent<'_>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.value_serialization.push(name, Box::new(hook));
        self
    }

    pub fn on_value_processing(
        &mut self,
        name: &str,
        hook: impl Fn(&mut ValueEvent<'_>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.value_processing.push(name, Box::new(hook));
        self
    }

    pub fn on_spam_analysis(
        &mut self,
        name: &str,
        hook: impl Fn(&mut SpamAnalysisEvent<'_>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.spam_analysis.push(name, Box::new(hook));
        self
    }

    pub fn spam_analysis_hooks(&self) -> &HookList<SpamAnalysisHook> {
        &self.spam_analysis
    }
}
