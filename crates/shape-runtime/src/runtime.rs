//! The form runtime: drives one form instance through a single request.
//!
//! A [`FormRuntime`] is built per request from an immutable [`Form`], the
//! visitor's [`FormSession`], and the inbound [`FormRequest`]. It owns the
//! session for the duration of the request. Per-field state (session value,
//! condition result, validation result, property overrides) lives in a side
//! table parallel to the form's pages so the definition itself stays shared
//! and read-only.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use shape_expr::Resolver;
use shape_types::{FormSession, Message, Result, ShapeError, ValidationResult, CONFIRM_SUFFIX};

use crate::condition;
use crate::finisher::{Finisher, FinisherExecutionContext, FinisherRegistry};
use crate::hooks::{
    BeforeFinisherCreationEvent, BeforeRenderEvent, FinisherConditionEvent, Hooks,
    ResolverCreationEvent, SpamAnalysisEvent,
};
use crate::model::{Field, FinisherConfiguration, Form, Page};
use crate::processing;
use crate::render::{JsonViewRenderer, ViewRenderer};
use crate::request::FormRequest;
use crate::serialization;
use crate::settings::{FormSettings, PluginRecord};
use crate::validation::FieldValueValidator;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Collaborators shared by every runtime of a deployment.
pub struct RuntimeServices {
    pub hooks: Hooks,
    pub finishers: FinisherRegistry,
    pub validator: FieldValueValidator,
    pub renderer: Box<dyn ViewRenderer>,
}

impl RuntimeServices {
    pub fn new() -> Self {
        Self {
            hooks: Hooks::new(),
            finishers: FinisherRegistry::with_builtins(),
            validator: FieldValueValidator::with_default_rules(),
            renderer: Box::new(JsonViewRenderer::default()),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_finishers(mut self, finishers: FinisherRegistry) -> Self {
        self.finishers = finishers;
        self
    }

    pub fn with_renderer(mut self, renderer: impl ViewRenderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }
}

impl Default for RuntimeServices {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one request binds a runtime to.
pub struct RuntimeInput {
    pub form: Arc<Form>,
    pub session: FormSession,
    pub request: FormRequest,
    pub settings: FormSettings,
    pub plugin: PluginRecord,
    pub is_step_back: bool,
}

impl RuntimeInput {
    pub fn new(form: Arc<Form>, session: FormSession) -> Self {
        Self {
            form,
            session,
            request: FormRequest::get(),
            settings: FormSettings::default(),
            plugin: PluginRecord::default(),
            is_step_back: false,
        }
    }

    pub fn with_request(mut self, request: FormRequest) -> Self {
        self.request = request;
        self
    }

    pub fn with_settings(mut self, settings: FormSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_plugin(mut self, plugin: PluginRecord) -> Self {
        self.plugin = plugin;
        self
    }

    pub fn step_back(mut self, is_step_back: bool) -> Self {
        self.is_step_back = is_step_back;
        self
    }
}

/// Mutable per-request state of one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldState {
    pub session_value: Value,
    pub condition_result: bool,
    pub validation_result: Option<ValidationResult>,
    /// Properties replaced for this request only; they win over the definition.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub overrides: Map<String, Value>,
}

impl FieldState {
    fn for_field(field: &Field) -> Self {
        Self {
            session_value: field.default_value.clone(),
            condition_result: true,
            validation_result: None,
            overrides: Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// FormRuntime
// ---------------------------------------------------------------------------

pub struct FormRuntime {
    services: Arc<RuntimeServices>,
    form: Arc<Form>,
    session: FormSession,
    request: FormRequest,
    settings: FormSettings,
    plugin: PluginRecord,
    post_values: Map<String, Value>,
    is_step_back: bool,
    field_states: Vec<Vec<FieldState>>,
    /// Form-control field name to (page, field) position.
    positions: HashMap<String, (usize, usize)>,
    messages: Vec<Message>,
    spam_reasons: Option<Map<String, Value>>,
    has_errors: bool,
}

impl FormRuntime {
    /// Bind a runtime to one request, hydrate field values from the session,
    /// then run the runtime-created hooks.
    pub fn new(services: Arc<RuntimeServices>, input: RuntimeInput) -> Self {
        let post_values = input.request.post_values(&input.settings.parsed_body_key);
        let field_states = input
            .form
            .pages
            .iter()
            .map(|page| page.fields.iter().map(FieldState::for_field).collect())
            .collect();
        let mut positions = HashMap::new();
        for (pi, page) in input.form.pages.iter().enumerate() {
            for (fi, field) in page.fields.iter().enumerate() {
                if field.is_form_control() {
                    positions.insert(field.name.clone(), (pi, fi));
                }
            }
        }

        let mut runtime = Self {
            services,
            form: input.form,
            session: input.session,
            request: input.request,
            settings: input.settings,
            plugin: input.plugin,
            post_values,
            is_step_back: input.is_step_back,
            field_states,
            positions,
            messages: Vec::new(),
            spam_reasons: None,
            has_errors: false,
        };
        runtime.hydrate();

        tracing::debug!(
            form = %runtime.form.name,
            session = runtime.session.id(),
            step_back = runtime.is_step_back,
            "Form runtime created"
        );

        let services = Arc::clone(&runtime.services);
        for (name, hook) in services.hooks.runtime_created.iter() {
            tracing::trace!(hook = name, "Dispatching runtime-created hook");
            hook(&mut runtime);
        }
        runtime
    }

    /// Copy session values into the per-field mirrors. Fields without a
    /// session entry keep their declared default. Called by [`new`](Self::new).
    pub fn hydrate(&mut self) {
        for (name, &(pi, fi)) in &self.positions {
            if let Some(value) = self.session.values.get(name) {
                self.field_states[pi][fi].session_value = value.clone();
            }
        }
    }

    // ---- Accessors ----

    pub fn services(&self) -> &RuntimeServices {
        &self.services
    }

    pub fn form(&self) -> &Form {
        &self.form
    }

    pub fn session(&self) -> &FormSession {
        &self.session
    }

    /// Hand the session back for persistence at the end of the request.
    pub fn into_session(self) -> FormSession {
        self.session
    }

    pub fn request(&self) -> &FormRequest {
        &self.request
    }

    pub fn settings(&self) -> &FormSettings {
        &self.settings
    }

    pub fn plugin(&self) -> &PluginRecord {
        &self.plugin
    }

    pub fn post_values(&self) -> &Map<String, Value> {
        &self.post_values
    }

    pub fn is_step_back(&self) -> bool {
        self.is_step_back
    }

    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn spam_reasons(&self) -> Option<&Map<String, Value>> {
        self.spam_reasons.as_ref()
    }

    /// State of the form-control field called `name`.
    pub fn field_state(&self, name: &str) -> Option<&FieldState> {
        self.positions
            .get(name)
            .map(|&(pi, fi)| &self.field_states[pi][fi])
    }

    /// State of the field at a 1-based page index and 0-based field index.
    pub fn field_state_at(&self, page_index: usize, field_index: usize) -> Option<&FieldState> {
        page_index
            .checked_sub(1)
            .and_then(|pi| self.field_states.get(pi))
            .and_then(|page| page.get(field_index))
    }

    /// Replace property `key` of the form-control field `name` until the end of
    /// the request. A `null` value removes the property. Returns false when no
    /// such field exists.
    pub fn override_field_property(&mut self, name: &str, key: &str, value: Value) -> bool {
        let Some(&(pi, fi)) = self.positions.get(name) else {
            return false;
        };
        tracing::debug!(field = name, key, "Field property overridden");
        self.field_states[pi][fi].overrides.insert(key.to_string(), value);
        true
    }

    fn overrides(&self, field: &Field) -> Option<&Map<String, Value>> {
        self.field_state(&field.name)
            .map(|state| &state.overrides)
            .filter(|overrides| !overrides.is_empty())
    }

    /// Property `key` of `field`, with request overrides applied.
    pub fn field_property<'a>(&'a self, field: &'a Field, key: &str) -> Option<&'a Value> {
        match self.overrides(field).and_then(|o| o.get(key)) {
            Some(value) => Some(value).filter(|v| !v.is_null()),
            None => field.property(key),
        }
    }

    pub fn is_field_required(&self, field: &Field) -> bool {
        self.field_property(field, "required")
            .map(shape_expr::is_truthy)
            .unwrap_or(false)
    }

    /// Offered option values as strings. An `options` override replaces the
    /// declared list; its entries are either `{"value": ..}` objects or bare
    /// values.
    pub fn field_option_values(&self, field: &Field) -> Option<Vec<String>> {
        let Some(overridden) = self.overrides(field).and_then(|o| o.get("options")) else {
            return field.option_values();
        };
        let options = overridden.as_array()?;
        Some(
            options
                .iter()
                .map(|option| shape_expr::stringify(option.get("value").unwrap_or(option)))
                .collect(),
        )
    }

    /// Definition of `field` as the view sees it, overrides merged in.
    fn field_view(&self, field: &Field) -> Result<Value> {
        let mut view = serde_json::to_value(field)?;
        if let (Some(overrides), Value::Object(map)) = (self.overrides(field), &mut view) {
            for (key, value) in overrides {
                if value.is_null() {
                    map.remove(key);
                } else {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(view)
    }

    /// Last computed condition result; fields not yet resolved count as visible.
    pub fn condition_result(&self, field: &Field) -> bool {
        self.field_state(&field.name)
            .map(|state| state.condition_result)
            .unwrap_or(true)
    }

    /// `<upload base><session id>/`.
    pub fn session_upload_folder(&self) -> String {
        format!("{}{}/", self.settings.upload_base_path(), self.session.id())
    }

    // ---- Request matching ----

    /// Whether this request targets this plugin instance. Requests without a
    /// `pluginUid` argument match every instance.
    pub fn is_requested_plugin(&self) -> bool {
        let Some(requested) = self.request.argument("pluginUid") else {
            return true;
        };
        let uid = self
            .settings
            .plugin_uid
            .filter(|uid| *uid != 0)
            .or(self.request.attributes.current_content_uid)
            .map(Value::from)
            .unwrap_or_else(|| requested.clone());
        shape_expr::stringify(requested) == shape_expr::stringify(&uid)
    }

    pub fn is_form_post_request(&self) -> bool {
        self.request.is_post()
            && self
                .request
                .parsed_body
                .contains_key(&self.settings.parsed_body_key)
    }

    // ---- Spam ----

    /// Run the spam-analysis hooks and remember the reasons for rendering.
    pub fn find_spam_reasons(&mut self) -> &Map<String, Value> {
        let mut event = SpamAnalysisEvent::new(self);
        self.services
            .hooks
            .spam_analysis
            .dispatch(&mut event, |hook, event| hook(event));
        let reasons = event.into_reasons();
        if !reasons.is_empty() {
            tracing::info!(
                form = %self.form.name,
                reasons = ?reasons.keys().collect::<Vec<_>>(),
                "Submission flagged as spam"
            );
        }
        self.spam_reasons.insert(reasons)
    }

    // ---- Expressions ----

    /// Summary of the runtime exposed to expressions as `formRuntime`.
    fn expression_view(&self) -> Value {
        json!({
            "formName": self.form.name,
            "formUid": self.form.uid,
            "pageCount": self.form.page_count(),
            "pluginUid": self.plugin.uid,
            "sessionId": self.session.id(),
            "hasErrors": self.has_errors,
            "isStepBack": self.is_step_back,
        })
    }

    /// Build a resolver over the runtime, session values, request, site, and
    /// visitor, overlaid with `variables`, then passed through the
    /// resolver-creation hooks.
    pub fn create_expression_resolver(&self, variables: Map<String, Value>) -> Resolver {
        let mut merged = Map::new();
        merged.insert("formRuntime".into(), self.expression_view());
        merged.insert("formValues".into(), Value::Object(self.session.values.clone()));
        merged.insert("request".into(), self.request.expression_view());
        merged.insert("site".into(), self.request.attributes.site.clone());
        merged.insert(
            "frontendUser".into(),
            self.request.attributes.frontend_user.clone(),
        );
        merged.extend(variables);

        let mut event = ResolverCreationEvent::new(self, merged);
        self.services
            .hooks
            .resolver_creation
            .dispatch(&mut event, |hook, event| hook(event));
        Resolver::new(event.into_variables())
    }

    fn page_resolver(&self, page: &Page) -> Resolver {
        let mut variables = Map::new();
        variables.insert("stepType".into(), Value::String(page.page_type.clone()));
        self.create_expression_resolver(variables)
    }

    fn resolve_conditions(&mut self, page_position: usize, resolver: &Resolver) -> Result<()> {
        let form = Arc::clone(&self.form);
        for (fi, field) in form.pages[page_position].fields.iter().enumerate() {
            let visible = condition::evaluate(self, field, resolver)?;
            self.field_states[page_position][fi].condition_result = visible;
        }
        Ok(())
    }

    // ---- Rendering ----

    /// Render page `page_index` (1-based).
    ///
    /// Conditions are resolved for every field of every page, scoped to the
    /// target page's type, so templates can branch on any field's visibility.
    pub fn render_page(&mut self, page_index: usize) -> Result<String> {
        let form = Arc::clone(&self.form);
        let page = form.page(page_index).ok_or(ShapeError::PageOutOfRange {
            index: page_index,
            count: form.page_count(),
        })?;
        self.session.return_page_index = page_index;

        let resolver = self.page_resolver(page);
        for position in 0..form.pages.len() {
            self.resolve_conditions(position, &resolver)?;
        }

        let variables = self.view_variables(page_index, page)?;
        let mut event = BeforeRenderEvent::new(self, page_index, variables);
        self.services
            .hooks
            .before_render
            .dispatch(&mut event, |hook, event| hook(event));
        let variables = event.into_variables();

        tracing::info!(
            form = %form.name,
            page = page_index,
            has_errors = self.has_errors,
            "Rendering form page"
        );
        self.services
            .renderer
            .render(&self.settings.template, &variables)
    }

    fn view_variables(&self, page_index: usize, page: &Page) -> Result<Map<String, Value>> {
        let page_count = self.form.page_count();
        let mut field_states = Map::new();
        for (pi, form_page) in self.form.pages.iter().enumerate() {
            for (fi, field) in form_page.fields.iter().enumerate() {
                if !field.name.is_empty() {
                    field_states.insert(
                        field.name.clone(),
                        serde_json::to_value(&self.field_states[pi][fi])?,
                    );
                }
            }
        }
        let back = if page_index > 1 {
            Value::from(page_index - 1)
        } else {
            Value::Null
        };
        let forward = if page_index < page_count {
            Value::from(page_index + 1)
        } else {
            Value::Null
        };

        let mut v = Map::new();
        v.insert("session".into(), serde_json::to_value(&self.session)?);
        v.insert("serializedSession".into(), Value::String(self.session.serialize()?));
        v.insert("namespace".into(), Value::String(self.form.name.clone()));
        v.insert("action".into(), Value::String("run".into()));
        v.insert("plugin".into(), serde_json::to_value(&self.plugin)?);
        v.insert("form".into(), serde_json::to_value(self.form.as_ref())?);
        v.insert("settings".into(), serde_json::to_value(&self.settings)?);
        v.insert("messages".into(), serde_json::to_value(&self.messages)?);
        v.insert(
            "spamReasons".into(),
            self.spam_reasons.clone().map(Value::Object).unwrap_or(Value::Null),
        );
        let mut current_page = serde_json::to_value(page)?;
        if let Some(Value::Array(fields)) = current_page.get_mut("fields") {
            for (view, field) in fields.iter_mut().zip(&page.fields) {
                *view = self.field_view(field)?;
            }
        }
        v.insert("currentPage".into(), current_page);
        v.insert("pageIndex".into(), Value::from(page_index));
        v.insert("pageCount".into(), Value::from(page_count));
        v.insert("isFirstPage".into(), Value::Bool(page_index == 1));
        v.insert("isLastPage".into(), Value::Bool(page_index == page_count));
        v.insert("backStepPageIndex".into(), back);
        v.insert("forwardStepPageIndex".into(), forward);
        v.insert("hasErrors".into(), Value::Bool(self.has_errors));
        v.insert("fieldStates".into(), Value::Object(field_states));
        Ok(v)
    }

    // ---- Field pipeline ----

    /// Resolve conditions and validate every field of a page. Missing or
    /// empty pages are a no-op. Any error sets the runtime error flag.
    pub fn validate_page(&mut self, page_index: usize) -> Result<()> {
        let form = Arc::clone(&self.form);
        let Some(page) = form.page(page_index).filter(|p| p.has_fields()) else {
            return Ok(());
        };
        let position = page_index - 1;
        let resolver = self.page_resolver(page);
        let services = Arc::clone(&self.services);

        for (fi, field) in page.fields.iter().enumerate() {
            let visible = condition::evaluate(self, field, &resolver)?;
            self.field_states[position][fi].condition_result = visible;
            if !field.is_form_control() {
                continue;
            }
            let value = self.get_field_value(field);
            let result = services.validator.validate(self, field, &value)?;
            if result.has_errors() {
                tracing::debug!(
                    page = page_index,
                    field = %field.name,
                    errors = result.errors().len(),
                    "Field failed validation"
                );
                self.has_errors = true;
            }
            self.field_states[position][fi].validation_result = Some(result);
        }
        Ok(())
    }

    /// Serialize the form-control fields of a page into the session. Missing
    /// or empty pages are a no-op.
    pub fn serialize_page(&mut self, page_index: usize) {
        let form = Arc::clone(&self.form);
        let Some(page) = form.page(page_index).filter(|p| p.has_fields()) else {
            return;
        };
        for field in page.fields.iter().filter(|f| f.is_form_control()) {
            let value = self.get_field_value(field);
            let serialized = serialization::serialize(self, field, &value);
            self.set_field_value(field, serialized);
        }
    }

    /// Validate pages in order, stopping at the first page with errors and
    /// making it the resume page.
    pub fn validate_form(&mut self) -> Result<()> {
        for page_index in 1..=self.form.page_count() {
            self.validate_page(page_index)?;
            if self.has_errors {
                tracing::info!(form = %self.form.name, page = page_index, "Form validation failed");
                self.session.return_page_index = page_index;
                break;
            }
        }
        Ok(())
    }

    pub fn serialize_form(&mut self) {
        for page_index in 1..=self.form.page_count() {
            self.serialize_page(page_index);
        }
    }

    /// Run the processing hooks over every form-control field.
    pub fn process_form(&mut self) {
        let form = Arc::clone(&self.form);
        for field in form.fields().filter(|f| f.is_form_control()) {
            let value = self.get_field_value(field);
            let processed = processing::process(self, field, &value);
            self.set_field_value(field, processed);
        }
    }

    /// Merge submitted values for the form-control fields of a page into the
    /// session, along with any `__CONFIRM` duplicates. Fields missing from the
    /// submission are cleared.
    pub fn apply_post_values(&mut self, page_index: usize) {
        let form = Arc::clone(&self.form);
        let Some(page) = form.page(page_index) else {
            return;
        };
        for field in page.fields.iter().filter(|f| f.is_form_control()) {
            let value = self.post_values.get(&field.name).cloned().unwrap_or(Value::Null);
            self.set_field_value(field, value);
            let shadow = format!("{}{CONFIRM_SUFFIX}", field.name);
            if let Some(confirm) = self.post_values.get(&shadow) {
                self.session.values.insert(shadow, confirm.clone());
            }
        }
        self.session.touch();
    }

    // ---- Field values ----

    pub fn get_field_value(&self, field: &Field) -> Value {
        self.session
            .values
            .get(&field.name)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Write a field value to its mirror and the session, keeping an existing
    /// `__CONFIRM` duplicate in sync.
    pub fn set_field_value(&mut self, field: &Field, value: Value) {
        if let Some(&(pi, fi)) = self.positions.get(&field.name) {
            self.field_states[pi][fi].session_value = value.clone();
        }
        let shadow = format!("{}{CONFIRM_SUFFIX}", field.name);
        if let Some(mirrored) = self.session.values.get_mut(&shadow) {
            *mirrored = value.clone();
        }
        self.session.values.insert(field.name.clone(), value);
    }

    // ---- Finishers ----

    /// Select, validate, then execute the configured finishers.
    ///
    /// Selection and validation complete for every configuration before any
    /// finisher executes; one invalid finisher records its errors as messages
    /// and returns without executing anything. Execution stops after the
    /// finisher that cancels the context.
    pub fn finish_form(
        &mut self,
        condition_variables: Map<String, Value>,
    ) -> Result<FinisherExecutionContext> {
        let mut context = FinisherExecutionContext::new();
        let resolver = self.create_expression_resolver(condition_variables);
        let form = Arc::clone(&self.form);

        let mut executable: Vec<Box<dyn Finisher>> = Vec::new();
        for configuration in &form.finisher_configurations {
            if !self.finisher_applies(configuration, &resolver)? {
                tracing::debug!(
                    finisher = %configuration.identifier,
                    "Finisher skipped by condition"
                );
                continue;
            }
            let finisher = self.create_finisher_instance(configuration)?;
            let result = finisher.validate();
            if result.has_errors() {
                tracing::info!(
                    form = %form.name,
                    finisher = %configuration.identifier,
                    errors = result.errors().len(),
                    "Finisher configuration invalid; nothing executed"
                );
                self.has_errors = true;
                self.add_messages(
                    result
                        .errors()
                        .iter()
                        .map(|e| Message::error(e.message.clone())),
                );
                return Ok(context);
            }
            executable.push(finisher);
        }

        for mut finisher in executable {
            tracing::debug!(finisher = finisher.identifier(), "Executing finisher");
            finisher.execute(self, &mut context)?;
            if context.is_cancelled() {
                tracing::info!(
                    form = %form.name,
                    finisher = finisher.identifier(),
                    "Finisher chain cancelled"
                );
                break;
            }
        }

        context.add_finished_action_argument("pluginUid", Value::from(self.plugin.uid));
        tracing::info!(form = %form.name, "Form finished");
        Ok(context)
    }

    /// A deciding condition hook wins; otherwise the configuration's own
    /// condition applies, and no condition means the finisher runs.
    fn finisher_applies(
        &self,
        configuration: &FinisherConfiguration,
        resolver: &Resolver,
    ) -> Result<bool> {
        let mut event = FinisherConditionEvent::new(self, configuration, resolver);
        self.services
            .hooks
            .finisher_condition
            .dispatch(&mut event, |hook, event| hook(event));
        if let Some(decision) = event.decision() {
            return Ok(decision);
        }
        match configuration.condition() {
            Some(condition) => resolver.evaluate_bool(condition),
            None => Ok(true),
        }
    }

    /// Instantiate a finisher after the before-creation hooks had their say
    /// on its identifier and settings.
    pub fn create_finisher_instance(
        &self,
        configuration: &FinisherConfiguration,
    ) -> Result<Box<dyn Finisher>> {
        let mut event = BeforeFinisherCreationEvent {
            runtime: self,
            configuration,
            identifier: configuration.identifier.clone(),
            settings: configuration.settings.clone(),
        };
        self.services
            .hooks
            .before_finisher_creation
            .dispatch(&mut event, |hook, event| hook(event));
        let mut finisher = self.services.finishers.create(&event.identifier)?;
        finisher.set_settings(event.settings);
        Ok(finisher)
    }
}
