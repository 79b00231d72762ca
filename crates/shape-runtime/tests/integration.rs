//! End-to-end tests for the form runtime.
//!
//! Each test builds a form definition, binds a runtime or driver to it, and
//! checks the observable session, field-state, and finisher behaviour.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};

use shape_runtime::spam::{
    REASON_RECAPTCHA_FAILED, REASON_RECAPTCHA_LOW_SCORE, REASON_RECAPTCHA_MISSING,
    RECAPTCHA_RESPONSE_FIELD,
};
use shape_runtime::{
    register_recaptcha, FileSessionStore, Finisher, FinisherExecutionContext, FinisherRegistry,
    Form, FormDriver, FormRequest, FormRuntime, FormSettings, Hooks, MemorySessionStore,
    PluginRecord, RequestOutcome, RuntimeInput, RuntimeServices, SessionStore, TokenVerifier,
    Verification,
};
use shape_types::{FormSession, MessageKind, Result, ShapeError, ValidationError, ValidationResult};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const BODY_KEY: &str = "tx_shape_form";

/// Three pages: required name plus a content element, email with a
/// confirmation, and a short required comment.
const THREE_PAGE_FORM: &str = r#"{
    "uid": 7,
    "name": "contact",
    "pages": [
        {"type": "personal", "fields": [
            {"name": "name", "type": "text", "required": true},
            {"name": "intro", "type": "content"}
        ]},
        {"type": "details", "fields": [
            {"name": "email", "type": "email", "required": true, "confirm": true},
            {"name": "email__CONFIRM", "type": "email"}
        ]},
        {"type": "summary", "fields": [
            {"name": "comment", "type": "textarea", "required": true, "max_length": 10}
        ]}
    ]
}"#;

/// Two pages, finished by a message finisher.
const SIGNUP_FORM: &str = r#"{
    "uid": 11,
    "name": "signup",
    "pages": [
        {"type": "account", "fields": [
            {"name": "email", "type": "email", "required": true, "pattern": "[^@]+@[^@]+"}
        ]},
        {"type": "profile", "fields": [
            {"name": "age", "type": "number", "min": 18},
            {"name": "note", "type": "content"}
        ]}
    ],
    "finishers": [{"finisher": "message", "settings": {"text": "Thanks"}}]
}"#;

fn form(json: &str) -> Arc<Form> {
    Arc::new(Form::from_json(json).expect("form should parse"))
}

fn map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn runtime(services: RuntimeServices, form_json: &str, values: Value) -> FormRuntime {
    runtime_with_request(services, form_json, values, FormRequest::get())
}

fn runtime_with_request(
    services: RuntimeServices,
    form_json: &str,
    values: Value,
    request: FormRequest,
) -> FormRuntime {
    let mut session = FormSession::with_id("integration");
    session.values = map(values);
    let input = RuntimeInput::new(form(form_json), session)
        .with_request(request)
        .with_plugin(PluginRecord::new(42));
    FormRuntime::new(Arc::new(services), input)
}

fn post(values: Value) -> FormRequest {
    FormRequest::post(BODY_KEY, map(values))
}

fn rendered(outcome: &RequestOutcome) -> (usize, &str, bool, Value) {
    match outcome {
        RequestOutcome::Rendered {
            page_index,
            session_id,
            has_errors,
            output,
        } => (
            *page_index,
            session_id.as_str(),
            *has_errors,
            serde_json::from_str(output).expect("JSON view output"),
        ),
        other => panic!("expected a rendered page, got {other:?}"),
    }
}

/// Finisher whose validity and cancellation come from its settings and which
/// records every execution in a shared log.
struct RecordingFinisher {
    identifier: String,
    settings: Map<String, Value>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Finisher for RecordingFinisher {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn set_settings(&mut self, settings: Map<String, Value>) {
        self.settings = settings;
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        if self.settings.get("invalid") == Some(&json!(true)) {
            result.add_error(ValidationError::new(
                format!("{} is misconfigured", self.identifier),
                9000,
            ));
        }
        result
    }

    fn execute(&mut self, _: &FormRuntime, context: &mut FinisherExecutionContext) -> Result<()> {
        self.log.lock().unwrap().push(self.identifier.clone());
        if self.settings.get("cancel") == Some(&json!(true)) {
            context.cancel();
        }
        Ok(())
    }
}

fn recording_registry(ids: &[&str], log: &Arc<Mutex<Vec<String>>>) -> FinisherRegistry {
    let mut registry = FinisherRegistry::with_builtins();
    for id in ids {
        let id = id.to_string();
        let log = Arc::clone(log);
        registry.register(id.clone(), move || {
            Box::new(RecordingFinisher {
                identifier: id.clone(),
                settings: Map::new(),
                log: Arc::clone(&log),
            }) as Box<dyn Finisher>
        });
    }
    registry
}

fn finisher_form(finishers: Value) -> String {
    json!({
        "uid": 5,
        "name": "finishing",
        "pages": [{"fields": [{"name": "subscribe", "type": "checkbox"}]}],
        "finishers": finishers,
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Field pipeline
// ---------------------------------------------------------------------------

#[test]
fn non_control_fields_are_never_touched() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = Hooks::new();
    let serialization_log = Arc::clone(&seen);
    hooks.on_value_serialization("upper", move |event| {
        serialization_log.lock().unwrap().push(event.field.name.clone());
        if let Some(s) = event.value.as_str() {
            event.replace(json!(s.to_uppercase()));
        }
    });
    let processing_log = Arc::clone(&seen);
    hooks.on_value_processing("log", move |event| {
        processing_log.lock().unwrap().push(event.field.name.clone());
    });

    let mut rt = runtime(
        RuntimeServices::new().with_hooks(hooks),
        THREE_PAGE_FORM,
        json!({"name": "ada", "email": "a@b", "email__CONFIRM": "a@b", "comment": "hi"}),
    );
    rt.validate_form().unwrap();
    rt.serialize_form();
    rt.process_form();

    assert!(!rt.session().values.contains_key("intro"));
    assert!(rt.field_state("intro").is_none());
    assert!(!seen.lock().unwrap().iter().any(|name| name == "intro"));
    assert_eq!(rt.session().values["name"], json!("ADA"));
}

#[test]
fn serialization_mirrors_into_existing_confirmation() {
    let mut hooks = Hooks::new();
    hooks.on_value_serialization("lowercase", |event| {
        if let Some(s) = event.value.as_str() {
            event.replace(json!(s.to_lowercase()));
        }
    });
    let mut rt = runtime(
        RuntimeServices::new().with_hooks(hooks),
        THREE_PAGE_FORM,
        json!({"email": "Ada@Example.com", "email__CONFIRM": "Ada@Example.com"}),
    );
    rt.serialize_page(2);

    // The confirmation field serializes after its base and mirrors it either way.
    assert_eq!(rt.session().values["email"], json!("ada@example.com"));
    assert_eq!(rt.session().values["email__CONFIRM"], json!("ada@example.com"));
}

#[test]
fn validate_form_stops_at_first_invalid_page() {
    let mut rt = runtime(
        RuntimeServices::new(),
        THREE_PAGE_FORM,
        json!({"name": "ada", "email": "a@b", "email__CONFIRM": "x@y"}),
    );
    rt.validate_form().unwrap();

    assert!(rt.has_errors());
    assert_eq!(rt.session().return_page_index, 2);
    let email = rt.field_state("email").unwrap();
    assert!(email.validation_result.as_ref().unwrap().has_errors());
    assert!(!rt.field_state("name").unwrap().validation_result.as_ref().unwrap().has_errors());
    // Page 3 was never reached even though its required comment is empty.
    assert!(rt.field_state("comment").unwrap().validation_result.is_none());
}

#[test]
fn hidden_fields_are_not_validated() {
    let form_json = r#"{"uid": 1, "name": "cond", "pages": [{"type": "page", "fields": [
        {"name": "contact_me", "type": "checkbox"},
        {"name": "phone", "type": "text", "required": true,
         "condition": "formValues.contact_me == true"}
    ]}]}"#;

    let mut rt = runtime(RuntimeServices::new(), form_json, json!({"contact_me": false}));
    rt.validate_page(1).unwrap();
    assert!(!rt.has_errors());
    assert!(!rt.field_state("phone").unwrap().condition_result);

    let mut rt = runtime(RuntimeServices::new(), form_json, json!({"contact_me": true}));
    rt.validate_page(1).unwrap();
    assert!(rt.has_errors());
    assert!(rt.field_state("phone").unwrap().condition_result);
}

#[test]
fn validation_hooks_see_hidden_fields() {
    let form_json = r#"{"uid": 1, "name": "cond", "pages": [{"fields": [
        {"name": "contact_me", "type": "checkbox"},
        {"name": "phone", "type": "text", "required": true,
         "condition": "formValues.contact_me == true"}
    ]}]}"#;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let mut hooks = Hooks::new();
    hooks.on_value_validation("no-stale-phone", move |event| {
        log.lock().unwrap().push(event.field.name.clone());
        let hidden = !event.runtime.condition_result(event.field);
        if hidden && !event.value.is_null() {
            event.add_error(ValidationError::new("Clear the phone number.", 77));
        }
    });
    let services = Arc::new(RuntimeServices::new().with_hooks(hooks));
    let rt_with = |values: Value| {
        let mut session = FormSession::with_id("integration");
        session.values = map(values);
        FormRuntime::new(Arc::clone(&services), RuntimeInput::new(form(form_json), session))
    };

    // Hidden and empty: the required rule is skipped and the hook finds nothing.
    let mut rt = rt_with(json!({"contact_me": false}));
    rt.validate_page(1).unwrap();
    assert!(!rt.has_errors());
    assert_eq!(*seen.lock().unwrap(), vec!["contact_me", "phone"]);

    let mut rt = rt_with(json!({"contact_me": false, "phone": "555"}));
    rt.validate_page(1).unwrap();
    assert!(rt.has_errors());
    let phone = rt.field_state("phone").unwrap().validation_result.clone().unwrap();
    assert_eq!(phone.errors()[0].code, 77);
}

#[test]
fn runtime_hooks_override_field_properties_for_one_request() {
    let form_json = r#"{"uid": 1, "name": "overrides", "pages": [{"fields": [
        {"name": "email", "type": "email", "required": true},
        {"name": "topic", "type": "select", "options": [
            {"label": "Sales", "value": "sales"},
            {"label": "Support", "value": "support"}
        ]}
    ]}]}"#;
    let mut hooks = Hooks::new();
    hooks.on_runtime_created("guest-checkout", |runtime| {
        assert!(runtime.override_field_property("email", "required", json!(false)));
        assert!(runtime.override_field_property("topic", "options", json!([{"value": "sales"}])));
        assert!(!runtime.override_field_property("missing", "required", json!(false)));
    });

    let mut rt = runtime(
        RuntimeServices::new().with_hooks(hooks),
        form_json,
        json!({"topic": "support"}),
    );
    rt.validate_page(1).unwrap();
    let email = rt.field_state("email").unwrap();
    assert!(!email.validation_result.as_ref().unwrap().has_errors());
    let topic = rt.field_state("topic").unwrap().validation_result.clone().unwrap();
    assert_eq!(topic.errors()[0].code, shape_runtime::validation::CODE_INVALID_OPTION);
    // The shared definition is untouched.
    assert!(rt.form().field("email").unwrap().is_required());

    let output: Value = serde_json::from_str(&rt.render_page(1).unwrap()).unwrap();
    let fields = &output["variables"]["currentPage"]["fields"];
    assert_eq!(fields[0]["required"], json!(false));
    assert_eq!(fields[1]["options"], json!([{"value": "sales"}]));
    let states = &output["variables"]["fieldStates"];
    assert_eq!(states["email"]["overrides"]["required"], json!(false));

    // Without the hook the definition applies.
    let mut rt = runtime(RuntimeServices::new(), form_json, json!({"topic": "support"}));
    rt.validate_page(1).unwrap();
    let email = rt.field_state("email").unwrap();
    assert!(email.validation_result.as_ref().unwrap().has_errors());
    assert!(!rt.field_state("topic").unwrap().validation_result.as_ref().unwrap().has_errors());
}

#[test]
fn step_type_is_visible_to_conditions() {
    let form_json = r#"{"uid": 1, "name": "steps", "pages": [
        {"type": "intro", "fields": [
            {"name": "a", "type": "text", "required": true, "condition": "stepType == 'intro'"}
        ]},
        {"type": "outro", "fields": [
            {"name": "b", "type": "text", "required": true, "condition": "stepType == 'intro'"}
        ]}
    ]}"#;
    let mut rt = runtime(RuntimeServices::new(), form_json, json!({}));
    rt.validate_page(2).unwrap();
    assert!(!rt.has_errors());
    rt.validate_page(1).unwrap();
    assert!(rt.has_errors());
}

#[test]
fn validation_hooks_add_errors() {
    let mut hooks = Hooks::new();
    hooks.on_value_validation("no-example", |event| {
        if event.field.name == "email"
            && event.value.as_str().is_some_and(|s| s.ends_with("@example.com"))
        {
            event.add_error(ValidationError::new("Use a real address.", 4242));
        }
    });
    let mut rt = runtime(
        RuntimeServices::new().with_hooks(hooks),
        THREE_PAGE_FORM,
        json!({"email": "a@example.com", "email__CONFIRM": "a@example.com"}),
    );
    rt.validate_page(2).unwrap();
    let result = rt.field_state("email").unwrap().validation_result.clone().unwrap();
    assert_eq!(result.errors().len(), 1);
    assert_eq!(result.errors()[0].code, 4242);
}

#[test]
fn serialize_form_is_idempotent() {
    let mut hooks = Hooks::new();
    hooks.on_value_serialization("trim", |event| {
        if let Some(s) = event.value.as_str() {
            event.replace(json!(s.trim()));
        }
    });
    let mut rt = runtime(
        RuntimeServices::new().with_hooks(hooks),
        THREE_PAGE_FORM,
        json!({"name": "  ada ", "email": " a@b", "email__CONFIRM": " a@b", "comment": "ok "}),
    );
    rt.serialize_form();
    let once = rt.session().values.clone();
    rt.serialize_form();
    assert_eq!(rt.session().values, once);
    assert_eq!(once["name"], json!("ada"));
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

#[test]
fn render_page_navigation_flags() {
    let mut rt = runtime(RuntimeServices::new(), THREE_PAGE_FORM, json!({}));
    let view = |output: String| -> Value {
        serde_json::from_str::<Value>(&output).unwrap()["variables"].clone()
    };

    let first = view(rt.render_page(1).unwrap());
    assert_eq!(first["isFirstPage"], json!(true));
    assert_eq!(first["isLastPage"], json!(false));
    assert_eq!(first["backStepPageIndex"], Value::Null);
    assert_eq!(first["forwardStepPageIndex"], json!(2));

    let middle = view(rt.render_page(2).unwrap());
    assert_eq!(middle["isFirstPage"], json!(false));
    assert_eq!(middle["isLastPage"], json!(false));
    assert_eq!(middle["backStepPageIndex"], json!(1));
    assert_eq!(middle["forwardStepPageIndex"], json!(3));

    let last = view(rt.render_page(3).unwrap());
    assert_eq!(last["isLastPage"], json!(true));
    assert_eq!(last["backStepPageIndex"], json!(2));
    assert_eq!(last["forwardStepPageIndex"], Value::Null);
    assert_eq!(last["pageCount"], json!(3));
    assert_eq!(rt.session().return_page_index, 3);
}

#[test]
fn before_render_hooks_extend_view_variables() {
    let mut hooks = Hooks::new();
    hooks.on_before_render("banner", |event| {
        let page = event.page_index;
        event.set_variable("banner", json!(format!("Step {page}")));
    });
    let mut rt = runtime(RuntimeServices::new().with_hooks(hooks), THREE_PAGE_FORM, json!({}));
    let output: Value = serde_json::from_str(&rt.render_page(2).unwrap()).unwrap();
    assert_eq!(output["template"], json!("Form"));
    assert_eq!(output["variables"]["banner"], json!("Step 2"));
    assert_eq!(output["variables"]["plugin"]["uid"], json!(42));
}

// ---------------------------------------------------------------------------
// Finishers
// ---------------------------------------------------------------------------

#[test]
fn invalid_finisher_blocks_the_whole_chain() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = recording_registry(&["a", "b", "c"], &log);
    let services = RuntimeServices::new().with_finishers(registry);
    let form_json = finisher_form(json!([
        {"finisher": "a"},
        {"finisher": "b", "settings": {"invalid": true}},
        {"finisher": "c"}
    ]));
    let mut rt = runtime(services, &form_json, json!({}));

    let context = rt.finish_form(Map::new()).unwrap();

    assert!(log.lock().unwrap().is_empty());
    assert!(rt.has_errors());
    assert_eq!(rt.messages().len(), 1);
    assert_eq!(rt.messages()[0].message, "b is misconfigured");
    assert_eq!(rt.messages()[0].kind, MessageKind::Error);
    assert!(!context.finished_action_arguments.contains_key("pluginUid"));
}

#[test]
fn cancelling_finisher_stops_the_chain() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let services = RuntimeServices::new().with_finishers(recording_registry(&["a", "b"], &log));
    let form_json = finisher_form(json!([
        {"finisher": "a", "settings": {"cancel": true}},
        {"finisher": "b"}
    ]));
    let mut rt = runtime(services, &form_json, json!({}));

    let context = rt.finish_form(Map::new()).unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["a".to_string()]);
    assert!(context.is_cancelled());
    assert!(!rt.has_errors());
    assert_eq!(context.finished_action_arguments["pluginUid"], json!(42));
}

#[test]
fn finisher_conditions_select_the_chain() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = recording_registry(&["a", "b", "c"], &log);
    let services = RuntimeServices::new().with_finishers(registry);
    let form_json = finisher_form(json!([
        {"finisher": "a", "condition": "formValues.subscribe == true"},
        {"finisher": "b", "condition": "formValues.subscribe != true"},
        {"finisher": "c", "condition": "origin == 'api'"}
    ]));
    let mut rt = runtime(services, &form_json, json!({"subscribe": true}));

    let mut variables = Map::new();
    variables.insert("origin".into(), json!("api"));
    rt.finish_form(variables).unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["a".to_string(), "c".to_string()]);
}

#[test]
fn finisher_condition_hook_decision_wins() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let mut hooks = Hooks::new();
    hooks.on_finisher_condition("veto-b", |event| {
        if event.configuration.identifier == "b" {
            event.decide(false);
        }
    });
    let counter = Arc::clone(&calls);
    hooks.on_finisher_condition("force-c", move |event| {
        counter.fetch_add(1, Ordering::SeqCst);
        if event.configuration.identifier == "c" {
            event.decide(true);
        }
    });
    let services = RuntimeServices::new()
        .with_hooks(hooks)
        .with_finishers(recording_registry(&["a", "b", "c"], &log));
    let form_json = finisher_form(json!([
        {"finisher": "a"},
        {"finisher": "b"},
        {"finisher": "c", "condition": "false"}
    ]));
    let mut rt = runtime(services, &form_json, json!({}));
    rt.finish_form(Map::new()).unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["a".to_string(), "c".to_string()]);
    // The veto on b stops propagation, so the second hook only sees a and c.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn before_creation_hook_rewrites_identifier_and_settings() {
    let mut hooks = Hooks::new();
    hooks.on_before_finisher_creation("legacy", |event| {
        if event.identifier == "legacy_thanks" {
            event.identifier = "message".into();
            event.settings.insert("text".into(), json!("Rewritten"));
        }
    });
    let form_json = finisher_form(json!([{"finisher": "legacy_thanks"}]));
    let mut rt = runtime(RuntimeServices::new().with_hooks(hooks), &form_json, json!({}));

    let configuration = rt.form().finisher_configurations[0].clone();
    let finisher = rt.create_finisher_instance(&configuration).unwrap();
    assert_eq!(finisher.identifier(), "message");

    let context = rt.finish_form(Map::new()).unwrap();
    assert_eq!(context.finished_action_arguments["message"], json!("Rewritten"));
}

#[test]
fn unknown_finisher_is_a_configuration_error() {
    let form_json = finisher_form(json!([{"finisher": "fax"}]));
    let mut rt = runtime(RuntimeServices::new(), &form_json, json!({}));
    let err = rt.finish_form(Map::new()).unwrap_err();
    assert!(matches!(err, ShapeError::UnknownFinisher { ref identifier } if identifier == "fax"));
    assert!(err.is_configuration());
}

#[test]
fn redirect_finisher_sets_response() {
    let form_json = finisher_form(json!([
        {"finisher": "redirect", "settings": {"url": "/thanks"}}
    ]));
    let mut rt = runtime(RuntimeServices::new(), &form_json, json!({}));
    let context = rt.finish_form(Map::new()).unwrap();
    let response = context.response.expect("redirect response");
    assert_eq!(response.status, 303);
    assert_eq!(response.headers["Location"], "/thanks");
}

// ---------------------------------------------------------------------------
// Request matching
// ---------------------------------------------------------------------------

#[test]
fn requests_without_plugin_argument_match_any_instance() {
    let rt = runtime_with_request(
        RuntimeServices::new(),
        THREE_PAGE_FORM,
        json!({}),
        post(json!({})),
    );
    assert!(rt.is_requested_plugin());
    assert!(rt.is_form_post_request());
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

fn signup_driver<S: SessionStore>(store: S, settings: FormSettings) -> FormDriver<S> {
    FormDriver::new(
        Arc::new(RuntimeServices::new()),
        store,
        form(SIGNUP_FORM),
        settings,
        PluginRecord::new(8),
    )
}

#[test]
fn driver_walks_through_a_submission() {
    let driver = signup_driver(MemorySessionStore::new(), FormSettings::default());

    let first = driver.handle(FormRequest::get()).unwrap();
    let (page, session_id, has_errors, _) = rendered(&first);
    assert_eq!((page, has_errors), (1, false));
    let session_id = session_id.to_string();
    assert_eq!(driver.store().len(), 1);

    let invalid = driver
        .handle(post(json!({
            "__session": session_id, "__page": 1, "__targetPage": 2, "email": "nope"
        })))
        .unwrap();
    let (page, _, has_errors, view) = rendered(&invalid);
    assert_eq!((page, has_errors), (1, true));
    assert_eq!(view["variables"]["hasErrors"], json!(true));

    let forward = driver
        .handle(post(json!({
            "__session": session_id, "__page": "1", "__targetPage": "2", "email": "ada@example.org"
        })))
        .unwrap();
    assert_eq!(rendered(&forward).0, 2);

    // Stepping back keeps the unvalidated value without flagging errors.
    let back = driver
        .handle(post(json!({
            "__session": session_id, "__page": 2, "__targetPage": 1, "age": "5"
        })))
        .unwrap();
    let (page, _, has_errors, _) = rendered(&back);
    assert_eq!((page, has_errors), (1, false));
    assert_eq!(driver.store().load(&session_id).unwrap().values["age"], json!("5"));

    let finished = driver
        .handle(post(json!({"__session": session_id, "__page": 2, "age": "30"})))
        .unwrap();
    match finished {
        RequestOutcome::Finished {
            session_id: finished_id,
            context,
        } => {
            assert_eq!(finished_id, session_id);
            assert_eq!(context.finished_action_arguments["message"], json!("Thanks"));
            assert_eq!(context.finished_action_arguments["pluginUid"], json!(8));
        }
        other => panic!("expected a finished submission, got {other:?}"),
    }
    assert!(driver.store().is_empty());
}

#[test]
fn final_submit_resumes_at_first_invalid_page() {
    let driver = signup_driver(MemorySessionStore::new(), FormSettings::default());
    let outcome = driver
        .handle(post(json!({"__page": 2, "age": "40"})))
        .unwrap();
    let (page, session_id, has_errors, _) = rendered(&outcome);
    assert_eq!((page, has_errors), (1, true));
    assert_eq!(driver.store().load(session_id).unwrap().values["age"], json!("40"));
}

#[test]
fn posts_for_another_plugin_only_render() {
    let settings = FormSettings {
        plugin_uid: Some(8),
        ..FormSettings::default()
    };
    let driver = signup_driver(MemorySessionStore::new(), settings);
    let request = post(json!({"__page": 1, "__targetPage": 2, "email": "ada@example.org"}))
        .with_argument("pluginUid", json!(9));
    let outcome = driver.handle(request).unwrap();
    let (page, session_id, has_errors, _) = rendered(&outcome);
    assert_eq!((page, has_errors), (1, false));
    assert!(driver.store().load(session_id).unwrap().values.is_empty());
}

#[test]
fn out_of_range_target_page_is_an_error() {
    let driver = signup_driver(MemorySessionStore::new(), FormSettings::default());
    let err = driver
        .handle(post(json!({"__page": 1, "__targetPage": 9, "email": "ada@example.org"})))
        .unwrap_err();
    assert!(matches!(err, ShapeError::PageOutOfRange { index: 9, count: 2 }));
    assert_eq!(err.http_status(), 404);
}

#[test]
fn file_store_carries_a_session_across_drivers() {
    let sessions = tempfile::tempdir().unwrap();
    let submissions = tempfile::tempdir().unwrap();
    let form_json = json!({
        "uid": 12,
        "name": "persisted",
        "pages": [
            {"fields": [{"name": "email", "type": "email", "required": true}]},
            {"fields": [{"name": "topic", "type": "select", "options": [
                {"label": "Sales", "value": "sales"},
                {"label": "Support", "value": "support"}
            ]}]}
        ],
        "finishers": [
            {"finisher": "save_submission", "settings": {"directory": submissions.path()}}
        ]
    })
    .to_string();
    let driver = || {
        FormDriver::new(
            Arc::new(RuntimeServices::new()),
            FileSessionStore::new(sessions.path()),
            form(&form_json),
            FormSettings::default(),
            PluginRecord::new(3),
        )
    };

    let outcome = driver()
        .handle(post(json!({"__page": 1, "__targetPage": 2, "email": "ada@example.org"})))
        .unwrap();
    let session_id = rendered(&outcome).1.to_string();
    assert!(sessions.path().join(format!("{session_id}.json")).exists());

    let rejected = driver()
        .handle(post(json!({"__session": session_id, "__page": 2, "topic": "spam"})))
        .unwrap();
    assert!(rendered(&rejected).2);

    let outcome = driver()
        .handle(post(json!({"__session": session_id, "__page": 2, "topic": "support"})))
        .unwrap();
    assert!(matches!(outcome, RequestOutcome::Finished { .. }));
    assert!(!sessions.path().join(format!("{session_id}.json")).exists());

    let saved_path = submissions.path().join(format!("{session_id}.json"));
    let saved = std::fs::read_to_string(saved_path).unwrap();
    let saved: Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(saved["values"]["email"], json!("ada@example.org"));
    assert_eq!(saved["values"]["topic"], json!("support"));
    assert_eq!(saved["pluginUid"], json!(3));
}

#[test]
fn tampered_session_id_starts_a_fresh_session() {
    let driver = signup_driver(MemorySessionStore::new(), FormSettings::default());
    let outcome = driver
        .handle(post(json!({
            "__session": "../../etc/passwd",
            "__page": 1,
            "__targetPage": 2,
            "email": "ada@example.org"
        })))
        .unwrap();
    let (page, session_id, has_errors, _) = rendered(&outcome);
    assert_eq!((page, has_errors), (2, false));
    assert_ne!(session_id, "../../etc/passwd");
    assert_eq!(
        driver.store().load(session_id).unwrap().values["email"],
        json!("ada@example.org")
    );
}

#[test]
fn visitor_text_in_a_compared_field_hides_the_dependent_field() {
    let form_json = r#"{
        "uid": 13,
        "name": "consent",
        "pages": [
            {"fields": [{"name": "age", "type": "text"}]},
            {"fields": [
                {"name": "consent", "type": "checkbox", "required": true,
                 "condition": "formValues.age >= 18"}
            ]}
        ]
    }"#;
    let driver = FormDriver::new(
        Arc::new(RuntimeServices::new()),
        MemorySessionStore::new(),
        form(form_json),
        FormSettings::default(),
        PluginRecord::new(5),
    );

    let mut session_id = String::new();
    for age in [json!(["x"]), json!("abc")] {
        let outcome = driver
            .handle(post(json!({"__page": 1, "__targetPage": 2, "age": age})))
            .unwrap();
        let (page, id, has_errors, view) = rendered(&outcome);
        assert_eq!((page, has_errors), (2, false));
        assert_eq!(view["variables"]["fieldStates"]["consent"]["conditionResult"], json!(false));
        session_id = id.to_string();
    }

    // The hidden consent field does not block the final submit.
    let outcome = driver
        .handle(post(json!({"__session": session_id, "__page": 2})))
        .unwrap();
    assert!(matches!(outcome, RequestOutcome::Finished { .. }));
}

// ---------------------------------------------------------------------------
// Spam protection
// ---------------------------------------------------------------------------

struct FakeVerifier {
    answer: std::result::Result<Verification, String>,
    calls: AtomicUsize,
    remote_ip: Mutex<Option<String>>,
}

impl FakeVerifier {
    fn answering(success: bool, score: Option<f64>) -> Arc<Self> {
        Self::with_answer(Ok(Verification { success, score }))
    }

    fn unreachable() -> Arc<Self> {
        Self::with_answer(Err("connection refused".into()))
    }

    fn with_answer(answer: std::result::Result<Verification, String>) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
            remote_ip: Mutex::new(None),
        })
    }
}

impl TokenVerifier for FakeVerifier {
    fn verify(&self, secret: &str, _token: &str, remote_ip: Option<&str>) -> Result<Verification> {
        assert_eq!(secret, "s3cret");
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.remote_ip.lock().unwrap() = remote_ip.map(str::to_string);
        self.answer.clone().map_err(ShapeError::Other)
    }
}

fn recaptcha_settings(version: &str) -> FormSettings {
    FormSettings::from_json(
        &json!({
            "spam_protection": {"google_recaptcha": {
                "enabled": true, "secret_key": "s3cret", "version": version, "minimum_score": 0.5
            }}
        })
        .to_string(),
    )
    .unwrap()
}

fn spam_request(token: Option<&str>) -> FormRequest {
    let mut values = Map::new();
    if let Some(token) = token {
        values.insert(RECAPTCHA_RESPONSE_FIELD.into(), json!(token));
    }
    FormRequest::post(BODY_KEY, values)
}

fn spam_reasons_for(
    verifier: Arc<FakeVerifier>,
    settings: FormSettings,
    request: FormRequest,
) -> Vec<String> {
    let mut hooks = Hooks::new();
    register_recaptcha(&mut hooks, verifier);
    let input = RuntimeInput::new(form(SIGNUP_FORM), FormSession::new())
        .with_request(request)
        .with_settings(settings);
    let mut rt = FormRuntime::new(Arc::new(RuntimeServices::new().with_hooks(hooks)), input);
    rt.find_spam_reasons().keys().cloned().collect()
}

fn spam_reasons(
    verifier: Arc<FakeVerifier>,
    settings: FormSettings,
    token: Option<&str>,
) -> Vec<String> {
    spam_reasons_for(verifier, settings, spam_request(token))
}

#[test]
fn recaptcha_v2_reports_missing_and_failed() {
    let verifier = FakeVerifier::answering(true, None);
    assert_eq!(
        spam_reasons(Arc::clone(&verifier), recaptcha_settings("v2"), None),
        vec![REASON_RECAPTCHA_MISSING]
    );
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);

    let failed = FakeVerifier::answering(false, None);
    assert_eq!(
        spam_reasons(failed, recaptcha_settings("v2"), Some("t")),
        vec![REASON_RECAPTCHA_FAILED]
    );
    // v2 ignores the score entirely.
    let low = FakeVerifier::answering(true, Some(0.1));
    assert!(spam_reasons(low, recaptcha_settings("v2"), Some("t")).is_empty());
}

#[test]
fn recaptcha_v3_judges_by_score_only() {
    let low = FakeVerifier::answering(true, Some(0.2));
    assert_eq!(
        spam_reasons(low, recaptcha_settings("v3"), Some("t")),
        vec![REASON_RECAPTCHA_LOW_SCORE]
    );
    let high = FakeVerifier::answering(true, Some(0.9));
    assert!(spam_reasons(high, recaptcha_settings("v3"), Some("t")).is_empty());

    // A failed check carries no score, so it counts as a zero score.
    let failed = FakeVerifier::answering(false, None);
    assert_eq!(
        spam_reasons(failed, recaptcha_settings("v3"), Some("t")),
        vec![REASON_RECAPTCHA_LOW_SCORE]
    );
}

#[test]
fn recaptcha_forwards_the_client_address() {
    let verifier = FakeVerifier::answering(true, None);
    let mut request = spam_request(Some("t"));
    request.attributes.remote_address = Some("203.0.113.7".into());
    spam_reasons_for(Arc::clone(&verifier), recaptcha_settings("v2"), request);
    assert_eq!(verifier.remote_ip.lock().unwrap().as_deref(), Some("203.0.113.7"));

    let verifier = FakeVerifier::answering(true, None);
    spam_reasons(Arc::clone(&verifier), recaptcha_settings("v2"), Some("t"));
    assert_eq!(*verifier.remote_ip.lock().unwrap(), None);
}

#[test]
fn recaptcha_fails_open_and_respects_disabled_setting() {
    let unreachable = FakeVerifier::unreachable();
    assert!(spam_reasons(unreachable, recaptcha_settings("v3"), Some("t")).is_empty());
    let failed = FakeVerifier::answering(false, None);
    assert!(spam_reasons(failed, FormSettings::default(), None).is_empty());
}

#[test]
fn spam_blocks_finishers_in_the_driver() {
    let mut hooks = Hooks::new();
    register_recaptcha(&mut hooks, FakeVerifier::answering(false, None));
    let driver = FormDriver::new(
        Arc::new(RuntimeServices::new().with_hooks(hooks)),
        MemorySessionStore::new(),
        form(SIGNUP_FORM),
        recaptcha_settings("v2"),
        PluginRecord::new(8),
    );
    let forward = driver
        .handle(post(json!({"__page": 1, "__targetPage": 2, "email": "ada@example.org"})))
        .unwrap();
    let session_id = rendered(&forward).1.to_string();

    let outcome = driver
        .handle(post(json!({
            "__session": session_id, "__page": 2, "age": 30, "g-recaptcha-response": "bot"
        })))
        .unwrap();
    let (page, _, _, view) = rendered(&outcome);
    assert_eq!(page, 2);
    assert!(view["variables"]["spamReasons"][REASON_RECAPTCHA_FAILED].is_object());
    assert_eq!(driver.store().len(), 1);
}
