//! Shared fixtures for unit tests.

use std::sync::Arc;

use serde_json::{Map, Value};

use shape_types::FormSession;

use crate::hooks::Hooks;
use crate::model::Form;
use crate::request::FormRequest;
use crate::runtime::{FormRuntime, RuntimeInput, RuntimeServices};

/// Two pages: a required email on the first, a free-text message on the second.
pub(crate) const SIMPLE_FORM: &str = r#"{
    "uid": 3,
    "name": "simple",
    "pages": [
        {"type": "contact", "fields": [{"name": "email", "type": "email", "required": true}]},
        {"type": "message", "fields": [{"name": "message", "type": "textarea"}]}
    ],
    "finishers": []
}"#;

pub(crate) fn runtime_for(form: &str, values: Map<String, Value>) -> FormRuntime {
    runtime_with(form, Hooks::new(), values, FormRequest::get())
}

pub(crate) fn runtime_with_hooks(
    form: &str,
    hooks: Hooks,
    values: Map<String, Value>,
) -> FormRuntime {
    runtime_with(form, hooks, values, FormRequest::get())
}

pub(crate) fn runtime_with(
    form: &str,
    hooks: Hooks,
    values: Map<String, Value>,
    request: FormRequest,
) -> FormRuntime {
    let form = Form::from_json(form).expect("test form should parse");
    let mut session = FormSession::with_id("test-session");
    session.values = values;
    let services = Arc::new(RuntimeServices::new().with_hooks(hooks));
    FormRuntime::new(services, RuntimeInput::new(Arc::new(form), session).with_request(request))
}
