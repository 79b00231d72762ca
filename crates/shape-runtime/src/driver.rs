//! Request driver: one inbound request in, one rendered page or finished
//! submission out.
//!
//! The driver loads the visitor's session, builds a [`FormRuntime`], picks the
//! transition from the submitted navigation values, and persists the session
//! again unless the form was completed.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use shape_types::{FormSession, Result, ShapeError};

use crate::finisher::FinisherExecutionContext;
use crate::model::Form;
use crate::request::FormRequest;
use crate::runtime::{FormRuntime, RuntimeInput, RuntimeServices};
use crate::settings::{FormSettings, PluginRecord};
use crate::store::SessionStore;

/// Post value carrying the session id.
pub const SESSION_FIELD: &str = "__session";
/// Post value carrying the page the visitor submitted.
pub const PAGE_FIELD: &str = "__page";
/// Post value carrying the page the visitor navigates to; absent on final submit.
pub const TARGET_PAGE_FIELD: &str = "__targetPage";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    Rendered {
        page_index: usize,
        session_id: String,
        has_errors: bool,
        output: String,
    },
    Finished {
        session_id: String,
        context: FinisherExecutionContext,
    },
}

fn page_number(value: Option<&Value>) -> Option<usize> {
    let n = match value? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    usize::try_from(n).ok().filter(|n| *n > 0)
}

pub struct FormDriver<S: SessionStore> {
    services: Arc<RuntimeServices>,
    store: S,
    form: Arc<Form>,
    settings: FormSettings,
    plugin: PluginRecord,
}

impl<S: SessionStore> FormDriver<S> {
    pub fn new(
        services: Arc<RuntimeServices>,
        store: S,
        form: Arc<Form>,
        settings: FormSettings,
        plugin: PluginRecord,
    ) -> Self {
        Self {
            services,
            store,
            form,
            settings,
            plugin,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn handle(&self, request: FormRequest) -> Result<RequestOutcome> {
        let post_values = request.post_values(&self.settings.parsed_body_key);
        let session = match post_values
            .get(SESSION_FIELD)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        {
            Some(id) => match self.store.load(id) {
                Ok(session) => session,
                Err(ShapeError::SessionToken(reason)) => {
                    tracing::warn!(
                        form = %self.form.name,
                        %reason,
                        "Ignoring session id; starting fresh"
                    );
                    FormSession::new()
                }
                Err(e) => return Err(e),
            },
            None => FormSession::new(),
        };
        let page = page_number(post_values.get(PAGE_FIELD));
        let target = page_number(post_values.get(TARGET_PAGE_FIELD));
        let is_step_back = matches!((page, target), (Some(p), Some(t)) if t < p);

        let input = RuntimeInput::new(Arc::clone(&self.form), session)
            .with_request(request)
            .with_settings(self.settings.clone())
            .with_plugin(self.plugin.clone())
            .step_back(is_step_back);
        let mut runtime = FormRuntime::new(Arc::clone(&self.services), input);

        if !runtime.is_form_post_request() || !runtime.is_requested_plugin() {
            let resume = runtime
                .session()
                .return_page_index
                .clamp(1, self.form.page_count().max(1));
            return self.render(runtime, resume);
        }

        let page = page.unwrap_or(1);
        runtime.apply_post_values(page);
        tracing::debug!(form = %self.form.name, page, target = ?target, "Handling form post");

        match target {
            Some(target) if target < page => {
                runtime.serialize_page(page);
                self.render(runtime, target)
            }
            Some(target) => {
                runtime.validate_page(page)?;
                if runtime.has_errors() {
                    return self.render(runtime, page);
                }
                runtime.serialize_page(page);
                self.render(runtime, target)
            }
            None => self.submit(runtime, page),
        }
    }

    fn submit(&self, mut runtime: FormRuntime, page: usize) -> Result<RequestOutcome> {
        runtime.validate_page(page)?;
        if runtime.has_errors() {
            return self.render(runtime, page);
        }
        runtime.serialize_page(page);

        runtime.validate_form()?;
        if runtime.has_errors() {
            let resume = runtime.session().return_page_index;
            return self.render(runtime, resume);
        }

        if !runtime.find_spam_reasons().is_empty() {
            return self.render(runtime, page);
        }

        runtime.serialize_form();
        runtime.process_form();
        let context = runtime.finish_form(Map::new())?;
        if runtime.has_errors() {
            return self.render(runtime, page);
        }

        let session_id = runtime.session().id().to_string();
        self.store.destroy(&session_id)?;
        Ok(RequestOutcome::Finished {
            session_id,
            context,
        })
    }

    fn render(&self, mut runtime: FormRuntime, page_index: usize) -> Result<RequestOutcome> {
        let output = runtime.render_page(page_index)?;
        let has_errors = runtime.has_errors();
        let mut session = runtime.into_session();
        session.touch();
        self.store.save(&session)?;
        Ok(RequestOutcome::Rendered {
            page_index,
            session_id: session.id().to_string(),
            has_errors,
            output,
        })
    }
}
