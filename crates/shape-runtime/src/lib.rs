//! Multi-page form runtime.
//!
//! A [`FormRuntime`] binds a form definition to one visitor's session and
//! request. It hydrates per-field state, evaluates display conditions,
//! validates and serializes pages, and runs the configured finisher chain.
//! [`FormDriver`] wraps it into a request-in, outcome-out state machine backed
//! by a [`SessionStore`].

pub mod condition;
pub mod driver;
pub mod finisher;
pub mod finishers;
pub mod hooks;
pub mod lint;
pub mod model;
pub mod processing;
pub mod render;
pub mod request;
pub mod runtime;
pub mod serialization;
pub mod settings;
pub mod spam;
pub mod store;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use driver::{FormDriver, RequestOutcome, PAGE_FIELD, SESSION_FIELD, TARGET_PAGE_FIELD};
pub use finisher::{
    Finisher, FinisherExecutionContext, FinisherRegistry, FinisherResponse,
};
pub use finishers::{MessageFinisher, RedirectFinisher, SaveSubmissionFinisher};
pub use hooks::{
    BeforeFinisherCreationEvent, BeforeRenderEvent, FinisherConditionEvent, Hooks,
    ResolverCreationEvent, SpamAnalysisEvent, ValueEvent, ValueValidationEvent,
};
pub use lint::{lint, lint_or_raise, Diagnostic, LintRule, Severity};
pub use model::{Field, FieldKind, FieldOption, FinisherConfiguration, Form, Page};
pub use render::{JsonViewRenderer, ViewRenderer};
pub use request::{FormRequest, RequestAttributes};
pub use runtime::{FieldState, FormRuntime, RuntimeInput, RuntimeServices};
pub use settings::{FormSettings, PluginRecord, RecaptchaSettings, RecaptchaVersion};
pub use spam::{register_recaptcha, HttpTokenVerifier, TokenVerifier, Verification};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use validation::{FieldValueValidator, ValueRule};
