//! Spam analysis backed by Google reCAPTCHA token verification.
//!
//! Verification fails open: an unreachable verifier never blocks a
//! submission, it only logs a warning.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use shape_types::{Result, ShapeError};

use crate::hooks::{Hooks, SpamAnalysisEvent};
use crate::settings::RecaptchaVersion;

pub const REASON_RECAPTCHA_MISSING: &str = "google_recaptcha_missing";
pub const REASON_RECAPTCHA_FAILED: &str = "google_recaptcha_failed";
pub const REASON_RECAPTCHA_LOW_SCORE: &str = "google_recaptcha_low_score";

/// Post value carrying the widget's token.
pub const RECAPTCHA_RESPONSE_FIELD: &str = "g-recaptcha-response";

const VERIFY_ENDPOINT: &str = "https://www.google.com/recaptcha/api/siteverify";

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub success: bool,
    pub score: Option<f64>,
}

impl Verification {
    fn from_body(body: &str) -> Result<Self> {
        let v: Value = serde_json::from_str(body)
            .map_err(|e| ShapeError::Other(format!("undecodable reCAPTCHA response: {e}")))?;
        Ok(Self {
            success: v.get("success").and_then(Value::as_bool).unwrap_or(false),
            score: v.get("score").and_then(Value::as_f64),
        })
    }
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, secret: &str, token: &str, remote_ip: Option<&str>) -> Result<Verification>;
}

// ---------------------------------------------------------------------------
// HttpTokenVerifier
// ---------------------------------------------------------------------------

pub struct HttpTokenVerifier {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpTokenVerifier {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(VERIFY_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ShapeError::Other(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl TokenVerifier for HttpTokenVerifier {
    fn verify(&self, secret: &str, token: &str, remote_ip: Option<&str>) -> Result<Verification> {
        let mut params = vec![("secret", secret), ("response", token)];
        if let Some(ip) = remote_ip {
            params.push(("remoteip", ip));
        }
        let body = self
            .client
            .post(&self.endpoint)
            .form(&params)
            .send()
            .and_then(|response| response.text())
            .map_err(|e| {
                ShapeError::Other(format!("reCAPTCHA verification request failed: {e}"))
            })?;
        Verification::from_body(&body)
    }
}

// ---------------------------------------------------------------------------
// Hook
// ---------------------------------------------------------------------------

/// Register the reCAPTCHA check as a spam-analysis hook.
pub fn register_recaptcha(hooks: &mut Hooks, verifier: Arc<dyn TokenVerifier>) {
    hooks.on_spam_analysis("google_recaptcha", move |event| {
        analyze_recaptcha(verifier.as_ref(), event)
    });
}

fn analyze_recaptcha(verifier: &dyn TokenVerifier, event: &mut SpamAnalysisEvent<'_>) {
    let runtime = event.runtime;
    let settings = &runtime.settings().spam_protection.google_recaptcha;
    if !settings.enabled || settings.secret_key.is_empty() {
        return;
    }
    let token = runtime
        .post_values()
        .get(RECAPTCHA_RESPONSE_FIELD)
        .and_then(Value::as_str)
        .unwrap_or_default();
    if token.is_empty() {
        event.add_reason(
            REASON_RECAPTCHA_MISSING,
            json!({ "message": "The reCAPTCHA token is missing." }),
        );
        return;
    }

    let remote_ip = runtime.request().attributes.remote_address.as_deref();
    let verification = match verifier.verify(&settings.secret_key, token, remote_ip) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "reCAPTCHA verification unavailable; accepting submission");
            return;
        }
    };

    match settings.version {
        RecaptchaVersion::V2 => {
            if !verification.success {
                event.add_reason(
                    REASON_RECAPTCHA_FAILED,
                    json!({ "message": "The reCAPTCHA check failed." }),
                );
            }
        }
        // v3 judges by score alone; a failed check carries no score.
        RecaptchaVersion::V3 => {
            let score = verification.score.unwrap_or(0.0);
            if score < settings.minimum_score {
                event.add_reason(
                    REASON_RECAPTCHA_LOW_SCORE,
                    json!({
                        "message": format!(
                            "The reCAPTCHA score is too low: {score:.2} < {:.2}",
                            settings.minimum_score
                        ),
                        "score": score,
                        "minimumScore": settings.minimum_score,
                    }),
                );
            }
        }
    }
}
