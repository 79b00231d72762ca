//! Built-in finishers.

mod message;
mod redirect;
mod save_submission;

pub use message::MessageFinisher;
pub use redirect::RedirectFinisher;
pub use save_submission::SaveSubmissionFinisher;

pub const CODE_MISSING_SETTING: u64 = 2001;
pub const CODE_INVALID_SETTING: u64 = 2002;

fn missing_setting(finisher: &str, key: &str) -> shape_types::ValidationError {
    shape_types::ValidationError::for_property(
        key,
        format!("The {finisher} finisher requires a '{key}' setting."),
        CODE_MISSING_SETTING,
    )
}
