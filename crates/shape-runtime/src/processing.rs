//! Field value processing: business transformations applied after
//! serialization.

use serde_json::Value;

use crate::hooks::ValueEvent;
use crate::model::Field;
use crate::runtime::FormRuntime;

/// Same dispatch rules as [`serialize`](crate::serialization::serialize), on
/// the processing hook list.
pub fn process(runtime: &FormRuntime, field: &Field, value: &Value) -> Value {
    let mut event = ValueEvent::new(runtime, field, value);
    runtime
        .services()
        .hooks
        .value_processing
        .dispatch(&mut event, |hook, event| hook(event));
    event.into_replacement().unwrap_or_else(|| value.clone())
}
