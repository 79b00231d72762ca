//! Field value serialization: storage-ready representation of a value.

use serde_json::Value;

use crate::hooks::ValueEvent;
use crate::model::Field;
use crate::runtime::FormRuntime;

/// The first serialization hook supplying a replacement wins; without one the
/// value is returned unchanged.
pub fn serialize(runtime: &FormRuntime, field: &Field, value: &Value) -> Value {
    let mut event = ValueEvent::new(runtime, field, value);
    runtime
        .services()
        .hooks
        .value_serialization
        .dispatch(&mut event, |hook, event| hook(event));
    match event.into_replacement() {
        Some(serialized) => {
            tracing::debug!(field = %field.name, "Value serialized by hook");
            serialized
        }
        None => value.clone(),
    }
}
