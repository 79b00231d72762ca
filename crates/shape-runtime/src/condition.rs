//! Field visibility conditions.

use shape_expr::Resolver;
use shape_types::Result;

use crate::model::Field;
use crate::runtime::FormRuntime;

/// Whether `field` is currently visible.
///
/// Fields without a condition are always visible. The resolver must be the
/// one scoped to the page being acted on, so results are never reused across
/// pages or requests.
pub fn evaluate(runtime: &FormRuntime, field: &Field, resolver: &Resolver) -> Result<bool> {
    let Some(condition) = field.condition() else {
        return Ok(true);
    };
    let visible = resolver.evaluate_bool(condition)?;
    tracing::debug!(
        form = %runtime.form().name,
        field = %field.name,
        condition,
        visible,
        "Field condition evaluated"
    );
    Ok(visible)
}
