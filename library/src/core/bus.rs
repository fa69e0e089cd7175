//! Bus combine semantics.

use crate::error::LibraryError;
use crate::model::patch::CombineMode;
use crate::model::value::Value;

/// Combines publisher values, given in ascending sort-key order.
///
/// An empty publisher list yields `default`.
pub fn combine(
    mode: CombineMode,
    values: &[Value],
    default: &Value,
) -> Result<Value, LibraryError> {
    let Some((first, rest)) = values.split_first() else {
        return Ok(default.clone());
    };
    match mode {
        CombineMode::Sum => rest.iter().try_fold(first.clone(), |acc, v| acc.add(v)),
        CombineMode::Average => {
            let sum = rest.iter().try_fold(first.clone(), |acc, v| acc.add(v))?;
            sum.scale(1.0 / values.len() as f64)
        }
        CombineMode::Max => rest.iter().try_fold(first.clone(), |acc, v| acc.max(v)),
        CombineMode::Min => rest.iter().try_fold(first.clone(), |acc, v| acc.min(v)),
        // TODO: `layer` should composite by publisher order once the product
        // semantics are settled; for now it matches `last`.
        CombineMode::Last | CombineMode::Layer => Ok(values[values.len() - 1].clone()),
    }
}
