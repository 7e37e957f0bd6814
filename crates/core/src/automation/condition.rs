//! Guard-condition evaluation.
//!
//! Operands are compared leniently: equality and `contains` work on
//! stringified values, ordering operators coerce both sides to numbers.
//! Unresolved field paths behave as `null` rather than failing the run.

use relay_domain::{Condition, ConditionOperator};
use serde_json::Value;

use super::interpolate::{resolve_path, value_to_string};

/// Evaluate a guard condition against the execution context.
///
/// A false result skips the guarded action; it never aborts the run.
pub fn evaluate_condition(condition: &Condition, context: &Value) -> bool {
    let resolved = resolve_path(context, &condition.field).unwrap_or(Value::Null);

    match condition.operator {
        ConditionOperator::Equals => loose_equals(&resolved, &condition.value),
        ConditionOperator::NotEquals => !loose_equals(&resolved, &condition.value),
        // Substring match on stringified values. Numeric operands give the
        // inherited behavior: 10 contains 1 is true.
        ConditionOperator::Contains => {
            value_to_string(&resolved).contains(&value_to_string(&condition.value))
        }
        ConditionOperator::GreaterThan => {
            matches!(numeric_pair(&resolved, &condition.value), Some((lhs, rhs)) if lhs > rhs)
        }
        ConditionOperator::LessThan => {
            matches!(numeric_pair(&resolved, &condition.value), Some((lhs, rhs)) if lhs < rhs)
        }
    }
}

/// Stringified equality, with `null` only equal to `null`.
///
/// Also used by the dispatcher's trigger field filters.
pub(crate) fn loose_equals(lhs: &Value, rhs: &Value) -> bool {
    if lhs.is_null() || rhs.is_null() {
        return lhs.is_null() && rhs.is_null();
    }
    value_to_string(lhs) == value_to_string(rhs)
}

/// Coerce both operands to numbers; `None` when either side refuses.
fn numeric_pair(lhs: &Value, rhs: &Value) -> Option<(f64, f64)> {
    Some((coerce_number(lhs)?, coerce_number(rhs)?))
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
