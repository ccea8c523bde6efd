// Workflow Conditions - Evaluation of flat condition lists against event data

use guildflow_shared::{Condition, LogicConnector};
use serde_json::Value;
use std::str::FromStr;
use tracing::warn;

static NULL: Value = Value::Null;

/// Condition operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperator(pub String);

impl FromStr for ConditionOperator {
    type Err = UnknownOperator;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let operator = match tag {
            "equals" | "eq" | "==" => Self::Equals,
            "not_equals" | "ne" | "!=" => Self::NotEquals,
            "greater_than" | "gt" | ">" => Self::GreaterThan,
            "less_than" | "lt" | "<" => Self::LessThan,
            "greater_or_equal" | "greater_than_or_equals" | "gte" | ">=" => Self::GreaterOrEqual,
            "less_or_equal" | "less_than_or_equals" | "lte" | "<=" => Self::LessOrEqual,
            "contains" => Self::Contains,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "is_null" => Self::IsNull,
            "is_not_null" => Self::IsNotNull,
            other => return Err(UnknownOperator(other.to_string())),
        };
        Ok(operator)
    }
}

/// Evaluate a condition list as a left fold.
///
/// Each condition's connector joins the running result with the *next* condition, so
/// `A OR B AND C` is `(A OR B) AND C`. There is no precedence and no grouping.
/// An empty list always matches.
pub fn evaluate(conditions: &[Condition], data: &Value) -> bool {
    let Some((first, rest)) = conditions.split_first() else {
        return true;
    };

    let mut result = evaluate_condition(first, data);
    let mut connector = first.logic;

    for condition in rest {
        let value = evaluate_condition(condition, data);
        result = match connector {
            LogicConnector::And => result && value,
            LogicConnector::Or => result || value,
        };
        connector = condition.logic;
    }

    result
}

/// Evaluate one condition. Unknown operators evaluate to `false`.
pub fn evaluate_condition(condition: &Condition, data: &Value) -> bool {
    let operator = match condition.operator.parse::<ConditionOperator>() {
        Ok(operator) => operator,
        Err(UnknownOperator(tag)) => {
            warn!(
                field = %condition.field,
                "Unknown condition operator '{}', treating condition as false",
                tag
            );
            return false;
        }
    };

    let actual = resolve_path(data, &condition.field);
    let expected = &condition.value;

    match operator {
        ConditionOperator::Equals => values_equal(actual, expected),
        ConditionOperator::NotEquals => !values_equal(actual, expected),
        ConditionOperator::GreaterThan => compare_numbers(actual, expected, |a, b| a > b),
        ConditionOperator::LessThan => compare_numbers(actual, expected, |a, b| a < b),
        ConditionOperator::GreaterOrEqual => compare_numbers(actual, expected, |a, b| a >= b),
        ConditionOperator::LessOrEqual => compare_numbers(actual, expected, |a, b| a <= b),
        ConditionOperator::Contains => match actual {
            Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
            _ => compare_strings(actual, expected, |s, p| s.contains(p)),
        },
        ConditionOperator::StartsWith => compare_strings(actual, expected, |s, p| s.starts_with(p)),
        ConditionOperator::EndsWith => compare_strings(actual, expected, |s, p| s.ends_with(p)),
        ConditionOperator::In => match expected.as_array() {
            Some(list) => list.iter().any(|item| values_equal(actual, item)),
            None => false,
        },
        ConditionOperator::NotIn => match expected.as_array() {
            Some(list) => !list.iter().any(|item| values_equal(actual, item)),
            None => false,
        },
        ConditionOperator::IsNull => actual.is_null(),
        ConditionOperator::IsNotNull => !actual.is_null(),
    }
}

/// Resolve a dotted path such as `member.roles.0`. Missing segments resolve to null.
pub fn resolve_path<'a>(data: &'a Value, path: &str) -> &'a Value {
    if path.is_empty() {
        return data;
    }

    let mut current = data;
    for segment in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };

        match next {
            Some(value) => current = value,
            None => return &NULL,
        }
    }

    current
}

/// Numbers compare numerically (`1 == 1.0`), everything else structurally
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn compare_numbers(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn compare_strings(actual: &Value, expected: &Value, cmp: impl Fn(&str, &str) -> bool) -> bool {
    match (actual.as_str(), expected.as_str()) {
        (Some(s), Some(pattern)) => cmp(&s.to_lowercase(), &pattern.to_lowercase()),
        _ => false,
    }
}
