//! Row filter expressions for `delete_data` and `create_subtable`.
//!
//! Filters are plain data so they can cross the invocation channel. They are
//! evaluated against one row at a time through a column lookup closure.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FilterError;

/// Maximum nesting depth for filter expressions.
const MAX_FILTER_DEPTH: usize = 16;

/// A boolean predicate over the cells of a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: String, value: Value },
    Ne { column: String, value: Value },
    Lt { column: String, value: Value },
    Le { column: String, value: Value },
    Gt { column: String, value: Value },
    Ge { column: String, value: Value },
    IsNull { column: String },
    And { all: Vec<Filter> },
    Or { any: Vec<Filter> },
    Not { filter: Box<Filter> },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Le {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ge {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull {
            column: column.into(),
        }
    }

    pub fn and(all: Vec<Filter>) -> Self {
        Filter::And { all }
    }

    pub fn or(any: Vec<Filter>) -> Self {
        Filter::Or { any }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not {
            filter: Box::new(filter),
        }
    }

    /// Every column name referenced anywhere in the expression.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Eq { column, .. }
            | Filter::Ne { column, .. }
            | Filter::Lt { column, .. }
            | Filter::Le { column, .. }
            | Filter::Gt { column, .. }
            | Filter::Ge { column, .. }
            | Filter::IsNull { column } => out.push(column),
            Filter::And { all: list } | Filter::Or { any: list } => {
                for f in list {
                    f.collect_columns(out);
                }
            }
            Filter::Not { filter } => filter.collect_columns(out),
        }
    }

    /// Evaluate against a row. `cell` returns the value of a named column;
    /// unknown columns read as `null`.
    pub fn matches<'a, F>(&self, cell: &F) -> Result<bool, FilterError>
    where
        F: Fn(&str) -> Option<&'a Value>,
    {
        self.matches_inner(cell, 0)
    }

    fn matches_inner<'a, F>(&self, cell: &F, depth: usize) -> Result<bool, FilterError>
    where
        F: Fn(&str) -> Option<&'a Value>,
    {
        if depth > MAX_FILTER_DEPTH {
            return Err(FilterError::InvalidExpression(format!(
                "expression depth exceeds maximum of {MAX_FILTER_DEPTH}"
            )));
        }

        let lookup = |column: &str| cell(column).unwrap_or(&Value::Null);

        match self {
            Filter::Eq { column, value } => {
                Ok(compare_values(lookup(column), value) == Some(Ordering::Equal))
            }
            Filter::Ne { column, value } => {
                Ok(compare_values(lookup(column), value) != Some(Ordering::Equal))
            }
            Filter::Lt { column, value } => {
                Ok(compare_values(lookup(column), value) == Some(Ordering::Less))
            }
            Filter::Le { column, value } => Ok(matches!(
                compare_values(lookup(column), value),
                Some(Ordering::Less | Ordering::Equal)
            )),
            Filter::Gt { column, value } => {
                Ok(compare_values(lookup(column), value) == Some(Ordering::Greater))
            }
            Filter::Ge { column, value } => Ok(matches!(
                compare_values(lookup(column), value),
                Some(Ordering::Greater | Ordering::Equal)
            )),
            Filter::IsNull { column } => Ok(lookup(column).is_null()),
            Filter::And { all } => {
                for f in all {
                    if !f.matches_inner(cell, depth + 1)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or { any } => {
                for f in any {
                    if f.matches_inner(cell, depth + 1)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Not { filter } => Ok(!filter.matches_inner(cell, depth + 1)?),
        }
    }
}

/// Compare two cell values, returning an ordering if the types are comparable.
///
/// Numbers compare as f64, strings lexicographically, booleans false < true,
/// and null equals only null. Mismatched types yield `None`.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Total order used for sorting group keys: null < bool < number < string.
pub fn sort_order(left: &Value, right: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    compare_values(left, right).unwrap_or_else(|| rank(left).cmp(&rank(right)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> Vec<(&'static str, Value)> {
        vec![
            ("name", json!("Alice")),
            ("age", json!(30)),
            ("score", json!(95.5)),
            ("active", json!(true)),
            ("note", Value::Null),
        ]
    }

    fn eval(f: &Filter) -> bool {
        let cells = row();
        f.matches(&|c: &str| cells.iter().find(|(n, _)| *n == c).map(|(_, v)| v))
            .unwrap()
    }

    #[test]
    fn test_filter_comparisons() {
        assert!(eval(&Filter::eq("name", "Alice")));
        assert!(eval(&Filter::ne("name", "Bob")));
        assert!(eval(&Filter::gt("age", 29)));
        assert!(eval(&Filter::le("score", 95.5)));
        assert!(!eval(&Filter::lt("age", 30)));
        assert!(eval(&Filter::ge("age", 30.0)));
    }

    #[test]
    fn test_filter_type_mismatch_is_false() {
        assert!(!eval(&Filter::eq("age", "30")));
        assert!(!eval(&Filter::gt("name", 1)));
    }

    #[test]
    fn test_filter_null_and_missing() {
        assert!(eval(&Filter::is_null("note")));
        assert!(eval(&Filter::is_null("missing")));
        assert!(!eval(&Filter::is_null("age")));
    }

    #[test]
    fn test_filter_boolean_logic() {
        let f = Filter::and(vec![
            Filter::eq("active", true),
            Filter::or(vec![Filter::lt("age", 18), Filter::gt("score", 90)]),
        ]);
        assert!(eval(&f));
        assert!(!eval(&Filter::not(f)));
        assert!(eval(&Filter::and(vec![])));
        assert!(!eval(&Filter::or(vec![])));
    }

    #[test]
    fn test_filter_depth_limit() {
        let mut f = Filter::is_null("note");
        for _ in 0..20 {
            f = Filter::not(f);
        }
        let cells = row();
        let result = f.matches(&|c: &str| cells.iter().find(|(n, _)| *n == c).map(|(_, v)| v));
        assert!(matches!(result, Err(FilterError::InvalidExpression(_))));
    }

    #[test]
    fn test_filter_columns_and_wire_shape() {
        let f = Filter::and(vec![Filter::eq("a", 1), Filter::not(Filter::is_null("b"))]);
        assert_eq!(f.columns(), vec!["a", "b"]);

        let wire = serde_json::to_value(Filter::gt("age", 3)).unwrap();
        assert_eq!(wire, json!({"op": "gt", "column": "age", "value": 3}));
    }

    #[test]
    fn test_sort_order_mixed_types() {
        assert_eq!(sort_order(&Value::Null, &json!(1)), Ordering::Less);
        assert_eq!(sort_order(&json!("a"), &json!(2)), Ordering::Greater);
        assert_eq!(sort_order(&json!(1), &json!(2)), Ordering::Less);
    }
}
