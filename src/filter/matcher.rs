//! In-process evaluation of the where dialect, the counterpart of `FilterWhere`
//! for stores that hold records in memory.

use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::error::FilterError;
use super::filter::{is_identifier, Filter};
use super::types::{FilterOp, FilterWhereOptions, SortDirection};

pub struct FilterMatcher;

impl FilterMatcher {
    /// Run a compiled filter over `records`: where, order, offset, limit, select.
    pub fn apply(filter: &Filter, records: impl IntoIterator<Item = Map<String, Value>>) -> Result<Vec<Map<String, Value>>, FilterError> {
        let options = filter.where_options();
        let mut matched = Vec::new();
        for record in records {
            if Self::matches_with_options(filter.where_data(), &record, &options)? {
                matched.push(record);
            }
        }

        let order = filter.order_data();
        if !order.is_empty() {
            matched.sort_by(|a, b| {
                for info in order {
                    let left = a.get(&info.column).unwrap_or(&Value::Null);
                    let right = b.get(&info.column).unwrap_or(&Value::Null);
                    let ord = compare_for_sort(left, right);
                    let ord = if info.sort == SortDirection::Desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = filter.offset_value().unwrap_or(0).max(0) as usize;
        let limit = filter.limit_value().map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        let columns = filter.select_columns();
        let project = !columns.is_empty() && !columns.iter().any(|c| c == "*");

        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|record| {
                if project {
                    columns
                        .iter()
                        .filter_map(|c| record.get(c).map(|v| (c.clone(), v.clone())))
                        .collect()
                } else {
                    record
                }
            })
            .collect())
    }

    pub fn matches_with_options(where_data: Option<&Value>, record: &Map<String, Value>, options: &FilterWhereOptions) -> Result<bool, FilterError> {
        if options.excludes_deleted() && !record.get("deleted_at").unwrap_or(&Value::Null).is_null() {
            return Ok(false);
        }
        match where_data {
            Some(where_data) => Self::matches(where_data, record),
            None => Ok(true),
        }
    }

    pub fn matches(where_data: &Value, record: &Map<String, Value>) -> Result<bool, FilterError> {
        let obj = match where_data {
            Value::Null => return Ok(true),
            Value::Object(obj) => obj,
            _ => return Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        };

        for (key, value) in obj {
            let ok = match key.as_str() {
                "$and" => {
                    let items = value.as_array().ok_or_else(|| FilterError::InvalidOperatorData("$and requires array".to_string()))?;
                    let mut all = true;
                    for item in items {
                        all &= Self::matches_operand(item, record)?;
                    }
                    all
                }
                "$or" => {
                    let items = value.as_array().ok_or_else(|| FilterError::InvalidOperatorData("$or requires array".to_string()))?;
                    let mut any = false;
                    for item in items {
                        any |= Self::matches_operand(item, record)?;
                    }
                    any
                }
                "$not" => !Self::matches_operand(value, record)?,
                op if op.starts_with('$') => return Err(FilterError::UnsupportedOperator(op.to_string())),
                field => Self::matches_field(field, value, record)?,
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches_operand(value: &Value, record: &Map<String, Value>) -> Result<bool, FilterError> {
        if !value.is_object() {
            return Err(FilterError::InvalidWhereClause("Logical operands must be objects".to_string()));
        }
        Self::matches(value, record)
    }

    fn matches_field(field: &str, condition: &Value, record: &Map<String, Value>) -> Result<bool, FilterError> {
        if !is_identifier(field) {
            return Err(FilterError::InvalidColumn(format!("Invalid column name format: {}", field)));
        }
        let actual = record.get(field).unwrap_or(&Value::Null);

        match condition {
            Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
                for (op_key, expected) in ops {
                    let op = FilterOp::parse(op_key).ok_or_else(|| FilterError::UnsupportedOperator(op_key.clone()))?;
                    if !Self::evaluate(op, actual, expected)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            expected => Self::evaluate(FilterOp::Eq, actual, expected),
        }
    }

    fn evaluate(op: FilterOp, actual: &Value, expected: &Value) -> Result<bool, FilterError> {
        Ok(match op {
            FilterOp::Eq => values_equal(actual, expected),
            // SQL semantics: comparisons against NULL are never true
            FilterOp::Ne if expected.is_null() => !actual.is_null(),
            FilterOp::Ne => !actual.is_null() && !values_equal(actual, expected),
            FilterOp::Gt => compare(actual, expected) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(compare(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::Lt => compare(actual, expected) == Some(Ordering::Less),
            FilterOp::Lte => matches!(compare(actual, expected), Some(Ordering::Less | Ordering::Equal)),
            FilterOp::Like | FilterOp::ILike => match (actual.as_str(), expected.as_str()) {
                (Some(text), Some(pattern)) if op == FilterOp::ILike => like(&text.to_lowercase(), &pattern.to_lowercase()),
                (Some(text), Some(pattern)) => like(text, pattern),
                _ => false,
            },
            FilterOp::In => match expected {
                Value::Array(values) => values.iter().any(|v| values_equal(actual, v)),
                other => values_equal(actual, other),
            },
            FilterOp::NIn if actual.is_null() => false,
            FilterOp::NIn => match expected {
                Value::Array(values) => !values.iter().any(|v| values_equal(actual, v)),
                other => !values_equal(actual, other),
            },
            FilterOp::Between => match expected {
                Value::Array(bounds) if bounds.len() == 2 => {
                    matches!(compare(actual, &bounds[0]), Some(Ordering::Greater | Ordering::Equal))
                        && matches!(compare(actual, &bounds[1]), Some(Ordering::Less | Ordering::Equal))
                }
                _ => return Err(FilterError::InvalidOperatorData("$between requires array with 2 values".to_string())),
            },
            FilterOp::Any => {
                let wanted = as_list(expected);
                actual.as_array().is_some_and(|have| have.iter().any(|h| wanted.iter().any(|w| values_equal(h, w))))
            }
            FilterOp::All => {
                let wanted = as_list(expected);
                actual.as_array().is_some_and(|have| wanted.iter().all(|w| have.iter().any(|h| values_equal(h, w))))
            }
            FilterOp::Size => {
                let len = actual.as_array().map(Vec::len).unwrap_or(0) as f64;
                expected.as_f64() == Some(len)
            }
            FilterOp::Null => match expected {
                Value::Bool(want_null) => actual.is_null() == *want_null,
                _ => return Err(FilterError::InvalidOperatorData("$null requires a boolean".to_string())),
            },
        })
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values.clone(),
        other => vec![other.clone()],
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order for sorting; NULLs sort last ascending, like Postgres.
fn compare_for_sort(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare(a, b).unwrap_or_else(|| a.to_string().cmp(&b.to_string())),
    }
}

/// SQL LIKE with `%` and `_` wildcards.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let (mut star, mut mark) = (None, 0);

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '%' {
        p += 1;
    }
    p == pattern.len()
}
