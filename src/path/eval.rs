//! AST evaluation against a JSON value.
//!
//! Evaluation never mutates the input; matched values are cloned out.
//! Wildcards, filters, slices and multi-match descents produce a
//! *projection*: a following property segment is applied to every element of
//! the projected array instead of to the array itself.

use std::cmp::Ordering;

use serde_json::Value;

use super::lexer::CmpOp;
use super::parser::{PathExpr, Predicate, Segment};

struct Cursor {
    value: Value,
    projected: bool,
}

impl PathExpr {
    /// Evaluate this expression against `data`.
    pub fn evaluate(&self, data: &Value) -> Option<Value> {
        let mut cursor = Cursor {
            value: data.clone(),
            projected: false,
        };

        for segment in &self.segments {
            cursor = apply(segment, cursor)?;
        }

        Some(cursor.value)
    }
}

fn apply(segment: &Segment, cursor: Cursor) -> Option<Cursor> {
    match segment {
        Segment::Property(name) => {
            if cursor.projected {
                if let Value::Array(items) = &cursor.value {
                    let mapped: Vec<Value> = items
                        .iter()
                        .filter_map(|item| property(item, name).cloned())
                        .collect();
                    if mapped.is_empty() {
                        return None;
                    }
                    return Some(Cursor {
                        value: Value::Array(mapped),
                        projected: true,
                    });
                }
            }
            property(&cursor.value, name).cloned().map(single)
        }
        Segment::Index(index) => match &cursor.value {
            Value::Array(items) => normalize_index(*index, items.len())
                .and_then(|i| items.get(i))
                .cloned()
                .map(single),
            Value::Object(map) => map.get(&index.to_string()).cloned().map(single),
            _ => None,
        },
        Segment::Wildcard => match cursor.value {
            Value::Array(items) => Some(projection(items)),
            Value::Object(map) => Some(projection(map.into_iter().map(|(_, v)| v).collect())),
            _ => None,
        },
        Segment::Descendant(name) => {
            let mut found = Vec::new();
            collect_named(&cursor.value, name, &mut found);
            match found.len() {
                0 => None,
                1 => found.pop().map(single),
                _ => Some(projection(found)),
            }
        }
        Segment::DescendantAll => {
            let mut found = Vec::new();
            collect_all(&cursor.value, &mut found);
            Some(projection(found))
        }
        Segment::Filter(predicate) => {
            let candidates: Vec<&Value> = match &cursor.value {
                Value::Array(items) => items.iter().collect(),
                Value::Object(map) => map.values().collect(),
                _ => return None,
            };
            let matched = candidates
                .into_iter()
                .filter(|item| matches_predicate(item, predicate))
                .cloned()
                .collect();
            Some(projection(matched))
        }
        Segment::Slice { start, end, step } => match &cursor.value {
            Value::Array(items) => slice(items, *start, *end, *step).map(projection),
            _ => None,
        },
    }
}

fn single(value: Value) -> Cursor {
    Cursor {
        value,
        projected: false,
    }
}

fn projection(items: Vec<Value>) -> Cursor {
    Cursor {
        value: Value::Array(items),
        projected: true,
    }
}

fn property<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(name),
        Value::Array(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    if resolved < 0 || resolved >= len {
        None
    } else {
        Some(resolved as usize)
    }
}

/// Pre-order search: a node's own match comes before matches in its children.
fn collect_named(value: &Value, name: &str, found: &mut Vec<Value>) {
    match value {
        Value::Object(map) => {
            if let Some(hit) = map.get(name) {
                found.push(hit.clone());
            }
            for child in map.values() {
                collect_named(child, name, found);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_named(child, name, found);
            }
        }
        _ => {}
    }
}

fn collect_all(value: &Value, found: &mut Vec<Value>) {
    let children: Box<dyn Iterator<Item = &Value>> = match value {
        Value::Object(map) => Box::new(map.values()),
        Value::Array(items) => Box::new(items.iter()),
        _ => return,
    };
    for child in children {
        found.push(child.clone());
        collect_all(child, found);
    }
}

/// Standard slice semantics: half-open bounds, negative indices count from the
/// end, negative steps walk backwards. A zero step is malformed.
fn slice(items: &[Value], start: Option<i64>, end: Option<i64>, step: Option<i64>) -> Option<Vec<Value>> {
    let len = items.len() as i64;
    let step = step.unwrap_or(1);
    if step == 0 {
        return None;
    }

    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |bound: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(lower, upper)
    };

    let start = start.map(clamp).unwrap_or(if step > 0 { lower } else { upper });
    let end = end.map(clamp).unwrap_or(if step > 0 { upper } else { lower });

    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        if let Some(item) = items.get(i as usize) {
            out.push(item.clone());
        }
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Some(out)
}

fn matches_predicate(item: &Value, predicate: &Predicate) -> bool {
    let mut current = item;
    for name in &predicate.field {
        match property(current, name) {
            Some(next) => current = next,
            None => return false,
        }
    }

    match &predicate.test {
        None => is_truthy(current),
        Some((op, literal)) => compare(current, *op, &literal.to_value()),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Compare two JSON values with a filter operator.
///
/// Equality is type-strict except that integers and floats compare
/// numerically. Ordering is defined only for number/number and
/// string/string pairs; any other pairing is `false`.
pub fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::Ne => !values_equal(left, right),
        CmpOp::Gt => ordering(left, right) == Some(Ordering::Greater),
        CmpOp::Lt => ordering(left, right) == Some(Ordering::Less),
        CmpOp::Ge => matches!(ordering(left, right), Some(Ordering::Greater | Ordering::Equal)),
        CmpOp::Le => matches!(ordering(left, right), Some(Ordering::Less | Ordering::Equal)),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
