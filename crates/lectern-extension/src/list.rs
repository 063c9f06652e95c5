//! Sequence helpers (`list.*` in scripts).
//!
//! The Lua bindings live in [`crate::host`]; this module holds the ordering
//! and identity rules they share. Every helper treats `nil` as an empty list.

use mlua::Value;

/// Lua truthiness: everything except `nil` and `false`.
pub fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

/// Default ordering used by `list.sort` without a comparator.
///
/// Numbers compare numerically, strings by bytes, booleans `false < true`.
/// Values of different kinds order by kind so the sort stays total.
pub fn default_less(a: &Value, b: &Value) -> bool {
    match (number(a), number(b)) {
        (Some(x), Some(y)) => return x < y,
        (Some(_), None) => return kind_rank(a) < kind_rank(b),
        (None, Some(_)) => return kind_rank(a) < kind_rank(b),
        (None, None) => {}
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => *x.as_bytes() < *y.as_bytes(),
        (Value::Boolean(x), Value::Boolean(y)) => !x & y,
        _ => kind_rank(a) < kind_rank(b),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Number(n) => Some(*n),
        _ => None,
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Nil => 0,
        Value::Boolean(_) => 1,
        Value::Integer(_) | Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Table(_) => 4,
        _ => 5,
    }
}

/// Identity key for `list.distinct`. Tables, functions and other reference
/// values have no key and are always kept.
pub fn distinct_key(value: &Value) -> Option<String> {
    match value {
        Value::Boolean(b) => Some(format!("b:{}", b)),
        Value::Integer(i) => Some(format!("n:{}", *i as f64)),
        Value::Number(n) => Some(format!("n:{}", n)),
        Value::String(s) => Some(format!("s:{}", hex::encode(&*s.as_bytes()))),
        _ => None,
    }
}

/// Stable merge sort driven by a fallible "less than" predicate.
///
/// Unlike `slice::sort_by` this tolerates comparators that are not a total
/// order and stops at the first comparator error.
pub fn sort_by<T, E, F>(items: Vec<T>, less: &mut F) -> Result<Vec<T>, E>
where
    F: FnMut(&T, &T) -> Result<bool, E>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = sort_by(left, less)?;
    let right = sort_by(right, less)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => less(r, l)?,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    Ok(merged)
}
