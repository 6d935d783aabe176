//! Scalar values carried in records and node properties, with the total order
//! used by `ORDER BY`.

use std::cmp::Ordering;
use std::sync::Arc;

/// Runtime value flowing through the executor.
///
/// Strings and lists are reference counted, so cloning a record never deep-copies
/// them and a record outliving its source needs no extra persistence step.
#[derive(Clone, Debug)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(Arc<str>),
    /// Ordered list of values.
    List(Arc<[Value]>),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::List(_) => 4,
        }
    }

    /// Total order: nulls first, then booleans, numbers (integers and floats
    /// compare numerically), strings, lists. NaN sorts above every other number.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => cmp_floats(*a, *b),
            (Value::Int(a), Value::Float(b)) => cmp_int_float(*a, *b),
            (Value::Float(a), Value::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Numeric order with `-0.0 == 0.0` and every NaN equal and greatest, so floats
/// agree with [`cmp_int_float`].
fn cmp_floats(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Exact comparison. Converting `a` to `f64` would round above 2^53 and make
/// distinct integers equal to the same float.
fn cmp_int_float(a: i64, b: f64) -> Ordering {
    // 2^63: the first float above every i64.
    const I64_END: f64 = 9_223_372_036_854_775_808.0;
    if b.is_nan() || b >= I64_END {
        return Ordering::Less;
    }
    if b < -I64_END {
        return Ordering::Greater;
    }
    let whole = b.trunc();
    match a.cmp(&(whole as i64)) {
        Ordering::Equal => whole.partial_cmp(&b).unwrap_or(Ordering::Equal),
        unequal => unequal,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(Arc::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_sort_lowest() {
        assert_eq!(Value::Null.total_cmp(&Value::Int(i64::MIN)), Ordering::Less);
        assert_eq!(Value::Null.total_cmp(&Value::from("")), Ordering::Less);
        assert_eq!(Value::Null.total_cmp(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn numbers_compare_across_int_and_float() {
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(Value::Float(3.0).total_cmp(&Value::Int(3)), Ordering::Equal);
        assert_eq!(Value::Float(f64::NAN).total_cmp(&Value::Int(9)), Ordering::Greater);
    }

    #[test]
    fn large_integers_compare_exactly_with_floats() {
        let two_53 = 1i64 << 53;
        let float = Value::Float(two_53 as f64);
        assert_eq!(Value::Int(two_53).total_cmp(&float), Ordering::Equal);
        assert_eq!(Value::Int(two_53 + 1).total_cmp(&float), Ordering::Greater);
        assert_eq!(float.total_cmp(&Value::Int(two_53 + 1)), Ordering::Less);
        assert_eq!(Value::Int(i64::MAX).total_cmp(&Value::Float(9.3e18)), Ordering::Less);
        assert_eq!(Value::Int(i64::MIN).total_cmp(&Value::Float(i64::MIN as f64)), Ordering::Equal);
        assert_eq!(Value::Int(i64::MIN).total_cmp(&Value::Float(f64::NEG_INFINITY)), Ordering::Greater);
        assert_eq!(Value::Int(-3).total_cmp(&Value::Float(-2.5)), Ordering::Less);
        assert_eq!(Value::Int(-2).total_cmp(&Value::Float(-2.5)), Ordering::Greater);
    }

    #[test]
    fn signed_zeros_and_nans_are_equal_among_themselves() {
        assert_eq!(Value::Float(-0.0).total_cmp(&Value::Float(0.0)), Ordering::Equal);
        assert_eq!(Value::Int(0).total_cmp(&Value::Float(-0.0)), Ordering::Equal);
        assert_eq!(Value::Float(-f64::NAN).total_cmp(&Value::Float(f64::NAN)), Ordering::Equal);
        assert_eq!(Value::Float(f64::INFINITY).total_cmp(&Value::Float(f64::NAN)), Ordering::Less);
    }

    #[test]
    fn types_order_by_rank() {
        assert_eq!(Value::Bool(true).total_cmp(&Value::Int(0)), Ordering::Less);
        assert_eq!(Value::from("a").total_cmp(&Value::Int(100)), Ordering::Greater);
        let list = Value::from(vec![Value::Int(1), Value::Int(2)]);
        let shorter = Value::from(vec![Value::Int(1)]);
        assert_eq!(shorter.total_cmp(&list), Ordering::Less);
    }
}
