//! Runtime value representation.
//!
//! Values live on the operand stack and in variable slots. Constants from
//! the container pool are converted into values when pushed.

use std::fmt;

/// Represents any value the stack machine can hold.
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// let count = Value::Int(3);
/// let ratio = Value::Float(2.5);
/// let label = Value::Str("rapat".to_string());
///
/// assert!(count.is_truthy());
/// assert!(!Value::None.is_truthy());
/// assert_eq!(ratio.type_name(), "float");
/// assert_eq!(label.to_string(), "rapat");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed 64-bit integer
    Int(i64),
    /// IEEE 754 double-precision floating point
    Float(f64),
    /// UTF-8 text
    Str(String),
    /// Absence of a value
    None,
}

impl Value {
    /// Returns whether this value counts as true for conditional jumps.
    ///
    /// Zero (integer or float), the empty string and `None` are falsy.
    /// Everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::None => false,
        }
    }

    /// Short type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::None => "none",
        }
    }

    /// Whether the value is an integer or a float
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Whether the value is text
    pub fn is_str(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether the value is numerically zero.
    ///
    /// Used by division and modulo, which treat a zero divisor as fatal.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Int(n) => *n == 0,
            Value::Float(n) => *n == 0.0,
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// Text form used by `PRINT` and string concatenation.
///
/// Integral floats keep one decimal digit so `5.0` and `5` stay
/// distinguishable in program output.
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// assert_eq!(Value::Int(42).to_string(), "42");
/// assert_eq!(Value::Float(5.0).to_string(), "5.0");
/// assert_eq!(Value::Float(2.5).to_string(), "2.5");
/// assert_eq!(Value::None.to_string(), "None");
/// ```
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.is_nan() {
                    write!(f, "nan")
                } else if n.is_infinite() {
                    if n.is_sign_positive() {
                        write!(f, "inf")
                    } else {
                        write!(f, "-inf")
                    }
                } else if n.fract() == 0.0 && n.abs() < 1e16 {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::None => write!(f, "None"),
        }
    }
}
