//! Engine values
//!
//! Primitive values are stored inline. Objects live in the isolate heap and
//! are addressed through generational [`ObjectRef`]s, so a reference to a
//! collected object is detected instead of aliasing whatever reuses the slot.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Reference to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjectRef {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the heap (stable while the object is alive)
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Handle keeping a value alive outside of script execution
///
/// Persistents are strong roots until they are made weak. They are plain
/// indices and must be released with [`crate::Isolate::reset_persistent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Persistent {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// A JavaScript value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int32(i32),
    Number(f64),
    String(Arc<str>),
    Object(ObjectRef),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    /// Number value, normalized to `Int32` when it is integral and in range
    pub fn number(n: f64) -> Self {
        if is_int32(n) {
            Value::Int32(n as i32)
        } else {
            Value::Number(n)
        }
    }

    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Numeric view of a primitive (`ToNumber` without object conversion)
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Int32(i) => *i as f64,
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Object(_) => f64::NAN,
        }
    }

    /// `ToBoolean`
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int32(i) => *i != 0,
            Value::Number(n) => !(n.is_nan() || *n == 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int32(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

/// Classification of a value, checked in a fixed order so that a boxed
/// primitive is never reported as a plain object and an integral number is
/// reported as `Int32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    BoolObject,
    Int32,
    Number,
    NumberObject,
    String,
    StringObject,
    Date,
    Array,
    RegExp,
    Null,
    Function,
    /// Error objects created by the `Error` constructors
    NativeError,
    Undefined,
    Object,
}

impl ValueKind {
    pub fn is_object(self) -> bool {
        matches!(
            self,
            ValueKind::BoolObject
                | ValueKind::NumberObject
                | ValueKind::StringObject
                | ValueKind::Date
                | ValueKind::Array
                | ValueKind::RegExp
                | ValueKind::Function
                | ValueKind::NativeError
                | ValueKind::Object
        )
    }
}

/// Property attribute flags (same bit values as the embedder API they mirror)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PropertyAttributes(u32);

impl PropertyAttributes {
    pub const NONE: Self = Self(0);
    pub const READ_ONLY: Self = Self(1);
    pub const DONT_ENUM: Self = Self(2);
    pub const DONT_DELETE: Self = Self(4);
    pub const LOCKED: Self = Self(5);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & 7)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PropertyAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

pub(crate) fn is_int32(n: f64) -> bool {
    n.fract() == 0.0
        && n >= i32::MIN as f64
        && n <= i32::MAX as f64
        && !(n == 0.0 && n.is_sign_negative())
}

pub(crate) fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// `Number.prototype.toString()` for radix 10
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{}", n as i64);
    }
    let abs = n.abs();
    if !(1e-7..1e21).contains(&abs) {
        let formatted = format!("{:e}", n);
        // Rust renders `1e21`; JavaScript renders `1e+21`.
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => formatted,
        };
    }
    format!("{}", n)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int32(i) => write!(f, "{i}"),
            Value::Number(n) => f.write_str(&number_to_string(*n)),
            Value::String(s) => f.write_str(s),
            Value::Object(obj) => write!(f, "[object #{}]", obj.index),
        }
    }
}
