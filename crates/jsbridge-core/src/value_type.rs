//! Value type tags shared with the managed side
//!
//! The numbering is part of the interop contract: negative values are the
//! script failure kinds, zero means "not yet initialized".

use serde::{Deserialize, Serialize};

use jsbridge_engine::ValueKind;

/// Kind of value a handle proxy wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ValueType {
    ExecutionTerminated = -4,
    CompilerError = -3,
    ExecutionError = -2,
    InternalError = -1,
    Uninitialized = 0,
    Undefined = 1,
    Script = 2,
    Null = 3,
    Bool = 4,
    BoolObject = 5,
    Int32 = 6,
    Number = 7,
    NumberObject = 8,
    String = 9,
    StringObject = 10,
    Object = 11,
    Function = 12,
    Date = 13,
    Array = 14,
    RegExp = 15,
}

impl ValueType {
    pub const ERRORS: [ValueType; 4] = [
        ValueType::ExecutionTerminated,
        ValueType::CompilerError,
        ValueType::ExecutionError,
        ValueType::InternalError,
    ];

    /// `true` for the script failure kinds
    pub fn is_error(self) -> bool {
        (self as i32) < 0
    }

    /// `true` when the wrapped value is an engine object
    pub fn is_object(self) -> bool {
        matches!(
            self,
            ValueType::BoolObject
                | ValueType::NumberObject
                | ValueType::StringObject
                | ValueType::Object
                | ValueType::Function
                | ValueType::Date
                | ValueType::Array
                | ValueType::RegExp
        )
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            -4 => ValueType::ExecutionTerminated,
            -3 => ValueType::CompilerError,
            -2 => ValueType::ExecutionError,
            -1 => ValueType::InternalError,
            0 => ValueType::Uninitialized,
            1 => ValueType::Undefined,
            2 => ValueType::Script,
            3 => ValueType::Null,
            4 => ValueType::Bool,
            5 => ValueType::BoolObject,
            6 => ValueType::Int32,
            7 => ValueType::Number,
            8 => ValueType::NumberObject,
            9 => ValueType::String,
            10 => ValueType::StringObject,
            11 => ValueType::Object,
            12 => ValueType::Function,
            13 => ValueType::Date,
            14 => ValueType::Array,
            15 => ValueType::RegExp,
            _ => return None,
        })
    }
}

impl From<ValueKind> for ValueType {
    fn from(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Bool => ValueType::Bool,
            ValueKind::BoolObject => ValueType::BoolObject,
            ValueKind::Int32 => ValueType::Int32,
            ValueKind::Number => ValueType::Number,
            ValueKind::NumberObject => ValueType::NumberObject,
            ValueKind::String => ValueType::String,
            ValueKind::StringObject => ValueType::StringObject,
            ValueKind::Date => ValueType::Date,
            ValueKind::Array => ValueType::Array,
            ValueKind::RegExp => ValueType::RegExp,
            ValueKind::Null => ValueType::Null,
            ValueKind::Function => ValueType::Function,
            ValueKind::Undefined => ValueType::Undefined,
            // error instances are ordinary objects to the managed side
            ValueKind::NativeError | ValueKind::Object => ValueType::Object,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        for kind in ValueType::ERRORS {
            assert!(kind.is_error());
        }
        assert!(!ValueType::Uninitialized.is_error());
        assert!(!ValueType::Object.is_error());
    }

    #[test]
    fn test_numbering_round_trips() {
        for raw in -4..=15 {
            let kind = ValueType::from_i32(raw).unwrap();
            assert_eq!(kind.as_i32(), raw);
        }
        assert_eq!(ValueType::from_i32(16), None);
        assert_eq!(ValueType::from_i32(-5), None);
    }

    #[test]
    fn test_from_kind() {
        assert_eq!(ValueType::from(ValueKind::NativeError), ValueType::Object);
        assert_eq!(ValueType::from(ValueKind::Array), ValueType::Array);
        assert!(ValueType::from(ValueKind::Date).is_object());
        assert!(!ValueType::from(ValueKind::String).is_object());
    }
}
