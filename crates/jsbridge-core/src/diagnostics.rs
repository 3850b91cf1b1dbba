//! Rendering of script failures for error-typed proxies

use jsbridge_engine::EngineError;

use crate::value_type::ValueType;

/// Error kind and message text for an engine failure.
///
/// Location and stack are appended in the fixed layout the managed side
/// parses: `"Message\r\n  Line: N  Column: N\r\n  Stack: ...\r\n"`.
pub fn describe(err: &EngineError) -> (ValueType, String) {
    match err {
        EngineError::Syntax {
            message,
            line,
            column,
        } => (
            ValueType::CompilerError,
            format!("{message}\r\n  Line: {line}  Column: {column}\r\n"),
        ),
        EngineError::Exception {
            message,
            line,
            column,
            stack,
            ..
        } => {
            let mut text = message.clone();
            if let (Some(line), Some(column)) = (line, column) {
                text.push_str(&format!("\r\n  Line: {line}  Column: {column}\r\n"));
            }
            if let Some(stack) = stack {
                if !text.ends_with("\r\n") {
                    text.push_str("\r\n");
                }
                text.push_str(&format!("  Stack: {stack}\r\n"));
            }
            (ValueType::ExecutionError, text)
        }
        EngineError::Terminated => (ValueType::ExecutionTerminated, err.to_string()),
        other => (ValueType::InternalError, other.to_string()),
    }
}
