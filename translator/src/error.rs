//! Translator Errors
//!
//! Every fault that aborts translation of a module. Runtime faults of the
//! translated program (null dereference, invalid cast, ...) are never
//! represented here; those are compiled into checks in the emitted C.

use crate::error_codes::{self, get_error_code, ErrorCode};
use std::fmt;

#[derive(Debug)]
pub enum TranslateError {
    /// An opcode that has no C lowering
    UnsupportedOpcode { opcode: String, offset: u32 },

    /// A block pops more values than are on the operand stack
    StackUnderflow { method: String, offset: u32 },

    /// An instruction operand link or result binding is missing
    MissingOperand {
        opcode: String,
        offset: u32,
        what: &'static str,
    },

    /// A virtual method has no slot in its declaring type's method table
    UnresolvedVirtualSlot { method: String },

    /// An exception region whose handler does not start a block
    HandlerMissing { method: String, handler_start: u32 },

    /// The operand payload does not fit the opcode
    InvalidOperand {
        opcode: String,
        offset: u32,
        expected: &'static str,
    },

    /// No implementation of an interface method was found on a class
    UnresolvedInterfaceMethod { ty: String, method: String },

    /// An id in the program document refers past the end of its arena
    DanglingId { kind: &'static str, id: u32, context: String },

    /// A module name that is not part of the program
    UnknownModule { name: String },

    /// A method that must be translated has no body
    MissingBody { method: String },

    /// A type definition that contradicts itself
    MalformedType { ty: String, message: String },

    Io { path: String, source: std::io::Error },

    Json(serde_json::Error),

    Config { message: String },

    Internal { message: String },
}

impl TranslateError {
    /// Numeric code registered for this error
    pub fn code(&self) -> u16 {
        match self {
            TranslateError::UnsupportedOpcode { .. } => error_codes::UNSUPPORTED_OPCODE,
            TranslateError::StackUnderflow { .. } => error_codes::STACK_UNDERFLOW,
            TranslateError::MissingOperand { .. } => error_codes::MISSING_OPERAND,
            TranslateError::UnresolvedVirtualSlot { .. } => error_codes::UNRESOLVED_VIRTUAL_SLOT,
            TranslateError::HandlerMissing { .. } => error_codes::HANDLER_MISSING,
            TranslateError::InvalidOperand { .. } => error_codes::INVALID_OPERAND,
            TranslateError::UnresolvedInterfaceMethod { .. } => {
                error_codes::UNRESOLVED_INTERFACE_METHOD
            }
            TranslateError::DanglingId { .. } => error_codes::DANGLING_ID,
            TranslateError::UnknownModule { .. } => error_codes::UNKNOWN_MODULE,
            TranslateError::MissingBody { .. } => error_codes::MISSING_BODY,
            TranslateError::MalformedType { .. } => error_codes::MALFORMED_TYPE,
            TranslateError::Io { .. } => error_codes::IO_FAILURE,
            TranslateError::Json(_) => error_codes::MALFORMED_JSON,
            TranslateError::Config { .. } => error_codes::INVALID_CONFIG,
            TranslateError::Internal { .. } => error_codes::INTERNAL,
        }
    }

    /// The registry entry for this error
    pub fn error_code(&self) -> Option<&'static ErrorCode> {
        get_error_code(self.code())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        TranslateError::Internal {
            message: message.into(),
        }
    }

    fn detail(&self) -> String {
        match self {
            TranslateError::UnsupportedOpcode { opcode, offset } => {
                format!("`{}` at IL_{:04x} cannot be translated", opcode, offset)
            }
            TranslateError::StackUnderflow { method, offset } => {
                format!("operand stack underflow in {} at IL_{:04x}", method, offset)
            }
            TranslateError::MissingOperand {
                opcode,
                offset,
                what,
            } => format!("`{}` at IL_{:04x} has no {}", opcode, offset, what),
            TranslateError::UnresolvedVirtualSlot { method } => {
                format!("no method table slot for {}", method)
            }
            TranslateError::HandlerMissing {
                method,
                handler_start,
            } => format!(
                "handler at IL_{:04x} in {} does not start a block",
                handler_start, method
            ),
            TranslateError::InvalidOperand {
                opcode,
                offset,
                expected,
            } => format!(
                "`{}` at IL_{:04x} expects a {} operand",
                opcode, offset, expected
            ),
            TranslateError::UnresolvedInterfaceMethod { ty, method } => {
                format!("{} does not implement {}", ty, method)
            }
            TranslateError::DanglingId { kind, id, context } => {
                format!("{} id {} referenced by {} does not exist", kind, id, context)
            }
            TranslateError::UnknownModule { name } => format!("no module named `{}`", name),
            TranslateError::MissingBody { method } => format!("{} has no body", method),
            TranslateError::MalformedType { ty, message } => format!("{}: {}", ty, message),
            TranslateError::Io { path, source } => format!("{}: {}", path, source),
            TranslateError::Json(e) => e.to_string(),
            TranslateError::Config { message } => message.clone(),
            TranslateError::Internal { message } => message.clone(),
        }
    }
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error_code() {
            Some(code) => write!(
                f,
                "{} [{}]: {}",
                code.format_code(),
                code.category,
                self.detail()
            ),
            None => write!(
                f,
                "{}: {}",
                error_codes::format_error_code(self.code()),
                self.detail()
            ),
        }
    }
}

impl std::error::Error for TranslateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TranslateError::Io { source, .. } => Some(source),
            TranslateError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TranslateError {
    fn from(e: serde_json::Error) -> Self {
        TranslateError::Json(e)
    }
}

pub type TranslateResult<T> = Result<T, TranslateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code_and_category() {
        let err = TranslateError::UnsupportedOpcode {
            opcode: "jmp".to_string(),
            offset: 0x12,
        };
        assert_eq!(
            err.to_string(),
            "E5001 [codegen]: `jmp` at IL_0012 cannot be translated"
        );
    }

    #[test]
    fn test_every_variant_has_a_registered_code() {
        let errors = vec![
            TranslateError::StackUnderflow {
                method: "M".into(),
                offset: 0,
            },
            TranslateError::DanglingId {
                kind: "type",
                id: 7,
                context: "field f".into(),
            },
            TranslateError::UnknownModule { name: "x".into() },
            TranslateError::Config {
                message: "bad".into(),
            },
            TranslateError::internal("boom"),
        ];
        for err in errors {
            assert!(err.error_code().is_some(), "{:?}", err);
        }
    }

    #[test]
    fn test_metadata_errors_use_metadata_category() {
        let err = TranslateError::MissingBody {
            method: "C::M".into(),
        };
        assert!(err.to_string().starts_with("E6003 [metadata]"));
    }
}
