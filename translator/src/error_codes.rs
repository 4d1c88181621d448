//! Error Code Registry for the CIL to C translator
//!
//! Every fault the translator can report carries a stable numeric code so
//! that build scripts can match on it. Codes are organized by range.
//!
//! # Error Code Ranges
//!
//! - E5000-E5999: Code generation errors (instruction and method emission)
//! - E6000-E6999: Metadata errors (dangling ids, malformed types, bad modules)
//! - E9000-E9999: Internal errors, I/O and configuration

use std::collections::HashMap;
use std::fmt;

/// Error code struct containing the numeric code and human-readable description
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// The numeric error code (e.g., 5001)
    pub code: u16,
    /// Human-readable error category
    pub category: &'static str,
    /// Brief description of what this error means
    pub description: &'static str,
    /// Optional help text
    pub help: Option<&'static str>,
}

impl ErrorCode {
    pub const fn new(
        code: u16,
        category: &'static str,
        description: &'static str,
        help: Option<&'static str>,
    ) -> Self {
        Self {
            code,
            category,
            description,
            help,
        }
    }

    /// Format the error code as "E{code:04}" (e.g., "E5001")
    pub fn format_code(&self) -> String {
        format!("E{:04}", self.code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.format_code(),
            self.category,
            self.description
        )
    }
}

pub const UNSUPPORTED_OPCODE: u16 = 5001;
pub const STACK_UNDERFLOW: u16 = 5002;
pub const MISSING_OPERAND: u16 = 5003;
pub const UNRESOLVED_VIRTUAL_SLOT: u16 = 5004;
pub const HANDLER_MISSING: u16 = 5005;
pub const INVALID_OPERAND: u16 = 5006;
pub const UNRESOLVED_INTERFACE_METHOD: u16 = 5007;
pub const DANGLING_ID: u16 = 6001;
pub const UNKNOWN_MODULE: u16 = 6002;
pub const MISSING_BODY: u16 = 6003;
pub const MALFORMED_TYPE: u16 = 6004;
pub const IO_FAILURE: u16 = 9001;
pub const MALFORMED_JSON: u16 = 9002;
pub const INVALID_CONFIG: u16 = 9003;
pub const INTERNAL: u16 = 9999;

/// Registry containing all defined error codes
pub struct ErrorCodeRegistry {
    codes: HashMap<u16, ErrorCode>,
}

impl Default for ErrorCodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorCodeRegistry {
    /// Create a new registry with all predefined error codes
    pub fn new() -> Self {
        let mut registry = Self {
            codes: HashMap::new(),
        };
        registry.register_all_codes();
        registry
    }

    pub fn get(&self, code: u16) -> Option<&ErrorCode> {
        self.codes.get(&code)
    }

    /// Get an error code by its formatted string (e.g., "E5001")
    pub fn get_by_string(&self, code_str: &str) -> Option<&ErrorCode> {
        if let Some(stripped) = code_str.strip_prefix('E') {
            if let Ok(code_num) = stripped.parse::<u16>() {
                return self.get(code_num);
            }
        }
        None
    }

    fn register(&mut self, error_code: ErrorCode) {
        self.codes.insert(error_code.code, error_code);
    }

    fn register_all_codes(&mut self) {
        // ===== CODE GENERATION (E5000-E5999) =====
        self.register(ErrorCode::new(
            UNSUPPORTED_OPCODE,
            "codegen",
            "Unsupported opcode",
            Some("The instruction has no C lowering; rewrite the method without it"),
        ));
        self.register(ErrorCode::new(
            STACK_UNDERFLOW,
            "codegen",
            "Evaluation stack underflow",
            Some("The method body pops more values than the block entry stack provides"),
        ));
        self.register(ErrorCode::new(
            MISSING_OPERAND,
            "codegen",
            "Missing instruction operand",
            Some("The instruction references an operand slot that the decoder left empty"),
        ));
        self.register(ErrorCode::new(
            UNRESOLVED_VIRTUAL_SLOT,
            "codegen",
            "Virtual method has no slot in the method table",
            None,
        ));
        self.register(ErrorCode::new(
            HANDLER_MISSING,
            "codegen",
            "Exception region handler does not start a basic block",
            None,
        ));
        self.register(ErrorCode::new(
            INVALID_OPERAND,
            "codegen",
            "Operand kind does not match the opcode",
            None,
        ));
        self.register(ErrorCode::new(
            UNRESOLVED_INTERFACE_METHOD,
            "codegen",
            "Interface method has no implementation in the implementing type",
            Some("Every non-abstract type must implement all methods of its interfaces"),
        ));

        // ===== METADATA (E6000-E6999) =====
        self.register(ErrorCode::new(
            DANGLING_ID,
            "metadata",
            "Reference to an entity that does not exist",
            Some("Check the ids in the program document"),
        ));
        self.register(ErrorCode::new(
            UNKNOWN_MODULE,
            "metadata",
            "Unknown module",
            Some("Use `ciltoc dump` to list the modules of the program"),
        ));
        self.register(ErrorCode::new(
            MISSING_BODY,
            "metadata",
            "Method requires a body but none was provided",
            None,
        ));
        self.register(ErrorCode::new(
            MALFORMED_TYPE,
            "metadata",
            "Type definition is inconsistent",
            None,
        ));

        // ===== INTERNAL (E9000-E9999) =====
        self.register(ErrorCode::new(
            IO_FAILURE,
            "internal",
            "I/O failure",
            None,
        ));
        self.register(ErrorCode::new(
            MALFORMED_JSON,
            "internal",
            "Program document is not valid JSON",
            None,
        ));
        self.register(ErrorCode::new(
            INVALID_CONFIG,
            "internal",
            "Invalid translator configuration",
            Some("See the configuration section of `ciltoc translate --help`"),
        ));
        self.register(ErrorCode::new(
            INTERNAL,
            "internal",
            "Internal translator error",
            Some("An unexpected state was reached; please report it with the program document"),
        ));
    }

    /// Get all error codes in a specific range
    pub fn get_range(&self, start: u16, end: u16) -> Vec<&ErrorCode> {
        let mut codes: Vec<&ErrorCode> = self
            .codes
            .values()
            .filter(|code| code.code >= start && code.code <= end)
            .collect();
        codes.sort_by_key(|code| code.code);
        codes
    }

    /// Code generation errors (E5000-E5999)
    pub fn get_codegen_errors(&self) -> Vec<&ErrorCode> {
        self.get_range(5000, 5999)
    }

    /// Metadata errors (E6000-E6999)
    pub fn get_metadata_errors(&self) -> Vec<&ErrorCode> {
        self.get_range(6000, 6999)
    }

    /// Internal errors (E9000-E9999)
    pub fn get_internal_errors(&self) -> Vec<&ErrorCode> {
        self.get_range(9000, 9999)
    }

    /// Every registered code, sorted
    pub fn all(&self) -> Vec<&ErrorCode> {
        self.get_range(0, u16::MAX)
    }

    pub fn is_valid_code(&self, code: u16) -> bool {
        self.codes.contains_key(&code)
    }
}

static REGISTRY: std::sync::OnceLock<ErrorCodeRegistry> = std::sync::OnceLock::new();

/// Get the global error code registry
pub fn error_registry() -> &'static ErrorCodeRegistry {
    REGISTRY.get_or_init(ErrorCodeRegistry::new)
}

pub fn get_error_code(code: u16) -> Option<&'static ErrorCode> {
    error_registry().get(code)
}

/// Format an error code string (e.g., 5001 -> "E5001")
pub fn format_error_code(code: u16) -> String {
    format!("E{:04}", code)
}

/// Parse an error code from a string (e.g., "E5001" -> Some(5001))
pub fn parse_error_code(code_str: &str) -> Option<u16> {
    code_str.strip_prefix('E')?.parse::<u16>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_creation() {
        let code = ErrorCode::new(5001, "codegen", "Unsupported opcode", None);
        assert_eq!(code.format_code(), "E5001");
        assert_eq!(code.to_string(), "E5001 [codegen]: Unsupported opcode");
    }

    #[test]
    fn test_registry_functionality() {
        let registry = ErrorCodeRegistry::new();

        let code = registry.get(UNSUPPORTED_OPCODE).unwrap();
        assert_eq!(code.category, "codegen");

        let by_string = registry.get_by_string("E6001").unwrap();
        assert_eq!(by_string.code, DANGLING_ID);

        assert!(registry.get_by_string("6001").is_none());
        assert!(registry.get_by_string("Exyz").is_none());
    }

    #[test]
    fn test_error_code_ranges() {
        let registry = ErrorCodeRegistry::new();

        let codegen = registry.get_codegen_errors();
        assert!(!codegen.is_empty());
        assert!(codegen.iter().all(|e| e.category == "codegen"));
        assert!(codegen.windows(2).all(|w| w[0].code < w[1].code));

        let metadata = registry.get_metadata_errors();
        assert!(metadata.iter().all(|e| e.category == "metadata"));

        let internal = registry.get_internal_errors();
        assert!(internal.iter().all(|e| e.code >= 9000));

        assert_eq!(
            registry.all().len(),
            codegen.len() + metadata.len() + internal.len()
        );
    }

    #[test]
    fn test_global_registry() {
        let reg1 = error_registry();
        let reg2 = error_registry();

        assert!(std::ptr::eq(reg1, reg2));

        assert!(reg1.is_valid_code(MISSING_BODY));
        assert!(reg1.is_valid_code(INTERNAL));
        assert!(!reg1.is_valid_code(1001));
    }

    #[test]
    fn test_helper_functions() {
        assert_eq!(format_error_code(5001), "E5001");
        assert_eq!(format_error_code(42), "E0042");

        assert_eq!(parse_error_code("E5001"), Some(5001));
        assert_eq!(parse_error_code("E0042"), Some(42));
        assert_eq!(parse_error_code("5001"), None);
        assert_eq!(parse_error_code("INVALID"), None);

        let code = get_error_code(STACK_UNDERFLOW).unwrap();
        assert_eq!(code.description, "Evaluation stack underflow");
    }
}
