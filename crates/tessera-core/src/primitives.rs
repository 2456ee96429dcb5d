//! # Engine Primitives
//!
//! Hardcoded runtime constants for the Tessera engine.
//!
//! These values are compiled into the binary. Execution limits can be
//! overridden per engine through [`crate::EngineConfig`]; everything else
//! here is fixed.

/// Separator between the segments of an entity path (`Entity.prop.sub`).
pub const PATH_SEPARATOR: char = '.';

/// Default maximum nesting of script function calls.
///
/// Untrusted code that recurses deeper than this is aborted with
/// `TesseraError::LimitExceeded`.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Default maximum number of evaluation steps for a single session call.
///
/// A step is one executed statement, loop iteration or function call.
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

/// Default number of entries retained by the evaluation log.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Maximum length of an entity name.
pub const MAX_ENTITY_NAME_LENGTH: usize = 128;

/// Global sentinel set while a callable is being classified.
pub const DATA_FIELD_FLAG: &str = "$isDataField";

/// Global sentinel holding the result of an async classification probe.
pub const ASYNC_FLAG: &str = "$isAsync";

/// Global flag telling user code whether it runs as a trigger (event)
/// or as a plain data binding.
pub const TRIGGER_MODE_FLAG: &str = "$isTriggerBased";

/// Names that can never be used as entity names.
///
/// Covers the script language keywords and the builtin globals installed
/// in every scope.
pub const RESERVED_NAMES: &[&str] = &[
    "async", "await", "break", "case", "catch", "const", "continue", "delete", "do", "else",
    "false", "finally", "for", "function", "if", "in", "let", "new", "null", "of", "return",
    "this", "throw", "true", "try", "typeof", "undefined", "var", "void", "while", "console",
    "Math", "Object", "Array", "JSON", "Promise", "Set", "Error", "Number", "String", "Boolean",
    "NaN", "Infinity",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_not_identifiers_of_entities() {
        for flag in [DATA_FIELD_FLAG, ASYNC_FLAG, TRIGGER_MODE_FLAG] {
            assert!(flag.starts_with('$'));
        }
    }

    #[test]
    fn reserved_names_cover_builtins() {
        assert!(RESERVED_NAMES.contains(&"console"));
        assert!(RESERVED_NAMES.contains(&"this"));
    }
}
