//! # Configuration
//!
//! Loads the engine configuration from an optional TOML file and reads
//! input documents with path and size validation.
//!
//! ```toml
//! log_capacity = 500
//!
//! [limits]
//! max_call_depth = 32
//! max_steps = 200000
//! ```
//!
//! Missing keys take their defaults.

use std::path::{Path, PathBuf};
use tessera_core::{Document, EngineConfig, TesseraError};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of an input document (50 MB).
pub const MAX_DOCUMENT_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum size of a configuration file (1 MB).
pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Canonicalize `path` and make sure it names a regular file.
pub fn validate_file_path(path: &Path) -> Result<PathBuf, TesseraError> {
    let canonical = path.canonicalize().map_err(|e| {
        TesseraError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(TesseraError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Read a validated file no larger than `max_size` as UTF-8.
pub fn read_bounded(path: &Path, max_size: u64) -> Result<String, TesseraError> {
    let validated = validate_file_path(path)?;
    let metadata = std::fs::metadata(&validated)
        .map_err(|e| TesseraError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(TesseraError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }

    std::fs::read_to_string(&validated)
        .map_err(|e| TesseraError::IoError(format!("Read '{}': {}", path.display(), e)))
}

// =============================================================================
// LOADERS
// =============================================================================

/// Parse an engine configuration from TOML text.
pub fn parse_config(text: &str) -> Result<EngineConfig, TesseraError> {
    let config: EngineConfig =
        toml::from_str(text).map_err(|e| TesseraError::ConfigError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Load the engine configuration, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, TesseraError> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = read_bounded(path, MAX_CONFIG_FILE_SIZE)?;
    let config = parse_config(&text)?;
    tracing::debug!(
        path = %path.display(),
        max_steps = config.limits.max_steps,
        max_call_depth = config.limits.max_call_depth,
        "configuration loaded"
    );
    Ok(config)
}

/// Load and validate a JSON document.
pub fn load_document(path: &Path) -> Result<Document, TesseraError> {
    let text = read_bounded(path, MAX_DOCUMENT_FILE_SIZE)?;
    let document = Document::from_json(&text)?;
    tracing::info!(path = %path.display(), entities = document.len(), "document read");
    Ok(document)
}

// =============================================================================
// TESTS
// =============================================================================
