//! Translator configuration
//!
//! Loaded from an optional TOML file. Every field has a default so an empty
//! file (or no file at all) yields the stock configuration.
//!
//! ```toml
//! imt_size = 40
//! platform_header = "Platform.h"
//! overflow_header = "OverflowChecker.h"
//! exception_exit_code = 123456
//! enable_debug_break = false
//! emit_temp_comments = true
//! ```

use crate::error::{TranslateError, TranslateResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Number of slots in every interface method table
    pub imt_size: u32,

    /// Runtime support header included by every generated header
    pub platform_header: String,

    /// Checked-arithmetic helper header included by every generated header
    pub overflow_header: String,

    /// Process exit status when an exception escapes the entry point
    pub exception_exit_code: i64,

    /// Define ENABLE_DEBUG_BREAK in the executable so throw sites trap
    pub enable_debug_break: bool,

    /// Annotate temporaries with the display name of their stack type
    pub emit_temp_comments: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            imt_size: 40,
            platform_header: "Platform.h".to_string(),
            overflow_header: "OverflowChecker.h".to_string(),
            exception_exit_code: 123456,
            enable_debug_break: false,
            emit_temp_comments: true,
        }
    }
}

impl TranslatorConfig {
    pub fn from_toml_str(text: &str) -> TranslateResult<Self> {
        let config: TranslatorConfig = toml::from_str(text).map_err(|e| TranslateError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> TranslateResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| TranslateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> TranslateResult<()> {
        if self.imt_size == 0 {
            return Err(TranslateError::Config {
                message: "imt_size must be greater than zero".to_string(),
            });
        }
        if self.platform_header.trim().is_empty() {
            return Err(TranslateError::Config {
                message: "platform_header must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = TranslatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, TranslatorConfig::default());
        assert_eq!(config.imt_size, 40);
        assert_eq!(config.exception_exit_code, 123456);
    }

    #[test]
    fn test_partial_override() {
        let config = TranslatorConfig::from_toml_str("imt_size = 16\nenable_debug_break = true").unwrap();
        assert_eq!(config.imt_size, 16);
        assert!(config.enable_debug_break);
        assert_eq!(config.overflow_header, "OverflowChecker.h");
    }

    #[test]
    fn test_zero_imt_size_rejected() {
        let err = TranslatorConfig::from_toml_str("imt_size = 0").unwrap_err();
        assert!(err.to_string().starts_with("E9003"));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(TranslatorConfig::from_toml_str("imt_size = \"many\"").is_err());
    }
}
