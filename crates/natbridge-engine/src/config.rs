//! Bridge configuration
//!
//! Options come from code, a TOML document, or `NATBRIDGE_*` environment
//! variables layered over the defaults in [`crate::defaults`].

use std::env;

use serde::Deserialize;
use thiserror::Error;

use crate::defaults::{
    DEFAULT_MIN_ALLOC_ALIGN, DEFAULT_STRICT_ALIASING, DEFAULT_ZERO_FILL, ENV_PREFIX,
};

/// Errors while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed TOML
    #[error("invalid bridge config: {0}")]
    Toml(#[from] toml::de::Error),

    /// An option has an unusable value
    #[error("invalid value for {name}: {value}")]
    InvalidValue {
        /// Option name
        name: String,
        /// Rejected value
        value: String,
    },
}

/// Options for creating a [`crate::Bridge`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeOptions {
    /// Zero-fill owned allocations
    pub zero_fill: bool,

    /// Minimum allocation alignment in bytes (power of two)
    pub min_alloc_align: u64,

    /// Reject owned registrations overlapping a live owned peer
    pub strict_aliasing: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            zero_fill: DEFAULT_ZERO_FILL,
            min_alloc_align: DEFAULT_MIN_ALLOC_ALIGN,
            strict_aliasing: DEFAULT_STRICT_ALIASING,
        }
    }
}

impl BridgeOptions {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let options: BridgeOptions = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Defaults overridden by `NATBRIDGE_ZERO_FILL`, `NATBRIDGE_MIN_ALLOC_ALIGN`
    /// and `NATBRIDGE_STRICT_ALIASING`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let lookup = |name: &str| env::var(format!("{}{}", ENV_PREFIX, name)).ok();
        Self::default().with_overrides(lookup)
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ZERO_FILL") {
            self.zero_fill = parse_bool("ZERO_FILL", &value)?;
        }
        if let Some(value) = lookup("MIN_ALLOC_ALIGN") {
            self.min_alloc_align =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        name: "MIN_ALLOC_ALIGN".to_string(),
                        value: value.clone(),
                    })?;
        }
        if let Some(value) = lookup("STRICT_ALIASING") {
            self.strict_aliasing = parse_bool("STRICT_ALIASING", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_alloc_align.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                name: "min_alloc_align".to_string(),
                value: self.min_alloc_align.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_partial_override() {
        let options = BridgeOptions::from_toml_str("zero_fill = false\n").unwrap();
        assert!(!options.zero_fill);
        assert_eq!(options.min_alloc_align, DEFAULT_MIN_ALLOC_ALIGN);
        assert!(options.strict_aliasing);
    }

    #[test]
    fn test_toml_rejects_bad_alignment() {
        assert!(BridgeOptions::from_toml_str("min_alloc_align = 12\n").is_err());
        assert!(BridgeOptions::from_toml_str("unknown = 1\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let options = BridgeOptions::default()
            .with_overrides(|name| match name {
                "ZERO_FILL" => Some("off".to_string()),
                "MIN_ALLOC_ALIGN" => Some("32".to_string()),
                _ => None,
            })
            .unwrap();
        assert!(!options.zero_fill);
        assert_eq!(options.min_alloc_align, 32);

        let err = BridgeOptions::default()
            .with_overrides(|name| (name == "STRICT_ALIASING").then(|| "maybe".to_string()));
        assert!(matches!(err, Err(ConfigError::InvalidValue { .. })));
    }
}
