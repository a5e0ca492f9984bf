//! Declared representation ambiguity
//!
//! Generated bindings mark fields, parameters, and returns whose native
//! representation could not be decided statically with an annotation such as
//! `Options: reference, array Fallback: reference`. [`UncertainSpec`] is the
//! parsed form of that annotation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;

/// A concrete native representation for an ambiguous slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Representation {
    /// Pointer to a single element
    Reference,
    /// Pointer to (or inline run of) a fixed number of elements
    Array,
    /// The element itself, copied
    Value,
}

impl Representation {
    /// Annotation spelling
    pub const fn name(self) -> &'static str {
        match self {
            Representation::Reference => "reference",
            Representation::Array => "array",
            Representation::Value => "value",
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Representation {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reference" | "ref" => Ok(Representation::Reference),
            "array" => Ok(Representation::Array),
            "value" => Ok(Representation::Value),
            other => Err(LayoutError::InvalidUncertainSpec(format!(
                "unknown representation '{}'",
                other
            ))),
        }
    }
}

/// Ordered candidate representations with one designated fallback
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UncertainSpec {
    /// Candidates in preference order
    pub options: Vec<Representation>,
    /// Chosen when no candidate is provably compatible
    pub fallback: Representation,
}

impl UncertainSpec {
    /// Build and validate a spec
    pub fn new(
        options: impl Into<Vec<Representation>>,
        fallback: Representation,
    ) -> Result<Self, LayoutError> {
        let spec = UncertainSpec {
            options: options.into(),
            fallback,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Parse the annotation text used by generated bindings.
    ///
    /// ```text
    /// Options: reference, array Fallback: reference
    /// ```
    pub fn parse(text: &str) -> Result<Self, LayoutError> {
        let text = text.trim();
        let rest = strip_prefix_ci(text, "options:").ok_or_else(|| {
            LayoutError::InvalidUncertainSpec(format!("missing 'Options:' in '{}'", text))
        })?;

        let split = find_ci(rest, "fallback:").ok_or_else(|| {
            LayoutError::InvalidUncertainSpec(format!("missing 'Fallback:' in '{}'", text))
        })?;
        let (options_text, fallback_text) = rest.split_at(split);
        let fallback_text = &fallback_text["fallback:".len()..];

        let options = options_text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Representation::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        let fallback = fallback_text.parse::<Representation>()?;

        Self::new(options, fallback)
    }

    /// Structural well-formedness: non-empty, no duplicates, fallback listed.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.options.is_empty() {
            return Err(LayoutError::InvalidUncertainSpec(
                "empty option set".to_string(),
            ));
        }
        for (i, option) in self.options.iter().enumerate() {
            if self.options[..i].contains(option) {
                return Err(LayoutError::InvalidUncertainSpec(format!(
                    "duplicate option '{}'",
                    option
                )));
            }
        }
        if !self.options.contains(&self.fallback) {
            return Err(LayoutError::InvalidUncertainSpec(format!(
                "fallback '{}' is not one of the options",
                self.fallback
            )));
        }
        Ok(())
    }
}

impl fmt::Display for UncertainSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Options: ")?;
        for (i, option) in self.options.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", option)?;
        }
        write!(f, " Fallback: {}", self.fallback)
    }
}

impl FromStr for UncertainSpec {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UncertainSpec::parse(s)
    }
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

fn find_ci(text: &str, needle: &str) -> Option<usize> {
    text.to_ascii_lowercase().find(needle)
}
