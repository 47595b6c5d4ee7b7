//! Dotted capability names: `<module>.<function>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::RegistryError;

/// A validated capability name such as `keychain.install`.
///
/// Both segments are non-empty and made of ASCII alphanumerics or `_`.
/// The split position is parsed once so `module()` and `function()` are
/// plain slices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityName {
    full: String,
    dot: usize,
}

impl CapabilityName {
    /// Parse and validate a dotted name.
    pub fn parse(name: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let dot = name
            .find('.')
            .ok_or_else(|| invalid("expected <module>.<function>"))?;
        let (module, function) = (&name[..dot], &name[dot + 1..]);

        if module.is_empty() {
            return Err(invalid("module segment is empty"));
        }
        if function.is_empty() {
            return Err(invalid("function segment is empty"));
        }
        if function.contains('.') {
            return Err(invalid("more than one '.' separator"));
        }
        let valid_char = |c: char| c.is_ascii_alphanumeric() || c == '_';
        if !module.chars().all(valid_char) || !function.chars().all(valid_char) {
            return Err(invalid("only ASCII letters, digits and '_' are allowed"));
        }

        Ok(Self {
            full: name.to_string(),
            dot,
        })
    }

    /// The module segment (`keychain` in `keychain.install`).
    pub fn module(&self) -> &str {
        &self.full[..self.dot]
    }

    /// The function segment (`install` in `keychain.install`).
    pub fn function(&self) -> &str {
        &self.full[self.dot + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for CapabilityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl FromStr for CapabilityName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CapabilityName {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CapabilityName> for String {
    fn from(name: CapabilityName) -> Self {
        name.full
    }
}

impl AsRef<str> for CapabilityName {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_module_and_function() {
        let name = CapabilityName::parse("keychain.get_friendly_name").unwrap();
        assert_eq!(name.module(), "keychain");
        assert_eq!(name.function(), "get_friendly_name");
        assert_eq!(name.to_string(), "keychain.get_friendly_name");
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        for bad in ["keychain", ".install", "keychain.", "a.b.c", "key chain.install", ""] {
            assert!(
                matches!(
                    CapabilityName::parse(bad),
                    Err(RegistryError::InvalidName { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_serde_validates_on_deserialize() {
        let ok: CapabilityName = serde_json::from_str("\"cmd.run\"").unwrap();
        assert_eq!(ok.module(), "cmd");
        assert!(serde_json::from_str::<CapabilityName>("\"cmdrun\"").is_err());
    }
}
