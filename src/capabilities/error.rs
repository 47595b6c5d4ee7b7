//! Registry errors.

use thiserror::Error;

/// Errors raised while building or querying the function registry.
///
/// These are startup-time faults: a failed registration aborts the
/// registration step instead of being folded into an invocation result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The name is not of the form `<module>.<function>`.
    #[error("Invalid capability name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A handler is already bound to this name.
    #[error("Capability already registered: {0}")]
    DuplicateCapability(String),

    /// No handler is bound to this name.
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),
}
