//! Execution modules: the functions a minion can run.
//!
//! - [`keychain`]: `install`, `uninstall`, `list_certs`, `get_friendly_name`,
//!   `get_default_keychain`, `set_default_keychain`, `unlock_keychain`,
//!   `get_hash`
//! - [`cmd`]: `run`, `run_all`, `retcode`
//! - [`diagnostics`]: `test.ping`, `test.echo`, `test.sleep`
//!
//! Modules that touch the host go through a [`CommandRunner`], so a
//! registry built with a fake runner behaves the same way without a Mac.

pub mod cmd;
pub mod diagnostics;
pub mod keychain;
pub mod runner;

use std::sync::Arc;

use crate::capabilities::{FunctionRegistry, RegistryError};

pub use keychain::{Keychain, SYSTEM_KEYCHAIN};
pub use runner::{CommandLine, CommandOutput, CommandRunner, SystemRunner};

/// Register every built-in module.
pub fn register_all(
    registry: &mut FunctionRegistry,
    runner: Arc<dyn CommandRunner>,
    default_keychain: &str,
) -> Result<(), RegistryError> {
    keychain::register(registry, Arc::clone(&runner), default_keychain)?;
    cmd::register(registry, runner)?;
    diagnostics::register(registry)?;
    log::debug!("Registered {} built-in functions", registry.len());
    Ok(())
}

/// A registry with every built-in module, running real commands.
pub fn builtin_registry(default_keychain: &str) -> Result<FunctionRegistry, RegistryError> {
    let mut registry = FunctionRegistry::new();
    register_all(&mut registry, Arc::new(SystemRunner), default_keychain)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry(SYSTEM_KEYCHAIN).unwrap();
        assert_eq!(registry.len(), 14);
        assert!(registry.contains("keychain.get_default_keychain"));
        assert!(registry.contains("cmd.run"));
        assert!(registry.contains("test.ping"));

        // A second registration pass collides with the first.
        let mut registry = registry;
        let err = register_all(&mut registry, Arc::new(SystemRunner), SYSTEM_KEYCHAIN).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateCapability("keychain.install".to_string()));
    }
}
