//! Function Registry — maps dotted capability names to handlers.
//!
//! Registration happens at startup through `&mut self`. Once the registry is
//! handed to a [`Dispatcher`](crate::dispatch::Dispatcher) it sits behind an
//! `Arc`, so bindings cannot change while calls are in flight.
//!
//! Resolution is by full name: `registry.resolve("keychain.install")`

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::error::RegistryError;
use super::handler::{Handler, Signature};
use super::name::CapabilityName;

/// A bound capability: name, declared parameters, doc line and handler.
pub struct Registration {
    pub name: CapabilityName,
    pub signature: Signature,
    /// One-line description of what the capability returns.
    pub doc: String,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("doc", &self.doc)
            .field("handler", &"<handler>")
            .finish()
    }
}

/// Serializable description of a registration, without the handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub signature: String,
    pub params: Signature,
    pub doc: String,
}

/// The function registry.
///
/// Holds every known capability indexed by its dotted name. A name is bound
/// at most once; a second registration is rejected and the first binding
/// is left untouched.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<CapabilityName, Arc<Registration>>,
}

impl FunctionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that accepts any arguments.
    pub fn register(&mut self, name: &str, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        self.register_with(name, Signature::any(), "", handler)
    }

    /// Register a handler with its declared signature and doc line.
    pub fn register_with(
        &mut self,
        name: &str,
        signature: Signature,
        doc: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        let name = CapabilityName::parse(name)?;

        if self.functions.contains_key(&name) {
            log::warn!("Refusing to rebind capability {}", name);
            return Err(RegistryError::DuplicateCapability(name.to_string()));
        }

        log::debug!("Registered capability {}{}", name, signature);
        self.functions.insert(
            name.clone(),
            Arc::new(Registration {
                name,
                signature,
                doc: doc.to_string(),
                handler,
            }),
        );
        Ok(())
    }

    /// Resolve a capability by its dotted name.
    pub fn resolve(&self, name: &str) -> Result<Arc<Registration>, RegistryError> {
        CapabilityName::parse(name)
            .ok()
            .and_then(|parsed| self.functions.get(&parsed).cloned())
            .ok_or_else(|| RegistryError::UnknownCapability(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().map(|n| n.to_string()).collect();
        names.sort();
        names
    }

    /// Registered names under one module (`keychain` → `keychain.*`), sorted.
    pub fn list_module(&self, module: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .keys()
            .filter(|n| n.module() == module)
            .map(|n| n.to_string())
            .collect();
        names.sort();
        names
    }

    /// Describe every registration, sorted by name.
    pub fn describe(&self) -> Vec<FunctionInfo> {
        let mut infos: Vec<FunctionInfo> = self
            .functions
            .values()
            .map(|r| FunctionInfo {
                name: r.name.to_string(),
                signature: r.signature.to_string(),
                params: r.signature.clone(),
                doc: r.doc.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Get the total number of registered capabilities.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::handler::{BoundArgs, HandlerError, Param};
    use serde_json::{json, Value};

    fn constant(value: Value) -> Arc<dyn Handler> {
        Arc::new(move |_: &BoundArgs| -> Result<Value, HandlerError> { Ok(value.clone()) })
    }

    #[test]
    fn test_register_and_resolve_returns_same_handler() {
        let mut registry = FunctionRegistry::new();
        let handler = constant(json!(true));

        registry
            .register("keychain.install", handler.clone())
            .unwrap();

        assert_eq!(registry.len(), 1);
        let resolved = registry.resolve("keychain.install").unwrap();
        assert!(Arc::ptr_eq(&resolved.handler, &handler));
        assert_eq!(resolved.name.as_str(), "keychain.install");
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = FunctionRegistry::new();
        assert_eq!(
            registry.resolve("keychain.bogus").unwrap_err(),
            RegistryError::UnknownCapability("keychain.bogus".to_string())
        );
        // Malformed names are simply unknown at resolve time.
        assert!(matches!(
            registry.resolve("bogus"),
            Err(RegistryError::UnknownCapability(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_keeps_original() {
        let mut registry = FunctionRegistry::new();
        let original = constant(json!("first"));
        registry.register("test.echo", original.clone()).unwrap();

        let err = registry
            .register("test.echo", constant(json!("second")))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateCapability("test.echo".to_string()));

        let resolved = registry.resolve("test.echo").unwrap();
        assert!(Arc::ptr_eq(&resolved.handler, &original));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_invalid_name() {
        let mut registry = FunctionRegistry::new();
        let err = registry.register("install", constant(json!(true))).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_module_and_describe() {
        let mut registry = FunctionRegistry::new();
        registry.register("keychain.uninstall", constant(json!(true))).unwrap();
        registry.register("keychain.install", constant(json!(true))).unwrap();
        registry
            .register_with(
                "cmd.run",
                Signature::new(vec![Param::required("cmd")]),
                "Run a command and return its standard output.",
                constant(json!("")),
            )
            .unwrap();

        assert_eq!(
            registry.list_module("keychain"),
            vec!["keychain.install", "keychain.uninstall"]
        );
        assert_eq!(
            registry.names(),
            vec!["cmd.run", "keychain.install", "keychain.uninstall"]
        );

        let infos = registry.describe();
        assert_eq!(infos[0].name, "cmd.run");
        assert_eq!(infos[0].signature, "(cmd)");
        assert_eq!(infos[0].doc, "Run a command and return its standard output.");
    }
}
