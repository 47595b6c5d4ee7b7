//! # Capabilities
//!
//! A capability is a named, invocable unit of functionality addressed as
//! `<module>.<function>` (`keychain.install`, `cmd.run`).
//!
//! ## Resolution Flow
//!
//! 1. Execution modules register handlers at startup:
//!    `registry.register_with("keychain.install", signature, doc, handler)`
//! 2. The registry is frozen behind an `Arc` and handed to the dispatcher
//! 3. `FunctionRegistry::resolve("keychain.install")` returns the `Registration`
//! 4. Caller arguments are bound against the registration's `Signature`
//! 5. The handler runs with the resulting `BoundArgs`

pub mod error;
pub mod handler;
pub mod name;
pub mod registry;

pub use error::RegistryError;
pub use handler::{BoundArgs, Handler, HandlerError, Param, Signature};
pub use name::CapabilityName;
pub use registry::{FunctionInfo, FunctionRegistry, Registration};
