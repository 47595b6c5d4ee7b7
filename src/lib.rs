//! # modcall
//!
//! Name a module function (`keychain.install`), run it here or on a remote
//! minion, and get back a typed result.
//!
//! - [`capabilities`] — the function registry, handlers and signatures
//! - [`dispatch`] — requests, results and the `Dispatcher`
//! - [`transport`] — how requests reach remote minions (HTTP, in-process)
//! - [`server`] — the minion HTTP service
//! - [`modules`] — built-in execution modules (`keychain`, `cmd`, `test`)
//! - [`harness`] — helpers for integration suites that drive a minion
//! - [`config`], [`cli`] — binary plumbing

pub mod capabilities;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod harness;
pub mod modules;
pub mod server;
pub mod transport;

pub use capabilities::{FunctionRegistry, Handler, HandlerError, RegistryError};
pub use config::ModcallConfig;
pub use dispatch::{Dispatcher, Failure, FailureKind, InvocationResult, MinionId, Target};
pub use harness::{CertFixture, FunctionRunner, TeardownOutcome};
pub use transport::{Transport, TransportError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
