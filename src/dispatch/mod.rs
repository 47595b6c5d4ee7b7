//! # Dispatch
//!
//! Everything between "call `keychain.install` on `mac01`" and the answer.
//!
//! - [`request`] — `InvocationRequest`, `InvocationResponse`, `Target`, `MinionId`
//! - [`result`] — `InvocationResult`, `Failure`, `FailureKind`, invocation lifecycle
//! - [`dispatcher`] — the `Dispatcher` itself

pub mod dispatcher;
pub mod request;
pub mod result;

pub use dispatcher::{Dispatcher, DEFAULT_TIMEOUT_MS};
pub use request::{InvocationRequest, InvocationResponse, MinionId, Target};
pub use result::{Completed, Failure, FailureKind, Invocation, InvocationResult, InvocationState};
