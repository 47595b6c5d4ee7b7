//! Uniform outcomes for local and remote calls.
//!
//! Every invocation ends in exactly one [`InvocationResult`]: a success
//! carrying an opaque JSON value, or a [`Failure`] with a machine-checkable
//! [`FailureKind`] and a human-readable message. Nothing here retries;
//! retry and tolerance policies belong to callers.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::request::{InvocationRequest, Target};

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// Classification of a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No handler is registered under the requested name.
    NotFound,
    /// No response arrived within the dispatcher's bound.
    Timeout,
    /// The handler returned an error, panicked, or rejected its arguments.
    HandlerError,
    /// The request could not be delivered or the response was unusable.
    TransportError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::HandlerError => "handler_error",
            Self::TransportError => "transport_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed failure: kind plus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// InvocationResult
// ---------------------------------------------------------------------------

/// The outcome of one invocation: exactly one of success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationResult {
    Success { value: Value },
    Failure { kind: FailureKind, message: String },
}

impl InvocationResult {
    pub fn success(value: impl Into<Value>) -> Self {
        Self::Success {
            value: value.into(),
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success { value } => Some(value),
            Self::Failure { .. } => None,
        }
    }

    /// The failure kind, if any.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn as_failure(&self) -> Option<Failure> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, message } => Some(Failure::new(*kind, message.clone())),
        }
    }

    pub fn into_result(self) -> Result<Value, Failure> {
        match self {
            Self::Success { value } => Ok(value),
            Self::Failure { kind, message } => Err(Failure { kind, message }),
        }
    }
}

impl From<Result<Value, Failure>> for InvocationResult {
    fn from(result: Result<Value, Failure>) -> Self {
        match result {
            Ok(value) => Self::Success { value },
            Err(Failure { kind, message }) => Self::Failure { kind, message },
        }
    }
}

// ---------------------------------------------------------------------------
// Invocation lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Created,
    Dispatched,
    Completed,
}

/// Tracks one request through `Created → Dispatched → Completed`.
///
/// [`Invocation::complete`] consumes the invocation, so a completed call
/// cannot be completed a second time.
#[derive(Debug)]
pub struct Invocation {
    request: InvocationRequest,
    target: Target,
    state: InvocationState,
    dispatched_at: Option<Instant>,
}

impl Invocation {
    pub fn new(request: InvocationRequest, target: Target) -> Self {
        Self {
            request,
            target,
            state: InvocationState::Created,
            dispatched_at: None,
        }
    }

    pub fn request(&self) -> &InvocationRequest {
        &self.request
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// Move to `Dispatched`. Dispatching twice keeps the first timestamp.
    pub fn mark_dispatched(&mut self) {
        if self.state == InvocationState::Created {
            self.state = InvocationState::Dispatched;
            self.dispatched_at = Some(Instant::now());
        }
    }

    /// Finish the invocation, returning its result and elapsed time since
    /// dispatch (zero if it never left `Created`).
    pub fn complete(self, result: InvocationResult) -> Completed {
        let elapsed = self
            .dispatched_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        Completed {
            jid: self.request.jid,
            result,
            elapsed,
        }
    }
}

/// A terminal invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub jid: String,
    pub result: InvocationResult,
    pub elapsed: Duration,
}

impl Completed {
    pub fn state(&self) -> InvocationState {
        InvocationState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn test_result_serde_shape() {
        let ok = InvocationResult::success(json!(["Salt Test"]));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": "success", "value": ["Salt Test"]})
        );

        let failed = InvocationResult::failure(FailureKind::NotFound, "keychain.bogus");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"status": "failure", "kind": "not_found", "message": "keychain.bogus"})
        );

        let back: InvocationResult = serde_json::from_value(json!({
            "status": "failure", "kind": "timeout", "message": "late"
        }))
        .unwrap();
        assert_eq!(back.kind(), Some(FailureKind::Timeout));
    }

    #[test]
    fn test_result_is_exactly_one_variant() {
        let ok = InvocationResult::success(true);
        assert!(ok.is_success());
        assert_eq!(ok.value(), Some(&json!(true)));
        assert_eq!(ok.kind(), None);

        let failed = InvocationResult::failure(FailureKind::HandlerError, "boom");
        assert!(!failed.is_success());
        assert_eq!(failed.value(), None);
        let err = failed.into_result().unwrap_err();
        assert_eq!(err.to_string(), "handler_error: boom");
    }

    #[test]
    fn test_invocation_lifecycle() {
        let request = InvocationRequest::new("test.ping", vec![], Map::new());
        let jid = request.jid.clone();
        let mut invocation = Invocation::new(request, Target::Local);
        assert_eq!(invocation.state(), InvocationState::Created);

        invocation.mark_dispatched();
        assert_eq!(invocation.state(), InvocationState::Dispatched);

        let done = invocation.complete(InvocationResult::success(true));
        assert_eq!(done.state(), InvocationState::Completed);
        assert_eq!(done.jid, jid);
        assert!(done.result.is_success());
    }
}
