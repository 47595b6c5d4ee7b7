//! Resolves a capability and runs it on a target.
//!
//! ```text
//! invoke(target, "keychain.install", args, kwargs)
//!   → Local:  registry.resolve → signature.bind → handler.handle (caller's task)
//!   → Remote: timeout(bound, transport.send(minion, request)) → jid check
//!   → InvocationResult (never a raw fault)
//! ```
//!
//! The dispatcher holds no mutable state. Registry bindings are frozen behind
//! an `Arc`; the transport owns whatever routing state it needs.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::Instrument;

use super::request::{InvocationRequest, MinionId, Target};
use super::result::{FailureKind, Invocation, InvocationResult};
use crate::capabilities::FunctionRegistry;
use crate::transport::{Transport, TransportError};

/// Default bound on a remote round trip.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Routes invocations to local handlers or remote minions.
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
    transport: Option<Arc<dyn Transport>>,
    timeout: Duration,
}

impl Dispatcher {
    /// A dispatcher that can only run local calls until a transport is set.
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            transport: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Bound on how long a remote call may wait for its response.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke `fun` on `target` with positional and keyword arguments.
    pub async fn invoke(
        &self,
        target: &Target,
        fun: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> InvocationResult {
        self.dispatch(target, InvocationRequest::new(fun, args, kwargs))
            .await
    }

    /// Run a prepared request on `target`.
    pub async fn dispatch(&self, target: &Target, request: InvocationRequest) -> InvocationResult {
        let span = tracing::debug_span!(
            "invoke",
            jid = %request.jid,
            fun = %request.fun,
            target = %target,
        );

        async move {
            let mut invocation = Invocation::new(request, target.clone());
            invocation.mark_dispatched();

            let result = match invocation.target() {
                Target::Local => self.run_local(invocation.request()),
                Target::Remote(minion) => self.run_remote(minion, invocation.request()).await,
            };

            let done = invocation.complete(result);
            match done.result.kind() {
                None => tracing::debug!(
                    elapsed_ms = done.elapsed.as_millis() as u64,
                    "invocation succeeded"
                ),
                Some(kind) => tracing::warn!(
                    elapsed_ms = done.elapsed.as_millis() as u64,
                    %kind,
                    "invocation failed"
                ),
            }
            done.result
        }
        .instrument(span)
        .await
    }

    /// Run a request against the local registry, synchronously.
    ///
    /// This is the path minions take when serving remote callers.
    pub fn invoke_local(&self, request: &InvocationRequest) -> InvocationResult {
        let mut invocation = Invocation::new(request.clone(), Target::Local);
        invocation.mark_dispatched();
        let result = self.run_local(invocation.request());
        let done = invocation.complete(result);
        tracing::debug!(
            jid = %done.jid,
            fun = %request.fun,
            elapsed_ms = done.elapsed.as_millis() as u64,
            ok = done.result.is_success(),
            "local invocation completed"
        );
        done.result
    }

    /// Fan the same call out to several targets concurrently.
    ///
    /// Each target gets its own request (and job id). Results come back in
    /// the order of `targets`.
    pub async fn invoke_many(
        &self,
        targets: &[Target],
        fun: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Vec<(Target, InvocationResult)> {
        let calls = targets.iter().map(|target| {
            let request = InvocationRequest::new(fun, args.clone(), kwargs.clone());
            async move { (target.clone(), self.dispatch(target, request).await) }
        });
        join_all(calls).await
    }

    fn run_local(&self, request: &InvocationRequest) -> InvocationResult {
        let registration = match self.registry.resolve(&request.fun) {
            Ok(registration) => registration,
            Err(e) => return InvocationResult::failure(FailureKind::NotFound, e.to_string()),
        };

        let bound = match registration.signature.bind(&request.args, &request.kwargs) {
            Ok(bound) => bound,
            Err(e) => {
                return InvocationResult::failure(
                    FailureKind::HandlerError,
                    format!("{}{}: {}", registration.name, registration.signature, e),
                )
            }
        };

        let handler = Arc::clone(&registration.handler);
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&bound))) {
            Ok(Ok(value)) => InvocationResult::success(value),
            Ok(Err(e)) => InvocationResult::failure(FailureKind::HandlerError, e.to_string()),
            Err(payload) => InvocationResult::failure(
                FailureKind::HandlerError,
                format!("handler panicked: {}", panic_message(payload.as_ref())),
            ),
        }
    }

    async fn run_remote(&self, minion: &MinionId, request: &InvocationRequest) -> InvocationResult {
        let Some(transport) = &self.transport else {
            return InvocationResult::failure(
                FailureKind::TransportError,
                format!("no transport configured to reach minion {}", minion),
            );
        };

        let bound_ms = self.timeout.as_millis() as u64;
        match tokio::time::timeout(self.timeout, transport.send(minion, request)).await {
            Err(_) => InvocationResult::failure(
                FailureKind::Timeout,
                format!("no response from minion {} within {}ms", minion, bound_ms),
            ),
            Ok(Err(TransportError::Timeout(ms))) => InvocationResult::failure(
                FailureKind::Timeout,
                format!(
                    "{} transport to minion {} timed out after {}ms",
                    transport.name(),
                    minion,
                    ms
                ),
            ),
            Ok(Err(e)) => InvocationResult::failure(FailureKind::TransportError, e.to_string()),
            Ok(Ok(response)) if response.jid != request.jid => InvocationResult::failure(
                FailureKind::TransportError,
                format!(
                    "minion {} answered job {} while waiting for {}",
                    minion, response.jid, request.jid
                ),
            ),
            Ok(Ok(response)) => response.result,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{BoundArgs, Handler, HandlerError, Param, Signature};
    use crate::dispatch::request::InvocationResponse;
    use async_trait::async_trait;
    use serde_json::json;

    fn handler<F>(f: F) -> Arc<dyn Handler>
    where
        F: Fn(&BoundArgs) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn keychain_registry() -> Arc<FunctionRegistry> {
        let mut registry = FunctionRegistry::new();
        registry
            .register("keychain.install", handler(|_| Ok(json!(true))))
            .unwrap();
        registry
            .register(
                "keychain.list_certs",
                handler(|_| Ok(json!(["Salt Test", "com.apple.systemdefault"]))),
            )
            .unwrap();
        registry
            .register(
                "keychain.uninstall",
                handler(|args| {
                    Err(HandlerError::Failed(format!(
                        "Unable to delete certificate matching {}",
                        args.rest().first().cloned().unwrap_or(Value::Null)
                    )))
                }),
            )
            .unwrap();
        registry
            .register_with(
                "test.echo",
                Signature::new(vec![Param::required("text")]),
                "",
                handler(|args| Ok(json!(args.string("text")?))),
            )
            .unwrap();
        registry
            .register("test.panic", handler(|_| panic!("handler blew up")))
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_local_install_returns_true() {
        let dispatcher = Dispatcher::new(keychain_registry());
        let result = dispatcher
            .invoke(
                &Target::Local,
                "keychain.install",
                vec![json!("/path/cert.p12"), json!("pw")],
                Map::new(),
            )
            .await;
        assert_eq!(result, InvocationResult::success(true));
    }

    #[tokio::test]
    async fn test_install_then_list_contains_alias() {
        let dispatcher = Dispatcher::new(keychain_registry());
        let installed = dispatcher
            .invoke(
                &Target::Local,
                "keychain.install",
                vec![json!("/path/cert.p12"), json!("pw")],
                Map::new(),
            )
            .await;
        assert!(installed.is_success());

        let listed = dispatcher
            .invoke(&Target::Local, "keychain.list_certs", vec![], Map::new())
            .await;
        let certs = listed.value().and_then(|v| v.as_array()).unwrap();
        assert!(certs.contains(&json!("Salt Test")));
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let dispatcher = Dispatcher::new(keychain_registry());
        let result = dispatcher
            .invoke(&Target::Local, "keychain.bogus", vec![], Map::new())
            .await;
        assert_eq!(result.kind(), Some(FailureKind::NotFound));
    }

    #[tokio::test]
    async fn test_handler_error_preserves_message_and_registry() {
        let dispatcher = Dispatcher::new(keychain_registry());
        let result = dispatcher
            .invoke(
                &Target::Local,
                "keychain.uninstall",
                vec![json!("Salt Test")],
                Map::new(),
            )
            .await;
        let failure = result.into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::HandlerError);
        assert_eq!(
            failure.message,
            "Unable to delete certificate matching \"Salt Test\""
        );
        // Registry is untouched by the failure.
        assert_eq!(dispatcher.registry().len(), 5);
        assert!(dispatcher.registry().contains("keychain.uninstall"));
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_handler_error() {
        let dispatcher = Dispatcher::new(keychain_registry());
        let result = dispatcher
            .invoke(&Target::Local, "test.panic", vec![], Map::new())
            .await;
        let failure = result.into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::HandlerError);
        assert!(failure.message.contains("handler blew up"));
    }

    #[tokio::test]
    async fn test_binding_error_is_handler_error() {
        let dispatcher = Dispatcher::new(keychain_registry());
        let result = dispatcher
            .invoke(&Target::Local, "test.echo", vec![], Map::new())
            .await;
        let failure = result.into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::HandlerError);
        assert!(failure.message.contains("Missing required argument: text"));
    }

    #[test]
    fn test_invoke_local_is_synchronous() {
        let dispatcher = Dispatcher::new(keychain_registry());
        let request = InvocationRequest::new("test.echo", vec![json!("hi")], Map::new());
        assert_eq!(dispatcher.invoke_local(&request), InvocationResult::success("hi"));
    }

    // -- remote ------------------------------------------------------------

    /// Never answers.
    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        fn name(&self) -> &str {
            "silent"
        }

        async fn send(
            &self,
            _minion: &MinionId,
            _request: &InvocationRequest,
        ) -> Result<InvocationResponse, TransportError> {
            futures::future::pending().await
        }
    }

    /// Answers every request with a fixed job id.
    struct WrongJidTransport;

    #[async_trait]
    impl Transport for WrongJidTransport {
        fn name(&self) -> &str {
            "wrong-jid"
        }

        async fn send(
            &self,
            minion: &MinionId,
            _request: &InvocationRequest,
        ) -> Result<InvocationResponse, TransportError> {
            Ok(InvocationResponse::new(
                "stale",
                minion.clone(),
                InvocationResult::success(true),
            ))
        }
    }

    /// Fails every send with the given error factory.
    struct FailingTransport(fn() -> TransportError);

    #[async_trait]
    impl Transport for FailingTransport {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send(
            &self,
            _minion: &MinionId,
            _request: &InvocationRequest,
        ) -> Result<InvocationResponse, TransportError> {
            Err((self.0)())
        }
    }

    #[tokio::test]
    async fn test_remote_without_response_times_out() {
        let dispatcher = Dispatcher::new(keychain_registry())
            .with_transport(Arc::new(SilentTransport))
            .with_timeout(Duration::from_millis(50));

        let result = dispatcher
            .invoke(&Target::remote("mac01"), "test.ping", vec![], Map::new())
            .await;
        assert_eq!(result.kind(), Some(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn test_remote_without_transport() {
        let dispatcher = Dispatcher::new(keychain_registry());
        let result = dispatcher
            .invoke(&Target::remote("mac01"), "test.ping", vec![], Map::new())
            .await;
        assert_eq!(result.kind(), Some(FailureKind::TransportError));
    }

    #[tokio::test]
    async fn test_remote_jid_mismatch_is_transport_error() {
        let dispatcher =
            Dispatcher::new(keychain_registry()).with_transport(Arc::new(WrongJidTransport));
        let result = dispatcher
            .invoke(&Target::remote("mac01"), "test.ping", vec![], Map::new())
            .await;
        assert_eq!(result.kind(), Some(FailureKind::TransportError));
    }

    #[tokio::test]
    async fn test_transport_errors_are_classified() {
        let timed_out = Dispatcher::new(keychain_registry())
            .with_transport(Arc::new(FailingTransport(|| TransportError::Timeout(10))));
        let result = timed_out
            .invoke(&Target::remote("mac01"), "test.ping", vec![], Map::new())
            .await;
        assert_eq!(result.kind(), Some(FailureKind::Timeout));

        let refused = Dispatcher::new(keychain_registry()).with_transport(Arc::new(
            FailingTransport(|| TransportError::ConnectionFailed("refused".into())),
        ));
        let result = refused
            .invoke(&Target::remote("mac01"), "test.ping", vec![], Map::new())
            .await;
        let failure = result.into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::TransportError);
        assert!(failure.message.contains("refused"));
    }

    #[tokio::test]
    async fn test_invoke_many_keeps_target_order() {
        let dispatcher = Dispatcher::new(keychain_registry())
            .with_transport(Arc::new(SilentTransport))
            .with_timeout(Duration::from_millis(20));

        let targets = vec![Target::Local, Target::remote("mac01")];
        let results = dispatcher
            .invoke_many(&targets, "test.echo", vec![json!("hello")], Map::new())
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, Target::Local);
        assert_eq!(results[0].1, InvocationResult::success("hello"));
        assert_eq!(results[1].0, Target::remote("mac01"));
        assert_eq!(results[1].1.kind(), Some(FailureKind::Timeout));
    }
}
