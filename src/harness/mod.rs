//! Helpers for driving functions the way an integration suite does.
//!
//! [`FunctionRunner`] issues calls against one target and hands back the
//! raw [`InvocationResult`]; assertions stay with the caller.
//! [`CertFixture`] installs a known certificate before a test and removes it
//! afterwards, tolerating the failures cleanup is expected to hit.
//!
//! ```rust,ignore
//! let runner = FunctionRunner::local(dispatcher);
//! let fixture = CertFixture::new("/tmp/salttest.p12", "salttest", "Salt Test");
//!
//! fixture.install(&runner).await?;
//! assert!(fixture.is_installed(&runner).await?);
//! fixture.teardown(&runner).await?;
//! ```

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::dispatch::result::{Failure, FailureKind, InvocationResult};
use crate::dispatch::{Dispatcher, Target};

/// Issues function calls against a single target.
#[derive(Clone)]
pub struct FunctionRunner {
    dispatcher: Arc<Dispatcher>,
    target: Target,
}

impl FunctionRunner {
    pub fn new(dispatcher: Arc<Dispatcher>, target: Target) -> Self {
        Self { dispatcher, target }
    }

    /// Run against the dispatcher's own registry.
    pub fn local(dispatcher: Arc<Dispatcher>) -> Self {
        Self::new(dispatcher, Target::Local)
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Call `fun` with positional arguments.
    pub async fn run_function(&self, fun: &str, args: Vec<Value>) -> InvocationResult {
        self.run_function_with(fun, args, Map::new()).await
    }

    /// Call `fun` with positional and keyword arguments.
    pub async fn run_function_with(
        &self,
        fun: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> InvocationResult {
        self.dispatcher.invoke(&self.target, fun, args, kwargs).await
    }
}

/// What [`CertFixture::teardown`] ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// The certificate was listed and has been uninstalled.
    Removed,
    /// The certificate was not listed; nothing to do.
    Absent,
    /// A step failed in a way cleanup accepts (the cert vanished between
    /// listing and uninstalling, or the module is missing on the target).
    Tolerated(Failure),
}

/// A certificate installed for the duration of a test.
#[derive(Debug, Clone)]
pub struct CertFixture {
    pub cert_path: String,
    pub password: String,
    pub alias: String,
    /// Keychain to use; `None` means the target's default.
    pub keychain: Option<String>,
}

impl CertFixture {
    pub fn new(
        cert_path: impl Into<String>,
        password: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            cert_path: cert_path.into(),
            password: password.into(),
            alias: alias.into(),
            keychain: None,
        }
    }

    pub fn with_keychain(mut self, keychain: impl Into<String>) -> Self {
        self.keychain = Some(keychain.into());
        self
    }

    fn keychain_kwargs(&self) -> Map<String, Value> {
        let mut kwargs = Map::new();
        if let Some(keychain) = &self.keychain {
            kwargs.insert("keychain".to_string(), json!(keychain));
        }
        kwargs
    }

    /// Install the certificate. Any failure is fatal to the test.
    pub async fn install(&self, runner: &FunctionRunner) -> Result<Value, Failure> {
        runner
            .run_function_with(
                "keychain.install",
                vec![json!(self.cert_path), json!(self.password)],
                self.keychain_kwargs(),
            )
            .await
            .into_result()
    }

    /// Whether the alias shows up in `keychain.list_certs`.
    pub async fn is_installed(&self, runner: &FunctionRunner) -> Result<bool, Failure> {
        let certs = runner
            .run_function_with("keychain.list_certs", vec![], self.keychain_kwargs())
            .await
            .into_result()?;
        Ok(contains_alias(&certs, &self.alias))
    }

    /// Remove the certificate if it is still listed.
    ///
    /// `HandlerError` and `NotFound` failures are tolerated and reported as
    /// [`TeardownOutcome::Tolerated`]. Timeouts and transport failures mean
    /// the target's state is unknown and are returned as errors.
    pub async fn teardown(&self, runner: &FunctionRunner) -> Result<TeardownOutcome, Failure> {
        let listed = match self.is_installed(runner).await {
            Ok(listed) => listed,
            Err(failure) => return tolerate(failure),
        };
        if !listed {
            return Ok(TeardownOutcome::Absent);
        }

        let mut kwargs = self.keychain_kwargs();
        kwargs.insert("cert_name".to_string(), json!(self.alias));
        match runner
            .run_function_with("keychain.uninstall", vec![], kwargs)
            .await
            .into_result()
        {
            Ok(_) => {
                log::debug!("Teardown removed certificate '{}'", self.alias);
                Ok(TeardownOutcome::Removed)
            }
            Err(failure) => tolerate(failure),
        }
    }
}

fn tolerate(failure: Failure) -> Result<TeardownOutcome, Failure> {
    match failure.kind {
        FailureKind::HandlerError | FailureKind::NotFound => {
            log::warn!("Ignoring teardown failure: {}", failure);
            Ok(TeardownOutcome::Tolerated(failure))
        }
        FailureKind::Timeout | FailureKind::TransportError => Err(failure),
    }
}

fn contains_alias(certs: &Value, alias: &str) -> bool {
    certs
        .as_array()
        .map(|list| list.iter().any(|c| c.as_str() == Some(alias)))
        .unwrap_or(false)
}
