//! Invocation requests, responses and targets.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::result::InvocationResult;

/// Identity of a remote minion. Opaque to the dispatcher; transports map
/// it to an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinionId(String);

impl MinionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MinionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MinionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Where a capability executes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "target", content = "minion", rename_all = "snake_case")]
pub enum Target {
    /// The calling process.
    Local,
    /// A named remote minion reached through a transport.
    Remote(MinionId),
}

impl Target {
    pub fn remote(id: impl Into<String>) -> Self {
        Self::Remote(MinionId::new(id))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote(id) => write!(f, "minion:{}", id),
        }
    }
}

/// One call of one capability. Created per call, discarded after completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Job id correlating this request with its response.
    pub jid: String,
    /// Dotted capability name, validated at resolve time.
    pub fun: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl InvocationRequest {
    /// Build a request with a fresh job id.
    pub fn new(fun: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            jid: uuid::Uuid::new_v4().to_string(),
            fun: fun.into(),
            args,
            kwargs,
        }
    }
}

/// What a minion sends back for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub jid: String,
    pub minion: MinionId,
    pub result: InvocationResult,
    pub completed_at: DateTime<Utc>,
}

impl InvocationResponse {
    pub fn new(jid: impl Into<String>, minion: MinionId, result: InvocationResult) -> Self {
        Self {
            jid: jid.into(),
            minion,
            result,
            completed_at: Utc::now(),
        }
    }
}
