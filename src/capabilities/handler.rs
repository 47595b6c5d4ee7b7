//! Handlers and their declared parameter shape.
//!
//! A [`Handler`] is the concrete implementation bound to a capability name.
//! Any `Fn(&BoundArgs) -> Result<Value, HandlerError>` closure is a handler.
//!
//! A [`Signature`] declares the parameters a handler accepts. Before a handler
//! runs, the caller's positional and keyword arguments are bound against the
//! signature, producing [`BoundArgs`]:
//!
//! ```text
//! keychain.install("/tmp/cert.p12", "pw", allow_any=true)
//!   signature: cert, password, keychain="/Library/...", allow_any=false
//!   bound:     {cert: "/tmp/cert.p12", password: "pw",
//!               keychain: "/Library/...", allow_any: true}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// HandlerError
// ---------------------------------------------------------------------------

/// Errors a handler (or argument binding) can produce.
///
/// The dispatcher converts every variant into a failure result of kind
/// `HandlerError`, keeping the rendered message.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    /// An external command exited unsuccessfully.
    #[error("Command '{command}' failed with exit code {retcode}: {stderr}")]
    Command {
        command: String,
        retcode: i32,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// A callable capability implementation.
///
/// Handlers own no mutable state and may be invoked concurrently from
/// several dispatch calls.
pub trait Handler: Send + Sync {
    fn handle(&self, args: &BoundArgs) -> Result<Value, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&BoundArgs) -> Result<Value, HandlerError> + Send + Sync,
{
    fn handle(&self, args: &BoundArgs) -> Result<Value, HandlerError> {
        self(args)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A single declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Required parameters have no default.
    pub required: bool,
    /// Value used when an optional parameter is not supplied.
    #[serde(default)]
    pub default: Value,
}

impl Param {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: Value::Null,
        }
    }

    pub fn optional(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: default.into(),
        }
    }
}

/// The declared parameter shape of a handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Param>,
    /// Accept positional arguments beyond `params`.
    #[serde(default)]
    pub varargs: bool,
    /// Accept keyword arguments not named in `params`.
    #[serde(default)]
    pub varkwargs: bool,
}

impl Signature {
    pub fn new(params: Vec<Param>) -> Self {
        Self {
            params,
            varargs: false,
            varkwargs: false,
        }
    }

    /// A signature with no parameters that rejects any argument.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A signature that accepts anything, passing it through untouched.
    pub fn any() -> Self {
        Self {
            params: Vec::new(),
            varargs: true,
            varkwargs: true,
        }
    }

    /// Bind caller arguments to the declared parameters.
    ///
    /// Positional values fill parameters in declaration order, keyword
    /// values fill by name, and defaults fill the rest. Binding the same
    /// parameter twice, unknown keywords, surplus positionals and missing
    /// required parameters are errors unless the signature is variadic.
    pub fn bind(
        &self,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<BoundArgs, HandlerError> {
        let mut named = Map::new();
        let mut rest = Vec::new();

        for (index, value) in args.iter().enumerate() {
            match self.params.get(index) {
                Some(param) => {
                    named.insert(param.name.clone(), value.clone());
                }
                None if self.varargs => rest.push(value.clone()),
                None => {
                    return Err(HandlerError::UnexpectedArgument(format!(
                        "takes at most {} positional argument(s) but {} were given",
                        self.params.len(),
                        args.len()
                    )))
                }
            }
        }

        for (key, value) in kwargs {
            let declared = self.params.iter().any(|p| &p.name == key);
            if !declared && !self.varkwargs {
                return Err(HandlerError::UnexpectedArgument(key.clone()));
            }
            if named.contains_key(key) {
                return Err(HandlerError::invalid(key, "given both positionally and by keyword"));
            }
            named.insert(key.clone(), value.clone());
        }

        for param in &self.params {
            if named.contains_key(&param.name) {
                continue;
            }
            if param.required {
                return Err(HandlerError::MissingArgument(param.name.clone()));
            }
            named.insert(param.name.clone(), param.default.clone());
        }

        Ok(BoundArgs { named, rest })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                if p.required {
                    p.name.clone()
                } else {
                    format!("{}={}", p.name, p.default)
                }
            })
            .collect();
        if self.varargs {
            parts.push("*args".to_string());
        }
        if self.varkwargs {
            parts.push("**kwargs".to_string());
        }
        write!(f, "({})", parts.join(", "))
    }
}

// ---------------------------------------------------------------------------
// BoundArgs
// ---------------------------------------------------------------------------

/// Arguments after binding against a [`Signature`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    named: Map<String, Value>,
    rest: Vec<Value>,
}

impl BoundArgs {
    /// Raw access to a named value. Unset optionals are `Value::Null`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// Surplus positional values accepted by a variadic signature.
    pub fn rest(&self) -> &[Value] {
        &self.rest
    }

    pub fn named(&self) -> &Map<String, Value> {
        &self.named
    }

    /// A required string argument. Numbers and booleans are rendered as text,
    /// since command-line callers cannot always tell them apart.
    pub fn string(&self, name: &str) -> Result<String, HandlerError> {
        self.opt_string(name)?
            .ok_or_else(|| HandlerError::MissingArgument(name.to_string()))
    }

    /// An optional string argument; `null` and absent are both `None`.
    pub fn opt_string(&self, name: &str) -> Result<Option<String>, HandlerError> {
        match self.named.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(other) => Err(HandlerError::invalid(
                name,
                format!("expected a string, got {}", other),
            )),
        }
    }

    /// A boolean argument; accepts `true`/`false` and their string forms.
    pub fn bool(&self, name: &str) -> Result<bool, HandlerError> {
        match self.named.get(name) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(HandlerError::invalid(name, format!("expected a boolean, got '{}'", s))),
            },
            Some(other) => Err(HandlerError::invalid(
                name,
                format!("expected a boolean, got {}", other),
            )),
        }
    }

    /// A required numeric argument; numeric strings are accepted.
    pub fn f64(&self, name: &str) -> Result<f64, HandlerError> {
        match self.named.get(name) {
            None | Some(Value::Null) => Err(HandlerError::MissingArgument(name.to_string())),
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| HandlerError::invalid(name, "number out of range")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| HandlerError::invalid(name, e.to_string())),
            Some(other) => Err(HandlerError::invalid(
                name,
                format!("expected a number, got {}", other),
            )),
        }
    }
}
