//! Command-line front end for `modcall`.
//!
//! ```text
//! modcall [--config PATH] [--target ID] [--timeout MS] <function> [ARG...]
//! ```
//!
//! Arguments follow the salt-call convention: `key=value` becomes a keyword
//! argument, anything else is positional. JSON literals (`true`, `null`,
//! `["a"]`, `{"k": 1}`, `"quoted"`) are parsed; everything else, numbers
//! included, stays the exact text given, so a password `1.50` is not
//! rewritten as `1.5`. Numeric parameters accept numeric strings.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::capabilities::FunctionRegistry;
use crate::config::ModcallConfig;
use crate::dispatch::{Dispatcher, MinionId, Target};
use crate::transport::{HttpTransport, TransportError};

pub const USAGE: &str = "\
Usage: modcall [OPTIONS] <function> [ARG...]

Run a module function locally or on a minion.

Arguments:
  <function>        dotted function name, e.g. keychain.list_certs
  [ARG...]          positional values, or key=value keyword arguments

Options:
  -c, --config PATH   YAML config file
  -t, --target ID     run on this minion instead of locally
      --timeout MS    remote call timeout in milliseconds
  -h, --help          print this help
  -V, --version       print the version";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("unknown option {0}")]
    UnknownOption(String),

    #[error("invalid value for {flag}: {reason}")]
    InvalidValue { flag: String, reason: String },

    #[error("no function given")]
    MissingFunction,
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Call(CliInvocation),
    Help,
    Version,
}

/// A parsed function call.
#[derive(Debug, Clone, PartialEq)]
pub struct CliInvocation {
    pub config: Option<PathBuf>,
    pub target: Option<String>,
    pub timeout_ms: Option<u64>,
    pub fun: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl CliInvocation {
    pub fn target(&self) -> Target {
        match &self.target {
            Some(id) => Target::remote(id.as_str()),
            None => Target::Local,
        }
    }
}

/// Parse arguments (without the program name).
pub fn parse_args<I, S>(args: I) -> Result<CliCommand, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut config = None;
    let mut target = None;
    let mut timeout_ms = None;

    let fun = loop {
        let Some(arg) = args.next() else {
            return Err(CliError::MissingFunction);
        };
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliCommand::Help),
            "-V" | "--version" => return Ok(CliCommand::Version),
            "-c" | "--config" => config = Some(PathBuf::from(value_for(&arg, args.next())?)),
            "-t" | "--target" => target = Some(value_for(&arg, args.next())?),
            "--timeout" => {
                let raw = value_for(&arg, args.next())?;
                timeout_ms = Some(raw.parse::<u64>().map_err(|e| CliError::InvalidValue {
                    flag: arg.clone(),
                    reason: e.to_string(),
                })?);
            }
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(CliError::UnknownOption(arg))
            }
            _ => break arg,
        }
    };

    let mut positional = Vec::new();
    let mut kwargs = Map::new();
    for arg in args {
        match split_kwarg(&arg) {
            Some((key, value)) => {
                kwargs.insert(key.to_string(), parse_value(value));
            }
            None => positional.push(parse_value(&arg)),
        }
    }

    Ok(CliCommand::Call(CliInvocation {
        config,
        target,
        timeout_ms,
        fun,
        args: positional,
        kwargs,
    }))
}

fn value_for(flag: &str, value: Option<String>) -> Result<String, CliError> {
    value.ok_or_else(|| CliError::MissingValue(flag.to_string()))
}

/// `key=value` where `key` looks like an identifier.
fn split_kwarg(arg: &str) -> Option<(&str, &str)> {
    let (key, value) = arg.split_once('=')?;
    let is_ident = !key.is_empty()
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !key.starts_with(|c: char| c.is_ascii_digit());
    is_ident.then_some((key, value))
}

/// Parsed JSON for booleans, null, arrays, objects and quoted strings.
/// Anything else, including numbers, is kept verbatim as a string.
pub fn parse_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Number(_)) | Err(_) => Value::String(raw.to_string()),
        Ok(value) => value,
    }
}

/// Build the dispatcher a CLI call runs through.
///
/// Remote targets go over HTTP to the minions listed in the config.
pub fn build_dispatcher(
    registry: FunctionRegistry,
    config: &ModcallConfig,
    timeout_ms: Option<u64>,
) -> Result<Dispatcher, TransportError> {
    let timeout_ms = timeout_ms.unwrap_or(config.timeout_ms);

    let mut transport = HttpTransport::new(timeout_ms)?;
    if let Some(token) = &config.token {
        transport = transport.with_token(token.clone());
    }
    for (id, url) in &config.minions {
        transport.add_minion(MinionId::new(id.as_str()), url.as_str());
    }

    Ok(Dispatcher::new(Arc::new(registry))
        .with_transport(Arc::new(transport))
        .with_timeout(Duration::from_millis(timeout_ms)))
}
