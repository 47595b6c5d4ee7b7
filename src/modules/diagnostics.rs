//! Liveness and round-trip checks (`test.*`).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::capabilities::{
    BoundArgs, FunctionRegistry, HandlerError, Param, RegistryError, Signature,
};

/// Longest sleep `test.sleep` accepts, in seconds.
pub const MAX_SLEEP_SECS: f64 = 3600.0;

pub fn register(registry: &mut FunctionRegistry) -> Result<(), RegistryError> {
    registry.register_with(
        "test.ping",
        Signature::empty(),
        "Return true; proves the minion answers.",
        Arc::new(|_: &BoundArgs| -> Result<Value, HandlerError> { Ok(Value::Bool(true)) }),
    )?;

    registry.register_with(
        "test.echo",
        Signature::new(vec![Param::required("text")]),
        "Return the given text unchanged.",
        Arc::new(|args: &BoundArgs| -> Result<Value, HandlerError> {
            Ok(args.get("text").cloned().unwrap_or(Value::Null))
        }),
    )?;

    registry.register_with(
        "test.sleep",
        Signature::new(vec![Param::required("length")]),
        "Sleep for the given number of seconds, then return true.",
        Arc::new(|args: &BoundArgs| -> Result<Value, HandlerError> {
            let length = args.f64("length")?;
            if !(0.0..=MAX_SLEEP_SECS).contains(&length) {
                return Err(HandlerError::InvalidArgument {
                    name: "length".to_string(),
                    reason: format!("must be between 0 and {} seconds", MAX_SLEEP_SECS),
                });
            }
            std::thread::sleep(Duration::from_secs_f64(length));
            Ok(Value::Bool(true))
        }),
    )?;

    Ok(())
}
