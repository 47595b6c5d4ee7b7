//! Shell commands (`cmd.*`).
//!
//! Commands run through `sh -c`, optionally as another user. `cmd.run` is
//! the one the keychain suite uses to cross-check `get_default_keychain`.

use std::sync::Arc;

use serde_json::{json, Value};

use super::runner::{CommandLine, CommandOutput, CommandRunner};
use crate::capabilities::{
    BoundArgs, FunctionRegistry, HandlerError, Param, RegistryError, Signature,
};

fn shell(cmd: String, user: Option<String>) -> CommandLine {
    CommandLine::shell(cmd).runas(user)
}

/// Run and return trimmed stdout. A non-zero exit is a failure.
pub fn run(
    runner: &dyn CommandRunner,
    cmd: &str,
    user: Option<&str>,
) -> Result<String, HandlerError> {
    let command = shell(cmd.to_string(), user.map(str::to_string));
    let output = runner.run(&command)?.checked(&command)?;
    Ok(output.stdout.trim().to_string())
}

/// Run and return everything, whatever the exit code.
pub fn run_all(
    runner: &dyn CommandRunner,
    cmd: &str,
    user: Option<&str>,
) -> Result<CommandOutput, HandlerError> {
    runner.run(&shell(cmd.to_string(), user.map(str::to_string)))
}

pub fn retcode(
    runner: &dyn CommandRunner,
    cmd: &str,
    user: Option<&str>,
) -> Result<i32, HandlerError> {
    run_all(runner, cmd, user).map(|output| output.retcode)
}

fn signature() -> Signature {
    Signature::new(vec![
        Param::required("cmd"),
        Param::optional("runas", Value::Null),
    ])
}

pub fn register(
    registry: &mut FunctionRegistry,
    runner: Arc<dyn CommandRunner>,
) -> Result<(), RegistryError> {
    let r = Arc::clone(&runner);
    registry.register_with(
        "cmd.run",
        signature(),
        "Run a shell command and return its stdout.",
        Arc::new(move |args: &BoundArgs| -> Result<Value, HandlerError> {
            let user = args.opt_string("runas")?;
            run(r.as_ref(), &args.string("cmd")?, user.as_deref()).map(Value::String)
        }),
    )?;

    let r = Arc::clone(&runner);
    registry.register_with(
        "cmd.run_all",
        signature(),
        "Run a shell command and return retcode, stdout and stderr.",
        Arc::new(move |args: &BoundArgs| -> Result<Value, HandlerError> {
            let user = args.opt_string("runas")?;
            let output = run_all(r.as_ref(), &args.string("cmd")?, user.as_deref())?;
            Ok(json!(output))
        }),
    )?;

    let r = runner;
    registry.register_with(
        "cmd.retcode",
        signature(),
        "Run a shell command and return only its exit code.",
        Arc::new(move |args: &BoundArgs| -> Result<Value, HandlerError> {
            let user = args.opt_string("runas")?;
            retcode(r.as_ref(), &args.string("cmd")?, user.as_deref()).map(|code| json!(code))
        }),
    )?;

    Ok(())
}
