//! Runs one module function and prints the result as JSON.
//!
//! ```bash
//! modcall keychain.list_certs
//! modcall --target mac01 keychain.install /tmp/salttest.p12 salttest allow_any=true
//! ```
//!
//! Exits 1 when the call fails.

use std::process::ExitCode;

use anyhow::Context;
use modcall::cli::{build_dispatcher, parse_args, CliCommand, USAGE};
use modcall::config::ModcallConfig;
use modcall::modules::builtin_registry;
use modcall::InvocationResult;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,modcall=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let invocation = match parse_args(std::env::args().skip(1)) {
        Ok(CliCommand::Call(invocation)) => invocation,
        Ok(CliCommand::Help) => {
            println!("{}", USAGE);
            return Ok(ExitCode::SUCCESS);
        }
        Ok(CliCommand::Version) => {
            println!("modcall {}", modcall::VERSION);
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            return Ok(ExitCode::from(2));
        }
    };

    let config =
        ModcallConfig::load(invocation.config.as_deref()).context("Failed to load config")?;
    let registry = builtin_registry(&config.keychain.default_keychain)
        .context("Failed to register built-in modules")?;
    let dispatcher = build_dispatcher(registry, &config, invocation.timeout_ms)
        .context("Failed to build transport")?;

    let result = dispatcher
        .invoke(
            &invocation.target(),
            &invocation.fun,
            invocation.args.clone(),
            invocation.kwargs.clone(),
        )
        .await;

    match &result {
        InvocationResult::Success { value } => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(ExitCode::SUCCESS)
        }
        InvocationResult::Failure { .. } => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::FAILURE)
        }
    }
}
