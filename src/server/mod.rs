//! Minion HTTP server.
//!
//! Exposes a minion's function registry so a master can reach it through
//! [`HttpTransport`](crate::transport::HttpTransport).
//!
//! # Endpoints
//!
//! - `GET  /health`    — Liveness check
//! - `GET  /functions` — Registered functions with their signatures
//! - `POST /run`       — Execute an `InvocationRequest`

pub mod routes;

pub use routes::{app_router, AppState, TOKEN_HEADER};
