//! Backend for the Chronos life-stats app.
//!
//! Provides:
//! - Account provisioning: one atomic transaction creating the user row plus
//!   default-initialized settings and attribute rows
//! - Dual-mode login (bcrypt password or morse-code pattern) returning a full
//!   profile snapshot
//! - A bounded SQLite connection pool with fail-soft reads and fail-loud
//!   scoped transactions
//! - An axum HTTP gateway with CORS, body limits, and request timeouts

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
