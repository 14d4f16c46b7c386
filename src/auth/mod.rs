//! Account registration and authentication.
//!
//! Provides:
//! - Atomic account provisioning (user + settings + attributes in one
//!   transaction)
//! - Login with password (bcrypt) or the morse-code alternate credential
//! - Profile snapshot assembly with per-field defaulting
//!
//! ## Design Decisions
//! - Passwords use bcrypt at work factor 12; the per-call salt lives inside
//!   the hash string, so no separate salt column.
//! - A supplied non-empty morse code takes precedence: only the morse
//!   comparison runs, even when a password is also present.
//! - Unknown email and wrong credential return the same failure code, so
//!   login never doubles as an email-existence oracle.

pub mod account;
pub mod credentials;

pub use account::AccountService;
