//! Command handler layer.
//!
//! This module owns CLI-oriented orchestration and output wiring.
//!
//! ## Files
//! - `check.rs` — the gate run (what the pre-commit hook invokes).
//! - `admin.rs` — token hashing, ledger inspection, policy validation.
//!
//! ## Principles
//! - Parse/match CLI inputs here.
//! - Delegate business logic to `services/*`.
//! - Keep behavior and output schema stable.

pub mod admin;
pub mod check;

pub use admin::{handle_ledger_list, handle_policy_check, handle_token_hash};
pub use check::handle_check;
