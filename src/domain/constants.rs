//! Stable constants shared across the crate.

/// Repo-relative path of the policy document. Edits to this file are gated
/// by the `PolicyEdit` rule and are never bypassable.
pub const POLICY_REL_PATH: &str = "config/hook_policy.json";

/// Default audit log location when `options.log_path` is absent.
pub const DEFAULT_LOG_PATH: &str = "simlog/precommit_access.log";

/// Smoke command output capture, repo-relative.
pub const SMOKE_LOG_REL_PATH: &str = "simlog/smoke.log";

/// One-time token ledger, under the VCS metadata directory.
pub const LEDGER_REL_PATH: &str = ".git/dv-hooks/bypass_ledger.json";

/// Sibling lock file guarding ledger read-modify-write cycles.
pub const LEDGER_LOCK_REL_PATH: &str = ".git/dv-hooks/bypass_ledger.lock";

/// Plaintext bypass token.
pub const ENV_BYPASS_TOKEN: &str = "DV_HOOK_BYPASS";
/// Bypass justification, required when the engaged scope sets `require_reason`.
pub const ENV_BYPASS_REASON: &str = "DV_HOOK_BYPASS_REASON";

// Presentation-only environment switches. None of these affect verdicts.
pub const ENV_NO_COLOR: &str = "NO_COLOR";
pub const ENV_MUTE: &str = "DV_HOOK_MUTE";
pub const ENV_TIPS: &str = "DV_HOOK_TIPS";
pub const ENV_SHOW_DECISIONS: &str = "DV_HOOK_SHOW_DECISIONS";
pub const ENV_BOX_MIN: &str = "DV_HOOK_BOX_MIN";

/// Ledger records carry only this many leading hex chars of the token hash:
/// enough to audit and to detect replay, not enough to reconstruct a secret.
pub const HASH_PREFIX_LEN: usize = 12;

/// Local wall-clock format used by token `expires`, freeze windows, audit
/// lines, and ledger timestamps.
pub const LOCAL_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
