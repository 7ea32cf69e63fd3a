use crate::domain::constants::{ENV_BYPASS_REASON, ENV_BYPASS_TOKEN};
use crate::domain::models::{
    BypassScope, Decision, LedgerRecord, LedgerResult, PolicyFile, Rule, TokenSpec, Verdict,
};
use crate::services::ledger::{self, LedgerStore};
use crate::services::policy::{parse_local_ts, user_in_list};
use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};

/// Rules an emergency token may clear. PolicyEdit is absent by design and
/// Freeze belongs to the freeze scope only.
const EMERGENCY_RULES: &[Rule] = &[Rule::DeletionProtected, Rule::Locked, Rule::Restricted];
const FREEZE_RULES: &[Rule] = &[Rule::Freeze];

/// The operator's bypass attempt, read from the environment.
pub struct BypassRequest {
    pub token: Option<String>,
    pub reason: String,
}

impl BypassRequest {
    pub fn from_env() -> Self {
        Self {
            token: std::env::var(ENV_BYPASS_TOKEN)
                .ok()
                .filter(|t| !t.is_empty()),
            reason: std::env::var(ENV_BYPASS_REASON).unwrap_or_default(),
        }
    }
}

pub fn sha256_hex(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct PassOutcome {
    pub scope: BypassScope,
    pub granted: bool,
    pub cleared_files: Vec<String>,
    pub notes: Vec<String>,
}

/// Outcomes of the passes that were actually attempted (a pass only runs
/// when its scope is enabled and has blocks to clear).
pub struct Resolution {
    pub passes: Vec<PassOutcome>,
}

fn has_block(verdicts: &[Verdict], rules: &[Rule]) -> bool {
    verdicts
        .iter()
        .any(|v| v.is_block() && rules.contains(&v.rule))
}

/// Run the freeze pass, then the emergency pass, mutating cleared verdicts
/// in place. Every denial path is fail-closed: a ledger that cannot be
/// locked, read (for one-time tokens), or written denies the bypass and the
/// underlying blocks stand.
pub fn resolve(
    policy: &PolicyFile,
    user: &str,
    now: NaiveDateTime,
    store: &LedgerStore,
    request: &BypassRequest,
    verdicts: &mut [Verdict],
) -> Resolution {
    let mut passes = Vec::new();

    if policy.freeze.enabled && has_block(verdicts, FREEZE_RULES) {
        passes.push(attempt_pass(
            BypassScope::Freeze,
            &policy.freeze.allowed_users,
            policy.freeze.require_reason,
            &policy.freeze.tokens,
            FREEZE_RULES,
            policy,
            user,
            now,
            store,
            request,
            verdicts,
        ));
    }

    if policy.emergency_bypass.enabled && has_block(verdicts, EMERGENCY_RULES) {
        passes.push(attempt_pass(
            BypassScope::Emergency,
            &policy.emergency_bypass.allowed_users,
            policy.emergency_bypass.require_reason,
            &policy.emergency_bypass.tokens,
            EMERGENCY_RULES,
            policy,
            user,
            now,
            store,
            request,
            verdicts,
        ));
    }

    Resolution { passes }
}

#[allow(clippy::too_many_arguments)]
fn attempt_pass(
    scope: BypassScope,
    allowed_users: &[String],
    require_reason: bool,
    tokens: &[TokenSpec],
    rules: &[Rule],
    policy: &PolicyFile,
    user: &str,
    now: NaiveDateTime,
    store: &LedgerStore,
    request: &BypassRequest,
    verdicts: &mut [Verdict],
) -> PassOutcome {
    let mut outcome = PassOutcome {
        scope,
        granted: false,
        cleared_files: Vec::new(),
        notes: Vec::new(),
    };

    let Some(token) = request.token.as_deref() else {
        outcome.notes.push(format!(
            "no bypass token presented (set {})",
            ENV_BYPASS_TOKEN
        ));
        return outcome;
    };

    let case_sensitive = policy.options.case_sensitive_users;
    if !user_in_list(allowed_users, user, case_sensitive) {
        outcome.notes.push(format!(
            "user `{}` is not authorized for {} bypass",
            user,
            scope.as_str()
        ));
        return outcome;
    }

    if require_reason && request.reason.trim().is_empty() {
        outcome.notes.push(format!(
            "{} bypass requires a reason (set {})",
            scope.as_str(),
            ENV_BYPASS_REASON
        ));
        return outcome;
    }

    let hash = sha256_hex(token);
    let Some(spec) = tokens.iter().find(|t| t.sha256 == hash) else {
        outcome.notes.push(format!(
            "token does not match any {} token",
            scope.as_str()
        ));
        return outcome;
    };

    if let Some(raw) = spec.expires.as_deref() {
        // Loader already vetted the format; an unparseable value here is
        // treated as expired.
        match parse_local_ts(raw) {
            Some(expires) if now < expires => {}
            _ => {
                outcome.notes.push(format!(
                    "token `{}` expired at {}",
                    spec.label, raw
                ));
                return outcome;
            }
        }
    }

    let files: Vec<String> = verdicts
        .iter()
        .filter(|v| v.is_block() && rules.contains(&v.rule))
        .map(|v| v.change.display_path())
        .collect();
    let prefix = ledger::hash_prefix(&hash);
    let record = |result: LedgerResult| LedgerRecord {
        ts: ledger::now_ts(),
        user: user.to_string(),
        scope: scope.as_str().to_string(),
        label: spec.label.clone(),
        hash_prefix: prefix.clone(),
        reusable: spec.reusable,
        reason: request.reason.clone(),
        files: files.clone(),
        result,
    };

    let consumed = store.with_lock(|txn| {
        if !spec.reusable {
            if !txn.readable {
                anyhow::bail!("ledger unreadable, one-time token refused");
            }
            if txn.has_consumed(scope.as_str(), &prefix) {
                txn.append(record(LedgerResult::ReplayedDenied));
                return Ok(false);
            }
        }
        txn.append(record(LedgerResult::Consumed));
        Ok(true)
    });

    match consumed {
        Ok(true) => {
            for v in verdicts
                .iter_mut()
                .filter(|v| v.is_block() && rules.contains(&v.rule))
            {
                v.decision = Decision::Allow;
                v.bypass = Some(scope);
            }
            outcome.granted = true;
            outcome.cleared_files = files;
        }
        Ok(false) => {
            outcome.notes.push(format!(
                "one-time token `{}` was already consumed",
                spec.label
            ));
        }
        Err(e) => {
            outcome
                .notes
                .push(format!("{} (bypass denied)", e));
        }
    }
    outcome
}
