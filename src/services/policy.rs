use crate::domain::constants::{LOCAL_TS_FORMAT, POLICY_REL_PATH};
use crate::domain::models::{PolicyFile, PolicyOptions, TokenSpec};
use crate::services::matcher;
use anyhow::Context;
use chrono::NaiveDateTime;
use std::path::Path;

/// A parsed policy plus the non-fatal findings collected while loading it
/// (unknown keys, skipped entries). Warnings go to the audit log.
pub struct LoadedPolicy {
    pub policy: PolicyFile,
    pub warnings: Vec<String>,
}

/// Load and validate the policy document. A missing or unparseable policy
/// is fatal: the gate must not decide anything without one.
pub fn load_policy(repo_root: &Path) -> anyhow::Result<LoadedPolicy> {
    let path = repo_root.join(POLICY_REL_PATH);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("policy not readable at {}", path.display()))?;
    parse_policy(&raw)
}

pub fn parse_policy(raw: &str) -> anyhow::Result<LoadedPolicy> {
    let value: serde_json::Value = serde_json::from_str(raw).context("policy is not valid JSON")?;
    let mut warnings = Vec::new();
    warn_unknown_keys(&value, &mut warnings);
    let mut policy: PolicyFile =
        serde_json::from_value(value).context("policy does not match the expected schema")?;
    normalize(&mut policy, &mut warnings);
    Ok(LoadedPolicy { policy, warnings })
}

// ── Identity comparison ──

pub fn user_eq(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

pub fn user_in_list(list: &[String], user: &str, case_sensitive: bool) -> bool {
    list.iter().any(|u| user_eq(u, user, case_sensitive))
}

// ── Timestamps ──

/// Parse a local wall-clock `YYYY-MM-DD HH:MM:SS` timestamp.
pub fn parse_local_ts(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), LOCAL_TS_FORMAT).ok()
}

// ── Extensions ──

/// Normalize an extension allowlist entry: lowercase with a leading dot.
pub fn normalize_ext(raw: &str) -> String {
    let trimmed = raw.trim().to_ascii_lowercase();
    if trimmed.is_empty() || trimmed.starts_with('.') {
        trimmed
    } else {
        format!(".{}", trimmed)
    }
}

fn normalize_ext_list(list: &mut Vec<String>) {
    for ext in list.iter_mut() {
        *ext = normalize_ext(ext);
    }
    list.retain(|e| !e.is_empty() && e != ".");
}

// ── Schema warnings ──
//
// Unknown top-level keys are tolerated silently (forward compatibility);
// unknown keys inside typed objects are worth flagging because they are
// usually a misspelled field that silently disables a rule.

const OPTIONS_KEYS: &[&str] = &[
    "case_sensitive_users",
    "expand_env",
    "treat_patterns_as_absolute_when_starting_with_slash",
    "log_path",
    "ui",
];
const UI_KEYS: &[&str] = &["max_files_per_group"];
const GLOBAL_BYPASS_KEYS: &[&str] = &["allowed_extensions"];
const LOCKED_KEYS: &[&str] = &["path", "paths", "allowed_extensions"];
const RESTRICTED_KEYS: &[&str] = &["path", "paths", "allowed_users", "allowed_extensions"];
const BYPASS_KEYS: &[&str] = &["enabled", "allowed_users", "require_reason", "tokens"];
const TOKEN_KEYS: &[&str] = &["label", "sha256", "reusable", "expires"];
const FREEZE_KEYS: &[&str] = &[
    "enabled",
    "branch",
    "windows",
    "allowed_users",
    "require_reason",
    "tokens",
    "priority",
];
const WINDOW_KEYS: &[&str] = &["from", "to", "paths"];
const SMOKE_KEYS: &[&str] = &[
    "enabled",
    "mode",
    "timeout_sec",
    "shell",
    "setup_script",
    "paths_compile_elab",
    "cmds_compile_elab",
    "sw_header_globs",
    "cmds_sw",
];

fn warn_object(
    value: &serde_json::Value,
    known: &[&str],
    context: &str,
    warnings: &mut Vec<String>,
) {
    let Some(obj) = value.as_object() else {
        return;
    };
    for key in obj.keys() {
        if !known.contains(&key.as_str()) {
            warnings.push(format!("policy: unknown key `{}` in {}", key, context));
        }
    }
}

fn warn_token_array(value: Option<&serde_json::Value>, context: &str, warnings: &mut Vec<String>) {
    let Some(tokens) = value.and_then(|v| v.as_array()) else {
        return;
    };
    for (i, t) in tokens.iter().enumerate() {
        warn_object(t, TOKEN_KEYS, &format!("{}.tokens[{}]", context, i), warnings);
    }
}

fn warn_unknown_keys(value: &serde_json::Value, warnings: &mut Vec<String>) {
    let Some(root) = value.as_object() else {
        return;
    };
    if let Some(v) = root.get("options") {
        warn_object(v, OPTIONS_KEYS, "options", warnings);
        if let Some(ui) = v.get("ui") {
            warn_object(ui, UI_KEYS, "options.ui", warnings);
        }
    }
    if let Some(v) = root.get("global_bypass") {
        warn_object(v, GLOBAL_BYPASS_KEYS, "global_bypass", warnings);
    }
    if let Some(entries) = root.get("locked").and_then(|v| v.as_array()) {
        for (i, e) in entries.iter().enumerate() {
            warn_object(e, LOCKED_KEYS, &format!("locked[{}]", i), warnings);
        }
    }
    if let Some(entries) = root.get("restricted").and_then(|v| v.as_array()) {
        for (i, e) in entries.iter().enumerate() {
            warn_object(e, RESTRICTED_KEYS, &format!("restricted[{}]", i), warnings);
        }
    }
    if let Some(v) = root.get("emergency_bypass") {
        warn_object(v, BYPASS_KEYS, "emergency_bypass", warnings);
        warn_token_array(v.get("tokens"), "emergency_bypass", warnings);
    }
    if let Some(v) = root.get("freeze") {
        warn_object(v, FREEZE_KEYS, "freeze", warnings);
        warn_token_array(v.get("tokens"), "freeze", warnings);
        if let Some(windows) = v.get("windows").and_then(|w| w.as_array()) {
            for (i, w) in windows.iter().enumerate() {
                warn_object(w, WINDOW_KEYS, &format!("freeze.windows[{}]", i), warnings);
            }
        }
    }
    if let Some(v) = root.get("smoke_test") {
        warn_object(v, SMOKE_KEYS, "smoke_test", warnings);
    }
}

// ── Normalization and entry validation ──

fn token_is_valid(token: &TokenSpec, context: &str, warnings: &mut Vec<String>) -> bool {
    if token.sha256.len() != 64 || !token.sha256.chars().all(|c| c.is_ascii_hexdigit()) {
        warnings.push(format!(
            "policy: {} token `{}` skipped: sha256 must be 64 hex chars",
            context, token.label
        ));
        return false;
    }
    if let Some(expires) = &token.expires {
        if parse_local_ts(expires).is_none() {
            warnings.push(format!(
                "policy: {} token `{}` skipped: expires `{}` is not YYYY-MM-DD HH:MM:SS",
                context, token.label, expires
            ));
            return false;
        }
    }
    true
}

fn retain_valid_tokens(tokens: &mut Vec<TokenSpec>, context: &str, warnings: &mut Vec<String>) {
    tokens.retain_mut(|t| {
        if !token_is_valid(t, context, warnings) {
            return false;
        }
        t.sha256 = t.sha256.to_ascii_lowercase();
        true
    });
}

fn patterns_compile(patterns: &[String], options: &PolicyOptions) -> Result<(), String> {
    for p in patterns {
        matcher::compile_check(p, options).map_err(|e| format!("pattern `{}`: {}", p, e))?;
    }
    Ok(())
}

fn normalize(policy: &mut PolicyFile, warnings: &mut Vec<String>) {
    if policy.version != 1 {
        warnings.push(format!(
            "policy: version {} is newer than this hook understands (expected 1)",
            policy.version
        ));
    }

    normalize_ext_list(&mut policy.global_bypass.allowed_extensions);

    let options = policy.options.clone();

    let mut idx = 0;
    policy.locked.retain_mut(|entry| {
        idx += 1;
        normalize_ext_list(&mut entry.allowed_extensions);
        match patterns_compile(&entry.patterns(), &options) {
            Ok(()) => true,
            Err(e) => {
                warnings.push(format!("policy: locked[{}] skipped: {}", idx - 1, e));
                false
            }
        }
    });

    let mut idx = 0;
    policy.restricted.retain_mut(|entry| {
        idx += 1;
        normalize_ext_list(&mut entry.allowed_extensions);
        match patterns_compile(&entry.patterns(), &options) {
            Ok(()) => true,
            Err(e) => {
                warnings.push(format!("policy: restricted[{}] skipped: {}", idx - 1, e));
                false
            }
        }
    });

    policy.deletion_protected.retain(|pattern| {
        match matcher::compile_check(pattern, &options) {
            Ok(()) => true,
            Err(e) => {
                warnings.push(format!(
                    "policy: deletion_protected pattern `{}` skipped: {}",
                    pattern, e
                ));
                false
            }
        }
    });

    let mut idx = 0;
    policy.freeze.windows.retain(|window| {
        idx += 1;
        for bound in [&window.from, &window.to].into_iter().flatten() {
            if parse_local_ts(bound).is_none() {
                warnings.push(format!(
                    "policy: freeze.windows[{}] skipped: `{}` is not YYYY-MM-DD HH:MM:SS",
                    idx - 1,
                    bound
                ));
                return false;
            }
        }
        if let Err(e) = patterns_compile(&window.paths, &options) {
            warnings.push(format!("policy: freeze.windows[{}] skipped: {}", idx - 1, e));
            return false;
        }
        true
    });

    retain_valid_tokens(&mut policy.freeze.tokens, "freeze", warnings);
    retain_valid_tokens(
        &mut policy.emergency_bypass.tokens,
        "emergency_bypass",
        warnings,
    );

    policy.smoke_test.paths_compile_elab.retain(|pattern| {
        match matcher::compile_check(pattern, &options) {
            Ok(()) => true,
            Err(e) => {
                warnings.push(format!(
                    "policy: smoke_test.paths_compile_elab pattern `{}` skipped: {}",
                    pattern, e
                ));
                false
            }
        }
    });
    policy.smoke_test.sw_header_globs.retain(|pattern| {
        match matcher::compile_check(pattern, &options) {
            Ok(()) => true,
            Err(e) => {
                warnings.push(format!(
                    "policy: smoke_test.sw_header_globs pattern `{}` skipped: {}",
                    pattern, e
                ));
                false
            }
        }
    });

    if policy.smoke_test.mode != "warn" && policy.smoke_test.mode != "block" {
        warnings.push(format!(
            "policy: smoke_test.mode `{}` is not warn|block, treating as warn",
            policy.smoke_test.mode
        ));
        policy.smoke_test.mode = "warn".to_string();
    }
}
