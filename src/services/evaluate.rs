use crate::domain::constants::POLICY_REL_PATH;
use crate::domain::models::{
    Change, ChangeStatus, Decision, PolicyFile, Rule, Verdict,
};
use crate::services::matcher::{self, PatternSet};
use crate::services::policy::{parse_local_ts, user_in_list};
use chrono::NaiveDateTime;
use std::path::Path;

/// Ambient facts a single hook run decides against. `now` is injected so
/// verdicts stay a pure function of their inputs.
pub struct EvalContext<'a> {
    pub policy: &'a PolicyFile,
    pub user: &'a str,
    pub branch: &'a str,
    pub repo_root: &'a Path,
    pub now: NaiveDateTime,
}

struct FrozenWindow {
    from: Option<NaiveDateTime>,
    to: Option<NaiveDateTime>,
    paths: PatternSet,
}

struct LockedRule<'a> {
    paths: PatternSet,
    allowed_extensions: &'a [String],
}

struct RestrictedRule<'a> {
    paths: PatternSet,
    allowed_users: &'a [String],
    allowed_extensions: &'a [String],
}

/// The §rule pipeline with patterns compiled once per run.
pub struct Evaluator<'a> {
    ctx: EvalContext<'a>,
    locked: Vec<LockedRule<'a>>,
    restricted: Vec<RestrictedRule<'a>>,
    deletion_protected: PatternSet,
    windows: Vec<FrozenWindow>,
    freeze_engaged: bool,
    freeze_first: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: EvalContext<'a>) -> anyhow::Result<Self> {
        let policy = ctx.policy;
        let options = &policy.options;

        let mut locked = Vec::with_capacity(policy.locked.len());
        for entry in &policy.locked {
            locked.push(LockedRule {
                paths: matcher::compile_set(&entry.patterns(), options)?,
                allowed_extensions: &entry.allowed_extensions,
            });
        }

        let mut restricted = Vec::with_capacity(policy.restricted.len());
        for entry in &policy.restricted {
            restricted.push(RestrictedRule {
                paths: matcher::compile_set(&entry.patterns(), options)?,
                allowed_users: &entry.allowed_users,
                allowed_extensions: &entry.allowed_extensions,
            });
        }

        let deletion_protected = matcher::compile_set(&policy.deletion_protected, options)?;

        let mut windows = Vec::with_capacity(policy.freeze.windows.len());
        for w in &policy.freeze.windows {
            windows.push(FrozenWindow {
                from: w.from.as_deref().and_then(parse_local_ts),
                to: w.to.as_deref().and_then(parse_local_ts),
                paths: matcher::compile_set(&w.paths, options)?,
            });
        }

        let freeze_engaged = policy.freeze.enabled
            && (policy.freeze.branch.is_empty() || policy.freeze.branch == ctx.branch);
        let freeze_first = policy.freeze.priority == "override_all";

        Ok(Self {
            ctx,
            locked,
            restricted,
            deletion_protected,
            windows,
            freeze_engaged,
            freeze_first,
        })
    }

    /// Exactly one verdict per change, in change-set order.
    pub fn evaluate_all(&self, changes: &[Change]) -> Vec<Verdict> {
        changes.iter().map(|c| self.evaluate_one(c)).collect()
    }

    fn user_is_admin(&self) -> bool {
        user_in_list(
            &self.ctx.policy.config_admins,
            self.ctx.user,
            self.ctx.policy.options.case_sensitive_users,
        )
    }

    fn evaluate_one(&self, change: &Change) -> Verdict {
        let policy = self.ctx.policy;
        let case_sensitive = policy.options.case_sensitive_users;
        let admin = self.user_is_admin();

        // PolicyEdit: terminal, never bypassable.
        if !admin
            && change
                .effective_paths()
                .iter()
                .any(|p| *p == POLICY_REL_PATH)
        {
            return self.verdict(
                change,
                Decision::Block,
                Rule::PolicyEdit,
                "policy file changes require a config admin".to_string(),
                policy.config_admins.clone(),
            );
        }

        if self.freeze_first {
            if let Some(v) = self.freeze_block(change) {
                return v;
            }
        }

        // Deletes and the old side of renames.
        if !admin {
            if let Some(old) = change.delete_side() {
                if let Some(pat) = self.deletion_protected.matches(old, self.ctx.repo_root) {
                    return self.verdict(
                        change,
                        Decision::Block,
                        Rule::DeletionProtected,
                        format!("`{}` is deletion-protected (pattern `{}`)", old, pat),
                        policy.config_admins.clone(),
                    );
                }
            }
        }

        // Global extension bypass never applies to deletions.
        if change.status != ChangeStatus::Deleted {
            if let Some(new) = change.new_path.as_deref() {
                if matcher::ext_in_list(new, &policy.global_bypass.allowed_extensions) {
                    let ext = matcher::path_ext(new).unwrap_or_default();
                    return self.verdict(
                        change,
                        Decision::Allow,
                        Rule::GlobalExt,
                        format!("extension `{}` is globally allowed", ext),
                        Vec::new(),
                    );
                }
            }
        }

        if let Some(new) = change.new_path.as_deref() {
            // First matching locked entry decides the exception set.
            for rule in &self.locked {
                if let Some(pat) = rule.paths.matches(new, self.ctx.repo_root) {
                    if !matcher::ext_in_list(new, rule.allowed_extensions) {
                        return self.verdict(
                            change,
                            Decision::Block,
                            Rule::Locked,
                            format!("matched locked pattern `{}`", pat),
                            Vec::new(),
                        );
                    }
                    break;
                }
            }

            for rule in &self.restricted {
                if let Some(pat) = rule.paths.matches(new, self.ctx.repo_root) {
                    if user_in_list(rule.allowed_users, self.ctx.user, case_sensitive) {
                        return self.verdict(
                            change,
                            Decision::Allow,
                            Rule::Restricted,
                            format!("user allowed for restricted pattern `{}`", pat),
                            Vec::new(),
                        );
                    }
                    if matcher::ext_in_list(new, rule.allowed_extensions) {
                        return self.verdict(
                            change,
                            Decision::Allow,
                            Rule::Restricted,
                            format!("extension allowed for restricted pattern `{}`", pat),
                            Vec::new(),
                        );
                    }
                    return self.verdict(
                        change,
                        Decision::Block,
                        Rule::Restricted,
                        format!("matched restricted pattern `{}`", pat),
                        rule.allowed_users.to_vec(),
                    );
                }
            }
        }

        if !self.freeze_first {
            if let Some(v) = self.freeze_block(change) {
                return v;
            }
        }

        self.verdict(
            change,
            Decision::Allow,
            Rule::Default,
            "no rule matched".to_string(),
            Vec::new(),
        )
    }

    fn freeze_block(&self, change: &Change) -> Option<Verdict> {
        if !self.freeze_engaged {
            return None;
        }
        let paths = change.effective_paths();
        for w in &self.windows {
            if !window_active(w, self.ctx.now) {
                continue;
            }
            if let Some(pat) = w.paths.matches_any(&paths, self.ctx.repo_root) {
                return Some(self.verdict(
                    change,
                    Decision::Block,
                    Rule::Freeze,
                    format!("freeze window active for pattern `{}`", pat),
                    self.ctx.policy.freeze.allowed_users.clone(),
                ));
            }
        }
        None
    }

    fn verdict(
        &self,
        change: &Change,
        decision: Decision,
        rule: Rule,
        detail: String,
        eligible_users: Vec<String>,
    ) -> Verdict {
        Verdict {
            change: change.clone(),
            decision,
            rule,
            detail,
            eligible_users,
            bypass: None,
        }
    }
}

/// Window bounds are inclusive; a window with no bounds is a pure toggle.
fn window_active(w: &FrozenWindow, now: NaiveDateTime) -> bool {
    match (w.from, w.to) {
        (None, None) => true,
        (Some(from), None) => now >= from,
        (None, Some(to)) => now <= to,
        (Some(from), Some(to)) => now >= from && now <= to,
    }
}
