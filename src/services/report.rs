use crate::domain::constants::{
    ENV_BOX_MIN, ENV_BYPASS_REASON, ENV_BYPASS_TOKEN, ENV_MUTE, ENV_NO_COLOR, ENV_SHOW_DECISIONS,
    ENV_TIPS, SMOKE_LOG_REL_PATH,
};
use crate::domain::models::{
    BlockGroup, PolicyFile, PolicyOptions, Rule, SmokeReport, Verdict,
};
use crate::services::audit::decision_line_body;

const BOLD_RED: &str = "\x1b[1;31m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Presentation switches. Cosmetic only: nothing here may influence a
/// verdict or an exit code.
pub struct Presentation {
    pub color: bool,
    pub mute: bool,
    pub tips: bool,
    pub show_decisions: bool,
    pub box_min: usize,
    pub max_files_per_group: usize,
}

fn env_flag_set(name: &str) -> bool {
    std::env::var(name).map(|v| !v.is_empty() && v != "0").unwrap_or(false)
}

impl Presentation {
    pub fn from_env(options: &PolicyOptions) -> Self {
        Self {
            color: std::env::var(ENV_NO_COLOR).is_err(),
            mute: env_flag_set(ENV_MUTE),
            tips: std::env::var(ENV_TIPS).map(|v| v != "0").unwrap_or(true),
            show_decisions: env_flag_set(ENV_SHOW_DECISIONS),
            box_min: std::env::var(ENV_BOX_MIN)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(44),
            max_files_per_group: options.ui.max_files_per_group,
        }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("{}{}{}", code, text, RESET)
        } else {
            text.to_string()
        }
    }
}

/// Group remaining Blocks by {rule, explanation}, keeping first-appearance
/// order and truncating file lists for display.
pub fn build_groups(
    verdicts: &[Verdict],
    policy: &PolicyFile,
    max_files: usize,
) -> Vec<BlockGroup> {
    let mut groups: Vec<BlockGroup> = Vec::new();
    for v in verdicts.iter().filter(|v| v.is_block()) {
        let path = v.change.display_path();
        if let Some(g) = groups
            .iter_mut()
            .find(|g| g.rule == v.rule && g.explanation == v.detail)
        {
            if g.files.len() < max_files {
                g.files.push(path);
            } else {
                g.truncated += 1;
            }
            continue;
        }
        groups.push(BlockGroup {
            rule: v.rule,
            explanation: v.detail.clone(),
            files: vec![path],
            truncated: 0,
            eligible_users: v.eligible_users.clone(),
            hint: hint_for(v.rule, policy),
        });
    }
    groups
}

fn hint_for(rule: Rule, policy: &PolicyFile) -> Option<String> {
    match rule {
        Rule::PolicyEdit => Some("ask a config admin to make this change (not bypassable)".into()),
        Rule::Freeze => {
            if policy.freeze.tokens.is_empty() {
                None
            } else {
                Some(format!(
                    "freeze bypass: authorized users can set {}=<token> {}=<reason> and retry",
                    ENV_BYPASS_TOKEN, ENV_BYPASS_REASON
                ))
            }
        }
        Rule::DeletionProtected | Rule::Locked | Rule::Restricted => {
            if policy.emergency_bypass.enabled {
                Some(format!(
                    "emergency bypass: authorized users can set {}=<token> {}=<reason> and retry",
                    ENV_BYPASS_TOKEN, ENV_BYPASS_REASON
                ))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn boxed_title(p: &Presentation, title: &str) -> String {
    let inner = title.len().max(p.box_min.saturating_sub(4));
    let bar = "─".repeat(inner + 2);
    format!(
        "┌{bar}┐\n│ {title}{pad} │\n└{bar}┘",
        pad = " ".repeat(inner - title.len())
    )
}

/// The failure report. Goes to stderr so commit tooling surfaces it.
pub fn render_blocked(p: &Presentation, groups: &[BlockGroup], total_blocked: usize) {
    if p.mute {
        eprintln!(
            "dvgate: commit blocked: {} file(s) in {} rule group(s)",
            total_blocked,
            groups.len()
        );
        return;
    }

    let title = format!(
        "dvgate: commit blocked ({} file{})",
        total_blocked,
        if total_blocked == 1 { "" } else { "s" }
    );
    eprintln!("{}", p.paint(BOLD_RED, &boxed_title(p, &title)));
    for g in groups {
        eprintln!();
        eprintln!(
            "{}",
            p.paint(BOLD_RED, &format!("[{}] {}", g.rule.as_str(), g.explanation))
        );
        for f in &g.files {
            eprintln!("  {}", f);
        }
        if g.truncated > 0 {
            eprintln!("{}", p.paint(DIM, &format!("  … and {} more", g.truncated)));
        }
        if !g.eligible_users.is_empty() {
            eprintln!("  allowed users: {}", g.eligible_users.join(", "));
        }
        if p.tips {
            if let Some(hint) = &g.hint {
                eprintln!("{}", p.paint(YELLOW, &format!("  hint: {}", hint)));
            }
        }
    }
}

/// Per-file verdict lines, opt-in via `DV_HOOK_SHOW_DECISIONS=1`.
pub fn render_decisions(user: &str, verdicts: &[Verdict]) {
    for v in verdicts {
        eprintln!("dvgate: {}", decision_line_body(user, v));
    }
}

pub fn render_smoke_failure(p: &Presentation, report: &SmokeReport, blocking: bool) {
    let failed = report
        .commands
        .iter()
        .rev()
        .find(|c| c.status != "ok");
    let what = failed
        .map(|c| format!("`{}` ({})", c.command, c.status))
        .unwrap_or_else(|| "command".to_string());
    if blocking {
        let title = "dvgate: commit blocked (smoke tests failed)";
        if p.mute {
            eprintln!("{}", title);
        } else {
            eprintln!("{}", p.paint(BOLD_RED, &boxed_title(p, title)));
            eprintln!("  {}", what);
            eprintln!("  see {}", SMOKE_LOG_REL_PATH);
        }
    } else {
        eprintln!(
            "{}",
            p.paint(
                YELLOW,
                &format!(
                    "dvgate: warning: smoke test {} failed, see {} (mode=warn, commit proceeds)",
                    what, SMOKE_LOG_REL_PATH
                )
            )
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Change, ChangeStatus, Decision};
    use crate::services::policy::parse_policy;

    fn block(rule: Rule, path: &str, detail: &str) -> Verdict {
        Verdict {
            change: Change {
                status: ChangeStatus::Modified,
                old_path: None,
                new_path: Some(path.to_string()),
            },
            decision: Decision::Block,
            rule,
            detail: detail.to_string(),
            eligible_users: Vec::new(),
            bypass: None,
        }
    }

    fn allow(path: &str) -> Verdict {
        Verdict {
            change: Change {
                status: ChangeStatus::Modified,
                old_path: None,
                new_path: Some(path.to_string()),
            },
            decision: Decision::Allow,
            rule: Rule::Default,
            detail: "no rule matched".to_string(),
            eligible_users: Vec::new(),
            bypass: None,
        }
    }

    #[test]
    fn groups_key_on_rule_and_explanation() {
        let policy = parse_policy("{}").unwrap().policy;
        let verdicts = vec![
            block(Rule::Locked, "design/a.v", "matched locked pattern `design/**`"),
            block(Rule::Locked, "design/b.v", "matched locked pattern `design/**`"),
            block(Rule::Locked, "ip/c.v", "matched locked pattern `ip/**`"),
            allow("docs/readme.md"),
        ];
        let groups = build_groups(&verdicts, &policy, 10);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].files, vec!["design/a.v", "design/b.v"]);
        assert_eq!(groups[1].files, vec!["ip/c.v"]);
    }

    #[test]
    fn file_lists_truncate_at_the_configured_cap() {
        let policy = parse_policy("{}").unwrap().policy;
        let verdicts: Vec<Verdict> = (0..7)
            .map(|i| block(Rule::Locked, &format!("design/f{}.v", i), "same"))
            .collect();
        let groups = build_groups(&verdicts, &policy, 5);
        assert_eq!(groups[0].files.len(), 5);
        assert_eq!(groups[0].truncated, 2);
    }

    #[test]
    fn hints_follow_bypass_eligibility() {
        let policy = parse_policy(
            r#"{"emergency_bypass": {"enabled": true,
                "tokens": [{"label":"t","sha256":"0000000000000000000000000000000000000000000000000000000000000000"}]}}"#,
        )
        .unwrap()
        .policy;
        assert!(hint_for(Rule::Locked, &policy)
            .unwrap()
            .contains(ENV_BYPASS_TOKEN));
        // Freeze has no tokens in this policy, so no freeze hint.
        assert!(hint_for(Rule::Freeze, &policy).is_none());
        // PolicyEdit hints at admins, never at tokens.
        let hint = hint_for(Rule::PolicyEdit, &policy).unwrap();
        assert!(hint.contains("not bypassable"));
    }

    #[test]
    fn no_emergency_hint_when_bypass_disabled() {
        let policy = parse_policy("{}").unwrap().policy;
        assert!(hint_for(Rule::Locked, &policy).is_none());
        assert!(hint_for(Rule::Restricted, &policy).is_none());
    }
}
