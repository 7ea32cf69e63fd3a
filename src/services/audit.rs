use crate::domain::constants::LOCAL_TS_FORMAT;
use crate::domain::models::{Decision, Verdict};
use chrono::Local;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only human-readable decision log.
///
/// Best-effort: the log must never turn an otherwise clean run into a
/// failure, so write errors are swallowed. Within one run, lines appear in
/// evaluation order, then bypass entries, then smoke entries.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn open(repo_root: &Path, log_path: &str) -> Self {
        let path = if Path::new(log_path).is_absolute() {
            PathBuf::from(log_path)
        } else {
            repo_root.join(log_path)
        };
        Self { path }
    }

    pub fn line(&self, msg: &str) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let ts = Local::now().format(LOCAL_TS_FORMAT);
        let _ = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{} {}", ts, msg));
    }

    pub fn warn(&self, msg: &str) {
        self.line(&format!("WARN {}", msg));
    }

    pub fn decision(&self, user: &str, verdict: &Verdict) {
        self.line(&decision_line_body(user, verdict));
    }
}

/// The timestamp-free part of a decision line, so repeated runs on the same
/// change set produce equivalent entries.
pub fn decision_line_body(user: &str, verdict: &Verdict) -> String {
    let decision = match verdict.decision {
        Decision::Allow => "ALLOW",
        Decision::Block => "BLOCK",
    };
    let bypass = match verdict.bypass {
        Some(scope) => format!(" bypass={}", scope.as_str()),
        None => String::new(),
    };
    format!(
        "user={} op={} old={} new={} decision={} rule={}{} detail={}",
        user,
        verdict.change.status.letter(),
        verdict.change.old_path.as_deref().unwrap_or("-"),
        verdict.change.new_path.as_deref().unwrap_or("-"),
        decision,
        verdict.rule.as_str(),
        bypass,
        verdict.detail,
    )
}
