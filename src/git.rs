use crate::domain::models::{Change, ChangeStatus};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(thiserror::Error, Debug)]
pub enum GitError {
    #[error("not inside a git work tree")]
    NotARepo,
    #[error("git {0} failed: {1}")]
    CommandFailed(String, String),
}

fn git_stdout(root: Option<&Path>, args: &[&str]) -> anyhow::Result<String> {
    let mut cmd = Command::new("git");
    if let Some(dir) = root {
        cmd.current_dir(dir);
    }
    let out = cmd
        .args(args)
        .output()
        .map_err(|e| GitError::CommandFailed(args.join(" "), e.to_string()))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        return Err(GitError::CommandFailed(args.join(" "), stderr).into());
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

/// Top-level directory of the repository the hook runs in.
pub fn repo_root() -> anyhow::Result<PathBuf> {
    let out = git_stdout(None, &["rev-parse", "--show-toplevel"]).map_err(|_| GitError::NotARepo)?;
    let trimmed = out.trim();
    if trimmed.is_empty() {
        return Err(GitError::NotARepo.into());
    }
    Ok(PathBuf::from(trimmed))
}

/// Current branch name; "HEAD" when detached.
pub fn current_branch(root: &Path) -> anyhow::Result<String> {
    Ok(git_stdout(Some(root), &["rev-parse", "--abbrev-ref", "HEAD"])?
        .trim()
        .to_string())
}

/// Committer identity from `git config user.name`, falling back to the
/// ambient OS user when unset.
pub fn user_identity(root: &Path) -> String {
    if let Ok(out) = git_stdout(Some(root), &["config", "user.name"]) {
        let name = out.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Staged change set with rename detection, one `Change` per record.
pub fn staged_changes(root: &Path) -> anyhow::Result<Vec<Change>> {
    let out = git_stdout(Some(root), &["diff", "--cached", "--name-status", "-M"])?;
    Ok(parse_name_status(&out))
}

/// Parse `--name-status` output: `X\tpath` for single-path records,
/// `Xnnn\told\tnew` for renames and copies (nnn = similarity index).
fn parse_name_status(raw: &str) -> Vec<Change> {
    let mut changes = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let Some(code) = fields.next() else {
            continue;
        };
        let Some(letter) = code.chars().next() else {
            continue;
        };
        let first = fields.next().map(str::to_string);
        let second = fields.next().map(str::to_string);

        let change = match letter {
            'A' => first.map(|p| Change {
                status: ChangeStatus::Added,
                old_path: None,
                new_path: Some(p),
            }),
            'D' => first.map(|p| Change {
                status: ChangeStatus::Deleted,
                old_path: Some(p),
                new_path: None,
            }),
            'T' => first.map(|p| Change {
                status: ChangeStatus::TypeChanged,
                old_path: None,
                new_path: Some(p),
            }),
            'R' => match (first, second) {
                (Some(old), Some(new)) => Some(Change {
                    status: ChangeStatus::Renamed,
                    old_path: Some(old),
                    new_path: Some(new),
                }),
                _ => None,
            },
            'C' => match (first, second) {
                (Some(old), Some(new)) => Some(Change {
                    status: ChangeStatus::Copied,
                    old_path: Some(old),
                    new_path: Some(new),
                }),
                _ => None,
            },
            // 'M' plus anything unexpected: keep the path in the pipeline
            // rather than silently dropping it from the decision set.
            _ => first.map(|p| Change {
                status: ChangeStatus::Modified,
                old_path: None,
                new_path: Some(p),
            }),
        };
        if let Some(c) = change {
            changes.push(c);
        }
    }
    changes
}
