use crate::domain::constants::SMOKE_LOG_REL_PATH;
use crate::domain::models::{
    Change, ChangeStatus, PolicyOptions, SmokeCommandResult, SmokeConfig, SmokeReport,
};
use crate::services::audit::AuditLog;
use crate::services::matcher;
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

pub const GROUP_COMPILE_ELAB: &str = "compile_elab";
pub const GROUP_SW: &str = "sw";

/// New-side paths of non-deleted changes: what the smoke globs select on.
fn candidate_paths(changes: &[Change]) -> Vec<&str> {
    changes
        .iter()
        .filter(|c| c.status != ChangeStatus::Deleted)
        .filter_map(|c| c.new_path.as_deref())
        .collect()
}

/// Which command groups the change set triggers, in declared run order.
pub fn triggered_groups(
    cfg: &SmokeConfig,
    options: &PolicyOptions,
    repo_root: &Path,
    changes: &[Change],
) -> anyhow::Result<Vec<&'static str>> {
    let paths = candidate_paths(changes);
    let mut groups = Vec::new();
    let compile_set = matcher::compile_set(&cfg.paths_compile_elab, options)?;
    if compile_set.matches_any(&paths, repo_root).is_some() {
        groups.push(GROUP_COMPILE_ELAB);
    }
    let sw_set = matcher::compile_set(&cfg.sw_header_globs, options)?;
    if sw_set.matches_any(&paths, repo_root).is_some() {
        groups.push(GROUP_SW);
    }
    Ok(groups)
}

/// Run the triggered smoke groups. Each group's commands run sequentially
/// and the group stops at its first failure; groups are independent of each
/// other. All child output is streamed to `simlog/smoke.log`.
pub fn run_smoke(
    cfg: &SmokeConfig,
    options: &PolicyOptions,
    repo_root: &Path,
    changes: &[Change],
    audit: &AuditLog,
) -> anyhow::Result<SmokeReport> {
    let groups = triggered_groups(cfg, options, repo_root, changes)?;
    let mut report = SmokeReport {
        triggered: groups.iter().map(|g| g.to_string()).collect(),
        commands: Vec::new(),
        failed: false,
        mode: cfg.mode.clone(),
    };
    if groups.is_empty() {
        return Ok(report);
    }

    let log_path = repo_root.join(SMOKE_LOG_REL_PATH);
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    for group in groups {
        let cmds = match group {
            GROUP_COMPILE_ELAB => &cfg.cmds_compile_elab,
            _ => &cfg.cmds_sw,
        };
        for argv in cmds {
            if argv.is_empty() {
                audit.warn(&format!("smoke: empty command in group {} skipped", group));
                continue;
            }
            let result = run_one(cfg, repo_root, group, argv, &mut log, audit);
            let failed = result.status != "ok";
            report.commands.push(result);
            if failed {
                report.failed = true;
                break;
            }
        }
    }
    Ok(report)
}

fn run_one(
    cfg: &SmokeConfig,
    repo_root: &Path,
    group: &str,
    argv: &[String],
    log: &mut std::fs::File,
    audit: &AuditLog,
) -> SmokeCommandResult {
    let display = argv.join(" ");
    let _ = writeln!(
        log,
        "=== {} group={} cmd: {}",
        crate::services::ledger::now_ts(),
        group,
        display
    );

    let started = Instant::now();
    let status = match spawn(cfg, repo_root, argv, log, audit) {
        Ok(mut child) => match child.wait_timeout(Duration::from_secs(cfg.timeout_sec)) {
            Ok(Some(exit)) if exit.success() => "ok".to_string(),
            Ok(Some(exit)) => format!("exit={}", exit.code().unwrap_or(-1)),
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                format!("timeout={}s", cfg.timeout_sec)
            }
            Err(e) => format!("wait-failed: {}", e),
        },
        Err(e) => format!("spawn-failed: {}", e),
    };

    let result = SmokeCommandResult {
        group: group.to_string(),
        command: display,
        status,
        duration_ms: started.elapsed().as_millis(),
    };
    let _ = writeln!(log, "=== status: {}", result.status);
    audit.line(&format!(
        "SMOKE group={} cmd={} status={}",
        result.group, result.command, result.status
    ));
    result
}

fn spawn(
    cfg: &SmokeConfig,
    repo_root: &Path,
    argv: &[String],
    log: &std::fs::File,
    audit: &AuditLog,
) -> anyhow::Result<std::process::Child> {
    let mut cmd = build_command(cfg, repo_root, argv, audit);
    cmd.current_dir(repo_root)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log.try_clone()?));
    Ok(cmd.spawn()?)
}

/// Choose between direct argv and the policy's shell wrapper. The `csh`
/// wrapper sources the setup script first; with no readable setup script it
/// falls back to direct execution.
fn build_command(
    cfg: &SmokeConfig,
    repo_root: &Path,
    argv: &[String],
    audit: &AuditLog,
) -> Command {
    match cfg.shell.as_str() {
        "csh" => {
            if let Some(setup) = readable_setup(cfg, repo_root) {
                let mut cmd = Command::new("csh");
                cmd.arg("-c").arg(format!(
                    "source {} && {}",
                    shell_quote(&setup.to_string_lossy()),
                    shell_join(argv)
                ));
                return cmd;
            }
            if !cfg.setup_script.is_empty() {
                audit.warn(&format!(
                    "smoke: setup_script `{}` not readable, running argv directly",
                    cfg.setup_script
                ));
            }
            direct(argv)
        }
        "sh" => {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(shell_join(argv));
            cmd
        }
        _ => direct(argv),
    }
}

fn direct(argv: &[String]) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd
}

fn readable_setup(cfg: &SmokeConfig, repo_root: &Path) -> Option<PathBuf> {
    if cfg.setup_script.is_empty() {
        return None;
    }
    let path = if Path::new(&cfg.setup_script).is_absolute() {
        PathBuf::from(&cfg.setup_script)
    } else {
        repo_root.join(&cfg.setup_script)
    };
    path.is_file().then_some(path)
}

/// Single-quote one argument for a POSIX/csh command line.
fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=+:".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}
