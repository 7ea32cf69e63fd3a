use crate::*;

/// The gate run: collect, evaluate, resolve bypasses, smoke, present.
/// Returns the process exit code (0 permits the commit).
pub fn handle_check(cli: &Cli) -> anyhow::Result<i32> {
    let root = repo_root()?;
    let loaded = load_policy(&root)?;
    let policy = &loaded.policy;
    let audit = AuditLog::open(&root, &policy.options.log_path);
    for w in &loaded.warnings {
        audit.warn(w);
    }

    let changes = staged_changes(&root)?;
    if changes.is_empty() {
        return Ok(0);
    }

    let user = user_identity(&root);
    let branch = current_branch(&root).unwrap_or_else(|_| "HEAD".to_string());
    let now = Local::now().naive_local();

    let evaluator = Evaluator::new(EvalContext {
        policy,
        user: &user,
        branch: &branch,
        repo_root: &root,
        now,
    })?;
    let mut verdicts = evaluator.evaluate_all(&changes);
    for v in &verdicts {
        audit.decision(&user, v);
    }

    let presentation = Presentation::from_env(&policy.options);

    if verdicts.iter().any(Verdict::is_block) {
        let store = LedgerStore::new(&root);
        let request = BypassRequest::from_env();
        let resolution = resolve_bypass(policy, &user, now, &store, &request, &mut verdicts);
        for pass in &resolution.passes {
            if pass.granted {
                audit.line(&format!(
                    "BYPASS {} granted user={} reason={} files={}",
                    pass.scope.as_str(),
                    user,
                    request.reason,
                    pass.cleared_files.join(",")
                ));
            }
            for note in &pass.notes {
                audit.warn(&format!("bypass {}: {}", pass.scope.as_str(), note));
            }
        }
        // Cleared verdicts get a second decision line carrying the bypass
        // mark, so the log shows both the block and its override.
        for v in verdicts.iter().filter(|v| v.bypass.is_some()) {
            audit.decision(&user, v);
        }
    }

    if presentation.show_decisions {
        render_decisions(&user, &verdicts);
    }

    let blocked = verdicts.iter().filter(|v| v.is_block()).count();
    if blocked > 0 {
        let groups = build_groups(&verdicts, policy, presentation.max_files_per_group);
        if cli.json {
            print_gate_report(GateReport {
                allowed: false,
                user,
                branch,
                changes: changes.len(),
                blocked,
                groups,
                smoke: None,
            })?;
        } else {
            render_blocked(&presentation, &groups, blocked);
        }
        return Ok(1);
    }

    let mut smoke = None;
    if policy.smoke_test.enabled {
        let report = run_smoke(&policy.smoke_test, &policy.options, &root, &changes, &audit)?;
        if report.failed {
            let blocking = report.mode == "block";
            if !cli.json {
                render_smoke_failure(&presentation, &report, blocking);
            }
            if blocking {
                if cli.json {
                    print_gate_report(GateReport {
                        allowed: false,
                        user,
                        branch,
                        changes: changes.len(),
                        blocked: 0,
                        groups: Vec::new(),
                        smoke: Some(report),
                    })?;
                }
                return Ok(1);
            }
        }
        smoke = Some(report);
    }

    if cli.json {
        print_gate_report(GateReport {
            allowed: true,
            user,
            branch,
            changes: changes.len(),
            blocked: 0,
            groups: Vec::new(),
            smoke,
        })?;
    }
    Ok(0)
}

fn print_gate_report(report: GateReport) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&JsonOut {
            ok: true,
            data: report
        })?
    );
    Ok(())
}
