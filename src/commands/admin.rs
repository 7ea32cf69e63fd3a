use crate::*;
use std::io::Read;

pub fn handle_token_hash(cli: &Cli, secret: &str) -> anyhow::Result<()> {
    let secret = if secret == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf.trim_end_matches(['\r', '\n']).to_string()
    } else {
        secret.to_string()
    };
    let digest = sha256_hex(&secret);
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&JsonOut {
                ok: true,
                data: serde_json::json!({ "sha256": digest })
            })?
        );
    } else {
        println!("{}", digest);
    }
    Ok(())
}

pub fn handle_ledger_list(cli: &Cli) -> anyhow::Result<()> {
    let root = repo_root()?;
    let snapshot = LedgerStore::new(&root).snapshot();
    if !snapshot.readable {
        eprintln!("warning: ledger file is unreadable, showing an empty list");
    }
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&JsonOut {
                ok: true,
                data: &snapshot.records
            })?
        );
    } else {
        for r in &snapshot.records {
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}",
                r.ts,
                r.user,
                r.scope,
                r.label,
                r.hash_prefix,
                r.result.as_str()
            );
        }
    }
    Ok(())
}

pub fn handle_policy_check(cli: &Cli) -> anyhow::Result<()> {
    let root = repo_root()?;
    let loaded = load_policy(&root)?;
    let p = &loaded.policy;
    let summary = PolicySummary {
        version: p.version,
        config_admins: p.config_admins.len(),
        locked_entries: p.locked.len(),
        restricted_entries: p.restricted.len(),
        deletion_protected_patterns: p.deletion_protected.len(),
        freeze_enabled: p.freeze.enabled,
        emergency_bypass_enabled: p.emergency_bypass.enabled,
        smoke_enabled: p.smoke_test.enabled,
        warnings: loaded.warnings,
    };
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&JsonOut {
                ok: true,
                data: summary
            })?
        );
    } else {
        println!(
            "policy ok: version={} admins={} locked={} restricted={} deletion_protected={}",
            summary.version,
            summary.config_admins,
            summary.locked_entries,
            summary.restricted_entries,
            summary.deletion_protected_patterns
        );
        println!(
            "features: freeze={} emergency_bypass={} smoke={}",
            summary.freeze_enabled, summary.emergency_bypass_enabled, summary.smoke_enabled
        );
        for w in &summary.warnings {
            println!("warning: {}", w);
        }
    }
    Ok(())
}
