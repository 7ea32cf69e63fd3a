#![doc = include_str!("../README.md")]

use clap::Parser;

mod cli;
mod commands;
mod domain;
mod git;
mod services;

use chrono::Local;
use cli::{Cli, Commands, LedgerCommands, PolicyCommands, TokenCommands};
use commands::{handle_check, handle_ledger_list, handle_policy_check, handle_token_hash};
use domain::models::{GateReport, JsonOut, PolicySummary, Verdict};
use git::{current_branch, repo_root, staged_changes, user_identity};
use services::audit::AuditLog;
use services::bypass::{resolve as resolve_bypass, sha256_hex, BypassRequest};
use services::evaluate::{EvalContext, Evaluator};
use services::ledger::LedgerStore;
use services::policy::load_policy;
use services::report::{
    build_groups, render_blocked, render_decisions, render_smoke_failure, Presentation,
};
use services::smoke::run_smoke;

fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            if json {
                print_json_error(&error.to_string());
            } else {
                eprintln!("error: {}", error);
            }
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    match &cli.command {
        None | Some(Commands::Check) => handle_check(&cli),
        Some(Commands::Token {
            command: TokenCommands::Hash { secret },
        }) => {
            let secret = secret.clone();
            handle_token_hash(&cli, &secret)?;
            Ok(0)
        }
        Some(Commands::Ledger {
            command: LedgerCommands::List,
        }) => {
            handle_ledger_list(&cli)?;
            Ok(0)
        }
        Some(Commands::Policy {
            command: PolicyCommands::Check,
        }) => {
            handle_policy_check(&cli)?;
            Ok(0)
        }
    }
}

fn print_json_error(message: &str) {
    let out = serde_json::json!({
        "ok": false,
        "error": {
            "code": map_error_code(message),
            "message": message,
            "hint": error_hint(message),
            "retryable": false
        },
        "meta": {"version": "v1"}
    });

    println!(
        "{}",
        serde_json::to_string_pretty(&out).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
}

fn map_error_code(msg: &str) -> &'static str {
    let m = msg.to_ascii_lowercase();
    if m.contains("work tree") {
        "NOT_A_REPO"
    } else if m.contains("policy") {
        "POLICY_INVALID"
    } else if m.contains("ledger") {
        "LEDGER_DENIED"
    } else if m.contains("git") {
        "VCS_ERROR"
    } else {
        "INTERNAL_ERROR"
    }
}

fn error_hint(msg: &str) -> &'static str {
    let m = msg.to_ascii_lowercase();
    if m.contains("work tree") {
        "run from inside the repository the hook protects"
    } else if m.contains("policy") {
        "fix config/hook_policy.json and run `dvgate policy check`"
    } else if m.contains("ledger") {
        "check permissions on .git/dv-hooks/ and retry"
    } else {
        "run `dvgate --json check` for diagnostics"
    }
}
