// Shared across the integration test binaries; not every binary uses every
// helper.
#![allow(dead_code)]

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command as StdCommand;
use tempfile::TempDir;

/// A throwaway git repository with a policy and a committed baseline tree,
/// isolated from the developer's identity and bypass environment.
pub struct TestEnv {
    _tmp: TempDir,
    pub repo: PathBuf,
}

impl TestEnv {
    pub fn with_policy(policy: &Value) -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let repo = tmp.path().join("repo");
        fs::create_dir_all(&repo).expect("create repo dir");

        let env = Self { _tmp: tmp, repo };
        env.git(&["init", "-q"]);
        env.git(&["config", "user.name", "Alice"]);
        env.git(&["config", "user.email", "alice@example.com"]);
        env.git(&["config", "commit.gpgsign", "false"]);

        env.write("config/hook_policy.json", &pretty(policy));
        for (path, content) in [
            ("design/apb.v", "module apb; endmodule\n"),
            ("design/keep.sv", "module keep; endmodule\n"),
            ("tb/sample.sv", "module sample_tb; endmodule\n"),
            ("sw/setup.cfg", "[sim]\nseed = 1\n"),
            ("sw/include/regs.h", "#define REG0 0\n"),
            ("doc/readme.md", "# notes\n"),
        ] {
            env.write(path, content);
        }
        env.git(&["add", "-A"]);
        env.git(&["commit", "-q", "-m", "baseline"]);
        env
    }

    pub fn set_user(&self, name: &str) {
        self.git(&["config", "user.name", name]);
    }

    /// Rewrite the policy in the work tree (without staging it).
    pub fn set_policy(&self, policy: &Value) {
        self.write("config/hook_policy.json", &pretty(policy));
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.repo.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(path, content).expect("write file");
    }

    pub fn git(&self, args: &[&str]) {
        let out = StdCommand::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .expect("run git");
        assert!(
            out.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
    }

    pub fn stage(&self, paths: &[&str]) {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.git(&args);
    }

    pub fn unstage_all(&self) {
        self.git(&["reset", "-q"]);
        self.git(&["checkout", "-q", "--", "."]);
    }

    /// The gate binary with a scrubbed presentation/bypass environment.
    pub fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("dvgate");
        cmd.current_dir(&self.repo)
            .env("NO_COLOR", "1")
            .env_remove("DV_HOOK_BYPASS")
            .env_remove("DV_HOOK_BYPASS_REASON")
            .env_remove("DV_HOOK_MUTE")
            .env_remove("DV_HOOK_TIPS")
            .env_remove("DV_HOOK_SHOW_DECISIONS");
        cmd
    }

    pub fn run_json(&self, args: &[&str]) -> Value {
        let out = self
            .cmd()
            .arg("--json")
            .args(args)
            .output()
            .expect("run dvgate");
        serde_json::from_slice(&out.stdout).expect("valid json output")
    }

    pub fn audit_log(&self) -> String {
        fs::read_to_string(self.repo.join("simlog/precommit_access.log")).unwrap_or_default()
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.repo.join(".git/dv-hooks/bypass_ledger.json")
    }

    pub fn ledger_records(&self) -> Vec<Value> {
        let raw = fs::read_to_string(self.ledger_path()).unwrap_or_else(|_| "[]".to_string());
        serde_json::from_str(&raw).expect("ledger parses")
    }
}

pub fn pretty(v: &Value) -> String {
    serde_json::to_string_pretty(v).expect("serialize policy")
}

/// SHA-256 hex of "abc" per FIPS 180-2, handy as a placeholder token hash.
pub const SHA_ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

/// Compute a token hash the same way an admin would: `dvgate token hash`.
pub fn token_hash(env: &TestEnv, secret: &str) -> String {
    let out = env
        .cmd()
        .args(["token", "hash", secret])
        .output()
        .expect("hash token");
    assert!(out.status.success());
    String::from_utf8(out.stdout).expect("utf8").trim().to_string()
}
