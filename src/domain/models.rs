use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct JsonOut<T: Serialize> {
    pub ok: bool,
    pub data: T,
}

// ── Policy document ──

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    crate::domain::constants::DEFAULT_LOG_PATH.to_string()
}

fn default_max_files_per_group() -> usize {
    10
}

fn default_freeze_priority() -> String {
    "override_all".to_string()
}

fn default_smoke_mode() -> String {
    "warn".to_string()
}

fn default_smoke_timeout() -> u64 {
    300
}

/// The declarative policy at `config/hook_policy.json`.
///
/// Every section defaults to empty/disabled so a minimal policy stays valid.
/// Extensions are normalized (lowercase, leading dot) by the loader; user
/// strings are preserved verbatim and compared per `options`.
#[derive(Debug, Deserialize, Default)]
pub struct PolicyFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub config_admins: Vec<String>,
    #[serde(default)]
    pub options: PolicyOptions,
    #[serde(default)]
    pub global_bypass: GlobalBypass,
    #[serde(default)]
    pub locked: Vec<LockedEntry>,
    #[serde(default)]
    pub restricted: Vec<RestrictedEntry>,
    #[serde(default)]
    pub deletion_protected: Vec<String>,
    #[serde(default)]
    pub emergency_bypass: BypassConfig,
    #[serde(default)]
    pub freeze: FreezeConfig,
    #[serde(default)]
    pub smoke_test: SmokeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyOptions {
    #[serde(default = "default_true")]
    pub case_sensitive_users: bool,
    #[serde(default = "default_true")]
    pub expand_env: bool,
    #[serde(default = "default_true")]
    pub treat_patterns_as_absolute_when_starting_with_slash: bool,
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default)]
    pub ui: UiOptions,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            case_sensitive_users: true,
            expand_env: true,
            treat_patterns_as_absolute_when_starting_with_slash: true,
            log_path: default_log_path(),
            ui: UiOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiOptions {
    #[serde(default = "default_max_files_per_group")]
    pub max_files_per_group: usize,
}

impl Default for UiOptions {
    fn default() -> Self {
        Self {
            max_files_per_group: default_max_files_per_group(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct GlobalBypass {
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
}

/// Entries accept `path` (single pattern) or `paths` (list); both may appear.
#[derive(Debug, Deserialize, Default)]
pub struct LockedEntry {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
}

impl LockedEntry {
    pub fn patterns(&self) -> Vec<String> {
        let mut out: Vec<String> = self.path.iter().cloned().collect();
        out.extend(self.paths.iter().cloned());
        out
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RestrictedEntry {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
}

impl RestrictedEntry {
    pub fn patterns(&self) -> Vec<String> {
        let mut out: Vec<String> = self.path.iter().cloned().collect();
        out.extend(self.paths.iter().cloned());
        out
    }
}

/// A bypass token. `sha256` is the lowercase hex digest of the raw UTF-8
/// secret; `expires` is local wall-clock `YYYY-MM-DD HH:MM:SS`.
#[derive(Debug, Deserialize, Clone)]
pub struct TokenSpec {
    #[serde(default)]
    pub label: String,
    pub sha256: String,
    #[serde(default)]
    pub reusable: bool,
    #[serde(default)]
    pub expires: Option<String>,
}

/// Shared shape of `emergency_bypass` and the user/token half of `freeze`.
#[derive(Debug, Deserialize, Default)]
pub struct BypassConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub require_reason: bool,
    #[serde(default)]
    pub tokens: Vec<TokenSpec>,
}

#[derive(Debug, Deserialize)]
pub struct FreezeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Restricts freeze evaluation to one branch; empty means any branch.
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub windows: Vec<FreezeWindow>,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub require_reason: bool,
    #[serde(default)]
    pub tokens: Vec<TokenSpec>,
    /// `override_all` checks freeze before deletion protection; any other
    /// value defers it until after the restricted rule.
    #[serde(default = "default_freeze_priority")]
    pub priority: String,
}

impl Default for FreezeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            branch: String::new(),
            windows: Vec::new(),
            allowed_users: Vec::new(),
            require_reason: false,
            tokens: Vec::new(),
            priority: default_freeze_priority(),
        }
    }
}

/// A freeze window. Both bounds absent means a pure toggle (active whenever
/// freeze is enabled); bounds are inclusive local wall-clock timestamps.
#[derive(Debug, Deserialize, Default)]
pub struct FreezeWindow {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SmokeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `warn` reports failures and lets the commit through; `block` aborts.
    #[serde(default = "default_smoke_mode")]
    pub mode: String,
    #[serde(default = "default_smoke_timeout")]
    pub timeout_sec: u64,
    /// `csh` or `sh` selects a wrapper; anything else runs argv directly.
    #[serde(default)]
    pub shell: String,
    #[serde(default)]
    pub setup_script: String,
    #[serde(default)]
    pub paths_compile_elab: Vec<String>,
    #[serde(default)]
    pub cmds_compile_elab: Vec<Vec<String>>,
    #[serde(default)]
    pub sw_header_globs: Vec<String>,
    #[serde(default)]
    pub cmds_sw: Vec<Vec<String>>,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: default_smoke_mode(),
            timeout_sec: default_smoke_timeout(),
            shell: String::new(),
            setup_script: String::new(),
            paths_compile_elab: Vec::new(),
            cmds_compile_elab: Vec::new(),
            sw_header_globs: Vec::new(),
            cmds_sw: Vec::new(),
        }
    }
}

// ── Staged changes ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    TypeChanged,
}

impl ChangeStatus {
    pub fn letter(self) -> char {
        match self {
            ChangeStatus::Added => 'A',
            ChangeStatus::Modified => 'M',
            ChangeStatus::Deleted => 'D',
            ChangeStatus::Renamed => 'R',
            ChangeStatus::Copied => 'C',
            ChangeStatus::TypeChanged => 'T',
        }
    }
}

/// One staged path change as reported by the VCS.
///
/// A rename is logically a delete of `old_path` plus an add of `new_path`;
/// the evaluator folds both questions into a single verdict.
#[derive(Debug, Clone, Serialize)]
pub struct Change {
    pub status: ChangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
}

impl Change {
    /// Every path the change touches, old side first.
    pub fn effective_paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some(p) = self.old_path.as_deref() {
            out.push(p);
        }
        if let Some(p) = self.new_path.as_deref() {
            out.push(p);
        }
        out
    }

    /// The path whose removal this change implies, if any. Copies keep the
    /// source in place and therefore have no delete side.
    pub fn delete_side(&self) -> Option<&str> {
        match self.status {
            ChangeStatus::Deleted | ChangeStatus::Renamed => self.old_path.as_deref(),
            _ => None,
        }
    }

    /// A short "old -> new" label for report and audit lines.
    pub fn display_path(&self) -> String {
        match (self.old_path.as_deref(), self.new_path.as_deref()) {
            (Some(old), Some(new)) if old != new => format!("{} -> {}", old, new),
            (_, Some(new)) => new.to_string(),
            (Some(old), None) => old.to_string(),
            (None, None) => String::from("?"),
        }
    }
}

// ── Verdicts ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Rule {
    PolicyEdit,
    Freeze,
    DeletionProtected,
    GlobalExt,
    Locked,
    Restricted,
    Default,
}

impl Rule {
    pub fn as_str(self) -> &'static str {
        match self {
            Rule::PolicyEdit => "PolicyEdit",
            Rule::Freeze => "Freeze",
            Rule::DeletionProtected => "DeletionProtected",
            Rule::GlobalExt => "GlobalExt",
            Rule::Locked => "Locked",
            Rule::Restricted => "Restricted",
            Rule::Default => "Default",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BypassScope {
    Freeze,
    Emergency,
}

impl BypassScope {
    pub fn as_str(self) -> &'static str {
        match self {
            BypassScope::Freeze => "freeze",
            BypassScope::Emergency => "emergency",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub change: Change,
    pub decision: Decision,
    pub rule: Rule,
    pub detail: String,
    /// Who could have made this change (admins or an entry's allowed
    /// users); informs the report, never the decision.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub eligible_users: Vec<String>,
    /// Set when a bypass converted this verdict from Block to Allow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass: Option<BypassScope>,
}

impl Verdict {
    pub fn is_block(&self) -> bool {
        self.decision == Decision::Block
    }
}

// ── Ledger ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerResult {
    Consumed,
    ReplayedDenied,
}

impl LedgerResult {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerResult::Consumed => "consumed",
            LedgerResult::ReplayedDenied => "replayed_denied",
        }
    }
}

/// One bypass event. Field names form the on-disk schema; keep changes
/// backward compatible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub ts: String,
    pub user: String,
    pub scope: String,
    pub label: String,
    pub hash_prefix: String,
    pub reusable: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub files: Vec<String>,
    pub result: LedgerResult,
}

// ── Reports ──

#[derive(Serialize)]
pub struct BlockGroup {
    pub rule: Rule,
    pub explanation: String,
    pub files: Vec<String>,
    /// Count of files omitted by `options.ui.max_files_per_group`.
    pub truncated: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub eligible_users: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Serialize)]
pub struct GateReport {
    pub allowed: bool,
    pub user: String,
    pub branch: String,
    pub changes: usize,
    pub blocked: usize,
    pub groups: Vec<BlockGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoke: Option<SmokeReport>,
}

#[derive(Debug, Serialize)]
pub struct SmokeCommandResult {
    pub group: String,
    pub command: String,
    pub status: String,
    pub duration_ms: u128,
}

#[derive(Debug, Serialize)]
pub struct SmokeReport {
    pub triggered: Vec<String>,
    pub commands: Vec<SmokeCommandResult>,
    pub failed: bool,
    pub mode: String,
}

#[derive(Serialize)]
pub struct PolicySummary {
    pub version: u32,
    pub config_admins: usize,
    pub locked_entries: usize,
    pub restricted_entries: usize,
    pub deletion_protected_patterns: usize,
    pub freeze_enabled: bool,
    pub emergency_bypass_enabled: bool,
    pub smoke_enabled: bool,
    pub warnings: Vec<String>,
}
