use crate::domain::models::PolicyOptions;
use globset::{GlobBuilder, GlobMatcher};
use std::path::Path;

/// One policy pattern compiled for matching.
///
/// `*` and `?` stay within a path segment; `**` crosses segments. Patterns
/// are matched case-sensitively regardless of platform.
struct CompiledPattern {
    /// Original policy text, used in verdict details.
    raw: String,
    matcher: GlobMatcher,
    /// Match against the absolute filesystem path instead of the
    /// repo-relative candidate.
    absolute: bool,
}

pub struct PatternSet {
    patterns: Vec<CompiledPattern>,
}

/// Validate a single pattern without keeping the compiled form.
pub fn compile_check(pattern: &str, options: &PolicyOptions) -> anyhow::Result<()> {
    compile_one(pattern, options).map(|_| ())
}

pub fn compile_set(patterns: &[String], options: &PolicyOptions) -> anyhow::Result<PatternSet> {
    let mut compiled = Vec::with_capacity(patterns.len());
    for p in patterns {
        compiled.push(compile_one(p, options)?);
    }
    Ok(PatternSet { patterns: compiled })
}

fn compile_one(pattern: &str, options: &PolicyOptions) -> anyhow::Result<CompiledPattern> {
    let expanded = if options.expand_env {
        expand_env_vars(pattern)
    } else {
        pattern.to_string()
    };
    let absolute = expanded.starts_with('/')
        && options.treat_patterns_as_absolute_when_starting_with_slash;
    let glob_src = if absolute {
        expanded.clone()
    } else {
        expanded.trim_start_matches('/').to_string()
    };
    let glob = GlobBuilder::new(&glob_src).literal_separator(true).build()?;
    Ok(CompiledPattern {
        raw: pattern.to_string(),
        matcher: glob.compile_matcher(),
        absolute,
    })
}

impl PatternSet {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Match a repo-relative candidate path; returns the first matching
    /// pattern's original text.
    pub fn matches(&self, rel_path: &str, repo_root: &Path) -> Option<&str> {
        for p in &self.patterns {
            let hit = if p.absolute {
                p.matcher.is_match(repo_root.join(rel_path))
            } else {
                p.matcher.is_match(rel_path)
            };
            if hit {
                return Some(&p.raw);
            }
        }
        None
    }

    pub fn matches_any(&self, rel_paths: &[&str], repo_root: &Path) -> Option<&str> {
        rel_paths
            .iter()
            .find_map(|p| self.matches(p, repo_root))
    }
}

/// Expand `$NAME` and `${NAME}` from the process environment.
/// Undefined variables (and malformed references) stay literal.
pub fn expand_env_vars(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        // ${NAME}
        if i + 1 < chars.len() && chars[i + 1] == '{' {
            if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                let name: String = chars[i + 2..i + 2 + close].iter().collect();
                if is_var_name(&name) {
                    if let Ok(val) = std::env::var(&name) {
                        out.push_str(&val);
                        i += close + 3;
                        continue;
                    }
                }
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
                i += close + 3;
                continue;
            }
            out.push('$');
            i += 1;
            continue;
        }
        // $NAME
        let start = i + 1;
        let mut end = start;
        while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
            end += 1;
        }
        if end == start {
            out.push('$');
            i += 1;
            continue;
        }
        let name: String = chars[start..end].iter().collect();
        match std::env::var(&name) {
            Ok(val) => out.push_str(&val),
            Err(_) => {
                out.push('$');
                out.push_str(&name);
            }
        }
        i = end;
    }
    out
}

fn is_var_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The candidate's final extension, lowercased with a leading dot.
/// Files without an extension (including dotfiles) yield `None`.
pub fn path_ext(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
}

/// Extension allowlist check against a normalized (lowercase, dotted) list.
pub fn ext_in_list(path: &str, list: &[String]) -> bool {
    match path_ext(path) {
        Some(ext) => list.iter().any(|e| *e == ext),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn set(patterns: &[&str], options: &PolicyOptions) -> PatternSet {
        let owned: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        compile_set(&owned, options).expect("patterns compile")
    }

    fn root() -> PathBuf {
        PathBuf::from("/repo")
    }

    #[test]
    fn double_star_crosses_segments() {
        let s = set(&["design/**"], &PolicyOptions::default());
        assert!(s.matches("design/top.v", &root()).is_some());
        assert!(s.matches("design/rtl/core/alu.v", &root()).is_some());
        assert!(s.matches("designx/top.v", &root()).is_none());
        assert!(s.matches("tb/design/top.v", &root()).is_none());
    }

    #[test]
    fn leading_double_star_matches_at_root() {
        let s = set(&["**/*.svh"], &PolicyOptions::default());
        assert!(s.matches("defs.svh", &root()).is_some());
        assert!(s.matches("sw/include/defs.svh", &root()).is_some());
    }

    #[test]
    fn single_star_stays_in_segment() {
        let s = set(&["tb/*.sv"], &PolicyOptions::default());
        assert!(s.matches("tb/top.sv", &root()).is_some());
        assert!(s.matches("tb/uvm/top.sv", &root()).is_none());
    }

    #[test]
    fn question_mark_matches_one_char() {
        let s = set(&["rev?.txt"], &PolicyOptions::default());
        assert!(s.matches("rev1.txt", &root()).is_some());
        assert!(s.matches("rev12.txt", &root()).is_none());
    }

    #[test]
    fn matching_is_case_sensitive_on_paths() {
        let s = set(&["Design/**"], &PolicyOptions::default());
        assert!(s.matches("Design/top.v", &root()).is_some());
        assert!(s.matches("design/top.v", &root()).is_none());
    }

    #[test]
    fn returns_the_matching_pattern_text() {
        let s = set(&["tb/**", "design/**"], &PolicyOptions::default());
        assert_eq!(s.matches("design/a.v", &root()), Some("design/**"));
    }

    #[test]
    fn env_expansion_defined_and_undefined() {
        std::env::set_var("DVGATE_TEST_AREA", "design");
        assert_eq!(expand_env_vars("$DVGATE_TEST_AREA/**"), "design/**");
        assert_eq!(expand_env_vars("${DVGATE_TEST_AREA}/**"), "design/**");
        assert_eq!(
            expand_env_vars("$DVGATE_TEST_UNSET_VAR/**"),
            "$DVGATE_TEST_UNSET_VAR/**"
        );
        assert_eq!(
            expand_env_vars("${DVGATE_TEST_UNSET_VAR}/x"),
            "${DVGATE_TEST_UNSET_VAR}/x"
        );
        // A bare dollar is not a reference.
        assert_eq!(expand_env_vars("a$/b"), "a$/b");
        std::env::remove_var("DVGATE_TEST_AREA");
    }

    #[test]
    fn env_expansion_respects_option() {
        std::env::set_var("DVGATE_TEST_OFF", "design");
        let mut options = PolicyOptions::default();
        options.expand_env = false;
        let s = set(&["$DVGATE_TEST_OFF/**"], &options);
        assert!(s.matches("design/top.v", &root()).is_none());
        std::env::remove_var("DVGATE_TEST_OFF");
    }

    #[test]
    fn absolute_pattern_matches_absolute_candidate() {
        let s = set(&["/repo/vendor/**"], &PolicyOptions::default());
        assert!(s.matches("vendor/lib.v", &root()).is_some());
        assert!(s.matches("src/lib.v", &root()).is_none());
    }

    #[test]
    fn leading_slash_stripped_when_absolute_option_off() {
        let mut options = PolicyOptions::default();
        options.treat_patterns_as_absolute_when_starting_with_slash = false;
        let s = set(&["/vendor/**"], &options);
        assert!(s.matches("vendor/lib.v", &root()).is_some());
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(path_ext("a/b/top.SV"), Some(".sv".to_string()));
        assert_eq!(path_ext("archive.tar.gz"), Some(".gz".to_string()));
        assert_eq!(path_ext("Makefile"), None);
        assert_eq!(path_ext("sw/.gitignore"), None);
    }

    #[test]
    fn extension_allowlist_needs_an_extension() {
        let list = vec![".md".to_string()];
        assert!(ext_in_list("README.md", &list));
        assert!(ext_in_list("doc/notes.MD", &list));
        assert!(!ext_in_list("README", &list));
        assert!(!ext_in_list("md", &list));
    }

    #[test]
    fn matches_any_checks_both_rename_sides() {
        let s = set(&["tb/**"], &PolicyOptions::default());
        assert!(s
            .matches_any(&["design/a.v", "tb/b.sv"], &root())
            .is_some());
        assert!(s.matches_any(&["design/a.v"], &root()).is_none());
    }
}
