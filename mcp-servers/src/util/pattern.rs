//! Glob-style matching for branch patterns and file label rules.
//!
//! Only `*` is special: it matches any run of characters, including `/`.
//! Patterns are anchored at both ends.

use regex::Regex;

/// Compile a glob pattern into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*"))).ok()
}

/// Check whether `text` matches the glob `pattern`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    glob_to_regex(pattern).is_some_and(|re| re.is_match(text))
}

/// Check whether `text` matches any of `patterns`.
pub fn matches_any<S: AsRef<str>>(patterns: &[S], text: &str) -> bool {
    patterns.iter().any(|p| glob_match(p.as_ref(), text))
}

/// Match a file path against a rule, trying the full path first and then
/// the file name alone (so `*.md` covers `docs/guide.md`).
pub fn path_matches(pattern: &str, path: &str) -> bool {
    if glob_match(pattern, path) {
        return true;
    }
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name != path && glob_match(pattern, file_name)
}
