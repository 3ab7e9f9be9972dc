//! Text rules applied to issues, pull requests and commits.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::util::pattern::path_matches;

const WIP_MARKERS: &[&str] = &["wip", "work in progress", "draft", "[wip]", "[draft]"];

const CLOSING_KEYWORDS: &[&str] = &["fixes #", "closes #", "resolves #"];

/// File rules used for auto-labeling pull requests.
const FILE_LABEL_RULES: &[(&str, &[&str])] = &[
    ("frontend", &["*.tsx", "*.jsx", "*.css", "*.scss"]),
    ("backend", &["*.py", "*.go", "*.java", "*.rb", "*.rs"]),
    ("docs", &["*.md", "*.rst", "*.txt"]),
    ("tests", &["*test*", "*spec*"]),
    ("ci/cd", &[".github/*", ".gitlab-ci.yml", "Jenkinsfile"]),
];

/// Issue/PR label → agent type.
const LABEL_AGENT_TYPES: &[(&str, &str)] = &[
    ("bug", "BACKEND"),
    ("feature", "GENERAL"),
    ("enhancement", "GENERAL"),
    ("frontend", "FRONTEND"),
    ("backend", "BACKEND"),
    ("api", "BACKEND"),
    ("ui", "FRONTEND"),
    ("test", "TESTING"),
    ("docs", "DOCUMENTATION"),
    ("documentation", "DOCUMENTATION"),
    ("devops", "DEVOPS"),
    ("security", "REVIEW"),
    ("performance", "REVIEW"),
];

fn issue_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#(\d+)").expect("static regex"))
}

fn closing_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:fixes|closes|resolves)\s+#(\d+)").expect("static regex"))
}

fn agent_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)agent:\s*@?(\w+)").expect("static regex"))
}

/// Whether a PR title marks work in progress.
pub fn is_wip_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    WIP_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Parse an `agent: name` marker, returning the lowercased name.
pub fn extract_agent_marker(body: &str) -> Option<String> {
    agent_marker_regex()
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// All `#N` references in a message, in order of appearance, deduplicated.
pub fn extract_issue_references(message: &str) -> Vec<u64> {
    let mut seen = BTreeSet::new();
    issue_ref_regex()
        .captures_iter(message)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .filter(|n| seen.insert(*n))
        .collect()
}

/// Whether a commit message carries a closing marker.
pub fn has_closing_marker(message: &str) -> bool {
    let lower = message.to_lowercase();
    CLOSING_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Issue numbers closed by `fixes #N`, `closes #N`, `resolves #N`.
pub fn extract_closing_references(message: &str) -> Vec<u64> {
    let mut seen = BTreeSet::new();
    closing_ref_regex()
        .captures_iter(message)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .filter(|n| seen.insert(*n))
        .collect()
}

/// Result of keyword triage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Triage {
    pub labels: Vec<String>,
    pub priority: &'static str,
    pub suggested_agent_type: Option<&'static str>,
}

/// Keyword triage over an issue title and body.
pub fn triage_issue(title: &str, body: &str) -> Triage {
    let title = title.to_lowercase();
    let body = body.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| title.contains(w) || body.contains(w));

    let (label, priority) = if mentions(&["bug", "error", "crash", "fail"]) {
        (Some("bug"), "high")
    } else if mentions(&["feature", "enhancement", "improve"]) {
        (Some("enhancement"), "medium")
    } else if mentions(&["question", "help", "how"]) {
        (Some("question"), "low")
    } else {
        (None, "medium")
    };

    Triage {
        labels: label.map(|l| vec![l.to_string()]).unwrap_or_default(),
        priority,
        suggested_agent_type: label.and_then(agent_type_for_label),
    }
}

/// Size label for a change of `additions + deletions` lines.
pub fn size_label(additions: u64, deletions: u64) -> &'static str {
    match additions + deletions {
        0..=9 => "size/XS",
        10..=49 => "size/S",
        50..=249 => "size/M",
        250..=999 => "size/L",
        _ => "size/XL",
    }
}

/// Component labels for a set of changed file paths, sorted.
pub fn file_labels<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    FILE_LABEL_RULES
        .iter()
        .filter(|(_, patterns)| {
            paths
                .iter()
                .any(|path| patterns.iter().any(|p| path_matches(p, path.as_ref())))
        })
        .map(|(label, _)| label.to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Agent type responsible for a label, if any.
pub fn agent_type_for_label(label: &str) -> Option<&'static str> {
    let lower = label.to_lowercase();
    LABEL_AGENT_TYPES
        .iter()
        .find(|(l, _)| *l == lower)
        .map(|(_, t)| *t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_wip_title() {
        assert!(is_wip_title("[WIP] new parser"));
        assert!(is_wip_title("Draft: refactor"));
        assert!(is_wip_title("work in progress on cache"));
        assert!(!is_wip_title("feat: add parser"));
    }

    #[test]
    fn test_extract_agent_marker() {
        assert_eq!(extract_agent_marker("Please review\nAgent: @Backend_Bot"), Some("backend_bot".to_string()));
        assert_eq!(extract_agent_marker("agent:frontend"), Some("frontend".to_string()));
        assert_eq!(extract_agent_marker("no marker here"), None);
    }

    #[test]
    fn test_extract_issue_references() {
        assert_eq!(extract_issue_references("Fix bug in #42, see #7 and #42"), vec![42, 7]);
        assert!(extract_issue_references("nothing").is_empty());
    }

    #[test]
    fn test_closing_references() {
        let message = "Refactor cache\n\nFixes #12, relates to #13, closes #14";
        assert!(has_closing_marker(message));
        assert_eq!(extract_closing_references(message), vec![12, 14]);
        assert!(!has_closing_marker("see #12"));
    }

    #[test]
    fn test_triage_issue() {
        let bug = triage_issue("App crashes on start", "");
        assert_eq!(bug.labels, vec!["bug"]);
        assert_eq!(bug.priority, "high");
        assert_eq!(bug.suggested_agent_type, Some("BACKEND"));

        let feature = triage_issue("Improve search", "would be nice");
        assert_eq!(feature.labels, vec!["enhancement"]);
        assert_eq!(feature.priority, "medium");

        let question = triage_issue("Question about setup", "");
        assert_eq!(question.labels, vec!["question"]);
        assert_eq!(question.priority, "low");
        assert_eq!(question.suggested_agent_type, None);

        let plain = triage_issue("Update dependencies", "routine");
        assert!(plain.labels.is_empty());
        assert_eq!(plain.priority, "medium");
    }

    #[test]
    fn test_size_label_boundaries() {
        assert_eq!(size_label(5, 4), "size/XS");
        assert_eq!(size_label(10, 0), "size/S");
        assert_eq!(size_label(200, 49), "size/M");
        assert_eq!(size_label(250, 0), "size/L");
        assert_eq!(size_label(999, 1), "size/XL");
    }

    #[test]
    fn test_file_labels() {
        let labels = file_labels(&[
            "web/src/App.tsx",
            "README.md",
            ".github/workflows/ci.yml",
            "server/api_test.py",
        ]);
        assert_eq!(labels, vec!["backend", "ci/cd", "docs", "frontend", "tests"]);
        assert!(file_labels::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_agent_type_for_label() {
        assert_eq!(agent_type_for_label("Frontend"), Some("FRONTEND"));
        assert_eq!(agent_type_for_label("wontfix"), None);
    }
}
