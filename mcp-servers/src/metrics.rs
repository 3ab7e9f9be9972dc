//! Pull request metrics over a time window.
//!
//! PRs are observed newest first. The first PR created before the window
//! start ends the scan, so older PRs are never counted even if a later page
//! would contain one inside the window.

use std::collections::HashMap;
use std::ops::ControlFlow;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::github::{GitHubClient, PullRequest};
use crate::Result;

const PAGE_SIZE: u32 = 100;
const TOP_CONTRIBUTORS: usize = 10;
const OPEN_PR_WARNING: u64 = 10;

/// Optional metric groups that need extra API calls or extra output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsInclude {
    pub merge_time: bool,
    pub comments: bool,
    pub changes: bool,
    pub contributors: bool,
}

impl MetricsInclude {
    pub fn all() -> Self {
        Self {
            merge_time: true,
            comments: true,
            changes: true,
            contributors: true,
        }
    }

    /// Parse tool arguments such as `["merge_time", "comments"]`.
    /// Unknown names are ignored.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut include = Self::default();
        for name in names {
            match name.as_ref() {
                "merge_time" => include.merge_time = true,
                "comments" | "review_time" => include.comments = true,
                "changes" | "size" => include.changes = true,
                "contributors" => include.contributors = true,
                other => debug!(metric = %other, "unknown_metric_ignored"),
            }
        }
        include
    }

    fn needs_detail(&self) -> bool {
        self.comments || self.changes
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContributorCount {
    pub login: String,
    pub count: u64,
}

/// Aggregated metrics for one repository and window.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PrMetrics {
    pub total_prs: u64,
    pub merged_prs: u64,
    pub open_prs: u64,
    pub closed_prs: u64,
    pub stale_prs: u64,
    pub avg_merge_time_hours: f64,
    pub avg_comments: f64,
    pub avg_changes: f64,
    pub top_contributors: Vec<ContributorCount>,
    pub labels: HashMap<String, u64>,
}

/// Incremental metrics aggregation.
#[derive(Debug)]
pub struct PrMetricsAccumulator {
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
    stale_after: Duration,
    include: MetricsInclude,
    done: bool,
    total: u64,
    merged: u64,
    open: u64,
    closed: u64,
    stale: u64,
    merge_hours: Vec<f64>,
    engagement: Vec<u64>,
    changes: Vec<u64>,
    contributors: HashMap<String, u64>,
    labels: HashMap<String, u64>,
}

impl PrMetricsAccumulator {
    /// Counts are always kept; merge times, comments, changes and
    /// contributors only when `include` asks for them.
    pub fn new(
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
        stale_after_days: u32,
        include: MetricsInclude,
    ) -> Self {
        Self {
            window_start,
            now,
            stale_after: Duration::days(i64::from(stale_after_days)),
            include,
            done: false,
            total: 0,
            merged: 0,
            open: 0,
            closed: 0,
            stale: 0,
            merge_hours: Vec::new(),
            engagement: Vec::new(),
            changes: Vec::new(),
            contributors: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Record one PR. Returns `Break` once a PR older than the window is seen;
    /// everything observed after that is ignored.
    pub fn observe(&mut self, pr: &PullRequest) -> ControlFlow<()> {
        if self.done {
            return ControlFlow::Break(());
        }

        let created_at = match pr.created_at {
            Some(ts) => ts,
            None => {
                debug!(number = pr.number, "pr_without_created_at_skipped");
                return ControlFlow::Continue(());
            }
        };

        if created_at < self.window_start {
            self.done = true;
            return ControlFlow::Break(());
        }

        self.total += 1;
        if self.include.contributors {
            *self.contributors.entry(pr.author().to_string()).or_insert(0) += 1;
        }
        for label in &pr.labels {
            *self.labels.entry(label.name.clone()).or_insert(0) += 1;
        }

        if pr.is_merged() {
            self.merged += 1;
            if let Some(merged_at) = pr.merged_at.filter(|_| self.include.merge_time) {
                let hours = (merged_at - created_at).num_seconds() as f64 / 3600.0;
                self.merge_hours.push(hours.max(0.0));
            }
            if let Some(lines) = pr.changed_lines().filter(|_| self.include.changes) {
                self.changes.push(lines);
            }
        } else if pr.state == "open" {
            self.open += 1;
            if self.now - created_at > self.stale_after {
                self.stale += 1;
            }
        } else {
            self.closed += 1;
        }

        if self.include.comments {
            if let (Some(comments), Some(review_comments)) = (pr.comments, pr.review_comments) {
                self.engagement.push(comments + review_comments);
            }
        }

        ControlFlow::Continue(())
    }

    pub fn finish(self) -> PrMetrics {
        let mut top: Vec<ContributorCount> = self
            .contributors
            .into_iter()
            .map(|(login, count)| ContributorCount { login, count })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.login.cmp(&b.login)));
        top.truncate(TOP_CONTRIBUTORS);

        PrMetrics {
            total_prs: self.total,
            merged_prs: self.merged,
            open_prs: self.open,
            closed_prs: self.closed,
            stale_prs: self.stale,
            avg_merge_time_hours: mean(&self.merge_hours),
            avg_comments: mean(&self.engagement.iter().map(|&n| n as f64).collect::<Vec<_>>()),
            avg_changes: mean(&self.changes.iter().map(|&n| n as f64).collect::<Vec<_>>()),
            top_contributors: top,
            labels: self.labels,
        }
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

/// Human-readable observations about a metrics summary.
pub fn generate_insights(metrics: &PrMetrics) -> Vec<String> {
    let mut insights = Vec::new();
    if metrics.total_prs == 0 {
        return insights;
    }

    let merge_rate = metrics.merged_prs as f64 / metrics.total_prs as f64 * 100.0;
    insights.push(format!("Merge rate: {:.1}%", merge_rate));

    if metrics.avg_merge_time_hours > 0.0 {
        if metrics.avg_merge_time_hours < 24.0 {
            insights.push(format!(
                "PRs are merged quickly (avg {:.1} hours)",
                metrics.avg_merge_time_hours
            ));
        } else {
            insights.push(format!(
                "Average merge time is {:.1} days",
                metrics.avg_merge_time_hours / 24.0
            ));
        }
    }

    if metrics.avg_comments > 0.0 {
        insights.push(format!(
            "Average review engagement: {:.1} comments per PR",
            metrics.avg_comments
        ));
    }

    if let Some(top) = metrics.top_contributors.first() {
        insights.push(format!("Top contributor: {} ({} PRs)", top.login, top.count));
    }

    if metrics.open_prs > OPEN_PR_WARNING {
        insights.push(format!(
            "{} PRs are still open; consider reviewing the backlog",
            metrics.open_prs
        ));
    }

    if metrics.stale_prs > 0 {
        insights.push(format!("{} open PRs look stale", metrics.stale_prs));
    }

    insights
}

/// Page through a repository's PRs, newest first, until the window ends.
pub async fn analyze_repository(
    github: &GitHubClient,
    full_name: &str,
    window_days: u32,
    include: MetricsInclude,
    stale_after_days: u32,
) -> Result<PrMetrics> {
    let now = Utc::now();
    let window_start = now - Duration::days(i64::from(window_days));
    let mut acc = PrMetricsAccumulator::new(window_start, now, stale_after_days, include);
    let mut page = 1;

    'pages: loop {
        let pulls = github.list_pulls(full_name, page, PAGE_SIZE).await?;
        let last_page = (pulls.len() as u32) < PAGE_SIZE;

        for listed in pulls {
            let pr = if include.needs_detail() {
                match github.get_pull(full_name, listed.number).await {
                    Ok(detail) => detail,
                    Err(e) => {
                        warn!(repo = %full_name, number = listed.number, error = %e, "pr_detail_fetch_failed");
                        listed
                    }
                }
            } else {
                listed
            };

            if acc.observe(&pr).is_break() {
                break 'pages;
            }
        }

        if last_page {
            break;
        }
        page += 1;
    }

    debug!(repo = %full_name, pages = page, "pr_metrics_collected");
    Ok(acc.finish())
}
