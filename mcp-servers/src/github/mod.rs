//! GitHub API access.

pub mod client;
pub mod types;

pub use client::{GitHubClient, DEFAULT_API_VERSION, DEFAULT_GITHUB_URL};
pub use types::{
    GitRef, Hook, HookConfig, HookSpec, Issue, Label, NewIssue, NewPullRequest, PullFile,
    PullRequest, Repository, User,
};
