//! Per-repository PR automation settings and agent assignments.

pub mod rules;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::{self, Cache, PR_CONFIG_TTL};
use crate::config::AutomationDefaults;
use crate::util::pattern::matches_any;

/// PR automation configuration for one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrAutomationConfig {
    pub auto_assign: bool,
    pub auto_label: bool,
    pub require_reviews: u32,
    pub protected_branches: Vec<String>,
    pub draft_on_wip: bool,
    pub close_stale_after_days: u32,
}

impl From<&AutomationDefaults> for PrAutomationConfig {
    fn from(defaults: &AutomationDefaults) -> Self {
        Self {
            auto_assign: defaults.auto_assign,
            auto_label: defaults.auto_label,
            require_reviews: defaults.required_reviews,
            protected_branches: defaults.protected_branches.clone(),
            draft_on_wip: defaults.draft_on_wip,
            close_stale_after_days: defaults.close_stale_days,
        }
    }
}

impl PrAutomationConfig {
    pub fn is_protected(&self, branch: &str) -> bool {
        matches_any(&self.protected_branches, branch)
    }
}

fn config_key(repo_id: &str) -> String {
    format!("pr:config:{}", repo_id)
}

/// Owned store of automation configs keyed by repository id.
///
/// Lookups fall back from memory to the cache to the configured defaults.
/// Concurrent `put`s for the same repository are last-writer-wins.
pub struct PrConfigStore {
    configs: RwLock<HashMap<String, PrAutomationConfig>>,
    cache: Arc<dyn Cache>,
    defaults: PrAutomationConfig,
}

impl PrConfigStore {
    pub fn new(cache: Arc<dyn Cache>, defaults: PrAutomationConfig) -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            cache,
            defaults,
        }
    }

    pub fn defaults(&self) -> &PrAutomationConfig {
        &self.defaults
    }

    pub async fn get(&self, repo_id: &str) -> PrAutomationConfig {
        if let Some(config) = self.configs.read().await.get(repo_id) {
            return config.clone();
        }

        match cache::get_json::<PrAutomationConfig>(self.cache.as_ref(), &config_key(repo_id)).await {
            Ok(Some(config)) => {
                debug!(repo_id = %repo_id, "pr_config_loaded_from_cache");
                self.configs
                    .write()
                    .await
                    .insert(repo_id.to_string(), config.clone());
                config
            }
            Ok(None) => self.defaults.clone(),
            Err(e) => {
                warn!(repo_id = %repo_id, error = %e, "pr_config_cache_read_failed");
                self.defaults.clone()
            }
        }
    }

    /// Store a config in memory and persist it with a 30-day TTL.
    pub async fn put(&self, repo_id: &str, config: PrAutomationConfig) -> crate::Result<()> {
        self.configs
            .write()
            .await
            .insert(repo_id.to_string(), config.clone());
        cache::put_json(self.cache.as_ref(), &config_key(repo_id), PR_CONFIG_TTL, &config).await
    }

    /// Snapshot of explicitly configured repositories, sorted by id.
    pub async fn all(&self) -> Vec<(String, PrAutomationConfig)> {
        let mut entries: Vec<_> = self
            .configs
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// Mapping from a Studio agent to its capabilities and GitHub identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAssignment {
    pub agent_id: String,
    pub agent_name: String,
    pub agent_type: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub github_username: Option<String>,
    #[serde(default)]
    pub github_label: Option<String>,
}

impl AgentAssignment {
    /// Build an assignment from a Studio agent record.
    pub fn from_studio(agent_id: &str, agent: &serde_json::Value) -> Self {
        let text = |key: &str| agent.get(key).and_then(|v| v.as_str()).map(str::to_string);

        Self {
            agent_id: agent_id.to_string(),
            agent_name: text("name").unwrap_or_else(|| agent_id.to_string()),
            agent_type: text("type").unwrap_or_else(|| "GENERAL".to_string()),
            capabilities: agent
                .get("capabilities")
                .and_then(|v| v.as_array())
                .map(|caps| {
                    caps.iter()
                        .filter_map(|c| c.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            github_username: text("github_username").or_else(|| text("githubUsername")),
            github_label: text("github_label").or_else(|| text("githubLabel")),
        }
    }

    /// Markdown comment announcing the assignment on an issue or PR.
    pub fn assignment_comment(&self) -> String {
        let mut comment = format!(
            "**Agent Assigned**: {}\n\nThis has been assigned to the Studio agent **{}** (ID: `{}`).\n",
            self.agent_name, self.agent_name, self.agent_id
        );
        if !self.capabilities.is_empty() {
            comment.push_str("\n**Agent Capabilities**:\n");
            for capability in &self.capabilities {
                comment.push_str(&format!("- {}\n", capability));
            }
        }
        comment.push_str("\nProgress can be tracked in the Studio dashboard.");
        comment
    }
}

/// Registry of known agent assignments.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentAssignment>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, assignment: AgentAssignment) {
        self.agents
            .write()
            .await
            .insert(assignment.agent_id.clone(), assignment);
    }

    /// Find by id, or by case-insensitive name.
    pub async fn find(&self, id_or_name: &str) -> Option<AgentAssignment> {
        let agents = self.agents.read().await;
        if let Some(agent) = agents.get(id_or_name) {
            return Some(agent.clone());
        }
        agents
            .values()
            .find(|a| a.agent_name.eq_ignore_ascii_case(id_or_name))
            .cloned()
    }

    /// Agents of a type, sorted by id.
    pub async fn by_type(&self, agent_type: &str) -> Vec<AgentAssignment> {
        let mut found: Vec<_> = self
            .agents
            .read()
            .await
            .values()
            .filter(|a| a.agent_type.eq_ignore_ascii_case(agent_type))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        found
    }

    /// GitHub usernames eligible to review a PR by `author`, sorted.
    pub async fn reviewer_candidates(&self, author: &str) -> Vec<String> {
        let mut usernames: Vec<String> = self
            .agents
            .read()
            .await
            .values()
            .filter_map(|a| a.github_username.clone())
            .filter(|u| !u.eq_ignore_ascii_case(author))
            .collect();
        usernames.sort();
        usernames.dedup();
        usernames
    }

    pub async fn all(&self) -> Vec<AgentAssignment> {
        let mut all: Vec<_> = self.agents.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }
}
