// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Access policy — prioritized rules the dispatcher consults before invoking
//! a tool.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    RequireApproval,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub workspace_id: String,
    pub actor_id: Option<String>,
    pub client_id: Option<String>,
    pub tool_path_pattern: String,
    pub decision: PolicyDecision,
    /// Higher priority wins among matching rules.
    pub priority: i32,
}

/// Tests whether `pattern` matches `tool_path`.
///
/// A trailing `.**` matches the named prefix and everything under it
/// (`stripe.**` matches `stripe.customers.create`). A trailing `.*` matches
/// exactly one further segment. Anything else requires an exact match.
pub fn matches_tool_path(pattern: &str, tool_path: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(".**") {
        return tool_path == prefix || tool_path.starts_with(&format!("{prefix}."));
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return tool_path
            .strip_prefix(&format!("{prefix}."))
            .map(|rest| !rest.contains('.'))
            .unwrap_or(false);
    }
    pattern == tool_path
}

impl AccessPolicy {
    pub fn matches(
        &self,
        workspace_id: &str,
        actor_id: Option<&str>,
        client_id: Option<&str>,
        tool_path: &str,
    ) -> bool {
        if self.workspace_id != workspace_id {
            return false;
        }
        if let Some(ref want) = self.actor_id {
            if Some(want.as_str()) != actor_id {
                return false;
            }
        }
        if let Some(ref want) = self.client_id {
            if Some(want.as_str()) != client_id {
                return false;
            }
        }
        matches_tool_path(&self.tool_path_pattern, tool_path)
    }
}

/// Finds the highest-`priority` policy matching the call context, if any.
pub fn resolve_policy<'a>(
    policies: impl IntoIterator<Item = &'a AccessPolicy>,
    workspace_id: &str,
    actor_id: Option<&str>,
    client_id: Option<&str>,
    tool_path: &str,
) -> Option<&'a AccessPolicy> {
    policies
        .into_iter()
        .filter(|p| p.matches(workspace_id, actor_id, client_id, tool_path))
        .max_by_key(|p| p.priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(pattern: &str, decision: PolicyDecision, priority: i32) -> AccessPolicy {
        AccessPolicy {
            workspace_id: "ws_1".into(),
            actor_id: None,
            client_id: None,
            tool_path_pattern: pattern.into(),
            decision,
            priority,
        }
    }

    #[test]
    fn double_star_matches_prefix_and_descendants() {
        assert!(matches_tool_path("stripe.**", "stripe.customers.create"));
        assert!(matches_tool_path("stripe.**", "stripe"));
        assert!(!matches_tool_path("stripe.**", "github.repos.list"));
    }

    #[test]
    fn single_star_matches_exactly_one_segment() {
        assert!(matches_tool_path("stripe.*", "stripe.customers"));
        assert!(!matches_tool_path("stripe.*", "stripe.customers.create"));
    }

    #[test]
    fn higher_priority_wins_among_matches() {
        let low = policy("stripe.**", PolicyDecision::Deny, 1);
        let high = policy("stripe.customers.create", PolicyDecision::Allow, 10);
        let policies = vec![low, high];
        let resolved = resolve_policy(&policies, "ws_1", None, None, "stripe.customers.create").unwrap();
        assert_eq!(resolved.decision, PolicyDecision::Allow);
    }

    #[test]
    fn no_match_returns_none() {
        let p = policy("github.**", PolicyDecision::Deny, 1);
        assert!(resolve_policy(&[p], "ws_1", None, None, "stripe.customers.create").is_none());
    }
}
