// SPDX-License-Identifier: MIT OR Apache-2.0
//! Change-request policies scoped to (environment, secret-path pattern).

use secret_store::{new_id, EnforcementLevel, PolicyRow, SecretDb, Tables};

use crate::{RequestError, Result};

#[derive(Debug, Clone)]
pub struct PolicyDraft {
    pub secret_path: String,
    pub approvers: Vec<String>,
    pub approvals: usize,
    pub enforcement: EnforcementLevel,
    pub allow_self_review: bool,
}

impl PolicyDraft {
    pub fn new(secret_path: &str, approvers: Vec<String>, approvals: usize) -> Self {
        Self {
            secret_path: secret_path.to_string(),
            approvers,
            approvals,
            enforcement: EnforcementLevel::Hard,
            allow_self_review: false,
        }
    }

    pub fn with_enforcement(mut self, level: EnforcementLevel) -> Self {
        self.enforcement = level;
        self
    }

    pub fn with_self_review(mut self, allowed: bool) -> Self {
        self.allow_self_review = allowed;
        self
    }
}

/// Create a policy for an environment.
pub fn create_policy(db: &SecretDb, env_id: &str, draft: PolicyDraft) -> Result<PolicyRow> {
    if draft.secret_path.is_empty() {
        return Err(RequestError::Validation("policy path is empty".into()));
    }
    if draft.approvals > draft.approvers.len() {
        return Err(RequestError::Validation(format!(
            "policy requires {} approvals but lists {} approvers",
            draft.approvals,
            draft.approvers.len()
        )));
    }

    db.transaction(|t| {
        t.environment(env_id).map_err(RequestError::Store)?;
        let row = PolicyRow {
            id: new_id(),
            env_id: env_id.to_string(),
            secret_path: draft.secret_path.clone(),
            approvers: draft.approvers.clone(),
            approvals: draft.approvals,
            enforcement: draft.enforcement,
            allow_self_review: draft.allow_self_review,
        };
        t.policies.insert(row.id.clone(), row.clone());
        Ok(row)
    })
}

/// Find the policy governing a folder path, preferring the most specific
/// (longest) matching pattern.
pub fn resolve_policy(tables: &Tables, env_id: &str, folder_path: &str) -> Option<PolicyRow> {
    tables
        .policies
        .values()
        .filter(|p| p.env_id == env_id && glob_match(&p.secret_path, folder_path))
        .max_by_key(|p| p.secret_path.len())
        .cloned()
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();
    glob_match_inner(&pattern_chars, &text_chars)
}

fn glob_match_inner(pattern: &[char], text: &[char]) -> bool {
    let mut pi = 0;
    let mut ti = 0;
    let mut saved_pattern_idx = usize::MAX;
    let mut saved_text_idx = 0;

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < pattern.len() && pattern[pi] == '*' {
            saved_pattern_idx = pi;
            saved_text_idx = ti;
            pi += 1;
        } else if saved_pattern_idx != usize::MAX {
            pi = saved_pattern_idx + 1;
            saved_text_idx += 1;
            ti = saved_text_idx;
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }

    pi == pattern.len()
}
