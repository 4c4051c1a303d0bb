//! Permission rule types.

use serde::{Deserialize, Serialize};

use crate::types::ToolCategory;

/// What to do with a matching tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Run the tool
    Allow,
    /// Refuse; the model receives a synthesized permission-error result
    Deny,
    /// Defer to a human confirmer
    Ask,
}

/// Errors from rule compilation
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        source: Box<regex::Error>,
    },
}

/// One ordered permission rule: (category, pattern, decision).
///
/// The pattern is a glob for file categories and a regex for Bash, per the
/// permission config contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    pub category: ToolCategory,
    pub pattern: String,
    pub decision: Decision,
}

impl PermissionRule {
    pub fn new(
        category: ToolCategory,
        pattern: impl Into<String>,
        decision: Decision,
    ) -> Self {
        Self {
            category,
            pattern: pattern.into(),
            decision,
        }
    }
}

/// A rule with its pattern compiled for matching
pub(super) struct CompiledRule {
    pub category: ToolCategory,
    pub decision: Decision,
    matcher: Matcher,
}

enum Matcher {
    Glob(glob::Pattern),
    Regex(regex::Regex),
}

impl CompiledRule {
    pub fn compile(rule: &PermissionRule) -> Result<Self, PermissionError> {
        let matcher = match rule.category {
            ToolCategory::Bash => Matcher::Regex(regex::Regex::new(&rule.pattern).map_err(
                |source| PermissionError::InvalidRegex {
                    pattern: rule.pattern.clone(),
                    source: Box::new(source),
                },
            )?),
            _ => Matcher::Glob(glob::Pattern::new(&rule.pattern).map_err(|source| {
                PermissionError::InvalidGlob {
                    pattern: rule.pattern.clone(),
                    source,
                }
            })?),
        };
        Ok(Self {
            category: rule.category,
            decision: rule.decision,
            matcher,
        })
    }

    pub fn matches(&self, category: ToolCategory, target: &str) -> bool {
        if self.category != category {
            return false;
        }
        match &self.matcher {
            Matcher::Glob(p) => p.matches(target),
            Matcher::Regex(r) => r.is_match(target),
        }
    }
}
