//! Rule evaluation and the Ask-resolution gate.

use std::sync::Arc;

use serde_json::Value;

use super::rule::{CompiledRule, Decision, PermissionError, PermissionRule};
use crate::types::ToolCategory;

/// Result of evaluating a (category, target) pair against the rule list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny { reason: String },
    Ask { reason: String },
}

/// Matches tool calls against an ordered rule list; first match wins
pub struct PermissionEvaluator {
    rules: Vec<CompiledRule>,
}

impl PermissionEvaluator {
    /// Compile a rule list. Fails on an invalid glob or regex pattern.
    pub fn new(rules: Vec<PermissionRule>) -> Result<Self, PermissionError> {
        let rules = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// An evaluator with no rules; every call gets its category default
    pub fn defaults_only() -> Self {
        Self { rules: Vec::new() }
    }

    /// Evaluate a call. Rules are consulted in order; the first whose
    /// category and pattern match wins. Unmatched calls get the category
    /// default.
    pub fn evaluate(&self, category: ToolCategory, target: &str) -> Verdict {
        for rule in &self.rules {
            if rule.matches(category, target) {
                return match rule.decision {
                    Decision::Allow => Verdict::Allow,
                    Decision::Deny => Verdict::Deny {
                        reason: format!("'{target}' denied by a {category} permission rule"),
                    },
                    Decision::Ask => Verdict::Ask {
                        reason: format!("rule requires confirmation for '{target}'"),
                    },
                };
            }
        }
        match default_decision(category) {
            Decision::Allow => Verdict::Allow,
            Decision::Deny => Verdict::Deny {
                reason: format!("category {category} is denied by default"),
            },
            Decision::Ask => Verdict::Ask {
                reason: format!("category {category} requires confirmation by default"),
            },
        }
    }
}

/// Default decision applied when no rule matches
fn default_decision(category: ToolCategory) -> Decision {
    match category {
        ToolCategory::Read => Decision::Allow,
        ToolCategory::Edit => Decision::Ask,
        ToolCategory::Bash => Decision::Ask,
        ToolCategory::ExternalDirectory => Decision::Deny,
        ToolCategory::McpTools => Decision::Allow,
    }
}

/// A pending confirmation handed to a [`HumanConfirmer`]
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub tool_name: String,
    pub category: ToolCategory,
    pub target: String,
    pub input: Value,
    pub reason: String,
}

/// Resolves `Ask` verdicts. Implementations typically prompt a human.
#[async_trait::async_trait]
pub trait HumanConfirmer: Send + Sync {
    /// Return true to allow the call, false to deny it
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// Final decision after Ask resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied { reason: String },
}

/// Evaluator plus optional confirmer: the complete permission gate the
/// agent loop consults before each tool call.
pub struct PermissionGate {
    evaluator: PermissionEvaluator,
    confirmer: Option<Arc<dyn HumanConfirmer>>,
}

impl PermissionGate {
    pub fn new(evaluator: PermissionEvaluator) -> Self {
        Self {
            evaluator,
            confirmer: None,
        }
    }

    /// A gate with no rules and no confirmer: category defaults apply and
    /// every `Ask` collapses to `Deny`.
    pub fn defaults_only() -> Self {
        Self::new(PermissionEvaluator::defaults_only())
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn HumanConfirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    /// Evaluate and, for `Ask`, consult the confirmer. Without a confirmer
    /// attached, `Ask` collapses to `Deny`.
    pub async fn check(
        &self,
        tool_name: &str,
        category: ToolCategory,
        input: &Value,
    ) -> GateDecision {
        let target = permission_target(tool_name, input);
        match self.evaluator.evaluate(category, &target) {
            Verdict::Allow => GateDecision::Allowed,
            Verdict::Deny { reason } => {
                tracing::debug!(tool = tool_name, %target, %reason, "tool call denied");
                GateDecision::Denied { reason }
            }
            Verdict::Ask { reason } => match &self.confirmer {
                Some(confirmer) => {
                    let request = ConfirmationRequest {
                        tool_name: tool_name.to_string(),
                        category,
                        target: target.clone(),
                        input: input.clone(),
                        reason: reason.clone(),
                    };
                    if confirmer.confirm(&request).await {
                        GateDecision::Allowed
                    } else {
                        GateDecision::Denied {
                            reason: format!("confirmation refused: {reason}"),
                        }
                    }
                }
                None => GateDecision::Denied {
                    reason: format!("no confirmer attached: {reason}"),
                },
            },
        }
    }
}

/// Extract the permission target from a tool call's input.
///
/// File-category patterns match against a path argument, Bash patterns
/// against the command line. Tools without a recognized argument are
/// matched by name.
pub fn permission_target(tool_name: &str, input: &Value) -> String {
    const TARGET_KEYS: &[&str] = &["path", "file_path", "command", "cmd", "url", "target"];
    for key in TARGET_KEYS {
        if let Some(v) = input.get(key).and_then(|v| v.as_str()) {
            return v.to_string();
        }
    }
    tool_name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator(rules: Vec<PermissionRule>) -> PermissionEvaluator {
        PermissionEvaluator::new(rules).unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let eval = evaluator(vec![
            PermissionRule::new(ToolCategory::Edit, "src/secret.rs", Decision::Deny),
            PermissionRule::new(ToolCategory::Edit, "src/**", Decision::Allow),
        ]);

        assert!(matches!(
            eval.evaluate(ToolCategory::Edit, "src/secret.rs"),
            Verdict::Deny { .. }
        ));
        assert!(matches!(
            eval.evaluate(ToolCategory::Edit, "src/main.rs"),
            Verdict::Allow
        ));
    }

    #[test]
    fn test_category_defaults() {
        let eval = PermissionEvaluator::defaults_only();
        assert!(matches!(eval.evaluate(ToolCategory::Read, "x"), Verdict::Allow));
        assert!(matches!(
            eval.evaluate(ToolCategory::Edit, "x"),
            Verdict::Ask { .. }
        ));
        assert!(matches!(
            eval.evaluate(ToolCategory::Bash, "x"),
            Verdict::Ask { .. }
        ));
        assert!(matches!(
            eval.evaluate(ToolCategory::ExternalDirectory, "x"),
            Verdict::Deny { .. }
        ));
        assert!(matches!(
            eval.evaluate(ToolCategory::McpTools, "x"),
            Verdict::Allow
        ));
    }

    #[test]
    fn test_appending_deny_rules_only_narrows() {
        // A rule set extended with Deny rules never allows a target the
        // shorter set denied.
        let base = vec![PermissionRule::new(
            ToolCategory::Edit,
            "src/**",
            Decision::Allow,
        )];
        let mut extended = base.clone();
        extended.push(PermissionRule::new(
            ToolCategory::Edit,
            "docs/**",
            Decision::Deny,
        ));

        let base_eval = evaluator(base);
        let ext_eval = evaluator(extended);

        for target in ["src/a.rs", "docs/readme.md", "other/file"] {
            if matches!(ext_eval.evaluate(ToolCategory::Edit, target), Verdict::Allow) {
                assert!(
                    matches!(base_eval.evaluate(ToolCategory::Edit, target), Verdict::Allow),
                    "{target} allowed by extended set but not by base"
                );
            }
        }
    }

    struct AlwaysYes;

    #[async_trait::async_trait]
    impl HumanConfirmer for AlwaysYes {
        async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
            true
        }
    }

    struct AlwaysNo;

    #[async_trait::async_trait]
    impl HumanConfirmer for AlwaysNo {
        async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_ask_collapses_to_deny_without_confirmer() {
        let gate = PermissionGate::defaults_only();
        let decision = gate
            .check("edit_file", ToolCategory::Edit, &serde_json::json!({"path": "a.rs"}))
            .await;
        assert!(matches!(
            decision,
            GateDecision::Denied { reason } if reason.contains("no confirmer")
        ));
    }

    #[tokio::test]
    async fn test_confirmer_resolves_ask() {
        let input = serde_json::json!({"command": "make test"});

        let yes_gate = PermissionGate::defaults_only().with_confirmer(Arc::new(AlwaysYes));
        assert_eq!(
            yes_gate.check("shell", ToolCategory::Bash, &input).await,
            GateDecision::Allowed
        );

        let no_gate = PermissionGate::defaults_only().with_confirmer(Arc::new(AlwaysNo));
        assert!(matches!(
            no_gate.check("shell", ToolCategory::Bash, &input).await,
            GateDecision::Denied { .. }
        ));
    }

    #[test]
    fn test_permission_target_extraction() {
        assert_eq!(
            permission_target("read_file", &serde_json::json!({"path": "/tmp/x"})),
            "/tmp/x"
        );
        assert_eq!(
            permission_target("shell", &serde_json::json!({"command": "ls -la"})),
            "ls -la"
        );
        assert_eq!(
            permission_target("fetch", &serde_json::json!({"url": "https://e.com"})),
            "https://e.com"
        );
        // No recognized key: fall back to the tool name
        assert_eq!(
            permission_target("summarize", &serde_json::json!({"text": "..."})),
            "summarize"
        );
    }
}
