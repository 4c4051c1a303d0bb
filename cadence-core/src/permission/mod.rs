//! Permission gating for tool execution.
//!
//! Tool calls pass through an ordered rule list before they run. Each rule
//! names a tool category, a pattern, and a decision; the first rule whose
//! category and pattern both match the call's target wins. Unmatched calls
//! fall back to the category default (Read → Allow, Edit → Ask, Bash → Ask,
//! ExternalDirectory → Deny, McpTools → Allow).
//!
//! `Ask` decisions are resolved by an injected [`HumanConfirmer`]; when no
//! confirmer is attached, `Ask` collapses to `Deny`.
//!
//! # Example
//!
//! ```rust
//! use cadence_core::permission::{Decision, PermissionEvaluator, PermissionRule, Verdict};
//! use cadence_core::ToolCategory;
//!
//! let evaluator = PermissionEvaluator::new(vec![
//!     PermissionRule::new(ToolCategory::Edit, "src/**/*.rs", Decision::Allow),
//!     PermissionRule::new(ToolCategory::Bash, r"^git (status|diff)\b", Decision::Allow),
//! ])
//! .unwrap();
//!
//! assert!(matches!(
//!     evaluator.evaluate(ToolCategory::Edit, "src/main.rs"),
//!     Verdict::Allow
//! ));
//! assert!(matches!(
//!     evaluator.evaluate(ToolCategory::Bash, "rm -rf /"),
//!     Verdict::Ask { .. }
//! ));
//! ```

mod evaluator;
mod rule;

pub use evaluator::{
    permission_target, ConfirmationRequest, GateDecision, HumanConfirmer, PermissionEvaluator,
    PermissionGate, Verdict,
};
pub use rule::{Decision, PermissionError, PermissionRule};
