//! Agent operating modes
//!
//! Modes gate which tool categories the model may see. Transitions are
//! validated against a static table: the lifecycle is a DAG except for the
//! Working ⇄ HumanInTheLoop pair.

use crate::types::{ToolCategory, ToolDefinition};

/// Operating mode of an agent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Not running; no tools exposed
    Idle,
    /// Read-only investigation; mutating categories are hidden
    Planning,
    /// Full execution
    Working,
    /// Paused on a human; full catalog stays visible
    HumanInTheLoop,
    /// Terminal; no tools exposed
    Complete,
}

impl Mode {
    /// Modes reachable from this one
    fn successors(&self) -> &'static [Mode] {
        match self {
            Mode::Idle => &[Mode::Planning, Mode::Working],
            Mode::Planning => &[Mode::Working, Mode::Complete],
            Mode::Working => &[Mode::HumanInTheLoop, Mode::Complete],
            Mode::HumanInTheLoop => &[Mode::Working],
            Mode::Complete => &[],
        }
    }

    /// Whether a tool of the given category is visible in this mode
    pub fn allows(&self, category: ToolCategory) -> bool {
        match self {
            Mode::Idle | Mode::Complete => false,
            Mode::Planning => !matches!(
                category,
                ToolCategory::Edit | ToolCategory::Bash | ToolCategory::ExternalDirectory
            ),
            Mode::Working | Mode::HumanInTheLoop => true,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Idle => "idle",
            Mode::Planning => "planning",
            Mode::Working => "working",
            Mode::HumanInTheLoop => "human_in_the_loop",
            Mode::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// Error returned for transitions not in the table
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid mode transition: {from} -> {to}")]
pub struct InvalidModeTransition {
    pub from: Mode,
    pub to: Mode,
}

/// Holds the current mode and validates transitions
pub struct ModeManager {
    mode: parking_lot::RwLock<Mode>,
}

impl ModeManager {
    /// Create a manager starting in `Idle`
    pub fn new() -> Self {
        Self::starting_in(Mode::Idle)
    }

    /// Create a manager starting in the given mode
    pub fn starting_in(mode: Mode) -> Self {
        Self {
            mode: parking_lot::RwLock::new(mode),
        }
    }

    /// The current mode
    pub fn current(&self) -> Mode {
        *self.mode.read()
    }

    /// Transition to a new mode, validated against the transition table
    pub fn enter(&self, to: Mode) -> Result<(), InvalidModeTransition> {
        let mut mode = self.mode.write();
        let from = *mode;
        if from == to {
            return Ok(());
        }
        if !from.successors().contains(&to) {
            tracing::warn!(%from, %to, "rejected mode transition");
            return Err(InvalidModeTransition { from, to });
        }
        tracing::debug!(%from, %to, "mode transition");
        *mode = to;
        Ok(())
    }

    /// Filter a tool catalog to the subset visible in the current mode
    pub fn filter_tools(&self, catalog: &[ToolDefinition]) -> Vec<ToolDefinition> {
        let mode = self.current();
        catalog
            .iter()
            .filter(|t| mode.allows(t.category))
            .cloned()
            .collect()
    }
}

impl Default for ModeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, category: ToolCategory) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object"}),
            category,
            idempotent: false,
        }
    }

    #[test]
    fn test_valid_transitions() {
        let mgr = ModeManager::new();
        assert_eq!(mgr.current(), Mode::Idle);
        mgr.enter(Mode::Planning).unwrap();
        mgr.enter(Mode::Working).unwrap();
        mgr.enter(Mode::HumanInTheLoop).unwrap();
        mgr.enter(Mode::Working).unwrap();
        mgr.enter(Mode::Complete).unwrap();
        assert_eq!(mgr.current(), Mode::Complete);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mgr = ModeManager::new();
        let err = mgr.enter(Mode::HumanInTheLoop).unwrap_err();
        assert_eq!(
            err,
            InvalidModeTransition {
                from: Mode::Idle,
                to: Mode::HumanInTheLoop
            }
        );
        // State unchanged after a rejected transition
        assert_eq!(mgr.current(), Mode::Idle);
    }

    #[test]
    fn test_complete_is_terminal() {
        let mgr = ModeManager::starting_in(Mode::Complete);
        assert!(mgr.enter(Mode::Working).is_err());
        assert!(mgr.enter(Mode::Idle).is_err());
    }

    #[test]
    fn test_self_transition_is_noop() {
        let mgr = ModeManager::starting_in(Mode::Working);
        mgr.enter(Mode::Working).unwrap();
        assert_eq!(mgr.current(), Mode::Working);
    }

    #[test]
    fn test_planning_hides_mutating_categories() {
        let mgr = ModeManager::starting_in(Mode::Planning);
        let catalog = vec![
            def("read_file", ToolCategory::Read),
            def("edit_file", ToolCategory::Edit),
            def("run_command", ToolCategory::Bash),
            def("read_external", ToolCategory::ExternalDirectory),
            def("mcp/db/query", ToolCategory::McpTools),
        ];

        let visible = mgr.filter_tools(&catalog);
        let names: Vec<&str> = visible.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["read_file", "mcp/db/query"]);
    }

    #[test]
    fn test_idle_and_complete_hide_everything() {
        let catalog = vec![def("read_file", ToolCategory::Read)];
        assert!(ModeManager::starting_in(Mode::Idle)
            .filter_tools(&catalog)
            .is_empty());
        assert!(ModeManager::starting_in(Mode::Complete)
            .filter_tools(&catalog)
            .is_empty());
    }

    #[test]
    fn test_working_exposes_full_catalog() {
        let mgr = ModeManager::starting_in(Mode::Working);
        let catalog = vec![
            def("edit_file", ToolCategory::Edit),
            def("run_command", ToolCategory::Bash),
        ];
        assert_eq!(mgr.filter_tools(&catalog).len(), 2);
    }
}
