//! Default prompt templates bundled at compile time.
//!
//! Each stage builds its system message fresh from one of these per call.

/// Decision making - route between a direct answer and a full research
pub const DECISION_MAKING: &str = include_str!("defaults/decision_making.md");

/// Planning - step by step plan; `{tools}` is replaced with the capability list
pub const PLANNING: &str = include_str!("defaults/planning.md");

/// Agent - executes the plan with the bound capabilities
pub const AGENT: &str = include_str!("defaults/agent.md");

/// Judge - self-assessment of the final answer
pub const JUDGE: &str = include_str!("defaults/judge.md");

/// Render the planning prompt for a capability description block
pub fn planning_prompt(tools_description: &str) -> String {
    PLANNING.replace("{tools}", tools_description)
}

/// All default prompts with their slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("decision_making", DECISION_MAKING),
        ("planning", PLANNING),
        ("agent", AGENT),
        ("judge", JUDGE),
    ]
}
