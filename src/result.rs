//! Result types for agent execution

use serde::{Deserialize, Serialize};

use crate::ids::Id;

/// The runner's view of one run.
///
/// Kept separately from the agent's own [`crate::run::Run`]: a run refused
/// by an input guardrail never reaches the agent, and output guardrails
/// decide whether the agent's output is exposed at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Runner-issued run id
    pub run_id: Id,
    /// Registry id of the agent
    pub agent: Id,
    pub input: String,
    /// The agent's own run, once it has been started
    pub agent_run_id: Option<Id>,
    /// The final output from the agent; empty until exposed
    pub final_output: String,
    pub completed: bool,
    /// Whether the run was successful
    pub success: bool,
    /// Error message if the run failed
    pub error: Option<String>,
    /// Validations issued for this run, in order
    pub validations: Vec<Id>,
}

impl RunResult {
    pub(crate) fn new(run_id: Id, agent: Id, input: &str) -> Self {
        Self {
            run_id,
            agent,
            input: input.to_string(),
            agent_run_id: None,
            final_output: String::new(),
            completed: false,
            success: false,
            error: None,
            validations: Vec::new(),
        }
    }

    /// Check if the run was successful
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Get the error if the run failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn succeed(&mut self, output: String) {
        self.final_output = output;
        self.success = true;
        self.completed = true;
    }

    /// Complete without success, keeping the output of a run cut short by
    /// its step budget.
    pub(crate) fn stop(&mut self, output: String, max_steps: usize) {
        self.final_output = output;
        self.success = false;
        self.error = Some(format!("run stopped after {} steps", max_steps));
        self.completed = true;
    }

    pub(crate) fn fail(&mut self, reason: String) {
        self.final_output.clear();
        self.success = false;
        self.error = Some(reason);
        self.completed = true;
    }
}
