//! Run and step records.
//!
//! A [`Run`] is the append-only history of one agent invocation. Steps are
//! only ever pushed, `current_step_index` only moves forward, and a run that
//! reached `completed` is never touched again.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AgentsError;
use crate::ids::Id;

/// What a step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    ModelCall,
    ToolCall,
    Complete,
}

/// One unit of work within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,
    /// Model request or tool execution id; `None` until issued.
    pub correlation_id: Option<Id>,
    /// Registry id of the tool, for `ToolCall` steps.
    pub tool_ref: Option<Id>,
    pub completed: bool,
    pub output: String,
}

impl Step {
    pub(crate) fn model_call(request: Id) -> Self {
        Self {
            kind: StepKind::ModelCall,
            correlation_id: Some(request),
            tool_ref: None,
            completed: false,
            output: String::new(),
        }
    }

    pub(crate) fn tool_call(tool: Id) -> Self {
        Self {
            kind: StepKind::ToolCall,
            correlation_id: None,
            tool_ref: Some(tool),
            completed: false,
            output: String::new(),
        }
    }

    pub(crate) fn complete() -> Self {
        Self {
            kind: StepKind::Complete,
            correlation_id: None,
            tool_ref: None,
            completed: false,
            output: String::new(),
        }
    }
}

/// What happens after a tool call finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolUseBehavior {
    /// The tool result is the run's final output.
    StopOnFirstTool,
    /// Feed the tool result back to the model.
    #[default]
    RunLlmAgain,
}

impl FromStr for ToolUseBehavior {
    type Err = AgentsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop_on_first_tool" | "stop" => Ok(Self::StopOnFirstTool),
            "run_llm_again" | "loop" => Ok(Self::RunLlmAgain),
            other => Err(AgentsError::Config(format!(
                "unknown tool use behavior: {}",
                other
            ))),
        }
    }
}

/// Whether an agent has a run in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgentStatus {
    #[default]
    Idle,
    Processing,
}

/// One execution of an agent against one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Id,
    /// Name of the agent that owns the run.
    pub agent: String,
    pub input: String,
    pub steps: Vec<Step>,
    pub current_step_index: usize,
    pub final_output: String,
    pub completed: bool,
    pub max_steps: usize,
    /// Calls to `advance` made while the run was still open.
    pub advances: usize,
    /// Set when the step budget ended the run.
    pub forced: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub(crate) fn new(run_id: Id, agent: &str, input: &str, first: Step, max_steps: usize) -> Self {
        Self {
            run_id,
            agent: agent.to_string(),
            input: input.to_string(),
            steps: vec![first],
            current_step_index: 0,
            final_output: String::new(),
            completed: false,
            max_steps,
            advances: 0,
            forced: false,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current_step_index)
    }

    /// Output of the most recent completed step, if any.
    pub fn last_completed_output(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.completed)
            .map(|s| s.output.as_str())
    }

    /// Whether the step budget is spent.
    pub(crate) fn budget_exhausted(&self) -> bool {
        self.current_step_index >= self.max_steps || self.advances >= self.max_steps
    }

    pub(crate) fn finish(&mut self, forced: bool) {
        if forced && self.final_output.is_empty() {
            self.final_output = self
                .last_completed_output()
                .unwrap_or_default()
                .to_string();
        }
        self.forced = forced;
        self.completed = true;
        self.completed_at = Some(Utc::now());
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} ({}) step {}/{}",
            self.run_id.short(),
            self.agent,
            self.current_step_index,
            self.steps.len()
        )?;
        if self.completed {
            f.write_str(" completed")?;
        }
        Ok(())
    }
}
