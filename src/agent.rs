//! # Agent (orientation)
//!
//! An `Agent` is a configured participant: a name, instructions, a
//! tool-use policy and a step budget, wired to a [`ModelBackend`] and the
//! shared tool [`Registry`]. It owns its [`Run`]s and drives them one step
//! per [`Agent::advance`] call.
//!
//! Nothing here waits. A step whose backend has not answered leaves the run
//! untouched (apart from spending budget) and `advance` returns `false`; the
//! driver calls again later. The step sequence is:
//!
//! 1. `ModelCall`: poll the model. When text arrives, look for the first
//!    registered tool (registration order) the response asks for. A match
//!    appends a `ToolCall` step, otherwise the text becomes the final
//!    output and a `Complete` step is appended.
//! 2. `ToolCall`: on first entry issue the execution with the arguments the
//!    preceding model step carried; afterwards poll it. When it finishes,
//!    either stop with the tool result (`StopOnFirstTool`) or ask the model
//!    again with the result embedded (`RunLlmAgain`).
//! 3. `Complete`: close the run and release the agent.
//!
//! An agent holds at most one open run. `start` on a busy agent fails with
//! `Busy`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::Principal;
use crate::backend::ModelBackend;
use crate::error::{AgentsError, Result};
use crate::events::{Event, SharedSink};
use crate::ids::{Id, IdAllocator};
use crate::registry::{Registrable, Registry};
use crate::run::{AgentStatus, Run, Step, StepKind, ToolUseBehavior};
use crate::tool::Tool;

/// Default step budget for a run.
pub const DEFAULT_MAX_STEPS: usize = 10;

/// Defines the configuration for an [`Agent`].
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// The name of the agent, used for identification, registry lookup and logs.
    pub name: String,

    /// The system instructions sent with every model request.
    pub instructions: String,

    /// What to do once a tool call finishes.
    pub tool_use_behavior: ToolUseBehavior,

    /// Budget of `advance` calls before a run is force-terminated.
    pub max_steps: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Assistant".to_string(),
            instructions: "You are a helpful assistant.".to_string(),
            tool_use_behavior: ToolUseBehavior::default(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl AgentConfig {
    /// Creates a configuration with just a name and instructions.
    pub fn simple(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_use_behavior(mut self, behavior: ToolUseBehavior) -> Self {
        self.tool_use_behavior = behavior;
        self
    }

    /// Sets the step budget. Zero is bumped to one.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }
}

#[derive(Default)]
struct AgentState {
    status: AgentStatus,
    active: Option<Id>,
    runs: HashMap<Id, Run>,
    order: Vec<Id>,
}

/// An agent and the runs it owns.
pub struct Agent {
    config: AgentConfig,
    principal: Principal,
    model: Arc<dyn ModelBackend>,
    tools: Arc<Registry<dyn Tool>>,
    ids: Arc<IdAllocator>,
    events: SharedSink,
    state: Mutex<AgentState>,
}

impl Agent {
    /// Creates a new agent with the given configuration and collaborators.
    pub fn new(
        config: AgentConfig,
        model: Arc<dyn ModelBackend>,
        tools: Arc<Registry<dyn Tool>>,
        ids: Arc<IdAllocator>,
        events: SharedSink,
    ) -> Self {
        let principal = Principal::agent(&config.name);
        Self {
            config,
            principal,
            model,
            tools,
            ids,
            events,
            state: Mutex::new(AgentState::default()),
        }
    }

    /// Returns the agent's name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the agent's instructions.
    pub fn instructions(&self) -> &str {
        &self.config.instructions
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The principal this agent acts as.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn status(&self) -> AgentStatus {
        self.state.lock().status
    }

    /// The run currently in flight, if any.
    pub fn active_run(&self) -> Option<Id> {
        self.state.lock().active
    }

    /// Ids of every run this agent started, oldest first.
    pub fn runs(&self) -> Vec<Id> {
        self.state.lock().order.clone()
    }

    /// Instructions plus the list of currently registered tools.
    pub fn system_prompt(&self) -> String {
        let mut content = self.config.instructions.clone();
        let tools = self.tools.live();
        if !tools.is_empty() {
            content.push_str("\n\nYou have access to the following tools:\n");
            for (_, tool) in tools {
                content.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
            }
        }
        content
    }

    /// Start a run with the configured step budget.
    pub fn start(&self, input: &str) -> Result<Id> {
        self.start_with(input, None)
    }

    /// Start a run, optionally overriding the step budget.
    pub fn start_with(&self, input: &str, max_steps: Option<usize>) -> Result<Id> {
        // A held lock means this agent is inside `advance`, e.g. a handoff
        // tool pointing back at it.
        let Some(mut state) = self.state.try_lock() else {
            warn!(agent = %self.name(), "Start rejected, agent mid-step");
            return Err(AgentsError::Busy {
                agent: self.name().to_string(),
            });
        };
        if state.status != AgentStatus::Idle {
            warn!(agent = %self.name(), "Start rejected, agent busy");
            return Err(AgentsError::Busy {
                agent: self.name().to_string(),
            });
        }

        let max_steps = max_steps.unwrap_or(self.config.max_steps).max(1);
        let run_id = self.ids.next(&self.principal, input.as_bytes());
        let request = self.model.request(&self.system_prompt(), input)?;
        let run = Run::new(run_id, self.name(), input, Step::model_call(request), max_steps);

        state.runs.insert(run_id, run);
        state.order.push(run_id);
        state.active = Some(run_id);
        state.status = AgentStatus::Processing;
        drop(state);

        info!(agent = %self.name(), run_id = %run_id.short(), "Starting agent run");
        self.events.emit(Event::RunStarted {
            agent: self.name().to_string(),
            run_id,
            max_steps,
        });
        Ok(run_id)
    }

    /// Move `run_id` forward by at most one step.
    ///
    /// Returns `true` once the run is complete and on every call after that.
    pub fn advance(&self, run_id: &Id) -> Result<bool> {
        let mut guard = self.state.lock();
        let AgentState {
            status,
            active,
            runs,
            ..
        } = &mut *guard;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| AgentsError::not_found("run", run_id))?;

        if run.completed {
            return Ok(true);
        }

        run.advances += 1;
        let outcome = if run.current_step_index >= run.max_steps {
            self.force_finish(run);
            Ok(true)
        } else {
            match self.step(run) {
                Ok(true) => Ok(true),
                // A failing step still spends budget.
                outcome if run.budget_exhausted() => {
                    if let Err(e) = &outcome {
                        warn!(agent = %self.name(), run_id = %run_id.short(), error = %e, "Step failed");
                    }
                    self.force_finish(run);
                    Ok(true)
                }
                outcome => outcome,
            }
        };
        let finished = outcome?;

        if finished {
            if *active == Some(*run_id) {
                *active = None;
                *status = AgentStatus::Idle;
            }
            self.events.emit(Event::RunCompleted {
                agent: self.name().to_string(),
                run_id: *run_id,
                final_output: run.final_output.clone(),
                forced: run.forced,
            });
        }
        Ok(finished)
    }

    fn force_finish(&self, run: &mut Run) {
        warn!(
            agent = %self.name(),
            run_id = %run.run_id.short(),
            max_steps = run.max_steps,
            "Step budget exhausted, terminating run"
        );
        run.finish(true);
    }

    /// One step of the machine. Returns whether the run is now complete.
    fn step(&self, run: &mut Run) -> Result<bool> {
        let index = run.current_step_index;
        let Some(step) = run.steps.get(index) else {
            run.finish(false);
            return Ok(true);
        };

        if step.completed {
            if index + 1 < run.steps.len() {
                run.current_step_index += 1;
            }
            return Ok(false);
        }

        let kind = step.kind;
        match kind {
            StepKind::ModelCall => self.model_step(run, index),
            StepKind::ToolCall => self.tool_step(run, index),
            StepKind::Complete => {
                let output = run.final_output.clone();
                self.complete_step(run, index, output);
                run.finish(false);
                Ok(true)
            }
        }
    }

    fn model_step(&self, run: &mut Run, index: usize) -> Result<bool> {
        let request = run.steps[index]
            .correlation_id
            .ok_or_else(|| AgentsError::backend("model step has no request id"))?;
        let Some(text) = self.model.poll(&request)? else {
            debug!(agent = %self.name(), run_id = %run.run_id.short(), "Model response pending");
            return Ok(false);
        };
        self.complete_step(run, index, text.clone());

        let mut chosen = None;
        for (tool_id, tool) in self.tools.live() {
            if self.model.detects_tool_call(&request, tool.name())? {
                chosen = Some((tool_id, tool));
                break;
            }
        }

        match chosen {
            Some((tool_id, tool)) => {
                debug!(agent = %self.name(), tool = %tool.name(), "Tool call detected");
                run.steps.push(Step::tool_call(tool_id));
            }
            None => {
                run.final_output = text;
                run.steps.push(Step::complete());
            }
        }
        run.current_step_index += 1;
        Ok(false)
    }

    fn tool_step(&self, run: &mut Run, index: usize) -> Result<bool> {
        let tool_id = run.steps[index]
            .tool_ref
            .ok_or_else(|| AgentsError::backend("tool step has no tool"))?;
        let tool = self.tools.resolve(&tool_id)?;
        let previous = index
            .checked_sub(1)
            .map(|i| &run.steps[i])
            .ok_or_else(|| AgentsError::backend("tool step without a preceding model step"))?;

        let Some(execution) = run.steps[index].correlation_id else {
            let request = previous
                .correlation_id
                .ok_or_else(|| AgentsError::backend("model step has no request id"))?;
            let arguments = self.model.tool_arguments(&request, tool.name())?;
            let execution = tool.execute(&arguments)?;
            debug!(
                agent = %self.name(),
                tool = %tool.name(),
                execution = %execution.short(),
                "Tool execution issued"
            );
            run.steps[index].correlation_id = Some(execution);
            return Ok(false);
        };

        if !tool.poll(&execution)? {
            debug!(agent = %self.name(), tool = %tool.name(), "Tool execution pending");
            return Ok(false);
        }
        let prior = previous.output.clone();
        let result = tool.result(&execution)?;
        self.complete_step(run, index, result.clone());

        match self.config.tool_use_behavior {
            ToolUseBehavior::StopOnFirstTool => {
                run.final_output = result;
                run.steps.push(Step::complete());
            }
            ToolUseBehavior::RunLlmAgain => {
                let prompt = follow_up_prompt(&prior, tool.name(), &result);
                let request = self.model.request(&self.system_prompt(), &prompt)?;
                run.steps.push(Step::model_call(request));
            }
        }
        run.current_step_index += 1;
        Ok(false)
    }

    fn complete_step(&self, run: &mut Run, index: usize, output: String) {
        let step = &mut run.steps[index];
        step.completed = true;
        step.output = output.clone();
        self.events.emit(Event::StepCompleted {
            agent: self.name().to_string(),
            run_id: run.run_id,
            index,
            kind: step.kind,
            output,
        });
    }

    /// Final output of `run_id` (empty until one exists).
    pub fn get_result(&self, run_id: &Id) -> Result<String> {
        self.with_run(run_id, |run| run.final_output.clone())
    }

    pub fn is_complete(&self, run_id: &Id) -> Result<bool> {
        self.with_run(run_id, |run| run.completed)
    }

    /// A copy of the run record.
    pub fn run_snapshot(&self, run_id: &Id) -> Result<Run> {
        self.with_run(run_id, Run::clone)
    }

    fn with_run<R>(&self, run_id: &Id, f: impl FnOnce(&Run) -> R) -> Result<R> {
        self.state
            .lock()
            .runs
            .get(run_id)
            .map(f)
            .ok_or_else(|| AgentsError::not_found("run", run_id))
    }
}

/// Prompt for the model turn that follows a tool call.
pub(crate) fn follow_up_prompt(prior: &str, tool: &str, result: &str) -> String {
    format!("{}\n\nTool `{}` returned:\n{}", prior, tool, result)
}

impl Registrable for Agent {
    fn display_name(&self) -> String {
        self.config.name.clone()
    }

    fn metadata(&self) -> Value {
        serde_json::json!({
            "tool_use_behavior": self.config.tool_use_behavior,
            "max_steps": self.config.max_steps,
        })
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Agent")
            .field("name", &self.config.name)
            .field("status", &state.status)
            .field("runs", &state.order.len())
            .finish()
    }
}
