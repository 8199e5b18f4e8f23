//! # Runner (orientation)
//!
//! The `Runner` owns the shared pieces (id allocator, tool/agent/guardrail
//! registries, handoff manager, pending table and outbox) and wires
//! guardrails around agent runs. External drivers talk to it through two
//! calls: [`Runner::run`] to begin and [`Runner::process_run`] to push a run
//! forward. Neither ever waits.
//!
//! A run moves through phases:
//!
//! 1. Input gate: every input guardrail registered when the run began is
//!    evaluated one at a time, in registration order. The next guardrail's
//!    classifier is only asked once the previous one passed. The first
//!    `Fail` (or unreadable `Error`) ends the run with its reason and the
//!    agent is never started.
//! 2. Agent: the agent's own run is started and advanced one step per call.
//! 3. Output gate: output guardrails vet the agent's final output, with the
//!    original input as context, before the runner exposes it. Skipped when
//!    [`RunConfig::output_guardrails`] is off.
//!
//! The runner keeps its own [`RunResult`] per run; `get_result` and
//! `is_complete` read that record, not the agent's internal run.
//!
//! Classifiers that answer synchronously let `run` finish the input gate
//! before returning. Otherwise `process_run` keeps polling it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentConfig};
use crate::auth::{Authority, Principal};
use crate::backend::{
    Classifier, ModelBackend, Outbound, Outbox, PendingClassifier, PendingModelBackend,
};
use crate::config::SdkConfig;
use crate::error::{AgentsError, Result};
use crate::events::{default_sink, SharedSink};
use crate::guardrail::{
    CategoryThreshold, Guardrail, GuardrailDirection, GuardrailKind, ValidationResult,
};
use crate::handoff::{HandoffManager, HandoffStatus};
use crate::ids::{Id, IdAllocator};
use crate::pending::PendingRequestTable;
use crate::registry::Registry;
use crate::result::RunResult;
use crate::run::AgentStatus;
use crate::tool::{RemoteTool, Tool};

/// Name of the principal allowed to fulfill pending requests.
pub const RESPONDER: &str = "bridge";

/// Configuration for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Overrides the agent's step budget.
    pub max_steps: Option<usize>,

    /// Whether output guardrails vet the final output.
    pub output_guardrails: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            output_guardrails: true,
        }
    }
}

impl RunConfig {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_output_guardrails(mut self, enabled: bool) -> Self {
        self.output_guardrails = enabled;
        self
    }
}

enum GateOutcome {
    Pending,
    Passed,
    Failed(String),
}

/// Sequential evaluation of a fixed list of guardrails.
struct Gate {
    guardrails: Vec<Arc<Guardrail>>,
    next: usize,
    current: Option<Id>,
}

impl Gate {
    fn new(guardrails: Vec<Arc<Guardrail>>) -> Self {
        Self {
            guardrails,
            next: 0,
            current: None,
        }
    }

    /// `context` is `None` for input validation.
    fn advance(
        &mut self,
        subject: &str,
        context: Option<&str>,
        issued: &mut Vec<Id>,
    ) -> Result<GateOutcome> {
        while let Some(guardrail) = self.guardrails.get(self.next) {
            let validation = match self.current {
                Some(validation) => validation,
                None => {
                    let validation = match context {
                        None => guardrail.validate_input(subject)?,
                        Some(context) => guardrail.validate_output(subject, context)?,
                    };
                    issued.push(validation);
                    self.current = Some(validation);
                    validation
                }
            };

            match guardrail.advance(&validation)? {
                ValidationResult::Pending => return Ok(GateOutcome::Pending),
                ValidationResult::Pass => {
                    debug!(guardrail = %guardrail.name(), "Guardrail passed");
                    self.next += 1;
                    self.current = None;
                }
                ValidationResult::Fail | ValidationResult::Error => {
                    let reason = guardrail
                        .validation(&validation)?
                        .verdict()
                        .and_then(|v| v.reason)
                        .unwrap_or_else(|| guardrail.name().to_string());
                    return Ok(GateOutcome::Failed(reason));
                }
            }
        }
        Ok(GateOutcome::Passed)
    }
}

enum Phase {
    Input(Gate),
    Running { agent_run: Id },
    Output {
        output: String,
        gate: Gate,
        /// Step budget of a force-terminated agent run.
        stopped_after: Option<usize>,
    },
    Finished,
}

struct Tracked {
    agent: Arc<Agent>,
    config: RunConfig,
    phase: Phase,
    result: RunResult,
}

#[derive(Default)]
struct RunTable {
    order: Vec<Id>,
    entries: HashMap<Id, Arc<Mutex<Tracked>>>,
}

/// The top-level coordinator for agent runs.
pub struct Runner {
    config: SdkConfig,
    authority: Authority,
    ids: Arc<IdAllocator>,
    events: SharedSink,
    tools: Arc<Registry<dyn Tool>>,
    agents: Arc<Registry<Agent>>,
    guardrails: Arc<Registry<Guardrail>>,
    handoffs: Arc<HandoffManager>,
    pending: Arc<PendingRequestTable>,
    outbox: Arc<Outbox>,
    runs: RwLock<RunTable>,
}

impl Runner {
    /// A runner that reports events through `tracing`.
    pub fn new(config: SdkConfig) -> Self {
        Self::with_events(config, default_sink())
    }

    pub fn with_events(config: SdkConfig, events: SharedSink) -> Self {
        let authority = Authority::new(Principal::new(config.owner.as_str()));
        let ids = Arc::new(IdAllocator::new());
        let tools: Arc<Registry<dyn Tool>> = Arc::new(Registry::new(
            "tool",
            authority.clone(),
            ids.clone(),
            events.clone(),
        ));
        let agents = Arc::new(Registry::new(
            "agent",
            authority.clone(),
            ids.clone(),
            events.clone(),
        ));
        let guardrails = Arc::new(Registry::new(
            "guardrail",
            authority.clone(),
            ids.clone(),
            events.clone(),
        ));
        let handoffs = Arc::new(HandoffManager::new(
            agents.clone(),
            authority.clone(),
            ids.clone(),
            events.clone(),
        ));
        let pending = Arc::new(PendingRequestTable::new(
            Principal::new(RESPONDER),
            ids.clone(),
            events.clone(),
        ));
        if config.debug_mode {
            debug!(owner = %authority.owner(), "Runner created");
        }
        Self {
            config,
            authority,
            ids,
            events,
            tools,
            agents,
            guardrails,
            handoffs,
            pending,
            outbox: Arc::new(Outbox::new()),
            runs: RwLock::new(RunTable::default()),
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// The principal allowed to register and tear down.
    pub fn owner(&self) -> &Principal {
        self.authority.owner()
    }

    pub fn tools(&self) -> &Arc<Registry<dyn Tool>> {
        &self.tools
    }

    pub fn agents(&self) -> &Arc<Registry<Agent>> {
        &self.agents
    }

    pub fn guardrails(&self) -> &Arc<Registry<Guardrail>> {
        &self.guardrails
    }

    pub fn handoffs(&self) -> &Arc<HandoffManager> {
        &self.handoffs
    }

    pub fn pending(&self) -> &Arc<PendingRequestTable> {
        &self.pending
    }

    // Construction helpers

    /// Agent configuration carrying this runner's defaults.
    pub fn agent_config(&self, name: impl Into<String>, instructions: impl Into<String>) -> AgentConfig {
        AgentConfig::simple(name, instructions)
            .with_max_steps(self.config.default_max_steps)
            .with_tool_use_behavior(self.config.default_tool_use_behavior)
    }

    /// An agent sharing this runner's tools, ids and event sink.
    pub fn build_agent(&self, config: AgentConfig, model: Arc<dyn ModelBackend>) -> Agent {
        Agent::new(
            config,
            model,
            self.tools.clone(),
            self.ids.clone(),
            self.events.clone(),
        )
    }

    /// A content filter over the configured categories and threshold.
    pub fn content_filter(
        &self,
        name: impl Into<String>,
        direction: GuardrailDirection,
        classifier: Arc<dyn Classifier>,
    ) -> Guardrail {
        let categories = self
            .config
            .content_filter_categories
            .iter()
            .map(|c| CategoryThreshold::new(c.as_str(), self.config.guardrail_threshold))
            .collect();
        Guardrail::new(name, direction, GuardrailKind::ContentFilter { categories }, classifier)
            .with_events(self.events.clone())
    }

    /// A simple guardrail at the configured threshold.
    pub fn simple_guardrail(
        &self,
        name: impl Into<String>,
        direction: GuardrailDirection,
        classifier: Arc<dyn Classifier>,
    ) -> Guardrail {
        Guardrail::simple(name, direction, self.config.guardrail_threshold, classifier)
            .with_events(self.events.clone())
    }

    /// Model backend answered through the pending table.
    pub fn pending_model(&self, requester: &str) -> Arc<PendingModelBackend> {
        Arc::new(PendingModelBackend::new(
            self.pending.clone(),
            self.outbox.clone(),
            Principal::new(requester),
        ))
    }

    /// Classifier answered through the pending table.
    pub fn pending_classifier(&self, requester: &str) -> Arc<PendingClassifier> {
        Arc::new(PendingClassifier::new(
            self.pending.clone(),
            self.outbox.clone(),
            Principal::new(requester),
        ))
    }

    /// Tool executed by the off-system responder.
    pub fn remote_tool(&self, name: impl Into<String>, description: impl Into<String>) -> RemoteTool {
        RemoteTool::new(name, description, self.pending.clone(), self.outbox.clone())
    }

    // Registration

    pub fn register_tool(&self, caller: &Principal, tool: Arc<dyn Tool>) -> Result<Id> {
        self.tools.register(caller, tool)
    }

    pub fn unregister_tool(&self, caller: &Principal, id: &Id) -> Result<()> {
        self.tools.unregister(caller, id)
    }

    pub fn register_agent(&self, caller: &Principal, agent: Agent) -> Result<Id> {
        self.agents.register(caller, Arc::new(agent))
    }

    pub fn unregister_agent(&self, caller: &Principal, id: &Id) -> Result<()> {
        self.agents.unregister(caller, id)
    }

    pub fn register_guardrail(&self, caller: &Principal, guardrail: Guardrail) -> Result<Id> {
        self.guardrails.register(caller, Arc::new(guardrail))
    }

    pub fn unregister_guardrail(&self, caller: &Principal, id: &Id) -> Result<()> {
        self.guardrails.unregister(caller, id)
    }

    /// Resolve a registered agent.
    pub fn agent(&self, id: &Id) -> Result<Arc<Agent>> {
        self.agents.resolve(id)
    }

    fn guardrails_for(&self, direction: GuardrailDirection) -> Vec<Arc<Guardrail>> {
        self.guardrails
            .live()
            .into_iter()
            .map(|(_, g)| g)
            .filter(|g| g.direction() == direction)
            .collect()
    }

    // Runs

    /// Begin a run of `agent_id` on `input`.
    ///
    /// Input guardrails are evaluated as far as their classifiers allow; the
    /// agent is started once all of them passed.
    pub fn run(&self, agent_id: &Id, input: &str, config: RunConfig) -> Result<Id> {
        let agent = self.agents.resolve(agent_id)?;
        if agent.status() != AgentStatus::Idle {
            return Err(AgentsError::Busy {
                agent: agent.name().to_string(),
            });
        }
        let run_id = self.ids.next(agent.principal(), input.as_bytes());
        info!(agent = %agent.name(), run_id = %run_id.short(), "Starting agent run");

        let mut tracked = Tracked {
            agent,
            config,
            phase: Phase::Input(Gate::new(self.guardrails_for(GuardrailDirection::Input))),
            result: RunResult::new(run_id, *agent_id, input),
        };
        // Only runs whose first input pass succeeded are recorded.
        self.drive_input(&mut tracked)?;

        let mut runs = self.runs.write();
        runs.order.push(run_id);
        runs.entries.insert(run_id, Arc::new(Mutex::new(tracked)));
        Ok(run_id)
    }

    /// Push `run_id` forward by at most one agent step.
    ///
    /// Returns whether the runner's result for the run is complete.
    pub fn process_run(&self, run_id: &Id) -> Result<bool> {
        let tracked = self.tracked(run_id)?;
        let mut guard = tracked.lock();
        let tracked = &mut *guard;
        match tracked.phase {
            Phase::Finished => {}
            Phase::Input(_) => self.drive_input(tracked)?,
            Phase::Running { .. } => self.drive_agent(tracked)?,
            Phase::Output { .. } => self.drive_output(tracked)?,
        }
        Ok(tracked.result.completed)
    }

    /// Call [`Runner::process_run`] until complete or `budget` calls are spent.
    pub fn poll_until_complete(&self, run_id: &Id, budget: usize) -> Result<bool> {
        for _ in 0..budget {
            if self.process_run(run_id)? {
                return Ok(true);
            }
        }
        self.is_complete(run_id)
    }

    fn drive_input(&self, tracked: &mut Tracked) -> Result<()> {
        let Tracked {
            agent,
            config,
            phase,
            result,
        } = tracked;
        let Phase::Input(gate) = &mut *phase else {
            return Ok(());
        };

        match gate.advance(&result.input, None, &mut result.validations)? {
            GateOutcome::Pending => Ok(()),
            GateOutcome::Failed(reason) => {
                warn!(agent = %agent.name(), run_id = %result.run_id.short(), reason = %reason, "Input guardrail tripped");
                result.fail(format!("Input guardrail tripped: {}", reason));
                *phase = Phase::Finished;
                Ok(())
            }
            GateOutcome::Passed => {
                // Busy surfaces to the caller; the gate stays passed for a retry.
                let agent_run = agent.start_with(&result.input, config.max_steps)?;
                result.agent_run_id = Some(agent_run);
                *phase = Phase::Running { agent_run };
                Ok(())
            }
        }
    }

    fn drive_agent(&self, tracked: &mut Tracked) -> Result<()> {
        let Phase::Running { agent_run } = tracked.phase else {
            return Ok(());
        };
        if !tracked.agent.advance(&agent_run)? {
            return Ok(());
        }
        let run = tracked.agent.run_snapshot(&agent_run)?;
        let gate = if tracked.config.output_guardrails {
            self.guardrails_for(GuardrailDirection::Output)
        } else {
            Vec::new()
        };

        let stopped_after = run.forced.then_some(run.max_steps);
        if run.forced {
            warn!(agent = %tracked.agent.name(), max_steps = run.max_steps, "Agent run force-terminated");
        }
        tracked.phase = Phase::Output {
            output: run.final_output,
            gate: Gate::new(gate),
            stopped_after,
        };
        self.drive_output(tracked)?;

        if tracked.result.completed {
            info!(run_id = %tracked.result.run_id.short(), success = tracked.result.success, "Run finished");
        }
        Ok(())
    }

    fn drive_output(&self, tracked: &mut Tracked) -> Result<()> {
        let Tracked { phase, result, .. } = tracked;
        let Phase::Output {
            output,
            gate,
            stopped_after,
        } = &mut *phase
        else {
            return Ok(());
        };

        match gate.advance(output, Some(&result.input), &mut result.validations)? {
            GateOutcome::Pending => {}
            GateOutcome::Failed(reason) => {
                warn!(run_id = %result.run_id.short(), reason = %reason, "Output guardrail tripped");
                result.fail(format!("Output guardrail tripped: {}", reason));
                *phase = Phase::Finished;
            }
            GateOutcome::Passed => {
                let output = std::mem::take(output);
                match *stopped_after {
                    Some(max_steps) => result.stop(output, max_steps),
                    None => result.succeed(output),
                }
                *phase = Phase::Finished;
            }
        }
        Ok(())
    }

    fn tracked(&self, run_id: &Id) -> Result<Arc<Mutex<Tracked>>> {
        self.runs
            .read()
            .entries
            .get(run_id)
            .cloned()
            .ok_or_else(|| AgentsError::not_found("run", run_id))
    }

    /// Exposed final output; empty until the run completed successfully.
    pub fn get_result(&self, run_id: &Id) -> Result<String> {
        Ok(self.tracked(run_id)?.lock().result.final_output.clone())
    }

    pub fn is_complete(&self, run_id: &Id) -> Result<bool> {
        Ok(self.tracked(run_id)?.lock().result.completed)
    }

    /// Copy of the runner's record for `run_id`.
    pub fn result(&self, run_id: &Id) -> Result<RunResult> {
        Ok(self.tracked(run_id)?.lock().result.clone())
    }

    /// Runner run ids, oldest first.
    pub fn runs(&self) -> Vec<Id> {
        self.runs.read().order.clone()
    }

    // Handoffs

    pub fn handoff(&self, caller: &Principal, source: &Id, target: &Id, input: &str) -> Result<Id> {
        self.handoffs.handoff(caller, source, target, input)
    }

    pub fn update_handoff_status(&self, caller: &Principal, handoff_id: &Id, status: HandoffStatus) -> Result<()> {
        self.handoffs.update_status(caller, handoff_id, status)
    }

    pub fn handoff_result(&self, handoff_id: &Id) -> Result<String> {
        self.handoffs.get_result(handoff_id)
    }

    /// Register a tool that hands off from `source` to `target`.
    pub fn register_handoff_tool(
        &self,
        caller: &Principal,
        source: &Id,
        target: &Id,
        description: impl Into<String>,
    ) -> Result<Id> {
        let tool = self.handoffs.tool(source, target, description)?;
        self.tools.register(caller, Arc::new(tool))
    }

    // Bridge to the off-system responder

    /// Drain requests waiting for the responder.
    pub fn take_outbox(&self) -> Vec<Outbound> {
        self.outbox.take()
    }

    pub fn fulfill(&self, caller: &Principal, id: &Id, payload: impl Into<String>) -> Result<()> {
        self.pending.fulfill(caller, id, payload)
    }

    /// Unregister every live agent, guardrail and tool.
    pub fn teardown(&self, caller: &Principal) -> Result<()> {
        self.authority.ensure(caller, "tear down the runner")?;
        for (id, _) in self.agents.live() {
            self.agents.unregister(caller, &id)?;
        }
        for (id, _) in self.guardrails.live() {
            self.guardrails.unregister(caller, &id)?;
        }
        for (id, _) in self.tools.live() {
            self.tools.unregister(caller, &id)?;
        }
        info!(by = %caller, "Runner torn down");
        Ok(())
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("owner", self.authority.owner())
            .field("agents", &self.agents.count())
            .field("guardrails", &self.guardrails.count())
            .field("tools", &self.tools.count())
            .field("runs", &self.runs.read().order.len())
            .finish()
    }
}
