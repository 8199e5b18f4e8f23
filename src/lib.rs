//! # Stepwise Agents
//!
//! A framework for agent runs that never block. An agent alternates between
//! a generative model and tools, behind input/output guardrails, and can
//! hand a conversation to another agent mid-run. Every call that depends on
//! an outside responder is split into a "start" that returns a correlation
//! id and a "poll" that reports whether the answer exists yet. An external
//! driver calls [`Runner::process_run`] until it returns `true`.
//!
//! ## Core Concepts
//!
//! - **Runner**: owns the registries and drives runs through input
//!   guardrails, the agent's step machine and output guardrails
//! - **Agent**: one run at a time, one step per `advance`
//! - **Tools**: named [`ToolBackend`]s resolved through the tool registry
//! - **Guardrails**: classifier-backed validation gates
//! - **Handoffs**: transfer of a conversation to another registered agent
//! - **Pending table**: the single correlation mechanism behind every
//!   off-system request
//!
//! ## Getting Started
//!
//! ```rust
//! use std::sync::Arc;
//! use stepwise_agents::{
//!     FunctionTool, ModelReply, Outbound, Principal, RunConfig, Runner, SdkConfig,
//!     ToolUseBehavior, RESPONDER,
//! };
//!
//! let runner = Runner::new(SdkConfig::default());
//! let owner = runner.owner().clone();
//!
//! let echo = FunctionTool::simple("echo", "Echoes its input", |s: String| format!("{}-echoed", s));
//! runner.register_tool(&owner, Arc::new(echo)).unwrap();
//!
//! // The model is answered by an outside responder through the pending table.
//! let config = runner
//!     .agent_config("Echo", "Use the echo tool.")
//!     .with_tool_use_behavior(ToolUseBehavior::StopOnFirstTool);
//! let agent = runner.build_agent(config, runner.pending_model("agent:Echo"));
//! let agent_id = runner.register_agent(&owner, agent).unwrap();
//!
//! let run_id = runner.run(&agent_id, "say hi", RunConfig::default()).unwrap();
//! assert!(!runner.process_run(&run_id).unwrap()); // model has not answered
//!
//! let bridge = Principal::new(RESPONDER);
//! for request in runner.take_outbox() {
//!     if let Outbound::Model { id, .. } = request {
//!         let reply = ModelReply::text("calling echo").with_tool_call("echo", "hi");
//!         runner.fulfill(&bridge, &id, reply.to_payload()).unwrap();
//!     }
//! }
//!
//! assert!(runner.poll_until_complete(&run_id, 10).unwrap());
//! assert_eq!(runner.get_result(&run_id).unwrap(), "hi-echoed");
//! ```

pub mod agent;
pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod guardrail;
pub mod handoff;
pub mod ids;
pub mod pending;
pub mod registry;
pub mod result;
pub mod run;
pub mod runner;
pub mod tool;

// Public re-exports for convenience
pub use agent::{Agent, AgentConfig};
pub use auth::{Authority, Principal};
pub use backend::{
    Classifier, ModelBackend, ModelReply, Outbound, Outbox, PendingClassifier, PendingModelBackend,
};
pub use config::{ConfigBuilder, SdkConfig};
pub use error::{AgentsError, Result};
pub use events::{Event, EventSink, MemorySink, TracingSink};
pub use guardrail::{
    Guardrail, GuardrailDirection, GuardrailKind, GuardrailResult, GuardrailValidation,
    ValidationResult,
};
pub use handoff::{Handoff, HandoffManager, HandoffStatus, HandoffTool};
pub use ids::{Id, IdAllocator};
pub use pending::{PendingRequestTable, Readiness};
pub use registry::{Registrable, Registry};
pub use result::RunResult;
pub use run::{AgentStatus, Run, Step, StepKind, ToolUseBehavior};
pub use runner::{RunConfig, Runner, RESPONDER};
pub use tool::{FunctionTool, RemoteTool, Tool, ToolBackend};
