//! # Notifications
//!
//! Every state change a poller may care about is published as an [`Event`]:
//! registry changes, pending requests opening and resolving, steps and runs
//! completing, guardrail validations resolving and handoffs moving between
//! states. Events go to an injected [`EventSink`].
//!
//! - [`TracingSink`] (the default) forwards each event to the `tracing`
//!   subscriber with structured fields.
//! - [`MemorySink`] keeps every event in order, for inspection and tests.
//!
//! ```rust
//! use stepwise_agents::events::{Event, EventSink, MemorySink};
//! use stepwise_agents::ids::IdAllocator;
//! use stepwise_agents::auth::Principal;
//!
//! let sink = MemorySink::new();
//! let id = IdAllocator::new().next(&Principal::new("owner"), b"");
//! sink.emit(Event::RequestFulfilled { id });
//! assert_eq!(sink.len(), 1);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::auth::Principal;
use crate::guardrail::ValidationResult;
use crate::handoff::HandoffStatus;
use crate::ids::Id;
use crate::run::StepKind;

/// A notification emitted by one of the components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A handle was added to a registry.
    Registered {
        registry: String,
        id: Id,
        name: String,
        metadata: Value,
    },
    /// A registry entry was cleared. The id stays enumerable.
    Unregistered {
        registry: String,
        id: Id,
        name: String,
    },
    /// An asynchronous request was opened in the pending table.
    RequestOpened { id: Id, requester: Principal },
    /// The responder completed a pending request.
    RequestFulfilled { id: Id },
    /// An agent started a run.
    RunStarted {
        agent: String,
        run_id: Id,
        max_steps: usize,
    },
    /// A step finished and carries its output.
    StepCompleted {
        agent: String,
        run_id: Id,
        index: usize,
        kind: StepKind,
        output: String,
    },
    /// A run became terminal. `forced` is set when the step budget tripped.
    RunCompleted {
        agent: String,
        run_id: Id,
        final_output: String,
        forced: bool,
    },
    /// A guardrail validation left the pending state.
    ValidationResolved {
        guardrail: String,
        validation_id: Id,
        result: ValidationResult,
        score: Option<u32>,
    },
    /// A handoff started a run on its target agent.
    HandoffCreated {
        handoff_id: Id,
        source: Id,
        target: Id,
        result_run_id: Id,
    },
    /// A handoff's lifecycle status was updated.
    HandoffStatusChanged {
        handoff_id: Id,
        status: HandoffStatus,
        by: Principal,
    },
}

/// Receives [`Event`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        match &event {
            Event::Registered { registry, id, name, .. } => {
                info!(registry = %registry, id = %id.short(), name = %name, "Registered");
            }
            Event::Unregistered { registry, id, name } => {
                info!(registry = %registry, id = %id.short(), name = %name, "Unregistered");
            }
            Event::RequestOpened { id, requester } => {
                debug!(request = %id.short(), requester = %requester, "Request opened");
            }
            Event::RequestFulfilled { id } => {
                debug!(request = %id.short(), "Request fulfilled");
            }
            Event::RunStarted {
                agent,
                run_id,
                max_steps,
            } => {
                info!(agent = %agent, run_id = %run_id.short(), max_steps, "Run started");
            }
            Event::StepCompleted {
                agent,
                run_id,
                index,
                kind,
                ..
            } => {
                debug!(agent = %agent, run_id = %run_id.short(), index, kind = ?kind, "Step completed");
            }
            Event::RunCompleted {
                agent,
                run_id,
                forced,
                ..
            } => {
                info!(agent = %agent, run_id = %run_id.short(), forced, "Run completed");
            }
            Event::ValidationResolved {
                guardrail,
                validation_id,
                result,
                score,
            } => {
                info!(
                    guardrail = %guardrail,
                    validation = %validation_id.short(),
                    result = ?result,
                    score = ?score,
                    "Validation resolved"
                );
            }
            Event::HandoffCreated {
                handoff_id,
                source,
                target,
                ..
            } => {
                info!(
                    handoff = %handoff_id.short(),
                    from = %source.short(),
                    to = %target.short(),
                    "Handoff created"
                );
            }
            Event::HandoffStatusChanged {
                handoff_id,
                status,
                by,
            } => {
                info!(handoff = %handoff_id.short(), status = ?status, by = %by, "Handoff status changed");
            }
        }
    }
}

/// Records events in emission order.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Shared handle used by every component.
pub type SharedSink = Arc<dyn EventSink>;

/// The default sink: tracing output.
pub fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}
