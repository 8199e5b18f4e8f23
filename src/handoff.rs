//! # Agent Handoff System
//!
//! A handoff transfers a conversation from a source agent to a target agent.
//! [`HandoffManager::handoff`] starts a run on the target straight away and
//! records its id as `result_run_id`. The handoff itself stays `Pending`
//! until the source, the target or the owner closes it with
//! [`HandoffManager::update_status`]; only a `Completed` handoff exposes the
//! target's output through [`HandoffManager::get_result`].
//!
//! `Pending` therefore says nothing about the target run. It may already be
//! finished; the handoff's own lifecycle just has not been closed.
//!
//! ## Handoffs as tools
//!
//! [`HandoffTool`] wraps a source/target pair as a [`Tool`] named
//! `transfer_to_<target>`. When a source run calls it, the tool performs the
//! handoff and returns a JSON description of it as the tool result, so the
//! run can carry on (or stop) with that information.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::Agent;
use crate::auth::{Authority, Principal};
use crate::error::{AgentsError, Result};
use crate::events::{Event, SharedSink};
use crate::ids::{Id, IdAllocator};
use crate::registry::Registry;
use crate::tool::{Tool, ToolBackend};

/// Lifecycle of a handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HandoffStatus {
    #[default]
    None,
    Pending,
    Completed,
    Rejected,
}

/// A recorded transfer between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub id: Id,
    pub source_agent: Id,
    pub target_agent: Id,
    /// Agent names at the time of the handoff.
    pub source_name: String,
    pub target_name: String,
    pub input_data: String,
    pub status: HandoffStatus,
    pub result_run_id: Id,
    pub created_at: DateTime<Utc>,
}

/// Data a [`HandoffTool`] returns to the calling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffData {
    pub handoff_id: Id,
    pub target: String,
    pub run_id: Id,
}

#[derive(Default)]
struct HandoffLog {
    order: Vec<Id>,
    records: HashMap<Id, Handoff>,
    by_source: HashMap<Id, Vec<Id>>,
    targets: HashMap<Id, Arc<Agent>>,
}

/// Creates and tracks handoffs between registered agents.
pub struct HandoffManager {
    agents: Arc<Registry<Agent>>,
    authority: Authority,
    ids: Arc<IdAllocator>,
    events: SharedSink,
    log: Mutex<HandoffLog>,
}

impl HandoffManager {
    pub fn new(
        agents: Arc<Registry<Agent>>,
        authority: Authority,
        ids: Arc<IdAllocator>,
        events: SharedSink,
    ) -> Self {
        Self {
            agents,
            authority,
            ids,
            events,
            log: Mutex::new(HandoffLog::default()),
        }
    }

    /// Hand `input` from `source` over to `target`.
    ///
    /// `caller` must be the source agent or the owner. The target must be
    /// idle; its run is started before this returns.
    pub fn handoff(&self, caller: &Principal, source: &Id, target: &Id, input: &str) -> Result<Id> {
        if source == target {
            return Err(AgentsError::InvalidHandoff {
                message: "an agent cannot hand off to itself".to_string(),
            });
        }
        let source_agent = self.agents.resolve(source)?;
        let target_agent = self.agents.resolve(target)?;
        self.authority.ensure_any(
            caller,
            &[source_agent.principal()],
            &format!("hand off from {}", source_agent.name()),
        )?;

        let result_run_id = target_agent.start(input)?;
        let id = self.ids.next(caller, result_run_id.as_bytes());
        let record = Handoff {
            id,
            source_agent: *source,
            target_agent: *target,
            source_name: source_agent.name().to_string(),
            target_name: target_agent.name().to_string(),
            input_data: input.to_string(),
            status: HandoffStatus::Pending,
            result_run_id,
            created_at: Utc::now(),
        };

        {
            let mut log = self.log.lock();
            log.order.push(id);
            log.by_source.entry(*source).or_default().push(id);
            log.records.insert(id, record);
            log.targets.insert(id, target_agent.clone());
        }

        info!(
            from = %source_agent.name(),
            to = %target_agent.name(),
            handoff = %id.short(),
            "Performing handoff"
        );
        self.events.emit(Event::HandoffCreated {
            handoff_id: id,
            source: *source,
            target: *target,
            result_run_id,
        });
        Ok(id)
    }

    /// Set the status of `handoff_id`. Source, target and owner only.
    pub fn update_status(&self, caller: &Principal, handoff_id: &Id, status: HandoffStatus) -> Result<()> {
        {
            let mut log = self.log.lock();
            let record = log
                .records
                .get_mut(handoff_id)
                .ok_or_else(|| AgentsError::not_found("handoff", handoff_id))?;
            let source = Principal::agent(&record.source_name);
            let target = Principal::agent(&record.target_name);
            self.authority
                .ensure_any(caller, &[&source, &target], "update handoff status")?;
            record.status = status;
        }
        info!(handoff = %handoff_id.short(), status = ?status, by = %caller, "Handoff status updated");
        self.events.emit(Event::HandoffStatusChanged {
            handoff_id: *handoff_id,
            status,
            by: caller.clone(),
        });
        Ok(())
    }

    /// Final output of the target run, once the handoff is `Completed`.
    pub fn get_result(&self, handoff_id: &Id) -> Result<String> {
        let (run_id, target) = {
            let log = self.log.lock();
            let record = log
                .records
                .get(handoff_id)
                .ok_or_else(|| AgentsError::not_found("handoff", handoff_id))?;
            if record.status != HandoffStatus::Completed {
                return Err(AgentsError::NotCompleted {
                    id: handoff_id.to_string(),
                });
            }
            let target = log
                .targets
                .get(handoff_id)
                .cloned()
                .ok_or_else(|| AgentsError::not_found("agent", record.target_agent))?;
            (record.result_run_id, target)
        };
        target.get_result(&run_id)
    }

    pub fn get(&self, handoff_id: &Id) -> Result<Handoff> {
        self.log
            .lock()
            .records
            .get(handoff_id)
            .cloned()
            .ok_or_else(|| AgentsError::not_found("handoff", handoff_id))
    }

    pub fn status(&self, handoff_id: &Id) -> Result<HandoffStatus> {
        Ok(self.get(handoff_id)?.status)
    }

    pub fn handoff_count(&self) -> usize {
        self.log.lock().order.len()
    }

    pub fn handoff_at(&self, index: usize) -> Result<Id> {
        let log = self.log.lock();
        log.order
            .get(index)
            .copied()
            .ok_or(AgentsError::IndexOutOfBounds {
                index,
                len: log.order.len(),
            })
    }

    /// Handoffs started by `source`, oldest first.
    pub fn handoffs_for(&self, source: &Id) -> Vec<Id> {
        self.log
            .lock()
            .by_source
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// A tool that hands the calling run's arguments from `source` to `target`.
    pub fn tool(self: &Arc<Self>, source: &Id, target: &Id, description: impl Into<String>) -> Result<HandoffTool> {
        let source_agent = self.agents.resolve(source)?;
        let target_agent = self.agents.resolve(target)?;
        if source == target {
            return Err(AgentsError::InvalidHandoff {
                message: format!("{} cannot hand off to itself", source_agent.name()),
            });
        }
        Ok(HandoffTool {
            name: format!("transfer_to_{}", target_agent.name().to_lowercase().replace(' ', "_")),
            description: description.into(),
            manager: Arc::downgrade(self),
            caller: source_agent.principal().clone(),
            source: *source,
            target: *target,
            target_name: target_agent.name().to_string(),
            ids: IdAllocator::new(),
            outputs: Mutex::new(HashMap::new()),
        })
    }
}

impl fmt::Debug for HandoffManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffManager")
            .field("handoffs", &self.handoff_count())
            .finish()
    }
}

/// A [`Tool`] that performs a handoff when executed.
pub struct HandoffTool {
    name: String,
    description: String,
    manager: Weak<HandoffManager>,
    caller: Principal,
    source: Id,
    target: Id,
    target_name: String,
    ids: IdAllocator,
    outputs: Mutex<HashMap<Id, String>>,
}

impl HandoffTool {
    pub fn target(&self) -> &Id {
        &self.target
    }

    fn transfer(&self, arguments: &str) -> Result<String> {
        let manager = self
            .manager
            .upgrade()
            .ok_or_else(|| AgentsError::backend("handoff manager dropped"))?;
        let handoff_id = manager.handoff(&self.caller, &self.source, &self.target, arguments)?;
        let record = manager.get(&handoff_id)?;
        let data = HandoffData {
            handoff_id,
            target: self.target_name.clone(),
            run_id: record.result_run_id,
        };
        Ok(serde_json::to_string(&data)?)
    }
}

impl ToolBackend for HandoffTool {
    fn execute(&self, arguments: &str) -> Result<Id> {
        let id = self.ids.next(&self.caller, arguments.as_bytes());
        let output = match self.transfer(arguments) {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %self.name, error = %e, "Handoff failed");
                format!("Error: {}", e)
            }
        };
        self.outputs.lock().insert(id, output);
        Ok(id)
    }

    fn poll(&self, execution_id: &Id) -> Result<bool> {
        if self.outputs.lock().contains_key(execution_id) {
            Ok(true)
        } else {
            Err(AgentsError::not_found("execution", execution_id))
        }
    }

    fn result(&self, execution_id: &Id) -> Result<String> {
        self.outputs
            .lock()
            .remove(execution_id)
            .ok_or_else(|| AgentsError::not_found("execution", execution_id))
    }
}

impl Tool for HandoffTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tool_type(&self) -> &str {
        "handoff"
    }
}

impl fmt::Debug for HandoffTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffTool")
            .field("name", &self.name)
            .field("target", &self.target_name)
            .finish()
    }
}
