//! # Capability backends
//!
//! Runs never talk to a model or classifier directly. They go through the
//! [`ModelBackend`] and [`Classifier`] traits, whose contract is split into a
//! `request` that returns a correlation [`Id`] right away and a `poll` that
//! returns `None` until the answer exists. Tool backends follow the same
//! shape (see [`crate::tool::ToolBackend`]).
//!
//! [`PendingModelBackend`] and [`PendingClassifier`] implement the traits on
//! top of the shared [`PendingRequestTable`]: each request opens a table
//! entry and queues an [`Outbound`] message in an [`Outbox`]. An external
//! responder drains the outbox, does the work off-system and fulfills the
//! entry.
//!
//! ```rust
//! use std::sync::Arc;
//! use stepwise_agents::auth::Principal;
//! use stepwise_agents::backend::{ModelBackend, ModelReply, Outbox, PendingModelBackend};
//! use stepwise_agents::events::default_sink;
//! use stepwise_agents::ids::IdAllocator;
//! use stepwise_agents::pending::PendingRequestTable;
//!
//! let bridge = Principal::new("bridge");
//! let table = Arc::new(PendingRequestTable::new(
//!     bridge.clone(),
//!     Arc::new(IdAllocator::new()),
//!     default_sink(),
//! ));
//! let outbox = Arc::new(Outbox::new());
//! let model = PendingModelBackend::new(table.clone(), outbox.clone(), Principal::new("echo"));
//!
//! let id = model.request("Be brief.", "hello").unwrap();
//! assert_eq!(model.poll(&id).unwrap(), None);
//!
//! // The responder picks the request up and answers it.
//! let request = outbox.take().remove(0);
//! table.fulfill(&bridge, &request.id(), ModelReply::text("hi!").to_payload()).unwrap();
//! assert_eq!(model.poll(&id).unwrap().as_deref(), Some("hi!"));
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Principal;
use crate::error::{AgentsError, Result};
use crate::ids::Id;
use crate::pending::{PendingRequestTable, Readiness};

/// Generative model capability.
pub trait ModelBackend: Send + Sync {
    /// Issue a completion request and return its correlation id.
    fn request(&self, instructions: &str, input: &str) -> Result<Id>;

    /// The response text once available.
    fn poll(&self, id: &Id) -> Result<Option<String>>;

    /// Whether the response for `id` asks for `tool_name`.
    fn detects_tool_call(&self, id: &Id, tool_name: &str) -> Result<bool>;

    /// Arguments the response passes to `tool_name`.
    fn tool_arguments(&self, id: &Id, tool_name: &str) -> Result<String>;
}

/// Guardrail scoring capability.
pub trait Classifier: Send + Sync {
    fn request(&self, prompt: &str) -> Result<Id>;

    /// The raw scored payload once available.
    fn poll(&self, id: &Id) -> Result<Option<String>>;
}

/// A tool the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallIntent {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallIntent {
    /// Arguments as passed to the tool: strings verbatim, anything else as JSON.
    pub fn arguments_text(&self) -> String {
        match &self.arguments {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Wire format of a model answer carried through the pending table.
///
/// Payloads that are not a JSON object of this shape are read as plain text
/// without tool calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallIntent>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: impl Into<Value>) -> Self {
        self.tool_calls.push(ToolCallIntent {
            name: name.into(),
            arguments: arguments.into(),
        });
        self
    }

    pub fn parse(payload: &str) -> Self {
        serde_json::from_str(payload).unwrap_or_else(|_| Self::text(payload))
    }

    pub fn to_payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.text.clone())
    }

    pub fn wants(&self, tool_name: &str) -> Option<&ToolCallIntent> {
        self.tool_calls.iter().find(|c| c.name == tool_name)
    }
}

/// A request waiting for the off-system responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outbound {
    Model {
        id: Id,
        instructions: String,
        input: String,
    },
    Tool {
        id: Id,
        tool: String,
        arguments: String,
    },
    Classify {
        id: Id,
        prompt: String,
    },
}

impl Outbound {
    /// Correlation id the responder must fulfill.
    pub fn id(&self) -> Id {
        match self {
            Outbound::Model { id, .. } | Outbound::Tool { id, .. } | Outbound::Classify { id, .. } => {
                *id
            }
        }
    }
}

/// FIFO of outbound requests.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Mutex<VecDeque<Outbound>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, request: Outbound) {
        self.queue.lock().push_back(request);
    }

    /// Drain everything queued so far, oldest first.
    pub fn take(&self) -> Vec<Outbound> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// [`ModelBackend`] that funnels through the pending table.
#[derive(Debug, Clone)]
pub struct PendingModelBackend {
    table: Arc<PendingRequestTable>,
    outbox: Arc<Outbox>,
    requester: Principal,
}

impl PendingModelBackend {
    pub fn new(table: Arc<PendingRequestTable>, outbox: Arc<Outbox>, requester: Principal) -> Self {
        Self {
            table,
            outbox,
            requester,
        }
    }

    fn reply(&self, id: &Id) -> Result<Option<ModelReply>> {
        Ok(self
            .table
            .poll(id)?
            .into_payload()
            .map(|payload| ModelReply::parse(&payload)))
    }
}

impl ModelBackend for PendingModelBackend {
    fn request(&self, instructions: &str, input: &str) -> Result<Id> {
        let id = self.table.open(&self.requester);
        self.outbox.push(Outbound::Model {
            id,
            instructions: instructions.to_string(),
            input: input.to_string(),
        });
        Ok(id)
    }

    fn poll(&self, id: &Id) -> Result<Option<String>> {
        Ok(self.reply(id)?.map(|r| r.text))
    }

    fn detects_tool_call(&self, id: &Id, tool_name: &str) -> Result<bool> {
        Ok(self
            .reply(id)?
            .map(|r| r.wants(tool_name).is_some())
            .unwrap_or(false))
    }

    fn tool_arguments(&self, id: &Id, tool_name: &str) -> Result<String> {
        self.reply(id)?
            .and_then(|r| r.wants(tool_name).map(ToolCallIntent::arguments_text))
            .ok_or_else(|| AgentsError::not_found("tool call", tool_name))
    }
}

/// [`Classifier`] that funnels through the pending table.
#[derive(Debug, Clone)]
pub struct PendingClassifier {
    table: Arc<PendingRequestTable>,
    outbox: Arc<Outbox>,
    requester: Principal,
}

impl PendingClassifier {
    pub fn new(table: Arc<PendingRequestTable>, outbox: Arc<Outbox>, requester: Principal) -> Self {
        Self {
            table,
            outbox,
            requester,
        }
    }
}

impl Classifier for PendingClassifier {
    fn request(&self, prompt: &str) -> Result<Id> {
        let id = self.table.open(&self.requester);
        self.outbox.push(Outbound::Classify {
            id,
            prompt: prompt.to_string(),
        });
        Ok(id)
    }

    fn poll(&self, id: &Id) -> Result<Option<String>> {
        Ok(match self.table.poll(id)? {
            Readiness::Ready(payload) => Some(payload),
            Readiness::NotReady => None,
        })
    }
}
