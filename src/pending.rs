//! # Pending requests
//!
//! The table every "send now, read the answer later" exchange goes through.
//! A requester opens an entry and gets back its correlation [`Id`]. The
//! designated responder later calls [`PendingRequestTable::fulfill`] exactly
//! once, and pollers read the outcome with [`PendingRequestTable::poll`].
//!
//! An entry moves from not-ready to ready once and never back. A second
//! fulfillment fails with `AlreadyFulfilled` and leaves the first payload in
//! place.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::{Authority, Principal};
use crate::error::{AgentsError, Result};
use crate::events::{Event, SharedSink};
use crate::ids::{Id, IdAllocator};

/// One issued asynchronous call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: Id,
    pub is_complete: bool,
    pub payload: String,
    pub requester: Principal,
    pub issued_at: DateTime<Utc>,
}

/// What a poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    NotReady,
    Ready(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }

    pub fn into_payload(self) -> Option<String> {
        match self {
            Readiness::Ready(payload) => Some(payload),
            Readiness::NotReady => None,
        }
    }
}

/// Correlation table shared by the model, tool and classifier adapters.
pub struct PendingRequestTable {
    responder: Authority,
    ids: Arc<IdAllocator>,
    events: SharedSink,
    requests: Mutex<HashMap<Id, PendingRequest>>,
}

impl PendingRequestTable {
    /// `responder` is the only principal allowed to fulfill requests.
    pub fn new(responder: Principal, ids: Arc<IdAllocator>, events: SharedSink) -> Self {
        Self {
            responder: Authority::new(responder),
            ids,
            events,
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn responder(&self) -> &Principal {
        self.responder.owner()
    }

    /// Open a new not-ready entry for `requester`.
    pub fn open(&self, requester: &Principal) -> Id {
        let id = self.ids.next(requester, b"pending-request");
        self.requests.lock().insert(
            id,
            PendingRequest {
                id,
                is_complete: false,
                payload: String::new(),
                requester: requester.clone(),
                issued_at: Utc::now(),
            },
        );
        self.events.emit(Event::RequestOpened {
            id,
            requester: requester.clone(),
        });
        id
    }

    /// Complete `id` with `payload`. Only the responder may call this, once.
    pub fn fulfill(&self, caller: &Principal, id: &Id, payload: impl Into<String>) -> Result<()> {
        self.responder.ensure(caller, "fulfill requests")?;
        {
            let mut requests = self.requests.lock();
            let request = requests
                .get_mut(id)
                .ok_or_else(|| AgentsError::not_found("request", id))?;
            if request.is_complete {
                warn!(request = %id.short(), "Rejected second fulfillment");
                return Err(AgentsError::AlreadyFulfilled { id: id.to_string() });
            }
            request.payload = payload.into();
            request.is_complete = true;
        }
        debug!(request = %id.short(), "Request fulfilled");
        self.events.emit(Event::RequestFulfilled { id: *id });
        Ok(())
    }

    /// Read-only view of `id`. Unknown ids are `NotFound`.
    pub fn poll(&self, id: &Id) -> Result<Readiness> {
        let requests = self.requests.lock();
        let request = requests
            .get(id)
            .ok_or_else(|| AgentsError::not_found("request", id))?;
        Ok(if request.is_complete {
            Readiness::Ready(request.payload.clone())
        } else {
            Readiness::NotReady
        })
    }

    pub fn get(&self, id: &Id) -> Result<PendingRequest> {
        self.requests
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| AgentsError::not_found("request", id))
    }

    /// Ids still waiting on the responder, oldest first.
    pub fn outstanding(&self) -> Vec<Id> {
        let requests = self.requests.lock();
        let mut open: Vec<&PendingRequest> =
            requests.values().filter(|r| !r.is_complete).collect();
        open.sort_by_key(|r| r.issued_at);
        open.into_iter().map(|r| r.id).collect()
    }
}

impl fmt::Debug for PendingRequestTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequestTable")
            .field("responder", self.responder.owner())
            .field("requests", &self.requests.lock().len())
            .finish()
    }
}
