//! Caller identity and the owner check shared by every mutating surface.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AgentsError, Result};

/// Names whoever is making a call: the owner, an agent, an external responder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Principal an agent acts as, derived from its name.
    pub fn agent(name: &str) -> Self {
        Self(format!("agent:{}", name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The owning authority of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    owner: Principal,
}

impl Authority {
    pub fn new(owner: Principal) -> Self {
        Self { owner }
    }

    pub fn owner(&self) -> &Principal {
        &self.owner
    }

    pub fn is_owner(&self, caller: &Principal) -> bool {
        &self.owner == caller
    }

    /// Fails with `Unauthorized` unless `caller` is the owner.
    pub fn ensure(&self, caller: &Principal, action: &str) -> Result<()> {
        self.ensure_any(caller, &[], action)
    }

    /// Like [`ensure`](Self::ensure), but `also` lists extra principals allowed
    /// for this one call.
    pub fn ensure_any(&self, caller: &Principal, also: &[&Principal], action: &str) -> Result<()> {
        if self.is_owner(caller) || also.iter().any(|p| *p == caller) {
            Ok(())
        } else {
            warn!(caller = %caller, action = %action, "Rejected caller");
            Err(AgentsError::Unauthorized {
                caller: caller.to_string(),
                action: action.to_string(),
            })
        }
    }
}
