//! # Correlation identifiers
//!
//! Every run, step request, tool execution, validation, handoff and registry
//! entry is keyed by an [`Id`]: an opaque 32-byte token. Ids come from an
//! [`IdAllocator`], which hashes a timestamp, a monotonic counter, the
//! requesting principal, caller-supplied context and a per-allocator random
//! salt. The counter makes ids unique within one allocator; the salt keeps
//! them unpredictable from context alone.
//!
//! ```rust
//! use stepwise_agents::auth::Principal;
//! use stepwise_agents::ids::IdAllocator;
//!
//! let ids = IdAllocator::new();
//! let owner = Principal::new("owner");
//! let a = ids.next(&owner, b"run");
//! let b = ids.next(&owner, b"run");
//! assert_ne!(a, b);
//! assert_eq!(ids.issued(), 2);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::{AgentsError, Result};

/// Opaque fixed-size identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Id([u8; 32]);

impl Id {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.short())
    }
}

impl FromStr for Id {
    type Err = AgentsError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| AgentsError::not_found("id", e))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AgentsError::not_found("id", s))?;
        Ok(Id(arr))
    }
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for Id {
    type Error = AgentsError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Process-wide source of [`Id`]s.
///
/// Allocation never fails. Exhausting the 64-bit counter is a fatal
/// configuration error and panics.
pub struct IdAllocator {
    counter: AtomicU64,
    salt: [u8; 16],
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            salt: *Uuid::new_v4().as_bytes(),
        }
    }

    /// Mint the next id for `requester` in `context`.
    pub fn next(&self, requester: &Principal, context: &[u8]) -> Id {
        let n = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_add(1))
            .unwrap_or_else(|_| panic!("identity counter exhausted"));
        let ts = Utc::now().timestamp_nanos_opt().unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(ts.to_be_bytes());
        hasher.update(n.to_be_bytes());
        let who = requester.as_str().as_bytes();
        hasher.update((who.len() as u64).to_be_bytes());
        hasher.update(who);
        hasher.update((context.len() as u64).to_be_bytes());
        hasher.update(context);
        hasher.update(self.salt);

        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Id(out)
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn starting_at(counter: u64) -> Self {
        Self {
            counter: AtomicU64::new(counter),
            salt: [0; 16],
        }
    }
}

impl fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdAllocator")
            .field("issued", &self.issued())
            .finish()
    }
}
