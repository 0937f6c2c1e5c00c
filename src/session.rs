//! Session tokens and the per-session pipeline gate.
//!
//! A token is the only handle a client ever gets on its upload, so it must
//! be unguessable: 128 random bits from a v4 UUID, rendered as 32 lowercase
//! hex characters. Anything that does not have exactly that shape is
//! rejected before it is ever joined onto a filesystem path.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{32}$").unwrap());

/// Opaque per-upload identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(String);

impl SessionToken {
    /// Mint a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Accept a client-supplied token, or `None` if it is not well-formed.
    pub fn parse(raw: &str) -> Option<Self> {
        TOKEN_RE.is_match(raw).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lazily-created mutual-exclusion gates, one per session token.
///
/// A pipeline run holds its session's gate for its whole duration so two
/// `/api/validate` calls for one token can never write into the same result
/// workspace at once. Different tokens never contend.
#[derive(Debug, Default)]
pub struct SessionGates {
    gates: Mutex<HashMap<SessionToken, Arc<AsyncMutex<()>>>>,
}

/// Proof that the holder owns a session's gate. Released on drop.
pub type SessionGuard = OwnedMutexGuard<()>;

impl SessionGates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate for `token` if nobody holds it.
    pub fn try_acquire(&self, token: &SessionToken) -> Option<SessionGuard> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(gates.entry(token.clone()).or_default())
        };
        gate.try_lock_owned().ok()
    }

    /// Drop gates nobody holds or waits on.
    pub fn prune_idle(&self) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        let before = gates.len();
        gates.retain(|_, gate| Arc::strong_count(gate) > 1);
        if gates.len() != before {
            debug!("Pruned {} idle session gates", before - gates.len());
        }
    }

    /// Number of gates currently tracked.
    pub fn len(&self) -> usize {
        self.gates.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
