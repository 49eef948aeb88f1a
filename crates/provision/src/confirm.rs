//! Confirmation tokens scoped to one plan
//!
//! Irreversible steps only run when the executor holds a token issued for
//! the exact plan it is executing. A token records the plan's content
//! digest, so consent given for one disk layout can never be replayed
//! against another.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::disk::PlanSummary;

/// blake3 content hash of a plan, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanDigest(String);

impl PlanDigest {
    /// Hash arbitrary canonical bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for PlanDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Affirmative consent for one plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationToken {
    plan_digest: PlanDigest,
    issued_at: DateTime<Utc>,
}

impl ConfirmationToken {
    /// Issue a token for the plan described by `summary`
    ///
    /// Only [`ConfirmationGate`](crate::context::ConfirmationGate)
    /// implementations should call this, after the operator agreed.
    pub fn issue(summary: &PlanSummary) -> Self {
        Self {
            plan_digest: summary.digest.clone(),
            issued_at: Utc::now(),
        }
    }

    pub fn plan_digest(&self) -> &PlanDigest {
        &self.plan_digest
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Whether this token authorizes actions on the plan with `digest`
    pub fn authorizes(&self, digest: &PlanDigest) -> bool {
        &self.plan_digest == digest
    }

    /// Whether the token is older than `ttl`
    pub fn is_expired(&self, ttl: Duration) -> bool {
        Utc::now() - self.issued_at > ttl
    }
}

/// Answer from a confirmation gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Granted(ConfirmationToken),
    Denied,
}

impl Confirmation {
    pub fn into_token(self) -> Option<ConfirmationToken> {
        match self {
            Self::Granted(token) => Some(token),
            Self::Denied => None,
        }
    }
}
