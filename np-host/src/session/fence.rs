//! Request fencing
//!
//! Every conversion request gets a monotonically increasing [`RequestId`].
//! A response is applied only when it belongs to the most recently issued
//! request and nothing at or above that id has been applied yet. Responses
//! therefore win by issuance order, never by arrival order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fencing token attached to one conversion request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues request ids and decides which responses may be applied
#[derive(Debug, Default)]
pub struct RequestFence {
    issued: u64,
    applied: u64,
}

impl RequestFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next request id
    pub fn issue(&mut self) -> RequestId {
        self.issued += 1;
        RequestId(self.issued)
    }

    /// Most recently issued id
    pub fn latest(&self) -> Option<RequestId> {
        (self.issued > 0).then_some(RequestId(self.issued))
    }

    /// True while the latest request has not been settled
    pub fn is_in_flight(&self) -> bool {
        self.issued > self.applied
    }

    /// Make every outstanding request stale
    pub fn invalidate(&mut self) {
        self.applied = self.issued;
    }

    /// Claim the right to apply a response for `id`
    ///
    /// Returns false (and changes nothing) when the response is stale.
    pub fn try_apply(&mut self, id: RequestId) -> bool {
        if id.0 == self.issued && id.0 > self.applied {
            self.applied = id.0;
            true
        } else {
            false
        }
    }
}
