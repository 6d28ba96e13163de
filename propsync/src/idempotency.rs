//! Request-id deduplication for mutations.
//!
//! The guard maps each committed request id to the exact receipt the first
//! application produced. A caller first [`claim`](IdempotencyGuard::claim)s
//! the id, which reserves it against every other call with the same id
//! whatever application it targets, then either commits the receipt in the
//! same critical section that applies the mutation or releases the claim.
//!
//! Rejected mutations are never recorded: they had no effect, so a retry with
//! the same id is evaluated again.

use std::collections::{HashMap, HashSet};

use crate::model::{MutationReceipt, RequestId};

/// Outcome of claiming a request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Already committed; hand back the stored receipt
    Replay(MutationReceipt),
    /// Another call holds the id; wait for it to settle
    InFlight,
    /// The caller now owns the id until it commits or releases
    Claimed,
}

/// In-memory idempotency records.
#[derive(Debug, Default)]
pub struct IdempotencyGuard {
    receipts: HashMap<RequestId, MutationReceipt>,
    in_flight: HashSet<RequestId>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stored receipt if this request was already committed.
    pub fn replay(&self, request_id: &RequestId) -> Option<MutationReceipt> {
        let receipt = self.receipts.get(request_id).cloned();
        if receipt.is_some() {
            log::debug!("Replaying committed request {request_id}");
        }
        receipt
    }

    /// Replay, or reserve the id for the caller.
    pub fn claim(&mut self, request_id: RequestId) -> Claim {
        if let Some(receipt) = self.replay(&request_id) {
            return Claim::Replay(receipt);
        }
        if self.in_flight.insert(request_id) {
            Claim::Claimed
        } else {
            Claim::InFlight
        }
    }

    /// Record the receipt of a freshly committed request and drop its claim.
    ///
    /// The first receipt wins; recording an id twice keeps the original.
    pub fn record(&mut self, request_id: RequestId, receipt: MutationReceipt) {
        self.in_flight.remove(&request_id);
        self.receipts.entry(request_id).or_insert(receipt);
    }

    /// Give up a claim without a receipt (the mutation was rejected).
    pub fn release(&mut self, request_id: &RequestId) {
        self.in_flight.remove(request_id);
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.receipts.contains_key(request_id)
    }

    pub fn is_in_flight(&self, request_id: &RequestId) -> bool {
        self.in_flight.contains(request_id)
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }
}
